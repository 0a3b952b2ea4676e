//! Pulls the thinking section and the answer document out of raw model
//! output, and rewrites `<graphic tag="IMx"/>` references.
use regex::{Captures, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tagscribe_vision::NormalizedBbox;

/// Container tag the prompts ask the model to wrap its final answer in.
pub const DEFAULT_ANSWER_TAG: &str = "assessmentmarkuplanguage";

static THINKING_OPEN: OnceLock<Regex> = OnceLock::new();
static THINKING_CLOSE: OnceLock<Regex> = OnceLock::new();
static GRAPHIC_WITH_LABEL: OnceLock<Regex> = OnceLock::new();
static GRAPHIC_ANY: OnceLock<Regex> = OnceLock::new();

fn case_insensitive(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

fn thinking_open() -> &'static Regex {
    THINKING_OPEN.get_or_init(|| case_insensitive(r"<thinking[^>]*>"))
}

fn thinking_close() -> &'static Regex {
    THINKING_CLOSE.get_or_init(|| case_insensitive(r"</thinking\s*>"))
}

fn graphic_with_label() -> &'static Regex {
    GRAPHIC_WITH_LABEL.get_or_init(|| {
        case_insensitive(r#"<graphic\s+tag=['"]?(IM[0-9O]+)['"]?(?:\s+label=['"](.*?)['"])?\s*/?>"#)
    })
}

fn graphic_any() -> &'static Regex {
    GRAPHIC_ANY.get_or_init(|| case_insensitive(r#"<graphic\s+tag=['"]?(IM[0-9O]+)['"]?[^>]*\s*/?>"#))
}

/// Thinking text plus the answer document, if a complete answer block was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedResponse {
    pub thinking: String,
    pub document: Option<String>,
}

/// Outcome of URL resolution: `Ok` only when every reference and every map
/// entry were matched one to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStatus {
    Ok,
    PartialOrMissing,
}

/// Uppercases and maps the letter `O` to the digit `0`, so `im1O` reads as `IM10`.
pub fn normalize_tag(raw: &str) -> String {
    raw.to_uppercase().replace('O', "0")
}

/// Removes the span from the first `<thinking>` to the last `</thinking>`
/// and returns `(remainder, inner)`. Without a closing tag, or without an
/// opening tag before it, the input comes back unchanged with empty thinking.
pub fn extract_and_remove_thinking_block(text: &str) -> (String, String) {
    let Some(close) = thinking_close().find_iter(text).last() else {
        return (text.to_string(), String::new());
    };
    let open = match thinking_open().find(text) {
        Some(open) if open.start() < close.start() => open,
        _ => return (text.to_string(), String::new()),
    };

    let inner = text[open.end()..close.start()].to_string();
    let mut outside = String::with_capacity(text.len() - (close.end() - open.start()));
    outside.push_str(&text[..open.start()]);
    outside.push_str(&text[close.end()..]);
    (outside, inner)
}

/// Trimmed content of the last `<tag ...>...</tag>` block. The opening tag
/// is the last one starting before the last closing tag; nesting is resolved
/// by position only.
pub fn find_last_tag_block(text: &str, tag_name: &str) -> Option<String> {
    let escaped = regex::escape(tag_name);
    let open = RegexBuilder::new(&format!(r"<\s*{escaped}\b[^>]*>"))
        .case_insensitive(true)
        .build()
        .ok()?;
    let close = RegexBuilder::new(&format!(r"</\s*{escaped}\s*>"))
        .case_insensitive(true)
        .build()
        .ok()?;

    let last_close = close.find_iter(text).last()?;
    let last_open = open
        .find_iter(text)
        .take_while(|m| m.start() < last_close.start())
        .last()?;

    // An opening tag can overlap the closing one only for degenerate names.
    if last_open.end() > last_close.start() {
        return None;
    }
    Some(text[last_open.end()..last_close.start()].trim().to_string())
}

/// Splits raw model output into its thinking block and answer document.
pub fn extract_response(text: &str, answer_tag: &str) -> ExtractedResponse {
    let (remainder, thinking) = extract_and_remove_thinking_block(text);
    ExtractedResponse {
        thinking,
        document: find_last_tag_block(&remainder, answer_tag),
    }
}

/// Replaces each graphic reference with `<img src="..." alt="..."/>`.
/// References with no URL are dropped from the output; they, and map
/// entries that are never referenced, make the status `PartialOrMissing`.
pub fn resolve_to_urls(content: &str, tag_to_url: &HashMap<String, String>) -> (String, ResolveStatus) {
    let urls: HashMap<String, &str> = tag_to_url
        .iter()
        .map(|(tag, url)| (normalize_tag(tag), url.as_str()))
        .collect();

    let mut used: HashSet<String> = HashSet::new();
    let mut unresolved = false;

    let rewritten = graphic_with_label().replace_all(content, |caps: &Captures| {
        let key = normalize_tag(&caps[1]);
        match urls.get(&key).filter(|url| !url.is_empty()) {
            Some(url) => {
                let alt = caps
                    .get(2)
                    .map(|m| m.as_str())
                    .filter(|label| !label.is_empty())
                    .unwrap_or(&key);
                let element = format!(r#"<img src="{url}" alt="{alt}"/>"#);
                used.insert(key);
                element
            }
            None => {
                unresolved = true;
                String::new()
            }
        }
    });

    let unreferenced = urls.keys().any(|key| !used.contains(key));
    let status = if unresolved || unreferenced {
        ResolveStatus::PartialOrMissing
    } else {
        ResolveStatus::Ok
    };
    (rewritten.into_owned(), status)
}

/// Replaces each graphic reference with `[image]x1,y1,x2,y2`. Unknown tags
/// are left verbatim.
pub fn resolve_to_coordinates(content: &str, tag_to_bbox: &HashMap<String, NormalizedBbox>) -> String {
    graphic_any()
        .replace_all(content, |caps: &Captures| {
            let key = normalize_tag(&caps[1]);
            match tag_to_bbox.get(&key) {
                Some(NormalizedBbox([x1, y1, x2, y2])) => format!("[image]{x1},{y1},{x2},{y2}"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Tags referenced in `content`, normalized, in order of first appearance.
pub fn referenced_tags(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    graphic_any()
        .captures_iter(content)
        .map(|caps| normalize_tag(&caps[1]))
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thinking_block_removed() {
        let raw = "pre <thinking>step one</thinking> mid <thinking kind=\"x\">two</THINKING> post";
        let (rest, inner) = extract_and_remove_thinking_block(raw);
        assert_eq!(inner, "step one</thinking> mid <thinking kind=\"x\">two");
        assert_eq!(rest, "pre  post");
    }

    #[test]
    fn test_thinking_block_absent() {
        let raw = "<thinking>never closed";
        assert_eq!(extract_and_remove_thinking_block(raw), (raw.to_string(), String::new()));

        let raw = "</thinking> before <thinking>";
        assert_eq!(extract_and_remove_thinking_block(raw), (raw.to_string(), String::new()));
    }

    #[test]
    fn test_find_last_tag_block() {
        let text = "<doc>first</doc> junk <DOC lang=\"vi\">  second </doc>";
        assert_eq!(find_last_tag_block(text, "doc").as_deref(), Some("second"));

        // Nested opening tags resolve to the closest one before the close.
        let text = "<doc>outer <doc>inner</doc>";
        assert_eq!(find_last_tag_block(text, "doc").as_deref(), Some("inner"));

        assert_eq!(find_last_tag_block("<doc>unterminated", "doc"), None);
        assert_eq!(find_last_tag_block("</doc>", "doc"), None);
        // Word boundary keeps longer names from matching.
        assert_eq!(find_last_tag_block("<docs>x</doc>", "doc"), None);
    }

    #[test]
    fn test_extract_response_keeps_thinking_out_of_document() {
        let raw = format!(
            "<thinking>draft <{DEFAULT_ANSWER_TAG}>wrong</{DEFAULT_ANSWER_TAG}></thinking>\n<{DEFAULT_ANSWER_TAG}>Final body</{DEFAULT_ANSWER_TAG}>"
        );
        let extracted = extract_response(&raw, DEFAULT_ANSWER_TAG);
        assert!(extracted.thinking.contains("wrong"));
        assert_eq!(extracted.document.as_deref(), Some("Final body"));

        let bare = extract_response("just text", DEFAULT_ANSWER_TAG);
        assert_eq!(bare.thinking, "");
        assert!(bare.document.is_none());
    }

    #[test]
    fn test_resolve_to_urls_full_match() {
        let map = HashMap::from([
            ("IM1".to_string(), "crops/a.png".to_string()),
            ("IM10".to_string(), "crops/b.png".to_string()),
        ]);
        let text = r#"See <graphic tag="IM1" label="Figure 1"/> and <graphic tag='im1O'>."#;
        let (out, status) = resolve_to_urls(text, &map);
        assert_eq!(
            out,
            r#"See <img src="crops/a.png" alt="Figure 1"/> and <img src="crops/b.png" alt="IM10"/>."#
        );
        assert_eq!(status, ResolveStatus::Ok);
    }

    #[test]
    fn test_resolve_to_urls_partial() {
        let text = r#"A <graphic tag="IM1"/> B <graphic tag="IM2"/>"#;

        let (out, status) = resolve_to_urls(text, &HashMap::new());
        assert_eq!(out, "A  B ");
        assert_eq!(status, ResolveStatus::PartialOrMissing);

        let map = HashMap::from([
            ("IM1".to_string(), "a".to_string()),
            ("IM2".to_string(), "b".to_string()),
            ("IM3".to_string(), "c".to_string()),
        ]);
        let (out, status) = resolve_to_urls(text, &map);
        assert!(out.contains(r#"src="a""#) && out.contains(r#"src="b""#));
        assert_eq!(status, ResolveStatus::PartialOrMissing);
    }

    #[test]
    fn test_resolve_to_coordinates() {
        let map = HashMap::from([("IM1".to_string(), NormalizedBbox([400, 400, 600, 600]))]);
        let text = r#"x <graphic tag="IM1" label="a"/> y <graphic tag="IM9"/>"#;
        assert_eq!(
            resolve_to_coordinates(text, &map),
            r#"x [image]400,400,600,600 y <graphic tag="IM9"/>"#
        );
    }

    #[test]
    fn test_referenced_tags_in_order() {
        let text = r#"<graphic tag="IM2"/><graphic tag="im1"/><graphic tag="IM2"/>"#;
        assert_eq!(referenced_tags(text), vec!["IM2", "IM1"]);
    }
}
