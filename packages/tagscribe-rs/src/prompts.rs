//! Built-in instructions sent alongside each page image.

/// Used when the page carries tagged region boxes.
pub const PROMPT_WITH_REGIONS: &str = r#"You are transcribing a scanned exam or worksheet page.

Some regions of the page (figures, diagrams, tables drawn as images) are outlined with coloured boxes. Each box carries a short tag such as IM1, IM2, IM3 printed in its centre. The tags follow reading order: top to bottom, then left to right.

Instructions:
1. First reason about the page layout inside a single <thinking>...</thinking> block.
2. Then write the full transcription of the page inside a single <{ANSWER_TAG}>...</{ANSWER_TAG}> block.
3. Transcribe all text faithfully, keeping the original language. Write mathematics in LaTeX.
4. Wherever a tagged region appears in the flow of the document, insert a self-closing reference instead of describing it:
   <graphic tag="IMx" label="short caption"/>
   where IMx is the exact tag printed in the box. The label attribute is optional.
5. Reference every tag exactly once. Do not invent tags that are not printed on the page.
6. Ignore the coloured boxes and tag text themselves when transcribing; they are not part of the page."#;

/// Used when the page has no regions of interest.
pub const PROMPT_WITHOUT_REGIONS: &str = r#"You are transcribing a scanned exam or worksheet page.

Instructions:
1. First reason about the page layout inside a single <thinking>...</thinking> block.
2. Then write the full transcription of the page inside a single <{ANSWER_TAG}>...</{ANSWER_TAG}> block.
3. Transcribe all text faithfully, keeping the original language. Write mathematics in LaTeX.
4. The page has no figures to reference; do not emit any <graphic/> elements."#;

const ANSWER_TAG_PLACEHOLDER: &str = "{ANSWER_TAG}";

/// Substitutes the answer container tag into a prompt template.
pub fn render_prompt(template: &str, answer_tag: &str) -> String {
    template.replace(ANSWER_TAG_PLACEHOLDER, answer_tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prompt() {
        let prompt = render_prompt(PROMPT_WITH_REGIONS, "answer");
        assert!(prompt.contains("<answer>...</answer>"));
        assert!(prompt.contains(r#"<graphic tag="IMx""#));
        assert!(!prompt.contains(ANSWER_TAG_PLACEHOLDER));

        let prompt = render_prompt(PROMPT_WITHOUT_REGIONS, "answer");
        assert!(!prompt.contains("IM1"));
    }
}
