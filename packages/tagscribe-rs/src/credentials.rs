//! Round-robin pool of API keys shared by every concurrent model call.
use std::fmt;
use std::sync::Mutex;

/// A credential handed out by the pool, with its position for logging.
#[derive(Clone)]
pub struct Credential {
    pub index: usize,
    pub key: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Ordered keys with a single rotation cursor. Every `acquire_next` reads the
/// cursor, advances it and returns the prior slot under one lock, so
/// concurrent callers never observe the same position twice in a row.
pub struct CredentialPool {
    keys: Vec<String>,
    cursor: Mutex<usize>,
}

impl CredentialPool {
    /// Blank keys are dropped; duplicates are kept in order.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = keys
            .into_iter()
            .map(Into::into)
            .map(|k: String| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            keys,
            cursor: Mutex::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn acquire_next(&self) -> Option<Credential> {
        if self.keys.is_empty() {
            return None;
        }
        // A poisoned lock only means another caller panicked mid-advance; the
        // cursor value is still a valid index.
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let index = *cursor % self.keys.len();
        *cursor = (index + 1) % self.keys.len();
        Some(Credential {
            index,
            key: self.keys[index].clone(),
        })
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool").field("len", &self.keys.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_round_robin_order() {
        let pool = CredentialPool::new(["a", "b", "c"]);
        let seen: Vec<String> = (0..7).map(|_| pool.acquire_next().unwrap().key).collect();
        assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn test_empty_pool() {
        let pool = CredentialPool::new(Vec::<String>::new());
        assert!(pool.is_empty());
        assert!(pool.acquire_next().is_none());

        let blanks = CredentialPool::new(["", "  "]);
        assert!(blanks.is_empty());
    }

    #[test]
    fn test_concurrent_acquire_is_balanced() {
        let pool = Arc::new(CredentialPool::new(["k0", "k1", "k2", "k3"]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| pool.acquire_next().unwrap().index)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts = [0usize; 4];
        for h in handles {
            for idx in h.join().unwrap() {
                counts[idx] += 1;
            }
        }
        // 2000 acquisitions over 4 keys.
        assert_eq!(counts, [500, 500, 500, 500]);
    }

    #[test]
    fn test_debug_redacts_keys() {
        let pool = CredentialPool::new(["secret-key"]);
        let cred = pool.acquire_next().unwrap();
        assert!(!format!("{cred:?}").contains("secret-key"));
        assert!(!format!("{pool:?}").contains("secret-key"));
    }
}
