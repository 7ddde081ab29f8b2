use std::collections::HashMap;

/// Key set whose members expire.
///
/// Expired keys are dropped lazily on lookup and in bulk by [`TtlSet::sweep`].
#[derive(Debug, Clone)]
pub struct TtlSet {
    entries: HashMap<String, u64>,
    default_ttl_ms: u64,
}

impl TtlSet {
    pub fn new(default_ttl_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl_ms,
        }
    }

    pub fn contains(&mut self, key: &str, now_ms: u64) -> bool {
        match self.entries.get(key) {
            None => false,
            Some(expires_at) if *expires_at <= now_ms => {
                self.entries.remove(key);
                false
            }
            Some(_) => true,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, now_ms: u64) {
        let ttl = self.default_ttl_ms;
        self.insert_with_ttl(key, now_ms, ttl);
    }

    pub fn insert_with_ttl(&mut self, key: impl Into<String>, now_ms: u64, ttl_ms: u64) {
        self.entries.insert(key.into(), now_ms.saturating_add(ttl_ms));
    }

    /// Removes every expired key, returning how many were dropped.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now_ms);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
