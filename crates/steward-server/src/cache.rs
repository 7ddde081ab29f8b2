use std::collections::HashMap;

/// Short-lived response cache keyed by request id. Used by `live` mode only.
pub struct IdempotencyCache {
    ttl_ms: u64,
    entries: HashMap<String, (Vec<u8>, u64)>,
}

impl IdempotencyCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            entries: HashMap::new(),
        }
    }

    pub fn sweep(&mut self, now_ms: u64) {
        self.entries.retain(|_, (_, expires_at)| *expires_at > now_ms);
    }

    pub fn get(&self, request_id: &str, now_ms: u64) -> Option<&[u8]> {
        match self.entries.get(request_id) {
            Some((body, expires_at)) if *expires_at > now_ms => Some(body),
            _ => None,
        }
    }

    pub fn insert(&mut self, request_id: &str, body: Vec<u8>, now_ms: u64) {
        self.entries
            .insert(request_id.to_string(), (body, now_ms + self.ttl_ms));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_and_sweep() {
        let mut cache = IdempotencyCache::new(100);
        cache.insert("r1", b"one".to_vec(), 1_000);
        assert_eq!(cache.get("r1", 1_099), Some(&b"one"[..]));
        assert_eq!(cache.get("r1", 1_100), None);
        cache.insert("r2", b"two".to_vec(), 1_050);
        cache.sweep(1_100);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("r2", 1_100).is_some());
    }
}
