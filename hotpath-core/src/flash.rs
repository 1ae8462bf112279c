//! One-shot flash-clear deadlines
//!
//! Each leaf whose count increased gets its own deadline. Re-arming a key
//! before it fires replaces the deadline (last write wins); deadlines for
//! keys that no longer exist simply expire into a no-op.

use crate::tree::NodeKey;
use std::collections::HashMap;

/// How long a node stays flashed after an increase
pub const FLASH_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct FlashScheduler {
    duration_ms: u64,
    pending: HashMap<NodeKey, u64>,
}

impl Default for FlashScheduler {
    fn default() -> Self {
        Self::new(FLASH_MS)
    }
}

impl FlashScheduler {
    pub fn new(duration_ms: u64) -> Self {
        FlashScheduler {
            duration_ms,
            pending: HashMap::new(),
        }
    }

    /// Schedule a clear for `key` at `now + duration`
    pub fn arm(&mut self, key: NodeKey, now: u64) {
        self.pending.insert(key, now.saturating_add(self.duration_ms));
    }

    /// Remove and return every key whose deadline has passed, in key order
    pub fn take_due(&mut self, now: u64) -> Vec<NodeKey> {
        let mut due: Vec<NodeKey> = self
            .pending
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &due {
            self.pending.remove(key);
        }
        due.sort();
        due
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.values().copied().min()
    }

    pub fn is_pending(&self, key: &NodeKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_fires_after_duration() {
        let mut flashes = FlashScheduler::default();
        let key = NodeKey::leaf("p", "A.java");
        flashes.arm(key.clone(), 5000);
        assert!(flashes.take_due(5999).is_empty());
        assert_eq!(flashes.take_due(6000), vec![key]);
        assert!(flashes.is_empty());
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let mut flashes = FlashScheduler::default();
        let key = NodeKey::leaf("p", "A.java");
        flashes.arm(key.clone(), 0);
        flashes.arm(key.clone(), 800);
        assert_eq!(flashes.len(), 1);
        assert!(flashes.take_due(1000).is_empty());
        assert_eq!(flashes.next_deadline(), Some(1800));
        assert_eq!(flashes.take_due(1800), vec![key]);
    }

    #[test]
    fn test_independent_keys() {
        let mut flashes = FlashScheduler::new(100);
        let a = NodeKey::leaf("p", "A.java");
        let b = NodeKey::leaf("p", "B.java");
        flashes.arm(b.clone(), 50);
        flashes.arm(a.clone(), 0);
        assert_eq!(flashes.next_deadline(), Some(100));
        assert_eq!(flashes.take_due(100), vec![a]);
        assert!(flashes.is_pending(&b));
        assert_eq!(flashes.take_due(1000), vec![b]);
    }
}
