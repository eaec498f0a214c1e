//! Engine output keyed by request id.
//!
//! Items keep their arrival order both globally and per id. An id that is
//! discarded while its request is still open stays cancelled until the
//! request completes, so output produced after the discard is dropped.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Default)]
pub(crate) struct Outbox {
    items: VecDeque<(String, String)>,
    open: HashSet<String>,
    cancelled: HashSet<String>,
}

impl Outbox {
    /// Mark a request as in flight.
    pub fn open(&mut self, id: &str) {
        self.open.insert(id.to_string());
    }

    /// The request will produce no more output.
    pub fn complete(&mut self, id: &str) {
        self.open.remove(id);
        self.cancelled.remove(id);
    }

    /// Queue an item. Returns `false` when the id was discarded.
    pub fn push(&mut self, id: &str, item: String) -> bool {
        if self.cancelled.contains(id) {
            return false;
        }
        self.items.push_back((id.to_string(), item));
        true
    }

    pub fn pop_any(&mut self) -> Option<String> {
        self.items.pop_front().map(|(_, item)| item)
    }

    pub fn pop_for(&mut self, id: &str) -> Option<String> {
        let position = self.items.iter().position(|(owner, _)| owner == id)?;
        self.items.remove(position).map(|(_, item)| item)
    }

    pub fn has_for(&self, id: &str) -> bool {
        self.items.iter().any(|(owner, _)| owner == id)
    }

    /// Drop queued output for `id` and refuse anything it produces later.
    /// Returns the number of dropped items.
    pub fn discard(&mut self, id: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|(owner, _)| owner != id);
        if self.open.contains(id) {
            self.cancelled.insert(id.to_string());
        }
        before - self.items.len()
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        self.cancelled.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_routed_by_id() {
        let mut outbox = Outbox::default();
        outbox.push("a", "a1".to_string());
        outbox.push("b", "b1".to_string());
        outbox.push("a", "a2".to_string());

        assert_eq!(outbox.pop_for("b").as_deref(), Some("b1"));
        assert_eq!(outbox.pop_for("b"), None);
        assert_eq!(outbox.pop_for("a").as_deref(), Some("a1"));
        assert_eq!(outbox.pop_any().as_deref(), Some("a2"));
        assert!(outbox.is_empty());
    }

    #[test]
    fn discarded_open_request_drops_late_output() {
        let mut outbox = Outbox::default();
        outbox.open("slow");
        outbox.push("slow", "partial".to_string());
        assert_eq!(outbox.discard("slow"), 1);
        assert!(outbox.is_cancelled("slow"));

        assert!(!outbox.push("slow", "late".to_string()));
        assert!(outbox.is_empty());

        outbox.complete("slow");
        assert!(!outbox.is_cancelled("slow"));
    }

    #[test]
    fn discarding_a_finished_request_leaves_no_mark() {
        let mut outbox = Outbox::default();
        outbox.push("done", "body".to_string());
        assert_eq!(outbox.discard("done"), 1);
        assert!(!outbox.is_cancelled("done"));
        assert!(outbox.push("other", "x".to_string()));
        assert!(outbox.has_for("other"));
    }
}
