//! Loop guard for the planning loop.
//!
//! Detects when the planner keeps choosing the same tool with the same
//! arguments and refuses the invocation with a synthetic observation error.

use serde_json::Value;

/// Tracks consecutive identical tool calls.
pub struct LoopGuard {
    /// Last seen (tool_name, argument fingerprint).
    last: Option<(String, u64)>,
    /// How many times in a row it has been seen.
    consecutive: u32,
    /// Invocations allowed before the guard refuses the next one.
    threshold: u32,
}

impl LoopGuard {
    /// Create a new guard. `threshold` is how many consecutive identical
    /// calls are dispatched before further ones are refused (default: 3).
    pub fn new(threshold: u32) -> Self {
        Self {
            last: None,
            consecutive: 0,
            threshold,
        }
    }

    /// Record an intended tool call. Returns `true` if the call must be
    /// refused because the planner is stuck.
    pub fn record(&mut self, tool_name: &str, args: &Value) -> bool {
        let fingerprint = Self::fingerprint(&args.to_string());
        let key = (tool_name.to_string(), fingerprint);

        match &self.last {
            Some(last) if *last == key => {
                self.consecutive += 1;
            }
            _ => {
                self.last = Some(key);
                self.consecutive = 1;
            }
        }

        self.consecutive > self.threshold
    }

    /// Reset the guard (e.g. after a replan).
    pub fn reset(&mut self) {
        self.last = None;
        self.consecutive = 0;
    }

    /// Simple non-cryptographic hash for argument deduplication.
    fn fingerprint(s: &str) -> u64 {
        let mut h: u64 = 0;
        for b in s.bytes() {
            h = h.wrapping_mul(31).wrapping_add(b as u64);
        }
        h
    }
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_three_identical_calls_refuses_fourth() {
        let mut guard = LoopGuard::default();
        let args = serde_json::json!({ "path": "x" });
        assert!(!guard.record("fs_read", &args));
        assert!(!guard.record("fs_read", &args));
        assert!(!guard.record("fs_read", &args));
        assert!(guard.record("fs_read", &args));
    }

    #[test]
    fn different_args_reset_the_count() {
        let mut guard = LoopGuard::default();
        assert!(!guard.record("fs_read", &serde_json::json!({ "path": "a" })));
        assert!(!guard.record("fs_read", &serde_json::json!({ "path": "a" })));
        assert!(!guard.record("fs_read", &serde_json::json!({ "path": "b" })));
        assert!(!guard.record("fs_read", &serde_json::json!({ "path": "a" })));
    }

    #[test]
    fn different_tools_reset_the_count() {
        let mut guard = LoopGuard::default();
        let args = serde_json::json!({});
        assert!(!guard.record("a", &args));
        assert!(!guard.record("a", &args));
        assert!(!guard.record("b", &args));
        assert!(!guard.record("a", &args));
    }

    #[test]
    fn reset_clears_state() {
        let mut guard = LoopGuard::new(1);
        let args = serde_json::json!({});
        assert!(!guard.record("t", &args));
        assert!(guard.record("t", &args));
        guard.reset();
        assert!(!guard.record("t", &args));
    }
}
