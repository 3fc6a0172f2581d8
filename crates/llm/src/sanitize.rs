//! Tool-name sanitization for providers with restricted name alphabets.
//!
//! Canonical names are namespaced with a dot (`research.web_search`),
//! which some providers reject. Each request builds a [`ToolNameMap`]
//! that sanitizes names on the way out and restores the canonical name
//! on the way back, so `canonical → provider → canonical` is the
//! identity within one request.
//!
//! Sanitization is not injective on its own: `a_b.c` and `a.b_c` both
//! collapse to `a_b_c`, and truncation can collide long names. The map
//! therefore tracks both directions and disambiguates a colliding wire
//! name with a numeric suffix instead of overwriting the earlier entry.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Providers accept `[a-zA-Z0-9_-]`; keep a safe length ceiling.
const MAX_NAME_LEN: usize = 64;

fn invalid_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("pattern is valid"))
}

/// Rewrite a canonical tool name into the provider-allowed alphabet.
/// Use [`ToolNameMap::sanitize`] for anything that must round-trip.
pub fn sanitize_tool_name(name: &str) -> String {
    let mut sanitized = invalid_chars().replace_all(name, "_").into_owned();
    sanitized.truncate(MAX_NAME_LEN);
    sanitized
}

/// A colliding wire name with `_<n>` appended, still within the cap.
/// Sanitized names are ASCII, so byte truncation is safe.
fn with_suffix(base: &str, n: usize) -> String {
    let suffix = format!("_{n}");
    let keep = MAX_NAME_LEN - suffix.len();
    let mut out = base.to_string();
    out.truncate(keep);
    out.push_str(&suffix);
    out
}

/// Per-request bidirectional mapping between canonical and wire names.
#[derive(Debug, Default)]
pub struct ToolNameMap {
    to_original: HashMap<String, String>,
    to_wire: HashMap<String, String>,
}

impl ToolNameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitize a name and remember the mapping, both ways.
    ///
    /// Sanitizing the same canonical name again returns the wire name
    /// already assigned; a fresh name whose sanitized form is taken by
    /// a different canonical name gets a numeric suffix.
    pub fn sanitize(&mut self, original: &str) -> String {
        if let Some(assigned) = self.to_wire.get(original) {
            return assigned.clone();
        }

        let base = sanitize_tool_name(original);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.to_original.contains_key(&candidate) {
            candidate = with_suffix(&base, n);
            n += 1;
        }

        self.to_original
            .insert(candidate.clone(), original.to_string());
        self.to_wire.insert(original.to_string(), candidate.clone());
        candidate
    }

    /// Restore the canonical name; unknown names pass through unchanged.
    pub fn restore(&self, sanitized: &str) -> String {
        self.to_original
            .get(sanitized)
            .cloned()
            .unwrap_or_else(|| sanitized.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_dots_with_underscores() {
        assert_eq!(sanitize_tool_name("research.web_search"), "research_web_search");
    }

    #[test]
    fn truncates_to_limit() {
        let long = "m".repeat(100);
        assert_eq!(sanitize_tool_name(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn round_trip_is_identity() {
        let mut map = ToolNameMap::new();
        for name in ["research.web_search", "location.create_reminder", "plain_name"] {
            let wire = map.sanitize(name);
            assert!(wire.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
            assert_eq!(map.restore(&wire), name);
        }
    }

    #[test]
    fn repeated_sanitize_is_idempotent() {
        let mut map = ToolNameMap::new();
        let first = map.sanitize("scheduler.add_job");
        let second = map.sanitize("scheduler.add_job");
        assert_eq!(first, second);
        assert_eq!(map.restore(&first), "scheduler.add_job");
    }

    #[test]
    fn colliding_names_stay_distinct_and_round_trip() {
        // Both collapse to "a_b_c" under plain sanitization.
        let mut map = ToolNameMap::new();
        let first = map.sanitize("a_b.c");
        let second = map.sanitize("a.b_c");
        assert_eq!(first, "a_b_c");
        assert_eq!(second, "a_b_c_2");
        assert_eq!(map.restore(&first), "a_b.c");
        assert_eq!(map.restore(&second), "a.b_c");
    }

    #[test]
    fn three_way_collision_counts_up() {
        let mut map = ToolNameMap::new();
        assert_eq!(map.sanitize("a.b"), "a_b");
        assert_eq!(map.sanitize("a_b"), "a_b_2");
        assert_eq!(map.sanitize("a-b"), "a-b");
        assert_eq!(map.sanitize("a b"), "a_b_3");
        assert_eq!(map.restore("a_b_3"), "a b");
    }

    #[test]
    fn truncation_collisions_disambiguate_within_limit() {
        let shared_prefix = "m".repeat(80);
        let mut map = ToolNameMap::new();
        let first = map.sanitize(&format!("{shared_prefix}.one"));
        let second = map.sanitize(&format!("{shared_prefix}.two"));
        assert_ne!(first, second);
        assert!(first.len() <= MAX_NAME_LEN);
        assert!(second.len() <= MAX_NAME_LEN);
        assert_eq!(map.restore(&second), format!("{shared_prefix}.two"));
    }

    #[test]
    fn unknown_name_passes_through() {
        let map = ToolNameMap::new();
        assert_eq!(map.restore("never_seen"), "never_seen");
    }
}
