//! Keyword-to-reply matching with a TTL'd lookup cache.
//!
//! Matching is deliberately dumb: exact text, then individual tokens,
//! then a punctuation-stripped retry. No reply pattern matches, no
//! reply is sent. Response selection within a matched set is uniform
//! random through the injectable [`RngHandle`].

use crate::clock::Clock;
use crate::rng::RngHandle;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Keyword → ordered, non-empty set of candidate responses.
///
/// Invariant: every key maps to a non-empty vec; removing the last
/// response for a key removes the key. Keys are stored case-folded and
/// trimmed.
#[derive(Debug, Clone, Default)]
pub struct ReplyIndex {
    entries: HashMap<String, Vec<String>>,
}

impl ReplyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw keyword/response pairs, normalizing keys and
    /// dropping entries that end up empty.
    pub fn from_entries(raw: HashMap<String, Vec<String>>) -> Self {
        let mut index = Self::new();
        for (keyword, responses) in raw {
            for response in responses {
                index.add(&keyword, response);
            }
        }
        index
    }

    /// Built-in reply set used when the reply store is unreadable.
    pub fn defaults() -> Self {
        let mut index = Self::new();
        let seed: [(&str, &[&str]); 8] = [
            ("hi", &["Hello!", "Hi there!", "Hey!"]),
            ("hello", &["Hi!", "Hello!", "Hey there!"]),
            ("test", &["Test successful!", "Working!"]),
            ("how are you", &["I'm good, thanks!", "Doing well! How about you?"]),
            ("good morning", &["Good morning!", "Morning! Have a great day!"]),
            ("good night", &["Good night!", "Sweet dreams!"]),
            ("thanks", &["You're welcome!", "Anytime!"]),
            ("bye", &["Bye!", "Goodbye!", "See you!"]),
        ];
        for (keyword, responses) in seed {
            for response in responses {
                index.add(keyword, *response);
            }
        }
        index
    }

    pub fn add(&mut self, keyword: &str, response: impl Into<String>) -> bool {
        let key = normalize(keyword);
        if key.is_empty() {
            return false;
        }
        let response = response.into();
        if response.is_empty() {
            return false;
        }
        self.entries.entry(key).or_default().push(response);
        true
    }

    /// Remove one response, or the whole keyword when `response` is
    /// `None`. Returns false when nothing matched.
    pub fn remove(&mut self, keyword: &str, response: Option<&str>) -> bool {
        let key = normalize(keyword);
        let Some(responses) = self.entries.get_mut(&key) else {
            return false;
        };
        match response {
            None => {
                self.entries.remove(&key);
                true
            }
            Some(target) => {
                let before = responses.len();
                responses.retain(|r| r != target);
                let removed = responses.len() < before;
                if responses.is_empty() {
                    self.entries.remove(&key);
                }
                removed
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &HashMap<String, Vec<String>> {
        &self.entries
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

fn strip_symbols(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

struct CacheEntry {
    value: Option<String>,
    inserted_at: Instant,
}

pub struct MatcherStats {
    pub patterns: usize,
    pub cache_entries: usize,
}

pub struct ReplyMatcher {
    index: RwLock<ReplyIndex>,
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    rng: RngHandle,
}

impl ReplyMatcher {
    pub fn new(index: ReplyIndex, ttl: Duration, clock: Arc<dyn Clock>, rng: RngHandle) -> Self {
        Self {
            index: RwLock::new(index),
            cache: DashMap::new(),
            ttl,
            clock,
            rng,
        }
    }

    /// Map message text to a candidate reply. Results (hits and misses
    /// both) are cached by normalized text for the configured TTL.
    pub fn find_reply(&self, text: &str) -> Option<String> {
        let key = normalize(text);
        if key.is_empty() {
            return None;
        }

        let now = self.clock.now();
        if let Some(entry) = self.cache.get(&key) {
            if now.duration_since(entry.inserted_at) < self.ttl {
                return entry.value.clone();
            }
            drop(entry);
            self.cache.remove(&key);
        }

        let value = self.match_normalized(&key);
        self.cache.insert(
            key,
            CacheEntry {
                value: value.clone(),
                inserted_at: now,
            },
        );
        value
    }

    /// Same matching as [`find_reply`] but with no cache interaction.
    /// Used by the admin `test` surface.
    ///
    /// [`find_reply`]: ReplyMatcher::find_reply
    pub fn peek_reply(&self, text: &str) -> Option<String> {
        let key = normalize(text);
        if key.is_empty() {
            return None;
        }
        self.match_normalized(&key)
    }

    fn match_normalized(&self, normalized: &str) -> Option<String> {
        let index = self.read_index();

        if let Some(responses) = index.get(normalized) {
            return self.rng.pick(responses).cloned();
        }

        for token in normalized.split_whitespace() {
            if token.chars().count() <= 2 {
                continue;
            }
            if let Some(responses) = index.get(token) {
                return self.rng.pick(responses).cloned();
            }
        }

        let stripped = strip_symbols(normalized);
        if stripped != normalized {
            if let Some(responses) = index.get(&stripped) {
                return self.rng.pick(responses).cloned();
            }
        }

        None
    }

    pub fn add_reply(&self, keyword: &str, response: &str) -> bool {
        let added = self.write_index().add(keyword, response);
        if added {
            // Token and stripped-form lookups can depend on any key, so
            // invalidation is coarse: every write clears the cache.
            self.cache.clear();
        }
        added
    }

    pub fn remove_reply(&self, keyword: &str, response: Option<&str>) -> bool {
        let removed = self.write_index().remove(keyword, response);
        if removed {
            self.cache.clear();
        }
        removed
    }

    /// Replace the whole index (admin reload). Clears the cache.
    pub fn reload(&self, index: ReplyIndex) {
        *self.write_index() = index;
        self.cache.clear();
    }

    pub fn snapshot_entries(&self) -> HashMap<String, Vec<String>> {
        self.read_index().entries().clone()
    }

    pub fn stats(&self) -> MatcherStats {
        MatcherStats {
            patterns: self.read_index().len(),
            cache_entries: self.cache.len(),
        }
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, ReplyIndex> {
        self.index
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_index(&self) -> std::sync::RwLockWriteGuard<'_, ReplyIndex> {
        self.index
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn matcher_with(entries: &[(&str, &[&str])]) -> (ReplyMatcher, Arc<ManualClock>) {
        let mut index = ReplyIndex::new();
        for (keyword, responses) in entries {
            for response in *responses {
                index.add(keyword, *response);
            }
        }
        let clock = Arc::new(ManualClock::new());
        let matcher = ReplyMatcher::new(
            index,
            Duration::from_secs(300),
            clock.clone(),
            RngHandle::seeded(11),
        );
        (matcher, clock)
    }

    #[test]
    fn exact_match_wins_and_stays_within_the_response_set() {
        let (matcher, _) = matcher_with(&[("hi", &["Hello!", "Hey!"])]);
        for _ in 0..50 {
            let reply = matcher.peek_reply("Hi").expect("match");
            assert!(["Hello!", "Hey!"].contains(&reply.as_str()));
        }
    }

    #[test]
    fn empty_and_whitespace_text_never_match() {
        let (matcher, _) = matcher_with(&[("hi", &["Hello!"])]);
        assert_eq!(matcher.find_reply(""), None);
        assert_eq!(matcher.find_reply("   \t  "), None);
    }

    #[test]
    fn token_match_is_left_to_right_and_skips_short_tokens() {
        let (matcher, _) = matcher_with(&[("morning", &["Morning!"]), ("hi", &["Hello!"])]);
        // "hi" is only two chars, so the token pass skips it.
        assert_eq!(
            matcher.find_reply("hi morning everyone"),
            Some("Morning!".to_string())
        );
    }

    #[test]
    fn stripped_punctuation_fallback_applies() {
        let (matcher, _) = matcher_with(&[("hello", &["Hi!"])]);
        assert_eq!(matcher.find_reply("hello!!!"), Some("Hi!".to_string()));
    }

    #[test]
    fn no_match_yields_none_and_is_cached() {
        let (matcher, _) = matcher_with(&[("hi", &["Hello!"])]);
        assert_eq!(matcher.find_reply("xyz123"), None);
        assert_eq!(matcher.stats().cache_entries, 1);
        assert_eq!(matcher.find_reply("xyz123"), None);
    }

    #[test]
    fn cache_makes_repeated_lookups_idempotent_within_ttl() {
        let (matcher, clock) = matcher_with(&[("hi", &["Hello!", "Hey!", "Hi there!"])]);
        let first = matcher.find_reply("hi").expect("match");
        for _ in 0..20 {
            assert_eq!(matcher.find_reply("hi"), Some(first.clone()));
        }
        clock.advance(Duration::from_secs(299));
        assert_eq!(matcher.find_reply("hi"), Some(first));
    }

    #[test]
    fn expired_cache_entries_are_recomputed_not_served() {
        let (matcher, clock) = matcher_with(&[("hi", &["Hello!"])]);
        assert_eq!(matcher.find_reply("hi"), Some("Hello!".to_string()));

        // Mutate underneath the cache, then cross the TTL boundary.
        assert!(matcher.remove_reply("hi", None));
        assert!(matcher.add_reply("hi", "Changed!"));
        clock.advance(Duration::from_secs(301));
        assert_eq!(matcher.find_reply("hi"), Some("Changed!".to_string()));
    }

    #[test]
    fn writes_invalidate_cached_results_immediately() {
        let (matcher, _) = matcher_with(&[("hi", &["Hello!"])]);
        assert_eq!(matcher.find_reply("hi"), Some("Hello!".to_string()));

        assert!(matcher.remove_reply("hi", None));
        assert_eq!(matcher.find_reply("hi"), None);
    }

    #[test]
    fn add_is_case_folded_and_remove_last_response_drops_the_key() {
        let (matcher, _) = matcher_with(&[]);
        assert!(matcher.add_reply("  HeLLo ", "Hi!"));
        assert_eq!(matcher.find_reply("hello"), Some("Hi!".to_string()));

        assert!(matcher.remove_reply("HELLO", Some("Hi!")));
        assert_eq!(matcher.stats().patterns, 0);
        assert_eq!(matcher.find_reply("hello"), None);
    }

    #[test]
    fn removing_a_missing_keyword_is_a_no_op() {
        let (matcher, _) = matcher_with(&[("hi", &["Hello!"])]);
        assert!(!matcher.remove_reply("nope", None));
        assert!(!matcher.remove_reply("hi", Some("not a response")));
        assert_eq!(matcher.stats().patterns, 1);
    }

    #[test]
    fn default_index_is_non_empty_and_consistent() {
        let index = ReplyIndex::defaults();
        assert!(!index.is_empty());
        for (key, responses) in index.entries() {
            assert_eq!(key, &normalize(key));
            assert!(!responses.is_empty());
        }
    }
}
