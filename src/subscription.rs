//! Subscription table for SUB and REP roles: topics are unanchored regular
//! expressions matched against the full `message::[namespace::]topic`
//! string, exactly as the source library's `regexec` call does (no implicit
//! anchoring). An empty pattern list matches every topic.

use std::sync::Arc;

use regex::Regex;

use meshlink_protocol::{Field, Message};

use crate::error::MeshlinkError;

pub type Callback = Arc<dyn Fn(&str, &[Field]) -> Option<Message> + Send + Sync>;

struct Entry {
    pattern: String,
    regex: Regex,
    callback: Callback,
}

#[derive(Default)]
pub struct SubscriptionList {
    entries: Vec<Entry>,
}

impl SubscriptionList {
    pub fn new() -> Self {
        SubscriptionList { entries: Vec::new() }
    }

    /// Register or replace the callback for `pattern`.
    pub fn upsert(&mut self, pattern: &str, callback: Callback) -> Result<(), MeshlinkError> {
        let regex = Regex::new(pattern)
            .map_err(|e| MeshlinkError::InvalidArgument(format!("invalid topic pattern: {e}")))?;
        if let Some(entry) = self.entries.iter_mut().find(|e| e.pattern == pattern) {
            entry.callback = callback;
        } else {
            self.entries.push(Entry {
                pattern: pattern.to_owned(),
                regex,
                callback,
            });
        }
        Ok(())
    }

    pub fn remove(&mut self, pattern: &str) {
        self.entries.retain(|e| e.pattern != pattern);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.pattern.as_str())
    }

    /// True if any registered pattern overlaps `topic`, or if no patterns
    /// are registered at all (matches anything, per the discovery filter's
    /// "empty subscription list matches any publisher" rule).
    pub fn matches_any(&self, topic: &str) -> bool {
        self.entries.is_empty() || self.entries.iter().any(|e| e.regex.is_match(topic))
    }

    /// Match patterns against `full_topic` (the wire's full
    /// `message::[namespace::]topic` string) but invoke callbacks with
    /// `callback_topic` (the already-stripped topic), returning the
    /// non-`None` results. REP-style single-reply callers should only ever
    /// have one matching entry.
    pub fn dispatch(&self, full_topic: &str, callback_topic: &str, fields: &[Field]) -> Vec<Message> {
        self.entries
            .iter()
            .filter(|e| e.regex.is_match(full_topic))
            .filter_map(|e| (e.callback)(callback_topic, fields))
            .collect()
    }
}
