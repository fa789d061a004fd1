//! Dot-separated subject matching.
//!
//! `*` matches exactly one token, `>` matches one or more trailing tokens.
//! `events.*.block_found` and `events.eu-west.>` are typical filters.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFilter {
    pattern: String,
}

impl SubjectFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Filter matching every subject.
    pub fn all() -> Self {
        Self::new(">")
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, subject: &str) -> bool {
        let mut subject_tokens = subject.split('.');
        for token in self.pattern.split('.') {
            match token {
                ">" => return subject_tokens.next().is_some(),
                "*" => {
                    if subject_tokens.next().is_none() {
                        return false;
                    }
                }
                literal => {
                    if subject_tokens.next() != Some(literal) {
                        return false;
                    }
                }
            }
        }
        subject_tokens.next().is_none()
    }
}
