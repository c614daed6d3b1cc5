//! Payload, category and access-history types

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::ContentKey;
use crate::{MimirError, Result};

/// Identifier of an authenticated requester, as supplied by the transport layer.
pub type RequesterId = i64;

/// Kind of question being answered.
///
/// Selects the prompt template used for generation and the shared-tier TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Explanation of a code snippet.
    Code,
    /// Abstract and summary of an article.
    Article,
}

impl Category {
    /// Stable lowercase tag used in keys, logs and the durable store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Code => "code",
            Category::Article => "article",
        }
    }

    /// Default shared-tier TTL for payloads of this category.
    ///
    /// Article summaries change least often and live longest.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Category::Code => Duration::from_secs(48 * 3600),
            Category::Article => Duration::from_secs(72 * 3600),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Category {
    type Err = MimirError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "code" => Ok(Category::Code),
            "article" => Ok(Category::Article),
            other => Err(MimirError::InvalidInput(format!(
                "unknown category '{other}' (expected 'code' or 'article')"
            ))),
        }
    }
}

/// A generated answer, keyed by the content key of its question.
///
/// Produced once per distinct key and treated as immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPayload {
    pub key: ContentKey,
    pub category: Category,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Row id assigned by the durable store. `None` when the payload has not
    /// (yet) been persisted, e.g. after a store write failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_record_id: Option<i64>,
}

impl ResolvedPayload {
    /// Create a fresh, not-yet-persisted payload stamped with the current time.
    pub fn new(key: ContentKey, category: Category, text: impl Into<String>) -> Self {
        Self {
            key,
            category,
            text: text.into(),
            created_at: Utc::now(),
            owner_record_id: None,
        }
    }

    /// Attach the durable store's row id.
    pub fn with_owner(mut self, owner_record_id: i64) -> Self {
        self.owner_record_id = Some(owner_record_id);
        self
    }
}

/// One append-only access-history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessHistoryEntry {
    pub requester_id: RequesterId,
    pub payload_owner_id: i64,
    pub timestamp: DateTime<Utc>,
}

impl AccessHistoryEntry {
    /// Entry for `requester_id` reading the payload stored as `payload_owner_id`, now.
    pub fn now(requester_id: RequesterId, payload_owner_id: i64) -> Self {
        Self {
            requester_id,
            payload_owner_id,
            timestamp: Utc::now(),
        }
    }
}
