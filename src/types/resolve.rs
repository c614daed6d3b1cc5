//! Request and outcome types at the resolver boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::payload::{Category, RequesterId, ResolvedPayload};
use crate::key::ContentKey;

/// An already-authenticated, already-parsed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub requester_id: RequesterId,
    pub category: Category,
    pub text: String,
}

impl ResolveRequest {
    pub fn new(requester_id: RequesterId, category: Category, text: impl Into<String>) -> Self {
        Self {
            requester_id,
            category,
            text: text.into(),
        }
    }

    /// Content key for this request's question.
    pub fn key(&self) -> ContentKey {
        ContentKey::derive(self.category, &self.text)
    }
}

/// Where a resolution was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Process-local cache.
    Fast,
    /// Cross-process cache.
    Shared,
    /// Durable record store.
    Durable,
    /// This call invoked the generator.
    Generated,
    /// Another holder generated it while this call waited on the lease.
    Peer,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Fast => "fast",
            Source::Shared => "shared",
            Source::Durable => "durable",
            Source::Generated => "generated",
            Source::Peer => "peer",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete answer plus the tier it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub payload: ResolvedPayload,
    pub source: Source,
}

impl Resolution {
    pub fn text(&self) -> &str {
        &self.payload.text
    }
}

/// Events yielded by [`Resolver::resolve_stream`](crate::Resolver::resolve_stream).
///
/// A stream is zero or more `Text` fragments followed by exactly one `Done`,
/// or terminated early by a single error item. Cached answers arrive as one
/// fragment; live generations arrive incrementally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveEvent {
    Text(String),
    Done { key: ContentKey, source: Source },
}
