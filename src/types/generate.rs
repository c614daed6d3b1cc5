//! Streaming generation events.

use serde::{Deserialize, Serialize};

/// Events emitted by a [`Generator`](crate::generator::Generator) stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[non_exhaustive]
pub enum GenerateEvent {
    /// Text chunk generated.
    #[serde(rename = "text")]
    Text(String),

    /// Generation complete.
    #[serde(rename = "done")]
    Done,
}
