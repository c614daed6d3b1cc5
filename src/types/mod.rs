//! Public types for the mimir API.

mod generate;
mod payload;
mod resolve;

pub use generate::GenerateEvent;
pub use payload::{AccessHistoryEntry, Category, RequesterId, ResolvedPayload};
pub use resolve::{ResolveEvent, ResolveRequest, Resolution, Source};
