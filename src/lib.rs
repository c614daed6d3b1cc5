//! Mimir - generate-once lookup pipeline for LLM answers
//!
//! Requests are reduced to a content key and answered from the cheapest
//! tier that holds it: an in-process cache, a shared cache (Redis), then a
//! durable store (Postgres). A bloom filter sized from the store lets
//! never-seen keys skip the probes, and a lease lock makes sure that
//! concurrent misses for the same key across every instance trigger a single
//! generation.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mimir::{Category, GeneratorConfig, LlmGenerator, ResolveRequest, Resolver};
//!
//! #[tokio::main]
//! async fn main() -> mimir::Result<()> {
//!     let generator = LlmGenerator::new(
//!         GeneratorConfig::new("openai", "gpt-4o-mini").api_key("sk-your-key"),
//!     )?;
//!     let resolver = Resolver::builder()
//!         .generator(Arc::new(generator))
//!         .build()
//!         .await?;
//!
//!     let resolution = resolver
//!         .resolve(ResolveRequest::new(42, Category::Code, "fn main() {}"))
//!         .await?;
//!
//!     println!("[{}] {}", resolution.source, resolution.text());
//!     resolver.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod generator;
pub mod key;
pub mod lock;
pub mod resolver;
pub mod store;
mod sync;
pub mod telemetry;
pub mod types;
pub mod version;
pub mod warmup;

// Re-export main types at crate root
pub use error::{MimirError, Result};
pub use key::ContentKey;
pub use resolver::{ResolveStream, Resolver, ResolverBuilder};
pub use version::{PKG_VERSION, version_string};

pub use cache::{CacheConfig, FastTier, MemorySharedTier, SharedTier, TieredCache};
pub use config::{Config, Secrets};
pub use filter::{CapacityFilter, FilterConfig, FilterStats, MaintenanceHandle};
pub use generator::{GenerateStream, Generator, PromptTemplate, RetryConfig, RetryingGenerator};
pub use lock::{Acquire, LeaseLock, LockConfig, LockLease, MemoryLeaseLock, Release};
pub use store::{DurableStore, MemoryStore};
pub use warmup::{WarmupConfig, WarmupReport, warm_up};

// Backend implementations behind features
#[cfg(feature = "redis")]
pub use cache::RedisSharedTier;
#[cfg(feature = "llm")]
pub use generator::{GeneratorConfig, LlmGenerator};
#[cfg(feature = "redis")]
pub use lock::RedisLeaseLock;
#[cfg(feature = "postgres")]
pub use store::PgStore;

// Re-export all types
pub use types::{
    AccessHistoryEntry, Category, GenerateEvent, RequesterId, ResolveEvent, ResolveRequest,
    Resolution, ResolvedPayload, Source,
};
