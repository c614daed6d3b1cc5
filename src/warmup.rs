//! Startup cache warming.
//!
//! Loads the most visited payloads of each category from the durable store
//! into both cache tiers so the first requests after a restart hit memory.

use tracing::{info, warn};

use crate::cache::TieredCache;
use crate::store::DurableStore;
use crate::types::Category;
use crate::{Result, telemetry};

/// How many payloads to preload per category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupConfig {
    pub enabled: bool,
    /// Default: 100.
    pub code_limit: usize,
    /// Default: 50.
    pub article_limit: usize,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            code_limit: 100,
            article_limit: 50,
        }
    }
}

impl WarmupConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn limit_for(&self, category: Category) -> usize {
        match category {
            Category::Code => self.code_limit,
            Category::Article => self.article_limit,
        }
    }
}

/// Number of payloads loaded per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub code: usize,
    pub article: usize,
}

impl WarmupReport {
    pub fn total(&self) -> usize {
        self.code + self.article
    }
}

/// Preload the hottest payloads into `cache`.
///
/// A store failure for one category is logged and the other category is
/// still attempted; the first error is returned after both have run.
pub async fn warm_up(
    store: &dyn DurableStore,
    cache: &TieredCache,
    config: &WarmupConfig,
) -> Result<WarmupReport> {
    let mut report = WarmupReport::default();
    if !config.enabled {
        return Ok(report);
    }

    let mut first_err = None;
    for category in [Category::Code, Category::Article] {
        match store.hottest(category, config.limit_for(category)).await {
            Ok(payloads) => {
                for payload in &payloads {
                    cache.set(payload).await;
                }
                match category {
                    Category::Code => report.code = payloads.len(),
                    Category::Article => report.article = payloads.len(),
                }
            }
            Err(e) => {
                warn!(category = %category, error = %e, "cache warm-up failed");
                metrics::counter!(telemetry::TIER_ERRORS_TOTAL, "tier" => "durable", "op" => "hottest")
                    .increment(1);
                first_err.get_or_insert(e);
            }
        }
    }

    info!(code = report.code, article = report.article, "cache warm-up complete");
    match first_err {
        Some(e) => Err(e),
        None => Ok(report),
    }
}
