//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.mimir/config.toml` (user)
//! 3. `/etc/mimir/config.toml` (system)
//!
//! The generator API key is loaded separately with a mandatory permission check:
//! 1. `~/.mimir/secrets.toml` (user, must be 0600)
//! 2. `/etc/mimir/secrets.toml` (system, must be 0600)
//! 3. `MIMIR_API_KEY` environment variable
//!
//! Every section is optional; omitted fields take the same defaults as the
//! programmatic `*Config` builders they convert into.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::cache::CacheConfig;
use crate::filter::{FilterConfig, MAX_FP_RATE};
#[cfg(feature = "llm")]
use crate::generator::GeneratorConfig;
use crate::generator::{DEFAULT_GENERATION_TIMEOUT_SECS, RetryConfig};
use crate::lock::LockConfig;
use crate::warmup::WarmupConfig;
use crate::{MimirError, Result};

/// Environment variable consulted when no secrets file provides a key.
pub const API_KEY_ENV: &str = "MIMIR_API_KEY";

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheSection,
    pub filter: FilterSection,
    pub lock: LockSection,
    pub redis: RedisSection,
    pub database: DatabaseSection,
    pub generator: GeneratorSection,
    pub warmup: WarmupSection,
}

/// `[cache]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub fast_max_entries: u64,
    pub fast_ttl_secs: u64,
    pub code_ttl_secs: u64,
    pub article_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            fast_max_entries: defaults.fast_max_entries,
            fast_ttl_secs: defaults.fast_ttl.as_secs(),
            code_ttl_secs: defaults.code_ttl.as_secs(),
            article_ttl_secs: defaults.article_ttl.as_secs(),
        }
    }
}

/// `[filter]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterSection {
    pub expected_items: u64,
    pub fp_rate: f64,
    pub rebuild_interval_secs: u64,
    pub rebuild_threshold: f64,
    pub check_interval_secs: u64,
    pub growth_factor: f64,
}

impl Default for FilterSection {
    fn default() -> Self {
        let defaults = FilterConfig::default();
        Self {
            expected_items: defaults.expected_items,
            fp_rate: defaults.fp_rate,
            rebuild_interval_secs: defaults.rebuild_interval.as_secs(),
            rebuild_threshold: defaults.rebuild_threshold,
            check_interval_secs: defaults.check_interval.as_secs(),
            growth_factor: defaults.growth_factor,
        }
    }
}

/// `[lock]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockSection {
    pub lease_ttl_secs: u64,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for LockSection {
    fn default() -> Self {
        let defaults = LockConfig::default();
        Self {
            lease_ttl_secs: defaults.lease_ttl.as_secs(),
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            max_attempts: defaults.max_attempts,
        }
    }
}

/// `[redis]`. Without a URL the shared tier and lease lock stay in-process.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedisSection {
    pub url: Option<String>,
}

/// `[database]`. Without a URL the durable store stays in-process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// `[generator]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    pub backend: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: Option<u32>,
    pub code_temperature: f32,
    pub article_temperature: f32,
    /// Attempts per generation including the first. 1 disables retry.
    pub retry_attempts: u32,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            backend: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
            max_tokens: None,
            code_temperature: 0.8,
            article_temperature: 0.8,
            retry_attempts: RetryConfig::default().max_attempts,
        }
    }
}

/// `[warmup]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarmupSection {
    pub enabled: bool,
    pub code_limit: usize,
    pub article_limit: usize,
}

impl Default for WarmupSection {
    fn default() -> Self {
        let defaults = WarmupConfig::default();
        Self {
            enabled: defaults.enabled,
            code_limit: defaults.code_limit,
            article_limit: defaults.article_limit,
        }
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.mimir/config.toml`
    /// 3. `/etc/mimir/config.toml`
    ///
    /// With no explicit path and no file found, defaults are used.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_config_path(explicit_path)? else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(&path).map_err(|e| {
            MimirError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content)
            .map_err(|e| MimirError::Configuration(format!("{path:?}: {e}")))
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            MimirError::Configuration(format!("Failed to parse config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(MimirError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".mimir").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/mimir/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Reject values that would make the pipeline misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        let f = &self.filter;
        if !(f.fp_rate > 0.0 && f.fp_rate <= MAX_FP_RATE) {
            return Err(invalid("filter.fp_rate must be in (0, 0.5]"));
        }
        if !(f.rebuild_threshold > 0.0 && f.rebuild_threshold <= 1.0) {
            return Err(invalid("filter.rebuild_threshold must be in (0, 1]"));
        }
        if f.growth_factor < 1.0 {
            return Err(invalid("filter.growth_factor must be at least 1.0"));
        }
        if f.check_interval_secs == 0 {
            return Err(invalid("filter.check_interval_secs must be positive"));
        }
        if self.lock.lease_ttl_secs == 0 || self.lock.poll_interval_ms == 0 {
            return Err(invalid("lock.lease_ttl_secs and lock.poll_interval_ms must be positive"));
        }
        if self.lock.max_attempts == 0 {
            return Err(invalid("lock.max_attempts must be at least 1"));
        }
        if self.lock.lease_ttl_secs <= self.generator.timeout_secs {
            return Err(MimirError::Configuration(format!(
                "lock.lease_ttl_secs ({}) must exceed generator.timeout_secs ({}), \
                 or an expired lease lets a second generation start",
                self.lock.lease_ttl_secs, self.generator.timeout_secs
            )));
        }
        let lock = self.lock_config();
        if lock.wait_budget() < lock.lease_ttl {
            warn!(
                wait_budget_ms = lock.wait_budget().as_millis() as u64,
                lease_ttl_secs = self.lock.lease_ttl_secs,
                "waiters give up before a lease expires; slow generations time out"
            );
        }
        if self.cache.fast_ttl_secs == 0 {
            return Err(invalid("cache.fast_ttl_secs must be positive"));
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .fast_max_entries(self.cache.fast_max_entries)
            .fast_ttl(Duration::from_secs(self.cache.fast_ttl_secs))
            .code_ttl(Duration::from_secs(self.cache.code_ttl_secs))
            .article_ttl(Duration::from_secs(self.cache.article_ttl_secs))
    }

    pub fn filter_config(&self) -> FilterConfig {
        let f = &self.filter;
        FilterConfig::new()
            .expected_items(f.expected_items)
            .fp_rate(f.fp_rate)
            .rebuild_interval(Duration::from_secs(f.rebuild_interval_secs))
            .rebuild_threshold(f.rebuild_threshold)
            .check_interval(Duration::from_secs(f.check_interval_secs))
            .growth_factor(f.growth_factor)
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig::new()
            .lease_ttl(Duration::from_secs(self.lock.lease_ttl_secs))
            .poll_interval(Duration::from_millis(self.lock.poll_interval_ms))
            .max_attempts(self.lock.max_attempts)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new().max_attempts(self.generator.retry_attempts.max(1))
    }

    pub fn warmup_config(&self) -> WarmupConfig {
        WarmupConfig {
            enabled: self.warmup.enabled,
            code_limit: self.warmup.code_limit,
            article_limit: self.warmup.article_limit,
        }
    }

    #[cfg(feature = "llm")]
    pub fn generator_config(&self, api_key: Option<String>) -> GeneratorConfig {
        let g = &self.generator;
        let mut config = GeneratorConfig::new(&g.backend, &g.model).timeout_secs(g.timeout_secs);
        config.max_tokens = g.max_tokens;
        config.code_temperature = g.code_temperature;
        config.article_temperature = g.article_temperature;
        if let Some(ref url) = g.base_url {
            config = config.base_url(url);
        }
        if let Some(key) = api_key {
            config = config.api_key(key);
        }
        config
    }
}

fn invalid(message: &str) -> MimirError {
    MimirError::Configuration(message.to_string())
}

/// Secrets file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub generator: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (the key may come from the
    /// environment, or the backend may not need one).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".mimir").join("secrets.toml");
            if user_secrets.exists() {
                Self::check_permissions(&user_secrets)?;
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/mimir/secrets.toml");
        if system_secrets.exists() {
            Self::check_permissions(&system_secrets)?;
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MimirError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MimirError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            MimirError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(MimirError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Generator API key, falling back to `MIMIR_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.generator
            .as_ref()
            .map(|s| s.api_key.clone())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
    }
}
