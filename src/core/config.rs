use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

/// How a source turns upstream data into quotes.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceStrategy {
    /// Reference mid-rate widened by a fixed fractional spread.
    Spread { spread: Decimal },
    /// Heuristic extraction from the source's own page.
    Scrape {
        #[serde(default)]
        render: bool,
        #[serde(default = "default_settle_ms")]
        settle_ms: u64,
        #[serde(default = "default_window")]
        window: usize,
        #[serde(default = "default_fetch_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_settle_ms() -> u64 {
    1500
}

fn default_window() -> usize {
    48
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub strategy: SourceStrategy,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    ExchangeRateApi,
    OpenErApi,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReferenceEndpoint {
    pub kind: ReferenceKind,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ReferenceConfig {
    pub primary: ReferenceEndpoint,
    pub secondary: Option<ReferenceEndpoint>,
    pub timeout_secs: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
    /// How long one reference snapshot is shared between spread sources.
    pub reuse_secs: u64,
    /// Last-resort USD price of one troy ounce, used only when the reference
    /// payload has no XAU rate. Not live data.
    pub gold_usd_fallback: Option<Decimal>,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        ReferenceConfig {
            primary: ReferenceEndpoint {
                kind: ReferenceKind::ExchangeRateApi,
                base_url: "https://api.exchangerate-api.com".to_string(),
            },
            secondary: Some(ReferenceEndpoint {
                kind: ReferenceKind::OpenErApi,
                base_url: "https://open.er-api.com".to_string(),
            }),
            timeout_secs: 4,
            retries: 1,
            retry_delay_ms: 500,
            reuse_secs: 5,
            gold_usd_fallback: None,
        }
    }
}

impl ReferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reuse(&self) -> Duration {
        Duration::from_secs(self.reuse_secs)
    }

    /// Longest a lookup can take when every attempt against every provider
    /// runs into its timeout.
    pub fn worst_case(&self) -> Duration {
        let providers = 1 + u32::from(self.secondary.is_some());
        let attempts = self.retries as u32 + 1;
        let per_provider = self.timeout() * attempts
            + Duration::from_millis(self.retry_delay_ms) * self.retries as u32;
        per_provider * providers
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:8001".to_string(),
            cors_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { ttl_secs: 30 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AggregationConfig {
    pub max_concurrency: usize,
    pub source_timeout_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            max_concurrency: 4,
            source_timeout_secs: 20,
        }
    }
}

impl AggregationConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

fn default_base_currency() -> String {
    "TRY".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    pub sources: Vec<SourceConfig>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "xrates", "xrates")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            bail!("At least one source must be configured");
        }
        if self.aggregation.max_concurrency == 0 {
            bail!("aggregation.max_concurrency must be greater than zero");
        }
        if self.base_currency.trim().len() != 3 {
            bail!("base_currency must be a three letter code");
        }
        let has_spread = self
            .sources
            .iter()
            .any(|s| matches!(s.strategy, SourceStrategy::Spread { .. }));
        if has_spread && self.reference.worst_case() >= self.aggregation.source_timeout() {
            bail!(
                "Reference lookups can take up to {:?}, which does not fit in \
                 aggregation.source_timeout_secs ({}s); lower reference.timeout_secs or retries",
                self.reference.worst_case(),
                self.aggregation.source_timeout_secs
            );
        }
        for source in &self.sources {
            if let SourceStrategy::Spread { spread } = &source.strategy {
                if *spread < Decimal::ZERO || *spread >= Decimal::ONE {
                    bail!(
                        "Spread for source '{}' must be in [0, 1), got {}",
                        source.name,
                        spread
                    );
                }
            }
        }
        Ok(())
    }

    pub fn base_currency(&self) -> String {
        self.base_currency.trim().to_uppercase()
    }
}
