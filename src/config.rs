use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const DEFAULT_FEED_URL: &str =
    "https://codeberg.org/webamon/newly_registered_domains/raw/branch/main/new_domains.txt";
pub const DEFAULT_SIMILARITY_URL_TEMPLATE: &str = "https://codeberg.org/webamon/newly_registered_domains/raw/branch/main/monitoring_output/f500_domains/similarity_{threshold}.txt";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub feed_url: String,
    pub similarity_url_template: String,
    pub feed_refresh_seconds: u64,
    pub health_refresh_seconds: u64,
    pub workers: usize,
    pub queue_factor: usize,
    pub probe_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
    pub cache_sweep_seconds: u64,
    pub similarity_ttl_seconds: u64,
    pub batch_timeout_seconds: u64,
    pub whois_timeout_seconds: u64,
    pub max_response_size: usize,
    pub max_referrals: usize,
    pub discovery_timeout_seconds: u64,
    pub concurrent_whois_queries: usize,
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    pub start_time: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigData {
    pub port: u16,
    pub feed_url: String,
    pub similarity_url_template: String,
    pub feed_refresh_seconds: u64,
    pub health_refresh_seconds: u64,
    pub workers: usize,
    pub queue_factor: usize,
    pub probe_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
    pub cache_sweep_seconds: u64,
    pub similarity_ttl_seconds: u64,
    pub batch_timeout_seconds: u64,
    pub whois_timeout_seconds: u64,
    pub max_response_size: usize,
    pub max_referrals: usize,
    pub discovery_timeout_seconds: u64,
    pub concurrent_whois_queries: usize,
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
}

impl From<ConfigData> for Config {
    fn from(data: ConfigData) -> Self {
        Config {
            port: data.port,
            feed_url: data.feed_url,
            similarity_url_template: data.similarity_url_template,
            feed_refresh_seconds: data.feed_refresh_seconds,
            health_refresh_seconds: data.health_refresh_seconds,
            workers: data.workers,
            queue_factor: data.queue_factor,
            probe_timeout_seconds: data.probe_timeout_seconds,
            cache_ttl_seconds: data.cache_ttl_seconds,
            cache_sweep_seconds: data.cache_sweep_seconds,
            similarity_ttl_seconds: data.similarity_ttl_seconds,
            batch_timeout_seconds: data.batch_timeout_seconds,
            whois_timeout_seconds: data.whois_timeout_seconds,
            max_response_size: data.max_response_size,
            max_referrals: data.max_referrals,
            discovery_timeout_seconds: data.discovery_timeout_seconds,
            concurrent_whois_queries: data.concurrent_whois_queries,
            rate_limit_per_second: data.rate_limit_per_second,
            rate_limit_burst: data.rate_limit_burst,
            start_time: Instant::now(),
        }
    }
}

impl Default for Config {
    /// Defaults derived from the host, without reading the environment.
    fn default() -> Self {
        let system_info = Self::detect_system_capabilities();
        ConfigData {
            port: 8080,
            feed_url: DEFAULT_FEED_URL.to_string(),
            similarity_url_template: DEFAULT_SIMILARITY_URL_TEMPLATE.to_string(),
            feed_refresh_seconds: system_info.refresh_interval,
            health_refresh_seconds: system_info.refresh_interval,
            workers: system_info.workers,
            queue_factor: 2,
            probe_timeout_seconds: system_info.probe_timeout,
            cache_ttl_seconds: system_info.cache_ttl,
            cache_sweep_seconds: 60,
            similarity_ttl_seconds: 3600,
            batch_timeout_seconds: system_info.refresh_interval,
            whois_timeout_seconds: system_info.whois_timeout,
            max_response_size: system_info.max_response_size,
            max_referrals: system_info.max_referrals,
            discovery_timeout_seconds: system_info.discovery_timeout,
            concurrent_whois_queries: system_info.concurrent_whois_queries,
            rate_limit_per_second: 1,
            rate_limit_burst: 10,
        }
        .into()
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // A missing .env file is normal outside development
        dotenvy::dotenv().ok();

        let system_info = Self::detect_system_capabilities();

        let mut settings = config::Config::builder()
            .set_default("port", Self::get_default_port())?
            .set_default("feed_url", DEFAULT_FEED_URL)?
            .set_default("similarity_url_template", DEFAULT_SIMILARITY_URL_TEMPLATE)?
            .set_default("feed_refresh_seconds", system_info.refresh_interval)?
            .set_default("health_refresh_seconds", system_info.refresh_interval)?
            .set_default("workers", system_info.workers as i64)?
            .set_default("queue_factor", 2)?
            .set_default("probe_timeout_seconds", system_info.probe_timeout)?
            .set_default("cache_ttl_seconds", system_info.cache_ttl)?
            .set_default("cache_sweep_seconds", 60)?
            .set_default("similarity_ttl_seconds", 3600)?
            .set_default("batch_timeout_seconds", system_info.refresh_interval)?
            .set_default("whois_timeout_seconds", system_info.whois_timeout)?
            .set_default("max_response_size", system_info.max_response_size as i64)?
            .set_default("max_referrals", system_info.max_referrals as i64)?
            .set_default("discovery_timeout_seconds", system_info.discovery_timeout)?
            .set_default("concurrent_whois_queries", system_info.concurrent_whois_queries as i64)?
            .set_default("rate_limit_per_second", 1)?
            .set_default("rate_limit_burst", 10)?;

        settings = Self::apply_env_overrides(settings)?;

        let config_data: ConfigData = settings.build()?.try_deserialize()?;
        let config: Config = config_data.into();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.workers == 0 {
            return Err(config::ConfigError::Message("workers must be at least 1".to_string()));
        }
        if self.queue_factor == 0 {
            return Err(config::ConfigError::Message("queue_factor must be at least 1".to_string()));
        }
        if self.feed_refresh_seconds == 0 || self.health_refresh_seconds == 0 {
            return Err(config::ConfigError::Message("refresh intervals must be non-zero".to_string()));
        }
        if self.cache_sweep_seconds == 0 {
            return Err(config::ConfigError::Message("cache_sweep_seconds must be non-zero".to_string()));
        }
        if !self.similarity_url_template.contains("{threshold}") {
            return Err(config::ConfigError::Message(
                "similarity_url_template must contain {threshold}".to_string(),
            ));
        }
        Ok(())
    }

    pub fn feed_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.feed_refresh_seconds)
    }

    pub fn health_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.health_refresh_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_seconds)
    }

    pub fn similarity_ttl(&self) -> Duration {
        Duration::from_secs(self.similarity_ttl_seconds)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_seconds)
    }

    pub fn queue_capacity(&self) -> usize {
        self.workers * self.queue_factor
    }

    fn detect_system_capabilities() -> SystemCapabilities {
        let cpu_cores = Self::get_cpu_cores();
        let is_production = Self::is_production_environment();

        SystemCapabilities {
            refresh_interval: 15 * 60,
            workers: cpu_cores * 2,
            probe_timeout: 5,
            cache_ttl: 15 * 60,
            whois_timeout: if is_production { 30 } else { 15 },
            max_response_size: 1024 * 1024,
            max_referrals: if is_production { 10 } else { 5 },
            discovery_timeout: if is_production { 20 } else { 10 },
            concurrent_whois_queries: cpu_cores.min(8), // Cap at 8 for network sanity
        }
    }

    fn get_cpu_cores() -> usize {
        std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4)
    }

    fn is_production_environment() -> bool {
        std::env::var("ENVIRONMENT")
            .or_else(|_| std::env::var("ENV"))
            .map(|env| env.to_lowercase() == "production" || env.to_lowercase() == "prod")
            .unwrap_or(false)
    }

    fn get_default_port() -> u16 {
        std::env::var("PORT")
            .or_else(|_| std::env::var("HTTP_PORT"))
            .or_else(|_| std::env::var("SERVER_PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080)
    }

    fn apply_env_overrides(
        mut settings: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let env_mappings = [
            ("PORT", "port"),
            ("FEED_URL", "feed_url"),
            ("SIMILARITY_URL_TEMPLATE", "similarity_url_template"),
            ("FEED_REFRESH_SECONDS", "feed_refresh_seconds"),
            ("HEALTH_REFRESH_SECONDS", "health_refresh_seconds"),
            ("WORKERS", "workers"),
            ("QUEUE_FACTOR", "queue_factor"),
            ("PROBE_TIMEOUT_SECONDS", "probe_timeout_seconds"),
            ("CACHE_TTL_SECONDS", "cache_ttl_seconds"),
            ("CACHE_TTL", "cache_ttl_seconds"),
            ("CACHE_SWEEP_SECONDS", "cache_sweep_seconds"),
            ("SIMILARITY_TTL_SECONDS", "similarity_ttl_seconds"),
            ("BATCH_TIMEOUT_SECONDS", "batch_timeout_seconds"),
            ("WHOIS_TIMEOUT_SECONDS", "whois_timeout_seconds"),
            ("WHOIS_TIMEOUT", "whois_timeout_seconds"),
            ("MAX_RESPONSE_SIZE", "max_response_size"),
            ("MAX_REFERRALS", "max_referrals"),
            ("DISCOVERY_TIMEOUT_SECONDS", "discovery_timeout_seconds"),
            ("CONCURRENT_WHOIS_QUERIES", "concurrent_whois_queries"),
            ("RATE_LIMIT_PER_SECOND", "rate_limit_per_second"),
            ("RATE_LIMIT_BURST", "rate_limit_burst"),
        ];

        for (env_var, config_key) in env_mappings {
            if let Ok(value) = std::env::var(env_var) {
                settings = settings.set_override(config_key, value)?;
            }
        }

        Ok(settings)
    }
}

struct SystemCapabilities {
    refresh_interval: u64,
    workers: usize,
    probe_timeout: u64,
    cache_ttl: u64,
    whois_timeout: u64,
    max_response_size: usize,
    max_referrals: usize,
    discovery_timeout: u64,
    concurrent_whois_queries: usize,
}
