use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::acquisition::broker::DiscoveryType;
use crate::error::{Result, ReelError};
use crate::models::BackoffPolicy;
use crate::proxy::user_agent::UaCategory;

const DEFAULT_FEED_URL: &str = "http://api.proxyscrape.com/v2/?request=getproxies&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all";
const DEFAULT_JUDGE_URL: &str = "http://httpbin.org/ip";
const DEFAULT_DNSBL: &str = "bl.spamcop.net,cbl.abuseat.org,dnsbl.sorbs.net";
const DEFAULT_TYPES: &str = "HTTP:Anonymous,High;HTTPS:Anonymous,High";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Pool health and rotation behaviour
    pub pool: PoolConfig,
    /// Where new proxies come from
    pub acquisition: AcquisitionConfig,
    /// Broker / external discovery parameters
    pub discovery: DiscoveryConfig,
    /// User-agent assignment
    pub user_agent: UserAgentConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Base backoff after the first failure, in seconds
    pub backoff_base_secs: u64,
    /// Upper bound for a single backoff window, in seconds
    pub backoff_cap_secs: u64,
    /// Consecutive failures tolerated before a proxy is marked dead
    pub max_failures_before_dead: u32,
    /// Stop the crawl when no proxy can be found (otherwise go direct)
    pub stop_if_no_proxies: bool,
    /// Seconds between pool statistics log lines (0 disables)
    pub logstats_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Proxy list file, one entry per line
    pub proxy_list_path: Option<PathBuf>,
    /// Literal list used when no file is available
    pub inline_proxies: Vec<String>,
    /// Pass file entries through the broker check before use
    pub verify_file_proxies: bool,
    /// Minutes between periodic refreshes (0 disables)
    pub collection_interval_minutes: u64,
    pub external: ExternalProcessConfig,
}

#[derive(Debug, Clone)]
pub struct ExternalProcessConfig {
    /// Discovery helper program; the source is disabled when unset
    pub path: Option<PathBuf>,
    /// Optional interpreter the helper is run with (e.g. `python3`)
    pub interpreter: Option<String>,
    /// File the helper writes its results to
    pub output_path: PathBuf,
    pub timeout_secs: u64,
    /// Total attempts, including the first one
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub initial_count: usize,
    pub periodic_count: usize,
    pub countries: Vec<String>,
    pub types: Vec<DiscoveryType>,
    pub dnsbl_hosts: Vec<String>,
    pub broker_enabled: bool,
    pub feed_urls: Vec<String>,
    pub judge_url: String,
    pub check_timeout_secs: u64,
    pub check_concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct UserAgentConfig {
    pub use_random: bool,
    pub sticky_per_proxy: bool,
    pub category: UaCategory,
    pub fallback: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let category_raw = get_env_or("RANDOM_UA_TYPE", "any");
        let category = UaCategory::from_str(&category_raw).ok_or_else(|| {
            ReelError::InvalidConfig(format!("RANDOM_UA_TYPE has unknown category: {}", category_raw))
        })?;

        let config = Config {
            pool: PoolConfig {
                backoff_base_secs: parse_env("ROTATING_PROXY_BACKOFF_BASE", "30")?,
                backoff_cap_secs: parse_env("ROTATING_PROXY_BACKOFF_CAP", "3600")?,
                max_failures_before_dead: parse_env("ROTATING_PROXY_PAGE_RETRY_TIMES", "20")?,
                stop_if_no_proxies: parse_env("ROTATING_PROXY_CLOSE_SPIDER", "false")?,
                logstats_interval_secs: parse_env("ROTATING_PROXY_LOGSTATS_INTERVAL", "30")?,
            },
            acquisition: AcquisitionConfig {
                proxy_list_path: get_env_opt("PROXY_LIST_PATH").map(PathBuf::from),
                inline_proxies: split_list(&get_env_or("ROTATING_PROXY_LIST", ""), ','),
                verify_file_proxies: parse_env("PROXY_LIST_VERIFY", "false")?,
                collection_interval_minutes: parse_env("PROXY_COLLECTION_INTERVAL", "0")?,
                external: ExternalProcessConfig {
                    path: get_env_opt("PROXY_SCRIPT_PATH").map(PathBuf::from),
                    interpreter: get_env_opt("PROXY_SCRIPT_INTERPRETER"),
                    output_path: PathBuf::from(get_env_or("PROXY_FILE_PATH", "proxies.txt")),
                    timeout_secs: parse_env("PROXY_SCRIPT_TIMEOUT", "1800")?,
                    max_attempts: parse_env("PROXY_SCRIPT_MAX_ATTEMPTS", "2")?,
                },
            },
            discovery: DiscoveryConfig {
                initial_count: parse_env("PROXY_INITIAL_COUNT", "200")?,
                periodic_count: parse_env("PROXY_PERIODIC_COUNT", "30")?,
                countries: split_list(&get_env_or("PROXY_COUNTRIES", ""), ',')
                    .into_iter()
                    .map(|c| c.to_uppercase())
                    .collect(),
                types: split_list(&get_env_or("PROXY_TYPES", DEFAULT_TYPES), ';')
                    .iter()
                    .map(|t| DiscoveryType::parse(t))
                    .collect::<Result<Vec<_>>>()?,
                dnsbl_hosts: split_list(&get_env_or("PROXY_DNSBL", DEFAULT_DNSBL), ','),
                broker_enabled: parse_env("PROXY_BROKER_ENABLED", "true")?,
                feed_urls: split_list(&get_env_or("PROXY_FEED_URLS", DEFAULT_FEED_URL), ' '),
                judge_url: get_env_or("PROXY_JUDGE_URL", DEFAULT_JUDGE_URL),
                check_timeout_secs: parse_env("PROXY_CHECK_TIMEOUT", "10")?,
                check_concurrency: parse_env("PROXY_CHECK_CONCURRENCY", "32")?,
            },
            user_agent: UserAgentConfig {
                use_random: parse_env("USE_RANDOM_UA", "true")?,
                sticky_per_proxy: parse_env("RANDOM_UA_PER_PROXY", "false")?,
                category,
                fallback: get_env_opt("FAKEUSERAGENT_FALLBACK"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pool.backoff_base_secs == 0 {
            return Err(ReelError::InvalidConfig(
                "ROTATING_PROXY_BACKOFF_BASE must be positive".into(),
            ));
        }
        if self.pool.backoff_cap_secs < self.pool.backoff_base_secs {
            return Err(ReelError::InvalidConfig(
                "ROTATING_PROXY_BACKOFF_CAP must not be smaller than the backoff base".into(),
            ));
        }
        if self.acquisition.external.max_attempts == 0 {
            return Err(ReelError::InvalidConfig(
                "PROXY_SCRIPT_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }
        if self.discovery.check_concurrency == 0 {
            return Err(ReelError::InvalidConfig(
                "PROXY_CHECK_CONCURRENCY must be at least 1".into(),
            ));
        }
        for feed in &self.discovery.feed_urls {
            url::Url::parse(feed).map_err(|e| {
                ReelError::InvalidConfig(format!("PROXY_FEED_URLS entry {} is invalid: {}", feed, e))
            })?;
        }
        url::Url::parse(&self.discovery.judge_url).map_err(|e| {
            ReelError::InvalidConfig(format!("PROXY_JUDGE_URL must be a valid URL: {}", e))
        })?;
        Ok(())
    }

    /// Backoff policy derived from the pool settings
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(self.pool.backoff_base_secs),
            cap: Duration::from_secs(self.pool.backoff_cap_secs),
            max_failures: self.pool.max_failures_before_dead,
        }
    }

    /// Periodic refresh interval, `None` when disabled
    pub fn collection_interval(&self) -> Option<Duration> {
        match self.acquisition.collection_interval_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(minutes * 60)),
        }
    }
}

/// Defaults with every network source disabled
impl Default for Config {
    fn default() -> Self {
        Config {
            pool: PoolConfig {
                backoff_base_secs: 30,
                backoff_cap_secs: 3600,
                max_failures_before_dead: 20,
                stop_if_no_proxies: false,
                logstats_interval_secs: 30,
            },
            acquisition: AcquisitionConfig {
                proxy_list_path: None,
                inline_proxies: Vec::new(),
                verify_file_proxies: false,
                collection_interval_minutes: 0,
                external: ExternalProcessConfig {
                    path: None,
                    interpreter: None,
                    output_path: PathBuf::from("proxies.txt"),
                    timeout_secs: 1800,
                    max_attempts: 2,
                },
            },
            discovery: DiscoveryConfig {
                initial_count: 200,
                periodic_count: 30,
                countries: Vec::new(),
                types: Vec::new(),
                dnsbl_hosts: Vec::new(),
                broker_enabled: false,
                feed_urls: Vec::new(),
                judge_url: DEFAULT_JUDGE_URL.to_string(),
                check_timeout_secs: 10,
                check_concurrency: 32,
            },
            user_agent: UserAgentConfig {
                use_random: true,
                sticky_per_proxy: false,
                category: UaCategory::Any,
                fallback: None,
            },
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a non-empty environment variable
fn get_env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    let raw = get_env_or(key, default);
    raw.trim()
        .parse()
        .map_err(|_| ReelError::InvalidConfig(format!("{} has an invalid value: {}", key, raw)))
}

fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
