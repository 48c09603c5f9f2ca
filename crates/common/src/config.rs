use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

const BINANCE_MAINNET_URL: &str = "https://api.binance.com";
const BINANCE_TESTNET_URL: &str = "https://testnet.binance.vision";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Stop floor rule applied once the first target has been crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopPolicy {
    /// Entry price after target 1, then the target before the last crossed one.
    #[default]
    BreakevenThenPreviousTarget,
    /// Entry price at every level.
    Breakeven,
    /// Halfway between the previous anchor and the last crossed target.
    Midpoint,
}

impl FromStr for StopPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "breakeven_then_previous_target" | "previous_target" => Ok(Self::BreakevenThenPreviousTarget),
            "breakeven" => Ok(Self::Breakeven),
            "midpoint" => Ok(Self::Midpoint),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Json,
    Sqlite,
}

#[derive(Clone)]
pub struct ExchangeConfig {
    pub api_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub recv_window_ms: u64,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("api_key", &"***")
            .field("secret_key", &"***")
            .field("base_url", &self.base_url)
            .field("recv_window_ms", &self.recv_window_ms)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradingConfig {
    /// Share of the free quote balance committed per signal, in percent.
    pub allocation_percent: Decimal,
    /// Maximum distance between last price and signal entry, in percent.
    pub price_tolerance_percent: Decimal,
    /// Extra headroom used when bumping a quantity up to minNotional.
    pub min_notional_margin: Decimal,
    /// Holdings below minNotional times this factor count as dust.
    pub dust_safety_factor: Decimal,
    /// Distance between stop trigger and stop limit, in percent.
    pub stop_limit_slippage_percent: Decimal,
    pub allow_short: bool,
    pub stop_policy: StopPolicy,
    pub max_failed_cycles: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            allocation_percent: Decimal::from(20),
            price_tolerance_percent: Decimal::from(15),
            min_notional_margin: Decimal::new(5, 2),
            dust_safety_factor: Decimal::new(11, 1),
            stop_limit_slippage_percent: Decimal::new(5, 1),
            allow_short: false,
            stop_policy: StopPolicy::default(),
            max_failed_cycles: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
    pub inbox_dir: PathBuf,
    pub max_history_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub storage: StorageConfig,
    pub retry: RetrySettings,
    pub poll_interval: Duration,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("BINANCE_API_KEY").ok_or(ConfigError::Missing("BINANCE_API_KEY"))?;
        let secret_key =
            lookup("BINANCE_SECRET_KEY").ok_or(ConfigError::Missing("BINANCE_SECRET_KEY"))?;

        let testnet = parse_or(&lookup, "BINANCE_TESTNET", false)?;
        let default_url = if testnet { BINANCE_TESTNET_URL } else { BINANCE_MAINNET_URL };
        let base_url = lookup("BINANCE_BASE_URL").unwrap_or_else(|| default_url.to_string());

        let data_folder = PathBuf::from(lookup("WORKDIR").unwrap_or_else(|| ".".to_string()));
        let backend = match lookup("SIGNAL_STORE").as_deref() {
            None | Some("json") => StoreBackend::Json,
            Some("sqlite") => StoreBackend::Sqlite,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "SIGNAL_STORE",
                    value: other.to_string(),
                });
            }
        };
        let path = match backend {
            StoreBackend::Json => data_folder.join("signal_history.json"),
            StoreBackend::Sqlite => data_folder.join("signal_history.db"),
        };
        let inbox_dir = lookup("SIGNAL_INBOX_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_folder.join("inbox"));

        let defaults = TradingConfig::default();
        let stop_policy = match lookup("STOP_POLICY") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "STOP_POLICY",
                value: raw,
            })?,
            None => defaults.stop_policy,
        };

        let trading = TradingConfig {
            allocation_percent: parse_or(&lookup, "ALLOCATION_PERCENT", defaults.allocation_percent)?,
            price_tolerance_percent: parse_or(
                &lookup,
                "PRICE_TOLERANCE_PERCENT",
                defaults.price_tolerance_percent,
            )?,
            min_notional_margin: parse_or(&lookup, "MIN_NOTIONAL_MARGIN", defaults.min_notional_margin)?,
            dust_safety_factor: parse_or(&lookup, "DUST_SAFETY_FACTOR", defaults.dust_safety_factor)?,
            stop_limit_slippage_percent: parse_or(
                &lookup,
                "STOP_LIMIT_SLIPPAGE_PERCENT",
                defaults.stop_limit_slippage_percent,
            )?,
            allow_short: parse_or(&lookup, "ALLOW_SHORT", defaults.allow_short)?,
            stop_policy,
            max_failed_cycles: parse_or(&lookup, "MAX_FAILED_CYCLES", defaults.max_failed_cycles)?,
        };

        if trading.allocation_percent <= Decimal::ZERO || trading.allocation_percent > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Invalid {
                key: "ALLOCATION_PERCENT",
                value: trading.allocation_percent.to_string(),
            });
        }

        let max_attempts: u32 = parse_or(&lookup, "RETRY_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "RETRY_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            exchange: ExchangeConfig {
                api_key,
                secret_key,
                base_url,
                recv_window_ms: parse_or(&lookup, "BINANCE_RECV_WINDOW_MS", 5000)?,
                request_timeout: Duration::from_secs(parse_or(&lookup, "HTTP_TIMEOUT_SECS", 10)?),
            },
            trading,
            storage: StorageConfig {
                backend,
                path,
                inbox_dir,
                max_history_size: parse_or(&lookup, "MAX_HISTORY_SIZE", 50)?,
            },
            retry: RetrySettings {
                max_attempts,
                base_delay: Duration::from_millis(parse_or(&lookup, "RETRY_BASE_DELAY_MS", 1000)?),
            },
            poll_interval: Duration::from_secs(parse_or(&lookup, "POLL_INTERVAL_SECS", 30)?),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
