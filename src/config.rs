//! # config
//!
//! Read every tunable from environment variables.
//!
//! `.env` is loaded by `main` through `dotenvy` before [`Config::from_env`] runs.
//! Defaults follow the production deployment: 20 % moves over a 2 h window,
//! 200 symbols per combined stream, 2 h 10 m trade horizon.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{bail, Context};

// ─── Sections ─────────────────────────────────────────────────────────────────

/// Detection + window parameters.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Absolute percent change that fires an alert.
    pub threshold_pct: f64,
    /// Trailing span kept per symbol.
    pub window: Duration,
}

/// Connection management for one GroupConsumer.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url:              String,
    /// Transport limit on streams per multiplexed connection.
    pub max_group_size:      usize,
    /// Silence longer than this is treated as a stall.
    pub stall_timeout:       Duration,
    /// Backoff = base × attempt, capped at `reconnect_cap`.
    pub reconnect_base:      Duration,
    pub reconnect_cap:       Duration,
    /// Consecutive failed attempts before the consumer gives up.
    pub max_attempts:        u32,
    /// Overflow backoff = `reconnect_cap` × multiplier.
    pub overflow_multiplier: u32,
}

impl StreamConfig {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.reconnect_base
            .saturating_mul(attempt.max(1))
            .min(self.reconnect_cap)
    }

    pub fn overflow_backoff(&self) -> Duration {
        self.reconnect_cap.saturating_mul(self.overflow_multiplier.max(1))
    }
}

/// AlertDispatcher queue + dedupe.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    pub dedupe_bucket:  Duration,
    /// Number of most recent buckets retained in the dedupe index.
    pub retain_buckets: u64,
}

/// TradeMonitor parameters.
#[derive(Debug, Clone)]
pub struct TradeConfig {
    pub horizon:           Duration,
    pub max_active_trades: usize,
}

/// Universe discovery filter.
#[derive(Debug, Clone)]
pub struct UniverseConfig {
    pub rest_url:         String,
    /// When set, discovery is skipped and these symbols are monitored.
    pub static_symbols:   Option<BTreeSet<String>>,
    pub quote_asset:      String,
    pub min_listing_days: i64,
    pub min_quote_volume: f64,
    pub max_quote_volume: f64,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id:   String,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url:         String,
    pub service_key: String,
    pub table:       String,
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Everything the process needs, validated once at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr:   String,
    pub detection:   DetectionConfig,
    pub stream:      StreamConfig,
    pub dispatch:    DispatchConfig,
    pub trade:       TradeConfig,
    pub universe:    UniverseConfig,
    /// Length of one monitoring cycle; partitions are rebuilt at each boundary.
    pub cycle:       Duration,
    /// Delay before retrying after a cycle failed to start.
    pub cycle_retry: Duration,
    pub heartbeat:   Duration,
    pub telegram:    Option<TelegramConfig>,
    pub supabase:    Option<SupabaseConfig>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:8000"),
            detection: DetectionConfig {
                threshold_pct: env_parse("ALERT_THRESHOLD_PCT", 20.0)?,
                window:        env_secs("WINDOW_SECS", 7_200)?,
            },
            stream: StreamConfig {
                ws_url:              env_string("BINANCE_WS_URL", "wss://fstream.binance.com"),
                max_group_size:      env_parse("MAX_GROUP_SIZE", 200)?,
                stall_timeout:       env_secs("STALL_TIMEOUT_SECS", 60)?,
                reconnect_base:      env_secs("RECONNECT_BASE_SECS", 5)?,
                reconnect_cap:       env_secs("RECONNECT_CAP_SECS", 30)?,
                max_attempts:        env_parse("RECONNECT_MAX_ATTEMPTS", 5)?,
                overflow_multiplier: env_parse("OVERFLOW_BACKOFF_MULTIPLIER", 4)?,
            },
            dispatch: DispatchConfig {
                queue_capacity: env_parse("ALERT_QUEUE_CAPACITY", 256)?,
                dedupe_bucket:  env_secs("DEDUPE_BUCKET_SECS", 3_600)?,
                retain_buckets: env_parse("DEDUPE_RETAIN_BUCKETS", 3)?,
            },
            trade: TradeConfig {
                horizon:           env_secs("TRADE_HORIZON_SECS", 7_800)?,
                max_active_trades: env_parse("MAX_ACTIVE_TRADES", 50)?,
            },
            universe: UniverseConfig {
                rest_url:         env_string("BINANCE_REST_URL", "https://fapi.binance.com"),
                static_symbols:   std::env::var("SYMBOLS").ok().map(|raw| parse_symbol_list(&raw)),
                quote_asset:      env_string("QUOTE_ASSET", "USDT"),
                min_listing_days: env_parse("MIN_LISTING_DAYS", 90)?,
                min_quote_volume: env_parse("MIN_QUOTE_VOLUME", 10_000_000.0)?,
                max_quote_volume: env_parse("MAX_QUOTE_VOLUME", 1_000_000_000.0)?,
            },
            cycle:       env_secs("CYCLE_SECS", 86_400)?,
            cycle_retry: env_secs("CYCLE_RETRY_SECS", 60)?,
            heartbeat:   env_secs("HEARTBEAT_SECS", 600)?,
            telegram: match (std::env::var("TELEGRAM_BOT_TOKEN"), std::env::var("TELEGRAM_CHAT_ID")) {
                (Ok(bot_token), Ok(chat_id)) if !bot_token.is_empty() && !chat_id.is_empty() => {
                    Some(TelegramConfig { bot_token, chat_id })
                }
                _ => None,
            },
            supabase: match (std::env::var("SUPABASE_URL"), std::env::var("SUPABASE_SERVICE_KEY")) {
                (Ok(url), Ok(service_key)) if !url.is_empty() => Some(SupabaseConfig {
                    url,
                    service_key,
                    table: env_string("SUPABASE_TABLE", "signals-data"),
                }),
                _ => None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break engine invariants.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.detection.threshold_pct.is_finite() && self.detection.threshold_pct > 0.0) {
            bail!("ALERT_THRESHOLD_PCT must be a positive number");
        }
        if self.detection.window.is_zero() {
            bail!("WINDOW_SECS must be greater than zero");
        }
        if self.stream.max_group_size == 0 {
            bail!("MAX_GROUP_SIZE must be at least 1");
        }
        if self.stream.stall_timeout.is_zero() {
            bail!("STALL_TIMEOUT_SECS must be greater than zero");
        }
        if self.dispatch.queue_capacity == 0 {
            bail!("ALERT_QUEUE_CAPACITY must be at least 1");
        }
        if self.dispatch.dedupe_bucket.is_zero() {
            bail!("DEDUPE_BUCKET_SECS must be greater than zero");
        }
        if self.cycle.is_zero() {
            bail!("CYCLE_SECS must be greater than zero");
        }
        if let Some(symbols) = &self.universe.static_symbols {
            if symbols.is_empty() {
                bail!("SYMBOLS is set but contains no symbols");
            }
        }
        Ok(())
    }
}

impl Default for Config {
    /// Production defaults without reading the environment (used by tests).
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            detection: DetectionConfig {
                threshold_pct: 20.0,
                window:        Duration::from_secs(7_200),
            },
            stream: StreamConfig {
                ws_url:              "wss://fstream.binance.com".to_string(),
                max_group_size:      200,
                stall_timeout:       Duration::from_secs(60),
                reconnect_base:      Duration::from_secs(5),
                reconnect_cap:       Duration::from_secs(30),
                max_attempts:        5,
                overflow_multiplier: 4,
            },
            dispatch: DispatchConfig {
                queue_capacity: 256,
                dedupe_bucket:  Duration::from_secs(3_600),
                retain_buckets: 3,
            },
            trade: TradeConfig {
                horizon:           Duration::from_secs(7_800),
                max_active_trades: 50,
            },
            universe: UniverseConfig {
                rest_url:         "https://fapi.binance.com".to_string(),
                static_symbols:   None,
                quote_asset:      "USDT".to_string(),
                min_listing_days: 90,
                min_quote_volume: 10_000_000.0,
                max_quote_volume: 1_000_000_000.0,
            },
            cycle:       Duration::from_secs(86_400),
            cycle_retry: Duration::from_secs(60),
            heartbeat:   Duration::from_secs(600),
            telegram:    None,
            supabase:    None,
        }
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: '{raw}'")),
        _ => Ok(default),
    }
}

fn env_secs(key: &str, default: u64) -> anyhow::Result<Duration> {
    env_parse(key, default).map(Duration::from_secs)
}

/// `"btcusdt, ETHUSDT,,"` → `{"BTCUSDT", "ETHUSDT"}`
pub fn parse_symbol_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
