use std::{env, sync::OnceLock};

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mongodb_uri: String,
    pub mongodb_db: String,
    pub store_backend: StoreBackend,
    pub host: String,
    pub port: u16,

    // read once here, handed to the principal verifier through AppState
    pub jwt_secret: String,
    pub jwt_cookie_name: String,

    pub feed_url: String,
    // (exchange symbol, instrument), e.g. ("BTCUSDT", "BTC")
    pub feed_symbols: Vec<(String, String)>,
    pub feed_backoff: BackoffConfig,

    pub notify_webhook_url: Option<String>,
    pub mirror_cas_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_db: "price_trigger".to_string(),
            store_backend: StoreBackend::Mongo,
            host: "127.0.0.1".to_string(),
            port: 8080,
            jwt_secret: "change-me-dev-secret".to_string(),
            jwt_cookie_name: "auth".to_string(),
            feed_url: "wss://stream.binance.com:9443".to_string(),
            feed_symbols: vec![("BTCUSDT".to_string(), "BTC".to_string())],
            feed_backoff: BackoffConfig::default(),
            notify_webhook_url: None,
            mirror_cas_attempts: 32,
        }
    }
}

fn symbol_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9]{1,20}$").expect("static symbol pattern"))
}

/// Normalizes an instrument or exchange symbol, rejecting anything outside `[A-Z0-9]{1,20}`.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let sym = raw.trim().to_uppercase();
    symbol_re().is_match(&sym).then_some(sym)
}

/// Parses `BTCUSDT=BTC,ETHUSDT=ETH`. A bare `BTC` maps the symbol to itself.
pub fn parse_feed_symbols(raw: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();

    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (exchange, instrument) = part.split_once('=').unwrap_or((part, part));

        match (normalize_symbol(exchange), normalize_symbol(instrument)) {
            (Some(e), Some(i)) => out.push((e, i)),
            _ => tracing::warn!(entry = part, "ignoring malformed FEED_SYMBOLS entry"),
        }
    }

    out.sort();
    out.dedup();
    out
}

/// A feed with no symbols would subscribe to nothing, so an unset or unusable
/// `FEED_SYMBOLS` keeps `defaults`.
pub fn feed_symbols_or(raw: Option<String>, defaults: Vec<(String, String)>) -> Vec<(String, String)> {
    let Some(raw) = raw else {
        return defaults;
    };

    let parsed = parse_feed_symbols(&raw);
    if parsed.is_empty() {
        tracing::warn!(value = %raw, "FEED_SYMBOLS has no usable entries, keeping the defaults");
        return defaults;
    }
    parsed
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

pub fn load() -> Settings {
    // Loads .env if present (no crash if missing)
    dotenvy::dotenv().ok();

    let defaults = Settings::default();

    let store_backend = match env::var("STORE_BACKEND").ok().as_deref() {
        Some("memory") => StoreBackend::Memory,
        _ => StoreBackend::Mongo,
    };

    let feed_symbols = feed_symbols_or(env::var("FEED_SYMBOLS").ok(), defaults.feed_symbols);

    let feed_backoff = BackoffConfig {
        initial_delay_ms: env_parse("FEED_BACKOFF_INITIAL_MS")
            .unwrap_or(defaults.feed_backoff.initial_delay_ms),
        max_delay_ms: env_parse("FEED_BACKOFF_MAX_MS").unwrap_or(defaults.feed_backoff.max_delay_ms),
        multiplier: env_parse::<f64>("FEED_BACKOFF_MULTIPLIER")
            .filter(|m| *m >= 1.0)
            .unwrap_or(defaults.feed_backoff.multiplier),
    };

    Settings {
        mongodb_uri: env::var("MONGODB_URI").unwrap_or(defaults.mongodb_uri),
        mongodb_db: env::var("MONGODB_DB").unwrap_or(defaults.mongodb_db),
        store_backend,
        host: env::var("HOST").unwrap_or(defaults.host),
        port: env_parse("PORT").unwrap_or(defaults.port),
        jwt_secret: env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
        jwt_cookie_name: env::var("JWT_COOKIE_NAME").unwrap_or(defaults.jwt_cookie_name),
        feed_url: env::var("FEED_URL").unwrap_or(defaults.feed_url),
        feed_symbols,
        feed_backoff,
        notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        mirror_cas_attempts: env_parse::<u32>("MIRROR_CAS_RETRIES")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.mirror_cas_attempts),
    }
}
