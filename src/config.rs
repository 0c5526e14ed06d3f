// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : kucoin_ladder_mm — single-pair KuCoin market-making loop in Rust
Module  : config.rs
Version : 0.5.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Keeps a maker ladder around the mid price on one KuCoin pair,
          sweeps the top of book up to a cap, reconciles against the
          venue's active orders every cycle, exposes Prometheus metrics,
          and records JSONL events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use clap::Parser;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use tokio::time::Duration;

use crate::error::ConfigError;
use crate::kucoin::{KucoinAuth, LIVE_REST_URL, SANDBOX_REST_URL};
use crate::ladder::SizeBand;

/// Command line (override terakhir di atas file + ENV)
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "kucoin_ladder_mm", version, about = "Maker ladder + taker sweep for one KuCoin pair")]
pub struct Cli {
    /// JSON config file (kunci sama dengan config lama: kucoin_api_key, maker_number, ...)
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
    /// mock | kucoin_sandbox | kucoin_live
    #[arg(long)]
    pub venue: Option<String>,
    /// Stop after N cycles (default: run forever)
    #[arg(long)]
    pub cycles: Option<u64>,
    #[arg(long)]
    pub metrics_port: Option<u16>,
}

/// Venue tempat order dikirim
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VenueMode {
    Mock,
    KucoinSandbox,
    KucoinLive,
}

impl VenueMode {
    pub fn parse(s: &str) -> Option<VenueMode> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" | "paper" => Some(VenueMode::Mock),
            "kucoin_sandbox" | "sandbox" => Some(VenueMode::KucoinSandbox),
            "kucoin_live" | "kucoin_mainnet" | "live" => Some(VenueMode::KucoinLive),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VenueMode::Mock => "mock",
            VenueMode::KucoinSandbox => "kucoin_sandbox",
            VenueMode::KucoinLive => "kucoin_live",
        }
    }

    // Endpoint default per mode
    pub fn default_rest_url(&self) -> &'static str {
        match self {
            VenueMode::Mock => LIVE_REST_URL, // tidak dipakai saat mock
            VenueMode::KucoinSandbox => SANDBOX_REST_URL,
            VenueMode::KucoinLive => LIVE_REST_URL,
        }
    }
}

/// Kategori instrumen (BTC-USDT / ETH-USDT / ETH-BTC)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    BtcUsdt,
    EthUsdt,
    EthBtc,
}

impl Category {
    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "BTC-USDT" => Some(Category::BtcUsdt),
            "ETH-USDT" => Some(Category::EthUsdt),
            "ETH-BTC" => Some(Category::EthBtc),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::BtcUsdt => "BTC-USDT",
            Category::EthUsdt => "ETH-USDT",
            Category::EthBtc => "ETH-BTC",
        }
    }
}

/// Bentuk file config JSON. Semua opsional; validasi di `build`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub kucoin_api_key: Option<String>,
    pub kucoin_secret_key: Option<String>,
    pub kucoin_pass_phrase: Option<String>,
    pub is_sandbox: Option<bool>,
    pub kucoin_symbol: Option<String>,
    pub category: Option<String>,
    pub maker_number: Option<i64>,
    pub taker_number: Option<f64>,
    pub side: Option<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    pub sweep_size_cap: Option<f64>,
    pub concurrency: Option<usize>,
    pub backoff_secs: Option<u64>,
}

impl FileConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// File tidak ada -> config kosong (nilai wajib harus datang dari ENV/CLI).
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Read { path: path.display().to_string(), reason: e.to_string() }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub venue: VenueMode,
    pub auth: Option<KucoinAuth>,
    pub trade_rest_url: String,
    pub market_rest_url: String,

    pub symbol: String,
    pub category: Category,
    pub maker_number: u32,
    // dibaca & dilaporkan, tidak memengaruhi sweep / sisi
    pub taker_number: Option<f64>,
    pub side: Option<String>,

    pub size_band: SizeBand,
    pub sweep_size_cap: f64,
    pub concurrency: usize,
    pub backoff: Duration,
    pub max_cycles: Option<u64>,

    // files/metrics
    pub metrics_port: u16,
    pub record_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

fn pick(env_val: Option<String>, file_val: Option<String>) -> Option<String> {
    env_val.filter(|s| !s.trim().is_empty()).or(file_val.filter(|s| !s.trim().is_empty()))
}

/// Gabungkan file < ENV < CLI lalu validasi.
pub fn build(cli: &Cli, file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Settings, ConfigError> {
    // ===== Venue =====
    let venue = match cli.venue.clone().or_else(|| env("VENUE_MODE")) {
        Some(raw) => VenueMode::parse(&raw).ok_or_else(|| ConfigError::Invalid {
            key: "venue",
            reason: format!("unknown venue mode {raw:?}"),
        })?,
        None => match file.is_sandbox {
            Some(true) => VenueMode::KucoinSandbox,
            Some(false) => VenueMode::KucoinLive,
            None => VenueMode::Mock,
        },
    };

    let auth = match (
        pick(env("KUCOIN_API_KEY"), file.kucoin_api_key),
        pick(env("KUCOIN_SECRET_KEY"), file.kucoin_secret_key),
        pick(env("KUCOIN_PASS_PHRASE"), file.kucoin_pass_phrase),
    ) {
        (Some(k), Some(s), Some(p)) => Some(KucoinAuth::new(k, s, p)),
        (k, s, _) if venue != VenueMode::Mock => {
            let missing = if k.is_none() {
                "kucoin_api_key"
            } else if s.is_none() {
                "kucoin_secret_key"
            } else {
                "kucoin_pass_phrase"
            };
            return Err(ConfigError::Missing(missing));
        }
        _ => None,
    };

    let trade_rest_url = env("KUCOIN_REST_URL").unwrap_or_else(|| venue.default_rest_url().to_string());
    // harga referensi selalu dari market live (kecuali di-override)
    let market_rest_url = env("KUCOIN_MARKET_REST_URL").unwrap_or_else(|| LIVE_REST_URL.to_string());

    // ===== Pair =====
    let symbol = pick(env("KUCOIN_SYMBOL"), file.kucoin_symbol)
        .map(|s| s.trim().to_ascii_uppercase())
        .ok_or(ConfigError::Missing("kucoin_symbol"))?;
    let category = match file.category {
        Some(raw) => Category::parse(&raw).ok_or_else(|| ConfigError::Invalid {
            key: "category",
            reason: format!("unknown category {raw:?}"),
        })?,
        None => Category::parse(&symbol).ok_or(ConfigError::Missing("category"))?,
    };

    // ===== Ladder =====
    let maker_number = file.maker_number.ok_or(ConfigError::Missing("maker_number"))?;
    if !(1..=i64::from(u32::MAX)).contains(&maker_number) {
        return Err(ConfigError::Invalid { key: "maker_number", reason: format!("{maker_number} must be >= 1") });
    }
    let size_min = file.size_min.unwrap_or(100);
    let size_max = file.size_max.unwrap_or(10_000);
    if size_min == 0 || size_min > size_max {
        return Err(ConfigError::Invalid {
            key: "size_min",
            reason: format!("need 0 < size_min <= size_max, got {size_min}..{size_max}"),
        });
    }
    let sweep_size_cap = file.sweep_size_cap.unwrap_or(100_000.0);
    if !(sweep_size_cap.is_finite() && sweep_size_cap >= 0.0) {
        return Err(ConfigError::Invalid { key: "sweep_size_cap", reason: format!("{sweep_size_cap}") });
    }
    let concurrency = file.concurrency.unwrap_or(10);
    if concurrency == 0 {
        return Err(ConfigError::Invalid { key: "concurrency", reason: "must be >= 1".into() });
    }

    let metrics_port = cli
        .metrics_port
        .or_else(|| env("METRICS_PORT").and_then(|s| s.parse().ok()))
        .unwrap_or(9898);

    Ok(Settings {
        venue,
        auth,
        trade_rest_url,
        market_rest_url,
        symbol,
        category,
        maker_number: maker_number as u32,
        taker_number: file.taker_number,
        side: file.side,
        size_band: SizeBand { min: size_min, max: size_max },
        sweep_size_cap,
        concurrency,
        backoff: Duration::from_secs(file.backoff_secs.unwrap_or(5)),
        max_cycles: cli.cycles,
        metrics_port,
        record_file: env("RECORD_FILE").map(PathBuf::from),
        log_file: env("LOG_FILE").map(PathBuf::from),
    })
}

pub fn load() -> Result<Settings, ConfigError> {
    // Pastikan .env dibaca (agar KUCOIN_*, RECORD_FILE, dll ter-load)
    let _ = dotenv();
    let cli = Cli::parse();
    let file = FileConfig::read(&cli.config)?;
    build(&cli, file, |k| env::var(k).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const FULL: &str = r#"{
        "kucoin_api_key": "key", "kucoin_secret_key": "secret", "kucoin_pass_phrase": "pass",
        "is_sandbox": true, "kucoin_symbol": "btc-usdt", "category": "BTC_USDT",
        "maker_number": 5, "taker_number": 3, "side": "both"
    }"#;

    fn no_env(_: &str) -> Option<String> { None }

    #[test]
    fn legacy_config_shape_loads_with_defaults() {
        let s = build(&Cli::default(), FileConfig::from_json(FULL).unwrap(), no_env).unwrap();
        assert_eq!(s.venue, VenueMode::KucoinSandbox);
        assert_eq!(s.trade_rest_url, SANDBOX_REST_URL);
        assert_eq!(s.market_rest_url, LIVE_REST_URL);
        assert_eq!(s.symbol, "BTC-USDT");
        assert_eq!(s.category, Category::BtcUsdt);
        assert_eq!(s.maker_number, 5);
        assert_eq!(s.size_band, SizeBand { min: 100, max: 10_000 });
        assert_eq!(s.sweep_size_cap, 100_000.0);
        assert_eq!(s.concurrency, 10);
        assert_eq!(s.backoff, Duration::from_secs(5));
        assert_eq!(s.taker_number, Some(3.0));
        assert!(s.auth.is_some());
    }

    #[test]
    fn env_and_cli_override_the_file() {
        let vars: HashMap<&str, &str> =
            [("VENUE_MODE", "kucoin_live"), ("KUCOIN_SYMBOL", "ETH-USDT"), ("METRICS_PORT", "9000")].into();
        let env = |k: &str| vars.get(k).map(|v| v.to_string());
        let mut file = FileConfig::from_json(FULL).unwrap();
        file.category = Some("ETH-USDT".into());

        let s = build(&Cli::default(), file.clone(), env).unwrap();
        assert_eq!(s.venue, VenueMode::KucoinLive);
        assert_eq!(s.symbol, "ETH-USDT");
        assert_eq!(s.metrics_port, 9000);

        let cli = Cli { venue: Some("mock".into()), metrics_port: Some(1234), cycles: Some(3), ..Cli::default() };
        let s = build(&cli, file, env).unwrap();
        assert_eq!(s.venue, VenueMode::Mock);
        assert_eq!(s.metrics_port, 1234);
        assert_eq!(s.max_cycles, Some(3));
    }

    #[test]
    fn kucoin_modes_require_credentials() {
        let file = FileConfig::from_json(r#"{"is_sandbox": false, "kucoin_symbol": "ETH-BTC", "maker_number": 3}"#).unwrap();
        assert!(matches!(build(&Cli::default(), file.clone(), no_env), Err(ConfigError::Missing("kucoin_api_key"))));

        let cli = Cli { venue: Some("mock".into()), ..Cli::default() };
        let s = build(&cli, file, no_env).unwrap();
        assert!(s.auth.is_none());
        assert_eq!(s.category, Category::EthBtc);
    }

    #[test]
    fn bad_values_are_fatal() {
        let cli = Cli { venue: Some("mock".into()), ..Cli::default() };
        for bad in [
            r#"{"kucoin_symbol": "BTC-USDT", "maker_number": 0}"#,
            r#"{"kucoin_symbol": "BTC-USDT", "maker_number": 3, "size_min": 500, "size_max": 100}"#,
            r#"{"kucoin_symbol": "BTC-USDT", "maker_number": 3, "concurrency": 0}"#,
            r#"{"kucoin_symbol": "BTC-USDT", "maker_number": 3, "category": "DOGE-USDT"}"#,
            r#"{"kucoin_symbol": "BTC-USDT"}"#,
        ] {
            let file = FileConfig::from_json(bad).unwrap();
            assert!(build(&cli, file, no_env).is_err(), "accepted {bad}");
        }
        assert!(FileConfig::from_json("{not json").is_err());
        let unknown = Cli { venue: Some("binance".into()), ..Cli::default() };
        assert!(build(&unknown, FileConfig::from_json(FULL).unwrap(), no_env).is_err());
    }

    #[test]
    fn missing_file_is_empty_config() {
        let f = FileConfig::read(Path::new("/definitely/not/here/config.json")).unwrap();
        assert!(f.kucoin_symbol.is_none());
    }
}
