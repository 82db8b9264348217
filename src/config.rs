// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : bookrunner — passive market-making prototype for crypto spot pairs
Module  : config.rs
Version : 0.1.0
Author  : bookrunner contributors
License : MIT

Summary : Polls order-book snapshots (mock/Binance), quotes a symmetric
          inventory-widened spread around the mid, tracks inventory from
          paper fills, replays recorded JSONL sessions deterministically,
          exposes Prometheus metrics.

(c) 2025 bookrunner contributors.
=============================================================================
*/
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::driver::RetryPolicy;
use crate::strategy::{StrategyKind, StrategyParams};

/// Mode sumber market data
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarketMode {
    Mock,
    BinanceSandbox,
    BinanceMainnet,
}

impl MarketMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketMode::Mock => "mock",
            MarketMode::BinanceSandbox => "binance_sandbox",
            MarketMode::BinanceMainnet => "binance_mainnet",
        }
    }

    // Endpoint default per mode
    pub fn default_rest_url(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "https://testnet.binance.vision", // tidak dipakai saat mock
            MarketMode::BinanceSandbox  => "https://testnet.binance.vision",
            MarketMode::BinanceMainnet  => "https://api.binance.com",
        }
    }
}

impl FromStr for MarketMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock"             => Ok(MarketMode::Mock),
            "binance_sandbox"  => Ok(MarketMode::BinanceSandbox),
            "binance_mainnet"  => Ok(MarketMode::BinanceMainnet),
            other => Err(format!("unknown feed mode {other:?} (mock|binance_sandbox|binance_mainnet)")),
        }
    }
}

#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum Command {
    /// Poll the market and quote until Ctrl-C (default).
    Live,
    /// Replay a recorded JSONL session through a fresh strategy.
    Replay {
        #[arg(long, env = "REPLAY_FILE")]
        file: PathBuf,
    },
}

#[derive(Parser, Clone, Debug)]
#[command(name = "bookrunner", version, about = "Passive market maker prototype for crypto spot pairs")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    // ===== Market =====
    #[arg(long, env = "SYMBOL", default_value = "BTC/USDT")]
    pub symbol: String,
    #[arg(long, env = "DEPTH", default_value_t = 20)]
    pub depth: usize,
    #[arg(long, env = "FEED_MODE", default_value = "mock")]
    pub feed_mode: MarketMode,
    #[arg(long, env = "BINANCE_REST_URL")]
    pub binance_rest_url: Option<String>,
    #[arg(long, env = "MOCK_SEED")]
    pub mock_seed: Option<u64>,

    // ===== Cadence / retry =====
    #[arg(long, env = "POLL_MS", default_value_t = 1_000)]
    pub poll_ms: u64,
    #[arg(long, env = "BACKOFF_MS", default_value_t = 5_000)]
    pub backoff_ms: u64,
    #[arg(long, env = "MAX_BACKOFF_MS", default_value_t = 60_000)]
    pub max_backoff_ms: u64,
    #[arg(long, env = "HEARTBEAT_EVERY", default_value_t = 60)]
    pub heartbeat_every: u64,

    // ===== Strategy =====
    #[arg(long, env = "STRATEGY", default_value = "passive_maker")]
    pub strategy: StrategyKind,
    #[arg(long, env = "SPREAD_BPS", default_value_t = 10.0)]
    pub spread_bps: f64,
    #[arg(long, env = "INVENTORY_CLIP", default_value_t = 0.2)]
    pub inventory_clip: f64,
    #[arg(long, env = "HOLD_TIME", default_value_t = 60)]
    pub hold_time: u64,
    #[arg(long, env = "PRICE_DECIMALS", default_value_t = 2)]
    pub price_decimals: u32,
    #[arg(long, env = "QUOTE_EVERY", default_value_t = 10)]
    pub quote_every: u64,
    #[arg(long, env = "ORDER_QTY", default_value_t = 0.001)]
    pub order_qty: f64,

    // ===== Parameter sources =====
    #[arg(long, env = "PARAMS_FILE")]
    pub params_file: Option<PathBuf>,
    #[arg(long, env = "RESEARCH_FILE")]
    pub research_file: Option<PathBuf>,
    #[arg(long, env = "RESEARCH_SEED")]
    pub research_seed: Option<u64>,

    // ===== Files / metrics =====
    #[arg(long, env = "RECORD_FILE")]
    pub record_file: Option<String>,
    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Live)
    }

    pub fn rest_url(&self) -> String {
        self.binance_rest_url
            .clone()
            .unwrap_or_else(|| self.feed_mode.default_rest_url().to_string())
    }

    /// Base params from flags/env; research and PARAMS_FILE are layered on in main.
    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams {
            spread_bps: self.spread_bps,
            inventory_clip: self.inventory_clip,
            hold_time: self.hold_time,
            price_decimals: self.price_decimals,
            quote_every: self.quote_every,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            poll_interval: Duration::from_millis(self.poll_ms),
            base_backoff: Duration::from_millis(self.backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.backoff_ms)),
            ..RetryPolicy::default()
        }
    }
}

pub fn load() -> Args {
    // Pastikan .env dibaca sebelum clap membaca ENV
    let _ = dotenv();
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("bookrunner").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_reference_params() {
        let a = parse(&[]);
        assert_eq!(a.command(), Command::Live);
        let p = a.strategy_params();
        assert_eq!(p.spread_bps, 10.0);
        assert_eq!(p.inventory_clip, 0.2);
        assert_eq!(p.hold_time, 60);
        assert_eq!(a.retry_policy().poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn replay_subcommand_and_overrides() {
        let a = parse(&["--spread-bps", "5", "--feed-mode", "binance_mainnet", "replay", "--file", "s.jsonl"]);
        assert_eq!(a.command(), Command::Replay { file: PathBuf::from("s.jsonl") });
        assert_eq!(a.strategy_params().spread_bps, 5.0);
        assert_eq!(a.rest_url(), "https://api.binance.com");
    }

    #[test]
    fn bad_enums_are_rejected() {
        let argv = ["bookrunner", "--feed-mode", "kraken"];
        assert!(Args::try_parse_from(argv).is_err());
        let argv = ["bookrunner", "--strategy", "momentum"];
        assert!(Args::try_parse_from(argv).is_err());
    }
}
