// ===============================
// src/research.rs
// ===============================
//
// Sumber parameter opsional untuk strategi (hanya dipakai saat konstruksi):
// - load_params(path)          : JSON {spread_bps?, inventory_clip?, hold_time?} menimpa default
// - generate_from_papers(...)  : generator naif dari metadata paper (judul);
//                                spread dipersempit kalau judul menyebut
//                                "liquidity" atau "depth"
//
// Fetch paper (arXiv / Semantic Scholar / CrossRef) di luar crate ini; input
// berupa file JSON array [{title, ...}, ...]; hanya judul yang dibaca.
//

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::strategy::StrategyParams;

pub const SPREAD_BPS_GRID: [f64; 4] = [5.0, 10.0, 15.0, 20.0];
pub const INVENTORY_CLIP_GRID: [f64; 3] = [0.1, 0.2, 0.5];
pub const HOLD_TIME_GRID: [u64; 3] = [60, 120, 300];

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("read {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("parse {path}: {source}")]
    Parse { path: String, #[source] source: serde_json::Error },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paper {
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ParamOverlay {
    spread_bps: Option<f64>,
    inventory_clip: Option<f64>,
    hold_time: Option<u64>,
}

fn read(path: &Path) -> Result<String, ResearchError> {
    std::fs::read_to_string(path).map_err(|source| ResearchError::Io { path: path.display().to_string(), source })
}

pub fn load_papers(path: &Path) -> Result<Vec<Paper>, ResearchError> {
    serde_json::from_str(&read(path)?)
        .map_err(|source| ResearchError::Parse { path: path.display().to_string(), source })
}

/// Overlays the fields present in the JSON file onto `base`. No validation here;
/// the strategy validates at construction.
pub fn load_params(path: &Path, base: &StrategyParams) -> Result<StrategyParams, ResearchError> {
    let overlay: ParamOverlay = serde_json::from_str(&read(path)?)
        .map_err(|source| ResearchError::Parse { path: path.display().to_string(), source })?;
    Ok(apply(overlay, base))
}

fn apply(o: ParamOverlay, base: &StrategyParams) -> StrategyParams {
    StrategyParams {
        spread_bps: o.spread_bps.unwrap_or(base.spread_bps),
        inventory_clip: o.inventory_clip.unwrap_or(base.inventory_clip),
        hold_time: o.hold_time.unwrap_or(base.hold_time),
        ..base.clone()
    }
}

pub fn generate_from_papers<R: Rng + ?Sized>(papers: &[Paper], base: &StrategyParams, rng: &mut R) -> StrategyParams {
    if papers.is_empty() {
        warn!("research: no papers, sampling from the full grid");
    }
    let titles = papers.iter().map(|p| p.title.to_lowercase()).collect::<Vec<_>>().join(" ");
    let narrow = titles.contains("liquidity") || titles.contains("depth");
    let spreads: Vec<f64> = SPREAD_BPS_GRID.iter().copied().filter(|&s| !narrow || s <= 10.0).collect();

    let overlay = ParamOverlay {
        spread_bps: spreads.choose(rng).copied(),
        inventory_clip: INVENTORY_CLIP_GRID.choose(rng).copied(),
        hold_time: HOLD_TIME_GRID.choose(rng).copied(),
    };
    let params = apply(overlay, base);
    info!(
        papers = papers.len(),
        narrow,
        spread_bps = params.spread_bps,
        inventory_clip = params.inventory_clip,
        hold_time = params.hold_time,
        "research params generated"
    );
    params
}
