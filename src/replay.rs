// ===============================
// src/replay.rs
// ===============================
//
// Replay deterministik: snapshot (dan fill yang direkam) diumpankan satu per
// satu ke strategi, urut sesuai input, tanpa konkurensi dan tanpa skip.
// Error pertama menghentikan replay (fail-fast): hasil parsial menyesatkan.
//
// PENTING: replay TIDAK idempoten. Inventory dan tick counter menumpuk kalau
// instance strategi yang sama dipakai dua kali; gunakan instance baru untuk
// replay yang bersih.
//

use std::iter::FusedIterator;
use std::path::Path;
use thiserror::Error;

use crate::domain::{Event, Fill, MarketSnapshot, Quote};
use crate::posttrade::{Ledger, Summary};
use crate::strategy::{Inventory, Strategy, StrategyError};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("read {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("line {line}: {source}")]
    Parse { line: usize, #[source] source: serde_json::Error },
    #[error("record #{index}: {source}")]
    Strategy { index: usize, #[source] source: StrategyError },
}

/// One replay input.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Tick { symbol: String, snapshot: MarketSnapshot },
    Fill(Fill),
}

/// Outcome of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Ticked(Option<Quote>),
    Filled(Fill),
}

/// Lazy replay. Stops for good after the first error.
pub struct Replay<'a, S: Strategy + ?Sized, I> {
    strategy: &'a mut S,
    source: I,
    index: usize,
    halted: bool,
}

pub fn replay<S, I>(strategy: &mut S, records: I) -> Replay<'_, S, I::IntoIter>
where
    S: Strategy + ?Sized,
    I: IntoIterator<Item = Record>,
{
    Replay { strategy, source: records.into_iter(), index: 0, halted: false }
}

impl<S: Strategy + ?Sized, I: Iterator<Item = Record>> Iterator for Replay<'_, S, I> {
    type Item = Result<Step, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.halted {
            return None;
        }
        let record = self.source.next()?;
        let index = self.index;
        self.index += 1;

        let res = match record {
            Record::Tick { symbol, snapshot } => self.strategy.on_tick(&symbol, &snapshot).map(Step::Ticked),
            Record::Fill(fill) => self.strategy.on_order_fill(&fill).map(|()| Step::Filled(fill)),
        };
        if res.is_err() {
            self.halted = true;
        }
        Some(res.map_err(|source| ReplayError::Strategy { index, source }))
    }
}

impl<S: Strategy + ?Sized, I: Iterator<Item = Record>> FusedIterator for Replay<'_, S, I> {}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    pub ticks: u64,
    pub quotes: Vec<Quote>,
    pub inventory: Inventory,
    pub summary: Summary,
}

/// Feeds `snapshots` for `symbol` through `on_tick` in order.
pub fn run<S, I>(strategy: &mut S, snapshots: I, symbol: &str) -> Result<ReplayReport, ReplayError>
where
    S: Strategy + ?Sized,
    I: IntoIterator<Item = MarketSnapshot>,
{
    let records = snapshots
        .into_iter()
        .map(|snapshot| Record::Tick { symbol: symbol.to_string(), snapshot });
    run_recorded(strategy, records)
}

/// Replays ticks and fills in recorded order.
pub fn run_recorded<S, I>(strategy: &mut S, records: I) -> Result<ReplayReport, ReplayError>
where
    S: Strategy + ?Sized,
    I: IntoIterator<Item = Record>,
{
    let mut ticks = 0u64;
    let mut quotes = Vec::new();
    let mut ledger = Ledger::new();

    for step in replay(strategy, records) {
        match step? {
            Step::Ticked(quote) => {
                ticks += 1;
                if let Some(q) = quote {
                    ledger.on_quote(&q);
                    quotes.push(q);
                }
            }
            Step::Filled(fill) => ledger.on_fill(&fill),
        }
    }

    let inventory = strategy.inventory().clone();
    let summary = ledger.summary(&inventory);
    Ok(ReplayReport { ticks, quotes, inventory, summary })
}

/// Reads recorder JSONL. Quote and note lines are skipped.
pub fn parse_jsonl(body: &str) -> Result<Vec<Record>, ReplayError> {
    let mut out = Vec::new();
    for (i, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let ev: Event = serde_json::from_str(line).map_err(|source| ReplayError::Parse { line: i + 1, source })?;
        match ev {
            Event::Tick { symbol, snapshot } => out.push(Record::Tick { symbol, snapshot }),
            Event::Fill(fill) => out.push(Record::Fill(fill)),
            Event::Quote(_) | Event::Note { .. } => {}
        }
    }
    Ok(out)
}

pub fn load_jsonl(path: &Path) -> Result<Vec<Record>, ReplayError> {
    let body = std::fs::read_to_string(path)
        .map_err(|source| ReplayError::Io { path: path.display().to_string(), source })?;
    parse_jsonl(&body)
}
