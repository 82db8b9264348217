// ===============================
// src/recorder.rs
// ===============================
//
// JSONL recorder:
// - Tulis setiap Event ke file .jsonl (append), satu baris per event.
// - BufWriter + flush periodik tiap 1s dan/atau tiap 1000 event.
// - Otomatis membuat parent directory jika belum ada.
// - Jika tulis gagal, coba reopen file dan lanjut.
//
// Baris `tick` dan `fill` bisa diputar ulang dengan `bookrunner replay --file`.
//
// ENV: set `RECORD_FILE=/path/to/events.jsonl` agar aktif (lihat main.rs).
//
use std::path::Path;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::Event;

/// Where strategies and drivers publish observable events.
pub trait EventSink: Send {
    fn emit(&self, ev: Event);
}

/// Discards events (no record file configured).
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _ev: Event) {}
}

impl EventSink for mpsc::Sender<Event> {
    fn emit(&self, ev: Event) {
        // never block the tick path on the recorder
        if let Err(e) = self.try_send(ev) {
            warn!(error = %e, "recorder: event dropped");
        }
    }
}

async fn open_writer(path: &str) -> std::io::Result<BufWriter<tokio::fs::File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<tokio::fs::File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    info!(%path, "recorder: started");
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, events will be discarded");
            let mut dropped = 0u64;
            while rx.recv().await.is_some() {
                dropped += 1;
            }
            warn!(dropped, "recorder: channel closed");
            return;
        }
    };

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut since_last_flush: u32 = 0;
    const FLUSH_EVERY_N_EVENTS: u32 = 1000;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    if let Err(e) = writer.flush().await {
                        error!(?e, "recorder: final flush failed");
                    }
                    info!("recorder: channel closed, stopped");
                    break;
                };

                let line = match serde_json::to_string(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip event");
                        continue;
                    }
                };

                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(?e, "recorder: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e2) => {
                            error!(?e2, "recorder: reopen failed, drop event");
                            continue;
                        }
                    }
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(?e2, "recorder: write failed again after reopen, drop event");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    if let Err(e) = writer.flush().await {
                        error!(?e, "recorder: flush failed");
                    }
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                if let Err(e) = writer.flush().await {
                    error!(?e, "recorder: periodic flush failed");
                }
                since_last_flush = 0;
            }
        }
    }
}
