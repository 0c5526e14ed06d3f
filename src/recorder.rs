// ===============================
// src/recorder.rs
// ===============================
//
// Event log JSONL (RECORD_FILE):
// - satu baris per Event (harga, place/cancel/sweep, kegagalan gateway)
// - BufWriter, flush tiap 1s atau tiap FLUSH_EVERY event
// - gagal tulis -> reopen sekali, lalu event dibuang
//
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY: u32 = 1000;

struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
    pending: u32,
}

impl JsonlSink {
    async fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self { path: path.to_path_buf(), writer: BufWriter::new(file), pending: 0 })
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await
    }

    async fn record(&mut self, ev: &Event) {
        let line = match serde_json::to_string(ev) {
            Ok(s) => s,
            Err(e) => {
                error!(?e, "recorder: serialize error, skip event");
                return;
            }
        };
        if let Err(e) = self.write_line(&line).await {
            error!(?e, path = %self.path.display(), "recorder: write failed, reopening");
            match Self::open(&self.path).await {
                Ok(fresh) => *self = fresh,
                Err(e) => {
                    error!(?e, "recorder: reopen failed, drop event");
                    return;
                }
            }
            if let Err(e) = self.write_line(&line).await {
                error!(?e, "recorder: write failed again after reopen, drop event");
                return;
            }
        }
        self.pending += 1;
        if self.pending >= FLUSH_EVERY {
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        let _ = self.writer.flush().await;
        self.pending = 0;
    }
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: PathBuf) {
    let mut sink = match JsonlSink::open(&path).await {
        Ok(s) => s,
        Err(e) => {
            error!(?e, path = %path.display(), "recorder: cannot open file, recording disabled");
            return;
        }
    };
    info!(path = %path.display(), "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => match maybe_ev {
                Some(ev) => sink.record(&ev).await,
                None => {
                    sink.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                }
            },
            _ = tick.tick() => sink.flush().await,
        }
    }
}
