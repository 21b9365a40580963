// ===============================
// src/recorder.rs
// ===============================
//
// Session traffic as JSON lines:
// - one Event per line, appended through a BufWriter
// - flushed every second and every FLUSH_EVERY events
// - parent directory created on open; on write failure the file is reopened
//   and the line retried once
//
// Enabled with RECORD_FILE=/path/to/session.jsonl.
//
use std::io;
use std::path::Path;

use chrono::Utc;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY: u32 = 1000;

/// Wall-clock UTC nanoseconds for event stamps.
pub fn now_ns() -> i128 {
    Utc::now().timestamp_nanos_opt().map(i128::from).unwrap_or_default()
}

impl Event {
    pub fn inbound(frame: impl Into<String>) -> Self {
        Event::Inbound { ts_ns: now_ns(), frame: frame.into() }
    }

    pub fn outbound(frame: impl Into<String>) -> Self {
        Event::Outbound { ts_ns: now_ns(), frame: frame.into() }
    }

    pub fn note(text: impl Into<String>) -> Self {
        Event::Note { ts_ns: now_ns(), text: text.into() }
    }
}

async fn open_writer(path: &str) -> io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, recording disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
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
                    error!(?e, "recorder: write failed, reopening");
                    let _ = writer.flush().await;
                    writer = match open_writer(&path).await {
                        Ok(w) => w,
                        Err(e) => {
                            error!(?e, %path, "recorder: reopen failed, stopped");
                            return;
                        }
                    };
                    if let Err(e) = write_line(&mut writer, &line).await {
                        error!(?e, "recorder: write failed after reopen, drop event");
                        continue;
                    }
                }
                since_flush += 1;
                if since_flush >= FLUSH_EVERY {
                    let _ = writer.flush().await;
                    since_flush = 0;
                }
            }
            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_one_json_object_per_line() {
        let dir = std::env::temp_dir().join(format!("party_sync_rec_{}", now_ns()));
        let path = dir.join("nested").join("session.jsonl");
        let path_str = path.to_string_lossy().to_string();

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(rx, path_str));
        tx.send(Event::inbound(r#"{"type":"CHAT"}"#)).await.unwrap();
        tx.send(Event::note("left room")).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["Inbound"]["frame"], r#"{"type":"CHAT"}"#);
        assert!(first["Inbound"]["ts_ns"].as_i64().unwrap() > 0);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["Note"]["text"], "left room");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
