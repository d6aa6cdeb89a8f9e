// ===============================
// src/recorder.rs
// ===============================
//
// Ledger journal: one JournalEntry per line (.jsonl, append).
// - BufWriter, flushed every second and every 1000 entries.
// - Parent directory is created on open.
// - A failed write reopens the file once; a second failure drops the entry.
// - File cannot be opened at all -> log and drain the channel so senders
//   (try_send) never block on a dead journal.
//
// ENV: `RECORD_FILE=/path/to/ledger.jsonl` (see main.rs).
//
use std::path::Path;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::JournalEntry;

const FLUSH_EVERY_N_ENTRIES: u32 = 1000;

async fn open_writer(path: &str) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<JournalEntry>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(%path, ?e, "journal: open failed, entries will be dropped");
            while rx.recv().await.is_some() {}
            return;
        }
    };
    info!(%path, "journal: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_entry = rx.recv() => {
                let Some(entry) = maybe_entry else {
                    let _ = writer.flush().await;
                    info!("journal: channel closed, stopped");
                    break;
                };
                let line = match serde_json::to_string(&entry) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "journal: serialize error, skip entry");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut writer, &line).await {
                    warn!(?e, "journal: write failed, reopening");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e) => {
                            error!(?e, "journal: reopen failed, drop entry");
                            continue;
                        }
                    }
                    if let Err(e) = write_line(&mut writer, &line).await {
                        error!(?e, "journal: write failed again after reopen, drop entry");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_ENTRIES {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LedgerEvent;

    #[tokio::test]
    async fn entries_land_as_json_lines() {
        let dir = std::env::temp_dir().join(format!("ledger_journal_{}", std::process::id()));
        let path = dir.join("nested").join("journal.jsonl");
        let path_str = path.to_string_lossy().to_string();
        let _ = std::fs::remove_file(&path);

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(rx, path_str));
        tx.send(JournalEntry::now(LedgerEvent::Read {
            action: "buyers".into(),
            buyer: None,
            rows: 3,
        }))
        .await
        .unwrap();
        tx.send(JournalEntry::now(LedgerEvent::Failure {
            action: "addTransaction".into(),
            buyer: Some("Rajesh Kumar".into()),
            reason: "service error: locked".into(),
        }))
        .await
        .unwrap();
        drop(tx);
        task.await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: JournalEntry = serde_json::from_str(lines[0]).unwrap();
        assert!(matches!(first.event, LedgerEvent::Read { rows: 3, .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
