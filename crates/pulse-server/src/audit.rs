//! Audit trail for batch ingestion: one consumer drains a bounded channel
//! and fans each entry out to a file and/or an HTTP endpoint.

use pulse_common::types::AuditEntry;
use std::fs::OpenOptions;
use std::io::Write;
use tokio::sync::mpsc;

pub const CHANNEL_CAPACITY: usize = 50;

pub fn channel() -> (mpsc::Sender<AuditEntry>, mpsc::Receiver<AuditEntry>) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// Consumer loop. Entries are pretty-printed JSON, newline-separated in the
/// file (truncated at open, appended afterwards). Per-destination failures
/// are logged and never stop the loop; the loop itself ends when the last
/// sender is dropped, which is how shutdown reaches it.
pub async fn run(mut rx: mpsc::Receiver<AuditEntry>, audit_file: String, audit_url: String) {
    let mut file = if audit_file.is_empty() {
        None
    } else {
        match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&audit_file)
        {
            Ok(file) => {
                tracing::info!(path = %audit_file, "audit file opened");
                Some(file)
            }
            Err(e) => {
                tracing::error!(path = %audit_file, error = %e, "unable to open audit file");
                None
            }
        }
    };

    let client = reqwest::Client::new();

    while let Some(entry) = rx.recv().await {
        let data = match serde_json::to_vec_pretty(&entry) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "unable to encode audit entry");
                continue;
            }
        };

        if let Some(file) = file.as_mut() {
            if let Err(e) = file.write_all(&data).and_then(|()| file.write_all(b"\n")) {
                tracing::warn!(error = %e, "unable to write audit entry to file");
            }
        }

        if !audit_url.is_empty() {
            match client
                .post(&audit_url)
                .header("Content-Type", "application/json")
                .body(data)
                .send()
                .await
            {
                Ok(response) => {
                    tracing::debug!(status = response.status().as_u16(), "audit entry posted")
                }
                Err(e) => tracing::warn!(error = %e, "unable to post audit entry"),
            }
        }
    }

    tracing::info!("audit consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_are_written_newline_separated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");

        let (tx, rx) = channel();
        let handle = tokio::spawn(run(
            rx,
            path.to_string_lossy().to_string(),
            String::new(),
        ));

        for names in [vec!["A".to_string(), "B".to_string()], vec!["C".to_string()]] {
            tx.send(AuditEntry {
                ts: 1700000000,
                metric_names: names,
                source_ip: "127.0.0.1".to_string(),
            })
            .await
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let entries: Vec<AuditEntry> = content
            .split("\n{")
            .map(|chunk| {
                let chunk = if chunk.starts_with('{') {
                    chunk.to_string()
                } else {
                    format!("{{{chunk}")
                };
                serde_json::from_str(chunk.trim()).unwrap()
            })
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].metric_names, ["A", "B"]);
        assert_eq!(entries[1].metric_names, ["C"]);
    }

    #[tokio::test]
    async fn consumer_exits_when_senders_drop() {
        let (tx, rx) = channel();
        let handle = tokio::spawn(run(rx, String::new(), String::new()));
        drop(tx);
        handle.await.unwrap();
    }
}
