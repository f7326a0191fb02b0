//! Loss history persistence
//!
//! Append-only JSON lines, one [`StopLossRecord`] per line, so the
//! blacklist survives restarts.

use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::blacklist::StopLossRecord;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct LossJournal {
    path: PathBuf,
    retention: Duration,
}

impl LossJournal {
    pub fn new(path: PathBuf, retention_hours: u32) -> Self {
        Self {
            path,
            retention: Duration::hours(i64::from(retention_hours)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &StopLossRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("Journaled loss for {} to {:?}", record.symbol, self.path);
        Ok(())
    }

    /// Records still inside retention. The file is compacted to exactly
    /// those records.
    pub async fn load(&self, now: DateTime<Utc>) -> Result<Vec<StopLossRecord>> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!("No loss journal at {:?}, starting fresh", self.path);
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let cutoff = now - self.retention;
        let mut records = Vec::new();
        let mut dropped = 0usize;

        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StopLossRecord>(line) {
                Ok(record) if record.timestamp >= cutoff => records.push(record),
                Ok(_) => dropped += 1,
                Err(e) => {
                    warn!("Skipping malformed journal line {}: {}", lineno + 1, e);
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            self.rewrite(&records).await?;
        }

        info!(
            "Loaded {} loss records from {:?} ({} dropped)",
            records.len(),
            self.path,
            dropped
        );
        Ok(records)
    }

    async fn rewrite(&self, records: &[StopLossRecord]) -> Result<()> {
        let mut content = String::new();
        for record in records {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("ladderbot-journal-{}", uuid::Uuid::new_v4()))
            .join("losses.jsonl")
    }

    fn record(symbol: &str, at: DateTime<Utc>) -> StopLossRecord {
        StopLossRecord {
            symbol: symbol.to_string(),
            timestamp: at,
            reason: "Emergency stop (hard stop)".to_string(),
            loss_usd: dec!(55.2),
        }
    }

    #[tokio::test]
    async fn test_missing_journal_is_empty() {
        let journal = LossJournal::new(temp_path(), 24);
        assert!(journal.load(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_and_load_with_retention() {
        let path = temp_path();
        let journal = LossJournal::new(path.clone(), 24);
        let now = Utc::now();

        journal.append(&record("OLDUSDT", now - Duration::hours(30))).await.unwrap();
        journal.append(&record("XUSDT", now - Duration::hours(1))).await.unwrap();
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"not json\n")
            .await
            .unwrap();

        let loaded = journal.load(now).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "XUSDT");
        assert_eq!(loaded[0].loss_usd, dec!(55.2));

        // Compacted on load
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 1);

        if let Some(dir) = path.parent() {
            tokio::fs::remove_dir_all(dir).await.ok();
        }
    }
}
