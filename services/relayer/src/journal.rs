//! Local record of published checkpoints, one JSON file for all networks.
//!
//! A checkpoint is journaled as `pending` as soon as its transaction is
//! accepted by the node and flipped to `confirmed` once mined, so a window
//! whose receipt never arrived is still counted as taken.

use std::path::{Path, PathBuf};

use badges::{Checkpoint, Window};
use chrono::{DateTime, Utc};
use merkle::Hash32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("journal {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Transaction accepted by the node, receipt not seen yet
    Pending,
    #[default]
    Confirmed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub network: String,
    #[serde(with = "hex")]
    pub root: Hash32,
    pub window: Window,
    pub tx_hash: String,
    #[serde(default)]
    pub status: CheckpointStatus,
    pub published_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn new(network: &str, checkpoint: &Checkpoint, tx_hash: String, status: CheckpointStatus) -> Self {
        Self {
            network: network.to_string(),
            root: checkpoint.root,
            window: checkpoint.window,
            tx_hash,
            status,
            published_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == CheckpointStatus::Pending
    }
}

#[derive(Clone, Debug)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io(&self, source: std::io::Error) -> JournalError {
        JournalError::Io { path: self.path.clone(), source }
    }

    fn corrupt(&self, source: serde_json::Error) -> JournalError {
        JournalError::Corrupt { path: self.path.clone(), source }
    }

    /// All entries, oldest first. A missing file is an empty journal.
    pub async fn entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io(source)),
        };
        serde_json::from_slice(&bytes).map_err(|source| self.corrupt(source))
    }

    /// Most recently published window on `network`, pending or confirmed
    pub async fn last_window(&self, network: &str) -> Result<Option<Window>, JournalError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|e| e.network == network)
            .max_by_key(|e| e.window.end())
            .map(|e| e.window))
    }

    /// Entries on `network` whose receipt has not been seen
    pub async fn pending(&self, network: &str) -> Result<Vec<JournalEntry>, JournalError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|e| e.network == network && e.is_pending())
            .collect())
    }

    pub async fn append(&self, entry: JournalEntry) -> Result<(), JournalError> {
        let mut entries = self.entries().await?;
        entries.push(entry);
        self.write_atomic(&entries).await
    }

    /// Set the status of the entry for `tx_hash`; false if there is none
    pub async fn set_status(&self, network: &str, tx_hash: &str, status: CheckpointStatus) -> Result<bool, JournalError> {
        let mut entries = self.entries().await?;
        let Some(entry) = entries.iter_mut().find(|e| e.network == network && e.tx_hash == tx_hash) else {
            return Ok(false);
        };
        entry.status = status;
        self.write_atomic(&entries).await?;
        Ok(true)
    }

    /// Drop the entry for `tx_hash`, freeing its window; false if there is none
    pub async fn remove(&self, network: &str, tx_hash: &str) -> Result<bool, JournalError> {
        let mut entries = self.entries().await?;
        let before = entries.len();
        entries.retain(|e| !(e.network == network && e.tx_hash == tx_hash));
        if entries.len() == before {
            return Ok(false);
        }
        self.write_atomic(&entries).await?;
        Ok(true)
    }

    async fn write_atomic(&self, entries: &[JournalEntry]) -> Result<(), JournalError> {
        let bytes = serde_json::to_vec_pretty(entries).map_err(|source| self.corrupt(source))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| self.io(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(|e| self.io(e))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| self.io(e))?;
        Ok(())
    }
}
