//! Checkpoint Store
//!
//! Durable progress for the batch orchestrator. The file is replaced
//! atomically after every batch; a damaged file stops the run instead of
//! silently restarting from scratch.

use crate::error::{MigrationError, MigrationResult};
use crate::models::CheckpointRecord;
use cmig_common::artifact::{read_json, remove_artifact, write_json_atomic};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where checkpoint writes go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persistence {
    /// Atomically replaced JSON file
    File,
    /// Dry run: the file is read once, writes stay in memory
    MemoryOnly,
}

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    persistence: Persistence,
    memory: Option<CheckpointRecord>,
    loaded: bool,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            persistence: Persistence::File,
            memory: None,
            loaded: false,
        }
    }

    /// Store that never writes to disk
    pub fn memory_only(path: impl Into<PathBuf>) -> Self {
        Self {
            persistence: Persistence::MemoryOnly,
            ..Self::new(path)
        }
    }

    /// Same store with writes kept in memory
    pub fn into_memory_only(self) -> Self {
        Self {
            persistence: Persistence::MemoryOnly,
            ..self
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence == Persistence::File
    }

    /// Current checkpoint, `None` for a fresh start
    pub async fn load(&mut self) -> MigrationResult<Option<CheckpointRecord>> {
        if self.persistence == Persistence::MemoryOnly && self.loaded {
            return Ok(self.memory.clone());
        }

        let record: Option<CheckpointRecord> = read_json(&self.path).await.map_err(|e| {
            MigrationError::State(format!(
                "checkpoint {} is unreadable ({}); fix or remove it before resuming",
                self.path.display(),
                e
            ))
        })?;

        if let Some(record) = &record {
            debug!(
                path = %self.path.display(),
                completed = ?record.completed_phases,
                "Loaded checkpoint"
            );
        }

        self.loaded = true;
        self.memory = record.clone();
        Ok(record)
    }

    pub async fn save(&mut self, record: &CheckpointRecord) -> MigrationResult<()> {
        self.memory = Some(record.clone());
        self.loaded = true;

        if self.persistence == Persistence::File {
            write_json_atomic(&self.path, record).await?;
        }
        Ok(())
    }

    /// Forget all progress (only after a validated full success)
    pub async fn clear(&mut self) -> MigrationResult<()> {
        self.memory = None;
        self.loaded = true;

        if self.persistence == Persistence::File && remove_artifact(&self.path).await? {
            info!(path = %self.path.display(), "Checkpoint cleared");
        }
        Ok(())
    }
}
