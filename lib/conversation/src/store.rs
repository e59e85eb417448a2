//! Participant key-value store.
//!
//! Flat JSON files under the data directory: one record per side, plus the
//! pending system-instruction change while one exists. Records are read and
//! written whole; last write wins.

use crate::error::{NegotiationError, StoreError};
use chrono::{DateTime, Local};
use colloquy_core::Side;
use rootcause::prelude::Report;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

const PENDING_FILE: &str = "pending_system_instructions.json";
const DEV_NOTES_FILE: &str = "dev_notes.md";

/// Persistent per-side memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantData {
    /// Free-form notes the side keeps for itself.
    #[serde(default)]
    pub personal_notes: String,
    /// Agreed addendum to both sides' system prompts.
    #[serde(default)]
    pub additional_system_instructions: String,
}

/// A proposed change to the shared instruction addendum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInstructionChange {
    /// The proposed addendum.
    pub instructions: String,
    /// Who proposed it.
    pub requested_by: Side,
    /// When it was proposed.
    pub created_at: DateTime<Local>,
}

/// File-backed store for participant records.
#[derive(Debug, Clone)]
pub struct ParticipantStore {
    data_dir: PathBuf,
}

impl ParticipantStore {
    /// Creates a store rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Returns the data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn participant_path(&self, side: Side) -> PathBuf {
        self.data_dir.join(format!("participant_{}.json", side.as_str()))
    }

    fn pending_path(&self) -> PathBuf {
        self.data_dir.join(PENDING_FILE)
    }

    /// Returns the developer notes file.
    #[must_use]
    pub fn dev_notes_path(&self) -> PathBuf {
        self.data_dir.join(DEV_NOTES_FILE)
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, Report<StoreError>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::ReadFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        };
        let value = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(value))
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), Report<StoreError>> {
        let write_failed = |reason: String| StoreError::WriteFailed {
            path: path.display().to_string(),
            reason,
        };
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| write_failed(e.to_string()))?;
        let body = serde_json::to_string_pretty(value).map_err(|e| write_failed(e.to_string()))?;
        tokio::fs::write(path, body)
            .await
            .map_err(|e| write_failed(e.to_string()))?;
        Ok(())
    }

    /// Loads a side's record, creating an empty one on first use.
    #[instrument(skip(self))]
    pub async fn load(&self, side: Side) -> Result<ParticipantData, Report<StoreError>> {
        let path = self.participant_path(side);
        match Self::read_json(&path).await? {
            Some(data) => Ok(data),
            None => {
                let data = ParticipantData::default();
                self.write_json(&path, &data).await?;
                debug!(%side, "created empty participant record");
                Ok(data)
            }
        }
    }

    /// Overwrites a side's record.
    #[instrument(skip(self, data))]
    pub async fn save(&self, side: Side, data: &ParticipantData) -> Result<(), Report<StoreError>> {
        self.write_json(&self.participant_path(side), data).await
    }

    /// Loads the pending change, if any.
    pub async fn load_pending(&self) -> Result<Option<PendingInstructionChange>, Report<StoreError>> {
        Self::read_json(&self.pending_path()).await
    }

    async fn save_pending(&self, pending: &PendingInstructionChange) -> Result<(), Report<StoreError>> {
        self.write_json(&self.pending_path(), pending).await
    }

    async fn clear_pending(&self) -> Result<(), Report<StoreError>> {
        let path = self.pending_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    /// Appends a dated entry to the developer notes file.
    #[instrument(skip(self, notes))]
    pub async fn append_dev_notes(&self, side: Side, notes: &str) -> Result<(), Report<StoreError>> {
        let path = self.dev_notes_path();
        let write_failed = |e: std::io::Error| StoreError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(write_failed)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(write_failed)?;
        let entry = format!(
            "## {} ({})\n\n{}\n\n",
            Local::now().to_rfc3339(),
            side.display_name(),
            notes.trim()
        );
        file.write_all(entry.as_bytes()).await.map_err(write_failed)?;
        file.flush().await.map_err(write_failed)?;
        Ok(())
    }
}

/// Where the negotiation stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    /// No proposal is waiting.
    Idle,
    /// A proposal waits for the other side.
    Proposed(PendingInstructionChange),
}

/// The two-phase protocol for changing the shared instruction addendum.
///
/// `Idle -> Proposed(by) -> committed (Idle again)`. At most one proposal is
/// outstanding, and only the side that did not propose can commit it.
/// Commit writes the addendum to both records before clearing the proposal.
#[derive(Debug, Clone)]
pub struct InstructionNegotiation {
    store: ParticipantStore,
}

fn storage(e: Report<StoreError>) -> NegotiationError {
    NegotiationError::Storage {
        reason: e.to_string(),
    }
}

impl InstructionNegotiation {
    /// Creates the protocol over a store.
    #[must_use]
    pub fn new(store: ParticipantStore) -> Self {
        Self { store }
    }

    /// Returns the current state.
    pub async fn state(&self) -> Result<NegotiationState, Report<NegotiationError>> {
        Ok(match self.store.load_pending().await.map_err(storage)? {
            Some(pending) => NegotiationState::Proposed(pending),
            None => NegotiationState::Idle,
        })
    }

    /// Proposes a new addendum on behalf of `side`.
    #[instrument(skip(self, instructions))]
    pub async fn propose(
        &self,
        side: Side,
        instructions: &str,
    ) -> Result<PendingInstructionChange, Report<NegotiationError>> {
        if let NegotiationState::Proposed(pending) = self.state().await? {
            return Err(NegotiationError::AlreadyPending {
                requested_by: pending.requested_by,
            }
            .into());
        }
        let pending = PendingInstructionChange {
            instructions: instructions.to_string(),
            requested_by: side,
            created_at: Local::now(),
        };
        self.store.save_pending(&pending).await.map_err(storage)?;
        info!(%side, "system instruction change proposed");
        Ok(pending)
    }

    /// Commits the pending proposal on behalf of `side`.
    #[instrument(skip(self))]
    pub async fn agree(&self, side: Side) -> Result<String, Report<NegotiationError>> {
        let pending = match self.state().await? {
            NegotiationState::Idle => return Err(NegotiationError::NothingPending.into()),
            NegotiationState::Proposed(pending) => pending,
        };
        if pending.requested_by == side {
            return Err(NegotiationError::OwnProposal { side }.into());
        }

        for participant in Side::ALL {
            let mut data = self.store.load(participant).await.map_err(storage)?;
            data.additional_system_instructions = pending.instructions.clone();
            self.store.save(participant, &data).await.map_err(storage)?;
        }
        self.store.clear_pending().await.map_err(storage)?;
        info!(%side, proposer = %pending.requested_by, "system instruction change committed");
        Ok(pending.instructions)
    }
}
