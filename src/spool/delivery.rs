//! Spooled deliveries and their marker files.

use std::fs::OpenOptions;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DeliveryId;
use crate::webhooks::WebhookEvent;

use super::fsync::{fsync_dir, write_atomic};

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("spool I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("spool JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate delivery ID: {0}")]
    DuplicateDelivery(DeliveryId),

    /// Contains path separators or would be a hidden file.
    #[error("invalid delivery ID: {0}")]
    InvalidDeliveryId(DeliveryId),
}

pub type Result<T> = std::result::Result<T, SpoolError>;

fn validate_delivery_id(delivery_id: &DeliveryId) -> Result<()> {
    let id = delivery_id.as_str();
    let unsafe_id = id.is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\', '\0']);
    if unsafe_id {
        return Err(SpoolError::InvalidDeliveryId(delivery_id.clone()));
    }
    Ok(())
}

/// What is written to `<delivery-id>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpooledEvent {
    pub delivery_id: DeliveryId,
    pub received_at: DateTime<Utc>,
    pub event: WebhookEvent,
}

/// Redelivery bookkeeping, kept in `<delivery-id>.json.retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    /// Failed attempts so far.
    pub attempts: u32,
    /// The delivery is not claimed again before this instant.
    pub not_before: DateTime<Utc>,
}

/// A delivery in the spool directory.
///
/// ```text
/// <id>.json        payload, pending
/// <id>.json.proc   claimed by a worker
/// <id>.json.retry  failed before, with the earliest next attempt
/// <id>.json.done   finished (handled, acknowledged or abandoned)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpooledDelivery {
    pub delivery_id: DeliveryId,
    pub payload_path: PathBuf,
    pub spool_dir: PathBuf,
}

impl SpooledDelivery {
    pub fn new(spool_dir: &Path, delivery_id: DeliveryId) -> Self {
        let payload_path = spool_dir.join(format!("{}.json", delivery_id.as_str()));
        SpooledDelivery {
            delivery_id,
            payload_path,
            spool_dir: spool_dir.to_path_buf(),
        }
    }

    pub fn proc_marker_path(&self) -> PathBuf {
        self.payload_path.with_extension("json.proc")
    }

    pub fn done_marker_path(&self) -> PathBuf {
        self.payload_path.with_extension("json.done")
    }

    pub fn retry_path(&self) -> PathBuf {
        self.payload_path.with_extension("json.retry")
    }

    fn temp_path(&self) -> PathBuf {
        self.payload_path.with_extension("json.tmp")
    }

    fn retry_temp_path(&self) -> PathBuf {
        self.payload_path.with_extension("json.retry.tmp")
    }

    /// Payload present and not finished. May be claimed.
    pub fn is_pending(&self) -> bool {
        self.payload_path.exists() && !self.is_done()
    }

    pub fn is_processing(&self) -> bool {
        self.proc_marker_path().exists() && !self.is_done()
    }

    pub fn is_done(&self) -> bool {
        self.done_marker_path().exists()
    }

    pub fn read_event(&self) -> Result<SpooledEvent> {
        let bytes = std::fs::read(&self.payload_path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// `None` if the delivery has never failed.
    pub fn retry_state(&self) -> Result<Option<RetryState>> {
        match std::fs::read(self.retry_path()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn write_retry_state(&self, state: &RetryState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        write_atomic(
            &self.spool_dir,
            &self.retry_temp_path(),
            &self.retry_path(),
            &bytes,
        )?;
        Ok(())
    }

    /// Whether a previous failure's backoff has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .retry_state()?
            .is_none_or(|state| state.not_before <= now))
    }
}

/// Writes a delivery to the spool durably.
///
/// A delivery ID that is already spooled, in any state, is rejected with
/// [`SpoolError::DuplicateDelivery`].
pub fn spool_delivery(spool_dir: &Path, event: &SpooledEvent) -> Result<SpooledDelivery> {
    validate_delivery_id(&event.delivery_id)?;
    std::fs::create_dir_all(spool_dir)?;

    let delivery = SpooledDelivery::new(spool_dir, event.delivery_id.clone());
    if delivery.payload_path.exists() || delivery.is_done() {
        return Err(SpoolError::DuplicateDelivery(event.delivery_id.clone()));
    }

    let bytes = serde_json::to_vec(event)?;
    write_atomic(
        spool_dir,
        &delivery.temp_path(),
        &delivery.payload_path,
        &bytes,
    )?;
    Ok(delivery)
}

/// Claims a delivery for processing.
///
/// Returns `false` if it was already claimed.
pub fn mark_processing(delivery: &SpooledDelivery) -> Result<bool> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(delivery.proc_marker_path())
    {
        Ok(_) => {
            fsync_dir(&delivery.spool_dir)?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Idempotent.
pub fn mark_done(delivery: &SpooledDelivery) -> Result<()> {
    let path = delivery.done_marker_path();
    if path.exists() {
        return Ok(());
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    fsync_dir(&delivery.spool_dir)?;
    Ok(())
}

/// Puts a claimed delivery back so it can be claimed again.
pub(crate) fn unclaim(delivery: &SpooledDelivery) -> Result<()> {
    match std::fs::remove_file(delivery.proc_marker_path()) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    fsync_dir(&delivery.spool_dir)?;
    Ok(())
}

/// Removes a delivery and all its marker files. Missing files are fine.
pub fn remove_delivery(delivery: &SpooledDelivery) -> Result<()> {
    for path in [
        delivery.done_marker_path(),
        delivery.proc_marker_path(),
        delivery.retry_path(),
        delivery.retry_temp_path(),
        delivery.temp_path(),
        delivery.payload_path.clone(),
    ] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    fsync_dir(&delivery.spool_dir)?;
    Ok(())
}
