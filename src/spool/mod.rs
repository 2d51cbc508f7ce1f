//! Durable webhook queue on the local filesystem.
//!
//! Each accepted delivery is one JSON file named after its delivery ID.
//! Workers claim a delivery with a `.proc` marker and finish it with a
//! `.done` marker; a delivery whose handler asks for a retry gets a `.retry`
//! file holding its attempt count and backoff deadline.
//!
//! # Crash safety
//!
//! - Payloads and retry state are written to a temp file, synced, renamed
//!   and the directory synced.
//! - Markers are empty, so creating one is all-or-nothing.
//! - A `.proc` without a `.done` at startup is a delivery the previous run
//!   never finished; [`cleanup_interrupted_processing`] makes it pending
//!   again.
//!
//! Delivery IDs double as the duplicate check: the remote host resends a
//! failed delivery under the same ID, and a second spool attempt is
//! rejected until the finished delivery has been swept.

pub mod delivery;
pub mod drain;
mod fsync;

pub use delivery::{
    RetryState, SpoolError, SpooledDelivery, SpooledEvent, mark_done, mark_processing,
    remove_delivery, spool_delivery,
};
pub use drain::{
    Release, cleanup_done_deliveries, cleanup_interrupted_processing, count_pending,
    drain_pending, release_for_retry,
};
