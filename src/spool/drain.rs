//! Finding work in the spool, putting failed work back and sweeping
//! finished work away.

use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::github::RetryConfig;
use crate::types::DeliveryId;

use super::delivery::{Result, RetryState, SpooledDelivery, mark_done, remove_delivery, unclaim};
use super::fsync::fsync_dir;

/// Deliveries ready to be claimed: pending, not claimed, and past any retry
/// backoff. Sorted by delivery ID.
///
/// Does not touch `.proc` markers; see [`cleanup_interrupted_processing`].
pub fn drain_pending(spool_dir: &Path, now: DateTime<Utc>) -> Result<Vec<SpooledDelivery>> {
    if !spool_dir.exists() {
        return Ok(Vec::new());
    }

    let mut ready = Vec::new();
    for entry in std::fs::read_dir(spool_dir)? {
        let path = entry?.path();
        if !path.extension().is_some_and(|e| e == "json") {
            continue;
        }
        let Some(delivery_id) = delivery_id_from_payload(&path) else {
            continue;
        };
        let delivery = SpooledDelivery::new(spool_dir, delivery_id);
        if delivery.is_pending() && !delivery.proc_marker_path().exists() && delivery.is_due(now)? {
            ready.push(delivery);
        }
    }

    ready.sort_by(|a, b| a.delivery_id.as_str().cmp(b.delivery_id.as_str()));
    Ok(ready)
}

/// Removes `.proc` markers left by a previous run that stopped mid-delivery,
/// making those deliveries pending again.
///
/// Only call this before any worker starts: a live worker's claim would be
/// dropped and its delivery handled twice.
pub fn cleanup_interrupted_processing(spool_dir: &Path) -> Result<usize> {
    if !spool_dir.exists() {
        return Ok(0);
    }

    let mut recovered = 0;
    for entry in std::fs::read_dir(spool_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "proc")
            && !path.with_extension("done").exists()
            && std::fs::remove_file(&path).is_ok()
        {
            recovered += 1;
        }
    }

    if recovered > 0 {
        fsync_dir(spool_dir)?;
        info!(recovered, "recovered interrupted deliveries");
    }
    Ok(recovered)
}

/// What happened to a delivery whose handler asked for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Pending again, not claimable before `not_before`.
    Scheduled {
        attempts: u32,
        not_before: DateTime<Utc>,
    },
    /// Out of attempts; marked done.
    Abandoned { attempts: u32 },
}

/// Returns a claimed delivery to the spool after a failed attempt.
///
/// The `n`th failure waits `config.delay_for_attempt(n - 1)`. Once
/// `config.max_attempts()` attempts have failed, the delivery is abandoned.
pub fn release_for_retry(
    delivery: &SpooledDelivery,
    config: &RetryConfig,
    now: DateTime<Utc>,
) -> Result<Release> {
    let attempts = delivery
        .retry_state()?
        .map_or(0, |state| state.attempts)
        .saturating_add(1);

    if attempts >= config.max_attempts() {
        mark_done(delivery)?;
        return Ok(Release::Abandoned { attempts });
    }

    let delay = config.delay_for_attempt(attempts - 1);
    let not_before = now
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0));
    delivery.write_retry_state(&RetryState {
        attempts,
        not_before,
    })?;
    unclaim(delivery)?;
    debug!(delivery_id = %delivery.delivery_id, attempts, %not_before, "delivery scheduled for retry");
    Ok(Release::Scheduled {
        attempts,
        not_before,
    })
}

/// Number of deliveries not yet finished, claimed or not.
pub fn count_pending(spool_dir: &Path) -> Result<usize> {
    if !spool_dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(spool_dir)? {
        let path = entry?.path();
        if !path.extension().is_some_and(|e| e == "json") {
            continue;
        }
        if let Some(delivery_id) = delivery_id_from_payload(&path) {
            if SpooledDelivery::new(spool_dir, delivery_id).is_pending() {
                count += 1;
            }
        }
    }
    Ok(count)
}

/// Removes finished deliveries whose `.done` marker is older than
/// `grace_period`. Returns how many were removed.
pub fn cleanup_done_deliveries(spool_dir: &Path, grace_period: Duration) -> Result<usize> {
    if !spool_dir.exists() {
        return Ok(0);
    }

    let cutoff = SystemTime::now()
        .checked_sub(grace_period)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;

    for entry in std::fs::read_dir(spool_dir)? {
        let path = entry?.path();
        if !path.extension().is_some_and(|e| e == "done") {
            continue;
        }
        let old_enough = path
            .metadata()
            .and_then(|m| m.modified())
            .is_ok_and(|modified| modified < cutoff);
        if !old_enough {
            continue;
        }
        // <id>.json.done
        let Some(id) = path
            .file_stem()
            .and_then(|stem| Path::new(stem).file_stem())
            .and_then(|id| id.to_str())
        else {
            continue;
        };
        remove_delivery(&SpooledDelivery::new(spool_dir, DeliveryId::new(id)))?;
        removed += 1;
    }

    if removed > 0 {
        debug!(removed, "swept finished deliveries");
    }
    Ok(removed)
}

fn delivery_id_from_payload(path: &Path) -> Option<DeliveryId> {
    let stem = path.file_stem()?.to_str()?;
    Some(DeliveryId::new(stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::delivery::mark_processing;
    use crate::spool::delivery::spool_delivery;
    use crate::spool::delivery::tests::push_event;
    use tempfile::tempdir;

    fn ids(deliveries: &[SpooledDelivery]) -> Vec<&str> {
        deliveries.iter().map(|d| d.delivery_id.as_str()).collect()
    }

    #[test]
    fn drain_skips_claimed_and_done() {
        let dir = tempdir().unwrap();
        let spool = dir.path();
        let a = spool_delivery(spool, &push_event("a")).unwrap();
        let b = spool_delivery(spool, &push_event("b")).unwrap();
        spool_delivery(spool, &push_event("c")).unwrap();
        mark_processing(&a).unwrap();
        mark_done(&b).unwrap();

        assert_eq!(ids(&drain_pending(spool, Utc::now()).unwrap()), vec!["c"]);
        assert_eq!(count_pending(spool).unwrap(), 2);
    }

    #[test]
    fn drain_is_sorted() {
        let dir = tempdir().unwrap();
        for id in ["c", "a", "b"] {
            spool_delivery(dir.path(), &push_event(id)).unwrap();
        }
        assert_eq!(
            ids(&drain_pending(dir.path(), Utc::now()).unwrap()),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn missing_spool_dir_is_empty() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(drain_pending(&missing, Utc::now()).unwrap().is_empty());
        assert_eq!(cleanup_interrupted_processing(&missing).unwrap(), 0);
        assert_eq!(cleanup_done_deliveries(&missing, Duration::ZERO).unwrap(), 0);
    }

    #[test]
    fn interrupted_deliveries_are_recovered() {
        let dir = tempdir().unwrap();
        let spool = dir.path();
        let interrupted = spool_delivery(spool, &push_event("a")).unwrap();
        let finished = spool_delivery(spool, &push_event("b")).unwrap();
        mark_processing(&interrupted).unwrap();
        mark_processing(&finished).unwrap();
        mark_done(&finished).unwrap();

        assert_eq!(cleanup_interrupted_processing(spool).unwrap(), 1);
        assert_eq!(ids(&drain_pending(spool, Utc::now()).unwrap()), vec!["a"]);
        assert!(finished.proc_marker_path().exists());
    }

    #[test]
    fn retries_back_off_then_abandon() {
        let dir = tempdir().unwrap();
        let delivery = spool_delivery(dir.path(), &push_event("a")).unwrap();
        let config = RetryConfig::new(2, Duration::from_secs(5), Duration::from_secs(60), 2.0);
        let now = Utc::now();

        mark_processing(&delivery).unwrap();
        let first = release_for_retry(&delivery, &config, now).unwrap();
        assert_eq!(
            first,
            Release::Scheduled {
                attempts: 1,
                not_before: now + chrono::Duration::seconds(5)
            }
        );
        assert!(!delivery.is_processing());
        assert!(drain_pending(dir.path(), now).unwrap().is_empty());
        assert_eq!(
            drain_pending(dir.path(), now + chrono::Duration::seconds(5))
                .unwrap()
                .len(),
            1
        );

        mark_processing(&delivery).unwrap();
        let second = release_for_retry(&delivery, &config, now).unwrap();
        assert_eq!(
            second,
            Release::Scheduled {
                attempts: 2,
                not_before: now + chrono::Duration::seconds(10)
            }
        );

        mark_processing(&delivery).unwrap();
        assert_eq!(
            release_for_retry(&delivery, &config, now).unwrap(),
            Release::Abandoned { attempts: 3 }
        );
        assert!(delivery.is_done());
    }

    #[test]
    fn sweep_respects_grace_period() {
        let dir = tempdir().unwrap();
        let delivery = spool_delivery(dir.path(), &push_event("a")).unwrap();
        mark_done(&delivery).unwrap();

        assert_eq!(
            cleanup_done_deliveries(dir.path(), Duration::from_secs(3600)).unwrap(),
            0
        );
        assert!(delivery.payload_path.exists());

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(
            cleanup_done_deliveries(dir.path(), Duration::from_millis(1)).unwrap(),
            1
        );
        assert!(!delivery.payload_path.exists());
        assert!(!delivery.done_marker_path().exists());
    }
}
