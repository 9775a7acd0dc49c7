//! Crash-safe redo journal (spec component C2).
//!
//! Every mutation accepted by the volume-group store ([`crate::vg`]) is
//! first appended here before being applied. Appends are durable the
//! moment [`Journal::push`] returns; application runs on a background task
//! so a slow applier never blocks the caller, and the returned [`Wait`]
//! handle lets a caller block until its specific op has actually been
//! applied.
//!
//! # Crash safety
//!
//! [`Journal::start`] replays every op between the ring's durable consumer
//! position and its durable producer position before returning: an op that
//! was appended but never applied survives a crash and is re-applied
//! exactly once on restart. The consumer position only advances after
//! `apply_fn` returns `Ok`, so `apply_fn` must be idempotent — re-applying
//! `FreeAllocation` for an already-freed extent range is a no-op, not an
//! error.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::JournalError;
use crate::ring::{Consumer, Producer, DEFAULT_RING_CAPACITY};

/// Summary of the replay pass performed when a journal is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Number of ops successfully re-applied.
    pub applied: u64,
}

/// Returned by [`Journal::push`]; resolves once the background applier task
/// has applied the pushed op.
pub struct Wait {
    target: u64,
    last_applied: watch::Receiver<u64>,
}

impl Wait {
    /// Blocks until the pushed op has been applied.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ApplyFailed`] if the applier task halted
    /// (apply or advance failed) before reaching the target position.
    pub async fn wait(mut self) -> Result<(), JournalError> {
        loop {
            if *self.last_applied.borrow() >= self.target {
                return Ok(());
            }
            self.last_applied.changed().await.map_err(|_| JournalError::ApplyFailed {
                offset: self.target,
                reason: "applier task halted".to_string(),
            })?;
        }
    }
}

/// A crash-safe append-only journal of ops of type `Op`.
pub struct Journal<Op> {
    producer: Producer,
    notify: Arc<Notify>,
    last_applied: watch::Receiver<u64>,
    applier: JoinHandle<()>,
    _marker: PhantomData<Op>,
}

impl<Op> Journal<Op>
where
    Op: Serialize + DeserializeOwned + Send + 'static,
{
    /// Opens (creating if absent) the journal at `path`, replays any ops
    /// left unapplied by a previous crash, and spawns the background
    /// applier task.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the backing ring cannot be opened or
    /// created, or if replay hits a corrupt record or a fatal apply error.
    pub fn start<F>(path: impl AsRef<Path>, apply_fn: F) -> Result<(Self, ReplaySummary), JournalError>
    where
        F: Fn(&Op) -> Result<(), JournalError> + Send + Sync + 'static,
    {
        let path = path.as_ref();
        let apply_fn = Arc::new(apply_fn);

        let producer = if path.exists() {
            Producer::attach(path)?
        } else {
            Producer::create(path, DEFAULT_RING_CAPACITY)?
        };
        let mut consumer = Consumer::attach(path)?;

        let summary = Self::replay(&mut consumer, apply_fn.as_ref())?;
        info!(applied = summary.applied, "journal replay complete");

        let (applied_tx, applied_rx) = watch::channel(consumer.position());
        let notify = Arc::new(Notify::new());
        let applier = tokio::spawn(Self::run_applier(consumer, apply_fn, notify.clone(), applied_tx));

        Ok((
            Self { producer, notify, last_applied: applied_rx, applier, _marker: PhantomData },
            summary,
        ))
    }

    fn replay<F>(consumer: &mut Consumer, apply_fn: &F) -> Result<ReplaySummary, JournalError>
    where
        F: Fn(&Op) -> Result<(), JournalError>,
    {
        let (new_pos, result) = consumer.fold(Ok(ReplaySummary::default()), |acc, bytes| {
            let acc = acc?;
            let op: Op = serde_json::from_slice(bytes)
                .map_err(|e| JournalError::CorruptRecord { reason: e.to_string() })?;
            apply_fn(&op)?;
            Ok(ReplaySummary { applied: acc.applied + 1 })
        });
        let summary = result?;
        consumer.advance(new_pos)?;
        Ok(summary)
    }

    async fn run_applier<F>(
        mut consumer: Consumer,
        apply_fn: Arc<F>,
        notify: Arc<Notify>,
        applied_tx: watch::Sender<u64>,
    ) where
        F: Fn(&Op) -> Result<(), JournalError>,
    {
        loop {
            notify.notified().await;

            let (new_pos, result) = consumer.fold(Ok(()), |acc, bytes| {
                acc?;
                let op: Op = serde_json::from_slice(bytes)
                    .map_err(|e| JournalError::CorruptRecord { reason: e.to_string() })?;
                apply_fn(&op)
            });

            if let Err(e) = result {
                error!(error = %e, "journal apply failed, halting applier");
                return;
            }
            if let Err(e) = consumer.advance(new_pos) {
                error!(error = %e, "failed to advance journal consumer position, halting applier");
                return;
            }
            let _ = applied_tx.send(new_pos);
            debug!(position = new_pos, "journal applier caught up");
        }
    }

    /// Appends `op` to the journal and returns once the append is durable.
    /// The returned [`Wait`] resolves once the background applier has
    /// applied it.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if serialization or the durable append
    /// fails.
    pub fn push(&mut self, op: &Op) -> Result<Wait, JournalError> {
        let bytes = serde_json::to_vec(op)
            .map_err(|e| JournalError::CorruptRecord { reason: e.to_string() })?;
        let pos = self.producer.push(&bytes)?;
        self.producer.advance(pos)?;
        self.notify.notify_one();
        Ok(Wait { target: pos, last_applied: self.last_applied.clone() })
    }

    /// Waits for the applier to catch up to the last durably appended
    /// position, then stops the applier task. Called during daemon
    /// shutdown so nothing pushed before shutdown is left unapplied.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ApplyFailed`] if the applier task already
    /// halted before catching up (a prior apply failure); the journal is
    /// closed regardless.
    pub async fn shutdown(&mut self) -> Result<(), JournalError> {
        let target = self.producer.position();
        let result = loop {
            if *self.last_applied.borrow() >= target {
                break Ok(());
            }
            if self.last_applied.changed().await.is_err() {
                break Err(JournalError::ApplyFailed {
                    offset: target,
                    reason: "applier task halted before shutdown caught up".to_string(),
                });
            }
        };
        self.applier.abort();
        result
    }
}

impl<Op> Drop for Journal<Op> {
    fn drop(&mut self) {
        self.applier.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[tokio::test]
    async fn push_applies_and_wait_resolves() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.ring");
        let applied: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let applied_clone = applied.clone();

        let (mut journal, summary) = Journal::<u32>::start(&path, move |op| {
            applied_clone.lock().unwrap().push(*op);
            Ok(())
        })
        .unwrap();
        assert_eq!(summary.applied, 0);

        let wait = journal.push(&7).unwrap();
        wait.wait().await.unwrap();

        assert_eq!(*applied.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn replay_reapplies_unapplied_ops_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.ring");

        {
            // Append without ever applying: simulate a crash right after the
            // durable append but before the background applier ran.
            let mut producer = Producer::create(&path, DEFAULT_RING_CAPACITY).unwrap();
            let bytes = serde_json::to_vec(&99u32).unwrap();
            let pos = producer.push(&bytes).unwrap();
            producer.advance(pos).unwrap();
        }

        let count = Arc::new(AtomicU64::new(0));
        let count_clone = count.clone();
        let (_journal, summary) = Journal::<u32>::start(&path, move |_op| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        assert_eq!(summary.applied, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_pending_pushes_to_apply() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.ring");
        let applied: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let applied_clone = applied.clone();

        let (mut journal, _) = Journal::<u32>::start(&path, move |op| {
            applied_clone.lock().unwrap().push(*op);
            Ok(())
        })
        .unwrap();

        journal.push(&1).unwrap();
        journal.push(&2).unwrap();
        journal.shutdown().await.unwrap();

        assert_eq!(*applied.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn fatal_apply_error_fails_pending_wait() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.ring");

        let (mut journal, _) = Journal::<u32>::start(&path, |_op| {
            Err(JournalError::ApplyFailed { offset: 0, reason: "boom".to_string() })
        })
        .unwrap();

        let wait = journal.push(&1).unwrap();
        assert!(wait.wait().await.is_err());
    }
}
