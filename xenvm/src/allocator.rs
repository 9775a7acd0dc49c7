//! Periodic free-pool top-up controller (spec component C5).
//!
//! Runs on a fixed tick (default every five seconds) as three phases, each
//! sweeping every connected host before the next phase starts:
//!
//! 1. **resend** — re-push the last grant a host received, in case its
//!    `H-fromLVM` ring file was recreated since;
//! 2. **top-up** — if the host's private free pool has dropped below its
//!    configured low-water mark, allocate another quantum of extents from
//!    the shared pool and grant them;
//! 3. **flush** — drain the host's `H-toLVM` ring, transferring any extents
//!    it assigned to named LVs out of its free pool.
//!
//! The set of connected hosts is fixed once at the start of the tick, so a
//! host that connects or disconnects mid-tick is picked up (or not) only on
//! the next one.
//!
//! Top-up is the one phase that goes through [`crate::journal`] rather than
//! mutating the VG directly: the allocation decision (which exact extents to
//! grant) is made once, journalled, and only then applied — so a crash
//! between the journal append and the VG write/ring push is recovered by
//! replaying the same exact segments on restart, rather than re-running
//! first-fit against whatever the VG looks like after the crash.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::host::HostRegistry;
use crate::host::HostState;
use crate::journal::Journal;
use crate::vg::{AllocOutcome, Op, VgStore};

/// Default interval between top-up ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Tunables for the top-up controller.
#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
    /// Extents granted per top-up.
    pub allocation_quantum_extents: u64,
    /// Free-extent threshold below which a host is topped up.
    pub low_water_mark_extents: u64,
    /// Interval between ticks.
    pub tick_interval: Duration,
}

/// Shared handle to the daemon's redo journal, used by the top-up
/// controller to push `ExpandLv` ops for the host's `H-free` LV.
pub type JournalHandle = Arc<AsyncMutex<Journal<Op>>>;

/// Runs the periodic resend/top-up/flush pass over every connected host.
pub struct AllocatorController {
    hosts: Arc<HostRegistry>,
    vg: Arc<VgStore>,
    journal: JournalHandle,
    config: AllocatorConfig,
}

impl AllocatorController {
    /// Builds a controller over `hosts` with the given tunables.
    pub fn new(hosts: Arc<HostRegistry>, vg: Arc<VgStore>, journal: JournalHandle, config: AllocatorConfig) -> Self {
        Self { hosts, vg, journal, config }
    }

    /// Spawns the controller's tick loop as a background task. Aborting the
    /// returned handle stops future ticks.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.tick_interval);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }

    /// Runs one tick: all resends, then all top-ups, then all flushes,
    /// across every connected host, in that order.
    pub async fn tick(&self) {
        let connected: Vec<String> = {
            let hosts = self.hosts.lock();
            HostRegistry::names(&hosts)
                .into_iter()
                .filter(|name| HostRegistry::state_of(&hosts, name) == Some(HostState::Connected))
                .collect()
        };

        for name in &connected {
            self.resend(name);
        }
        for name in &connected {
            self.top_up(name).await;
        }
        for name in &connected {
            self.flush(name);
        }
    }

    fn resend(&self, name: &str) {
        let mut hosts = self.hosts.lock();
        if let Err(e) = HostRegistry::resend_already_locked(&mut hosts, name) {
            warn!(host = name, error = %e, "resend failed");
        }
    }

    async fn top_up(&self, name: &str) {
        let suspended = {
            let hosts = self.hosts.lock();
            HostRegistry::from_lvm_suspended(&hosts, name)
        };
        if suspended {
            // A grant pushed onto a suspended ring would be rejected, and a
            // rejected grant would leave the journal's apply_fn unable to
            // make progress. Skip this tick; resend above already attempted
            // to resynchronise the host, and the next tick retries once it
            // has resumed.
            debug!(host = name, "fromLVM suspended, deferring top-up");
            return;
        }

        let free = self.hosts.host_free_extents(name);
        if free >= self.config.low_water_mark_extents {
            return;
        }

        let outcome = self.vg.try_allocate(self.config.allocation_quantum_extents);
        let segments = match outcome {
            AllocOutcome::Allocated(segments) => segments,
            AllocOutcome::OnlyThisMuchFree(k) => {
                warn!(host = name, available = k, quantum = self.config.allocation_quantum_extents,
                      "not enough contiguous free space for a full top-up, skipping this tick");
                return;
            }
        };

        let op = Op::ExpandLv { name: HostRegistry::free_lv_name(name), extents: segments.clone() };
        let extent_count: u64 = segments.iter().map(|&(_, len)| len).sum();

        let wait = {
            let mut journal = self.journal.lock().await;
            match journal.push(&op) {
                Ok(wait) => wait,
                Err(e) => {
                    warn!(host = name, error = %e, "failed to journal top-up");
                    return;
                }
            }
        };

        match wait.wait().await {
            Ok(()) => debug!(host = name, extents = extent_count, "topped up"),
            Err(e) => warn!(host = name, error = %e, "top-up journal entry failed to apply"),
        }
    }

    fn flush(&self, name: &str) {
        let mut hosts = self.hosts.lock();
        match self.hosts.flush_already_locked(&mut hosts, name) {
            Ok(summary) if summary.requests_drained > 0 => {
                debug!(host = name, drained = summary.requests_drained, transferred = summary.extents_transferred, "flushed");
            }
            Ok(_) => {}
            Err(e) => warn!(host = name, error = %e, "flush failed"),
        }
    }
}

/// Applies a [`Op`] replayed or freshly pushed through the journal: a plain
/// VG mutation, plus — for an `ExpandLv` targeting a host's `H-free` LV — a
/// grant push onto that host's `H-fromLVM` ring. Idempotent on both halves:
/// [`VgStore::apply`] treats extents already present as a no-op, and the
/// host-side consumer of `H-fromLVM` is expected to tolerate a duplicate
/// grant.
pub fn apply_op(vg: &VgStore, hosts: &HostRegistry, op: &Op) -> Result<(), crate::error::JournalError> {
    vg.apply(op).map_err(|e| crate::error::JournalError::ApplyFailed { offset: 0, reason: e.to_string() })?;

    if let Op::ExpandLv { name, extents } = op
        && let Some(host) = name.strip_prefix("H-free-")
    {
        let extent_count: u64 = extents.iter().map(|&(_, len)| len).sum();
        hosts.push_grant_exact(host, extent_count).map_err(|e| crate::error::JournalError::ApplyFailed {
            offset: 0,
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use tempfile::tempdir;

    fn setup() -> (StdArc<HostRegistry>, StdArc<VgStore>, AllocatorController) {
        let vg_dir = tempdir().unwrap();
        let ring_dir = tempdir().unwrap();
        let journal_dir = tempdir().unwrap();
        let vg = StdArc::new(VgStore::open(vg_dir.path().join("vg.json"), "vg0", 1000).unwrap());
        let ring_path = ring_dir.path().to_path_buf();
        std::mem::forget(ring_dir);
        let hosts = StdArc::new(HostRegistry::new(vg.clone(), ring_path));

        let vg_for_apply = vg.clone();
        let hosts_for_apply = hosts.clone();
        let (journal, _summary) = Journal::<Op>::start(journal_dir.path().join("journal.ring"), move |op| {
            apply_op(&vg_for_apply, &hosts_for_apply, op)
        })
        .unwrap();
        std::mem::forget(journal_dir);

        let config = AllocatorConfig {
            allocation_quantum_extents: 10,
            low_water_mark_extents: 5,
            tick_interval: Duration::from_secs(5),
        };
        let controller =
            AllocatorController::new(hosts.clone(), vg.clone(), Arc::new(AsyncMutex::new(journal)), config);
        (hosts, vg, controller)
    }

    #[tokio::test]
    async fn tick_tops_up_a_connected_host_below_water_mark() {
        let (hosts, _vg, controller) = setup();
        hosts.create("host-a").unwrap();
        hosts.connect("host-a").unwrap();

        controller.tick().await;

        // create() seeds H-free with 1 extent; the tick tops it up by one
        // 10-extent quantum on top of that.
        assert_eq!(hosts.host_free_extents("host-a"), 11);
    }

    #[tokio::test]
    async fn tick_skips_disconnected_hosts() {
        let (hosts, _vg, controller) = setup();
        hosts.create("host-a").unwrap();

        controller.tick().await;

        // Unaffected by the tick (host isn't connected); still just the
        // single extent create() seeded.
        assert_eq!(hosts.host_free_extents("host-a"), 1);
    }

    #[tokio::test]
    async fn tick_does_not_top_up_above_water_mark() {
        let (hosts, _vg, controller) = setup();
        hosts.create("host-a").unwrap();
        hosts.connect("host-a").unwrap();
        hosts.grant("host-a", 5).unwrap();

        controller.tick().await;

        // 1 from create() + 5 from the explicit grant = 6, already at or
        // above the 5-extent low-water mark, so no top-up happens.
        assert_eq!(hosts.host_free_extents("host-a"), 6);
    }

    #[tokio::test]
    async fn tick_skips_host_when_only_partial_space_is_free() {
        let (hosts, vg, controller) = setup();
        // Consume all but 3 extents of the 1000-extent VG, leaving less
        // than the 10-extent quantum available.
        vg.create_lv("filler", 997).unwrap();
        hosts.create("host-a").unwrap();
        hosts.connect("host-a").unwrap();

        controller.tick().await;

        // create() claimed 1 of the remaining 3 extents; the other 2 are
        // not enough for a 10-extent quantum, so the top-up is skipped.
        assert_eq!(hosts.host_free_extents("host-a"), 1);
    }
}
