//! Host registration and lifecycle management (spec component C4).
//!
//! Each host that attaches to the shared volume group gets a private
//! "H-free" logical volume — a pool of extents pre-allocated to it so it
//! can grow its own LVs without round-tripping to the daemon — plus a pair
//! of persistent rings: `H-toLVM`, through which the host reports usage
//! and requests more space, and `H-fromLVM`, through which the daemon
//! grants extents back. Both rings are regular [`crate::ring`] SPSC rings,
//! just with the host as the opposite end instead of another in-process
//! task.
//!
//! A host moves through a small lifecycle:
//!
//! ```text
//! Created --connect--> Connected --disconnect--> Disconnected --destroy--> Destroyed
//!              ^            |  ^
//!              |         suspend |
//!              |            v  resume
//!              +-------- Suspended
//! ```
//!
//! The registry's own `flush_mutex` guards its three in-memory maps (state,
//! `H-toLVM` consumers, `H-fromLVM` producers) and is always acquired
//! *before* any call into [`VgStore`], whose internal mutex is held only
//! for the duration of a single method call. Nesting only ever goes
//! flush-mutex-then-VG-mutex; the reverse would deadlock against the
//! free-pool top-up controller, which holds the flush mutex across an
//! entire tick.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::HostError;
use crate::ring::{Consumer, Producer, RingState, DEFAULT_RING_CAPACITY};
use crate::vg::VgStore;

/// A host's position in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostState {
    /// Registered, with an `H-free` LV and ring files, but not attached.
    Created,
    /// Attached; its queues are being serviced.
    Connected,
    /// Attached but backpressured; its `H-fromLVM` ring is suspended.
    Suspended,
    /// Was connected, is not now; its LV and ring files remain.
    Disconnected,
    /// Torn down; no longer present in the registry.
    Destroyed,
}

impl HostState {
    fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Connected => "connected",
            Self::Suspended => "suspended",
            Self::Disconnected => "disconnected",
            Self::Destroyed => "destroyed",
        }
    }
}

/// A message a host sends the daemon over its `H-toLVM` ring: a request to
/// grow a named LV by `segments`, drawn from the host's own private free
/// pool. This is the host-local allocator reporting usage back to the
/// daemon so the daemon's VG metadata (the authoritative copy) stays in
/// sync with extents the host has already handed out locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandVolume {
    /// Name of the LV being grown.
    pub volume_name: String,
    /// Extent segments, drawn from the host's `H-free` pool, now assigned
    /// to `volume_name`.
    pub segments: Vec<(u64, u64)>,
}

impl ExpandVolume {
    fn extent_count(&self) -> u64 {
        self.segments.iter().map(|&(_, len)| len).sum()
    }
}

/// A message the daemon sends a host over its `H-fromLVM` ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostGrant {
    /// Additional extents have been added to the host's private pool.
    Granted {
        /// Number of extents granted.
        extent_count: u64,
    },
}

/// Summary of one host's flush pass: `ExpandVolume` requests drained from
/// `H-toLVM` and applied to the VG.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Number of `H-toLVM` requests drained.
    pub requests_drained: u64,
    /// Total extents transferred from the host's free pool to named LVs.
    pub extents_transferred: u64,
}

/// A snapshot of one host's registration, for [`HostRegistry::all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostStatus {
    /// The host's name.
    pub name: String,
    /// The host's current lifecycle state.
    pub state: HostState,
    /// Whether the host's `H-toLVM` ring is currently suspended.
    pub to_lvm_suspended: bool,
    /// Whether the host's `H-fromLVM` ring is currently suspended.
    pub from_lvm_suspended: bool,
    /// The reserved name of the host's `H-free` LV.
    pub free_lv: String,
    /// Extents currently in the host's private free pool.
    pub free_extents: u64,
}

pub(crate) struct HostEntry {
    state: HostState,
    to_lvm: Consumer,
    from_lvm: Producer,
    last_granted: u64,
}

/// In-memory registry of every host known to the daemon, backed by
/// per-host ring files under `ring_dir` and a shared [`VgStore`] for
/// `H-free` LV accounting.
pub struct HostRegistry {
    flush_mutex: Mutex<BTreeMap<String, HostEntry>>,
    vg: Arc<VgStore>,
    ring_dir: PathBuf,
}

fn free_lv_name(host: &str) -> String {
    format!("H-free-{host}")
}

fn to_lvm_path(ring_dir: &Path, host: &str) -> PathBuf {
    ring_dir.join(format!("{host}.to-lvm.ring"))
}

fn from_lvm_path(ring_dir: &Path, host: &str) -> PathBuf {
    ring_dir.join(format!("{host}.from-lvm.ring"))
}

impl HostRegistry {
    /// Creates an empty registry rooted at `ring_dir` for per-host queue
    /// files.
    pub fn new(vg: Arc<VgStore>, ring_dir: impl Into<PathBuf>) -> Self {
        Self { flush_mutex: Mutex::new(BTreeMap::new()), vg, ring_dir: ring_dir.into() }
    }

    /// Acquires the registry's flush mutex for a multi-host, multi-phase
    /// pass (used by the free-pool top-up controller to run resend,
    /// top-up and flush across every host under a single lock).
    pub(crate) fn lock(&self) -> MutexGuard<'_, BTreeMap<String, HostEntry>> {
        self.flush_mutex.lock().expect("host registry mutex poisoned")
    }

    /// Registers a new host: creates its `H-free` LV, pre-seeded with the
    /// single extent a fresh host starts with, and its ring files, in state
    /// [`HostState::Created`]. If `H-free` already
    /// exists on disk (a prior `create` committed, possibly across a daemon
    /// restart that cleared the in-memory registry), attaches to the
    /// existing files instead of recreating them.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::AlreadyCreated`] if `name` is already
    /// registered *in this process's registry* (a concurrent `create` call,
    /// not a restart).
    pub fn create(&self, name: &str) -> Result<(), HostError> {
        let mut hosts = self.lock();
        if hosts.contains_key(name) {
            return Err(HostError::AlreadyCreated(name.to_string()));
        }

        let to_lvm_producer_path = to_lvm_path(&self.ring_dir, name);
        let from_lvm_ring_path = from_lvm_path(&self.ring_dir, name);

        // H-free's existence is the commit marker for the whole create: if
        // it is already there, a prior create ran to completion (or
        // crashed after creating it, which given the ordering below means
        // every earlier step also landed), and this call attaches to the
        // existing files instead of recreating them.
        let already_committed = self.vg.get_lv(&free_lv_name(name)).is_some();

        let (to_lvm, from_lvm) = if already_committed {
            (Consumer::attach(&to_lvm_producer_path)?, Producer::attach(&from_lvm_ring_path)?)
        } else {
            // The daemon is the consumer of H-toLVM and the producer of
            // H-fromLVM; the host side opens the complementary ends.
            let _ = Producer::create(&to_lvm_producer_path, DEFAULT_RING_CAPACITY)?;
            let to_lvm = Consumer::attach(&to_lvm_producer_path)?;
            let from_lvm = Producer::create(&from_lvm_ring_path, DEFAULT_RING_CAPACITY)?;
            // H-free is created last and only after both ring files are
            // durable, so a crash between here and the next line resumes,
            // on the next `create` call, by re-entering this branch rather
            // than failing on an LV that was never actually committed. It
            // starts at one extent, not zero: a fresh host is handed its
            // first extent immediately rather than waiting on the next
            // top-up tick.
            self.vg.create_lv(&free_lv_name(name), 1).map_err(HostError::from)?;
            (to_lvm, from_lvm)
        };

        hosts.insert(
            name.to_string(),
            HostEntry { state: HostState::Created, to_lvm, from_lvm, last_granted: 0 },
        );
        info!(host = name, already_committed, "host created");
        Ok(())
    }

    /// Transitions a host from `Created` or `Disconnected` to `Connected`.
    ///
    /// Resumes the `H-toLVM` consumer unconditionally, then observes
    /// `H-fromLVM`'s initial state — if it was suspended (a
    /// restarted local allocator resuming before the daemon noticed), the
    /// host's current free-pool allocation is re-pushed once it resumes, so
    /// the allocator sees the extents it already owns without waiting for
    /// the next top-up tick.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::HostNotCreated`] if `name` is unknown, or
    /// [`HostError::InvalidTransition`] if the host is not in a connectable
    /// state.
    pub fn connect(&self, name: &str) -> Result<(), HostError> {
        let mut hosts = self.lock();
        let entry = hosts.get_mut(name).ok_or_else(|| HostError::HostNotCreated(name.to_string()))?;
        match entry.state {
            HostState::Created | HostState::Disconnected => {
                entry.to_lvm.resume()?;
                let from_lvm_was_suspended = entry.from_lvm.state() == RingState::Suspended;
                entry.state = HostState::Connected;
                debug!(host = name, "host connected");
                if from_lvm_was_suspended && entry.last_granted > 0 {
                    let extent_count = entry.last_granted;
                    // Best-effort: if `H-fromLVM` is still suspended at this
                    // instant the push fails and the periodic top-up
                    // controller's resend phase covers it on the next tick
                    // instead.
                    if let Err(e) = Self::push_grant(entry, extent_count) {
                        debug!(host = name, error = %e, "resend-on-connect deferred to next tick");
                    }
                }
                Ok(())
            }
            other => Err(HostError::InvalidTransition {
                host: name.to_string(),
                from: other.name().to_string(),
                to: HostState::Connected.name().to_string(),
            }),
        }
    }

    /// Marks a connected host as suspended: the top-up controller skips a
    /// suspended host's resend/top-up/flush phases until it resumes.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::HostNotCreated`] if `name` is unknown, or
    /// [`HostError::InvalidTransition`] if the host is not connected.
    pub fn suspend(&self, name: &str) -> Result<(), HostError> {
        let mut hosts = self.lock();
        let entry = hosts.get_mut(name).ok_or_else(|| HostError::HostNotCreated(name.to_string()))?;
        if entry.state != HostState::Connected {
            return Err(HostError::InvalidTransition {
                host: name.to_string(),
                from: entry.state.name().to_string(),
                to: HostState::Suspended.name().to_string(),
            });
        }
        entry.state = HostState::Suspended;
        Ok(())
    }

    /// Resumes a suspended host back to `Connected`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::HostNotCreated`] if `name` is unknown, or
    /// [`HostError::InvalidTransition`] if the host is not suspended.
    pub fn resume(&self, name: &str) -> Result<(), HostError> {
        let mut hosts = self.lock();
        let entry = hosts.get_mut(name).ok_or_else(|| HostError::HostNotCreated(name.to_string()))?;
        if entry.state != HostState::Suspended {
            return Err(HostError::InvalidTransition {
                host: name.to_string(),
                from: entry.state.name().to_string(),
                to: HostState::Connected.name().to_string(),
            });
        }
        entry.state = HostState::Connected;
        Ok(())
    }

    /// Transitions a connected or suspended host to `Disconnected`: suspends
    /// the `H-toLVM` ring, drains it (any pending `ExpandVolume` requests
    /// are applied to the VG before this call returns), and marks the host
    /// disconnected. The host's LV and ring files are left intact so it can
    /// reconnect later. A no-op if `name` is not currently registered.
    ///
    /// # Errors
    ///
    /// Returns a host or VG error if suspending or draining the ring fails.
    pub fn disconnect(&self, name: &str) -> Result<(), HostError> {
        let mut hosts = self.lock();
        let Some(entry) = hosts.get_mut(name) else { return Ok(()) };
        entry.to_lvm.suspend()?;
        self.flush_already_locked(&mut hosts, name)?;
        let entry = hosts.get_mut(name).expect("checked above");
        entry.state = HostState::Disconnected;
        info!(host = name, "host disconnected");
        Ok(())
    }

    /// Tears a host down: removes its `H-free` LV and drops it from the
    /// registry. Ring files on disk are left for the caller to clean up.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::HostNotCreated`] if `name` is unknown, or
    /// [`HostError::InvalidTransition`] if the host is still connected.
    pub fn destroy(&self, name: &str) -> Result<(), HostError> {
        let mut hosts = self.lock();
        let entry = hosts.get(name).ok_or_else(|| HostError::HostNotCreated(name.to_string()))?;
        if entry.state == HostState::Connected || entry.state == HostState::Suspended {
            return Err(HostError::InvalidTransition {
                host: name.to_string(),
                from: entry.state.name().to_string(),
                to: HostState::Destroyed.name().to_string(),
            });
        }
        self.vg.remove_lv(&free_lv_name(name)).map_err(HostError::from)?;
        hosts.remove(name);
        info!(host = name, "host destroyed");
        Ok(())
    }

    /// Lists every currently attached host (`Connected` or `Suspended`),
    /// its current state, and its three reserved LV names (`H-toLVM`,
    /// `H-fromLVM`, `H-free`) for operational visibility. A `Disconnected`
    /// host is omitted, even though its LV and ring files remain on disk
    /// until `destroy`.
    pub fn all(&self) -> Vec<HostStatus> {
        self.lock()
            .iter()
            .filter(|(_, entry)| matches!(entry.state, HostState::Connected | HostState::Suspended))
            .map(|(name, entry)| HostStatus {
                name: name.clone(),
                state: entry.state,
                to_lvm_suspended: entry.to_lvm.state() == RingState::Suspended,
                from_lvm_suspended: entry.from_lvm.state() == RingState::Suspended,
                free_lv: free_lv_name(name),
                free_extents: self.vg.get_lv(&free_lv_name(name)).map_or(0, |lv| lv.extent_count()),
            })
            .collect()
    }

    /// The reserved `H-free` LV name for `name`, the top-level naming
    /// convention the data model describes for the per-host triple.
    pub fn free_lv_name(name: &str) -> String {
        free_lv_name(name)
    }

    /// Grants `extent_count` extents to a host's private pool directly: both
    /// the `H-free` expansion and the `H-fromLVM` push happen immediately,
    /// without going through the redo journal. Used by callers that do not
    /// need crash-safe replay (e.g. tests exercising the registry alone);
    /// the daemon's own top-up path instead journals the exact segments via
    /// [`HostRegistry::push_grant_exact`] so a crash between VG write and
    /// ring push is recoverable on replay.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if the host is unknown or the grant cannot be
    /// pushed.
    pub fn grant(&self, name: &str, extent_count: u64) -> Result<(), HostError> {
        self.vg.expand_lv(&free_lv_name(name), extent_count).map_err(HostError::from)?;
        self.push_grant_exact(name, extent_count)
    }

    /// Pushes a [`HostGrant::Granted`] message onto `name`'s `H-fromLVM`
    /// ring without touching the VG, and records `extent_count` as the
    /// host's last-known grant for the resend phase.
    ///
    /// Called by the journal's `apply_fn` after it has already applied the
    /// matching `ExpandLv` op to the host's `H-free` LV via
    /// [`crate::vg::VgStore::expand_lv_exact`], so replaying this path after
    /// a crash re-pushes the same grant — which the host-side consumer is
    /// expected to tolerate as a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::HostNotCreated`] if `name` is unknown, or a ring
    /// error if the push fails.
    pub fn push_grant_exact(&self, name: &str, extent_count: u64) -> Result<(), HostError> {
        let mut hosts = self.lock();
        let entry = hosts.get_mut(name).ok_or_else(|| HostError::HostNotCreated(name.to_string()))?;
        Self::push_grant(entry, extent_count)
    }

    fn push_grant(entry: &mut HostEntry, extent_count: u64) -> Result<(), HostError> {
        let bytes = serde_json::to_vec(&HostGrant::Granted { extent_count })
            .expect("HostGrant serializes infallibly");
        let pos = entry.from_lvm.push(&bytes)?;
        entry.from_lvm.advance(pos)?;
        entry.last_granted = extent_count;
        Ok(())
    }

    /// Re-pushes the most recently granted extent count for a connected
    /// host, if it has ever received one. Since the ring is a durable mmap,
    /// an unread grant is never actually lost across a host reconnect;
    /// resend exists for the case where the host's ring file itself was
    /// recreated (e.g. after the host process was rebuilt) and the
    /// daemon's last-known grant needs replaying onto the fresh file.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::HostNotCreated`] if `name` is unknown, or a
    /// ring error if the resend push fails.
    pub(crate) fn resend_already_locked(
        hosts: &mut BTreeMap<String, HostEntry>,
        name: &str,
    ) -> Result<(), HostError> {
        let entry = hosts.get_mut(name).ok_or_else(|| HostError::HostNotCreated(name.to_string()))?;
        if entry.last_granted == 0 {
            return Ok(());
        }
        let extent_count = entry.last_granted;
        Self::push_grant(entry, extent_count)
    }

    /// A connected host's most recently granted extent count, for the
    /// top-up controller's resend phase.
    pub(crate) fn last_granted(hosts: &BTreeMap<String, HostEntry>, name: &str) -> u64 {
        hosts.get(name).map_or(0, |entry| entry.last_granted)
    }

    /// A host's current lifecycle state, for the top-up controller to skip
    /// non-connected hosts.
    pub(crate) fn state_of(hosts: &BTreeMap<String, HostEntry>, name: &str) -> Option<HostState> {
        hosts.get(name).map(|entry| entry.state)
    }

    /// Whether a host's `H-fromLVM` ring is currently suspended. Used by the
    /// top-up controller to defer granting a host more extents until its
    /// resend phase has resynchronised the ring, so a just-restarted
    /// allocator is back in sync before it is granted more.
    pub(crate) fn from_lvm_suspended(hosts: &BTreeMap<String, HostEntry>, name: &str) -> bool {
        hosts.get(name).is_some_and(|entry| entry.from_lvm.state() == RingState::Suspended)
    }

    /// Every host name currently known to the registry, in a stable order.
    pub(crate) fn names(hosts: &BTreeMap<String, HostEntry>) -> Vec<String> {
        hosts.keys().cloned().collect()
    }

    /// Drains pending `H-toLVM` requests for one host and reports extents
    /// the host returned to the shared pool via [`VgStore`].
    ///
    /// Must be called with the registry's flush mutex already held (via
    /// [`HostRegistry::lock`]); used by the top-up controller so a whole
    /// tick's resend/top-up/flush phases across every host run under one
    /// lock acquisition instead of one per host per phase.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if the host is unknown, a request cannot be
    /// decoded, or crediting returned extents back to the shared pool
    /// fails.
    pub(crate) fn flush_already_locked(
        &self,
        hosts: &mut BTreeMap<String, HostEntry>,
        name: &str,
    ) -> Result<FlushSummary, HostError> {
        let entry = hosts.get_mut(name).ok_or_else(|| HostError::HostNotCreated(name.to_string()))?;

        let (new_pos, result) = entry.to_lvm.fold(Ok(Vec::new()), |acc, bytes| {
            let mut acc: Vec<ExpandVolume> = acc?;
            let request: ExpandVolume = serde_json::from_slice(bytes).map_err(|e| {
                HostError::Ring(crate::error::RingError::CorruptedRing {
                    path: entry_path(entry),
                    reason: e.to_string(),
                })
            })?;
            acc.push(request);
            Ok(acc)
        });
        let requests = result?;

        // Each request transfers ownership of segments from this host's
        // free pool to the named LV, one VG write per request so the target
        // LV never observes the extents while the free pool still claims
        // them too.
        let mut summary = FlushSummary::default();
        for request in &requests {
            self.vg
                .transfer_exact(&free_lv_name(name), &request.volume_name, &request.segments)
                .map_err(HostError::from)?;
            summary.requests_drained += 1;
            summary.extents_transferred += request.extent_count();
        }

        entry.to_lvm.advance(new_pos)?;
        Ok(summary)
    }

    /// Convenience wrapper around [`HostRegistry::flush_already_locked`]
    /// that acquires the flush mutex itself, for one-off flush calls
    /// outside the top-up controller's per-tick pass.
    ///
    /// # Errors
    ///
    /// See [`HostRegistry::flush_already_locked`].
    pub fn flush(&self, name: &str) -> Result<FlushSummary, HostError> {
        let mut hosts = self.lock();
        self.flush_already_locked(&mut hosts, name)
    }

    /// Returns the low-water mark check needed by the top-up controller:
    /// the free-extent count remaining in a host's private pool.
    pub fn host_free_extents(&self, name: &str) -> u64 {
        self.vg.get_lv(&free_lv_name(name)).map(|lv| lv.extent_count()).unwrap_or(0)
    }

    /// Disconnects every currently registered host, flushing each one's
    /// pending `H-toLVM` requests first. Called during daemon shutdown so
    /// no host is left mid-flush when the journal stops accepting work.
    /// A host that fails to disconnect is logged and skipped rather than
    /// aborting the rest of shutdown.
    pub fn shutdown(&self) {
        let names = {
            let hosts = self.lock();
            Self::names(&hosts)
        };
        for name in names {
            if let Err(e) = self.disconnect(&name) {
                warn!(host = %name, error = %e, "failed to disconnect host during shutdown");
            }
        }
    }
}

fn entry_path(entry: &HostEntry) -> String {
    entry.to_lvm.path().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry() -> (HostRegistry, tempfile::TempDir) {
        let vg_dir = tempdir().unwrap();
        let ring_dir = tempdir().unwrap();
        let vg = Arc::new(VgStore::open(vg_dir.path().join("vg.json"), "vg0", 1000).unwrap());
        (HostRegistry::new(vg, ring_dir.path()), ring_dir)
    }

    #[test]
    fn create_then_connect_then_disconnect_then_destroy() {
        let (registry, _ring_dir) = registry();
        registry.create("host-a").unwrap();
        assert!(registry.all().is_empty(), "a created-but-not-connected host is not yet attached");

        registry.connect("host-a").unwrap();
        assert_eq!(registry.all()[0].state, HostState::Connected);

        registry.disconnect("host-a").unwrap();
        assert!(registry.all().is_empty(), "disconnect omits the host from Host.all()");

        registry.destroy("host-a").unwrap();
    }

    #[test]
    fn create_twice_rejected() {
        let (registry, _ring_dir) = registry();
        registry.create("host-a").unwrap();
        assert!(matches!(registry.create("host-a"), Err(HostError::AlreadyCreated(_))));
    }

    #[test]
    fn destroy_while_connected_rejected() {
        let (registry, _ring_dir) = registry();
        registry.create("host-a").unwrap();
        registry.connect("host-a").unwrap();
        assert!(matches!(registry.destroy("host-a"), Err(HostError::InvalidTransition { .. })));
    }

    #[test]
    fn grant_expands_host_free_pool() {
        let (registry, _ring_dir) = registry();
        registry.create("host-a").unwrap();
        registry.connect("host-a").unwrap();
        registry.grant("host-a", 10).unwrap();
        // create() seeds H-free with 1 extent before grant() adds 10 more.
        assert_eq!(registry.host_free_extents("host-a"), 11);
    }

    #[test]
    fn flush_transfers_segments_from_free_pool_to_named_lv() {
        let (registry, _ring_dir) = registry();
        registry.create("host-a").unwrap();
        registry.connect("host-a").unwrap();
        registry.grant("host-a", 10).unwrap();
        registry.vg.create_lv("vol1", 0).unwrap();

        {
            let mut hosts = registry.lock();
            let entry = hosts.get_mut("host-a").unwrap();
            // create()'s own extent occupies index 0; grant(10) allocated
            // the contiguous run starting at 1, so a request must stay
            // within that single segment to be a valid transfer.
            let request = ExpandVolume { volume_name: "vol1".to_string(), segments: vec![(1, 4)] };
            let bytes = serde_json::to_vec(&request).unwrap();
            // The host side of H-toLVM is simulated directly here via the
            // daemon-side consumer's backing ring path.
            let mut host_side = Producer::attach(entry.to_lvm.path()).unwrap();
            let pos = host_side.push(&bytes).unwrap();
            host_side.advance(pos).unwrap();
        }

        let summary = registry.flush("host-a").unwrap();
        assert_eq!(summary.requests_drained, 1);
        assert_eq!(summary.extents_transferred, 4);
        assert_eq!(registry.host_free_extents("host-a"), 7);
        assert_eq!(registry.vg.get_lv("vol1").unwrap().extent_count(), 4);
    }

    #[test]
    fn suspend_then_resume_round_trips_state() {
        let (registry, _ring_dir) = registry();
        registry.create("host-a").unwrap();
        registry.connect("host-a").unwrap();
        registry.suspend("host-a").unwrap();
        assert_eq!(registry.all()[0].state, HostState::Suspended);
        registry.resume("host-a").unwrap();
        assert_eq!(registry.all()[0].state, HostState::Connected);
    }
}
