//! Request dispatch.
//!
//! A thin layer mapping externally invoked operations onto [`VgStore`] and
//! [`HostRegistry`] calls, each under its own lock discipline. `DaemonState`
//! is the single value an RPC front-end needs: it owns every long-lived
//! handle the daemon holds (VG, host registry, journal, allocator) and is
//! built once during a straightforward sequential startup.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::allocator::{AllocatorConfig, AllocatorController, JournalHandle};
use crate::error::{HostError, VgError, XenvmError};
use crate::host::{HostRegistry, HostStatus};
use crate::journal::Journal;
use crate::vg::{LogicalVolume, LvStatus, Op, VgStats, VgStore};

/// The daemon's full set of long-lived handles: the single value a request
/// dispatcher or RPC front-end needs to service any operation.
pub struct DaemonState {
    vg: Arc<VgStore>,
    hosts: Arc<HostRegistry>,
    journal: JournalHandle,
    allocator: Arc<AllocatorController>,
}

impl DaemonState {
    /// Assembles daemon state from already-opened handles. The grace period
    /// before a tick loop's first run is the caller's concern; `spawn` must
    /// be called separately to actually start the allocator's background
    /// task.
    pub fn new(vg: Arc<VgStore>, hosts: Arc<HostRegistry>, journal: Journal<Op>, config: AllocatorConfig) -> Self {
        let journal: JournalHandle = Arc::new(AsyncMutex::new(journal));
        let allocator = Arc::new(AllocatorController::new(hosts.clone(), vg.clone(), journal.clone(), config));
        Self { vg, hosts, journal, allocator }
    }

    /// Starts the free-pool top-up controller's periodic tick loop.
    pub fn spawn_allocator(&self) {
        self.allocator.clone().spawn();
    }

    /// Read-only accounting snapshot of the whole volume group (`get`).
    pub fn get(&self) -> VgStats {
        self.vg.stats()
    }

    /// Looks up a single logical volume by name.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::NotFound`] if `name` does not exist.
    pub fn get_lv(&self, name: &str) -> Result<LogicalVolume, VgError> {
        self.vg.get_lv(name).ok_or_else(|| VgError::NotFound(name.to_string()))
    }

    /// Creates a new logical volume with `extent_count` extents.
    ///
    /// # Errors
    ///
    /// See [`VgStore::create_lv`].
    pub fn create_lv(&self, name: &str, extent_count: u64) -> Result<(), XenvmError> {
        self.vg.create_lv(name, extent_count)?;
        Ok(())
    }

    /// Renames a logical volume.
    ///
    /// # Errors
    ///
    /// See [`VgStore::rename_lv`].
    pub fn rename_lv(&self, old: &str, new: &str) -> Result<(), XenvmError> {
        self.vg.rename_lv(old, new)?;
        Ok(())
    }

    /// Removes a logical volume, freeing its extents.
    ///
    /// # Errors
    ///
    /// See [`VgStore::remove_lv`].
    pub fn remove_lv(&self, name: &str) -> Result<(), XenvmError> {
        self.vg.remove_lv(name)?;
        Ok(())
    }

    /// Resizes a logical volume to exactly `extent_count` extents, growing
    /// or shrinking it as needed.
    ///
    /// # Errors
    ///
    /// See [`VgStore::expand_lv`]/[`VgStore::crop_lv`].
    pub fn resize_lv(&self, name: &str, extent_count: u64) -> Result<(), XenvmError> {
        let current = self.vg.get_lv(name).ok_or_else(|| VgError::NotFound(name.to_string()))?.extent_count();
        match extent_count.cmp(&current) {
            std::cmp::Ordering::Greater => {
                self.vg.expand_lv(name, extent_count - current)?;
            }
            std::cmp::Ordering::Less => {
                self.vg.crop_lv(name, current - extent_count)?;
            }
            std::cmp::Ordering::Equal => {}
        }
        Ok(())
    }

    /// Sets a logical volume's activation status.
    ///
    /// # Errors
    ///
    /// See [`VgStore::set_status`].
    pub fn set_status(&self, name: &str, status: LvStatus) -> Result<(), XenvmError> {
        self.vg.set_status(name, status)?;
        Ok(())
    }

    /// Adds a tag to a logical volume.
    ///
    /// # Errors
    ///
    /// See [`VgStore::add_tag`].
    pub fn add_tag(&self, name: &str, tag: &str) -> Result<(), XenvmError> {
        self.vg.add_tag(name, tag)?;
        Ok(())
    }

    /// Removes a tag from a logical volume.
    ///
    /// # Errors
    ///
    /// See [`VgStore::remove_tag`].
    pub fn remove_tag(&self, name: &str, tag: &str) -> Result<(), XenvmError> {
        self.vg.remove_tag(name, tag)?;
        Ok(())
    }

    /// Lists every currently attached host.
    pub fn hosts_all(&self) -> Vec<HostStatus> {
        self.hosts.all()
    }

    /// Registers a new host.
    ///
    /// # Errors
    ///
    /// See [`HostRegistry::create`].
    pub fn host_create(&self, name: &str) -> Result<(), HostError> {
        self.hosts.create(name)
    }

    /// Attaches a host.
    ///
    /// # Errors
    ///
    /// See [`HostRegistry::connect`].
    pub fn host_connect(&self, name: &str) -> Result<(), HostError> {
        self.hosts.connect(name)
    }

    /// Detaches a host, flushing its pending requests first.
    ///
    /// # Errors
    ///
    /// See [`HostRegistry::disconnect`].
    pub fn host_disconnect(&self, name: &str) -> Result<(), HostError> {
        self.hosts.disconnect(name)
    }

    /// Tears a host down.
    ///
    /// # Errors
    ///
    /// See [`HostRegistry::destroy`].
    pub fn host_destroy(&self, name: &str) -> Result<(), HostError> {
        self.hosts.destroy(name)
    }

    /// Flushes pending `H-toLVM` requests. The daemon does not track an
    /// LV-to-host mapping, so a named flush is indistinguishable from a
    /// flush-all: every registered host is drained regardless of `_name`.
    ///
    /// # Errors
    ///
    /// Returns the first flush error encountered; already-flushed hosts keep
    /// their progress since each host's flush is independently durable.
    pub fn flush(&self, _name: &str) -> Result<(), HostError> {
        for status in self.hosts.all() {
            self.hosts.flush(&status.name)?;
        }
        Ok(())
    }

    /// Orderly shutdown: disconnects every registered host, waits for the
    /// journal to apply everything already pushed and stops its applier,
    /// then returns after a one-second grace period (spec §4.6).
    pub async fn shutdown(&self) {
        info!("shutdown requested");
        self.hosts.shutdown();
        {
            let mut journal = self.journal.lock().await;
            if let Err(e) = journal.shutdown().await {
                tracing::warn!(error = %e, "journal did not shut down cleanly");
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator;
    use tempfile::tempdir;

    fn state() -> DaemonState {
        let vg_dir = tempdir().unwrap();
        let ring_dir = tempdir().unwrap();
        let journal_dir = tempdir().unwrap();
        let vg = Arc::new(VgStore::open(vg_dir.path().join("vg.json"), "vg0", 100).unwrap());
        let hosts = Arc::new(HostRegistry::new(vg.clone(), ring_dir.path()));
        std::mem::forget(vg_dir);
        std::mem::forget(ring_dir);

        let vg_for_apply = vg.clone();
        let hosts_for_apply = hosts.clone();
        let (journal, _summary) = Journal::<Op>::start(journal_dir.path().join("journal.ring"), move |op| {
            allocator::apply_op(&vg_for_apply, &hosts_for_apply, op)
        })
        .unwrap();
        std::mem::forget(journal_dir);

        let config = AllocatorConfig {
            allocation_quantum_extents: 1,
            low_water_mark_extents: 1,
            tick_interval: Duration::from_secs(5),
        };
        DaemonState::new(vg, hosts, journal, config)
    }

    #[tokio::test]
    async fn shutdown_disconnects_connected_hosts() {
        let state = state();
        state.host_create("host-a").unwrap();
        state.host_connect("host-a").unwrap();
        assert_eq!(state.hosts_all().len(), 1);

        state.shutdown().await;

        assert!(state.hosts_all().is_empty(), "shutdown should disconnect every registered host");
    }
}
