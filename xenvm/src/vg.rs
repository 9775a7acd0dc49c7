//! Mutex-guarded volume-group store and free-space allocator (spec
//! component C3).
//!
//! A [`VgStore`] holds the single in-memory copy of a volume group's
//! metadata — its logical volumes, their extent segments, status and tags
//! — behind one mutex. Every mutation goes through [`VgStore::write`],
//! which computes the new state and an [`Op`] describing it, swaps the
//! state in under the lock, and persists the result before returning. This
//! single-writer discipline is what lets [`crate::journal`] safely redo an
//! `Op` log on restart: the current snapshot on disk and the journal's
//! durable consumer position always agree on "what has been applied".
//!
//! Real LVM2 metadata codec and block I/O are out of scope; this module
//! persists a JSON snapshot of the volume group instead, the same
//! boundary the rest of the daemon treats the physical volumes and their
//! metadata format as opaque through.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::VgError;

/// Extent size in bytes, matching LVM2's default physical extent size.
pub const EXTENT_SIZE_BYTES: u64 = 4 * 1024 * 1024;

/// Activation status of a logical volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LvStatus {
    /// The LV is active and its queues/extents are in use.
    Active,
    /// The LV is inactive; its extents remain allocated but idle.
    Inactive,
}

/// A logical volume: a name, an ordered list of extent segments, status,
/// and a set of tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalVolume {
    /// The LV's name, unique within its volume group.
    pub name: String,
    /// Extent segments as `(start, count)` pairs, in allocation order.
    pub segments: Vec<(u64, u64)>,
    /// Activation status.
    pub status: LvStatus,
    /// Free-form tags attached to this LV.
    pub tags: BTreeSet<String>,
}

impl LogicalVolume {
    /// Total number of extents allocated to this LV across all segments.
    pub fn extent_count(&self) -> u64 {
        self.segments.iter().map(|&(_, len)| len).sum()
    }
}

/// A snapshot of a volume group's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeGroup {
    /// The volume group's name.
    pub name: String,
    /// Total number of physical extents available in the VG.
    pub total_extents: u64,
    /// Logical volumes, keyed by name.
    pub lvs: BTreeMap<String, LogicalVolume>,
}

impl VolumeGroup {
    /// Allocated extent ranges across every LV, sorted and non-overlapping
    /// by construction of the allocator.
    fn allocated_extents(&self) -> Vec<(u64, u64)> {
        let mut ranges: Vec<(u64, u64)> =
            self.lvs.values().flat_map(|lv| lv.segments.iter().copied()).collect();
        ranges.sort_unstable();
        ranges
    }

    /// Free extent ranges as `(start, count)` pairs, in ascending order.
    fn free_extents(&self) -> Vec<(u64, u64)> {
        let mut free = Vec::new();
        let mut cursor = 0u64;
        for (start, len) in self.allocated_extents() {
            if start > cursor {
                free.push((cursor, start - cursor));
            }
            cursor = cursor.max(start + len);
        }
        if cursor < self.total_extents {
            free.push((cursor, self.total_extents - cursor));
        }
        free
    }

    /// Total free extents across the volume group.
    pub fn free_extent_count(&self) -> u64 {
        self.free_extents().iter().map(|&(_, len)| len).sum()
    }

    /// First-fit search for a single contiguous run of `count` free
    /// extents.
    fn first_fit(&self, count: u64) -> AllocOutcome {
        let free = self.free_extents();
        for &(start, len) in &free {
            if len >= count {
                return AllocOutcome::Allocated(vec![(start, count)]);
            }
        }
        let largest = free.iter().map(|&(_, len)| len).max().unwrap_or(0);
        AllocOutcome::OnlyThisMuchFree(largest)
    }

    /// Detects whether any two LVs claim overlapping extents (invariant P2).
    fn check_no_double_allocation(&self) -> Result<(), VgError> {
        let mut claimed: BTreeMap<u64, &str> = BTreeMap::new();
        for lv in self.lvs.values() {
            for &(start, len) in &lv.segments {
                for extent in start..start + len {
                    if let Some(&other) = claimed.get(&extent) {
                        return Err(VgError::DoubleAllocation {
                            extent,
                            first: other.to_string(),
                            second: lv.name.clone(),
                        });
                    }
                    claimed.insert(extent, &lv.name);
                }
            }
        }
        Ok(())
    }
}

/// Removes each of `remove` from `segments`, splitting the owning segment
/// when the removed range falls in its middle. Each range in `remove` must
/// be a subrange of exactly one existing segment in `segments`.
fn remove_owned_segments(
    segments: &mut Vec<(u64, u64)>,
    remove: &[(u64, u64)],
    owner: &str,
) -> Result<(), VgError> {
    for &(start, len) in remove {
        let pos = segments.iter().position(|&(s, l)| s <= start && start + len <= s + l);
        let Some(pos) = pos else {
            return Err(VgError::SegmentNotOwned { name: owner.to_string(), start, len });
        };
        let (s, l) = segments.swap_remove(pos);
        if s < start {
            segments.push((s, start - s));
        }
        let tail_start = start + len;
        if tail_start < s + l {
            segments.push((tail_start, s + l - tail_start));
        }
    }
    Ok(())
}

/// Read-only accounting view over a volume group, for status reporting and
/// tests.
#[derive(Debug, Clone)]
pub struct VgStats {
    /// Total extents in the volume group.
    pub total_extents: u64,
    /// Free extents across the volume group.
    pub free_extents: u64,
    /// Extents allocated per LV.
    pub per_lv: BTreeMap<String, u64>,
}

/// Outcome of a free-extent allocation attempt. Running out of contiguous
/// space is a normal, expected outcome (the caller — typically the
/// free-pool top-up controller — decides what to do with a partial
/// allocation), not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocOutcome {
    /// The full request was satisfied with one contiguous run.
    Allocated(Vec<(u64, u64)>),
    /// Only this many contiguous extents are available, fewer than asked.
    OnlyThisMuchFree(u64),
}

/// The mutation just committed to a [`VgStore`], logged by the journal and
/// replayed on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Op {
    /// A new LV was created with the given extent segments.
    CreateLv { name: String, extents: Vec<(u64, u64)> },
    /// An LV was removed, freeing its extents.
    RemoveLv { name: String },
    /// An LV was renamed.
    RenameLv { old: String, new: String },
    /// An LV was grown by the given extent segments.
    ExpandLv { name: String, extents: Vec<(u64, u64)> },
    /// An LV was shrunk by the given number of trailing extents.
    CropLv { name: String, extents_removed: u64 },
    /// The given extent segments moved from one LV to another as a single
    /// mutation (a host-flush handing assigned extents from its `H-free`
    /// pool to the volume they were assigned to).
    TransferExtents { from: String, to: String, extents: Vec<(u64, u64)> },
    /// An LV's activation status changed.
    SetStatus { name: String, status: LvStatus },
    /// A tag was added to an LV.
    AddTag { name: String, tag: String },
    /// A tag was removed from an LV.
    RemoveTag { name: String, tag: String },
    /// Confirms that extents freed by a prior op are available again.
    ///
    /// Free extents are derived from current LV segments rather than
    /// tracked separately, so re-applying this op is always a no-op:
    /// idempotence falls out of the data model instead of needing its own
    /// guard.
    FreeAllocation { extents: Vec<(u64, u64)> },
}

/// Mutex-guarded, single-writer store for one volume group's metadata.
pub struct VgStore {
    inner: Mutex<VolumeGroup>,
    path: PathBuf,
}

impl VgStore {
    /// Opens the store at `path`, loading existing metadata if present or
    /// initialising a fresh volume group of `total_extents` extents
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::PersistFailed`] if an existing metadata file
    /// cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>, name: &str, total_extents: u64) -> Result<Self, VgError> {
        let path = path.as_ref().to_path_buf();
        let vg = if path.exists() {
            let data = fs::read_to_string(&path)
                .map_err(|e| VgError::PersistFailed { reason: e.to_string() })?;
            serde_json::from_str(&data)
                .map_err(|e| VgError::PersistFailed { reason: e.to_string() })?
        } else {
            VolumeGroup { name: name.to_string(), total_extents, lvs: BTreeMap::new() }
        };
        Ok(Self { inner: Mutex::new(vg), path })
    }

    /// Runs `f` against the current volume-group snapshot under the lock.
    pub fn read<T>(&self, f: impl FnOnce(&VolumeGroup) -> T) -> T {
        let guard = self.inner.lock().expect("vg mutex poisoned");
        f(&guard)
    }

    /// Read-only accounting snapshot, grounded in invariants P1/P2.
    pub fn stats(&self) -> VgStats {
        self.read(|vg| VgStats {
            total_extents: vg.total_extents,
            free_extents: vg.free_extent_count(),
            per_lv: vg.lvs.iter().map(|(name, lv)| (name.clone(), lv.extent_count())).collect(),
        })
    }

    /// Looks up a single LV by name.
    pub fn get_lv(&self, name: &str) -> Option<LogicalVolume> {
        self.read(|vg| vg.lvs.get(name).cloned())
    }

    /// Previews a first-fit allocation of `count` extents without mutating
    /// the volume group. Used by the free-pool controller to decide whether
    /// a top-up can be satisfied before committing to a journal entry: the
    /// segments returned here are the ones that will actually be persisted,
    /// so the journal record (and its idempotent replay) names an exact
    /// extent range rather than a count that could re-resolve differently.
    pub fn try_allocate(&self, count: u64) -> AllocOutcome {
        self.read(|vg| vg.first_fit(count))
    }

    /// Moves `segments` from `from` to `to` as a single write: `from` must
    /// own exactly those extents, each as a subrange of one of its existing
    /// segments. Used by a host flush to hand extents from `H-free-<host>`
    /// to the volume they were assigned to in one atomic step, so the
    /// double-allocation check never observes an interim state where both
    /// LVs claim the same extent.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::NotFound`] if either LV does not exist, or
    /// [`VgError::SegmentNotOwned`] if `from` does not own one of the
    /// requested extent ranges as a contiguous subrange of one segment.
    pub fn transfer_exact(&self, from: &str, to: &str, segments: &[(u64, u64)]) -> Result<Op, VgError> {
        self.write(|vg| {
            if !vg.lvs.contains_key(from) {
                return Err(VgError::NotFound(from.to_string()));
            }
            if !vg.lvs.contains_key(to) {
                return Err(VgError::NotFound(to.to_string()));
            }
            let mut new_vg = vg.clone();
            {
                let from_lv = new_vg.lvs.get_mut(from).expect("checked above");
                remove_owned_segments(&mut from_lv.segments, segments, from)?;
            }
            {
                let to_lv = new_vg.lvs.get_mut(to).expect("checked above");
                for &seg in segments {
                    if !to_lv.segments.contains(&seg) {
                        to_lv.segments.push(seg);
                    }
                }
            }
            Ok((
                new_vg,
                Op::TransferExtents { from: from.to_string(), to: to.to_string(), extents: segments.to_vec() },
            ))
        })
    }

    /// Grows `name` by exactly `segments`, previously chosen by
    /// [`VgStore::try_allocate`]. Unlike [`VgStore::expand_lv`], this never
    /// allocates a fresh segment, which makes it safe to replay from the
    /// journal: the op handler in [`crate::journal`] already treats extents
    /// already present on the LV as a no-op (see [`VgStore::apply`]), so
    /// applying the same exact segments twice is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::NotFound`] if `name` does not exist.
    pub fn expand_lv_exact(&self, name: &str, segments: &[(u64, u64)]) -> Result<Op, VgError> {
        self.write(|vg| {
            if !vg.lvs.contains_key(name) {
                return Err(VgError::NotFound(name.to_string()));
            }
            let mut new_vg = vg.clone();
            let lv = new_vg.lvs.get_mut(name).expect("checked above");
            for &seg in segments {
                if !lv.segments.contains(&seg) {
                    lv.segments.push(seg);
                }
            }
            Ok((new_vg, Op::ExpandLv { name: name.to_string(), extents: segments.to_vec() }))
        })
    }

    /// Lists every LV in the volume group.
    pub fn list_lvs(&self) -> Vec<LogicalVolume> {
        self.read(|vg| vg.lvs.values().cloned().collect())
    }

    /// Persists the current snapshot to disk, even if nothing changed since
    /// the last write.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::PersistFailed`] if the write fails.
    pub fn sync(&self) -> Result<(), VgError> {
        let guard = self.inner.lock().expect("vg mutex poisoned");
        self.persist(&guard)
    }

    fn write(&self, f: impl FnOnce(&VolumeGroup) -> Result<(VolumeGroup, Op), VgError>) -> Result<Op, VgError> {
        let mut guard = self.inner.lock().expect("vg mutex poisoned");
        let (new_vg, op) = f(&guard)?;
        new_vg.check_no_double_allocation()?;
        *guard = new_vg;
        self.persist(&guard)?;
        Ok(op)
    }

    fn persist(&self, vg: &VolumeGroup) -> Result<(), VgError> {
        let data = serde_json::to_string_pretty(vg)
            .map_err(|e| VgError::PersistFailed { reason: e.to_string() })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|e| VgError::PersistFailed { reason: e.to_string() })?;
        fs::rename(&tmp, &self.path).map_err(|e| VgError::PersistFailed { reason: e.to_string() })?;
        Ok(())
    }

    /// Creates a new LV with `extent_count` extents using first-fit
    /// allocation.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::AlreadyExists`] if `name` is already in use.
    pub fn create_lv(&self, name: &str, extent_count: u64) -> Result<AllocOutcome, VgError> {
        let mut guard = self.inner.lock().expect("vg mutex poisoned");
        if guard.lvs.contains_key(name) {
            return Err(VgError::AlreadyExists(name.to_string()));
        }

        let outcome = guard.first_fit(extent_count);
        let AllocOutcome::Allocated(segments) = &outcome else {
            return Ok(outcome);
        };

        let mut new_vg = guard.clone();
        new_vg.lvs.insert(
            name.to_string(),
            LogicalVolume {
                name: name.to_string(),
                segments: segments.clone(),
                status: LvStatus::Active,
                tags: BTreeSet::new(),
            },
        );
        new_vg.check_no_double_allocation()?;
        self.persist(&new_vg)?;
        *guard = new_vg;
        Ok(outcome)
    }

    /// Grows an existing LV by `extent_count` extents using first-fit
    /// allocation for the additional segment.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::NotFound`] if `name` does not exist.
    pub fn expand_lv(&self, name: &str, extent_count: u64) -> Result<AllocOutcome, VgError> {
        let mut guard = self.inner.lock().expect("vg mutex poisoned");
        if !guard.lvs.contains_key(name) {
            return Err(VgError::NotFound(name.to_string()));
        }

        let outcome = guard.first_fit(extent_count);
        let AllocOutcome::Allocated(segments) = &outcome else {
            return Ok(outcome);
        };

        let mut new_vg = guard.clone();
        new_vg.lvs.get_mut(name).expect("checked above").segments.extend(segments.iter().copied());
        new_vg.check_no_double_allocation()?;
        self.persist(&new_vg)?;
        *guard = new_vg;
        Ok(outcome)
    }

    /// Shrinks an LV by removing `extent_count` extents from the tail of
    /// its last segment.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::NotFound`] if `name` does not exist, or
    /// [`VgError::CropExceedsSize`] if `extent_count` exceeds the LV's size.
    pub fn crop_lv(&self, name: &str, extent_count: u64) -> Result<Op, VgError> {
        self.write(|vg| {
            let lv = vg.lvs.get(name).ok_or_else(|| VgError::NotFound(name.to_string()))?;
            if extent_count > lv.extent_count() {
                return Err(VgError::CropExceedsSize {
                    name: name.to_string(),
                    requested: extent_count,
                    size: lv.extent_count(),
                });
            }

            let mut new_vg = vg.clone();
            let new_lv = new_vg.lvs.get_mut(name).expect("checked above");
            let mut remaining = extent_count;
            while remaining > 0 {
                let (start, len) = new_lv.segments.last_mut().expect("extent_count bound checked above");
                if *len > remaining {
                    *len -= remaining;
                    remaining = 0;
                } else {
                    remaining -= *len;
                    let _ = *start;
                    new_lv.segments.pop();
                }
            }

            Ok((new_vg, Op::CropLv { name: name.to_string(), extents_removed: extent_count }))
        })
    }

    /// Removes an LV, freeing its extents.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::NotFound`] if `name` does not exist.
    pub fn remove_lv(&self, name: &str) -> Result<Op, VgError> {
        self.write(|vg| {
            if !vg.lvs.contains_key(name) {
                return Err(VgError::NotFound(name.to_string()));
            }
            let mut new_vg = vg.clone();
            new_vg.lvs.remove(name);
            Ok((new_vg, Op::RemoveLv { name: name.to_string() }))
        })
    }

    /// Renames an LV.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::NotFound`] if `old` does not exist, or
    /// [`VgError::AlreadyExists`] if `new` is already taken.
    pub fn rename_lv(&self, old: &str, new: &str) -> Result<Op, VgError> {
        self.write(|vg| {
            if !vg.lvs.contains_key(old) {
                return Err(VgError::NotFound(old.to_string()));
            }
            if vg.lvs.contains_key(new) {
                return Err(VgError::AlreadyExists(new.to_string()));
            }
            let mut new_vg = vg.clone();
            let mut lv = new_vg.lvs.remove(old).expect("checked above");
            lv.name = new.to_string();
            new_vg.lvs.insert(new.to_string(), lv);
            Ok((new_vg, Op::RenameLv { old: old.to_string(), new: new.to_string() }))
        })
    }

    /// Sets an LV's activation status.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::NotFound`] if `name` does not exist.
    pub fn set_status(&self, name: &str, status: LvStatus) -> Result<Op, VgError> {
        self.write(|vg| {
            if !vg.lvs.contains_key(name) {
                return Err(VgError::NotFound(name.to_string()));
            }
            let mut new_vg = vg.clone();
            new_vg.lvs.get_mut(name).expect("checked above").status = status;
            Ok((new_vg, Op::SetStatus { name: name.to_string(), status }))
        })
    }

    /// Adds a tag to an LV.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::NotFound`] if `name` does not exist.
    pub fn add_tag(&self, name: &str, tag: &str) -> Result<Op, VgError> {
        self.write(|vg| {
            if !vg.lvs.contains_key(name) {
                return Err(VgError::NotFound(name.to_string()));
            }
            let mut new_vg = vg.clone();
            new_vg.lvs.get_mut(name).expect("checked above").tags.insert(tag.to_string());
            Ok((new_vg, Op::AddTag { name: name.to_string(), tag: tag.to_string() }))
        })
    }

    /// Removes a tag from an LV.
    ///
    /// # Errors
    ///
    /// Returns [`VgError::NotFound`] if `name` does not exist.
    pub fn remove_tag(&self, name: &str, tag: &str) -> Result<Op, VgError> {
        self.write(|vg| {
            if !vg.lvs.contains_key(name) {
                return Err(VgError::NotFound(name.to_string()));
            }
            let mut new_vg = vg.clone();
            new_vg.lvs.get_mut(name).expect("checked above").tags.remove(tag);
            Ok((new_vg, Op::RemoveTag { name: name.to_string(), tag: tag.to_string() }))
        })
    }

    /// Applies a journal-replayed [`Op`] directly, without allocating.
    /// Used by the journal's `apply_fn` on both the live path and crash
    /// replay, where the extent segments an op produced are already known
    /// and must be reproduced exactly rather than re-derived.
    ///
    /// # Errors
    ///
    /// Returns [`VgError`] if the op cannot be applied (e.g. double
    /// allocation detected).
    pub fn apply(&self, op: &Op) -> Result<(), VgError> {
        let mut guard = self.inner.lock().expect("vg mutex poisoned");
        let mut new_vg = guard.clone();
        match op {
            Op::CreateLv { name, extents } => {
                new_vg.lvs.entry(name.clone()).or_insert_with(|| LogicalVolume {
                    name: name.clone(),
                    segments: extents.clone(),
                    status: LvStatus::Active,
                    tags: BTreeSet::new(),
                });
            }
            Op::RemoveLv { name } => {
                new_vg.lvs.remove(name);
            }
            Op::RenameLv { old, new } => {
                if let Some(mut lv) = new_vg.lvs.remove(old) {
                    lv.name = new.clone();
                    new_vg.lvs.insert(new.clone(), lv);
                }
            }
            Op::ExpandLv { name, extents } => {
                if let Some(lv) = new_vg.lvs.get_mut(name) {
                    if lv.segments.iter().all(|s| !extents.contains(s)) {
                        lv.segments.extend(extents.iter().copied());
                    }
                }
            }
            Op::CropLv { name, extents_removed } => {
                if let Some(lv) = new_vg.lvs.get_mut(name) {
                    let mut remaining = *extents_removed;
                    while remaining > 0 {
                        let Some((_, len)) = lv.segments.last_mut() else { break };
                        if *len > remaining {
                            *len -= remaining;
                            remaining = 0;
                        } else {
                            remaining -= *len;
                            lv.segments.pop();
                        }
                    }
                }
            }
            Op::SetStatus { name, status } => {
                if let Some(lv) = new_vg.lvs.get_mut(name) {
                    lv.status = *status;
                }
            }
            Op::AddTag { name, tag } => {
                if let Some(lv) = new_vg.lvs.get_mut(name) {
                    lv.tags.insert(tag.clone());
                }
            }
            Op::RemoveTag { name, tag } => {
                if let Some(lv) = new_vg.lvs.get_mut(name) {
                    lv.tags.remove(tag);
                }
            }
            Op::TransferExtents { from, to, extents } => {
                if let Some(lv) = new_vg.lvs.get_mut(from) {
                    // Already gone from `from` on a replay of an op already
                    // applied once; nothing left to remove.
                    let _ = remove_owned_segments(&mut lv.segments, extents, from);
                }
                if let Some(lv) = new_vg.lvs.get_mut(to) {
                    for seg in extents {
                        if !lv.segments.contains(seg) {
                            lv.segments.push(*seg);
                        }
                    }
                }
            }
            Op::FreeAllocation { .. } => {
                // Free extents are derived from LV segments; nothing to do.
            }
        }
        new_vg.check_no_double_allocation()?;
        self.persist(&new_vg)?;
        *guard = new_vg;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;
    use tempfile::tempdir;

    fn store(total_extents: u64) -> VgStore {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vg.json");
        std::mem::forget(dir);
        VgStore::open(path, "vg0", total_extents).unwrap()
    }

    #[test]
    fn create_lv_allocates_first_fit() {
        let store = store(100);
        let outcome = store.create_lv("lv0", 10).unwrap();
        assert_eq!(outcome, AllocOutcome::Allocated(vec![(0, 10)]));
        assert_eq!(store.stats().free_extents, 90);
    }

    #[test]
    fn create_lv_rejects_duplicate_name() {
        let store = store(100);
        store.create_lv("lv0", 10).unwrap();
        let err = store.create_lv("lv0", 5).unwrap_err();
        assert!(matches!(err, VgError::AlreadyExists(_)));
    }

    #[test]
    fn create_lv_reports_partial_free_space() {
        let store = store(10);
        store.create_lv("lv0", 10).unwrap();
        let outcome = store.create_lv("lv1", 5).unwrap();
        assert_eq!(outcome, AllocOutcome::OnlyThisMuchFree(0));
    }

    #[test]
    fn remove_lv_frees_extents() {
        let store = store(100);
        store.create_lv("lv0", 10).unwrap();
        store.remove_lv("lv0").unwrap();
        assert_eq!(store.stats().free_extents, 100);
        assert!(store.get_lv("lv0").is_none());
    }

    #[test]
    fn expand_then_crop_round_trips_extent_count() {
        let store = store(100);
        store.create_lv("lv0", 10).unwrap();
        store.expand_lv("lv0", 5).unwrap();
        assert_eq!(store.get_lv("lv0").unwrap().extent_count(), 15);
        store.crop_lv("lv0", 5).unwrap();
        assert_eq!(store.get_lv("lv0").unwrap().extent_count(), 10);
    }

    #[test]
    fn crop_past_lv_size_is_a_domain_error_not_fatal() {
        let store = store(100);
        store.create_lv("lv0", 10).unwrap();
        let err = store.crop_lv("lv0", 11).unwrap_err();
        assert!(matches!(err, VgError::CropExceedsSize { requested: 11, size: 10, .. }));
        assert_eq!(err.severity(), Severity::Domain);
        // The LV is untouched after a rejected crop.
        assert_eq!(store.get_lv("lv0").unwrap().extent_count(), 10);
    }

    #[test]
    fn rename_preserves_segments() {
        let store = store(100);
        store.create_lv("lv0", 10).unwrap();
        store.rename_lv("lv0", "lv1").unwrap();
        assert!(store.get_lv("lv0").is_none());
        assert_eq!(store.get_lv("lv1").unwrap().extent_count(), 10);
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vg.json");

        {
            let store = VgStore::open(&path, "vg0", 100).unwrap();
            store.create_lv("lv0", 10).unwrap();
        }

        let store = VgStore::open(&path, "vg0", 100).unwrap();
        assert_eq!(store.get_lv("lv0").unwrap().extent_count(), 10);
        assert_eq!(store.stats().free_extents, 90);
    }

    #[test]
    fn try_allocate_does_not_mutate() {
        let store = store(100);
        let outcome = store.try_allocate(10);
        assert_eq!(outcome, AllocOutcome::Allocated(vec![(0, 10)]));
        assert_eq!(store.stats().free_extents, 100);
    }

    #[test]
    fn expand_lv_exact_is_idempotent_under_replay() {
        let store = store(100);
        store.create_lv("lv0", 0).unwrap();
        store.expand_lv_exact("lv0", &[(10, 5)]).unwrap();
        store.expand_lv_exact("lv0", &[(10, 5)]).unwrap();
        assert_eq!(store.get_lv("lv0").unwrap().extent_count(), 5);
    }

    #[test]
    fn transfer_exact_moves_extents_in_one_write() {
        let store = store(100);
        store.create_lv("free", 0).unwrap();
        store.expand_lv_exact("free", &[(0, 8)]).unwrap();
        store.create_lv("vol1", 0).unwrap();

        store.transfer_exact("free", "vol1", &[(2, 4)]).unwrap();

        assert_eq!(store.get_lv("vol1").unwrap().extent_count(), 4);
        assert_eq!(store.get_lv("free").unwrap().extent_count(), 4);
        // No instant where both LVs claim the transferred extents.
        store.read(|vg| vg.check_no_double_allocation()).unwrap();
    }

    #[test]
    fn transfer_exact_rejects_a_range_spanning_two_segments() {
        let store = store(100);
        store.create_lv("free", 0).unwrap();
        store.expand_lv_exact("free", &[(0, 2)]).unwrap();
        store.expand_lv_exact("free", &[(10, 2)]).unwrap();
        store.create_lv("vol1", 0).unwrap();

        let err = store.transfer_exact("free", "vol1", &[(1, 2)]).unwrap_err();
        assert!(matches!(err, VgError::SegmentNotOwned { .. }));
        assert_eq!(err.severity(), Severity::Domain);
    }

    #[test]
    fn apply_create_lv_is_idempotent() {
        let store = store(100);
        let op = Op::CreateLv { name: "lv0".to_string(), extents: vec![(0, 10)] };
        store.apply(&op).unwrap();
        store.apply(&op).unwrap();
        assert_eq!(store.get_lv("lv0").unwrap().extent_count(), 10);
    }
}
