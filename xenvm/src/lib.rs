//! XenVM — the central allocator/journal subsystem for a distributed,
//! LVM2-compatible volume group shared by multiple hosts over a SAN.
//!
//! A single daemon built on this crate owns the authoritative on-disk LVM
//! metadata for one volume group ([`vg`]). Per-host local allocators draw
//! from a pre-allocated pool of free extents that a background controller
//! ([`allocator`]) tops up, handed off through crash-safe on-disk ring
//! queues ([`ring`], backed by [`slab`]) registered per host ([`host`]).
//! Every mutation to the volume group's metadata is durable the moment the
//! call that made it returns; top-up allocations additionally flow through
//! a crash-safe redo journal ([`journal`]) so a crash between deciding an
//! allocation and granting it is recovered by replaying the exact same
//! extents on restart, not by re-running the allocator against
//! possibly-changed state.
//!
//! [`dispatch`] bundles every long-lived handle the daemon needs into one
//! value and maps external operations onto it; [`rpc`] exposes that surface
//! over HTTP and a Unix-domain socket; [`config`] loads and validates the
//! daemon's startup configuration.
//!
//! Real LVM2 metadata codec, block-device I/O, and device-mapper activation
//! are out of scope: this crate treats the physical volumes as opaque and
//! persists its own JSON snapshot of the metadata it manages.
//!
//! ## Modules
//!
//! - [`ring`] / [`slab`] — crash-safe persistent SPSC byte ring over a
//!   memory-mapped backing file (C1)
//! - [`journal`] — redo journal with idempotent crash replay (C2)
//! - [`vg`] — mutex-guarded volume-group store and first-fit allocator (C3)
//! - [`host`] — per-host registration and lifecycle state machine (C4)
//! - [`allocator`] — free-pool top-up controller (C5)
//! - [`dispatch`] — request dispatch over C3/C4 (C6)
//! - [`config`] — startup configuration
//! - [`rpc`] — HTTP/Unix-socket transport
//! - [`error`] — error taxonomy shared across every module

pub mod allocator;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod journal;
pub mod ring;
pub mod rpc;
pub mod slab;
pub mod vg;

pub use error::{Result, Severity, XenvmError};
pub use host::{HostRegistry, HostState, HostStatus};
pub use vg::{LogicalVolume, LvStatus, VgStore};
