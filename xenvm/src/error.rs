//! Error types for the XenVM allocator/journal daemon.

use thiserror::Error;

/// How a caller should react to an error surfacing from the daemon core.
///
/// Mirrors the taxonomy in the design notes: transient conditions are
/// retried in place by the caller, domain errors are reported back to the
/// RPC caller unchanged, and fatal errors mean the daemon can no longer
/// guarantee it is the sole writer of the volume group and must halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Transient: sleep and retry. Never surfaced to an RPC caller directly.
    Transient,
    /// Domain: a well-formed request that cannot be satisfied right now.
    Domain,
    /// Fatal: the daemon's single-writer invariant may be compromised.
    Fatal,
}

/// The top-level error type for all XenVM operations.
#[derive(Error, Debug)]
pub enum XenvmError {
    /// Error from the shared-block ring queue.
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// Error from the redo journal.
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    /// Error from the volume-group store.
    #[error("volume group error: {0}")]
    Vg(#[from] VgError),

    /// Error from the host registry.
    #[error("host registry error: {0}")]
    Host(#[from] HostError),

    /// Error loading or validating configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error decoding an RPC request.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}

impl XenvmError {
    /// Classifies this error for the caller's recovery policy.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Ring(e) => e.severity(),
            Self::Journal(e) => e.severity(),
            Self::Vg(e) => e.severity(),
            Self::Host(e) => e.severity(),
            Self::Config(_) => Severity::Fatal,
            Self::Rpc(_) => Severity::Domain,
        }
    }
}

/// Errors from the persistent SPSC ring queue (C1).
#[derive(Error, Debug)]
pub enum RingError {
    /// The ring is full; the caller should back off and retry.
    #[error("ring is full, retry later")]
    Retry,

    /// The ring is suspended and rejecting pushes.
    #[error("ring is suspended")]
    Suspended,

    /// A concurrent suspend/resume transition is already in progress.
    #[error("a suspend/resume transition is already in progress, retry later")]
    TransitionInProgress,

    /// The item does not fit the ring's framing capacity even when empty.
    #[error("item of {item_len} bytes exceeds ring capacity of {capacity} bytes")]
    ItemTooLarge {
        /// Size of the item that was rejected.
        item_len: usize,
        /// Usable byte capacity of the ring.
        capacity: usize,
    },

    /// The backing slab file is corrupted or has an invalid format.
    #[error("ring backing store '{path}' is corrupted: {reason}")]
    CorruptedRing {
        /// Path to the backing slab.
        path: String,
        /// Description of the corruption.
        reason: String,
    },

    /// I/O failure against the backing slab (mmap, sync, create).
    #[error("ring I/O error on '{path}': {source}")]
    Io {
        /// Path to the backing slab.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl RingError {
    /// Classifies this ring error for the caller's recovery policy.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Retry | Self::Suspended | Self::TransitionInProgress => Severity::Transient,
            Self::ItemTooLarge { .. } | Self::CorruptedRing { .. } | Self::Io { .. } => {
                Severity::Fatal
            }
        }
    }
}

/// Errors from the redo journal (C2).
#[derive(Error, Debug)]
pub enum JournalError {
    /// Error from the ring backing the journal's own storage.
    #[error(transparent)]
    Ring(#[from] RingError),

    /// `apply_fn` failed permanently while replaying or applying an op.
    #[error("journal apply failed for op at offset {offset}: {reason}")]
    ApplyFailed {
        /// Byte offset (within the journal ring) of the failing op.
        offset: u64,
        /// Description of the failure.
        reason: String,
    },

    /// A journal record could not be deserialised.
    #[error("corrupt journal record: {reason}")]
    CorruptRecord {
        /// Description of the corruption.
        reason: String,
    },
}

impl JournalError {
    /// Classifies this journal error for the caller's recovery policy.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Ring(e) => e.severity(),
            Self::ApplyFailed { .. } | Self::CorruptRecord { .. } => Severity::Fatal,
        }
    }
}

/// Errors from the volume-group store (C3).
#[derive(Error, Debug)]
pub enum VgError {
    /// No logical volume with this name or id exists.
    #[error("logical volume not found: {0}")]
    NotFound(String),

    /// A logical volume with this name already exists.
    #[error("logical volume already exists: {0}")]
    AlreadyExists(String),

    /// Two segments were found to claim the same physical extent.
    ///
    /// This can only indicate a broken invariant (P2, spec table 8): the
    /// allocator never issues overlapping segments in normal operation.
    #[error("extent double-allocation detected: extent {extent} claimed by both '{first}' and '{second}'")]
    DoubleAllocation {
        /// The conflicting extent index.
        extent: u64,
        /// Name of the first claimant.
        first: String,
        /// Name of the second claimant.
        second: String,
    },

    /// The persistence backend (the out-of-scope LVM2 codec / block I/O
    /// layer) reported a failure applying a mutation.
    #[error("failed to persist volume group mutation: {reason}")]
    PersistFailed {
        /// Description of the failure.
        reason: String,
    },

    /// A shrink requested more extents removed than the LV has.
    #[error("cannot crop {requested} extents from LV '{name}' of {size} extents")]
    CropExceedsSize {
        /// The LV being cropped.
        name: String,
        /// Extents requested for removal.
        requested: u64,
        /// The LV's current size in extents.
        size: u64,
    },

    /// A requested extent transfer range is not a contiguous subrange of
    /// any segment the source LV actually owns.
    #[error("LV '{name}' does not own extents {start}..{} as a single segment", start + len)]
    SegmentNotOwned {
        /// The LV that was expected to own the range.
        name: String,
        /// Start of the requested range.
        start: u64,
        /// Length of the requested range.
        len: u64,
    },
}

impl VgError {
    /// Classifies this VG error for the caller's recovery policy.
    pub fn severity(&self) -> Severity {
        match self {
            Self::NotFound(_) | Self::AlreadyExists(_) | Self::CropExceedsSize { .. } | Self::SegmentNotOwned { .. } => {
                Severity::Domain
            }
            Self::DoubleAllocation { .. } | Self::PersistFailed { .. } => Severity::Fatal,
        }
    }
}

/// Errors from the host registry (C4).
#[derive(Error, Debug)]
pub enum HostError {
    /// The named host has not been created (no `H-free` LV exists).
    #[error("host not created: {0}")]
    HostNotCreated(String),

    /// A host with this name has already been created.
    #[error("host already created: {0}")]
    AlreadyCreated(String),

    /// The requested lifecycle transition is not valid from the host's
    /// current state.
    #[error("host '{host}' cannot transition from {from} to {to}")]
    InvalidTransition {
        /// The host's name.
        host: String,
        /// The host's current state.
        from: String,
        /// The rejected target state.
        to: String,
    },

    /// Error from the ring backing one of this host's queues.
    #[error(transparent)]
    Ring(#[from] RingError),

    /// Error from the volume-group store while creating/destroying a
    /// host's LVs or transferring extents during a flush.
    #[error(transparent)]
    Vg(#[from] VgError),
}

impl HostError {
    /// Classifies this host-registry error for the caller's recovery policy.
    pub fn severity(&self) -> Severity {
        match self {
            Self::HostNotCreated(_) | Self::AlreadyCreated(_) | Self::InvalidTransition { .. } => {
                Severity::Domain
            }
            Self::Ring(e) => e.severity(),
            Self::Vg(e) => e.severity(),
        }
    }
}

/// Errors from loading or validating the daemon's configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// The config file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// The config file path.
        path: String,
        /// The underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Neither `listen_port` nor `listen_path` was set after CLI overrides.
    #[error("at least one of listen_port or listen_path must be set")]
    NoListener,

    /// `devices` was empty.
    #[error("at least one block device must be configured")]
    NoDevices,

    /// A startup step after configuration validation failed: opening the
    /// volume group, starting the journal, or binding a listener.
    #[error("startup failed: {reason}")]
    Startup {
        /// Description of the failure.
        reason: String,
    },
}

/// Errors decoding or dispatching an RPC request.
///
/// Spec §1 treats the RPC transport itself as an out-of-scope, interface-only
/// collaborator; these variants cover only the part this crate actually
/// owns — the `{method, params}` envelope and its mapping onto C6.
#[derive(Error, Debug)]
pub enum RpcError {
    /// No method with this name is recognised.
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    /// A required parameter was missing or of the wrong JSON type.
    #[error("missing or malformed parameter '{0}'")]
    BadParam(String),
}

impl RpcError {
    /// RPC errors are always a malformed request, never transient or fatal.
    pub fn severity(&self) -> Severity {
        Severity::Domain
    }
}

/// Type alias for `Result<T, XenvmError>`.
pub type Result<T> = std::result::Result<T, XenvmError>;
