//! Persistent single-producer/single-consumer byte ring (spec component C1).
//!
//! Every `H-toLVM`/`H-fromLVM` queue, and the daemon's own redo journal, is
//! one of these rings: a byte buffer with a durable producer position and a
//! durable consumer position, framed so arbitrary byte payloads
//! (JSON-encoded ops, in this crate) can be pushed and folded over.
//!
//! # Protocol
//!
//! - [`Producer::push`] writes a framed item past the ring's durable
//!   producer position and returns that pending position uncommitted — the
//!   item is invisible to the consumer, and is lost on an unclean shutdown,
//!   until [`Producer::advance`] commits it.
//! - [`Consumer::fold`] walks every item between the durable consumer
//!   position and the current durable producer position without consuming
//!   them; [`Consumer::advance`] commits the new consumer position.
//!
//! Both positions (producer and consumer) are durable: they are only ever
//! advanced by the matching `advance` call, never by `push`/`fold` alone.
//! - [`Consumer::suspend`]/[`Consumer::resume`] flip the ring's suspended
//!   flag. Because the backing slab is a shared memory mapping, the flag is
//!   visible to every other handle on the same file as soon as it is
//!   written — no cross-process polling is needed to observe the
//!   transition, unlike a socket-based protocol would require.

use std::path::Path;
use std::time::Duration;

use crate::error::RingError;
use crate::slab::Slab;

/// Default byte capacity for a ring backing file. Must be a power of two.
pub const DEFAULT_RING_CAPACITY: u64 = 1 << 20;

/// Fixed back-off interval used when a caller retries after [`RingError::Retry`].
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Length of the per-item length prefix, in bytes.
const FRAME_PREFIX_LEN: u64 = 4;

/// Observed state of a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    /// Accepting pushes.
    Running,
    /// Rejecting pushes with [`RingError::Suspended`].
    Suspended,
}

fn frame_len(item_len: usize) -> u64 {
    FRAME_PREFIX_LEN + item_len as u64
}

/// Producer half of a ring.
///
/// Owns an in-memory "pending" position that may run ahead of the slab's
/// durable producer position by however many items have been pushed but not
/// yet advanced.
#[derive(Debug)]
pub struct Producer {
    slab: Slab,
    pending_position: u64,
}

impl Producer {
    /// Creates a new, empty, running ring and returns its producer half.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the backing file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, capacity: u64) -> Result<Self, RingError> {
        let slab = Slab::create(path, capacity)?;
        Ok(Self { slab, pending_position: 0 })
    }

    /// Attaches to an existing ring as its producer.
    ///
    /// The in-memory pending position is initialised from the slab's
    /// durable producer position: any writes past that position from a
    /// previous, uncommitted `push` are correctly treated as lost.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] or [`RingError::CorruptedRing`] if the
    /// backing file cannot be opened.
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self, RingError> {
        let slab = Slab::open(path)?;
        let pending_position = slab.producer_position();
        Ok(Self { slab, pending_position })
    }

    /// Current observed ring state.
    pub fn state(&self) -> RingState {
        if self.slab.suspended() { RingState::Suspended } else { RingState::Running }
    }

    /// Pushes a framed item past the current pending position.
    ///
    /// Returns the pending position the item was written at; the caller
    /// must call [`Producer::advance`] with this value to make the push
    /// durable and visible to the consumer.
    ///
    /// # Errors
    ///
    /// - [`RingError::Suspended`] if the ring is suspended.
    /// - [`RingError::Retry`] if there is not enough free space; the caller
    ///   should back off for [`RETRY_BACKOFF`] and try again.
    /// - [`RingError::ItemTooLarge`] if the item cannot fit the ring even
    ///   when empty.
    pub fn push(&mut self, item: &[u8]) -> Result<u64, RingError> {
        let capacity = self.slab.capacity();
        let len = frame_len(item.len());

        if len > capacity {
            return Err(RingError::ItemTooLarge { item_len: item.len(), capacity: capacity as usize });
        }
        if self.slab.suspended() {
            return Err(RingError::Suspended);
        }

        let consumer_position = self.slab.consumer_position();
        let used = self.pending_position - consumer_position;
        if used + len > capacity {
            return Err(RingError::Retry);
        }

        let mut frame = Vec::with_capacity(len as usize);
        frame.extend_from_slice(&(item.len() as u32).to_le_bytes());
        frame.extend_from_slice(item);
        self.slab.write_bytes(self.pending_position, &frame);

        self.pending_position += len;
        Ok(self.pending_position)
    }

    /// Commits all pushes up to and including `pos`, making them durable and
    /// visible to the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the sync fails.
    pub fn advance(&mut self, pos: u64) -> Result<(), RingError> {
        self.slab.set_producer_position(pos);
        self.slab.sync()
    }

    /// Backing file path, for diagnostics.
    pub fn path(&self) -> &str {
        self.slab.path()
    }

    /// The durable position this producer has committed up to.
    pub fn position(&self) -> u64 {
        self.slab.producer_position()
    }
}

/// Consumer half of a ring.
#[derive(Debug)]
pub struct Consumer {
    slab: Slab,
}

impl Consumer {
    /// Attaches to an existing ring as its consumer.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] or [`RingError::CorruptedRing`] if the
    /// backing file cannot be opened.
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self, RingError> {
        Ok(Self { slab: Slab::open(path)? })
    }

    /// Current observed ring state.
    pub fn state(&self) -> RingState {
        if self.slab.suspended() { RingState::Suspended } else { RingState::Running }
    }

    /// The durable position this consumer has committed up to.
    pub fn position(&self) -> u64 {
        self.slab.consumer_position()
    }

    /// Folds `f` over every committed item between this consumer's durable
    /// position and the ring's current durable producer position, without
    /// consuming them.
    ///
    /// Returns the position one past the last item folded over (pass to
    /// [`Consumer::advance`] to commit) together with the final
    /// accumulator.
    pub fn fold<T>(&self, init: T, mut f: impl FnMut(T, &[u8]) -> T) -> (u64, T) {
        let mut pos = self.slab.consumer_position();
        let end = self.slab.producer_position();
        let mut acc = init;

        while pos < end {
            let len_bytes = self.slab.read_bytes(pos, FRAME_PREFIX_LEN as usize);
            let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
            pos += FRAME_PREFIX_LEN;
            let payload = self.slab.read_bytes(pos, len);
            pos += len as u64;
            acc = f(acc, &payload);
        }

        (pos, acc)
    }

    /// Commits consumption up to `pos`.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the sync fails.
    pub fn advance(&mut self, pos: u64) -> Result<(), RingError> {
        self.slab.set_consumer_position(pos);
        self.slab.sync()
    }

    /// Suspends the ring, rejecting further pushes.
    ///
    /// Idempotent: returns `Ok(RingState::Suspended)` if already suspended.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the sync fails.
    pub fn suspend(&mut self) -> Result<RingState, RingError> {
        if self.slab.suspended() {
            return Ok(RingState::Suspended);
        }
        self.slab.set_suspended(true);
        self.slab.sync()?;
        Ok(RingState::Suspended)
    }

    /// Resumes the ring, accepting pushes again.
    ///
    /// Idempotent: returns `Ok(RingState::Running)` if already running.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the sync fails.
    pub fn resume(&mut self) -> Result<RingState, RingError> {
        if !self.slab.suspended() {
            return Ok(RingState::Running);
        }
        self.slab.set_suspended(false);
        self.slab.sync()?;
        Ok(RingState::Running)
    }

    /// Backing file path, for diagnostics.
    pub fn path(&self) -> &str {
        self.slab.path()
    }
}
