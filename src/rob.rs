//! Reorder buffers: out-of-order completion, in-order release.
//!
//! # Architecture
//!
//! ```text
//!   add_request() ──► id pool ──► id2entry[id] = tail
//!                                  │
//!            vbits: [ 0 | 1 | 0 | 1 ]  ◄── add_response(id, data) sets vbits[id2entry[id]]
//!                     ^head      ^tail
//!   pop_top() ◄── storage[head]  (only when vbits[head] == 1)
//! ```
//!
//! An in-order queue of valid bits tracks every issued request. Responses
//! land in the slot recorded for their id and free the id immediately, so an
//! id can be reused before its slot has drained.
//!
//! [`ReorderBufWBeats`] adds multi-beat entries: after the first beat of a
//! burst is matched to its id, the remaining beats are appended at the tail
//! already valid. The caller must ensure nothing else is queued behind the
//! burst while its beats arrive.

use std::ops::{Deref, DerefMut};

use thiserror::Error;

use crate::mem::fifo::Fifo;

/// Construction errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RobError {
    #[error("reorder buffer depth must be non-zero")]
    ZeroDepth,

    #[error("reorder buffer needs at least one in-flight id")]
    ZeroInFlight,

    #[error("{in_flight} in-flight ids do not fit in {id_width} id bits")]
    TooManyInFlight { in_flight: usize, id_width: u32 },
}

/// Reorder buffer holding up to `depth` entries with `in_flight` ids.
#[derive(Debug, Clone)]
pub struct ReorderBuf<T> {
    storage: Vec<T>,
    /// In-order valid bits.
    vbits: Fifo<bool>,
    /// Bit `i` set while id `i` is outstanding.
    idrep: u64,
    in_flight: usize,
    id2entry: Vec<usize>,
}

impl<T: Clone + Default> ReorderBuf<T> {
    pub fn new(depth: usize, in_flight: usize, id_width: u32) -> Result<Self, RobError> {
        if depth == 0 {
            return Err(RobError::ZeroDepth);
        }
        if in_flight == 0 {
            return Err(RobError::ZeroInFlight);
        }
        let fits = id_width >= 64 || (in_flight as u128) <= (1u128 << id_width);
        if !fits || in_flight > 64 {
            return Err(RobError::TooManyInFlight { in_flight, id_width });
        }
        Ok(Self {
            storage: vec![T::default(); depth],
            vbits: Fifo::new(depth),
            idrep: 0,
            in_flight,
            id2entry: vec![0; in_flight],
        })
    }

    pub fn depth(&self) -> usize {
        self.storage.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn all_ids_taken(&self) -> bool {
        let full = if self.in_flight == 64 {
            u64::MAX
        } else {
            (1u64 << self.in_flight) - 1
        };
        self.idrep == full
    }

    /// Ids currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.idrep.count_ones() as usize
    }

    /// Entries queued (valid or not).
    pub fn len(&self) -> usize {
        self.vbits.len()
    }

    /// True iff an id is free and the in-order queue has space.
    pub fn can_accept(&self) -> bool {
        !self.all_ids_taken() && !self.vbits.is_full()
    }

    /// Allocate the lowest free id and reserve the next in-order slot.
    pub fn add_request(&mut self) -> usize {
        let id = (0..self.in_flight)
            .find(|&i| (self.idrep >> i) & 1 == 0)
            .unwrap_or_else(|| panic!("reorder buffer: no free id ({} in flight)", self.in_flight));
        assert!(!self.vbits.is_full(), "reorder buffer: in-order queue full");
        self.idrep |= 1 << id;
        self.id2entry[id] = self.vbits.tail();
        self.vbits.push(false);
        log::trace!("rob: id {} -> entry {}", id, self.id2entry[id]);
        id
    }

    /// Store the response for `id` and release the id.
    pub fn add_response(&mut self, id: usize, data: T) {
        assert!(id < self.in_flight, "reorder buffer: id {} out of range", id);
        assert!(
            (self.idrep >> id) & 1 == 1,
            "reorder buffer: response for id {} which is not outstanding",
            id
        );
        let entry = self.id2entry[id];
        self.storage[entry] = data;
        *self.vbits.slot_mut(entry) = true;
        self.idrep &= !(1 << id);
    }

    /// True when the oldest entry has its response.
    pub fn top_ready(&self) -> bool {
        self.vbits.front().copied().unwrap_or(false)
    }

    /// Oldest response without removing it.
    pub fn peek_top(&self) -> Option<&T> {
        if self.top_ready() {
            Some(&self.storage[self.vbits.head()])
        } else {
            None
        }
    }

    /// Release the oldest response. Panics unless [`top_ready`](Self::top_ready).
    pub fn pop_top(&mut self) -> T {
        assert!(self.top_ready(), "reorder buffer: pop_top with head not ready");
        let data = std::mem::take(&mut self.storage[self.vbits.head()]);
        self.vbits.incr_head();
        data
    }

    pub fn is_empty(&self) -> bool {
        self.vbits.is_empty()
    }

    pub fn reset(&mut self) {
        self.vbits.reset();
        self.idrep = 0;
    }
}

/// Reorder buffer whose entries may span several beats.
#[derive(Debug, Clone)]
pub struct ReorderBufWBeats<T> {
    base: ReorderBuf<T>,
}

impl<T: Clone + Default> ReorderBufWBeats<T> {
    pub fn new(depth: usize, in_flight: usize, id_width: u32) -> Result<Self, RobError> {
        Ok(Self {
            base: ReorderBuf::new(depth, in_flight, id_width)?,
        })
    }

    /// True when another beat fits in the in-order queue.
    pub fn can_receive_beats(&self) -> bool {
        !self.base.vbits.is_full()
    }

    /// Append a follow-on beat of the burst at the tail, already valid.
    pub fn add_beat(&mut self, data: T) {
        assert!(self.can_receive_beats(), "reorder buffer: no room for beat");
        let entry = self.base.vbits.tail();
        self.base.storage[entry] = data;
        self.base.vbits.push(true);
    }
}

impl<T> Deref for ReorderBufWBeats<T> {
    type Target = ReorderBuf<T>;

    fn deref(&self) -> &ReorderBuf<T> {
        &self.base
    }
}

impl<T> DerefMut for ReorderBufWBeats<T> {
    fn deref_mut(&mut self) -> &mut ReorderBuf<T> {
        &mut self.base
    }
}
