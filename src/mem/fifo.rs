//! Bounded in-order FIFOs.
//!
//! [`BankedFifo`] keeps several logical FIFOs in one structure. Each bank has
//! its own head and tail pointer over a shared storage array, so every
//! operation takes the bank index. [`Fifo`] is the single-bank case.
//!
//! Head and tail wrap at the depth. When they are equal the bank is either
//! empty or full; the direction of the last pointer move disambiguates.
//!
//! A zero-depth FIFO is both empty and full. Pushing or popping it panics.

/// Several independent FIFOs sharing one storage array.
#[derive(Debug, Clone)]
pub struct BankedFifo<T> {
    /// Entries per bank.
    depth: usize,
    /// `banks * depth` storage slots, bank-major.
    storage: Vec<T>,
    head: Vec<usize>,
    tail: Vec<usize>,
    /// True if the last pointer move in the bank was a push.
    last_was_push: Vec<bool>,
}

impl<T: Clone + Default> BankedFifo<T> {
    pub fn new(depth: usize, banks: usize) -> Self {
        assert!(banks > 0, "FIFO needs at least one bank");
        Self {
            depth,
            storage: vec![T::default(); depth * banks],
            head: vec![0; banks],
            tail: vec![0; banks],
            last_was_push: vec![false; banks],
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn banks(&self) -> usize {
        self.head.len()
    }

    fn check_bank(&self, bank: usize) {
        assert!(bank < self.banks(), "FIFO bank {} out of range ({} banks)", bank, self.banks());
    }

    fn wrap(&self, idx: usize) -> usize {
        if idx + 1 == self.depth {
            0
        } else {
            idx + 1
        }
    }

    /// Entries stored in `bank`.
    pub fn num_filled(&self, bank: usize) -> usize {
        self.check_bank(bank);
        if self.depth == 0 {
            return 0;
        }
        let (h, t) = (self.head[bank], self.tail[bank]);
        if h == t {
            if self.last_was_push[bank] {
                self.depth
            } else {
                0
            }
        } else if t > h {
            t - h
        } else {
            self.depth - h + t
        }
    }

    /// Free slots in `bank`.
    pub fn num_available(&self, bank: usize) -> usize {
        self.depth - self.num_filled(bank)
    }

    pub fn is_empty(&self, bank: usize) -> bool {
        self.num_filled(bank) == 0
    }

    pub fn is_full(&self, bank: usize) -> bool {
        self.num_filled(bank) == self.depth
    }

    /// Append `val` at the tail. Panics when full.
    pub fn push(&mut self, bank: usize, val: T) {
        assert!(!self.is_full(bank), "push into full FIFO bank {}", bank);
        let slot = bank * self.depth + self.tail[bank];
        self.storage[slot] = val;
        self.incr_tail(bank);
    }

    /// Remove and return the head. Panics when empty.
    pub fn pop(&mut self, bank: usize) -> T {
        assert!(!self.is_empty(bank), "pop from empty FIFO bank {}", bank);
        let slot = bank * self.depth + self.head[bank];
        let val = std::mem::take(&mut self.storage[slot]);
        self.incr_head(bank);
        val
    }

    /// Head entry without consuming it. Panics when empty.
    pub fn peek(&self, bank: usize) -> &T {
        assert!(!self.is_empty(bank), "peek into empty FIFO bank {}", bank);
        &self.storage[bank * self.depth + self.head[bank]]
    }

    /// Head entry, or `None` when the bank is empty.
    pub fn front(&self, bank: usize) -> Option<&T> {
        if self.is_empty(bank) {
            None
        } else {
            Some(&self.storage[bank * self.depth + self.head[bank]])
        }
    }

    /// Mutable access to the head entry. Panics when empty.
    pub fn peek_mut(&mut self, bank: usize) -> &mut T {
        assert!(!self.is_empty(bank), "peek into empty FIFO bank {}", bank);
        let slot = bank * self.depth + self.head[bank];
        &mut self.storage[slot]
    }

    /// Consume the head without reading it.
    pub fn incr_head(&mut self, bank: usize) {
        assert!(!self.is_empty(bank), "incr_head on empty FIFO bank {}", bank);
        self.head[bank] = self.wrap(self.head[bank]);
        self.last_was_push[bank] = false;
    }

    /// Advance the tail over a slot written in place.
    pub fn incr_tail(&mut self, bank: usize) {
        assert!(!self.is_full(bank), "incr_tail on full FIFO bank {}", bank);
        self.tail[bank] = self.wrap(self.tail[bank]);
        self.last_was_push[bank] = true;
    }

    /// Head pointer of `bank`.
    pub fn head(&self, bank: usize) -> usize {
        self.check_bank(bank);
        self.head[bank]
    }

    /// Tail pointer of `bank`.
    pub fn tail(&self, bank: usize) -> usize {
        self.check_bank(bank);
        self.tail[bank]
    }

    /// Entry at physical index `idx` of `bank`, ignoring occupancy.
    pub fn slot(&self, bank: usize, idx: usize) -> &T {
        self.check_bank(bank);
        assert!(idx < self.depth, "FIFO index {} out of range (depth {})", idx, self.depth);
        &self.storage[bank * self.depth + idx]
    }

    /// Mutable entry at physical index `idx` of `bank`, ignoring occupancy.
    pub fn slot_mut(&mut self, bank: usize, idx: usize) -> &mut T {
        self.check_bank(bank);
        assert!(idx < self.depth, "FIFO index {} out of range (depth {})", idx, self.depth);
        &mut self.storage[bank * self.depth + idx]
    }

    /// Empty every bank.
    pub fn reset(&mut self) {
        for b in 0..self.banks() {
            self.head[b] = 0;
            self.tail[b] = 0;
            self.last_was_push[b] = false;
        }
        for v in &mut self.storage {
            *v = T::default();
        }
    }
}

/// Single-bank FIFO.
#[derive(Debug, Clone)]
pub struct Fifo<T> {
    inner: BankedFifo<T>,
}

impl<T: Clone + Default> Fifo<T> {
    pub fn new(depth: usize) -> Self {
        Self {
            inner: BankedFifo::new(depth, 1),
        }
    }

    pub fn depth(&self) -> usize {
        self.inner.depth()
    }

    pub fn len(&self) -> usize {
        self.inner.num_filled(0)
    }

    pub fn num_available(&self) -> usize {
        self.inner.num_available(0)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty(0)
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full(0)
    }

    pub fn push(&mut self, val: T) {
        self.inner.push(0, val)
    }

    pub fn pop(&mut self) -> T {
        self.inner.pop(0)
    }

    pub fn peek(&self) -> &T {
        self.inner.peek(0)
    }

    pub fn front(&self) -> Option<&T> {
        self.inner.front(0)
    }

    pub fn peek_mut(&mut self) -> &mut T {
        self.inner.peek_mut(0)
    }

    pub fn incr_head(&mut self) {
        self.inner.incr_head(0)
    }

    pub fn incr_tail(&mut self) {
        self.inner.incr_tail(0)
    }

    pub fn head(&self) -> usize {
        self.inner.head(0)
    }

    pub fn tail(&self) -> usize {
        self.inner.tail(0)
    }

    pub fn slot(&self, idx: usize) -> &T {
        self.inner.slot(0, idx)
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut T {
        self.inner.slot_mut(0, idx)
    }

    pub fn reset(&mut self) {
        self.inner.reset()
    }
}
