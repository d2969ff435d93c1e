//! Banked word memory.
//!
//! # Address mapping
//!
//! A flat word address is split into `(bank, index)`:
//!
//! ```text
//!   banks = 2^k:   bank = addr & (banks - 1)    index = addr >> k
//!   otherwise:     bank = addr % banks          index = addr / banks
//! ```
//!
//! Consecutive addresses therefore land in consecutive banks, so a stream of
//! unit-stride accesses spreads across all banks.
//!
//! Each bank serves one read or one write per cycle. Upstream arbitration is
//! expected to guarantee that; [`BankedMemory::end_cycle`] closes the cycle
//! and the access methods panic on a second access to the same bank.

use crate::bits::log2_ceil;

/// Word types that support slice-masked writes.
pub trait MaskedWord: Copy + Default {
    /// Width in bits.
    const BITS: u32;

    /// Replace the slices of `self` selected by `mask` with those of `new`.
    /// Slice `i` covers bits `[i*slice_bits, (i+1)*slice_bits)`.
    fn merge(self, new: Self, mask: u64, slice_bits: u32) -> Self;
}

macro_rules! impl_masked_word {
    ($($t:ty),*) => {$(
        impl MaskedWord for $t {
            const BITS: u32 = <$t>::BITS;

            fn merge(self, new: Self, mask: u64, slice_bits: u32) -> Self {
                let slices = Self::BITS / slice_bits;
                let mut out = self;
                for i in 0..slices {
                    if (mask >> i) & 1 == 1 {
                        let low: $t = if slice_bits >= Self::BITS {
                            <$t>::MAX
                        } else {
                            ((1 as $t) << slice_bits) - 1
                        };
                        let m = low << (i * slice_bits);
                        out = (out & !m) | (new & m);
                    }
                }
                out
            }
        }
    )*};
}

impl_masked_word!(u8, u16, u32, u64, u128);

/// Where an address lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankAddr {
    pub bank: usize,
    pub index: usize,
}

/// Compute `(bank, index)` for a flat word address.
pub fn split_addr(addr: usize, banks: usize) -> BankAddr {
    if banks.is_power_of_two() {
        let k = log2_ceil(banks);
        BankAddr {
            bank: addr & (banks - 1),
            index: addr >> k,
        }
    } else {
        BankAddr {
            bank: addr % banks,
            index: addr / banks,
        }
    }
}

/// Banked array of words.
#[derive(Debug, Clone)]
pub struct BankedMemory<T> {
    banks: usize,
    entries_per_bank: usize,
    /// Bytes per word, for slice-masked writes.
    bytes_per_word: usize,
    storage: Vec<Vec<T>>,
    /// Bank touched since the last `end_cycle`.
    touched: Vec<bool>,
    reads: u64,
    writes: u64,
}

impl<T: Clone + Default> BankedMemory<T> {
    /// `capacity` words spread over `banks` banks.
    pub fn new(capacity: usize, banks: usize) -> Self {
        assert!(banks > 0, "banked memory needs at least one bank");
        assert!(
            capacity % banks == 0,
            "capacity {} not divisible by {} banks",
            capacity,
            banks
        );
        let entries_per_bank = capacity / banks;
        Self {
            banks,
            entries_per_bank,
            bytes_per_word: std::mem::size_of::<T>().max(1),
            storage: vec![vec![T::default(); entries_per_bank]; banks],
            touched: vec![false; banks],
            reads: 0,
            writes: 0,
        }
    }

    pub fn banks(&self) -> usize {
        self.banks
    }

    pub fn entries_per_bank(&self) -> usize {
        self.entries_per_bank
    }

    pub fn capacity(&self) -> usize {
        self.banks * self.entries_per_bank
    }

    pub fn bytes_per_word(&self) -> usize {
        self.bytes_per_word
    }

    pub fn split(&self, addr: usize) -> BankAddr {
        split_addr(addr, self.banks)
    }

    fn claim(&mut self, bank: usize, index: usize) {
        assert!(bank < self.banks, "bank {} out of range ({} banks)", bank, self.banks);
        assert!(
            index < self.entries_per_bank,
            "bank index {} out of range ({} entries)",
            index,
            self.entries_per_bank
        );
        assert!(!self.touched[bank], "bank {} accessed twice in one cycle", bank);
        self.touched[bank] = true;
    }

    /// Read one word from `bank`.
    pub fn read(&mut self, bank: usize, index: usize) -> T {
        self.claim(bank, index);
        self.reads += 1;
        self.storage[bank][index].clone()
    }

    /// Write one word to `bank`.
    pub fn write(&mut self, bank: usize, index: usize, val: T) {
        self.claim(bank, index);
        self.writes += 1;
        self.storage[bank][index] = val;
    }

    /// Read by flat address.
    pub fn read_addr(&mut self, addr: usize) -> T {
        let BankAddr { bank, index } = self.split(addr);
        self.read(bank, index)
    }

    /// Write by flat address.
    pub fn write_addr(&mut self, addr: usize, val: T) {
        let BankAddr { bank, index } = self.split(addr);
        self.write(bank, index, val)
    }

    /// Inspect a word without counting as an access.
    pub fn peek(&self, bank: usize, index: usize) -> &T {
        &self.storage[bank][index]
    }

    /// Inspect by flat address without counting as an access.
    pub fn peek_addr(&self, addr: usize) -> &T {
        let BankAddr { bank, index } = self.split(addr);
        self.peek(bank, index)
    }

    /// Backdoor load, bypassing per-cycle accounting.
    pub fn load(&mut self, addr: usize, val: T) {
        let BankAddr { bank, index } = self.split(addr);
        self.storage[bank][index] = val;
    }

    /// Close the current cycle; every bank may be accessed again.
    pub fn end_cycle(&mut self) {
        for t in &mut self.touched {
            *t = false;
        }
    }

    /// Zero every word.
    pub fn clear(&mut self) {
        for bank in &mut self.storage {
            for w in bank.iter_mut() {
                *w = T::default();
            }
        }
        self.end_cycle();
    }

    /// `(reads, writes)` performed so far.
    pub fn access_counts(&self) -> (u64, u64) {
        (self.reads, self.writes)
    }
}

impl<T: MaskedWord> BankedMemory<T> {
    /// Write only the byte lanes selected by `mask` (bit `i` = byte `i`).
    pub fn write_masked(&mut self, bank: usize, index: usize, val: T, mask: u64) {
        self.claim(bank, index);
        self.writes += 1;
        let old = self.storage[bank][index];
        self.storage[bank][index] = old.merge(val, mask, 8);
    }
}
