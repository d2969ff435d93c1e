//! Fixed-width integers and flat bit-vector marshalling.
//!
//! Every message that crosses a channel can be flattened into a bit vector.
//! Fields are concatenated LSB-first in declaration order, so the first field
//! of a message occupies the lowest bits of its serialized form.
//!
//! Widths come in two flavours:
//!
//! - compile-time, via [`UInt`] and [`SInt`] (`const W: u32`), used for
//!   router flits, scratchpad requests and other statically shaped messages;
//! - run-time, via a layout value passed to [`Marshallable`], used for AXI
//!   payloads whose field widths are derived from an [`AxiConfig`].
//!
//! A zero-width field is [`Empty`]; marshalling it writes nothing.
//!
//! [`AxiConfig`]: crate::axi::AxiConfig

use std::fmt;

use bitvec::field::BitField;
use bitvec::prelude::{BitSlice, BitVec, Lsb0};
use bitvec::view::BitView;
use thiserror::Error;

/// Widest integer supported by [`UInt`] / [`SInt`].
pub const MAX_WIDTH: u32 = 128;

/// Errors from width validation and unmarshalling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BitsError {
    /// Requested width is outside `1..=128`.
    #[error("width {0} outside 1..={MAX_WIDTH}")]
    InvalidWidth(u32),

    /// Reader ran past the end of the buffer.
    #[error("bit buffer underflow: need {needed} bits at offset {offset}, have {len}")]
    Underflow {
        /// Bits requested.
        needed: u32,
        /// Read cursor.
        offset: usize,
        /// Total bits in the buffer.
        len: usize,
    },
}

/// Mask with the low `width` bits set.
#[inline]
pub fn mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

/// Number of bits needed to represent `n - 1`, i.e. `ceil(log2(n))`.
///
/// Returns 0 for `n <= 1`.
#[inline]
pub fn log2_ceil(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// Bits needed to index `n` entries, never less than one.
#[inline]
pub fn index_width(n: usize) -> u32 {
    log2_ceil(n).max(1)
}

/// Check a runtime width.
pub fn check_width(width: u32) -> Result<u32, BitsError> {
    if (1..=MAX_WIDTH).contains(&width) {
        Ok(width)
    } else {
        Err(BitsError::InvalidWidth(width))
    }
}

/// Unsigned integer carrying `W` bits. Arithmetic wraps modulo `2^W`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct UInt<const W: u32> {
    value: u128,
}

impl<const W: u32> UInt<W> {
    /// Width in bits.
    pub const WIDTH: u32 = W;

    const VALID: () = assert!(W >= 1 && W <= MAX_WIDTH, "UInt width must be 1..=128");

    /// Create a value, truncating to `W` bits.
    #[inline]
    pub fn new(value: u128) -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::VALID;
        Self { value: value & mask(W) }
    }

    /// Zero.
    #[inline]
    pub fn zero() -> Self {
        Self::new(0)
    }

    /// All ones.
    #[inline]
    pub fn max_value() -> Self {
        Self::new(u128::MAX)
    }

    /// Raw value.
    #[inline]
    pub fn get(self) -> u128 {
        self.value
    }

    /// Width in bits.
    #[inline]
    pub fn width(self) -> u32 {
        W
    }

    #[inline]
    pub fn wrapping_add(self, rhs: Self) -> Self {
        Self::new(self.value.wrapping_add(rhs.value))
    }

    #[inline]
    pub fn wrapping_sub(self, rhs: Self) -> Self {
        Self::new(self.value.wrapping_sub(rhs.value))
    }

    #[inline]
    pub fn wrapping_mul(self, rhs: Self) -> Self {
        Self::new(self.value.wrapping_mul(rhs.value))
    }

    /// Logical shift left; bits shifted past `W` are lost.
    #[inline]
    pub fn shl(self, amount: u32) -> Self {
        if amount >= W {
            Self::zero()
        } else {
            Self::new(self.value << amount)
        }
    }

    /// Logical shift right.
    #[inline]
    pub fn shr(self, amount: u32) -> Self {
        if amount >= W {
            Self::zero()
        } else {
            Self::new(self.value >> amount)
        }
    }

    /// Read bit `idx`.
    #[inline]
    pub fn bit(self, idx: u32) -> bool {
        assert!(idx < W, "bit index {} out of range for width {}", idx, W);
        (self.value >> idx) & 1 == 1
    }

    /// Set bit `idx` to `on`.
    #[inline]
    pub fn set_bit(&mut self, idx: u32, on: bool) {
        assert!(idx < W, "bit index {} out of range for width {}", idx, W);
        if on {
            self.value |= 1 << idx;
        } else {
            self.value &= !(1 << idx);
        }
    }

    /// Extract `len` bits starting at `lsb`.
    #[inline]
    pub fn slice(self, lsb: u32, len: u32) -> u128 {
        assert!(lsb + len <= W, "slice [{}+:{}] out of range for width {}", lsb, len, W);
        (self.value >> lsb) & mask(len)
    }

    /// Overwrite `len` bits starting at `lsb` with the low bits of `val`.
    #[inline]
    pub fn set_slice(&mut self, lsb: u32, len: u32, val: u128) {
        assert!(lsb + len <= W, "slice [{}+:{}] out of range for width {}", lsb, len, W);
        let m = mask(len) << lsb;
        self.value = (self.value & !m) | ((val << lsb) & m);
    }
}

impl<const W: u32> From<u64> for UInt<W> {
    fn from(v: u64) -> Self {
        Self::new(v as u128)
    }
}

impl<const W: u32> fmt::Debug for UInt<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'h{:x}", W, self.value)
    }
}

impl<const W: u32> fmt::Display for UInt<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<const W: u32> fmt::LowerHex for UInt<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.value, f)
    }
}

/// Two's-complement signed integer carrying `W` bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SInt<const W: u32> {
    raw: UInt<W>,
}

impl<const W: u32> SInt<W> {
    /// Width in bits.
    pub const WIDTH: u32 = W;

    /// Create from a signed value, wrapping into `W` bits.
    pub fn new(value: i128) -> Self {
        Self { raw: UInt::new(value as u128) }
    }

    /// Sign-extended value.
    pub fn get(self) -> i128 {
        let v = self.raw.get();
        if W < 128 && (v >> (W - 1)) & 1 == 1 {
            (v | !mask(W)) as i128
        } else {
            v as i128
        }
    }

    /// Underlying bit pattern.
    pub fn to_bits(self) -> UInt<W> {
        self.raw
    }

    pub fn wrapping_add(self, rhs: Self) -> Self {
        Self { raw: self.raw.wrapping_add(rhs.raw) }
    }

    pub fn wrapping_sub(self, rhs: Self) -> Self {
        Self { raw: self.raw.wrapping_sub(rhs.raw) }
    }
}

impl<const W: u32> fmt::Debug for SInt<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'sd{}", W, self.get())
    }
}

/// Zero-width field. Every operation on it is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Empty;

/// Serialized message, LSB-first in `u64` words.
pub type Bits = BitVec<u64, Lsb0>;

/// Low 128 bits of `bits` as an integer (for short messages and debugging).
pub fn to_u128(bits: &BitSlice<u64, Lsb0>) -> u128 {
    let n = bits.len().min(128);
    load_u128(&bits[..n])
}

// `BitField` loads are capped at the word size, so wide fields go in halves.
fn load_u128(field: &BitSlice<u64, Lsb0>) -> u128 {
    match field.len() {
        0 => 0,
        1..=64 => field.load_le::<u64>() as u128,
        _ => {
            let (lo, hi) = field.split_at(64);
            lo.load_le::<u64>() as u128 | (hi.load_le::<u64>() as u128) << 64
        }
    }
}

/// Sequential writer producing [`Bits`].
#[derive(Debug, Default)]
pub struct Marshaller {
    bits: Bits,
}

impl Marshaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field of `width` bits. A zero width is a no-op.
    pub fn put(&mut self, value: u128, width: u32) -> &mut Self {
        assert!(width <= MAX_WIDTH, "field width {} exceeds {}", width, MAX_WIDTH);
        if width > 0 {
            let words = [value as u64, (value >> 64) as u64];
            self.bits.extend_from_bitslice(&words.view_bits::<Lsb0>()[..width as usize]);
        }
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put(value as u128, 1)
    }

    /// Bits written so far.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn finish(self) -> Bits {
        self.bits
    }
}

/// Sequential reader over a serialized message.
#[derive(Debug)]
pub struct Unmarshaller<'a> {
    bits: &'a BitSlice<u64, Lsb0>,
    cursor: usize,
}

impl<'a> Unmarshaller<'a> {
    pub fn new(bits: &'a BitSlice<u64, Lsb0>) -> Self {
        Self { bits, cursor: 0 }
    }

    /// Take the next `width` bits. A zero width yields 0 without consuming.
    pub fn take(&mut self, width: u32) -> Result<u128, BitsError> {
        if width == 0 {
            return Ok(0);
        }
        check_width(width)?;
        let end = self.cursor + width as usize;
        if end > self.bits.len() {
            return Err(BitsError::Underflow {
                needed: width,
                offset: self.cursor,
                len: self.bits.len(),
            });
        }
        let v = load_u128(&self.bits[self.cursor..end]);
        self.cursor = end;
        Ok(v)
    }

    pub fn take_bool(&mut self) -> Result<bool, BitsError> {
        Ok(self.take(1)? == 1)
    }

    /// Bits not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bits.len() - self.cursor
    }
}

/// A message that can be flattened into a bit vector and rebuilt from one.
///
/// `Layout` carries whatever run-time information determines field widths.
/// Statically shaped messages use `()`.
pub trait Marshallable: Sized {
    type Layout;

    /// Total serialized width in bits.
    fn width(layout: &Self::Layout) -> u32;

    /// Append this message's fields, LSB-first in declaration order.
    fn marshal(&self, layout: &Self::Layout, m: &mut Marshaller);

    /// Rebuild a message from the reader.
    fn unmarshal(layout: &Self::Layout, u: &mut Unmarshaller<'_>) -> Result<Self, BitsError>;

    /// Convenience: serialize into a fresh bit vector.
    fn to_bits(&self, layout: &Self::Layout) -> Bits {
        let mut m = Marshaller::new();
        self.marshal(layout, &mut m);
        m.finish()
    }

    /// Convenience: deserialize from a bit vector.
    fn from_bits(layout: &Self::Layout, bits: &BitSlice<u64, Lsb0>) -> Result<Self, BitsError> {
        Self::unmarshal(layout, &mut Unmarshaller::new(bits))
    }
}

impl<const W: u32> Marshallable for UInt<W> {
    type Layout = ();

    fn width(_: &()) -> u32 {
        W
    }

    fn marshal(&self, _: &(), m: &mut Marshaller) {
        m.put(self.value, W);
    }

    fn unmarshal(_: &(), u: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
        Ok(Self::new(u.take(W)?))
    }
}

impl<const W: u32> Marshallable for SInt<W> {
    type Layout = ();

    fn width(_: &()) -> u32 {
        W
    }

    fn marshal(&self, _: &(), m: &mut Marshaller) {
        m.put(self.raw.get(), W);
    }

    fn unmarshal(_: &(), u: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
        Ok(Self { raw: UInt::new(u.take(W)?) })
    }
}

impl Marshallable for bool {
    type Layout = ();

    fn width(_: &()) -> u32 {
        1
    }

    fn marshal(&self, _: &(), m: &mut Marshaller) {
        m.put_bool(*self);
    }

    fn unmarshal(_: &(), u: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
        u.take_bool()
    }
}

macro_rules! impl_marshallable_prim {
    ($($t:ty),*) => {$(
        impl Marshallable for $t {
            type Layout = ();

            fn width(_: &()) -> u32 {
                <$t>::BITS
            }

            fn marshal(&self, _: &(), m: &mut Marshaller) {
                m.put(*self as u128, <$t>::BITS);
            }

            fn unmarshal(_: &(), u: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
                Ok(u.take(<$t>::BITS)? as $t)
            }
        }
    )*};
}

impl_marshallable_prim!(u8, u16, u32, u64);

impl Marshallable for Empty {
    type Layout = ();

    fn width(_: &()) -> u32 {
        0
    }

    fn marshal(&self, _: &(), _: &mut Marshaller) {}

    fn unmarshal(_: &(), _: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
        Ok(Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_wraps() {
        let a = UInt::<8>::new(0xFF);
        let b = UInt::<8>::new(2);
        assert_eq!(a.wrapping_add(b).get(), 1);
        assert_eq!(UInt::<4>::new(0x1F).get(), 0xF);
        assert_eq!(b.wrapping_sub(a).get(), 3);
    }

    #[test]
    fn test_uint_slices() {
        let mut v = UInt::<16>::new(0xABCD);
        assert_eq!(v.slice(4, 8), 0xBC);
        v.set_slice(0, 4, 0x1);
        assert_eq!(v.get(), 0xABC1);
        assert!(v.bit(0));
        v.set_bit(0, false);
        assert_eq!(v.get(), 0xABC0);
        assert_eq!(v.shr(8).get(), 0xAB);
        assert_eq!(v.shl(8).get(), 0xC000);
    }

    #[test]
    fn test_uint_128_bit() {
        let v = UInt::<128>::max_value();
        assert_eq!(v.get(), u128::MAX);
        assert_eq!(v.wrapping_add(UInt::new(1)).get(), 0);
    }

    #[test]
    fn test_sint_sign_extension() {
        let v = SInt::<4>::new(-3);
        assert_eq!(v.get(), -3);
        assert_eq!(v.to_bits().get(), 0b1101);
        assert_eq!(SInt::<4>::new(7).wrapping_add(SInt::new(1)).get(), -8);
    }

    #[test]
    fn test_log2_helpers() {
        assert_eq!(log2_ceil(1), 0);
        assert_eq!(log2_ceil(2), 1);
        assert_eq!(log2_ceil(4), 2);
        assert_eq!(log2_ceil(5), 3);
        assert_eq!(log2_ceil(256), 8);
        assert_eq!(index_width(1), 1);
        assert_eq!(index_width(8), 3);
    }

    #[test]
    fn test_check_width() {
        assert!(check_width(0).is_err());
        assert!(check_width(129).is_err());
        assert_eq!(check_width(128), Ok(128));
    }

    #[test]
    fn test_marshal_field_order_lsb_first() {
        let mut m = Marshaller::new();
        m.put(0x3, 2).put(0, 0).put(0x5, 4);
        let bits = m.finish();
        assert_eq!(bits.len(), 6);
        // First field lands in the lowest bits.
        assert_eq!(to_u128(&bits), 0b0101_11);
    }

    #[test]
    fn test_unmarshal_underflow() {
        let bits = UInt::<8>::new(0x5A).to_bits(&());
        let mut u = Unmarshaller::new(&bits);
        assert_eq!(u.take(4).unwrap(), 0xA);
        assert!(matches!(u.take(8), Err(BitsError::Underflow { needed: 8, offset: 4, len: 8 })));
    }

    #[test]
    fn test_empty_is_noop() {
        let bits = Empty.to_bits(&());
        assert!(bits.is_empty());
        assert_eq!(Empty::from_bits(&(), &bits).unwrap(), Empty);
    }

    #[test]
    fn test_wide_bitvec() {
        let mut m = Marshaller::new();
        m.put(u128::MAX, 128).put(1, 1);
        let bits = m.finish();
        assert_eq!(bits.len(), 129);
        assert!(bits[128]);
        assert_eq!(bits[64..128].load_le::<u64>(), u64::MAX);
        let mut u = Unmarshaller::new(&bits);
        assert_eq!(u.take(128).unwrap(), u128::MAX);
        assert!(u.take_bool().unwrap());
        assert_eq!(u.remaining(), 0);
    }
}
