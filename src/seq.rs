//! Wrap-around sequence-number arithmetic.
//!
//! Sequence numbers live in a 32-bit circular space.  Two numbers are
//! compared by the signed distance between them, which is correct as long
//! as they are less than `2^31` apart; windows here are a few KiB, so that
//! always holds.

/// `true` when `a` precedes `b` (strictly).
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `true` when `a` precedes or equals `b`.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

/// `true` when `seq` falls in the half-open range `[start, start + len)`.
#[inline]
pub fn in_window(seq: u32, start: u32, len: u32) -> bool {
    seq.wrapping_sub(start) < len
}
