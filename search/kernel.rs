// ========================================================================================
//
//                  The kernel: Batched mismatch counting over one window
//
// ========================================================================================
//
// This module contains the innermost loop of the search engine. Given one
// fixed-width window of reference bytes and a batch of up to `BATCH_WIDTH`
// pre-packed guides, it reports each active guide's Hamming distance to the
// window. It is allocation-free and holds no scientific logic beyond counting.
//
// Two implementations live here and must agree exactly:
//
// 1.  The vector path compares all `LANE_WIDTH` lanes at once, reduces the
//     lane-wise equality to a bitmask, trims it to the guide's length and counts
//     the set bits.
// 2.  The scalar path walks the guide byte by byte and stops as soon as the
//     running count passes `MAX_MISMATCHES`.
//
// Both return the count saturated at `MISMATCH_CUTOFF`, since nothing above
// `MAX_MISMATCHES` is ever recorded.

use crate::types::{Guide, LANE_WIDTH, MAX_GUIDE_LEN, MAX_MISMATCHES};
use std::simd::Simd;
use std::simd::cmp::SimdPartialEq;

/// Number of guides processed side by side at every scan position.
pub const BATCH_WIDTH: usize = 4;

/// The value both kernels report for any window with more than `MAX_MISMATCHES`.
pub const MISMATCH_CUTOFF: u8 = (MAX_MISMATCHES + 1) as u8;

/// Filler for guide register lanes beyond the guide's length. It never occurs in
/// a normalized reference buffer, so padded lanes can never compare equal.
pub const GUIDE_PAD: u8 = 0x00;

/// A full vector register of reference or guide bytes.
pub type LaneVec = Simd<u8, LANE_WIDTH>;

/// The signature every kernel implementation shares.
///
/// `active` is a bitmask over the batch slots: bit `i` set means slot `i` must be
/// evaluated. Slots whose bit is clear are left untouched in `out`.
///
/// It is an `unsafe fn` pointer because the vector implementation may be compiled
/// for instructions the host does not have. `decide::Kernel` is the only place
/// that holds one, and it only hands out implementations the host supports.
pub type BatchKernelFn =
    unsafe fn(window: &[u8; LANE_WIDTH], batch: &GuideBatch, active: u8, out: &mut [u8; BATCH_WIDTH]);

// ========================================================================================
//                             The packed guide batch
// ========================================================================================

/// Up to `BATCH_WIDTH` guides packed into padded fixed-width registers.
///
/// Built once per batch and read at every scan position of that batch.
#[derive(Debug, Clone)]
pub struct GuideBatch {
    registers: [LaneVec; BATCH_WIDTH],
    len_masks: [u64; BATCH_WIDTH],
    lens: [u8; BATCH_WIDTH],
    count: usize,
}

impl GuideBatch {
    /// Packs a slice of at most `BATCH_WIDTH` guides.
    ///
    /// # Panics
    /// Panics if given more than `BATCH_WIDTH` guides or a guide longer than
    /// `MAX_GUIDE_LEN`. Both are ruled out by `prepare` before any batch exists.
    pub fn new(guides: &[Guide]) -> Self {
        assert!(
            guides.len() <= BATCH_WIDTH,
            "a batch holds at most {BATCH_WIDTH} guides, got {}",
            guides.len()
        );
        let mut registers = [LaneVec::splat(GUIDE_PAD); BATCH_WIDTH];
        let mut len_masks = [0u64; BATCH_WIDTH];
        let mut lens = [0u8; BATCH_WIDTH];

        for (slot, guide) in guides.iter().enumerate() {
            let len = guide.len();
            assert!(len <= MAX_GUIDE_LEN, "guide length {len} exceeds {MAX_GUIDE_LEN}");
            let mut lanes = [GUIDE_PAD; LANE_WIDTH];
            lanes[..len].copy_from_slice(guide.sequence());
            registers[slot] = LaneVec::from_array(lanes);
            len_masks[slot] = length_mask(len);
            lens[slot] = len as u8;
        }

        Self {
            registers,
            len_masks,
            lens,
            count: guides.len(),
        }
    }

    /// Number of occupied slots.
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline(always)]
    pub fn len_of(&self, slot: usize) -> usize {
        self.lens[slot] as usize
    }

    /// The bitmask with one bit per occupied slot.
    #[inline(always)]
    pub fn all_active(&self) -> u8 {
        ((1u16 << self.count) - 1) as u8
    }

    #[inline(always)]
    fn guide_bytes(&self, slot: usize) -> &[u8] {
        &self.registers[slot].as_array()[..self.len_of(slot)]
    }
}

/// A mask with the low `len` bits set.
#[inline(always)]
pub const fn length_mask(len: usize) -> u64 {
    if len >= 64 { u64::MAX } else { (1u64 << len) - 1 }
}

// ========================================================================================
//                                 The vector path
// ========================================================================================

/// Lane-wise equality, reduced to a bitmask and counted.
///
/// Marked `inline(always)` so that each feature-gated wrapper below gets its own
/// copy compiled with that wrapper's instruction set.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[inline(always)]
fn count_batch_lanes(
    window: &[u8; LANE_WIDTH],
    batch: &GuideBatch,
    active: u8,
    out: &mut [u8; BATCH_WIDTH],
) {
    let reference = LaneVec::from_array(*window);
    for slot in 0..batch.count {
        if active & (1 << slot) == 0 {
            continue;
        }
        let equal = reference.simd_eq(batch.registers[slot]).to_bitmask();
        let matches = (equal & batch.len_masks[slot]).count_ones() as u8;
        let mismatches = batch.lens[slot] - matches;
        out[slot] = mismatches.min(MISMATCH_CUTOFF);
    }
}

/// The AVX2 build of the vector path.
///
/// # Safety
/// The host must support AVX2.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
pub unsafe fn count_batch_vector(
    window: &[u8; LANE_WIDTH],
    batch: &GuideBatch,
    active: u8,
    out: &mut [u8; BATCH_WIDTH],
) {
    count_batch_lanes(window, batch, active, out);
}

/// The NEON build of the vector path.
///
/// # Safety
/// The host must support NEON.
#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
pub unsafe fn count_batch_vector(
    window: &[u8; LANE_WIDTH],
    batch: &GuideBatch,
    active: u8,
    out: &mut [u8; BATCH_WIDTH],
) {
    count_batch_lanes(window, batch, active, out);
}

// ========================================================================================
//                                 The scalar path
// ========================================================================================

/// Byte-by-byte comparison with early exit once the count passes `MAX_MISMATCHES`.
#[inline]
pub fn count_mismatches_scalar(window: &[u8], guide: &[u8]) -> u8 {
    let mut mismatches = 0u8;
    for (&r, &g) in window.iter().zip(guide) {
        if r != g {
            mismatches += 1;
            if mismatches > MAX_MISMATCHES as u8 {
                return MISMATCH_CUTOFF;
            }
        }
    }
    mismatches
}

/// The scalar path over a whole batch. Always available.
pub fn count_batch_scalar(
    window: &[u8; LANE_WIDTH],
    batch: &GuideBatch,
    active: u8,
    out: &mut [u8; BATCH_WIDTH],
) {
    for slot in 0..batch.count {
        if active & (1 << slot) != 0 {
            out[slot] = count_mismatches_scalar(window, batch.guide_bytes(slot));
        }
    }
}
