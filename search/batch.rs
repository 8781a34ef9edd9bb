// ========================================================================================
//
//                   The batch scan: One pass of the reference per guide group
//
// ========================================================================================
//
// A batch is up to `BATCH_WIDTH` consecutive guides. Scanning it means walking
// every scannable offset of the reference once, in increasing order, and for
// each offset:
//
// 1.  skipping offsets the valid-position mask excludes,
// 2.  asking the transcript locator which transcript owns the offset,
// 3.  deciding which guides' windows stay inside that transcript,
// 4.  running the kernel on those guides, and
// 5.  recording the results in the batch-private hit aggregator.
//
// Batches share nothing mutable. The aggregator lives exactly as long as the scan
// and is moved into the caller's result slots when the scan completes.

use crate::decide::Kernel;
use crate::kernel::{BATCH_WIDTH, GuideBatch};
use crate::locator::TranscriptLocator;
use crate::prepare::SearchPlan;
use crate::types::{GuideResult, LANE_WIDTH, MAX_MISMATCHES, NUM_BUCKETS, TranscriptIndex};

/// Per-guide histograms and deduplicated exact-hit sets for one batch.
#[derive(Debug)]
pub struct HitAggregator {
    histograms: [[u64; NUM_BUCKETS]; BATCH_WIDTH],
    exact_hits: [Vec<TranscriptIndex>; BATCH_WIDTH],
    count: usize,
}

impl HitAggregator {
    pub fn new(count: usize) -> Self {
        debug_assert!(count <= BATCH_WIDTH);
        Self {
            histograms: [[0; NUM_BUCKETS]; BATCH_WIDTH],
            exact_hits: Default::default(),
            count,
        }
    }

    /// Records one window's mismatch count for `slot`. Counts above
    /// `MAX_MISMATCHES` are dropped; exact matches add `transcript` to the slot's
    /// hit set unless it is already present.
    #[inline(always)]
    pub fn record(&mut self, slot: usize, mismatches: u8, transcript: TranscriptIndex) {
        let mismatches = mismatches as usize;
        if mismatches > MAX_MISMATCHES {
            return;
        }
        self.histograms[slot][mismatches] += 1;
        if mismatches == 0 && !self.exact_hits[slot].contains(&transcript) {
            self.exact_hits[slot].push(transcript);
        }
    }

    /// Moves the accumulated results into the caller's slots, one per guide.
    pub fn drain_into(self, out: &mut [GuideResult]) {
        debug_assert_eq!(out.len(), self.count);
        for ((slot, histogram), hits) in out.iter_mut().zip(self.histograms).zip(self.exact_hits) {
            slot.histogram = histogram;
            slot.exact_transcripts = hits;
        }
    }
}

/// Scans the whole reference for one batch of guides.
///
/// `first_guide` is the global index of the batch's first guide; `out` holds the
/// batch's result slots and must have one entry per guide.
pub fn scan_batch(plan: &SearchPlan, kernel: &Kernel, first_guide: usize, out: &mut [GuideResult]) {
    let guides = &plan.guides()[first_guide..first_guide + out.len()];
    let batch = GuideBatch::new(guides);
    let mut aggregator = HitAggregator::new(batch.count());

    let reference = plan.reference();
    let buffer = reference.buffer();
    let valid = plan.valid_positions();
    let limit = reference.search_limit();
    let mut locator = TranscriptLocator::new(reference.transcripts());
    let mut mismatches = [0u8; BATCH_WIDTH];

    for position in 0..limit {
        if !valid[position] {
            continue;
        }
        let Some((transcript, record)) = locator.advance_to(position) else {
            continue;
        };
        let transcript_end = record.end();

        let mut active = 0u8;
        for slot in 0..batch.count() {
            if position + batch.len_of(slot) <= transcript_end {
                active |= 1 << slot;
            }
        }
        if active == 0 {
            continue;
        }

        // `limit` leaves a full window of padding, so this slice is always in bounds.
        let Ok(window) = <&[u8; LANE_WIDTH]>::try_from(&buffer[position..position + LANE_WIDTH])
        else {
            continue;
        };
        kernel.count(window, &batch, active, &mut mismatches);

        for slot in 0..batch.count() {
            if active & (1 << slot) != 0 {
                aggregator.record(slot, mismatches[slot], transcript);
            }
        }
    }

    aggregator.drain_into(out);
}
