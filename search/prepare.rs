// ========================================================================================
//
//                       The preparation phase: Validate, then index
//
// ========================================================================================
//
// Everything that can reject a run happens here, before a single window is
// compared. The output is a `SearchPlan`, a "proof token" whose existence
// guarantees that every guide fits the kernel, the reference is non-empty and
// well padded, and the valid-position mask has been computed.

use crate::types::{
    Guide, LANE_WIDTH, MAX_GUIDE_LEN, Reference, SENTINEL, TranscriptRecord,
};
use log::debug;
use thiserror::Error;

/// Every reason a run can be refused before scanning.
#[derive(Error, Debug)]
pub enum PrepError {
    #[error(
        "Guide #{index} for gene '{gene}' is {len} bases long; the maximum supported length is {max}."
    )]
    GuideTooLong {
        index: usize,
        gene: String,
        len: usize,
        max: usize,
    },
    #[error("Guide #{index} for gene '{gene}' has an empty sequence.")]
    EmptyGuide { index: usize, gene: String },
    #[error("The reference contains no transcripts or no sequence.")]
    EmptyReference,
    #[error("Malformed reference bundle: {0}")]
    MalformedReference(String),
}

/// The validated inputs for one search, plus the valid-position mask.
///
/// Owned by the orchestrator and shared read-only with every worker.
#[derive(Debug)]
pub struct SearchPlan {
    guides: Vec<Guide>,
    reference: Reference,
    valid: Vec<bool>,
    window_len: usize,
    num_valid: usize,
}

impl SearchPlan {
    #[inline(always)]
    pub fn guides(&self) -> &[Guide] {
        &self.guides
    }

    #[inline(always)]
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// `valid[i]` is true iff a window of `window_len` bases starting at `i`
    /// contains no sentinel.
    #[inline(always)]
    pub fn valid_positions(&self) -> &[bool] {
        &self.valid
    }

    /// The longest guide length in this run; the width the mask was built for.
    #[inline(always)]
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn num_valid_positions(&self) -> usize {
        self.num_valid
    }

    /// Hands the guides and reference back, e.g. for output formatting.
    pub fn into_parts(self) -> (Vec<Guide>, Reference) {
        (self.guides, self.reference)
    }
}

/// Validates guides and reference and builds the valid-position mask.
pub fn prepare_search(guides: Vec<Guide>, reference: Reference) -> Result<SearchPlan, PrepError> {
    validate_guides(&guides)?;
    if reference.is_empty() || reference.transcripts().is_empty() || reference.total_bases() == 0
    {
        return Err(PrepError::EmptyReference);
    }

    let window_len = guides
        .iter()
        .map(Guide::len)
        .max()
        .unwrap_or(0)
        .min(MAX_GUIDE_LEN);
    let valid = compute_valid_positions(reference.buffer(), window_len);
    let num_valid = valid.iter().filter(|&&v| v).count();
    debug!(
        "Valid-position mask built for window {window_len}: {num_valid} of {} offsets",
        valid.len()
    );

    Ok(SearchPlan {
        guides,
        reference,
        valid,
        window_len,
        num_valid,
    })
}

fn validate_guides(guides: &[Guide]) -> Result<(), PrepError> {
    for (index, guide) in guides.iter().enumerate() {
        if guide.is_empty() {
            return Err(PrepError::EmptyGuide {
                index,
                gene: guide.gene.clone(),
            });
        }
        if guide.len() > MAX_GUIDE_LEN {
            return Err(PrepError::GuideTooLong {
                index,
                gene: guide.gene.clone(),
                len: guide.len(),
                max: MAX_GUIDE_LEN,
            });
        }
    }
    Ok(())
}

/// Marks every offset from which `window_len` bases can be read without touching
/// a sentinel.
///
/// Single backward pass: count consecutive non-sentinel bytes from the end,
/// resetting at each sentinel.
///
/// The width is the longest guide of the run, so positions near a transcript's
/// tail that would fit a shorter guide are also excluded.
pub fn compute_valid_positions(buffer: &[u8], window_len: usize) -> Vec<bool> {
    let mut valid = vec![false; buffer.len()];
    let mut run = 0usize;
    for (slot, &byte) in valid.iter_mut().zip(buffer).rev() {
        if byte == SENTINEL {
            run = 0;
        } else {
            run += 1;
            *slot = run >= window_len;
        }
    }
    valid
}

/// Checks a reference bundle assembled outside `ReferenceBuilder`.
///
/// Records must be non-empty, in bounds, strictly increasing and non-overlapping,
/// hold only normalized bases, and be followed by a sentinel. The buffer must end
/// in at least one full window of sentinels.
pub fn validate_reference_parts(
    buffer: Vec<u8>,
    transcripts: Vec<TranscriptRecord>,
) -> Result<Reference, PrepError> {
    if buffer.is_empty() || transcripts.is_empty() {
        return Err(PrepError::EmptyReference);
    }

    let mut previous_end = 0usize;
    for (i, record) in transcripts.iter().enumerate() {
        if record.len == 0 {
            return Err(PrepError::MalformedReference(format!(
                "transcript '{}' has zero length",
                record.id
            )));
        }
        if i > 0 && record.start <= previous_end {
            return Err(PrepError::MalformedReference(format!(
                "transcript '{}' starts at {} but the previous one ends at {}",
                record.id, record.start, previous_end
            )));
        }
        let end = match record.start.checked_add(record.len) {
            Some(end) if end < buffer.len() => end,
            _ => {
                return Err(PrepError::MalformedReference(format!(
                    "transcript '{}' ({} + {}) runs past the buffer end ({})",
                    record.id,
                    record.start,
                    record.len,
                    buffer.len()
                )));
            }
        };
        if buffer[end] != SENTINEL {
            return Err(PrepError::MalformedReference(format!(
                "transcript '{}' is not followed by a sentinel run",
                record.id
            )));
        }
        if let Some(offset) = buffer[record.start..end]
            .iter()
            .position(|&b| !matches!(b, b'A' | b'C' | b'G' | b'T' | b'N'))
        {
            return Err(PrepError::MalformedReference(format!(
                "transcript '{}' holds byte {:?} at offset {}; expected one of A, C, G, T, N",
                record.id,
                char::from(buffer[record.start + offset]),
                record.start + offset
            )));
        }
        previous_end = end;
    }

    let tail_padding = buffer.iter().rev().take_while(|&&b| b == SENTINEL).count();
    if tail_padding < LANE_WIDTH {
        return Err(PrepError::MalformedReference(format!(
            "buffer ends with {tail_padding} sentinel(s); at least {LANE_WIDTH} are required"
        )));
    }

    Ok(Reference::from_validated(buffer, transcripts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ReferenceBuilder, SENTINEL_RUN};

    fn record(start: usize, len: usize, id: &str) -> TranscriptRecord {
        TranscriptRecord {
            start,
            len,
            id: id.to_string(),
            gene_symbol: "G".to_string(),
        }
    }

    #[test]
    fn valid_positions_respect_window_and_sentinels() {
        let buffer = b"ACGTA$$CG$";
        let valid = compute_valid_positions(buffer, 3);
        let expected = [true, true, true, false, false, false, false, false, false, false];
        assert_eq!(valid, expected);
    }

    #[test]
    fn valid_positions_with_window_one_cover_every_base() {
        let valid = compute_valid_positions(b"AC$G", 1);
        assert_eq!(valid, vec![true, true, false, true]);
    }

    #[test]
    fn short_guides_inherit_the_longest_window() {
        let mut builder = ReferenceBuilder::new();
        builder.push_transcript("t1", "G", b"ACGTACGT");
        let guides = vec![Guide::new("short", b"ACG"), Guide::new("long", b"ACGTAC")];
        let plan = prepare_search(guides, builder.finish()).unwrap();
        assert_eq!(plan.window_len(), 6);
        // Offsets 0..=2 fit six bases; offset 3 would fit "ACG" but is excluded.
        assert_eq!(plan.num_valid_positions(), 3);
        assert!(!plan.valid_positions()[3]);
    }

    #[test]
    fn overlong_guide_is_rejected() {
        let mut builder = ReferenceBuilder::new();
        builder.push_transcript("t1", "G", b"ACGT");
        let guides = vec![Guide::new("ok", b"ACG"), Guide::new("bad", &[b'A'; 31])];
        match prepare_search(guides, builder.finish()) {
            Err(PrepError::GuideTooLong { index, len, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(len, 31);
            }
            other => panic!("expected GuideTooLong, got {other:?}"),
        }
    }

    #[test]
    fn empty_guide_and_empty_reference_are_rejected() {
        let mut builder = ReferenceBuilder::new();
        builder.push_transcript("t1", "G", b"ACGT");
        let result = prepare_search(vec![Guide::new("e", b"")], builder.finish());
        assert!(matches!(result, Err(PrepError::EmptyGuide { .. })));

        let result = prepare_search(vec![Guide::new("g", b"ACG")], ReferenceBuilder::new().finish());
        assert!(matches!(result, Err(PrepError::EmptyReference)));
    }

    #[test]
    fn external_bundle_is_accepted_when_padded() {
        let mut buffer = b"ACGT".to_vec();
        buffer.extend(std::iter::repeat_n(SENTINEL, 2));
        buffer.extend_from_slice(b"GG");
        buffer.extend(std::iter::repeat_n(SENTINEL, SENTINEL_RUN));
        let reference =
            validate_reference_parts(buffer, vec![record(0, 4, "a"), record(6, 2, "b")]).unwrap();
        assert_eq!(reference.transcripts().len(), 2);
    }

    #[test]
    fn external_bundle_without_tail_padding_is_rejected() {
        let mut buffer = b"ACGT".to_vec();
        buffer.extend(std::iter::repeat_n(SENTINEL, 4));
        let result = validate_reference_parts(buffer, vec![record(0, 4, "a")]);
        assert!(matches!(result, Err(PrepError::MalformedReference(_))));
    }

    #[test]
    fn records_running_past_the_buffer_are_rejected() {
        let mut buffer = b"ACGT".to_vec();
        buffer.extend(std::iter::repeat_n(SENTINEL, SENTINEL_RUN));
        let huge = validate_reference_parts(
            buffer.clone(),
            vec![record(0, 4, "a"), record(usize::MAX, 2, "b")],
        );
        assert!(matches!(huge, Err(PrepError::MalformedReference(_))));

        let long = validate_reference_parts(buffer, vec![record(0, 4 + SENTINEL_RUN, "a")]);
        assert!(matches!(long, Err(PrepError::MalformedReference(_))));
    }

    #[test]
    fn unnormalized_bases_are_rejected() {
        let mut buffer = b"ACgT".to_vec();
        buffer.extend(std::iter::repeat_n(SENTINEL, SENTINEL_RUN));
        match validate_reference_parts(buffer, vec![record(0, 4, "a")]) {
            Err(PrepError::MalformedReference(msg)) => assert!(msg.contains("offset 2")),
            other => panic!("expected MalformedReference, got {other:?}"),
        }
    }

    #[test]
    fn overlapping_records_are_rejected() {
        let mut buffer = b"ACGTACGT".to_vec();
        buffer.extend(std::iter::repeat_n(SENTINEL, SENTINEL_RUN));
        let result = validate_reference_parts(buffer, vec![record(0, 8, "a"), record(4, 4, "b")]);
        assert!(matches!(result, Err(PrepError::MalformedReference(_))));
    }
}
