// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// Types that cross module boundaries. Anything used by a single module lives there.

use std::fmt;

/// The longest guide the engine accepts. A padded guide register must fit in a
/// single vector lane set, so this can never exceed `LANE_WIDTH`.
pub const MAX_GUIDE_LEN: usize = 30;

/// Mismatch counts above this value are discarded.
pub const MAX_MISMATCHES: usize = 5;

/// One histogram bucket per mismatch count in `0..=MAX_MISMATCHES`.
pub const NUM_BUCKETS: usize = MAX_MISMATCHES + 1;

/// The width, in bytes, of one reference window load.
pub const LANE_WIDTH: usize = 32;

/// The reserved filler byte placed between and after transcripts.
pub const SENTINEL: u8 = b'$';

/// The number of sentinels written after every transcript. It is one full window
/// wide so a fixed-width load starting at any scannable offset stays in bounds.
pub const SENTINEL_RUN: usize = LANE_WIDTH;

const _: () = assert!(MAX_GUIDE_LEN <= LANE_WIDTH);

/// Maps a raw input byte onto the normalized alphabet {A, C, G, T, N}.
///
/// Lower-case letters are folded, `U` is read as `T`, and anything that is not a
/// recognised base collapses to `N`. The sentinel can therefore never be produced.
#[inline(always)]
pub fn normalize_base(byte: u8) -> u8 {
    match byte.to_ascii_uppercase() {
        b'A' => b'A',
        b'C' => b'C',
        b'G' => b'G',
        b'T' | b'U' => b'T',
        _ => b'N',
    }
}

/// Normalizes a whole sequence into a fresh buffer.
pub fn normalize_sequence(raw: &[u8]) -> Vec<u8> {
    raw.iter().map(|&b| normalize_base(b)).collect()
}

// ========================================================================================
//                            Primitive Type Definitions
// ========================================================================================

/// An index into the ordered transcript list of a `Reference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TranscriptIndex(pub u32);

// ========================================================================================
//                                 Guides & transcripts
// ========================================================================================

/// One query sequence. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guide {
    /// The gene label the guide was designed against.
    pub gene: String,
    /// The normalized sequence.
    sequence: Vec<u8>,
}

impl Guide {
    /// Builds a guide, normalizing the raw sequence. Length limits are enforced by
    /// `prepare`, not here, so that the error can name every offending guide.
    pub fn new(gene: impl Into<String>, raw_sequence: &[u8]) -> Self {
        Self {
            gene: gene.into(),
            sequence: normalize_sequence(raw_sequence),
        }
    }

    #[inline(always)]
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// The sequence as text. Normalized bytes are always ASCII.
    pub fn sequence_str(&self) -> &str {
        std::str::from_utf8(&self.sequence).unwrap_or_default()
    }
}

/// Metadata for one transcript inside the concatenated reference buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptRecord {
    pub start: usize,
    pub len: usize,
    pub id: String,
    pub gene_symbol: String,
}

impl TranscriptRecord {
    /// One past the last base of this transcript.
    #[inline(always)]
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

// ========================================================================================
//                                  The reference buffer
// ========================================================================================

/// The concatenated, sentinel-separated transcriptome.
///
/// Instances are produced either by `ReferenceBuilder`, which lays out the buffer
/// itself, or by `prepare::validate_reference_parts`, which checks a bundle that
/// was assembled elsewhere. Either way, every record is followed by sentinels and
/// the buffer tail holds at least one window of padding.
#[derive(Debug)]
pub struct Reference {
    buffer: Vec<u8>,
    transcripts: Vec<TranscriptRecord>,
}

impl Reference {
    /// Crate-private constructor. Callers outside go through the builder or the
    /// validating entry point in `prepare`.
    pub(crate) fn from_validated(buffer: Vec<u8>, transcripts: Vec<TranscriptRecord>) -> Self {
        Self {
            buffer,
            transcripts,
        }
    }

    #[inline(always)]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    #[inline(always)]
    pub fn transcripts(&self) -> &[TranscriptRecord] {
        &self.transcripts
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Scan positions at or beyond this offset are never considered.
    #[inline(always)]
    pub fn search_limit(&self) -> usize {
        self.buffer.len().saturating_sub(LANE_WIDTH)
    }

    /// Total number of real (non-sentinel) bases.
    pub fn total_bases(&self) -> usize {
        self.transcripts.iter().map(|t| t.len).sum()
    }
}

/// Lays out transcripts into one contiguous buffer with sentinel runs.
#[derive(Debug, Default)]
pub struct ReferenceBuilder {
    buffer: Vec<u8>,
    transcripts: Vec<TranscriptRecord>,
}

impl ReferenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(bytes),
            transcripts: Vec::new(),
        }
    }

    /// Appends one transcript. Returns `false` (and records nothing) when the
    /// sequence is empty.
    pub fn push_transcript(
        &mut self,
        id: impl Into<String>,
        gene_symbol: impl Into<String>,
        raw_sequence: &[u8],
    ) -> bool {
        if raw_sequence.is_empty() {
            return false;
        }
        let start = self.buffer.len();
        self.buffer
            .extend(raw_sequence.iter().map(|&b| normalize_base(b)));
        self.buffer.extend(std::iter::repeat_n(SENTINEL, SENTINEL_RUN));
        self.transcripts.push(TranscriptRecord {
            start,
            len: raw_sequence.len(),
            id: id.into(),
            gene_symbol: gene_symbol.into(),
        });
        true
    }

    pub fn num_transcripts(&self) -> usize {
        self.transcripts.len()
    }

    pub fn finish(self) -> Reference {
        Reference::from_validated(self.buffer, self.transcripts)
    }
}

// ========================================================================================
//                                      Results
// ========================================================================================

/// The mismatch histogram and exact-hit set for one guide.
///
/// Zero-initialized before scanning and written once by the batch that owns the
/// guide. Counts only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuideResult {
    pub histogram: [u64; NUM_BUCKETS],
    /// Transcripts containing at least one exact match, each listed once, in scan order.
    pub exact_transcripts: Vec<TranscriptIndex>,
}

impl GuideResult {
    /// Total near-match sites across all buckets.
    pub fn total_sites(&self) -> u64 {
        self.histogram.iter().sum()
    }
}

/// Exact-match transcripts and genes resolved to their names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedHits {
    pub transcript_ids: Vec<String>,
    pub gene_symbols: Vec<String>,
}

impl fmt::Display for ResolvedHits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} transcript(s) across {} gene(s)",
            self.transcript_ids.len(),
            self.gene_symbols.len()
        )
    }
}
