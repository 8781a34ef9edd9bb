// ========================================================================================
//
//                               The transcript locator
//
// ========================================================================================
//
// Tracks which transcript a monotonically increasing scan position falls in.

use crate::types::{TranscriptIndex, TranscriptRecord};

/// A forward-only pointer over the ordered transcript list.
///
/// Each call to `advance_to` may only move forward. Over a whole scan the pointer
/// visits every boundary once, so the total cost is linear in the number of
/// transcripts no matter how many positions are queried.
#[derive(Debug)]
pub struct TranscriptLocator<'a> {
    transcripts: &'a [TranscriptRecord],
    current: usize,
    next_start: usize,
    #[cfg(debug_assertions)]
    last_position: usize,
}

impl<'a> TranscriptLocator<'a> {
    pub fn new(transcripts: &'a [TranscriptRecord]) -> Self {
        Self {
            transcripts,
            current: 0,
            next_start: Self::start_of(transcripts, 1),
            #[cfg(debug_assertions)]
            last_position: 0,
        }
    }

    #[inline(always)]
    fn start_of(transcripts: &[TranscriptRecord], index: usize) -> usize {
        transcripts.get(index).map_or(usize::MAX, |t| t.start)
    }

    /// Moves to the transcript owning `position` and returns it, or `None` when
    /// `position` lies before that transcript's first base (the sentinel gap
    /// just ahead of a boundary) or there are no transcripts at all.
    #[inline(always)]
    pub fn advance_to(&mut self, position: usize) -> Option<(TranscriptIndex, &'a TranscriptRecord)> {
        #[cfg(debug_assertions)]
        {
            debug_assert!(position >= self.last_position, "scan positions must not decrease");
            self.last_position = position;
        }
        while position >= self.next_start {
            self.current += 1;
            self.next_start = Self::start_of(self.transcripts, self.current + 1);
        }
        let record = self.transcripts.get(self.current)?;
        if position < record.start {
            return None;
        }
        Some((TranscriptIndex(self.current as u32), record))
    }
}
