// ========================================================================================
//
//                  The scheduler: Parallel, contention-free batch execution
//
// ========================================================================================
//
// Guides are cut, in input order, into batches of `BATCH_WIDTH`. The result array
// is cut at the same boundaries, so every batch owns a disjoint slice of it and
// writes only there. Batches are handed to a dedicated rayon pool, whose work
// stealing balances batches that finish early against ones that do not.
//
// The only shared state is the read-only `SearchPlan`. There are no locks and no
// atomics on the result path.

use crate::batch;
use crate::config::SearchConfig;
use crate::decide::{Kernel, KernelPath};
use crate::kernel::BATCH_WIDTH;
use crate::prepare::{PrepError, SearchPlan};
use crate::types::{GuideResult, Reference, ResolvedHits};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use log::info;
use rayon::prelude::*;
use std::fmt;
use std::io::IsTerminal;
use std::time::{Duration, Instant};
use thiserror::Error;

// ========================================================================================
//                          Public API, context & error handling
// ========================================================================================

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to build the worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Prep(#[from] PrepError),
}

/// Summary figures for one completed run.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub kernel_path: KernelPath,
    pub threads: usize,
    pub batches: usize,
    pub guides: usize,
    pub transcripts: usize,
    pub buffer_len: usize,
    pub valid_positions: usize,
    pub elapsed: Duration,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} guides in {} batches against {} transcripts ({} bytes, {} valid offsets) on {} thread(s) with the {} kernel in {:.2?}",
            self.guides,
            self.batches,
            self.transcripts,
            self.buffer_len,
            self.valid_positions,
            self.threads,
            self.kernel_path,
            self.elapsed
        )
    }
}

/// The complete output of a run: one result per guide, in input order.
#[derive(Debug)]
pub struct SearchOutcome {
    pub results: Vec<GuideResult>,
    pub stats: RunStats,
}

fn create_progress_bar(len: u64, message: &str, visible: bool) -> ProgressBar {
    let draw_target = if visible && std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

// ========================================================================================
//                                   The main entry point
// ========================================================================================

/// Runs every batch of `plan` and returns one `GuideResult` per guide.
///
/// The run is all-or-nothing: the only failure after preparation is the thread
/// pool refusing to start, which happens before any batch runs.
pub fn run(plan: &SearchPlan, config: &SearchConfig) -> Result<SearchOutcome, PipelineError> {
    run_with_progress(plan, config, true)
}

/// As `run`, with control over the stderr progress bar.
pub fn run_with_progress(
    plan: &SearchPlan,
    config: &SearchConfig,
    show_progress: bool,
) -> Result<SearchOutcome, PipelineError> {
    let kernel = Kernel::for_path(config.kernel_path);
    let num_guides = plan.guides().len();
    let num_batches = num_guides.div_ceil(BATCH_WIDTH);

    info!(
        "Scanning {num_guides} guides in {num_batches} batches of up to {BATCH_WIDTH} with the {} kernel on {} thread(s)",
        kernel.path(),
        config.threads
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .thread_name(|i| format!("offtarget-worker-{i}"))
        .build()?;

    let pb = create_progress_bar(num_batches as u64, "Batches scanned", show_progress);
    let mut results = vec![GuideResult::default(); num_guides];
    let start = Instant::now();

    pool.install(|| {
        results
            .par_chunks_mut(BATCH_WIDTH)
            .with_max_len(1)
            .enumerate()
            .for_each(|(batch_idx, slots)| {
                batch::scan_batch(plan, &kernel, batch_idx * BATCH_WIDTH, slots);
                pb.inc(1);
            });
    });

    pb.finish_and_clear();
    let elapsed = start.elapsed();

    let stats = RunStats {
        kernel_path: kernel.path(),
        threads: config.threads,
        batches: num_batches,
        guides: num_guides,
        transcripts: plan.reference().transcripts().len(),
        buffer_len: plan.reference().len(),
        valid_positions: plan.num_valid_positions(),
        elapsed,
    };
    info!("Search complete: {stats}");

    Ok(SearchOutcome { results, stats })
}

/// Turns a result's transcript indices into identifiers and gene symbols.
///
/// Transcript ids keep scan order. Gene symbols are deduplicated, keeping the
/// first occurrence.
pub fn resolve_hits(result: &GuideResult, reference: &Reference) -> ResolvedHits {
    let records = reference.transcripts();
    let hit_records = || {
        result
            .exact_transcripts
            .iter()
            .filter_map(|t| records.get(t.0 as usize))
    };
    ResolvedHits {
        transcript_ids: hit_records().map(|r| r.id.clone()).collect(),
        gene_symbols: hit_records()
            .map(|r| r.gene_symbol.as_str())
            .unique()
            .map(str::to_string)
            .collect(),
    }
}
