// ========================================================================================
//
//                               The orchestrator: offtarget
//
// ========================================================================================
//
// Owns the run from argument parsing to the result file. Every phase either
// completes or aborts the whole run; no partial output file is left behind by a
// failure before the write phase.

#![deny(dead_code)]
#![deny(unused_imports)]

use clap::Parser;
use log::{error, info};
use offtarget::config::{SearchConfig, THREADS_ENV};
use offtarget::decide::FORCE_SCALAR_ENV;
use offtarget::{io, pipeline, prepare};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

// ========================================================================================
//                              Command-line interface definition
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "offtarget",
    version,
    about = "Counts near-match sites of guide sequences across a transcriptome."
)]
struct Args {
    /// CSV of guides with a `Gene` column and a `Target` or `Sequence` column.
    #[clap(value_name = "GUIDES_CSV")]
    guides: PathBuf,

    /// Transcriptome FASTA, optionally gzip-compressed (`.gz`).
    #[clap(value_name = "REFERENCE_FASTA")]
    reference: PathBuf,

    /// Where to write the per-guide result table.
    #[clap(value_name = "OUTPUT_CSV")]
    output: PathBuf,

    /// Worker thread count. Overrides the OFFTARGET_THREADS environment variable.
    #[clap(long)]
    threads: Option<usize>,

    /// Use the portable scalar kernel even when a vector unit is available.
    #[clap(long)]
    scalar: bool,

    /// Replace the output file if it already exists.
    #[clap(long)]
    force: bool,
}

// ========================================================================================
//                              The main orchestration logic
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{e}");
        eprintln!("\nError: {e}");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let overall_start_time = Instant::now();

    // Check the output path first so a long run cannot end in a refused write.
    if args.output.exists() && !args.force {
        return Err(Box::new(io::LoadError::OutputExists(args.output.clone())));
    }

    // --- Phase 1: Loading ---
    let phase_start = Instant::now();
    let guides = io::read_guides(&args.guides)?;
    let reference = io::load_reference(&args.reference)?;
    info!("Inputs loaded in {:.2?}", phase_start.elapsed());

    // --- Phase 2: Preparation ---
    let plan = prepare::prepare_search(guides, reference)?;

    // --- Phase 3: Search ---
    let config = SearchConfig::resolve(args.threads, args.scalar);
    info!(
        "Using {} thread(s) (--threads, then {THREADS_ENV}) and the {} kernel (override with --scalar or {FORCE_SCALAR_ENV}=1)",
        config.threads, config.kernel_path
    );
    let outcome = pipeline::run(&plan, &config)?;

    // --- Phase 4: Output ---
    io::write_results(
        &args.output,
        plan.guides(),
        &outcome.results,
        plan.reference(),
        args.force,
    )?;

    let with_exact = outcome
        .results
        .iter()
        .filter(|r| !r.exact_transcripts.is_empty())
        .count();
    info!(
        "{with_exact} of {} guides have at least one exact match",
        outcome.results.len()
    );
    info!(
        "Wrote {} in {:.2?}",
        args.output.display(),
        overall_start_time.elapsed()
    );
    Ok(())
}
