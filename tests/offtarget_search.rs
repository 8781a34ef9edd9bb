use flate2::Compression;
use flate2::write::GzEncoder;
use offtarget::config::SearchConfig;
use offtarget::decide::KernelPath;
use offtarget::io::{self, LoadError};
use offtarget::pipeline;
use offtarget::prepare::{prepare_search, validate_reference_parts};
use offtarget::types::{
    Guide, GuideResult, LANE_WIDTH, MAX_GUIDE_LEN, MAX_MISMATCHES, Reference, ReferenceBuilder,
    SENTINEL, TranscriptIndex, TranscriptRecord,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::io::Write;
use std::path::Path;

const BASES: &[u8] = b"ACGT";

fn random_sequence(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| {
            if rng.gen_ratio(1, 200) {
                b'N'
            } else {
                BASES[rng.gen_range(0..BASES.len())]
            }
        })
        .collect()
}

/// Random transcripts, and guides that are partly lifted from them with a few
/// point mutations so every histogram bucket gets exercised.
fn random_inputs(seed: u64, num_transcripts: usize, num_guides: usize) -> (Vec<Vec<u8>>, Vec<Guide>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let transcripts: Vec<Vec<u8>> = (0..num_transcripts)
        .map(|_| {
            let len = rng.gen_range(1..400);
            random_sequence(&mut rng, len)
        })
        .collect();

    let guides = (0..num_guides)
        .map(|i| {
            let len = rng.gen_range(4..=MAX_GUIDE_LEN);
            let source = &transcripts[rng.gen_range(0..transcripts.len())];
            let mut sequence = if source.len() >= len && rng.gen_bool(0.8) {
                let start = rng.gen_range(0..=source.len() - len);
                source[start..start + len].to_vec()
            } else {
                random_sequence(&mut rng, len)
            };
            for _ in 0..rng.gen_range(0..4) {
                let at = rng.gen_range(0..len);
                sequence[at] = BASES[rng.gen_range(0..BASES.len())];
            }
            Guide::new(format!("G{i}"), &sequence)
        })
        .collect();
    (transcripts, guides)
}

fn build_reference(transcripts: &[Vec<u8>]) -> Reference {
    let mut builder = ReferenceBuilder::new();
    for (i, sequence) in transcripts.iter().enumerate() {
        builder.push_transcript(format!("T{i}"), format!("Gene{}", i % 7), sequence);
    }
    builder.finish()
}

/// Direct evaluation of the counting rules, one guide and one offset at a time.
/// Offsets are limited by the longest guide, as the engine's mask is.
fn brute_force(guides: &[Guide], reference: &Reference) -> Vec<GuideResult> {
    let window = guides.iter().map(Guide::len).max().unwrap_or(0);
    let buffer = reference.buffer();
    guides
        .iter()
        .map(|guide| {
            let mut result = GuideResult::default();
            for (t, record) in reference.transcripts().iter().enumerate() {
                if record.len < window {
                    continue;
                }
                let bases = &buffer[record.start..record.end()];
                for offset in 0..=record.len - window {
                    let mismatches = guide
                        .sequence()
                        .iter()
                        .zip(&bases[offset..])
                        .filter(|(a, b)| a != b)
                        .count();
                    if mismatches <= MAX_MISMATCHES {
                        result.histogram[mismatches] += 1;
                    }
                    let index = TranscriptIndex(t as u32);
                    if mismatches == 0 && !result.exact_transcripts.contains(&index) {
                        result.exact_transcripts.push(index);
                    }
                }
            }
            result
        })
        .collect()
}

fn search(guides: Vec<Guide>, reference: Reference, threads: usize, path: KernelPath) -> Vec<GuideResult> {
    let plan = prepare_search(guides, reference).unwrap();
    pipeline::run_with_progress(&plan, &SearchConfig::with_threads(threads, path), false)
        .unwrap()
        .results
}

#[test]
fn engine_matches_brute_force_on_random_inputs() {
    for seed in [1, 7, 42] {
        let (transcripts, guides) = random_inputs(seed, 40, 23);
        let expected = brute_force(&guides, &build_reference(&transcripts));
        let scalar = search(guides.clone(), build_reference(&transcripts), 3, KernelPath::Scalar);
        assert_eq!(scalar, expected, "scalar kernel, seed {seed}");
        let vector = search(guides, build_reference(&transcripts), 3, KernelPath::Vector);
        assert_eq!(vector, expected, "vector kernel, seed {seed}");
    }
}

#[test]
fn results_are_identical_across_thread_counts() {
    let (transcripts, guides) = random_inputs(99, 60, 37);
    let baseline = search(guides.clone(), build_reference(&transcripts), 1, KernelPath::Scalar);
    for threads in [2, 4, 8] {
        let results = search(guides.clone(), build_reference(&transcripts), threads, KernelPath::Vector);
        assert_eq!(results, baseline, "{threads} threads");
    }
}

#[test]
fn single_guide_two_transcript_scenario() {
    let transcripts = vec![b"ACGTACGT".to_vec(), b"ACGTACGA".to_vec()];
    let guides = vec![Guide::new("g", b"ACGTACGT")];
    let results = search(guides, build_reference(&transcripts), 2, KernelPath::Vector);
    assert_eq!(results[0].histogram, [1, 1, 0, 0, 0, 0]);
    assert_eq!(results[0].exact_transcripts, vec![TranscriptIndex(0)]);
}

#[test]
fn externally_built_bundle_with_single_sentinel_gaps_is_scanned_correctly() {
    // Full-width loads at the first transcript read straight into the second.
    let mut buffer = b"ACGTACGT".to_vec();
    buffer.push(SENTINEL);
    buffer.extend_from_slice(b"ACGTACGA");
    buffer.extend(std::iter::repeat_n(SENTINEL, LANE_WIDTH));
    let records = vec![
        TranscriptRecord {
            start: 0,
            len: 8,
            id: "A".to_string(),
            gene_symbol: "GA".to_string(),
        },
        TranscriptRecord {
            start: 9,
            len: 8,
            id: "B".to_string(),
            gene_symbol: "GB".to_string(),
        },
    ];

    for path in [KernelPath::Scalar, KernelPath::Vector] {
        let reference = validate_reference_parts(buffer.clone(), records.clone()).unwrap();
        let results = search(vec![Guide::new("g", b"ACGTACGT")], reference, 2, path);
        assert_eq!(results[0].histogram, [1, 1, 0, 0, 0, 0], "{path:?}");
        assert_eq!(results[0].exact_transcripts, vec![TranscriptIndex(0)], "{path:?}");
    }
}

#[test]
fn transcripts_shorter_than_the_longest_guide_are_skipped() {
    let transcripts = vec![b"ACGT".to_vec(), b"ACGTACGTACGT".to_vec()];
    let guides = vec![Guide::new("short", b"ACGT"), Guide::new("long", b"ACGTACGTAC")];
    let results = search(guides, build_reference(&transcripts), 1, KernelPath::Scalar);
    // The first transcript cannot hold a ten-base window, so it is never scanned.
    assert_eq!(results[0].exact_transcripts, vec![TranscriptIndex(1)]);
    assert_eq!(results[1].histogram[0], 1);
}

// ========================================================================================
//                                     File round trip
// ========================================================================================

fn write_inputs(dir: &Path, gzip: bool) -> (std::path::PathBuf, std::path::PathBuf) {
    let guides_path = dir.join("guides.csv");
    fs::write(
        &guides_path,
        "Gene,Sequence\nActb,ACGTACGTAC\nGapdh,ttttgggg\nNone,CCCCCCCCCC\n",
    )
    .unwrap();

    let fasta = ">ENST1.1|ENSG1.1|-|-|Actb-201|Actb|20|protein_coding|\nACGTACGTAC\nGGGGGGGGGG\n\
                 >ENST2.1|ENSG2.1|-|-|Actb-202|Actb|10|protein_coding|\nACGTACGTAC\n\
                 >ENST3.1 cdna gene_symbol:Gapdh\nAATTTTGGGGAA\n";
    let fasta_path = if gzip {
        let path = dir.join("transcripts.fa.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
        encoder.write_all(fasta.as_bytes()).unwrap();
        encoder.finish().unwrap();
        path
    } else {
        let path = dir.join("transcripts.fa");
        fs::write(&path, fasta).unwrap();
        path
    };
    (guides_path, fasta_path)
}

fn run_files(dir: &Path, gzip: bool) -> String {
    let (guides_path, fasta_path) = write_inputs(dir, gzip);
    let output = dir.join(if gzip { "gz.csv" } else { "plain.csv" });

    let guides = io::read_guides(&guides_path).unwrap();
    let reference = io::load_reference(&fasta_path).unwrap();
    let plan = prepare_search(guides, reference).unwrap();
    let outcome =
        pipeline::run_with_progress(&plan, &SearchConfig::with_threads(2, KernelPath::Scalar), false)
            .unwrap();
    io::write_results(&output, plan.guides(), &outcome.results, plan.reference(), false).unwrap();
    fs::read_to_string(output).unwrap()
}

#[test]
fn plain_and_gzip_references_produce_the_same_table() {
    let dir = tempfile::tempdir().unwrap();
    let plain = run_files(dir.path(), false);
    let gzip = run_files(dir.path(), true);
    assert_eq!(plain, gzip);

    let lines: Vec<&str> = plain.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[0],
        "Gene,Sequence,MM0,MM1,MM2,MM3,MM4,MM5,MM0_Transcripts,MM0_Genes"
    );
    assert!(lines[1].starts_with("Actb,ACGTACGTAC,2,"));
    assert!(lines[1].ends_with(",ENST1.1;ENST2.1,Actb"));
    assert!(lines[2].starts_with("Gapdh,TTTTGGGG,"));
    assert!(lines[2].ends_with(",ENST3.1,Gapdh"));
    assert!(lines[3].ends_with(",,"));
}

#[test]
fn existing_output_is_not_overwritten_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.csv");
    fs::write(&output, "keep me").unwrap();

    let reference = build_reference(&[b"ACGTACGT".to_vec()]);
    let guides = vec![Guide::new("g", b"ACGT")];
    let results = vec![GuideResult::default()];

    let refused = io::write_results(&output, &guides, &results, &reference, false);
    assert!(matches!(refused, Err(LoadError::OutputExists(_))));
    assert_eq!(fs::read_to_string(&output).unwrap(), "keep me");

    io::write_results(&output, &guides, &results, &reference, true).unwrap();
    assert!(fs::read_to_string(&output).unwrap().starts_with("Gene,Sequence"));
}

#[test]
fn missing_reference_file_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.fa");
    match io::load_reference(&missing) {
        Err(LoadError::Io { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected an I/O error, got {other:?}"),
    }
}
