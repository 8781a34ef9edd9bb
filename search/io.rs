// ========================================================================================
//
//                        Input loading & result writing
//
// ========================================================================================
//
// ### Purpose ###
//
// This module turns files into the in-memory contracts the engine consumes, and
// the engine's results back into a file:
//
// -   a guide table (CSV with a `Gene` column and a `Sequence` or `Target` column),
// -   a transcriptome FASTA, plain or gzip-compressed, laid out into a sentinel-padded
//     `Reference`, and
// -   a result CSV with one row per guide, in input order.
//
// No scanning logic lives here.

use crate::pipeline::resolve_hits;
use crate::types::{Guide, GuideResult, Reference, ReferenceBuilder};
use flate2::read::MultiGzDecoder;
use log::{debug, info, warn};
use memchr::memchr_iter;
use memmap2::Mmap;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column holding the gene label.
pub const GENE_COLUMN: &str = "Gene";
/// Column holding the guide sequence.
pub const SEQUENCE_COLUMN: &str = "Sequence";
/// Preferred sequence column, used when present.
pub const TARGET_COLUMN: &str = "Target";
/// Separator for the list-valued output columns.
pub const LIST_SEPARATOR: &str = ";";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("I/O error for file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("The guide file {path} has no '{column}' column.")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("Line {line} of {path} has an empty '{column}' field.")]
    EmptyField {
        path: PathBuf,
        line: u64,
        column: &'static str,
    },
    #[error("The reference file {0} contains no sequence.")]
    EmptyReference(PathBuf),
    #[error("Output file '{0}' already exists. It will not be overwritten; remove it or pass --force.")]
    OutputExists(PathBuf),
}

impl LoadError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path) -> impl FnOnce(csv::Error) -> Self + '_ {
        move |source| Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ========================================================================================
//                                       Guides
// ========================================================================================

/// Reads guides from a CSV file, preserving row order.
pub fn read_guides(path: &Path) -> Result<Vec<Guide>, LoadError> {
    let file = File::open(path).map_err(LoadError::io(path))?;
    read_guides_from(file, path)
}

/// Reads guides from any CSV source. `path` is only used in error messages.
pub fn read_guides_from<R: Read>(source: R, path: &Path) -> Result<Vec<Guide>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(source);

    let headers = reader.headers().map_err(LoadError::csv(path))?.clone();
    let find = |name: &str| headers.iter().position(|h| h == name);
    let gene_idx = find(GENE_COLUMN).ok_or_else(|| LoadError::MissingColumn {
        path: path.to_path_buf(),
        column: GENE_COLUMN,
    })?;
    let (seq_idx, seq_column) = match (find(TARGET_COLUMN), find(SEQUENCE_COLUMN)) {
        (Some(idx), _) => (idx, TARGET_COLUMN),
        (None, Some(idx)) => (idx, SEQUENCE_COLUMN),
        (None, None) => {
            return Err(LoadError::MissingColumn {
                path: path.to_path_buf(),
                column: SEQUENCE_COLUMN,
            });
        }
    };

    let mut guides = Vec::new();
    for record in reader.records() {
        let record = record.map_err(LoadError::csv(path))?;
        let line = record.position().map_or(0, |p| p.line());
        let field = |idx: usize, column: &'static str| match record.get(idx) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(LoadError::EmptyField {
                path: path.to_path_buf(),
                line,
                column,
            }),
        };
        let gene = field(gene_idx, GENE_COLUMN)?;
        let sequence = field(seq_idx, seq_column)?;
        guides.push(Guide::new(gene, sequence.as_bytes()));
    }

    info!("Loaded {} guides from {}", guides.len(), path.display());
    Ok(guides)
}

// ========================================================================================
//                                  Reference FASTA
// ========================================================================================

/// Loads a FASTA transcriptome into a sentinel-padded `Reference`.
///
/// Files ending in `.gz` are decompressed in memory; anything else is mapped.
pub fn load_reference(path: &Path) -> Result<Reference, LoadError> {
    let file = File::open(path).map_err(LoadError::io(path))?;
    let reference = if path.extension().is_some_and(|ext| ext == "gz") {
        let mut bytes = Vec::new();
        MultiGzDecoder::new(file)
            .read_to_end(&mut bytes)
            .map_err(LoadError::io(path))?;
        parse_fasta(&bytes)
    } else {
        let is_empty = file.metadata().map_err(LoadError::io(path))?.len() == 0;
        if is_empty {
            return Err(LoadError::EmptyReference(path.to_path_buf()));
        }
        // SAFETY: the mapping is read-only and dropped before this function
        // returns; the file is not expected to be modified while it is parsed.
        let mmap = unsafe { Mmap::map(&file) }.map_err(LoadError::io(path))?;
        parse_fasta(&mmap)
    };

    if reference.transcripts().is_empty() {
        return Err(LoadError::EmptyReference(path.to_path_buf()));
    }
    info!(
        "Loaded reference {}: {} transcripts, {} bases ({} bytes with padding)",
        path.display(),
        reference.transcripts().len(),
        reference.total_bases(),
        reference.len()
    );
    Ok(reference)
}

/// Parses FASTA bytes. Headers start records, sequence lines are concatenated,
/// carriage returns and blank lines are ignored.
pub fn parse_fasta(bytes: &[u8]) -> Reference {
    let mut builder = ReferenceBuilder::with_capacity(bytes.len());
    let mut header: Option<&[u8]> = None;
    let mut sequence: Vec<u8> = Vec::new();
    let mut skipped = 0usize;

    let mut flush = |header: Option<&[u8]>, sequence: &mut Vec<u8>, builder: &mut ReferenceBuilder| {
        if let Some(header) = header {
            let (id, gene) = parse_header(header);
            if !builder.push_transcript(id, gene, sequence) {
                skipped += 1;
            }
        }
        sequence.clear();
    };

    let mut line_start = 0usize;
    let line_ends = memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
    for line_end in line_ends {
        let mut line = &bytes[line_start..line_end];
        line_start = line_end + 1;
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix(b">") {
            flush(header, &mut sequence, &mut builder);
            header = Some(rest);
        } else if header.is_some() {
            sequence.extend_from_slice(line);
        }
    }
    flush(header, &mut sequence, &mut builder);

    if skipped > 0 {
        warn!("Skipped {skipped} record(s) with an empty sequence");
    }
    debug!("Parsed {} FASTA records", builder.num_transcripts());
    builder.finish()
}

/// Extracts the transcript id and gene symbol from a FASTA header (without `>`).
///
/// The id is the first token, cut at `|` or whitespace. The gene symbol is the
/// sixth `|` field of a GENCODE header, else an Ensembl `gene_symbol:` token,
/// else `Unknown`.
pub fn parse_header(header: &[u8]) -> (String, String) {
    let text = String::from_utf8_lossy(header);
    let text = text.trim();
    let id = text
        .split(|c: char| c == '|' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_string();

    let gencode_symbol = text.split('|').nth(5).map(str::trim).filter(|s| !s.is_empty());
    let ensembl_symbol = || {
        text.split_whitespace()
            .find_map(|token| token.strip_prefix("gene_symbol:"))
            .filter(|s| !s.is_empty())
    };
    let gene = gencode_symbol
        .or_else(ensembl_symbol)
        .unwrap_or("Unknown")
        .to_string();
    (id, gene)
}

// ========================================================================================
//                                       Results
// ========================================================================================

/// Column names of the result table, in row order.
pub const RESULT_HEADER: [&str; 10] = [
    "Gene",
    "Sequence",
    "MM0",
    "MM1",
    "MM2",
    "MM3",
    "MM4",
    "MM5",
    "MM0_Transcripts",
    "MM0_Genes",
];

// Field order must follow `RESULT_HEADER`.
#[derive(Serialize)]
struct ResultRow<'a> {
    gene: &'a str,
    sequence: &'a str,
    mm0: u64,
    mm1: u64,
    mm2: u64,
    mm3: u64,
    mm4: u64,
    mm5: u64,
    transcripts: String,
    genes: String,
}

/// Writes one row per guide to `path`, refusing to replace an existing file
/// unless `overwrite` is set.
pub fn write_results(
    path: &Path,
    guides: &[Guide],
    results: &[GuideResult],
    reference: &Reference,
    overwrite: bool,
) -> Result<(), LoadError> {
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let file = options.open(path).map_err(|source| {
        if source.kind() == io::ErrorKind::AlreadyExists {
            LoadError::OutputExists(path.to_path_buf())
        } else {
            LoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    write_results_to(BufWriter::new(file), path, guides, results, reference)?;
    info!("Wrote {} result rows to {}", results.len(), path.display());
    Ok(())
}

/// Writes result rows to any sink. `path` is only used in error messages.
pub fn write_results_to<W: io::Write>(
    sink: W,
    path: &Path,
    guides: &[Guide],
    results: &[GuideResult],
    reference: &Reference,
) -> Result<(), LoadError> {
    // The header is written up front so a table with no guides still has one.
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(sink);
    writer
        .write_record(RESULT_HEADER)
        .map_err(LoadError::csv(path))?;
    for (guide, result) in guides.iter().zip(results) {
        let hits = resolve_hits(result, reference);
        let h = &result.histogram;
        writer
            .serialize(ResultRow {
                gene: &guide.gene,
                sequence: guide.sequence_str(),
                mm0: h[0],
                mm1: h[1],
                mm2: h[2],
                mm3: h[3],
                mm4: h[4],
                mm5: h[5],
                transcripts: hits.transcript_ids.join(LIST_SEPARATOR),
                genes: hits.gene_symbols.join(LIST_SEPARATOR),
            })
            .map_err(LoadError::csv(path))?;
    }
    writer.flush().map_err(LoadError::io(path))?;
    Ok(())
}
