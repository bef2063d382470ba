//src/hits.rs

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;
use flate2::read::MultiGzDecoder;

use crate::error::HitParseError;
use crate::types::Hit;

/// Query id -> query length, e.g. from the FASTA the queries came from.
pub type QueryLengths = AHashMap<String, u64>;

/// Layout of the alignment lines handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HitFormat {
    /// Decide from the first data line.
    #[default]
    Guess,
    /// `subject  query  query_length  start  end  mismatches`
    Normalized,
    /// BLAST tabular (`-outfmt 6` / m8).
    Blast,
    /// LAST tabular (0-based query start).
    Last,
    Sam,
}

/// Hits read from one file, in file order.
#[derive(Debug, Default)]
pub struct HitBatch {
    pub hits: Vec<Hit>,
    pub skipped: usize,
    pub format: HitFormat,
}

/// Opens a file, transparently decompressing `.gz`.
pub fn open_maybe_gz<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let f = File::open(path)?;
    let is_gz = path.extension().map(|ext| ext == "gz").unwrap_or(false);

    let reader: Box<dyn BufRead> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    Ok(reader)
}

/// Sequence lengths from a (possibly multi-line, possibly gzipped) FASTA file.
pub fn read_fasta_lengths<P: AsRef<Path>>(path: P) -> io::Result<QueryLengths> {
    let reader = open_maybe_gz(path)?;
    let mut lengths = QueryLengths::new();
    let mut current: Option<String> = None;
    let mut len = 0u64;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if let Some(header) = line.strip_prefix('>') {
            if let Some(id) = current.take() {
                lengths.insert(id, len);
            }
            current = header.split_whitespace().next().map(str::to_string);
            len = 0;
        } else if current.is_some() {
            len += line.len() as u64;
        }
    }
    if let Some(id) = current {
        lengths.insert(id, len);
    }
    Ok(lengths)
}

/// Guesses the format from the columns of one data line.
pub fn guess_format(fields: &[&str]) -> Option<HitFormat> {
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match fields.len() {
        6 => Some(HitFormat::Normalized),
        12 if numeric(fields[0]) => Some(HitFormat::Last),
        n if n >= 12 && numeric(fields[8]) => Some(HitFormat::Blast),
        n if n > 13 => Some(HitFormat::Sam),
        _ => None,
    }
}

fn column<T: std::str::FromStr>(fields: &[&str], idx: usize) -> Result<T, HitParseError> {
    let value = fields.get(idx).ok_or(HitParseError::TooFewColumns {
        expected: idx + 1,
        found: fields.len(),
    })?;
    value.trim().parse().map_err(|_| HitParseError::BadNumber {
        column: idx + 1,
        value: value.to_string(),
    })
}

fn require_columns(fields: &[&str], expected: usize) -> Result<(), HitParseError> {
    if fields.len() < expected {
        Err(HitParseError::TooFewColumns {
            expected,
            found: fields.len(),
        })
    } else {
        Ok(())
    }
}

fn checked_hit(
    subject: &str,
    query_id: &str,
    query_length: u64,
    start: u64,
    end: u64,
    mismatches: u64,
) -> Result<Hit, HitParseError> {
    if start == 0 || start > end || end > query_length {
        return Err(HitParseError::BadRange {
            start,
            end,
            length: query_length,
        });
    }
    Ok(Hit {
        subject: subject.to_string(),
        query_id: query_id.to_string(),
        query_length,
        query_start: start,
        query_end: end,
        mismatches,
    })
}

/// `(length, op)` pairs of a CIGAR string; `None` on syntax errors.
fn cigar_ops(cigar: &str) -> Option<Vec<(u64, char)>> {
    let mut ops = Vec::new();
    let mut num = String::new();
    for c in cigar.chars() {
        if c.is_ascii_digit() {
            num.push(c);
        } else {
            ops.push((num.parse().ok()?, c));
            num.clear();
        }
    }
    if num.is_empty() {
        Some(ops)
    } else {
        None
    }
}

/// Parses one data line. `Ok(None)` marks lines that carry no hit (SAM header,
/// unmapped record).
pub fn parse_hit_line(
    line: &str,
    format: HitFormat,
    lengths: &QueryLengths,
) -> Result<Option<Hit>, HitParseError> {
    let fields: Vec<&str> = line.split('\t').collect();
    let format = match format {
        HitFormat::Guess => guess_format(&fields).ok_or(HitParseError::UnknownFormat)?,
        f => f,
    };

    match format {
        HitFormat::Normalized => {
            require_columns(&fields, 6)?;
            checked_hit(
                fields[0],
                fields[1],
                column(&fields, 2)?,
                column(&fields, 3)?,
                column(&fields, 4)?,
                column(&fields, 5)?,
            )
            .map(Some)
        }
        HitFormat::Blast => {
            require_columns(&fields, 8)?;
            let qid = fields[0];
            let qlen = *lengths
                .get(qid)
                .ok_or_else(|| HitParseError::MissingLength(qid.to_string()))?;
            let mismatch: u64 = column(&fields, 4)?;
            let gap_open: u64 = column(&fields, 5)?;
            checked_hit(
                fields[1],
                qid,
                qlen,
                column(&fields, 6)?,
                column(&fields, 7)?,
                mismatch + gap_open,
            )
            .map(Some)
        }
        HitFormat::Last => {
            require_columns(&fields, 11)?;
            let qid = fields[6];
            let qlen = match lengths.get(qid) {
                Some(&len) => len,
                None => column(&fields, 10)?,
            };
            let start0: u64 = column(&fields, 7)?;
            let aln_size: u64 = column(&fields, 8)?;
            checked_hit(fields[1], qid, qlen, start0 + 1, start0 + aln_size, 0).map(Some)
        }
        HitFormat::Sam => {
            if line.starts_with('@') {
                return Ok(None);
            }
            require_columns(&fields, 11)?;
            let flag: u32 = column(&fields, 1)?;
            if flag & 0x4 != 0 || fields[2] == "*" {
                return Ok(None);
            }

            let qid = fields[0];
            let ops = cigar_ops(fields[5]).ok_or_else(|| HitParseError::BadNumber {
                column: 6,
                value: fields[5].to_string(),
            })?;
            let clip = |op: Option<&(u64, char)>| match op {
                Some(&(n, 'S')) | Some(&(n, 'H')) => n,
                _ => 0,
            };
            let mut clip5 = clip(ops.first());
            let mut clip3 = if ops.len() > 1 { clip(ops.last()) } else { 0 };
            if flag & 0x10 != 0 {
                std::mem::swap(&mut clip5, &mut clip3);
            }

            let qlen = match lengths.get(qid) {
                Some(&len) => len,
                None if fields[9] != "*" => {
                    let hard: u64 = ops.iter().filter(|(_, op)| *op == 'H').map(|(n, _)| n).sum();
                    fields[9].len() as u64 + hard
                }
                None => return Err(HitParseError::MissingLength(qid.to_string())),
            };

            let nm = fields[11..]
                .iter()
                .find_map(|f| f.strip_prefix("NM:i:"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            checked_hit(
                fields[2],
                qid,
                qlen,
                clip5 + 1,
                qlen.saturating_sub(clip3),
                nm,
            )
            .map(Some)
        }
        HitFormat::Guess => Err(HitParseError::UnknownFormat),
    }
}

/// Reads all hits from `reader`, skipping comments and logging malformed lines.
pub fn read_hits_from<R: BufRead>(
    reader: R,
    source: &str,
    format: HitFormat,
    lengths: &QueryLengths,
) -> io::Result<HitBatch> {
    let mut batch = HitBatch {
        format,
        ..HitBatch::default()
    };

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if batch.format == HitFormat::Guess {
            if line.starts_with('@') {
                // SAM header
                batch.format = HitFormat::Sam;
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            match guess_format(&fields) {
                Some(f) => {
                    log::info!("Guessed {:?} input format for {}", f, source);
                    batch.format = f;
                }
                None => {
                    log::warn!("{}:{}: skipping unrecognized hit record", source, idx + 1);
                    batch.skipped += 1;
                    continue;
                }
            }
        }

        match parse_hit_line(line, batch.format, lengths) {
            Ok(Some(hit)) => batch.hits.push(hit),
            Ok(None) => {}
            Err(e) => {
                log::warn!("{}:{}: skipping hit record: {}", source, idx + 1, e);
                batch.skipped += 1;
            }
        }
    }

    // Data lines were present but none had a recognizable layout.
    if batch.format == HitFormat::Guess && batch.skipped > 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{source}: cannot recognize alignment format"),
        ));
    }

    Ok(batch)
}

/// Reads all hits from a file (gzip allowed).
pub fn read_hits<P: AsRef<Path>>(
    path: P,
    format: HitFormat,
    lengths: &QueryLengths,
) -> io::Result<HitBatch> {
    let path = path.as_ref();
    let reader = open_maybe_gz(path)?;
    let batch = read_hits_from(reader, &path.display().to_string(), format, lengths)?;
    log::info!(
        "Read {} hits from {} ({} skipped)",
        batch.hits.len(),
        path.display(),
        batch.skipped
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn no_lengths() -> QueryLengths {
        QueryLengths::new()
    }

    #[test]
    fn test_normalized_line() {
        let hit = parse_hit_line("NC_000964.3\tq1\t100\t1\t50\t2", HitFormat::Normalized, &no_lengths())
            .unwrap()
            .unwrap();
        assert_eq!(hit.subject, "NC_000964.3");
        assert_eq!(hit.query_id, "q1");
        assert_eq!((hit.query_length, hit.query_start, hit.query_end, hit.mismatches), (100, 1, 50, 2));
    }

    #[test]
    fn test_bad_coordinates_rejected() {
        let err = parse_hit_line("X1\tq1\t100\t60\t50\t0", HitFormat::Normalized, &no_lengths()).unwrap_err();
        assert!(matches!(err, HitParseError::BadRange { .. }));
        let err = parse_hit_line("X1\tq1\t100\t1\t101\t0", HitFormat::Normalized, &no_lengths()).unwrap_err();
        assert!(matches!(err, HitParseError::BadRange { .. }));
        let err = parse_hit_line("X1\tq1\t100\t1\t50\tfoo", HitFormat::Normalized, &no_lengths()).unwrap_err();
        assert_eq!(
            err,
            HitParseError::BadNumber {
                column: 6,
                value: "foo".to_string()
            }
        );
    }

    #[test]
    fn test_blast_line_uses_length_table() {
        let line = "ctg1\tgi|1|ref|NC_000913.3|\t99.0\t100\t1\t1\t11\t110\t5000\t5099\t1e-40\t180";
        let err = parse_hit_line(line, HitFormat::Blast, &no_lengths()).unwrap_err();
        assert_eq!(err, HitParseError::MissingLength("ctg1".to_string()));

        let mut lengths = QueryLengths::new();
        lengths.insert("ctg1".to_string(), 500);
        let hit = parse_hit_line(line, HitFormat::Blast, &lengths).unwrap().unwrap();
        assert_eq!((hit.query_start, hit.query_end, hit.mismatches, hit.query_length), (11, 110, 2, 500));
        assert_eq!(hit.subject, "gi|1|ref|NC_000913.3|");
    }

    #[test]
    fn test_last_line_is_zero_based() {
        let line = "350\tNC_000964.3\t1000\t200\t+\t4215606\tread7\t10\t200\t+\t250\t200";
        assert_eq!(guess_format(&line.split('\t').collect::<Vec<_>>()), Some(HitFormat::Last));
        let hit = parse_hit_line(line, HitFormat::Last, &no_lengths()).unwrap().unwrap();
        assert_eq!((hit.query_start, hit.query_end, hit.query_length), (11, 210, 250));
    }

    #[test]
    fn test_sam_clips_and_strand() {
        let fwd = "r1\t0\tNC_000964.3\t100\t60\t5S40M5S\t*\t0\t0\tAAAAAAAAAACCCCCCCCCCGGGGGGGGGGTTTTTTTTTTAAAAAAAAAA\t*\tNM:i:3";
        let hit = parse_hit_line(fwd, HitFormat::Sam, &no_lengths()).unwrap().unwrap();
        assert_eq!((hit.query_start, hit.query_end, hit.query_length, hit.mismatches), (6, 45, 50, 3));

        let rev = "r2\t16\tNC_000964.3\t100\t60\t10S40M\t*\t0\t0\tAAAAAAAAAACCCCCCCCCCGGGGGGGGGGTTTTTTTTTTAAAAAAAAAA\t*";
        let hit = parse_hit_line(rev, HitFormat::Sam, &no_lengths()).unwrap().unwrap();
        assert_eq!((hit.query_start, hit.query_end, hit.mismatches), (1, 40, 0));

        let hard = "r3\t0\tNC_000964.3\t100\t60\t20H30M\t*\t0\t0\tAAAAAAAAAACCCCCCCCCCGGGGGGGGGG\t*";
        let hit = parse_hit_line(hard, HitFormat::Sam, &no_lengths()).unwrap().unwrap();
        assert_eq!((hit.query_start, hit.query_end, hit.query_length), (21, 50, 50));
    }

    #[test]
    fn test_sam_unmapped_and_header_skipped() {
        let unmapped = "r1\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\t*";
        assert_eq!(parse_hit_line(unmapped, HitFormat::Sam, &no_lengths()).unwrap(), None);
        assert_eq!(parse_hit_line("@SQ\tSN:x\tLN:10", HitFormat::Sam, &no_lengths()).unwrap(), None);
    }

    #[test]
    fn test_reader_skips_bad_records() {
        let text = "# comment\nA1\tq1\t100\t1\t50\t0\nA1\tq1\tabc\t1\t50\t0\nB2\tq1\t100\t40\t70\t1\n";
        let batch = read_hits_from(Cursor::new(text), "test", HitFormat::Guess, &no_lengths()).unwrap();
        assert_eq!(batch.format, HitFormat::Normalized);
        assert_eq!(batch.hits.len(), 2);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.hits[1].subject, "B2");
    }

    #[test]
    fn test_unrecognized_first_line_is_skipped() {
        let text = "NC_000001.1\tq1\t100\t1\nA1\tq1\t100\t1\t50\t0\nB2\tq1\t100\t40\t70\t1\n";
        let batch = read_hits_from(Cursor::new(text), "test", HitFormat::Guess, &no_lengths()).unwrap();
        assert_eq!(batch.format, HitFormat::Normalized);
        assert_eq!(batch.skipped, 1);
        let subjects: Vec<&str> = batch.hits.iter().map(|h| h.subject.as_str()).collect();
        assert_eq!(subjects, vec!["A1", "B2"]);
    }

    #[test]
    fn test_no_recognizable_line_is_an_error() {
        let text = "x\ty\nstill\tnot\thits\n";
        let err = read_hits_from(Cursor::new(text), "test", HitFormat::Guess, &no_lengths()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let empty = read_hits_from(Cursor::new("# only a comment\n"), "test", HitFormat::Guess, &no_lengths()).unwrap();
        assert!(empty.hits.is_empty());
    }

    #[test]
    fn test_read_gzipped_hits_and_fasta_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let hits_path = dir.path().join("hits.tsv.gz");
        {
            let f = File::create(&hits_path).unwrap();
            let mut gz = flate2::write::GzEncoder::new(f, flate2::Compression::default());
            gz.write_all(b"A1\tq1\t100\t1\t50\t0\n").unwrap();
            gz.finish().unwrap();
        }
        let batch = read_hits(&hits_path, HitFormat::Normalized, &no_lengths()).unwrap();
        assert_eq!(batch.hits.len(), 1);

        let fasta_path = dir.path().join("q.fa");
        std::fs::write(&fasta_path, ">q1 desc\nACGT\nACG\n>q2\nAC\n").unwrap();
        let lengths = read_fasta_lengths(&fasta_path).unwrap();
        assert_eq!(lengths.get("q1"), Some(&7));
        assert_eq!(lengths.get("q2"), Some(&2));
    }
}
