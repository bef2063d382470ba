//src/accession.rs

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Error as IoError, ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ahash::AHashMap;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::TaxonomyLoadError;

/// Taxon id returned for accessions absent from the index.
pub const UNKNOWN_TAXID: u32 = 0;

/// How the accession index is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Binary search over the sorted file by byte offset.
    #[default]
    OnDisk,
    /// Read the whole index into a hash map up front.
    InMemory,
}

enum IndexSource {
    OnDisk {
        path: PathBuf,
        size: u64,
        reader: Mutex<BufReader<File>>,
    },
    InMemory(AHashMap<String, u32>),
}

/// A sorted `accession<TAB>taxid` table.
pub struct AccessionIndex {
    source: IndexSource,
}

impl AccessionIndex {
    /// Opens a sorted index for on-disk lookups; nothing but the file size is read.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TaxonomyLoadError> {
        let path = path.as_ref();
        let io_err = |source| TaxonomyLoadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;
        let size = file.metadata().map_err(io_err)?.len();

        log::info!("Opened accession index {} ({} bytes)", path.display(), size);

        Ok(Self {
            source: IndexSource::OnDisk {
                path: path.to_path_buf(),
                size,
                reader: Mutex::new(BufReader::new(file)),
            },
        })
    }

    /// Loads every entry of the index into memory.
    pub fn load_in_memory<P: AsRef<Path>>(path: P) -> Result<Self, TaxonomyLoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TaxonomyLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = BufReader::new(file);

        let mut entries = AHashMap::new();
        for (idx, line_result) in reader.lines().enumerate() {
            let line = line_result.map_err(|source| TaxonomyLoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let (acc, taxid) = parse_index_line(&line).ok_or_else(|| TaxonomyLoadError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: "expected '<accession>\\t<taxid>'".to_string(),
            })?;
            entries.insert(acc.to_string(), taxid);
        }

        log::info!("Loaded {} accessions from {}", entries.len(), path.display());
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            source: IndexSource::InMemory(map),
        }
    }

    pub fn open_with_mode<P: AsRef<Path>>(path: P, mode: IndexMode) -> Result<Self, TaxonomyLoadError> {
        match mode {
            IndexMode::OnDisk => Self::open(path),
            IndexMode::InMemory => Self::load_in_memory(path),
        }
    }

    /// Exact lookup of a version-stripped accession.
    pub fn lookup(&self, accession: &str) -> io::Result<Option<u32>> {
        match &self.source {
            IndexSource::InMemory(map) => Ok(map.get(accession).copied()),
            IndexSource::OnDisk { path, size, reader } => {
                let mut reader = reader.lock();
                let (found, seeks) = binary_search_sorted(&mut *reader, *size, accession)?;
                log::debug!(
                    "{}: {} seeks for {} ({})",
                    path.display(),
                    seeks,
                    accession,
                    if found.is_some() { "hit" } else { "miss" }
                );
                Ok(found)
            }
        }
    }
}

/// Splits `acc\ttaxid` into its parts.
fn parse_index_line(line: &str) -> Option<(&str, u32)> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let (acc, rest) = line.split_once('\t')?;
    let taxid = rest.split('\t').next()?.trim().parse().ok()?;
    Some((acc, taxid))
}

/// Binary search over a file of lines sorted by byte order of their first column.
///
/// The search keeps `[lo, hi)` as the byte range in which the target line must
/// start. Each step seeks to `mid - 1`, discards up to the next newline so the
/// next full line is the first one starting at or after `mid`, then compares its
/// key and narrows the range. Returns the taxon id and the number of steps.
pub fn binary_search_sorted<R: BufRead + Seek>(
    reader: &mut R,
    size: u64,
    key: &str,
) -> io::Result<(Option<u32>, u32)> {
    let target = key.as_bytes();
    let mut lo = 0u64;
    let mut hi = size;
    let mut seeks = 0u32;
    let mut buf = Vec::with_capacity(64);

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        seeks += 1;

        let line_start = if mid == 0 {
            reader.seek(SeekFrom::Start(0))?;
            0
        } else {
            reader.seek(SeekFrom::Start(mid - 1))?;
            buf.clear();
            let skipped = reader.read_until(b'\n', &mut buf)? as u64;
            mid - 1 + skipped
        };

        if line_start >= hi {
            hi = mid;
            continue;
        }

        buf.clear();
        let line_len = reader.read_until(b'\n', &mut buf)? as u64;
        if line_len == 0 {
            hi = mid;
            continue;
        }

        let line = std::str::from_utf8(&buf)
            .map_err(|_| IoError::new(ErrorKind::InvalidData, "accession index is not valid UTF-8"))?;
        let line_key = line.split('\t').next().unwrap_or_default().trim_end_matches(&['\r', '\n'][..]);

        match line_key.as_bytes().cmp(target) {
            std::cmp::Ordering::Equal => {
                let (_, taxid) = parse_index_line(line).ok_or_else(|| {
                    IoError::new(
                        ErrorKind::InvalidData,
                        format!("malformed accession index line '{}'", line.trim_end()),
                    )
                })?;
                return Ok((Some(taxid), seeks));
            }
            std::cmp::Ordering::Less => lo = line_start + line_len,
            std::cmp::Ordering::Greater => hi = mid,
        }
    }

    Ok((None, seeks))
}

fn accession_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z]+_?[A-Z]*\d+(\.\d+)?$").expect("valid accession pattern"))
}

/// Drops a trailing `.version` from an accession.
pub fn strip_version(accession: &str) -> &str {
    accession.split('.').next().unwrap_or(accession)
}

/// Maps reference sequence identifiers to taxon ids, caching every answer.
///
/// Safe to share between worker threads. Concurrent misses on one accession may
/// both search the index; they always cache the same taxon id.
pub struct AccessionResolver {
    index: AccessionIndex,
    cache: Mutex<AHashMap<String, u32>>,
    missing: Mutex<BTreeSet<String>>,
    invalid: Mutex<BTreeSet<String>>,
}

impl AccessionResolver {
    pub fn new(index: AccessionIndex) -> Self {
        Self {
            index,
            cache: Mutex::new(AHashMap::new()),
            missing: Mutex::new(BTreeSet::new()),
            invalid: Mutex::new(BTreeSet::new()),
        }
    }

    /// Pulls the accession token out of a raw subject identifier such as
    /// `gi|123|ref|NC_000964.3|` or `NC_000964.3 Bacillus subtilis`.
    ///
    /// Identifiers matching neither a numeric id nor the accession pattern are
    /// recorded as invalid.
    pub fn extract_accession(&self, sequence_id: &str) -> Option<String> {
        let token = sequence_id.split_whitespace().next().unwrap_or_default();
        let candidate = if token.contains('|') {
            token.split('|').nth(3)
        } else {
            Some(token)
        };

        match candidate {
            Some(acc) if is_numeric(acc) || accession_pattern().is_match(acc) => Some(acc.to_string()),
            _ => {
                if self.invalid.lock().insert(token.to_string()) {
                    log::warn!("Invalid sequence identifier '{}'", token);
                }
                None
            }
        }
    }

    /// Resolves an accession (or a numeric taxon id) to a taxon id.
    /// Unknown accessions resolve to `UNKNOWN_TAXID`.
    pub fn resolve(&self, accession: &str) -> u32 {
        if is_numeric(accession) {
            return accession.parse().unwrap_or(UNKNOWN_TAXID);
        }

        let acc = strip_version(accession);
        if let Some(&taxid) = self.cache.lock().get(acc) {
            return taxid;
        }

        let taxid = match self.index.lookup(acc) {
            Ok(Some(taxid)) => taxid,
            Ok(None) => {
                if self.missing.lock().insert(acc.to_string()) {
                    log::warn!("Accession {} not found in index", acc);
                }
                UNKNOWN_TAXID
            }
            Err(e) => {
                log::warn!("Lookup of accession {} failed: {}", acc, e);
                self.missing.lock().insert(acc.to_string());
                UNKNOWN_TAXID
            }
        };

        self.cache.lock().entry(acc.to_string()).or_insert(taxid);
        taxid
    }

    /// Extracts and resolves in one step; invalid identifiers give `UNKNOWN_TAXID`.
    pub fn resolve_sequence_id(&self, sequence_id: &str) -> u32 {
        match self.extract_accession(sequence_id) {
            Some(acc) => self.resolve(&acc),
            None => UNKNOWN_TAXID,
        }
    }

    /// Accessions that were searched for and not found, sorted.
    pub fn missing_accessions(&self) -> Vec<String> {
        self.missing.lock().iter().cloned().collect()
    }

    /// Subject identifiers that did not look like an accession, sorted.
    pub fn invalid_identifiers(&self) -> Vec<String> {
        self.invalid.lock().iter().cloned().collect()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
