/// Quote table loader and index.
/// Parses the tab-delimited quote table into an ordered, read-only map.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::model::{MINUTES_PER_DAY, QuoteRecord, TimeKey};

/// Time, three text columns, Book, Author
const REQUIRED_FIELDS: usize = 6;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read quote table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("quote table contains no usable rows")]
    Empty,
    #[error("duplicate time key {key} on line {line}")]
    Duplicate { key: TimeKey, line: usize },
}

/// Why a single row was skipped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRow {
    #[error("line {line}: expected 6 tab-separated fields, found {found}")]
    TooFewFields { line: usize, found: usize },
    #[error("line {line}: invalid time key `{key}`")]
    BadTimeKey { line: usize, key: String },
    #[error("line {line}: not valid UTF-8")]
    Encoding { line: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no quote for {0}")]
pub struct NotFound(pub TimeKey);

/// What to do when two rows share a time key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    #[default]
    LastWins,
    FirstWins,
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "last" | "last-wins" => Ok(DuplicatePolicy::LastWins),
            "first" | "first-wins" => Ok(DuplicatePolicy::FirstWins),
            "reject" | "error" => Ok(DuplicatePolicy::Reject),
            _ => Err(format!("Unknown duplicate policy: {s}")),
        }
    }
}

/// Which of the three text columns holds the time phrase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColumnOrder {
    /// Time, prefix, time phrase, suffix: the reading order of TTQC_quotes.tsv
    #[default]
    Reading,
    /// Time, Quote_Time (time phrase), Quote_Part1 (prefix), Quote_Part2 (suffix)
    Named,
}

impl FromStr for ColumnOrder {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reading" | "original" => Ok(ColumnOrder::Reading),
            "named" | "header" => Ok(ColumnOrder::Named),
            _ => Err(format!("Unknown column order: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub duplicates: DuplicatePolicy,
    pub columns: ColumnOrder,
}

#[derive(Debug, Clone)]
pub struct QuoteStore {
    records: BTreeMap<TimeKey, QuoteRecord>,
}

impl QuoteStore {
    /// Read and parse a quote table from disk
    pub fn from_path(path: &Path, options: LoadOptions) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::parse_bytes(&bytes, options)?;
        info!("Loaded {} quotes from {}", store.len(), path.display());
        Ok(store)
    }

    /// Parse quote table text. Bad rows are skipped; an empty result is an error.
    pub fn parse(text: &str, options: LoadOptions) -> Result<Self, LoadError> {
        Self::parse_bytes(text.as_bytes(), options)
    }

    /// Like `parse`, but decodes each line separately so one badly encoded
    /// row does not cost the rest of the table.
    pub fn parse_bytes(bytes: &[u8], options: LoadOptions) -> Result<Self, LoadError> {
        let mut records = BTreeMap::new();
        let mut skipped = 0usize;

        for (idx, raw) in bytes.split(|&b| b == b'\n').enumerate() {
            let line = idx + 1;
            let parsed = std::str::from_utf8(raw)
                .map_err(|_| MalformedRow::Encoding { line })
                .map(|raw| raw.trim_end_matches('\r'));
            let row = match parsed {
                Ok(raw) if raw.trim().is_empty() => continue,
                Ok(raw) if line == 1 && is_header(raw) => continue,
                Ok(raw) => parse_row(raw, line, options.columns),
                Err(e) => Err(e),
            };

            let record = match row {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping quote row: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            let key = record.time;
            if records.contains_key(&key) {
                match options.duplicates {
                    DuplicatePolicy::LastWins => {
                        debug!("Line {}: {} replaces an earlier row", line, key);
                    }
                    DuplicatePolicy::FirstWins => {
                        debug!("Line {}: ignoring duplicate {}", line, key);
                        continue;
                    }
                    DuplicatePolicy::Reject => return Err(LoadError::Duplicate { key, line }),
                }
            }
            records.insert(key, record);
        }

        if records.is_empty() {
            return Err(LoadError::Empty);
        }
        if skipped > 0 {
            warn!("Skipped {} malformed quote row(s)", skipped);
        }
        if records.len() < MINUTES_PER_DAY {
            warn!(
                "Quote table covers {} of {} minutes; gaps use the previous minute",
                records.len(),
                MINUTES_PER_DAY
            );
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exact-match lookup
    pub fn lookup(&self, key: TimeKey) -> Result<&QuoteRecord, NotFound> {
        self.records.get(&key).ok_or(NotFound(key))
    }

    /// Latest record at or before `key`, wrapping to the last entry of the day
    /// when `key` is earlier than the first one.
    pub fn lookup_or_earlier(&self, key: TimeKey) -> Option<&QuoteRecord> {
        self.records
            .range(..=key)
            .next_back()
            .or_else(|| self.records.iter().next_back())
            .map(|(_, record)| record)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuoteRecord> {
        self.records.values()
    }
}

fn is_header(raw: &str) -> bool {
    raw.split('\t')
        .next()
        .is_some_and(|first| first.trim().eq_ignore_ascii_case("time"))
}

fn parse_row(raw: &str, line: usize, columns: ColumnOrder) -> Result<QuoteRecord, MalformedRow> {
    let fields: Vec<&str> = raw.split('\t').map(str::trim).collect();
    if fields.len() < REQUIRED_FIELDS {
        return Err(MalformedRow::TooFewFields {
            line,
            found: fields.len(),
        });
    }

    let time = fields[0]
        .parse::<TimeKey>()
        .map_err(|_| MalformedRow::BadTimeKey {
            line,
            key: fields[0].to_string(),
        })?;

    let (prefix, time_phrase) = match columns {
        ColumnOrder::Reading => (fields[1], fields[2]),
        ColumnOrder::Named => (fields[2], fields[1]),
    };
    Ok(QuoteRecord {
        time,
        time_phrase: time_phrase.to_string(),
        prefix: prefix.to_string(),
        suffix: fields[3].to_string(),
        book: fields[4].to_string(),
        author: fields[5].to_string(),
    })
}
