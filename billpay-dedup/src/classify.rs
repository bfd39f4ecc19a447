//! Record classification: splits the lines of the decrypted input files into the merged
//! output and the collision report.
//!
//! Each data line is fixed width. Characters `[1, 13)` hold the invoice number, the
//! identity records are deduplicated on, and characters `[89, 101)` hold the invoice
//! value quoted in collision messages. Deduplication only looks inside one file: the
//! occurrence map is created per call and never shared.

use std::collections::HashMap;
use std::io::BufRead;
use std::iter;
use std::ops::Range;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::error::DedupError;

/// Lines shorter than this (after trimming) carry no invoice and are skipped.
pub const MIN_RECORD_LEN: usize = 13;

const INVOICE_KEY: Range<usize> = 1..13;
const INVOICE_VALUE: Range<usize> = 89..101;

const ORDINARY_LABEL: &str = "5402ORDINARIO.dat";
const PREFERRED_LABEL: &str = "0177PREFERENCIAL.dat";

/// The two output collections of a run. Both keep insertion order, which is the order
/// lines are written out in. A record key lands in at most one of them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifiedCollections {
    pub merged: IndexMap<String, String>,
    pub collisions: IndexMap<String, String>,
}

impl ClassifiedCollections {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Invoice key to the record key of its first occurrence, for a single file.
pub type Occurrences = HashMap<String, String>;

fn byte_offset(line: &str, chars: usize) -> Option<usize> {
    line.char_indices()
        .map(|(i, _)| i)
        .chain(iter::once(line.len()))
        .nth(chars)
}

/// Slice `line` by character positions; `None` when the line is too short.
fn char_slice(line: &str, range: Range<usize>) -> Option<&str> {
    let start = byte_offset(line, range.start)?;
    let end = byte_offset(line, range.end)?;
    Some(&line[start..end])
}

/// Strip everything up to and including the space character from both ends, control
/// padding such as NUL and the line terminator included.
fn trim_padding(line: &str) -> &str {
    line.trim_matches(|c: char| c <= ' ')
}

pub fn record_key(file_name: &str, index: usize) -> String {
    format!("{file_name}_{index}")
}

/// Classify every line of `reader` into `collections` and return how many lines were
/// read, short lines included.
///
/// The first usable line of a file is only kept when `merged` is still empty, i.e. for
/// the first file of the run. For later files it is dropped without a duplicate check
/// and without entering the occurrence map.
pub fn classify<R: BufRead>(
    file_name: &str,
    mut reader: R,
    collections: &mut ClassifiedCollections,
) -> Result<usize, DedupError> {
    info!(file = file_name, "classifying records");
    let mut occurrences = Occurrences::new();
    let mut first_line = true;
    let mut lines_read = 0;

    let mut buf = Vec::new();
    for index in 0.. {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|error| DedupError::Read {
                file: file_name.to_owned(),
                error,
            })?;
        if read == 0 {
            break;
        }
        lines_read += 1;

        // A stray Latin-1 byte becomes a single U+FFFD, which keeps field offsets.
        let line = String::from_utf8_lossy(&buf);
        let line = trim_padding(&line);
        if line.chars().count() < MIN_RECORD_LEN {
            metrics::counter!("classified_lines_total", "outcome" => "short").increment(1);
            continue;
        }

        let key = record_key(file_name, index);
        if first_line {
            first_line = false;
            classify_first_line(key, line, collections);
        } else {
            classify_line(key, line, &mut occurrences, collections)?;
        }
    }

    info!(
        file = file_name,
        lines_read,
        merged = collections.merged.len(),
        collisions = collections.collisions.len(),
        "classified records"
    );
    Ok(lines_read)
}

fn classify_first_line(key: String, line: &str, collections: &mut ClassifiedCollections) {
    if collections.merged.is_empty() {
        metrics::counter!("classified_lines_total", "outcome" => "merged").increment(1);
        collections.merged.insert(key, line.to_owned());
    } else {
        debug!(record = key, "dropping first line of a later file");
        metrics::counter!("classified_lines_total", "outcome" => "dropped").increment(1);
    }
}

fn classify_line(
    key: String,
    line: &str,
    occurrences: &mut Occurrences,
    collections: &mut ClassifiedCollections,
) -> Result<(), DedupError> {
    // Callers only pass lines of at least MIN_RECORD_LEN characters.
    let invoice = char_slice(line, INVOICE_KEY).unwrap_or_default();

    match occurrences.get(invoice) {
        Some(first_key) => {
            let message = collision_message(&key, first_key, line)?;
            metrics::counter!("classified_lines_total", "outcome" => "collision").increment(1);
            collections.collisions.insert(key, message);
        }
        None => {
            occurrences.insert(invoice.to_owned(), key.clone());
            metrics::counter!("classified_lines_total", "outcome" => "merged").increment(1);
            collections.merged.insert(key, line.to_owned());
        }
    }
    Ok(())
}

/// Describe a duplicate invoice. The report file is guessed from the record key of the
/// first occurrence: keys containing an "O" are taken to come from the ordinary file.
fn collision_message(key: &str, first_key: &str, line: &str) -> Result<String, DedupError> {
    let label = if first_key.to_uppercase().contains('O') {
        ORDINARY_LABEL
    } else {
        PREFERRED_LABEL
    };
    let invoice = char_slice(line, INVOICE_KEY).unwrap_or_default();
    let value = char_slice(line, INVOICE_VALUE).ok_or_else(|| DedupError::MalformedRecord {
        record_key: key.to_owned(),
        reason: format!(
            "duplicate invoice {invoice} has {} characters, the value field ends at {}",
            line.chars().count(),
            INVOICE_VALUE.end
        ),
    })?;

    Ok(format!(
        "El numero de factura [{invoice}] con el valor [{value}] se encuentra repetido en el archivo [{label}]."
    ))
}
