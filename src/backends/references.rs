//! Reference backend over indexed FASTA.
//!
//! Registration walks the FASTA once to record names, lengths, and md5s
//! (uppercase bases, SAM M5 convention). Base fetches go through the `.fai`
//! index for random access.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use noodles::core::region::Region;
use noodles::fasta::{self, fai};

use crate::{Error, Result};

/// Name, length, and md5 of one FASTA sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDigest {
    pub name: String,
    pub length: u64,
    pub md5: String,
}

pub fn fai_path(fasta: &Path) -> PathBuf {
    PathBuf::from(format!("{}.fai", fasta.display()))
}

pub fn read_index(fasta: &Path) -> Result<fai::Index> {
    let path = fai_path(fasta);
    fai::read(&path).map_err(|e| {
        Error::BadRequest(format!(
            "missing or unreadable FASTA index {}: {}",
            path.display(),
            e
        ))
    })
}

/// Walk every sequence in the FASTA, computing lengths and md5 digests.
pub fn scan_references(fasta: &Path) -> Result<Vec<ReferenceDigest>> {
    let mut reader = File::open(fasta)
        .map(BufReader::new)
        .map(fasta::io::Reader::new)?;

    let mut digests = Vec::new();
    for result in reader.records() {
        let record = result?;
        let name = String::from_utf8_lossy(record.name()).to_string();
        let sequence = record.sequence().as_ref();
        let uppercase: Vec<u8> = sequence.iter().map(u8::to_ascii_uppercase).collect();
        digests.push(ReferenceDigest {
            name,
            length: sequence.len() as u64,
            md5: format!("{:x}", md5::compute(&uppercase)),
        });
    }

    if digests.is_empty() {
        return Err(Error::BadRequest(format!(
            "no sequences found in {}",
            fasta.display()
        )));
    }
    Ok(digests)
}

/// md5 of the concatenation of member md5 strings, in declared order.
pub fn reference_set_digest(references: &[ReferenceDigest]) -> String {
    let concatenated: String = references.iter().map(|r| r.md5.as_str()).collect();
    format!("{:x}", md5::compute(concatenated.as_bytes()))
}

/// Fetch bases over the 0-based half-open interval `[start, end)`.
///
/// The caller validates the interval against the declared reference length
/// and the configured maximum span before getting here.
pub fn fetch_bases(
    fasta: &Path,
    index: &fai::Index,
    reference_name: &str,
    start: u64,
    end: u64,
) -> Result<String> {
    let mut reader = fasta::io::indexed_reader::Builder::default()
        .set_index(index.clone())
        .build_from_path(fasta)?;

    let (one_start, one_end) = super::to_one_based(start, end)?;
    let region = Region::new(reference_name, one_start..=one_end);
    let record = reader.query(&region)?;

    Ok(String::from_utf8_lossy(record.sequence().as_ref()).to_string())
}
