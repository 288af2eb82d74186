//! Read backend over indexed BAM files, with a plain `.sam` scan fallback.
//!
//! Emits protocol `ReadAlignment` records. Flag bits, CIGAR, and mapping
//! quality follow the source file verbatim; unmapped reads never appear in
//! range queries.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use noodles::bam;
use noodles::core::region::Region;
use noodles::sam::{
    self,
    alignment::RecordBuf,
    alignment::record::cigar::op::Kind as CigarKind,
    alignment::record::data::field::Tag,
    alignment::record_buf::data::field::Value as DataValue,
};

use super::{CancelFlag, Deadline, IntervalResume, Page, PageCollector, check_interrupts, to_one_based};
use crate::backends::variants::contig_aliases;
use crate::{Error, Result, protocol};

#[derive(Debug)]
pub struct ReadQuery<'a> {
    pub read_group_set_id: &'a str,
    pub path: &'a Path,
    pub reference_name: &'a str,
    /// 0-based half-open interval.
    pub start: u64,
    pub end: u64,
    /// Read group ids to keep; `None` keeps all.
    pub read_group_ids: Option<&'a [String]>,
}

pub fn is_bam(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("bam")
}

/// An indexed BAM has a `.bai` or `.csi` sibling.
pub fn index_path(path: &Path) -> Option<std::path::PathBuf> {
    for ext in ["bai", "csi"] {
        let candidate = std::path::PathBuf::from(format!("{}.{}", path.display(), ext));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

/// Read the header of a BAM or plain SAM file.
pub fn read_sam_header(path: &Path) -> Result<sam::Header> {
    if is_bam(path) {
        let mut reader = File::open(path).map(bam::io::Reader::new)?;
        Ok(reader.read_header()?)
    } else {
        let mut reader = File::open(path)
            .map(BufReader::new)
            .map(sam::io::Reader::new)?;
        Ok(reader.read_header()?)
    }
}

/// Drain one page of alignments overlapping the query interval.
pub fn search_page(
    query: &ReadQuery<'_>,
    budget: usize,
    resume: Option<IntervalResume>,
    deadline: Deadline,
    cancel: &CancelFlag,
) -> Result<Page<protocol::ReadAlignment>> {
    if is_bam(query.path) && index_path(query.path).is_some() {
        search_indexed(query, budget, resume, deadline, cancel)
    } else {
        search_scan(query, budget, resume, deadline, cancel)
    }
}

fn search_indexed(
    query: &ReadQuery<'_>,
    budget: usize,
    resume: Option<IntervalResume>,
    deadline: Deadline,
    cancel: &CancelFlag,
) -> Result<Page<protocol::ReadAlignment>> {
    let mut reader = bam::io::indexed_reader::Builder::default()
        .build_from_path(query.path)?;
    let header = reader.read_header()?;

    let Some(contig) = contig_aliases(query.reference_name)
        .into_iter()
        .find(|name| {
            header
                .reference_sequences()
                .contains_key(name.as_bytes())
        })
    else {
        return Ok(PageCollector::new(budget, resume).finish());
    };

    let (one_start, one_end) = to_one_based(query.start, query.end)?;
    let region = Region::new(contig, one_start..=one_end);

    let mut collector = PageCollector::new(budget, resume);
    let records = reader.query(&header, &region)?;
    for result in records {
        check_interrupts(deadline, cancel)?;
        let record = result?;
        let buf = RecordBuf::try_from_alignment_record(&header, &record)?;
        if !offer_alignment(query, &header, &buf, &mut collector)? {
            break;
        }
    }
    Ok(collector.finish())
}

fn search_scan(
    query: &ReadQuery<'_>,
    budget: usize,
    resume: Option<IntervalResume>,
    deadline: Deadline,
    cancel: &CancelFlag,
) -> Result<Page<protocol::ReadAlignment>> {
    let mut reader = File::open(query.path)
        .map(BufReader::new)
        .map(sam::io::Reader::new)?;
    let header = reader.read_header()?;
    let accepted = contig_aliases(query.reference_name);

    let mut collector = PageCollector::new(budget, resume);
    let mut record = RecordBuf::default();
    while reader.read_record_buf(&header, &mut record)? != 0 {
        check_interrupts(deadline, cancel)?;
        let Some(name) = reference_name(&header, &record) else {
            continue;
        };
        if !accepted.iter().any(|alias| alias == &name) {
            continue;
        }
        let Some(start0) = alignment_start0(&record) else {
            continue;
        };
        let end0 = start0 + reference_span(&record);
        if start0 >= query.end || end0 <= query.start {
            continue;
        }
        if !offer_alignment(query, &header, &record, &mut collector)? {
            break;
        }
    }
    Ok(collector.finish())
}

fn offer_alignment(
    query: &ReadQuery<'_>,
    header: &sam::Header,
    record: &RecordBuf,
    collector: &mut PageCollector<protocol::ReadAlignment>,
) -> Result<bool> {
    if record.flags().is_unmapped() {
        return Ok(true);
    }
    let Some(start0) = alignment_start0(record) else {
        return Ok(true);
    };
    let read_group = read_group_name(record);
    let read_group_id = format!(
        "{}:{}",
        query.read_group_set_id,
        read_group.as_deref().unwrap_or("default")
    );
    if let Some(filter) = query.read_group_ids {
        if !filter.iter().any(|id| id == &read_group_id) {
            return Ok(true);
        }
    }
    collector.offer(start0, || to_read_alignment(query, header, record, start0, read_group_id))
}

fn alignment_start0(record: &RecordBuf) -> Option<u64> {
    record
        .alignment_start()
        .map(|position| usize::from(position) as u64 - 1)
}

fn reference_name(header: &sam::Header, record: &RecordBuf) -> Option<String> {
    let id = record.reference_sequence_id()?;
    header
        .reference_sequences()
        .get_index(id)
        .map(|(name, _)| name.to_string())
}

fn mate_reference_name(header: &sam::Header, record: &RecordBuf) -> Option<String> {
    let id = record.mate_reference_sequence_id()?;
    header
        .reference_sequences()
        .get_index(id)
        .map(|(name, _)| name.to_string())
}

fn read_group_name(record: &RecordBuf) -> Option<String> {
    match record.data().get(&Tag::READ_GROUP) {
        Some(DataValue::String(value)) => Some(value.to_string()),
        _ => None,
    }
}

/// Number of reference bases consumed by the alignment (M/D/N/=/X).
fn reference_span(record: &RecordBuf) -> u64 {
    record
        .cigar()
        .as_ref()
        .iter()
        .filter(|op| {
            matches!(
                op.kind(),
                CigarKind::Match
                    | CigarKind::Deletion
                    | CigarKind::Skip
                    | CigarKind::SequenceMatch
                    | CigarKind::SequenceMismatch
            )
        })
        .map(|op| op.len() as u64)
        .sum()
}

fn to_read_alignment(
    query: &ReadQuery<'_>,
    header: &sam::Header,
    record: &RecordBuf,
    start0: u64,
    read_group_id: String,
) -> Result<protocol::ReadAlignment> {
    let flags = record.flags();
    let fragment_name = record
        .name()
        .map(|name| name.to_string())
        .unwrap_or_default();
    let reference_name = reference_name(header, record)
        .ok_or_else(|| Error::Internal("mapped record without reference".to_string()))?;

    let cigar = record
        .cigar()
        .as_ref()
        .iter()
        .map(|op| protocol::CigarUnit {
            operation: match op.kind() {
                CigarKind::Match => protocol::CigarOperation::AlignmentMatch,
                CigarKind::Insertion => protocol::CigarOperation::Insert,
                CigarKind::Deletion => protocol::CigarOperation::Delete,
                CigarKind::Skip => protocol::CigarOperation::Skip,
                CigarKind::SoftClip => protocol::CigarOperation::ClipSoft,
                CigarKind::HardClip => protocol::CigarOperation::ClipHard,
                CigarKind::Pad => protocol::CigarOperation::Pad,
                CigarKind::SequenceMatch => protocol::CigarOperation::SequenceMatch,
                CigarKind::SequenceMismatch => protocol::CigarOperation::SequenceMismatch,
            },
            operation_length: op.len() as u64,
        })
        .collect();

    let alignment = protocol::LinearAlignment {
        position: protocol::Position {
            reference_name: reference_name.clone(),
            position: start0,
            reverse_strand: flags.is_reverse_complemented(),
        },
        mapping_quality: record.mapping_quality().map(|q| i32::from(u8::from(q))),
        cigar,
    };

    let next_mate_position = if flags.is_segmented() && !flags.is_mate_unmapped() {
        match (mate_reference_name(header, record), record.mate_alignment_start()) {
            (Some(name), Some(position)) => Some(protocol::Position {
                reference_name: name,
                position: usize::from(position) as u64 - 1,
                reverse_strand: flags.is_mate_reverse_complemented(),
            }),
            _ => None,
        }
    } else {
        None
    };

    let aligned_sequence = String::from_utf8_lossy(record.sequence().as_ref()).to_string();
    let aligned_quality = record
        .quality_scores()
        .as_ref()
        .iter()
        .map(|&score| i32::from(score))
        .collect();

    Ok(protocol::ReadAlignment {
        id: format!(
            "{}:{}:{}:{}",
            query.read_group_set_id, reference_name, start0, fragment_name
        ),
        read_group_id,
        fragment_name,
        proper_placement: flags.is_properly_segmented(),
        duplicate_fragment: flags.is_duplicate(),
        number_reads: if flags.is_segmented() { 2 } else { 1 },
        fragment_length: record.template_length(),
        read_number: if flags.is_last_segment() { 1 } else { 0 },
        failed_vendor_quality_checks: flags.is_qc_fail(),
        alignment: Some(alignment),
        secondary_alignment: flags.is_secondary(),
        supplementary_alignment: flags.is_supplementary(),
        aligned_sequence,
        aligned_quality,
        next_mate_position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_sam(path: &Path) {
        let mut file = File::create(path).unwrap();
        writeln!(file, "@HD\tVN:1.6\tSO:coordinate").unwrap();
        writeln!(file, "@SQ\tSN:1\tLN:249250621").unwrap();
        writeln!(file, "@RG\tID:rg1\tSM:NA12878").unwrap();
        // Mapped read at 1-based 101, 4M.
        writeln!(
            file,
            "read1\t0\t1\t101\t60\t4M\t*\t0\t0\tACGT\tFFFF\tRG:Z:rg1"
        )
        .unwrap();
        // Mapped read at 1-based 151.
        writeln!(
            file,
            "read2\t16\t1\t151\t30\t4M\t*\t0\t0\tTTTT\tFFFF\tRG:Z:rg1"
        )
        .unwrap();
        // Unmapped read, must never appear in range queries.
        writeln!(
            file,
            "read3\t4\t*\t0\t0\t*\t*\t0\t0\tGGGG\tFFFF\tRG:Z:rg1"
        )
        .unwrap();
    }

    #[test]
    fn test_scan_excludes_unmapped_and_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.sam");
        write_test_sam(&path);

        let query = ReadQuery {
            read_group_set_id: "1kg:rgs.sample",
            path: &path,
            reference_name: "1",
            start: 0,
            end: 120,
            read_group_ids: None,
        };
        let page =
            search_page(&query, 10, None, Deadline::none(), &CancelFlag::new()).unwrap();
        assert_eq!(page.records.len(), 1);
        let alignment = &page.records[0];
        assert_eq!(alignment.fragment_name, "read1");
        assert_eq!(alignment.read_group_id, "1kg:rgs.sample:rg1");
        let linear = alignment.alignment.as_ref().unwrap();
        assert_eq!(linear.position.position, 100);
        assert_eq!(linear.mapping_quality, Some(60));
        assert_eq!(linear.cigar.len(), 1);
        assert_eq!(
            linear.cigar[0].operation,
            protocol::CigarOperation::AlignmentMatch
        );
    }

    #[test]
    fn test_reverse_strand_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.sam");
        write_test_sam(&path);

        let query = ReadQuery {
            read_group_set_id: "1kg:rgs.sample",
            path: &path,
            reference_name: "1",
            start: 140,
            end: 200,
            read_group_ids: None,
        };
        let page =
            search_page(&query, 10, None, Deadline::none(), &CancelFlag::new()).unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.records[0].alignment.as_ref().unwrap().position.reverse_strand);
    }

    #[test]
    fn test_read_group_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.sam");
        write_test_sam(&path);

        let filter = vec!["1kg:rgs.sample:other".to_string()];
        let query = ReadQuery {
            read_group_set_id: "1kg:rgs.sample",
            path: &path,
            reference_name: "1",
            start: 0,
            end: 1000,
            read_group_ids: Some(&filter),
        };
        let page =
            search_page(&query, 10, None, Deadline::none(), &CancelFlag::new()).unwrap();
        assert!(page.records.is_empty());
    }
}
