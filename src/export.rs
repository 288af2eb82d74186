//! Text export of repository data: variant sets back to VCF, read group
//! sets back to SAM.
//!
//! Export pulls pages through the same backends the HTTP search endpoints
//! use, so region filtering, ordering, and resume semantics are identical.
//! The output is a faithful text rendering of the protocol records, not a
//! byte-for-byte copy of the source file.

use std::io::Write;

use crate::backends::variants::CallSetSelection;
use crate::backends::{CancelFlag, Deadline, IntervalResume, reads, variants};
use crate::repo::{Repository, ids};
use crate::{Error, Result, protocol};

const EXPORT_PAGE: usize = 4096;

/// Regions to export: one explicit interval, or every reference in the
/// resource's reference set.
fn export_regions(
    repository: &Repository,
    reference_set: &str,
    region: Option<(&str, u64, u64)>,
) -> Result<Vec<(String, u64, u64)>> {
    if let Some((name, start, end)) = region {
        if end <= start {
            return Err(Error::BadRequest(format!(
                "empty interval [{}, {})",
                start, end
            )));
        }
        return Ok(vec![(name.to_string(), start, end)]);
    }
    let catalog = repository.snapshot();
    let set = catalog
        .reference_sets
        .iter()
        .find(|r| r.name == reference_set)
        .ok_or_else(|| Error::NotFound(format!("reference set {}", reference_set)))?;
    Ok(set
        .references
        .iter()
        .filter(|r| r.length > 0)
        .map(|r| (r.name.clone(), 0, r.length))
        .collect())
}

pub fn export_vcf<W: Write>(
    repository: &Repository,
    variant_set_id: &str,
    region: Option<(&str, u64, u64)>,
    out: &mut W,
) -> Result<()> {
    let resolved = repository.variant_set(variant_set_id)?;
    let regions = export_regions(repository, &resolved.entry.reference_set, region)?;
    let samples = resolved.entry.samples.clone();

    writeln!(out, "##fileformat=VCFv4.2")?;
    let catalog = repository.snapshot();
    if let Some(set) = catalog
        .reference_sets
        .iter()
        .find(|r| r.name == resolved.entry.reference_set)
    {
        for reference in &set.references {
            writeln!(
                out,
                "##contig=<ID={},length={}>",
                reference.name, reference.length
            )?;
        }
    }
    write!(out, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO")?;
    if !samples.is_empty() {
        write!(out, "\tFORMAT")?;
        for sample in &samples {
            write!(out, "\t{}", sample)?;
        }
    }
    writeln!(out)?;

    let call_sets: Vec<CallSetSelection> = samples
        .iter()
        .enumerate()
        .map(|(index, sample)| CallSetSelection {
            call_set_id: ids::call_set_id(&resolved.id, sample),
            sample_name: sample.clone(),
            sample_index: index,
        })
        .collect();

    let cancel = CancelFlag::new();
    for (reference_name, start, end) in regions {
        let mut resume: Option<IntervalResume> = None;
        loop {
            let page = variants::search_page(
                &variants::VariantQuery {
                    variant_set_id: &resolved.id,
                    path: &resolved.abs_path,
                    reference_name: &reference_name,
                    start,
                    end,
                    call_sets: &call_sets,
                },
                EXPORT_PAGE,
                resume,
                Deadline::none(),
                &cancel,
            )?;
            for variant in &page.records {
                write_vcf_record(out, variant, !samples.is_empty())?;
            }
            match page.resume {
                Some(next) => resume = Some(next),
                None => break,
            }
        }
    }
    Ok(())
}

fn write_vcf_record<W: Write>(
    out: &mut W,
    variant: &protocol::Variant,
    with_samples: bool,
) -> Result<()> {
    let names = if variant.names.is_empty() {
        ".".to_string()
    } else {
        variant.names.join(";")
    };
    let alts = if variant.alternate_bases.is_empty() {
        ".".to_string()
    } else {
        variant.alternate_bases.join(",")
    };
    let quality = variant
        .quality
        .map(|q| q.to_string())
        .unwrap_or_else(|| ".".to_string());
    let info = if variant.info.is_empty() {
        ".".to_string()
    } else {
        variant
            .info
            .iter()
            .map(|(key, values)| {
                if values.len() == 1 && values[0] == "true" {
                    key.clone()
                } else {
                    format!("{}={}", key, values.join(","))
                }
            })
            .collect::<Vec<_>>()
            .join(";")
    };

    write!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t.\t{}",
        variant.reference_name,
        variant.start + 1,
        names,
        variant.reference_bases,
        alts,
        quality,
        info
    )?;
    if with_samples {
        write!(out, "\tGT")?;
        for call in &variant.calls {
            write!(out, "\t{}", format_genotype(call))?;
        }
    }
    writeln!(out)?;
    Ok(())
}

fn format_genotype(call: &protocol::Call) -> String {
    if call.genotype.is_empty() {
        return ".".to_string();
    }
    let separator = if call.phaseset.is_empty() { "/" } else { "|" };
    call.genotype
        .iter()
        .map(|&allele| {
            if allele < 0 {
                ".".to_string()
            } else {
                allele.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(separator)
}

pub fn export_sam<W: Write>(
    repository: &Repository,
    read_group_set_id: &str,
    region: Option<(&str, u64, u64)>,
    out: &mut W,
) -> Result<()> {
    let resolved = repository.read_group_set(read_group_set_id)?;
    let regions = export_regions(repository, &resolved.entry.reference_set, region)?;

    writeln!(out, "@HD\tVN:1.6\tSO:coordinate")?;
    let catalog = repository.snapshot();
    if let Some(set) = catalog
        .reference_sets
        .iter()
        .find(|r| r.name == resolved.entry.reference_set)
    {
        for reference in &set.references {
            writeln!(out, "@SQ\tSN:{}\tLN:{}", reference.name, reference.length)?;
        }
    }
    for read_group in &resolved.entry.read_groups {
        write!(out, "@RG\tID:{}", read_group.name)?;
        if let Some(sample) = &read_group.sample {
            write!(out, "\tSM:{}", sample)?;
        }
        if !read_group.description.is_empty() {
            write!(out, "\tDS:{}", read_group.description)?;
        }
        writeln!(out)?;
    }

    let cancel = CancelFlag::new();
    for (reference_name, start, end) in regions {
        let mut resume: Option<IntervalResume> = None;
        loop {
            let page = reads::search_page(
                &reads::ReadQuery {
                    read_group_set_id: &resolved.id,
                    path: &resolved.abs_path,
                    reference_name: &reference_name,
                    start,
                    end,
                    read_group_ids: None,
                },
                EXPORT_PAGE,
                resume,
                Deadline::none(),
                &cancel,
            )?;
            for alignment in &page.records {
                write_sam_record(out, alignment)?;
            }
            match page.resume {
                Some(next) => resume = Some(next),
                None => break,
            }
        }
    }
    Ok(())
}

fn write_sam_record<W: Write>(out: &mut W, read: &protocol::ReadAlignment) -> Result<()> {
    let alignment = read
        .alignment
        .as_ref()
        .ok_or_else(|| Error::Internal("exported read without alignment".to_string()))?;

    let (rname, pos, mapq, cigar) = (
        alignment.position.reference_name.as_str(),
        alignment.position.position + 1,
        alignment.mapping_quality.unwrap_or(255),
        format_cigar(&alignment.cigar),
    );
    let (rnext, pnext) = match &read.next_mate_position {
        Some(mate) => {
            let name = if mate.reference_name == alignment.position.reference_name {
                "=".to_string()
            } else {
                mate.reference_name.clone()
            };
            (name, mate.position + 1)
        }
        None => ("*".to_string(), 0),
    };
    let sequence = if read.aligned_sequence.is_empty() {
        "*".to_string()
    } else {
        read.aligned_sequence.clone()
    };
    let quality = if read.aligned_quality.is_empty() {
        "*".to_string()
    } else {
        read.aligned_quality
            .iter()
            .map(|&score| char::from((score.clamp(0, 93) as u8) + b'!'))
            .collect()
    };
    let read_group = read
        .read_group_id
        .rsplit_once(':')
        .map(|(_, name)| name)
        .unwrap_or("default");

    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\tRG:Z:{}",
        read.fragment_name,
        sam_flags(read, alignment),
        rname,
        pos,
        mapq,
        cigar,
        rnext,
        pnext,
        read.fragment_length,
        sequence,
        quality,
        read_group
    )?;
    Ok(())
}

fn sam_flags(read: &protocol::ReadAlignment, alignment: &protocol::LinearAlignment) -> u16 {
    let mut flags = 0u16;
    if read.number_reads > 1 {
        flags |= 0x1;
        if read.read_number == 0 {
            flags |= 0x40;
        }
    }
    if read.proper_placement {
        flags |= 0x2;
    }
    if alignment.position.reverse_strand {
        flags |= 0x10;
    }
    if read
        .next_mate_position
        .as_ref()
        .is_some_and(|mate| mate.reverse_strand)
    {
        flags |= 0x20;
    }
    if read.read_number == 1 {
        flags |= 0x80;
    }
    if read.secondary_alignment {
        flags |= 0x100;
    }
    if read.failed_vendor_quality_checks {
        flags |= 0x200;
    }
    if read.duplicate_fragment {
        flags |= 0x400;
    }
    if read.supplementary_alignment {
        flags |= 0x800;
    }
    flags
}

fn format_cigar(units: &[protocol::CigarUnit]) -> String {
    if units.is_empty() {
        return "*".to_string();
    }
    units
        .iter()
        .map(|unit| {
            let op = match unit.operation {
                protocol::CigarOperation::AlignmentMatch => 'M',
                protocol::CigarOperation::Insert => 'I',
                protocol::CigarOperation::Delete => 'D',
                protocol::CigarOperation::Skip => 'N',
                protocol::CigarOperation::ClipSoft => 'S',
                protocol::CigarOperation::ClipHard => 'H',
                protocol::CigarOperation::Pad => 'P',
                protocol::CigarOperation::SequenceMatch => '=',
                protocol::CigarOperation::SequenceMismatch => 'X',
            };
            format!("{}{}", unit.operation_length, op)
        })
        .collect()
}

pub fn vcf_export_to_stdout(
    repository: &Repository,
    variant_set_id: &str,
    region: Option<(&str, u64, u64)>,
) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    export_vcf(repository, variant_set_id, region, &mut out)
}

pub fn sam_export_to_stdout(
    repository: &Repository,
    read_group_set_id: &str,
    region: Option<(&str, u64, u64)>,
) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    export_sam(repository, read_group_set_id, region, &mut out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_variant() -> protocol::Variant {
        protocol::Variant {
            id: "1kg:vs.calls:1:4:abcd1234".to_string(),
            variant_set_id: "1kg:vs.calls".to_string(),
            names: vec!["rs1".to_string()],
            reference_name: "1".to_string(),
            start: 4,
            end: 5,
            reference_bases: "A".to_string(),
            alternate_bases: vec!["T".to_string()],
            quality: Some(50.0),
            info: BTreeMap::from([("DP".to_string(), vec!["12".to_string()])]),
            calls: vec![protocol::Call {
                call_set_id: "1kg:vs.calls:NA12878".to_string(),
                call_set_name: "NA12878".to_string(),
                genotype: vec![0, 1],
                phaseset: String::new(),
            }],
        }
    }

    #[test]
    fn test_vcf_record_line() {
        let mut out = Vec::new();
        write_vcf_record(&mut out, &sample_variant(), true).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "1\t5\trs1\tA\tT\t50\t.\tDP=12\tGT\t0/1\n"
        );
    }

    #[test]
    fn test_genotype_formatting() {
        let mut call = sample_variant().calls.remove(0);
        assert_eq!(format_genotype(&call), "0/1");
        call.phaseset = "*".to_string();
        assert_eq!(format_genotype(&call), "0|1");
        call.genotype = vec![-1, -1];
        assert_eq!(format_genotype(&call), ".|.");
    }

    #[test]
    fn test_sam_record_line() {
        let read = protocol::ReadAlignment {
            id: "x".to_string(),
            read_group_id: "1kg:rgs.lowcov:rg1".to_string(),
            fragment_name: "read1".to_string(),
            proper_placement: false,
            duplicate_fragment: false,
            number_reads: 1,
            fragment_length: 0,
            read_number: 0,
            failed_vendor_quality_checks: false,
            alignment: Some(protocol::LinearAlignment {
                position: protocol::Position {
                    reference_name: "1".to_string(),
                    position: 100,
                    reverse_strand: true,
                },
                mapping_quality: Some(60),
                cigar: vec![protocol::CigarUnit {
                    operation: protocol::CigarOperation::AlignmentMatch,
                    operation_length: 4,
                }],
            }),
            secondary_alignment: false,
            supplementary_alignment: false,
            aligned_sequence: "ACGT".to_string(),
            aligned_quality: vec![37, 37, 37, 37],
            next_mate_position: None,
        };

        let mut out = Vec::new();
        write_sam_record(&mut out, &read).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "read1\t16\t1\t101\t60\t4M\t*\t0\t0\tACGT\tFFFF\tRG:Z:rg1\n"
        );
    }

    #[test]
    fn test_cigar_formatting() {
        assert_eq!(format_cigar(&[]), "*");
        let units = vec![
            protocol::CigarUnit {
                operation: protocol::CigarOperation::ClipSoft,
                operation_length: 2,
            },
            protocol::CigarUnit {
                operation: protocol::CigarOperation::AlignmentMatch,
                operation_length: 10,
            },
        ];
        assert_eq!(format_cigar(&units), "2S10M");
    }
}
