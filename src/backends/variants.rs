//! Variant backend over indexed VCF files.
//!
//! Bgzip-compressed files are served through the tabix/CSI index; plain
//! `.vcf` files fall back to a sequential scan with the same record filter,
//! so small repositories and tests share every code path above the reader
//! seam. Iteration order is file order, which for a valid VCF is ascending
//! start per contig; ties keep file order.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use noodles::bgzf;
use noodles::core::region::Region;
use noodles::vcf::{
    self,
    variant::RecordBuf,
    variant::record::samples::series::value::genotype::Phasing,
    variant::record_buf::samples::sample::Value as SampleValue,
    variant::record_buf::info::field::Value as InfoValue,
};

use super::{CancelFlag, Deadline, IntervalResume, Page, PageCollector, check_interrupts, to_one_based};
use crate::{Result, protocol};

/// A call set the request selected, resolved to its sample column.
#[derive(Debug, Clone)]
pub struct CallSetSelection {
    pub call_set_id: String,
    pub sample_name: String,
    pub sample_index: usize,
}

#[derive(Debug)]
pub struct VariantQuery<'a> {
    pub variant_set_id: &'a str,
    pub path: &'a Path,
    pub reference_name: &'a str,
    /// 0-based half-open interval.
    pub start: u64,
    pub end: u64,
    pub call_sets: &'a [CallSetSelection],
}

pub fn is_bgzf(path: &Path) -> bool {
    let name = path.to_string_lossy().to_lowercase();
    name.ends_with(".vcf.gz") || name.ends_with(".vcf.bgz")
}

/// An indexed file has a `.tbi` or `.csi` sibling.
pub fn index_path(path: &Path) -> Option<std::path::PathBuf> {
    for ext in ["tbi", "csi"] {
        let candidate = std::path::PathBuf::from(format!("{}.{}", path.display(), ext));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

/// Read the header of a plain or bgzip-compressed VCF.
pub fn read_vcf_header(path: &Path) -> Result<vcf::Header> {
    if is_bgzf(path) {
        let mut reader = File::open(path)
            .map(bgzf::Reader::new)
            .map(vcf::io::Reader::new)?;
        Ok(reader.read_header()?)
    } else {
        let mut reader = File::open(path)
            .map(BufReader::new)
            .map(vcf::io::Reader::new)?;
        Ok(reader.read_header()?)
    }
}

/// Drain one page of variants overlapping the query interval.
pub fn search_page(
    query: &VariantQuery<'_>,
    budget: usize,
    resume: Option<IntervalResume>,
    deadline: Deadline,
    cancel: &CancelFlag,
) -> Result<Page<protocol::Variant>> {
    if is_bgzf(query.path) && index_path(query.path).is_some() {
        search_indexed(query, budget, resume, deadline, cancel)
    } else {
        search_scan(query, budget, resume, deadline, cancel)
    }
}

fn search_indexed(
    query: &VariantQuery<'_>,
    budget: usize,
    resume: Option<IntervalResume>,
    deadline: Deadline,
    cancel: &CancelFlag,
) -> Result<Page<protocol::Variant>> {
    let mut reader = vcf::io::indexed_reader::Builder::default()
        .build_from_path(query.path)?;
    let header = reader.read_header()?;

    let Some(contig) = resolve_contig(&header, query.reference_name) else {
        // The reference exists in the reference set but this file has no
        // records for it.
        return Ok(PageCollector::new(budget, resume).finish());
    };

    let (one_start, one_end) = to_one_based(query.start, query.end)?;
    let region = Region::new(contig, one_start..=one_end);

    let mut collector = PageCollector::new(budget, resume);
    let records = reader.query(&header, &region)?;
    for result in records {
        check_interrupts(deadline, cancel)?;
        let record = result?;
        let buf = RecordBuf::try_from_variant_record(&header, &record)?;
        let Some(start) = buf.variant_start() else {
            continue;
        };
        let start0 = usize::from(start) as u64 - 1;
        if !collector.offer(start0, || to_variant(query, &buf, start0))? {
            break;
        }
    }
    Ok(collector.finish())
}

fn search_scan(
    query: &VariantQuery<'_>,
    budget: usize,
    resume: Option<IntervalResume>,
    deadline: Deadline,
    cancel: &CancelFlag,
) -> Result<Page<protocol::Variant>> {
    let mut reader = if is_bgzf(query.path) {
        Reader::Bgzf(
            File::open(query.path)
                .map(bgzf::Reader::new)
                .map(vcf::io::Reader::new)?,
        )
    } else {
        Reader::Plain(
            File::open(query.path)
                .map(BufReader::new)
                .map(vcf::io::Reader::new)?,
        )
    };
    let header = reader.read_header()?;
    let accepted = contig_aliases(query.reference_name);

    let mut collector = PageCollector::new(budget, resume);
    let mut record = RecordBuf::default();
    while reader.read_record_buf(&header, &mut record)? != 0 {
        check_interrupts(deadline, cancel)?;
        if !accepted
            .iter()
            .any(|name| name == record.reference_sequence_name())
        {
            continue;
        }
        let Some(start) = record.variant_start() else {
            continue;
        };
        let start0 = usize::from(start) as u64 - 1;
        let end0 = start0 + record.reference_bases().len() as u64;
        // Half-open overlap: spans touching only at the query end are out.
        if start0 >= query.end || end0 <= query.start {
            continue;
        }
        if !collector.offer(start0, || to_variant(query, &record, start0))? {
            break;
        }
    }
    Ok(collector.finish())
}

enum Reader {
    Plain(vcf::io::Reader<BufReader<File>>),
    Bgzf(vcf::io::Reader<bgzf::Reader<File>>),
}

impl Reader {
    fn read_header(&mut self) -> std::io::Result<vcf::Header> {
        match self {
            Reader::Plain(r) => r.read_header(),
            Reader::Bgzf(r) => r.read_header(),
        }
    }

    fn read_record_buf(
        &mut self,
        header: &vcf::Header,
        record: &mut RecordBuf,
    ) -> std::io::Result<usize> {
        match self {
            Reader::Plain(r) => r.read_record_buf(header, record),
            Reader::Bgzf(r) => r.read_record_buf(header, record),
        }
    }
}

/// Match a wire reference name against a file contig, exactly or with the
/// `chr` prefix added or stripped.
fn resolve_contig(header: &vcf::Header, wire_name: &str) -> Option<String> {
    let aliases = contig_aliases(wire_name);
    aliases
        .into_iter()
        .find(|name| header.contigs().contains_key(name.as_str()))
}

pub fn contig_aliases(name: &str) -> Vec<String> {
    let mut aliases = vec![name.to_string()];
    match name.strip_prefix("chr") {
        Some(stripped) => aliases.push(stripped.to_string()),
        None => aliases.push(format!("chr{}", name)),
    }
    aliases
}

/// Stable variant id: variant set id, contig, 0-based start, and a short
/// digest of the alleles so co-located records stay distinct.
pub fn variant_id(variant_set_id: &str, reference_name: &str, start0: u64, digest: &str) -> String {
    format!("{}:{}:{}:{}", variant_set_id, reference_name, start0, digest)
}

pub fn allele_digest(reference_bases: &str, alternate_bases: &[String]) -> String {
    let digest = md5::compute(format!("{}|{}", reference_bases, alternate_bases.join(",")));
    format!("{:x}", digest)[..8].to_string()
}

fn to_variant(
    query: &VariantQuery<'_>,
    record: &RecordBuf,
    start0: u64,
) -> Result<protocol::Variant> {
    let reference_bases = record.reference_bases().to_string();
    let end0 = start0 + reference_bases.len() as u64;
    let alternate_bases: Vec<String> = record
        .alternate_bases()
        .as_ref()
        .iter()
        .map(|allele| allele.to_string())
        .collect();
    let names: Vec<String> = record.ids().as_ref().iter().map(|id| id.to_string()).collect();

    let mut info = std::collections::BTreeMap::new();
    for (key, value) in record.info().as_ref() {
        let values = match value {
            Some(v) => convert_info_value(v),
            None => vec!["true".to_string()],
        };
        info.insert(key.to_string(), values);
    }

    let calls = convert_calls(query, record);
    let digest = allele_digest(&reference_bases, &alternate_bases);

    Ok(protocol::Variant {
        id: variant_id(
            query.variant_set_id,
            record.reference_sequence_name(),
            start0,
            &digest,
        ),
        variant_set_id: query.variant_set_id.to_string(),
        names,
        reference_name: record.reference_sequence_name().to_string(),
        start: start0,
        end: end0,
        reference_bases,
        alternate_bases,
        quality: record.quality_score(),
        info,
        calls,
    })
}

fn convert_info_value(value: &InfoValue) -> Vec<String> {
    use noodles::vcf::variant::record_buf::info::field::value::Array;

    match value {
        InfoValue::Integer(v) => vec![v.to_string()],
        InfoValue::Float(v) => vec![v.to_string()],
        InfoValue::Flag => vec!["true".to_string()],
        InfoValue::Character(v) => vec![v.to_string()],
        InfoValue::String(v) => vec![v.clone()],
        InfoValue::Array(array) => match array {
            Array::Integer(vs) => vs
                .iter()
                .map(|v| v.map(|i| i.to_string()).unwrap_or_else(|| ".".to_string()))
                .collect(),
            Array::Float(vs) => vs
                .iter()
                .map(|v| v.map(|f| f.to_string()).unwrap_or_else(|| ".".to_string()))
                .collect(),
            Array::Character(vs) => vs
                .iter()
                .map(|v| v.map(|c| c.to_string()).unwrap_or_else(|| ".".to_string()))
                .collect(),
            Array::String(vs) => vs
                .iter()
                .map(|v| v.clone().unwrap_or_else(|| ".".to_string()))
                .collect(),
        },
    }
}

fn convert_calls(query: &VariantQuery<'_>, record: &RecordBuf) -> Vec<protocol::Call> {
    let samples = record.samples();

    query
        .call_sets
        .iter()
        .map(|selection| {
            let value = samples
                .get_index(selection.sample_index)
                .and_then(|sample| sample.get("GT"))
                .flatten();
            let (genotype, phaseset) = convert_genotype(value);
            protocol::Call {
                call_set_id: selection.call_set_id.clone(),
                call_set_name: selection.sample_name.clone(),
                genotype,
                phaseset,
            }
        })
        .collect()
}

fn convert_genotype(value: Option<&SampleValue>) -> (Vec<i32>, String) {
    match value {
        Some(SampleValue::Genotype(genotype)) => {
            let mut alleles = Vec::new();
            let mut phased = false;
            for allele in genotype.as_ref() {
                alleles.push(allele.position().map(|p| p as i32).unwrap_or(-1));
                if allele.phasing() == Phasing::Phased {
                    phased = true;
                }
            }
            (alleles, if phased { "*".to_string() } else { String::new() })
        }
        Some(SampleValue::String(s)) => parse_genotype_string(s),
        _ => (Vec::new(), String::new()),
    }
}

fn parse_genotype_string(gt: &str) -> (Vec<i32>, String) {
    let phased = gt.contains('|');
    let alleles = gt
        .split(['/', '|'])
        .map(|a| a.parse::<i32>().unwrap_or(-1))
        .collect();
    (alleles, if phased { "*".to_string() } else { String::new() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contig_aliases() {
        assert_eq!(contig_aliases("1"), vec!["1", "chr1"]);
        assert_eq!(contig_aliases("chr1"), vec!["chr1", "1"]);
    }

    #[test]
    fn test_variant_id_shape() {
        let id = variant_id("1kg:vs.calls", "1", 9998, "abcd1234");
        assert_eq!(id, "1kg:vs.calls:1:9998:abcd1234");
    }

    #[test]
    fn test_allele_digest_is_stable() {
        let alts = vec!["A".to_string(), "T".to_string()];
        assert_eq!(allele_digest("ACGT", &alts), allele_digest("ACGT", &alts));
        assert_ne!(
            allele_digest("ACGT", &alts),
            allele_digest("ACGG", &alts)
        );
        assert_eq!(allele_digest("ACGT", &alts).len(), 8);
    }

    #[test]
    fn test_parse_genotype_string() {
        assert_eq!(parse_genotype_string("0/1"), (vec![0, 1], String::new()));
        assert_eq!(parse_genotype_string("1|1"), (vec![1, 1], "*".to_string()));
        assert_eq!(parse_genotype_string("./."), (vec![-1, -1], String::new()));
    }

    #[test]
    fn test_scan_extracts_genotypes_per_sample() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.vcf");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "##fileformat=VCFv4.2").unwrap();
        writeln!(file, "##contig=<ID=1,length=1000>").unwrap();
        writeln!(file, "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">").unwrap();
        writeln!(
            file,
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tNA12878\tNA12891"
        )
        .unwrap();
        writeln!(file, "1\t5\t.\tA\tT\t.\t.\t.\tGT\t0/1\t1|1").unwrap();
        drop(file);

        let call_sets = vec![
            CallSetSelection {
                call_set_id: "ds:vs.calls:NA12878".to_string(),
                sample_name: "NA12878".to_string(),
                sample_index: 0,
            },
            CallSetSelection {
                call_set_id: "ds:vs.calls:NA12891".to_string(),
                sample_name: "NA12891".to_string(),
                sample_index: 1,
            },
        ];
        let query = VariantQuery {
            variant_set_id: "ds:vs.calls",
            path: &path,
            reference_name: "1",
            start: 0,
            end: 100,
            call_sets: &call_sets,
        };
        let page =
            search_page(&query, 10, None, Deadline::none(), &CancelFlag::new()).unwrap();
        assert_eq!(page.records.len(), 1);
        let calls = &page.records[0].calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].genotype, vec![0, 1]);
        assert_eq!(calls[0].phaseset, "");
        assert_eq!(calls[1].genotype, vec![1, 1]);
        assert_eq!(calls[1].phaseset, "*");
    }

    #[test]
    fn test_scan_overlap_semantics() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.vcf");
        let mut file = File::create(&path).unwrap();
        // Record at 1-based 9999 spans 4 bases, so it overlaps [10000, 10100).
        // Record at 10100 (1-based 10101 start... adjusted below) is excluded.
        writeln!(file, "##fileformat=VCFv4.2").unwrap();
        writeln!(file, "##contig=<ID=1,length=249250621>").unwrap();
        writeln!(file, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO").unwrap();
        writeln!(file, "1\t9999\t.\tACGT\tA\t.\t.\t.").unwrap();
        writeln!(file, "1\t10051\t.\tC\tG\t.\t.\t.").unwrap();
        writeln!(file, "1\t10101\t.\tT\tC\t.\t.\t.").unwrap();
        drop(file);

        let query = VariantQuery {
            variant_set_id: "ds:vs.calls",
            path: &path,
            reference_name: "1",
            start: 10000,
            end: 10100,
            call_sets: &[],
        };
        let page =
            search_page(&query, 10, None, Deadline::none(), &CancelFlag::new()).unwrap();
        let starts: Vec<u64> = page.records.iter().map(|v| v.start).collect();
        // 9998 (0-based) overlaps via its span; 10100 (0-based) is excluded.
        assert_eq!(starts, vec![9998, 10050]);
        assert!(page.resume.is_none());
    }
}
