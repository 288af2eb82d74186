//! Repository integrity checking.
//!
//! `check` walks the catalog against the filesystem: missing or drifted
//! backing files, reference md5 mismatches, and data files the catalog no
//! longer reaches. Findings are capped per category so a badly damaged
//! repository still produces a readable report.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::backends::{reads, references, variants};
use crate::{Repository, Result};

use super::{CATALOG_FILE, version_tag};

const MAX_FINDINGS_PER_CATEGORY: usize = 20;

#[derive(Debug, Default)]
pub struct CheckReport {
    pub reference_sets: Vec<String>,
    pub variant_sets: Vec<String>,
    pub read_group_sets: Vec<String>,
    pub orphans: Vec<String>,
    /// Findings dropped once a category hit its cap.
    pub truncated: usize,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.reference_sets.is_empty()
            && self.variant_sets.is_empty()
            && self.read_group_sets.is_empty()
            && self.orphans.is_empty()
    }

    fn push(&mut self, category: Category, finding: String) {
        let bucket = match category {
            Category::ReferenceSet => &mut self.reference_sets,
            Category::VariantSet => &mut self.variant_sets,
            Category::ReadGroupSet => &mut self.read_group_sets,
            Category::Orphan => &mut self.orphans,
        };
        if bucket.len() < MAX_FINDINGS_PER_CATEGORY {
            bucket.push(finding);
        } else {
            self.truncated += 1;
        }
    }
}

#[derive(Clone, Copy)]
enum Category {
    ReferenceSet,
    VariantSet,
    ReadGroupSet,
    Orphan,
}

pub fn check(repository: &Repository) -> Result<CheckReport> {
    let catalog = repository.snapshot();
    let mut report = CheckReport::default();
    let mut reachable: HashSet<String> = HashSet::new();

    for set in &catalog.reference_sets {
        reachable.insert(set.fasta.clone());
        let fasta = repository.resolve_path(&set.fasta)?;
        if !fasta.exists() {
            report.push(
                Category::ReferenceSet,
                format!("{}: missing file {}", set.name, set.fasta),
            );
            continue;
        }
        match version_tag(&fasta) {
            Ok(tag) if tag != set.version => {
                report.push(
                    Category::ReferenceSet,
                    format!("{}: file {} changed since registration", set.name, set.fasta),
                );
                continue;
            }
            Err(e) => {
                report.push(
                    Category::ReferenceSet,
                    format!("{}: cannot stat {}: {}", set.name, set.fasta, e),
                );
                continue;
            }
            Ok(_) => {}
        }
        verify_reference_digests(set, &fasta, &mut report);
    }

    for dataset in &catalog.datasets {
        for variant_set in &dataset.variant_sets {
            reachable.insert(variant_set.path.clone());
            let label = format!("{}:{}", dataset.name, variant_set.name);
            let path = repository.resolve_path(&variant_set.path)?;
            if !path.exists() {
                report.push(
                    Category::VariantSet,
                    format!("{}: missing file {}", label, variant_set.path),
                );
                continue;
            }
            match version_tag(&path) {
                Ok(tag) if tag != variant_set.version => report.push(
                    Category::VariantSet,
                    format!(
                        "{}: file {} changed since registration",
                        label, variant_set.path
                    ),
                ),
                Err(e) => report.push(
                    Category::VariantSet,
                    format!("{}: cannot stat {}: {}", label, variant_set.path, e),
                ),
                Ok(_) => {
                    if variants::is_bgzf(&path) && variants::index_path(&path).is_none() {
                        report.push(
                            Category::VariantSet,
                            format!("{}: index for {} is gone", label, variant_set.path),
                        );
                    }
                }
            }
        }

        for read_group_set in &dataset.read_group_sets {
            reachable.insert(read_group_set.path.clone());
            let label = format!("{}:{}", dataset.name, read_group_set.name);
            let path = repository.resolve_path(&read_group_set.path)?;
            if !path.exists() {
                report.push(
                    Category::ReadGroupSet,
                    format!("{}: missing file {}", label, read_group_set.path),
                );
                continue;
            }
            match version_tag(&path) {
                Ok(tag) if tag != read_group_set.version => report.push(
                    Category::ReadGroupSet,
                    format!(
                        "{}: file {} changed since registration",
                        label, read_group_set.path
                    ),
                ),
                Err(e) => report.push(
                    Category::ReadGroupSet,
                    format!("{}: cannot stat {}: {}", label, read_group_set.path, e),
                ),
                Ok(_) => {
                    if reads::is_bam(&path) && reads::index_path(&path).is_none() {
                        report.push(
                            Category::ReadGroupSet,
                            format!("{}: index for {} is gone", label, read_group_set.path),
                        );
                    }
                }
            }
        }
    }

    find_orphans(repository, &reachable, &mut report)?;
    Ok(report)
}

fn verify_reference_digests(
    set: &super::ReferenceSetEntry,
    fasta: &Path,
    report: &mut CheckReport,
) {
    let digests = match references::scan_references(fasta) {
        Ok(digests) => digests,
        Err(e) => {
            report.push(
                Category::ReferenceSet,
                format!("{}: cannot rescan {}: {}", set.name, set.fasta, e),
            );
            return;
        }
    };
    if digests.len() != set.references.len() {
        report.push(
            Category::ReferenceSet,
            format!(
                "{}: {} sequences on disk, {} registered",
                set.name,
                digests.len(),
                set.references.len()
            ),
        );
        return;
    }
    for (digest, entry) in digests.iter().zip(&set.references) {
        if digest.name != entry.name || digest.md5 != entry.md5 {
            report.push(
                Category::ReferenceSet,
                format!(
                    "{}: sequence {} does not match registered digest",
                    set.name, entry.name
                ),
            );
        }
    }
}

/// Data files on disk the catalog does not reach. Index siblings and the
/// catalog document itself are expected.
fn find_orphans(
    repository: &Repository,
    reachable: &HashSet<String>,
    report: &mut CheckReport,
) -> Result<()> {
    let mut roots = vec![repository.root().join("references")];
    let datasets_dir = repository.root().join("datasets");
    if datasets_dir.is_dir() {
        for entry in fs::read_dir(&datasets_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                roots.push(entry.path().join("variants"));
                roots.push(entry.path().join("reads"));
            }
        }
    }

    let mut files = Vec::new();
    for root in roots {
        if root.is_dir() {
            collect_files(&root, &mut files)?;
        }
    }
    for path in files {
        if is_ancillary(&path) {
            continue;
        }
        let relative = path
            .strip_prefix(repository.root())
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        if !reachable.contains(&relative) {
            report.push(Category::Orphan, relative);
        }
    }
    Ok(())
}

// Registration accepts paths in subdirectories of variants/ and reads/,
// so the walk has to descend.
fn collect_files(dir: &Path, files: &mut Vec<std::path::PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn is_ancillary(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };
    name == CATALOG_FILE
        || name.starts_with(CATALOG_FILE)
        || name.ends_with(".fai")
        || name.ends_with(".tbi")
        || name.ends_with(".csi")
        || name.ends_with(".bai")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn seeded_repository(dir: &Path) -> Repository {
        let repository = Repository::init(dir).unwrap();
        let fasta = repository.root().join("references/test.fa");
        let mut file = fs::File::create(&fasta).unwrap();
        write!(file, ">1\nACGTACGTACGTACGTACGT\n").unwrap();
        drop(file);
        let mut fai = fs::File::create(format!("{}.fai", fasta.display())).unwrap();
        writeln!(fai, "1\t20\t3\t20\t21").unwrap();
        drop(fai);
        repository
            .add_reference_set("test", "", "", "references/test.fa")
            .unwrap();
        repository
    }

    #[test]
    fn test_clean_repository() {
        let dir = tempfile::tempdir().unwrap();
        let repository = seeded_repository(dir.path());
        let report = check(&repository).unwrap();
        assert!(report.is_clean(), "{:?}", report);
    }

    #[test]
    fn test_missing_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let repository = seeded_repository(dir.path());
        fs::remove_file(repository.root().join("references/test.fa")).unwrap();
        let report = check(&repository).unwrap();
        assert_eq!(report.reference_sets.len(), 1);
        assert!(report.reference_sets[0].contains("missing file"));
    }

    #[test]
    fn test_orphan_reported() {
        let dir = tempfile::tempdir().unwrap();
        let repository = seeded_repository(dir.path());
        repository.add_dataset("1kg", "").unwrap();
        fs::write(
            repository.root().join("datasets/1kg/variants/stray.vcf"),
            b"##fileformat=VCFv4.2\n",
        )
        .unwrap();
        let report = check(&repository).unwrap();
        assert_eq!(report.orphans, vec!["datasets/1kg/variants/stray.vcf"]);
    }

    #[test]
    fn test_orphan_in_subdirectory_reported() {
        let dir = tempfile::tempdir().unwrap();
        let repository = seeded_repository(dir.path());
        repository.add_dataset("1kg", "").unwrap();
        let nested = repository.root().join("datasets/1kg/variants/batch1");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("stray.vcf"), b"##fileformat=VCFv4.2\n").unwrap();
        let report = check(&repository).unwrap();
        assert_eq!(
            report.orphans,
            vec!["datasets/1kg/variants/batch1/stray.vcf"]
        );
    }

    #[test]
    fn test_index_files_are_not_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let repository = seeded_repository(dir.path());
        let report = check(&repository).unwrap();
        assert!(report.orphans.is_empty(), "{:?}", report.orphans);
    }
}
