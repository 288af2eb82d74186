//! The repository: a durable catalog of datasets and resources under a
//! single root directory.
//!
//! Layout:
//!
//! ```text
//! <root>/registry.json                  catalog (one canonical document)
//! <root>/references/                    indexed FASTA
//! <root>/datasets/<name>/variants/      indexed VCF
//! <root>/datasets/<name>/reads/         indexed SAM/BAM
//! ```
//!
//! All catalog paths are stored relative to the root. Admin writes replace
//! the catalog atomically (temp file + rename), so a crash leaves either
//! the old or the new document; `check` finds data files the surviving
//! catalog does not reach.

mod check;
pub mod ids;

pub use check::{CheckReport, check};

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::backends::{reads, references, variants};
use crate::{Error, Result, protocol};

pub const CATALOG_FILE: &str = "registry.json";

// ---------------------------------------------------------------------------
// Catalog document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Bumped on every admin write; tokens for catalog-backed listings
    /// embed it, so any admin change invalidates them.
    pub revision: u64,
    #[serde(default)]
    pub reference_sets: Vec<ReferenceSetEntry>,
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub variant_sets: Vec<VariantSetEntry>,
    #[serde(default)]
    pub read_group_sets: Vec<ReadGroupSetEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSetEntry {
    pub name: String,
    #[serde(default)]
    pub assembly_id: String,
    #[serde(default)]
    pub description: String,
    /// md5 of the ordered concatenation of member md5s.
    pub md5: String,
    /// FASTA path relative to the root; a `.fai` sibling is required.
    pub fasta: String,
    pub version: String,
    pub references: Vec<ReferenceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub name: String,
    pub length: u64,
    pub md5: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSetEntry {
    pub name: String,
    pub reference_set: String,
    /// VCF path relative to the root.
    pub path: String,
    pub version: String,
    /// Sample names, in header order.
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadGroupSetEntry {
    pub name: String,
    pub reference_set: String,
    /// SAM/BAM path relative to the root.
    pub path: String,
    pub version: String,
    pub read_groups: Vec<ReadGroupEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadGroupEntry {
    pub name: String,
    #[serde(default)]
    pub sample: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub programs: Vec<ProgramEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub command_line: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved views handed to handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ResolvedVariantSet {
    pub id: String,
    pub dataset: String,
    pub entry: VariantSetEntry,
    pub abs_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolvedReadGroupSet {
    pub id: String,
    pub dataset: String,
    pub entry: ReadGroupSetEntry,
    pub abs_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolvedReference {
    pub id: String,
    pub reference_set: String,
    pub entry: ReferenceEntry,
    pub fasta: PathBuf,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

pub struct Repository {
    root: PathBuf,
    catalog: RwLock<Arc<Catalog>>,
    /// Serializes admin read-modify-write cycles from snapshot through
    /// commit. Readers only touch the catalog lock.
    admin: Mutex<()>,
}

impl Repository {
    /// Create an empty catalog under `root`.
    pub fn init(root: &Path) -> Result<Repository> {
        if root.join(CATALOG_FILE).exists() {
            return Err(Error::Conflict(format!(
                "repository already initialized at {}",
                root.display()
            )));
        }
        fs::create_dir_all(root.join("references"))?;
        fs::create_dir_all(root.join("datasets"))?;

        let repository = Repository {
            root: root.to_path_buf(),
            catalog: RwLock::new(Arc::new(Catalog::default())),
            admin: Mutex::new(()),
        };
        repository.commit(Catalog::default())?;
        tracing::info!(root = %root.display(), "initialized repository");
        Ok(repository)
    }

    /// Open an existing repository.
    pub fn open(root: &Path) -> Result<Repository> {
        let path = root.join(CATALOG_FILE);
        let bytes = fs::read(&path).map_err(|_| {
            Error::NotFound(format!("no repository at {}", root.display()))
        })?;
        let catalog: Catalog = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Internal(format!("corrupt catalog {}: {}", path.display(), e)))?;
        Ok(Repository {
            root: root.to_path_buf(),
            catalog: RwLock::new(Arc::new(catalog)),
            admin: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Point-in-time snapshot; the lock is held only long enough to clone
    /// the `Arc`, never across backend I/O.
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.catalog.read().expect("catalog lock poisoned").clone()
    }

    /// Exclusive lock held by every admin operation from snapshot through
    /// commit, so concurrent writes cannot lose each other's updates.
    fn admin_lock(&self) -> MutexGuard<'_, ()> {
        self.admin.lock().expect("admin lock poisoned")
    }

    fn commit(&self, mut catalog: Catalog) -> Result<()> {
        catalog.revision += 1;
        let path = self.root.join(CATALOG_FILE);
        let tmp = self.root.join(format!("{}.tmp", CATALOG_FILE));
        let bytes = serde_json::to_vec_pretty(&catalog)
            .map_err(|e| Error::Internal(format!("catalog serialization failed: {}", e)))?;
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        // The rename is only atomic once the temp file's contents are
        // durable.
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &path)?;

        let mut guard = self.catalog.write().expect("catalog lock poisoned");
        *guard = Arc::new(catalog);
        Ok(())
    }

    /// Resolve a catalog-relative path, rejecting escapes from the root.
    pub fn resolve_path(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        if path.is_absolute() {
            return Err(Error::BadRequest(format!(
                "path {} must be relative to the repository root",
                relative
            )));
        }
        if path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(Error::BadRequest(format!(
                "path {} escapes the repository root",
                relative
            )));
        }
        Ok(self.root.join(path))
    }

    // -- admin operations ---------------------------------------------------

    pub fn add_dataset(&self, name: &str, description: &str) -> Result<()> {
        ids::validate_name(name)?;
        let _admin = self.admin_lock();
        let mut catalog = (*self.snapshot()).clone();
        if catalog.datasets.iter().any(|d| d.name == name) {
            return Err(Error::Conflict(format!("dataset {} already exists", name)));
        }
        catalog.datasets.push(DatasetEntry {
            name: name.to_string(),
            description: description.to_string(),
            variant_sets: Vec::new(),
            read_group_sets: Vec::new(),
        });
        fs::create_dir_all(self.root.join("datasets").join(name).join("variants"))?;
        fs::create_dir_all(self.root.join("datasets").join(name).join("reads"))?;
        tracing::info!(dataset = name, "added dataset");
        self.commit(catalog)
    }

    pub fn remove_dataset(&self, name_or_id: &str, force: bool) -> Result<()> {
        let _admin = self.admin_lock();
        let mut catalog = (*self.snapshot()).clone();
        let index = catalog
            .datasets
            .iter()
            .position(|d| d.name == name_or_id)
            .ok_or_else(|| Error::NotFound(format!("dataset {}", name_or_id)))?;
        let dataset = &catalog.datasets[index];
        if !force
            && (!dataset.variant_sets.is_empty() || !dataset.read_group_sets.is_empty())
        {
            return Err(Error::Conflict(format!(
                "dataset {} is not empty; use force to cascade",
                name_or_id
            )));
        }
        catalog.datasets.remove(index);
        tracing::info!(dataset = name_or_id, force, "removed dataset");
        self.commit(catalog)
    }

    pub fn add_reference_set(
        &self,
        name: &str,
        assembly_id: &str,
        description: &str,
        fasta_relative: &str,
    ) -> Result<()> {
        ids::validate_name(name)?;
        let _admin = self.admin_lock();
        let mut catalog = (*self.snapshot()).clone();
        if catalog.reference_sets.iter().any(|r| r.name == name) {
            return Err(Error::Conflict(format!(
                "reference set {} already exists",
                name
            )));
        }
        let fasta = self.resolve_path(fasta_relative)?;
        if !fasta_relative.starts_with("references/") {
            return Err(Error::BadRequest(format!(
                "reference FASTA must live under references/, got {}",
                fasta_relative
            )));
        }
        // Registration needs the .fai up front; base fetches rely on it.
        references::read_index(&fasta)?;
        let digests = references::scan_references(&fasta)?;
        let md5 = references::reference_set_digest(&digests);

        catalog.reference_sets.push(ReferenceSetEntry {
            name: name.to_string(),
            assembly_id: assembly_id.to_string(),
            description: description.to_string(),
            md5,
            fasta: fasta_relative.to_string(),
            version: version_tag(&fasta)?,
            references: digests
                .into_iter()
                .map(|d| ReferenceEntry {
                    name: d.name,
                    length: d.length,
                    md5: d.md5,
                })
                .collect(),
        });
        tracing::info!(reference_set = name, fasta = fasta_relative, "added reference set");
        self.commit(catalog)
    }

    pub fn remove_reference_set(&self, name_or_id: &str, force: bool) -> Result<()> {
        let name = ids::parse_reference_set_id(name_or_id).unwrap_or(name_or_id);
        let _admin = self.admin_lock();
        let mut catalog = (*self.snapshot()).clone();
        let index = catalog
            .reference_sets
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::NotFound(format!("reference set {}", name)))?;
        let in_use = catalog.datasets.iter().any(|d| {
            d.variant_sets.iter().any(|v| v.reference_set == name)
                || d.read_group_sets.iter().any(|r| r.reference_set == name)
        });
        if in_use && !force {
            return Err(Error::Conflict(format!(
                "reference set {} is still referenced; use force",
                name
            )));
        }
        catalog.reference_sets.remove(index);
        tracing::info!(reference_set = name, force, "removed reference set");
        self.commit(catalog)
    }

    pub fn add_variant_set(
        &self,
        dataset: &str,
        name: &str,
        reference_set: &str,
        path_relative: &str,
    ) -> Result<()> {
        ids::validate_name(name)?;
        let _admin = self.admin_lock();
        let mut catalog = (*self.snapshot()).clone();
        let reference_names: Vec<String> = catalog
            .reference_sets
            .iter()
            .find(|r| r.name == reference_set)
            .ok_or_else(|| Error::NotFound(format!("reference set {}", reference_set)))?
            .references
            .iter()
            .map(|r| r.name.clone())
            .collect();

        let expected_prefix = format!("datasets/{}/variants/", dataset);
        if !path_relative.starts_with(&expected_prefix) {
            return Err(Error::BadRequest(format!(
                "variant file must live under {}, got {}",
                expected_prefix, path_relative
            )));
        }
        let abs = self.resolve_path(path_relative)?;
        if variants::is_bgzf(&abs) && variants::index_path(&abs).is_none() {
            return Err(Error::BadRequest(format!(
                "compressed VCF {} has no tabix/CSI index",
                path_relative
            )));
        }

        let header = variants::read_vcf_header(&abs)?;
        for contig in header.contigs().keys() {
            let known = variants::contig_aliases(contig)
                .iter()
                .any(|alias| reference_names.iter().any(|name| name == alias));
            if !known {
                return Err(Error::BadRequest(format!(
                    "contig {} is not in reference set {}",
                    contig, reference_set
                )));
            }
        }
        let samples: Vec<String> = header
            .sample_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let version = version_tag(&abs)?;

        let entry = catalog
            .datasets
            .iter_mut()
            .find(|d| d.name == dataset)
            .ok_or_else(|| Error::NotFound(format!("dataset {}", dataset)))?;
        if entry.variant_sets.iter().any(|v| v.name == name) {
            return Err(Error::Conflict(format!(
                "variant set {} already exists in dataset {}",
                name, dataset
            )));
        }
        entry.variant_sets.push(VariantSetEntry {
            name: name.to_string(),
            reference_set: reference_set.to_string(),
            path: path_relative.to_string(),
            version,
            samples,
        });
        tracing::info!(dataset, variant_set = name, file = path_relative, "added variant set");
        self.commit(catalog)
    }

    pub fn remove_variant_set(&self, dataset: &str, name: &str) -> Result<()> {
        let _admin = self.admin_lock();
        let mut catalog = (*self.snapshot()).clone();
        let entry = catalog
            .datasets
            .iter_mut()
            .find(|d| d.name == dataset)
            .ok_or_else(|| Error::NotFound(format!("dataset {}", dataset)))?;
        let index = entry
            .variant_sets
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| Error::NotFound(format!("variant set {}", name)))?;
        entry.variant_sets.remove(index);
        tracing::info!(dataset, variant_set = name, "removed variant set");
        self.commit(catalog)
    }

    pub fn add_read_group_set(
        &self,
        dataset: &str,
        name: &str,
        reference_set: &str,
        path_relative: &str,
    ) -> Result<()> {
        ids::validate_name(name)?;
        let _admin = self.admin_lock();
        let mut catalog = (*self.snapshot()).clone();
        let reference_names: Vec<String> = catalog
            .reference_sets
            .iter()
            .find(|r| r.name == reference_set)
            .ok_or_else(|| Error::NotFound(format!("reference set {}", reference_set)))?
            .references
            .iter()
            .map(|r| r.name.clone())
            .collect();

        let expected_prefix = format!("datasets/{}/reads/", dataset);
        if !path_relative.starts_with(&expected_prefix) {
            return Err(Error::BadRequest(format!(
                "alignment file must live under {}, got {}",
                expected_prefix, path_relative
            )));
        }
        let abs = self.resolve_path(path_relative)?;
        if reads::is_bam(&abs) && reads::index_path(&abs).is_none() {
            return Err(Error::BadRequest(format!(
                "BAM {} has no BAI/CSI index",
                path_relative
            )));
        }

        let header = reads::read_sam_header(&abs)?;
        for (contig, _) in header.reference_sequences() {
            let contig = contig.to_string();
            let known = variants::contig_aliases(&contig)
                .iter()
                .any(|alias| reference_names.iter().any(|name| name == alias));
            if !known {
                return Err(Error::BadRequest(format!(
                    "contig {} is not in reference set {}",
                    contig, reference_set
                )));
            }
        }
        let read_groups = read_groups_from_header(&header);
        let version = version_tag(&abs)?;

        let entry = catalog
            .datasets
            .iter_mut()
            .find(|d| d.name == dataset)
            .ok_or_else(|| Error::NotFound(format!("dataset {}", dataset)))?;
        if entry.read_group_sets.iter().any(|r| r.name == name) {
            return Err(Error::Conflict(format!(
                "read group set {} already exists in dataset {}",
                name, dataset
            )));
        }
        entry.read_group_sets.push(ReadGroupSetEntry {
            name: name.to_string(),
            reference_set: reference_set.to_string(),
            path: path_relative.to_string(),
            version,
            read_groups,
        });
        tracing::info!(dataset, read_group_set = name, file = path_relative, "added read group set");
        self.commit(catalog)
    }

    pub fn remove_read_group_set(&self, dataset: &str, name: &str) -> Result<()> {
        let _admin = self.admin_lock();
        let mut catalog = (*self.snapshot()).clone();
        let entry = catalog
            .datasets
            .iter_mut()
            .find(|d| d.name == dataset)
            .ok_or_else(|| Error::NotFound(format!("dataset {}", dataset)))?;
        let index = entry
            .read_group_sets
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::NotFound(format!("read group set {}", name)))?;
        entry.read_group_sets.remove(index);
        tracing::info!(dataset, read_group_set = name, "removed read group set");
        self.commit(catalog)
    }

    // -- lookups ------------------------------------------------------------

    pub fn datasets(&self) -> Vec<protocol::Dataset> {
        self.snapshot()
            .datasets
            .iter()
            .map(|d| protocol::Dataset {
                id: ids::dataset_id(&d.name),
                name: d.name.clone(),
                description: d.description.clone(),
            })
            .collect()
    }

    pub fn dataset(&self, id: &str) -> Result<protocol::Dataset> {
        self.snapshot()
            .datasets
            .iter()
            .find(|d| d.name == id)
            .map(|d| protocol::Dataset {
                id: ids::dataset_id(&d.name),
                name: d.name.clone(),
                description: d.description.clone(),
            })
            .ok_or_else(|| Error::NotFound(format!("dataset {}", id)))
    }

    pub fn reference_sets(&self) -> Vec<protocol::ReferenceSet> {
        self.snapshot()
            .reference_sets
            .iter()
            .map(reference_set_to_protocol)
            .collect()
    }

    pub fn reference_set(&self, id: &str) -> Result<protocol::ReferenceSet> {
        let name = ids::parse_reference_set_id(id)
            .ok_or_else(|| Error::NotFound(format!("reference set {}", id)))?;
        self.snapshot()
            .reference_sets
            .iter()
            .find(|r| r.name == name)
            .map(reference_set_to_protocol)
            .ok_or_else(|| Error::NotFound(format!("reference set {}", id)))
    }

    pub fn references(&self, reference_set_id: &str) -> Result<Vec<protocol::Reference>> {
        let name = ids::parse_reference_set_id(reference_set_id)
            .ok_or_else(|| Error::NotFound(format!("reference set {}", reference_set_id)))?;
        let catalog = self.snapshot();
        let set = catalog
            .reference_sets
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::NotFound(format!("reference set {}", reference_set_id)))?;
        Ok(set
            .references
            .iter()
            .map(|r| reference_to_protocol(&set.name, r))
            .collect())
    }

    pub fn reference(&self, id: &str) -> Result<ResolvedReference> {
        let (set_name, contig) = ids::parse_reference_id(id)
            .ok_or_else(|| Error::NotFound(format!("reference {}", id)))?;
        let catalog = self.snapshot();
        let set = catalog
            .reference_sets
            .iter()
            .find(|r| r.name == set_name)
            .ok_or_else(|| Error::NotFound(format!("reference {}", id)))?;
        let entry = set
            .references
            .iter()
            .find(|r| r.name == contig)
            .ok_or_else(|| Error::NotFound(format!("reference {}", id)))?;
        Ok(ResolvedReference {
            id: id.to_string(),
            reference_set: set.name.clone(),
            entry: entry.clone(),
            fasta: self.resolve_path(&set.fasta)?,
            version: set.version.clone(),
        })
    }

    pub fn variant_sets(&self, dataset_id: &str) -> Result<Vec<protocol::VariantSet>> {
        let catalog = self.snapshot();
        let dataset = catalog
            .datasets
            .iter()
            .find(|d| d.name == dataset_id)
            .ok_or_else(|| Error::NotFound(format!("dataset {}", dataset_id)))?;
        Ok(dataset
            .variant_sets
            .iter()
            .map(|v| variant_set_to_protocol(&dataset.name, v))
            .collect())
    }

    pub fn variant_set(&self, id: &str) -> Result<ResolvedVariantSet> {
        let (dataset, name) = ids::parse_variant_set_id(id)
            .ok_or_else(|| Error::NotFound(format!("variant set {}", id)))?;
        let catalog = self.snapshot();
        let entry = catalog
            .datasets
            .iter()
            .find(|d| d.name == dataset)
            .and_then(|d| d.variant_sets.iter().find(|v| v.name == name))
            .ok_or_else(|| Error::NotFound(format!("variant set {}", id)))?;
        Ok(ResolvedVariantSet {
            id: id.to_string(),
            dataset: dataset.to_string(),
            entry: entry.clone(),
            abs_path: self.resolve_path(&entry.path)?,
        })
    }

    pub fn call_sets(&self, variant_set_id: &str) -> Result<Vec<protocol::CallSet>> {
        let resolved = self.variant_set(variant_set_id)?;
        Ok(resolved
            .entry
            .samples
            .iter()
            .map(|sample| protocol::CallSet {
                id: ids::call_set_id(variant_set_id, sample),
                name: sample.clone(),
                sample_id: sample.clone(),
                variant_set_ids: vec![variant_set_id.to_string()],
            })
            .collect())
    }

    pub fn call_set(&self, id: &str) -> Result<protocol::CallSet> {
        let (variant_set_id, sample) = ids::parse_call_set_id(id)
            .ok_or_else(|| Error::NotFound(format!("call set {}", id)))?;
        let resolved = self.variant_set(variant_set_id)?;
        if !resolved.entry.samples.iter().any(|s| s == sample) {
            return Err(Error::NotFound(format!("call set {}", id)));
        }
        Ok(protocol::CallSet {
            id: id.to_string(),
            name: sample.to_string(),
            sample_id: sample.to_string(),
            variant_set_ids: vec![variant_set_id.to_string()],
        })
    }

    pub fn read_group_sets(&self, dataset_id: &str) -> Result<Vec<protocol::ReadGroupSet>> {
        let catalog = self.snapshot();
        let dataset = catalog
            .datasets
            .iter()
            .find(|d| d.name == dataset_id)
            .ok_or_else(|| Error::NotFound(format!("dataset {}", dataset_id)))?;
        Ok(dataset
            .read_group_sets
            .iter()
            .map(|r| read_group_set_to_protocol(&dataset.name, r))
            .collect())
    }

    pub fn read_group_set(&self, id: &str) -> Result<ResolvedReadGroupSet> {
        let (dataset, name) = ids::parse_read_group_set_id(id)
            .ok_or_else(|| Error::NotFound(format!("read group set {}", id)))?;
        let catalog = self.snapshot();
        let entry = catalog
            .datasets
            .iter()
            .find(|d| d.name == dataset)
            .and_then(|d| d.read_group_sets.iter().find(|r| r.name == name))
            .ok_or_else(|| Error::NotFound(format!("read group set {}", id)))?;
        Ok(ResolvedReadGroupSet {
            id: id.to_string(),
            dataset: dataset.to_string(),
            entry: entry.clone(),
            abs_path: self.resolve_path(&entry.path)?,
        })
    }

    /// Catalog revision, the version tag for catalog-backed listings.
    pub fn revision_tag(&self) -> String {
        format!("r{}", self.snapshot().revision)
    }
}

// ---------------------------------------------------------------------------
// Conversions and helpers
// ---------------------------------------------------------------------------

pub fn variant_set_to_protocol(dataset: &str, entry: &VariantSetEntry) -> protocol::VariantSet {
    protocol::VariantSet {
        id: ids::variant_set_id(dataset, &entry.name),
        dataset_id: ids::dataset_id(dataset),
        reference_set_id: ids::reference_set_id(&entry.reference_set),
        name: entry.name.clone(),
        metadata: vec![protocol::VariantSetMetadata {
            key: "version".to_string(),
            value: entry.version.clone(),
            kind: "String".to_string(),
            description: "backing file version tag".to_string(),
        }],
    }
}

pub fn read_group_set_to_protocol(
    dataset: &str,
    entry: &ReadGroupSetEntry,
) -> protocol::ReadGroupSet {
    let id = ids::read_group_set_id(dataset, &entry.name);
    protocol::ReadGroupSet {
        id: id.clone(),
        dataset_id: ids::dataset_id(dataset),
        name: entry.name.clone(),
        read_groups: entry
            .read_groups
            .iter()
            .map(|rg| protocol::ReadGroup {
                id: ids::read_group_id(&id, &rg.name),
                name: rg.name.clone(),
                description: rg.description.clone(),
                sample_name: rg.sample.clone(),
                programs: rg
                    .programs
                    .iter()
                    .map(|p| protocol::Program {
                        id: p.id.clone(),
                        name: p.name.clone(),
                        command_line: p.command_line.clone(),
                        version: p.version.clone(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn reference_set_to_protocol(entry: &ReferenceSetEntry) -> protocol::ReferenceSet {
    protocol::ReferenceSet {
        id: ids::reference_set_id(&entry.name),
        name: entry.name.clone(),
        description: entry.description.clone(),
        md5checksum: entry.md5.clone(),
        assembly_id: entry.assembly_id.clone(),
        ncbi_taxon_id: 0,
    }
}

fn reference_to_protocol(set_name: &str, entry: &ReferenceEntry) -> protocol::Reference {
    protocol::Reference {
        id: ids::reference_id(set_name, &entry.name),
        name: entry.name.clone(),
        length: entry.length,
        md5checksum: entry.md5.clone(),
    }
}

fn read_groups_from_header(header: &noodles::sam::Header) -> Vec<ReadGroupEntry> {
    use noodles::sam::header::record::value::map::tag::Other;

    let sm_tag = Other::try_from(*b"SM").ok();
    let ds_tag = Other::try_from(*b"DS").ok();
    let pn_tag = Other::try_from(*b"PN").ok();
    let cl_tag = Other::try_from(*b"CL").ok();
    let vn_tag = Other::try_from(*b"VN").ok();

    let programs: Vec<ProgramEntry> = header
        .programs()
        .as_ref()
        .iter()
        .map(|(id, map)| ProgramEntry {
            id: id.to_string(),
            name: pn_tag
                .as_ref()
                .and_then(|tag| map.other_fields().get(tag))
                .map(|v| v.to_string())
                .unwrap_or_default(),
            command_line: cl_tag
                .as_ref()
                .and_then(|tag| map.other_fields().get(tag))
                .map(|v| v.to_string()),
            version: vn_tag
                .as_ref()
                .and_then(|tag| map.other_fields().get(tag))
                .map(|v| v.to_string()),
        })
        .collect();

    let mut read_groups: Vec<ReadGroupEntry> = header
        .read_groups()
        .iter()
        .map(|(name, map)| ReadGroupEntry {
            name: name.to_string(),
            sample: sm_tag
                .as_ref()
                .and_then(|tag| map.other_fields().get(tag))
                .map(|v| v.to_string()),
            description: ds_tag
                .as_ref()
                .and_then(|tag| map.other_fields().get(tag))
                .map(|v| v.to_string())
                .unwrap_or_default(),
            programs: programs.clone(),
        })
        .collect();

    // Files without @RG lines still get a default group so their reads
    // resolve to a read group id.
    if read_groups.is_empty() {
        read_groups.push(ReadGroupEntry {
            name: "default".to_string(),
            sample: None,
            description: String::new(),
            programs,
        });
    }
    read_groups
}

/// Version tag of a backing file: md5 over length and mtime. Replacing the
/// file changes the tag and invalidates outstanding tokens.
pub fn version_tag(path: &Path) -> Result<String> {
    let metadata = fs::metadata(path)?;
    let mtime = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let digest = md5::compute(format!(
        "{}:{}:{}",
        metadata.len(),
        mtime.as_secs(),
        mtime.subsec_nanos()
    ));
    Ok(format!("{:x}", digest)[..12].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn seed_reference_set(repository: &Repository) {
        let fasta = repository.root().join("references/test.fa");
        let mut file = fs::File::create(&fasta).unwrap();
        write!(file, ">1\nACGTACGTACGTACGTACGT\n").unwrap();
        drop(file);
        let mut fai = fs::File::create(format!("{}.fai", fasta.display())).unwrap();
        writeln!(fai, "1\t20\t3\t20\t21").unwrap();
        drop(fai);
        repository
            .add_reference_set("test", "GRCh37", "", "references/test.fa")
            .unwrap();
    }

    fn seed_variant_file(repository: &Repository, dataset: &str) -> String {
        let relative = format!("datasets/{}/variants/calls.vcf", dataset);
        let path = repository.root().join(&relative);
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "##fileformat=VCFv4.2").unwrap();
        writeln!(file, "##contig=<ID=1,length=20>").unwrap();
        writeln!(
            file,
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tNA12878"
        )
        .unwrap();
        writeln!(file, "1\t5\t.\tA\tT\t.\t.\t.\tGT\t0/1").unwrap();
        relative
    }

    #[test]
    fn test_init_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let again = Repository::init(dir.path());
        assert!(matches!(again, Err(Error::Conflict(_))));
    }

    #[test]
    fn test_open_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Repository::open(dir.path()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_add_remove_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Repository::init(dir.path()).unwrap();
        repository.add_dataset("1kg", "thousand genomes").unwrap();
        assert!(matches!(
            repository.add_dataset("1kg", ""),
            Err(Error::Conflict(_))
        ));
        assert_eq!(repository.datasets().len(), 1);
        repository.remove_dataset("1kg", false).unwrap();
        assert!(repository.datasets().is_empty());
    }

    #[test]
    fn test_remove_nonempty_dataset_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Repository::init(dir.path()).unwrap();
        repository.add_dataset("1kg", "").unwrap();
        seed_reference_set(&repository);
        let relative = seed_variant_file(&repository, "1kg");
        repository
            .add_variant_set("1kg", "calls", "test", &relative)
            .unwrap();

        assert!(matches!(
            repository.remove_dataset("1kg", false),
            Err(Error::Conflict(_))
        ));
        repository.remove_dataset("1kg", true).unwrap();
        assert!(repository.datasets().is_empty());
    }

    #[test]
    fn test_variant_set_enumerates_call_sets() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Repository::init(dir.path()).unwrap();
        repository.add_dataset("1kg", "").unwrap();
        seed_reference_set(&repository);
        let relative = seed_variant_file(&repository, "1kg");
        repository
            .add_variant_set("1kg", "calls", "test", &relative)
            .unwrap();

        let call_sets = repository.call_sets("1kg:vs.calls").unwrap();
        assert_eq!(call_sets.len(), 1);
        assert_eq!(call_sets[0].name, "NA12878");
        assert_eq!(call_sets[0].id, "1kg:vs.calls:NA12878");
    }

    #[test]
    fn test_contig_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Repository::init(dir.path()).unwrap();
        repository.add_dataset("1kg", "").unwrap();
        seed_reference_set(&repository);

        let relative = "datasets/1kg/variants/bad.vcf";
        let path = repository.root().join(relative);
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "##fileformat=VCFv4.2").unwrap();
        writeln!(file, "##contig=<ID=99,length=20>").unwrap();
        writeln!(file, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO").unwrap();
        drop(file);

        let result = repository.add_variant_set("1kg", "bad", "test", relative);
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_path_containment() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Repository::init(dir.path()).unwrap();
        assert!(repository.resolve_path("datasets/x/variants/a.vcf").is_ok());
        assert!(repository.resolve_path("/etc/passwd").is_err());
        assert!(repository.resolve_path("../outside.vcf").is_err());
    }

    #[test]
    fn test_concurrent_admin_writes_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(Repository::init(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repository = Arc::clone(&repository);
                std::thread::spawn(move || {
                    repository.add_dataset(&format!("ds{}", i), "").unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(repository.datasets().len(), 8);
        // init wrote r1; every add must get its own revision.
        assert_eq!(repository.revision_tag(), "r9");
    }

    #[test]
    fn test_catalog_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repository = Repository::init(dir.path()).unwrap();
            repository.add_dataset("1kg", "desc").unwrap();
        }
        let reopened = Repository::open(dir.path()).unwrap();
        let datasets = reopened.datasets();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].name, "1kg");
        assert_eq!(datasets[0].description, "desc");
    }

    #[test]
    fn test_revision_bumps_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Repository::init(dir.path()).unwrap();
        let before = repository.revision_tag();
        repository.add_dataset("1kg", "").unwrap();
        assert_ne!(before, repository.revision_tag());
    }
}
