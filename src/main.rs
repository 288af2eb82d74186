use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ga4ghr::backends::{reads, references, variants};
use ga4ghr::handlers::{AppState, create_router};
use ga4ghr::repo::{self, Repository};
use ga4ghr::{Error, Result, ServerConfig, export};

#[derive(Parser)]
#[command(name = "ga4ghr", version)]
#[command(about = "GA4GH Genomics API reference server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve(ServerConfig),
    /// Load configuration and check that every registered resource resolves
    Configtest(ServerConfig),
    /// Repository administration
    Repo {
        /// Repository root directory
        #[arg(long, env = "GA4GH_REPO", default_value = "./repo")]
        repo: PathBuf,
        #[command(subcommand)]
        command: RepoCommand,
    },
    /// Export a variant set as VCF text on stdout
    VcfExport {
        /// Repository root directory
        #[arg(long, env = "GA4GH_REPO", default_value = "./repo")]
        repo: PathBuf,
        /// Variant set id, e.g. 1kg:vs.calls
        variant_set_id: String,
        /// Restrict to one reference (requires --end)
        #[arg(long)]
        reference_name: Option<String>,
        /// 0-based start of the exported interval
        #[arg(long, default_value = "0")]
        start: u64,
        /// 0-based exclusive end of the exported interval
        #[arg(long)]
        end: Option<u64>,
    },
    /// Export a read group set as SAM text on stdout
    SamExport {
        /// Repository root directory
        #[arg(long, env = "GA4GH_REPO", default_value = "./repo")]
        repo: PathBuf,
        /// Read group set id, e.g. 1kg:rgs.lowcov
        read_group_set_id: String,
        /// Restrict to one reference (requires --end)
        #[arg(long)]
        reference_name: Option<String>,
        /// 0-based start of the exported interval
        #[arg(long, default_value = "0")]
        start: u64,
        /// 0-based exclusive end of the exported interval
        #[arg(long)]
        end: Option<u64>,
    },
}

#[derive(Subcommand)]
enum RepoCommand {
    /// Create an empty repository
    Init,
    /// Register a dataset
    AddDataset {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Remove a dataset; --force cascades to its resources
    RemoveDataset {
        name: String,
        #[arg(long)]
        force: bool,
    },
    /// Register an indexed FASTA as a reference set
    AddReferenceset {
        name: String,
        /// FASTA path relative to the repository root (needs a .fai sibling)
        fasta: String,
        #[arg(long, default_value = "")]
        assembly_id: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Remove a reference set; --force removes it even while referenced
    RemoveReferenceset {
        name: String,
        #[arg(long)]
        force: bool,
    },
    /// Register a VCF as a variant set inside a dataset
    AddVariantset {
        dataset: String,
        name: String,
        #[arg(long)]
        reference_set: String,
        /// VCF path relative to the repository root
        path: String,
    },
    /// Remove a variant set
    RemoveVariantset { dataset: String, name: String },
    /// Register a SAM/BAM as a read group set inside a dataset
    AddReadgroupset {
        dataset: String,
        name: String,
        #[arg(long)]
        reference_set: String,
        /// SAM/BAM path relative to the repository root
        path: String,
    },
    /// Remove a read group set
    RemoveReadgroupset { dataset: String, name: String },
    /// Print the catalog
    List,
    /// Check catalog entries against the filesystem
    Verify,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {}", error);
            ExitCode::from(error.exit_code())
        }
    }
}

fn init_tracing(cli: &Cli) {
    let level = match &cli.command {
        Command::Serve(config) | Command::Configtest(config) => config.log_level.clone(),
        _ => std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(config) => serve(config),
        Command::Configtest(config) => configtest(config),
        Command::Repo { repo, command } => repo_command(&repo, command),
        Command::VcfExport {
            repo,
            variant_set_id,
            reference_name,
            start,
            end,
        } => {
            let repository = Repository::open(&repo)?;
            let region = export_region(reference_name.as_deref(), start, end)?;
            export::vcf_export_to_stdout(&repository, &variant_set_id, region)
        }
        Command::SamExport {
            repo,
            read_group_set_id,
            reference_name,
            start,
            end,
        } => {
            let repository = Repository::open(&repo)?;
            let region = export_region(reference_name.as_deref(), start, end)?;
            export::sam_export_to_stdout(&repository, &read_group_set_id, region)
        }
    }
}

fn export_region<'a>(
    reference_name: Option<&'a str>,
    start: u64,
    end: Option<u64>,
) -> Result<Option<(&'a str, u64, u64)>> {
    match (reference_name, end) {
        (Some(name), Some(end)) => Ok(Some((name, start, end))),
        (Some(_), None) => Err(Error::BadRequest(
            "--end is required with --reference-name".to_string(),
        )),
        (None, _) => Ok(None),
    }
}

fn serve(config: ServerConfig) -> Result<()> {
    let repository = Arc::new(Repository::open(&config.repo)?);
    let state = AppState::new(repository, config.signer(), config.limits());
    let app = create_router(state, config.cors);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(addr = %addr, repo = %config.repo.display(), "starting server");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    })
}

/// Open the repository and resolve every registered resource, reporting
/// each failure rather than stopping at the first.
fn configtest(config: ServerConfig) -> Result<()> {
    let repository = Repository::open(&config.repo)?;
    let catalog = repository.snapshot();
    let mut failures = 0usize;

    for set in &catalog.reference_sets {
        let id = repo::ids::reference_set_id(&set.name);
        let outcome = repository
            .resolve_path(&set.fasta)
            .and_then(|path| references::read_index(&path))
            .map(|_| ());
        report(&id, outcome, &mut failures);
    }
    for dataset in &catalog.datasets {
        for variant_set in &dataset.variant_sets {
            let id = repo::ids::variant_set_id(&dataset.name, &variant_set.name);
            let outcome = repository
                .resolve_path(&variant_set.path)
                .and_then(|path| variants::read_vcf_header(&path))
                .map(|_| ());
            report(&id, outcome, &mut failures);
        }
        for read_group_set in &dataset.read_group_sets {
            let id = repo::ids::read_group_set_id(&dataset.name, &read_group_set.name);
            let outcome = repository
                .resolve_path(&read_group_set.path)
                .and_then(|path| reads::read_sam_header(&path))
                .map(|_| ());
            report(&id, outcome, &mut failures);
        }
    }

    if failures > 0 {
        return Err(Error::BadRequest(format!(
            "{} resources failed to resolve",
            failures
        )));
    }
    println!("configuration ok");
    Ok(())
}

fn report(id: &str, outcome: Result<()>, failures: &mut usize) {
    match outcome {
        Ok(()) => println!("ok    {}", id),
        Err(error) => {
            println!("FAIL  {}: {}", id, error);
            *failures += 1;
        }
    }
}

fn repo_command(root: &Path, command: RepoCommand) -> Result<()> {
    if let RepoCommand::Init = command {
        Repository::init(root)?;
        println!("initialized {}", root.display());
        return Ok(());
    }

    let repository = Repository::open(root)?;
    match command {
        RepoCommand::Init => unreachable!("handled above"),
        RepoCommand::AddDataset { name, description } => {
            repository.add_dataset(&name, &description)
        }
        RepoCommand::RemoveDataset { name, force } => repository.remove_dataset(&name, force),
        RepoCommand::AddReferenceset {
            name,
            fasta,
            assembly_id,
            description,
        } => repository.add_reference_set(&name, &assembly_id, &description, &fasta),
        RepoCommand::RemoveReferenceset { name, force } => {
            repository.remove_reference_set(&name, force)
        }
        RepoCommand::AddVariantset {
            dataset,
            name,
            reference_set,
            path,
        } => repository.add_variant_set(&dataset, &name, &reference_set, &path),
        RepoCommand::RemoveVariantset { dataset, name } => {
            repository.remove_variant_set(&dataset, &name)
        }
        RepoCommand::AddReadgroupset {
            dataset,
            name,
            reference_set,
            path,
        } => repository.add_read_group_set(&dataset, &name, &reference_set, &path),
        RepoCommand::RemoveReadgroupset { dataset, name } => {
            repository.remove_read_group_set(&dataset, &name)
        }
        RepoCommand::List => {
            list_catalog(&repository);
            Ok(())
        }
        RepoCommand::Verify => verify(&repository),
    }
}

fn list_catalog(repository: &Repository) {
    let catalog = repository.snapshot();
    for set in &catalog.reference_sets {
        println!(
            "referenceset {} ({} references) {}",
            repo::ids::reference_set_id(&set.name),
            set.references.len(),
            set.fasta
        );
    }
    for dataset in &catalog.datasets {
        println!("dataset {}", dataset.name);
        for variant_set in &dataset.variant_sets {
            println!(
                "  variantset {} ({} samples) {}",
                repo::ids::variant_set_id(&dataset.name, &variant_set.name),
                variant_set.samples.len(),
                variant_set.path
            );
        }
        for read_group_set in &dataset.read_group_sets {
            println!(
                "  readgroupset {} ({} read groups) {}",
                repo::ids::read_group_set_id(&dataset.name, &read_group_set.name),
                read_group_set.read_groups.len(),
                read_group_set.path
            );
        }
    }
}

fn verify(repository: &Repository) -> Result<()> {
    let report = repo::check(repository)?;
    for finding in &report.reference_sets {
        println!("referenceset: {}", finding);
    }
    for finding in &report.variant_sets {
        println!("variantset: {}", finding);
    }
    for finding in &report.read_group_sets {
        println!("readgroupset: {}", finding);
    }
    for finding in &report.orphans {
        println!("orphan: {}", finding);
    }
    if report.truncated > 0 {
        println!("({} further findings suppressed)", report.truncated);
    }
    if report.is_clean() {
        println!("repository ok");
        Ok(())
    } else {
        Err(Error::BadRequest(format!(
            "verify found {} problems",
            report.reference_sets.len()
                + report.variant_sets.len()
                + report.read_group_sets.len()
                + report.orphans.len()
                + report.truncated
        )))
    }
}
