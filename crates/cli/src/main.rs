use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use flowsort_core::config::{self, expand_home, AppConfig};
use flowsort_core::tags::split_tags;
use flowsort_core::FlowStore;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod render;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    let config_path = cli
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Init {
            base_path,
            downloads,
            no_save,
        } => {
            if let Some(base) = base_path {
                cfg.base_path = base;
            }
            if let Some(dl) = downloads {
                cfg.downloads_path = dl;
            }
            let store = FlowStore::new(cfg.clone())?;
            store.init()?;
            if !no_save {
                config::save(&cfg, &config_path)?;
                println!("configuration saved to {}", config_path.display());
            }
            render::layout(store.layout());
            Ok(())
        }
        Commands::Config {
            show,
            base_path,
            downloads,
            inbox_days,
            docs_days,
            archive_days,
        } => {
            let mut changed = false;
            if let Some(base) = base_path {
                cfg.base_path = base;
                changed = true;
            }
            if let Some(dl) = downloads {
                cfg.downloads_path = dl;
                changed = true;
            }
            for (value, field) in [
                (inbox_days, &mut cfg.inbox_to_documents_days),
                (docs_days, &mut cfg.documents_to_archive_days),
                (archive_days, &mut cfg.inbox_to_archive_days),
            ] {
                if let Some(days) = value {
                    *field = days;
                    changed = true;
                }
            }
            if changed {
                config::save(&cfg, &config_path)?;
                println!("configuration saved to {}", config_path.display());
            }
            if show || !changed {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            }
            Ok(())
        }
        Commands::Collect {
            source,
            recursive,
            json,
        } => {
            let source = expand_home(source.as_deref().unwrap_or(cfg.downloads_path.as_path()));
            let recursive = recursive || cfg.collect.recursive;
            let store = FlowStore::new(cfg)?;
            let report = store.collect_with(&source, recursive)?;
            render::collection(&report, json)
        }
        Commands::Sweep { json } => {
            let report = FlowStore::new(cfg)?.sweep()?;
            render::transitions(&report, json)
        }
        Commands::Cleanup { json } => {
            let report = FlowStore::new(cfg)?.cleanup()?;
            render::cleanup(&report, json)
        }
        Commands::Retag { json } => {
            let report = FlowStore::new(cfg)?.retag()?;
            render::retag(&report, json)
        }
        Commands::Status { json } => {
            let report = FlowStore::new(cfg)?.report_status()?;
            render::status(&report, json)
        }
        Commands::Classify { file, json } => {
            let result = FlowStore::new(cfg)?.classify_single(&file);
            render::classification(&file, &result, json)
        }
        Commands::Tags {
            file,
            list,
            add,
            remove,
            clear,
            replace,
            json,
        } => run_tags(cfg, &file, list, add, remove, clear, replace, json),
    }
}

#[derive(Parser)]
#[command(name = "flowsort", version)]
#[command(about = "Moves files through INBOX, DOCUMENTS and ARCHIVE by age and use", long_about = None)]
struct Cli {
    /// Path to config JSON
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the stage directories and save the configuration
    Init {
        #[arg(long)]
        base_path: Option<PathBuf>,
        /// Default collect source
        #[arg(long)]
        downloads: Option<PathBuf>,
        #[arg(long)]
        no_save: bool,
    },
    /// Show or change the saved configuration
    Config {
        #[arg(long)]
        show: bool,
        #[arg(long)]
        base_path: Option<PathBuf>,
        #[arg(long)]
        downloads: Option<PathBuf>,
        /// Days of recent use that promote an INBOX file to DOCUMENTS
        #[arg(long)]
        inbox_days: Option<u32>,
        /// Idle days before a DOCUMENTS file is archived
        #[arg(long)]
        docs_days: Option<u32>,
        /// Days after which an untouched INBOX file is archived
        #[arg(long)]
        archive_days: Option<u32>,
    },
    /// Move files from the source directory into INBOX
    Collect {
        /// Defaults to the configured downloads directory
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long)]
        recursive: bool,
        #[arg(long)]
        json: bool,
    },
    /// Apply the time rules to every stage
    Sweep {
        #[arg(long)]
        json: bool,
    },
    /// Remove broken links and recreate missing ones
    Cleanup {
        #[arg(long)]
        json: bool,
    },
    /// Re-classify every file and refresh its tags and links
    Retag {
        #[arg(long)]
        json: bool,
    },
    /// File and link counts per stage
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Show how a file would be classified
    Classify {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Read or edit the tags of a file
    Tags {
        file: PathBuf,
        #[arg(long)]
        list: bool,
        /// Comma separated
        #[arg(long)]
        add: Option<String>,
        /// Comma separated
        #[arg(long)]
        remove: Option<String>,
        #[arg(long)]
        clear: bool,
        /// Overwrite instead of merging with existing tags
        #[arg(long)]
        replace: bool,
        #[arg(long)]
        json: bool,
    },
}

#[allow(clippy::too_many_arguments)]
fn run_tags(
    mut cfg: AppConfig,
    file: &Path,
    list: bool,
    add: Option<String>,
    remove: Option<String>,
    clear: bool,
    replace: bool,
    json: bool,
) -> Result<()> {
    if !file.exists() {
        bail!("{} does not exist", file.display());
    }
    if replace {
        cfg.tagging.preserve_existing = false;
    }
    let store = FlowStore::new(cfg)?;
    if clear {
        store.clear_tags(file)?;
    }
    if let Some(tags) = add.as_deref().map(split_tags) {
        store.add_tags(file, &tags)?;
    }
    if let Some(tags) = remove.as_deref().map(split_tags) {
        store.remove_tags(file, &tags)?;
    }
    let mutated = clear || add.is_some() || remove.is_some();
    if list || !mutated {
        render::tags(file, &store.read_tags(file)?, json)?;
    }
    if store.metadata_warning().emitted() {
        eprintln!("extended attributes are not supported here; tags were not changed");
    }
    Ok(())
}
