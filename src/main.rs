//! Docdex CLI: ingest local documents into the searchable vector index.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use docdex::config::Config;
use docdex::context::AppContext;
use docdex::extract::ExtractionMethod;
use docdex::logging;
use docdex::processing::{FileIndexResult, IndexOutcome, IndexingService};

#[derive(Parser)]
#[command(
    name = "docdex",
    version,
    about = "Index local documents (PDF, DOCX, plaintext) into a searchable vector index"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index one or more files.
    Index {
        /// Files to index.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Collection the documents belong to.
        #[arg(short, long, default_value = "default")]
        collection: String,
        /// Extraction method for PDF pages: auto, local, or remote.
        #[arg(short, long, default_value = "auto", value_parser = parse_method)]
        method: ExtractionMethod,
        /// Reindex even when the fingerprint is unchanged.
        #[arg(short, long)]
        force: bool,
    },
    /// Index every supported file under a directory.
    IndexDir {
        /// Directory to scan.
        dir: PathBuf,
        /// Collection the documents belong to.
        #[arg(short, long, default_value = "default")]
        collection: String,
        /// Extraction method for PDF pages: auto, local, or remote.
        #[arg(short, long, default_value = "auto", value_parser = parse_method)]
        method: ExtractionMethod,
        /// Reindex even when fingerprints are unchanged.
        #[arg(short, long)]
        force: bool,
        /// Descend into subdirectories.
        #[arg(short, long)]
        recursive: bool,
    },
    /// Remove a document: chunks, metadata record, and cache entries.
    Remove {
        /// File whose document should be removed.
        file: PathBuf,
        /// Collection the document belongs to.
        #[arg(short, long, default_value = "default")]
        collection: String,
    },
    /// Manage collections.
    Collections {
        #[command(subcommand)]
        action: Option<CollectionsAction>,
    },
    /// List indexed documents.
    Documents {
        /// Restrict the listing to one collection.
        #[arg(short, long)]
        collection: Option<String>,
    },
}

#[derive(Subcommand)]
enum CollectionsAction {
    /// List collections with their document counts (the default).
    List,
    /// Create a collection.
    Create {
        /// Collection name.
        name: String,
    },
    /// Delete a collection and everything indexed in it.
    Delete {
        /// Collection name.
        name: String,
    },
}

fn parse_method(value: &str) -> Result<ExtractionMethod, String> {
    value
        .parse()
        .map_err(|()| format!("unknown extraction method: {value} (expected auto, local, or remote)"))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    logging::init_tracing();
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let ctx = match AppContext::initialize(config).await {
        Ok(ctx) => Arc::new(ctx),
        Err(err) => {
            eprintln!("Startup failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    let service = IndexingService::new(ctx.clone());

    let code = match run(&service, cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    };
    ctx.close().await;
    code
}

async fn run(service: &IndexingService, command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Index {
            files,
            collection,
            method,
            force,
        } => {
            let results = service.index_files(&files, &collection, method, force).await;
            Ok(report(&results))
        }
        Command::IndexDir {
            dir,
            collection,
            method,
            force,
            recursive,
        } => {
            let results = service
                .index_directory(&dir, &collection, method, force, recursive)
                .await?;
            Ok(report(&results))
        }
        Command::Remove { file, collection } => {
            if service.remove_document(&file, &collection).await? {
                println!("removed {}", file.display());
            } else {
                println!("not indexed: {}", file.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Collections { action } => {
            match action.unwrap_or(CollectionsAction::List) {
                CollectionsAction::List => {
                    for info in service.list_collections().await? {
                        println!("{}  {} documents", info.name, info.document_count);
                    }
                }
                CollectionsAction::Create { name } => {
                    if service.create_collection(&name).await? {
                        println!("created {name}");
                    } else {
                        println!("already exists: {name}");
                    }
                }
                CollectionsAction::Delete { name } => {
                    if service.delete_collection(&name).await? {
                        println!("deleted {name}");
                    } else {
                        println!("not found: {name}");
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Documents { collection } => {
            for doc in service.list_documents(collection.as_deref()).await? {
                println!(
                    "{:<8} {:>5} chunks  [{}] {}",
                    doc.status.as_str(),
                    doc.chunk_count,
                    doc.collection,
                    doc.file_path
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report(results: &[FileIndexResult]) -> ExitCode {
    let mut failed = 0usize;
    for result in results {
        println!("{}: {}", result.file_path, result.outcome);
        if matches!(result.outcome, IndexOutcome::Failed { .. }) {
            failed += 1;
        }
    }
    if failed > 0 {
        eprintln!("{failed} of {} files failed", results.len());
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
