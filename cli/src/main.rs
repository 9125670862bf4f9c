use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pebbledoc_core::{Collection, CollectionOptions, FilePersistence};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pebbledoc")]
#[command(about = "pebbledoc CLI - command-line interface for the pebbledoc document store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import documents from a JSON array into a collection file
    Import {
        /// JSON file holding an array of documents
        file: PathBuf,
        /// Collection file path
        #[arg(long, default_value = "pebbledoc.db")]
        db: PathBuf,
    },
    /// Export a collection file to a JSON array
    Export {
        /// Output JSON file
        file: PathBuf,
        /// Collection file path
        #[arg(long, default_value = "pebbledoc.db")]
        db: PathBuf,
    },
    /// Compact a collection file, dropping dead log history
    Compact {
        /// Collection file path
        #[arg(long, default_value = "pebbledoc.db")]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Import { file, db } => import_data(&file, &db),
        Commands::Export { file, db } => export_data(&db, &file),
        Commands::Compact { db } => compact_data(&db),
    }
}

fn open_collection(db_path: &Path) -> Result<Collection<FilePersistence>> {
    let persistence = FilePersistence::open(db_path)
        .with_context(|| format!("failed to open collection file: {}", db_path.display()))?;
    let collection = Collection::new(
        persistence,
        CollectionOptions { filename: Some(db_path.display().to_string()), autoload: true },
    )
    .with_context(|| format!("failed to load collection file: {}", db_path.display()))?;
    Ok(collection)
}

/// Import a JSON array of documents into a collection file.
fn import_data(file: &Path, db_path: &Path) -> Result<()> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("failed to read file: {}", file.display()))?;

    let docs: Vec<Value> = serde_json::from_str(&content)
        .with_context(|| format!("file must contain a JSON array of documents: {}", file.display()))?;

    let collection = open_collection(db_path)?;
    let inserted = collection
        .insert_many(docs)
        .with_context(|| "failed to insert documents")?;

    println!("Imported {} documents into {}", inserted.len(), db_path.display());
    Ok(())
}

/// Export every live document in a collection file to a JSON array.
fn export_data(db_path: &Path, file: &Path) -> Result<()> {
    let collection = open_collection(db_path)?;
    let docs = collection
        .find(serde_json::json!({}))
        .with_context(|| "failed to read collection")?;

    let json = serde_json::to_string_pretty(&docs).with_context(|| "failed to serialize to JSON")?;
    fs::write(file, json).with_context(|| format!("failed to write to file: {}", file.display()))?;

    println!("Exported {} documents to {}", docs.len(), file.display());
    Ok(())
}

/// Rewrite a collection's log to just its live documents and indexes.
fn compact_data(db_path: &Path) -> Result<()> {
    let collection = open_collection(db_path)?;
    collection.compact().with_context(|| "failed to compact collection")?;
    println!("Compacted {}", db_path.display());
    Ok(())
}
