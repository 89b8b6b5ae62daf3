//! # Shelf CLI (`shelf`)
//!
//! Command-line front end for a shelfdex library: register documents, keep
//! their full-text index current, and search it.
//!
//! ## Usage
//!
//! ```bash
//! shelf --config ./config/shelf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shelf init` | Create the database and storage directories |
//! | `shelf add <paths…>` / `shelf add --url <url>` | Register documents |
//! | `shelf import <dir>` | Register every supported file under a directory |
//! | `shelf note <file or ->` | Create or rewrite a Markdown note |
//! | `shelf reindex <n>` | Re-extract and re-index a document |
//! | `shelf remove <n>` | Delete a document, its index, and its files |
//! | `shelf search "<query>"` | Full-text search with excerpts |
//! | `shelf list` / `shelf show <n>` / `shelf tags` / `shelf random` | Browse the catalogue |
//! | `shelf edit <n>` | Edit title, tags, and display flags |
//! | `shelf page <n> <page> --out <file>` | Export a page image |
//!
//! ## Examples
//!
//! ```bash
//! shelf init
//! shelf add ~/scans/moby-dick.pdf ~/comics/vol1.cbz
//! shelf search "white whale"
//! shelf search 吾輩 --number 12
//! shelf edit 12 --tags "novel ja" --right-to-left true
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shelfdex::config;
use shelfdex::index;
use shelfdex::ingest;
use shelfdex::library::Library;
use shelfdex::models::{Document, DocumentFilter, MetadataEdit, SortOrder};
use shelfdex::search;

/// Shelf: a personal document library with mixed CJK/Latin full-text search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Only `[db] path` is required; see `config/shelf.example.toml`.
#[derive(Parser)]
#[command(
    name = "shelf",
    about = "Shelf: a personal document library with full-text search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/shelf.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). `SHELF_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and storage directories.
    ///
    /// Idempotent: running it again is safe.
    Init,

    /// Register PDF, ZIP/CBZ, EPUB, or Markdown files.
    Add {
        /// Files to register.
        paths: Vec<PathBuf>,

        /// Download and register a document instead.
        #[arg(long, conflicts_with = "paths")]
        url: Option<String>,
    },

    /// Register every supported file under a directory.
    Import {
        dir: PathBuf,

        /// Glob patterns relative to `dir` (default: all supported suffixes).
        #[arg(long)]
        include: Vec<String>,
    },

    /// Create a Markdown note, or rewrite an existing one with `--number`.
    Note {
        /// Markdown source file, or `-` for stdin.
        source: PathBuf,

        /// Note to rewrite.
        #[arg(long)]
        number: Option<i64>,

        /// Title (default: the note's first heading).
        #[arg(long)]
        title: Option<String>,
    },

    /// Re-extract a document and replace its index.
    Reindex {
        number: i64,

        /// Also replace the title with the one embedded in the file.
        #[arg(long)]
        title: bool,
    },

    /// Delete a document with its index, file, and thumbnail.
    Remove { number: i64 },

    /// Full-text search.
    Search {
        query: String,

        /// Search within one document.
        #[arg(long)]
        number: Option<i64>,

        /// Maximum index rows fetched (default: `search.result_limit`).
        #[arg(long)]
        limit: Option<i64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List documents.
    List {
        /// Only documents whose tags contain this text.
        #[arg(long)]
        tag: Option<String>,

        #[arg(long, value_enum, default_value_t = SortOrder::NumberDesc)]
        sort: SortOrder,

        /// Include hidden documents.
        #[arg(long)]
        all: bool,

        #[arg(long)]
        json: bool,
    },

    /// Show one document's record.
    Show {
        number: i64,

        #[arg(long)]
        json: bool,
    },

    /// Edit a document's metadata.
    Edit {
        number: i64,

        #[arg(long)]
        title: Option<String>,

        /// Space-delimited tags (replaces the current set).
        #[arg(long)]
        tags: Option<String>,

        #[arg(long)]
        hidden: Option<bool>,

        #[arg(long)]
        spread: Option<bool>,

        #[arg(long)]
        right_to_left: Option<bool>,
    },

    /// List every tag in use.
    Tags,

    /// Show a random visible document.
    Random,

    /// Export a page image (PDF and ZIP documents). Pages are 0-based.
    Page {
        number: i64,
        page: usize,

        /// Output image path; the extension picks the encoding.
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let filter = if let Ok(env) = std::env::var("SHELF_LOG") {
        EnvFilter::new(env)
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            _ => EnvFilter::new("debug"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn format_date(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn flag(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "yes",
        Some(false) => "no",
        None => "-",
    }
}

fn print_summary(doc: &Document) {
    println!(
        "No. {} [{}] {} ({} pages)",
        doc.number,
        doc.format,
        doc.title,
        doc.page_count
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string())
    );
}

fn print_document(doc: &Document) {
    print_summary(doc);
    println!("    added: {}", format_date(doc.created_at));
    println!("    tags: {}", doc.tag_list().join(" "));
    println!(
        "    hidden: {}  spread: {}  right-to-left: {}",
        flag(doc.hidden),
        flag(doc.spread),
        flag(doc.right_to_left)
    );
    println!("    hash: {}", doc.content_hash);
}

fn format_position(position: f64) -> String {
    if position.fract() == 0.0 {
        format!("{}", position as i64)
    } else {
        format!("{:.2}", position)
    }
}

fn read_note_source(source: &Path) -> anyhow::Result<String> {
    if source.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read note from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read note: {}", source.display()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let library = Library::open(cfg).await?;

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(&library.config().storage.documents_dir)?;
            std::fs::create_dir_all(&library.config().storage.thumbnails_dir)?;
            println!("Library initialized successfully.");
        }
        Commands::Add { paths, url } => {
            if let Some(url) = url {
                let doc = ingest::register_url(&library, &url).await?;
                print!("added ");
                print_summary(&doc);
                return Ok(());
            }
            if paths.is_empty() {
                bail!("nothing to add: pass file paths or --url");
            }
            let mut failures = 0;
            for path in &paths {
                match ingest::register_path(&library, path).await {
                    Ok(doc) => {
                        print!("added ");
                        print_summary(&doc);
                    }
                    Err(e) => {
                        failures += 1;
                        eprintln!("{}: {}", path.display(), e);
                    }
                }
            }
            if failures > 0 {
                bail!("{} of {} files failed", failures, paths.len());
            }
        }
        Commands::Import { dir, include } => {
            let report = ingest::import_dir(&library, &dir, &include).await?;
            println!("import {}", dir.display());
            println!("  added: {}", report.added.len());
            println!("  duplicates skipped: {}", report.duplicates.len());
            println!("  failed: {}", report.failed.len());
            for (path, reason) in &report.failed {
                println!("    {}: {}", path.display(), reason);
            }
            println!("ok");
        }
        Commands::Note {
            source,
            number,
            title,
        } => {
            let text = read_note_source(&source)?;
            let doc = ingest::write_note(&library, number, title.as_deref(), &text).await?;
            print!("{} ", if number.is_some() { "updated" } else { "added" });
            print_summary(&doc);
        }
        Commands::Reindex { number, title } => {
            let report = index::reindex(&library, number, title).await?;
            println!("reindex #{}", report.number);
            println!("  pages: {}", report.page_count);
            println!("  index entries: {}", report.entries);
            if let Some(title) = report.title {
                println!("  title: {}", title);
            }
            println!("ok");
        }
        Commands::Remove { number } => {
            let doc = ingest::remove(&library, number).await?;
            print!("removed ");
            print_summary(&doc);
        }
        Commands::Search {
            query,
            number,
            limit,
            json,
        } => {
            let results = search::search(&library, &query, number, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
                return Ok(());
            }
            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, result) in results.iter().enumerate() {
                println!("{}. No. {} {}", i + 1, result.number, result.title);
                if result.title_match {
                    println!("    [title matches]");
                }
                for hit in &result.hits {
                    println!(
                        "    p.{}: \"{}\"",
                        format_position(hit.position),
                        hit.excerpt.replace('\n', " ").trim()
                    );
                }
                println!();
            }
        }
        Commands::List {
            tag,
            sort,
            all,
            json,
        } => {
            let filter = DocumentFilter {
                tag,
                include_hidden: all,
                sort,
            };
            let docs = library.list(&filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else if docs.is_empty() {
                println!("No documents.");
            } else {
                for doc in &docs {
                    print_summary(doc);
                }
            }
        }
        Commands::Show { number, json } => {
            let doc = library.document(number).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                print_document(&doc);
            }
        }
        Commands::Edit {
            number,
            title,
            tags,
            hidden,
            spread,
            right_to_left,
        } => {
            let edit = MetadataEdit {
                title,
                tags,
                hidden,
                spread,
                right_to_left,
            };
            let doc = library.edit(number, edit).await?;
            print_document(&doc);
        }
        Commands::Tags => {
            for tag in library.tags().await? {
                println!("{}", tag);
            }
        }
        Commands::Random => match library.random().await? {
            Some(doc) => print_document(&doc),
            None => println!("No documents."),
        },
        Commands::Page { number, page, out } => {
            library.export_page(number, page, &out).await?;
            println!("wrote page {} of #{} to {}", page, number, out.display());
        }
    }

    Ok(())
}
