use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use facematch_core::{
    CategoryStore, EmbeddingGate, Inbox, IngestionPipeline, PeopleStore, Settings, SidecarProvider,
    SimilaritySearch,
};
use facematch_store::SqliteCatalog;

/// Rows returned by `people`.
const PEOPLE_SEARCH_LIMIT: usize = 10;

#[derive(Parser)]
#[command(name = "facematch", about = "Facematch catalog administration and ingestion")]
struct Cli {
    /// SQLite database path (overrides FACEMATCH_DB_PATH)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,
    /// Data root holding ingest/input and ingest/finished (overrides FACEMATCH_DATA_ROOT)
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,
    /// Embedding sidecar base URL (overrides FACEMATCH_AI_ENDPOINT)
    #[arg(long, global = true)]
    ai_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage categories
    Categories {
        #[command(subcommand)]
        command: CategoryCommands,
    },
    /// Import every pending photo in the inbox into a category
    Import {
        /// Category name
        #[arg(short, long)]
        category: String,
    },
    /// Find people by name substring
    People {
        #[arg(short, long)]
        q: String,
    },
    /// Maintain a single person
    Person {
        #[command(subcommand)]
        command: PersonCommands,
    },
    /// Match a photo against one or more categories
    Match {
        /// Image file to search with
        image: PathBuf,
        /// Category names to search in (repeatable)
        #[arg(short, long = "category", required = true)]
        categories: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CategoryCommands {
    /// List categories
    List,
    /// Create a category
    Add {
        name: String,
        /// Mark the category as NSFW
        #[arg(long)]
        nsfw: bool,
    },
}

#[derive(Subcommand)]
enum PersonCommands {
    /// Hide a person from search results (or unhide with --hidden false)
    Hide {
        #[arg(long)]
        id: i64,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        hidden: bool,
    },
    /// Delete a person and all of their face records
    Purge {
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(root) = cli.data_root {
        settings = settings.with_data_root(root);
    }
    if let Some(db_path) = cli.db_path {
        settings.db_path = db_path;
    }
    if let Some(endpoint) = cli.ai_endpoint {
        settings.ai_endpoint = endpoint;
    }

    tracing::debug!(
        db = %settings.db_path.display(),
        data_root = %settings.data_root.display(),
        "facematch starting"
    );
    let catalog = SqliteCatalog::open(&settings.db_path).await?;

    match cli.command {
        Commands::Categories { command: CategoryCommands::List } => {
            let categories = catalog.list_categories().await?;
            if categories.is_empty() {
                println!("No categories");
            }
            for c in categories {
                let nsfw = if c.is_nsfw { "  [nsfw]" } else { "" };
                println!("{:>4}  {}{nsfw}", c.id, c.display_name);
            }
        }
        Commands::Categories { command: CategoryCommands::Add { name, nsfw } } => {
            let id = catalog.create_category(&name, nsfw).await?;
            println!("Created category {name} (id {id})");
        }
        Commands::Import { category } => {
            let pipeline = IngestionPipeline::new(
                connect_gate(&settings)?,
                catalog,
                Inbox::new(settings.input_dir(), settings.finished_dir()),
            );
            let report = pipeline.import(&category).await?;
            println!(
                "Processed {} file(s): {} imported, {} duplicate(s), {} failed",
                report.total, report.imported, report.duplicates, report.failed
            );
        }
        Commands::People { q } => {
            let people = catalog.search_people(&q, PEOPLE_SEARCH_LIMIT).await?;
            if people.is_empty() {
                println!("No matches for {q:?}");
            }
            for p in people {
                let tag = if p.disambiguation_tag.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", p.disambiguation_tag)
                };
                let hidden = if p.is_hidden { "  (hidden)" } else { "" };
                println!("{:>6}  {}{tag}  ({}){hidden}", p.id, p.display_name, p.category_name);
            }
        }
        Commands::Person { command: PersonCommands::Hide { id, hidden } } => {
            catalog.set_hidden(id, hidden).await?;
            let state = if hidden { "hidden" } else { "visible" };
            println!("Person {id} is now {state}");
        }
        Commands::Person { command: PersonCommands::Purge { id } } => {
            let faces = catalog.purge_person(id).await?;
            println!("Purged person {id} and {faces} face record(s)");
        }
        Commands::Match { image, categories } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("read {}", image.display()))?;
            let mut category_ids = Vec::with_capacity(categories.len());
            for name in &categories {
                category_ids.push(catalog.category_id(name).await?);
            }

            let search = SimilaritySearch::new(connect_gate(&settings)?, catalog)
                .with_candidate_limit(settings.search_candidates);
            let results = search.search(&category_ids, &bytes).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    Ok(())
}

fn connect_gate(settings: &Settings) -> Result<EmbeddingGate<SidecarProvider>> {
    EmbeddingGate::connect(&settings.ai_endpoint, settings.request_timeout(), settings.quality.clone())
        .context("set FACEMATCH_AI_ENDPOINT or pass --ai-endpoint")
}
