use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ragsync::config::Config;
use ragsync::db::VectorStore;
use ragsync::embedder::{self, Embedder};
use ragsync::indexer::Ingestor;
use ragsync::loader;
use ragsync::retrieval::Retriever;

#[derive(Parser, Debug)]
#[command(name = "ragsync")]
#[command(version, about = "Ingest document corpora into vector stores and search them")]
struct Cli {
    /// Configuration file (JSON). A template is generated at the default path.
    #[arg(long, short, default_value = "")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, chunk, embed and index a domain's documents
    Ingest {
        domain: String,
        /// Drop the store's contents and re-index every source
        #[arg(long)]
        full: bool,
    },

    /// Print the passages most similar to a query
    Search {
        domain: String,
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Minimum similarity score in [0, 1]
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// List the sources indexed in a domain's store
    List { domain: String },

    /// Remove every entry derived from one source path
    Delete { domain: String, source_path: String },

    /// Convert a wiki JSON export into one text file per page
    ConvertWiki {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        /// Also write every page into this single file
        #[arg(long)]
        combined_out: Option<PathBuf>,
        /// Skip pages whose rendered text is shorter than this
        #[arg(long, default_value_t = 200)]
        min_chars: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Ingest { domain, full } => {
            let (config, embedder) = setup(&cli.config)?;
            let domain_cfg = config.domain(&domain)?;
            let mut store = VectorStore::open(&domain_cfg.persist_dir, embedder.dimensions())
                .with_context(|| format!("cannot open {domain} store"))?;

            if full {
                let removed = store.clear()?;
                info!("Cleared {removed} entries from {domain} store");
            }

            let documents = loader::load_domain(domain_cfg);
            let mut ingestor = Ingestor::new(
                &mut store,
                embedder.as_ref(),
                domain_cfg.chunking,
                config.ingest.settings(),
            )
            .with_progress(std::io::stderr().is_terminal());
            let report = ingestor.sync(&documents)?;

            println!(
                "{domain}: added {} chunks, skipped {} short chunks ({} new, {} changed, {} unchanged sources)",
                report.added,
                report.skipped,
                report.sources_added,
                report.sources_replaced,
                report.sources_skipped
            );
        }

        Command::Search {
            domain,
            query,
            top_k,
            threshold,
        } => {
            let (config, embedder) = setup(&cli.config)?;
            let store = open_for_reading(&config, &domain, embedder.as_ref())?;
            let mut retriever = Retriever::new(&store, embedder.as_ref());
            retriever.top_k = top_k.unwrap_or(config.retrieval.top_k);
            retriever.score_threshold = threshold.or(config.retrieval.score_threshold);
            retriever.excerpt_chars = config.retrieval.excerpt_chars;

            println!("{}", retriever.lookup(&query));
        }

        Command::List { domain } => {
            let (config, embedder) = setup(&cli.config)?;
            let store = open_for_reading(&config, &domain, embedder.as_ref())?;
            let summaries = store.source_summaries()?;
            for s in &summaries {
                println!(
                    "{}\t{}\t{} chunks\t{}",
                    s.source_path,
                    s.title,
                    s.chunks,
                    s.indexed_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            println!("{} source(s), {} entries", summaries.len(), store.count()?);
        }

        Command::Delete {
            domain,
            source_path,
        } => {
            let (config, embedder) = setup(&cli.config)?;
            let domain_cfg = config.domain(&domain)?;
            let mut store =
                VectorStore::open_existing(&domain_cfg.persist_dir, embedder.dimensions())
                    .with_context(|| format!("cannot open {domain} store"))?;
            let removed = store.delete_source(&source_path)?;
            println!("Removed {removed} entries for {source_path}");
        }

        Command::ConvertWiki {
            input,
            out_dir,
            combined_out,
            min_chars,
        } => {
            let written =
                loader::export_wiki_to_text(&input, &out_dir, combined_out.as_deref(), min_chars)
                    .context("wiki conversion failed")?;
            println!("Wrote {} page(s) to {}", written.len(), out_dir.display());
        }
    }

    Ok(())
}

/// Load and validate configuration, then build the embedder it selects.
fn setup(config_path: &str) -> Result<(Config, Box<dyn Embedder>)> {
    let mut config = Config::load(config_path)?;
    config.apply_env()?;
    config.validate().context("invalid configuration")?;
    let embedder = embedder::from_config(&config.embedding).context("embedder setup failed")?;
    Ok((config, embedder))
}

fn open_for_reading(config: &Config, domain: &str, embedder: &dyn Embedder) -> Result<VectorStore> {
    let domain_cfg = config.domain(domain)?;
    let store = VectorStore::open_read_only(&domain_cfg.persist_dir)
        .with_context(|| format!("cannot open {domain} store (run `ragsync ingest {domain}` first)"))?;
    anyhow::ensure!(
        store.dimensions() == embedder.dimensions(),
        "{domain} store holds {}-dimensional vectors but the embedder produces {}",
        store.dimensions(),
        embedder.dimensions()
    );
    Ok(store)
}
