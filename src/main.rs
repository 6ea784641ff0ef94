use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use metadata_harvester::config::{load_config, Config};
use metadata_harvester::harvest::{
    hostname_of, HarvestPipeline, HarvestRequest, OaiClient, RunOutcome,
};
use metadata_harvester::index::{FieldMappingTable, Indexer, SearchIndex};
use metadata_harvester::ledger::HarvestLedger;
use metadata_harvester::query::{SearchEngine, SearchQuery, SearchResults};
use metadata_harvester::HarvestExecutor;

#[derive(Parser)]
#[command(
    name = "harvester",
    about = "Harvest OAI-PMH endpoints into a local index and search it",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./harvester.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest every configured site (or one) into the index
    Harvest {
        /// Re-harvest from scratch, ignoring previous harvest times. With
        /// --site only that site's documents are replaced
        #[arg(long)]
        force: bool,

        /// Only harvest the site with this title
        #[arg(long)]
        site: Option<String>,
    },

    /// Search the index
    Search {
        /// Query text, e.g. `title:"open access" -subject:law`
        query: Option<String>,

        /// Restrict results, as field=value (repeatable)
        #[arg(long = "filter", value_name = "FIELD=VALUE")]
        filters: Vec<String>,

        /// Result page to show
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Results per page (defaults to search.page_size)
        #[arg(long)]
        page_size: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Harvest { force, site } => run_harvest(&config, force, site.as_deref()).await,
        Commands::Search {
            query,
            filters,
            page,
            page_size,
            json,
        } => run_search(&config, query, &filters, page, page_size, json),
    }
}

async fn run_harvest(config: &Config, force: bool, only_site: Option<&str>) -> Result<()> {
    let sites: Vec<_> = config
        .sites
        .iter()
        .filter(|site| only_site.map_or(true, |title| site.title == title))
        .collect();
    if sites.is_empty() {
        match only_site {
            Some(title) => bail!("No configured site titled '{title}'"),
            None => bail!("No sites configured"),
        }
    }

    // A full rebuild starts from an empty index; a forced single site only
    // loses its own documents.
    let opened = if force && only_site.is_none() {
        warn!(path = %config.index.path.display(), "Rebuilding index from scratch");
        SearchIndex::create(&config.index.path)
    } else {
        SearchIndex::open(&config.index.path)
    };
    let index = opened.context("Failed to open index")?;
    let mut writer = index.writer().context("Failed to acquire index writer")?;
    let indexer = Indexer::new(FieldMappingTable::standard());

    let mut ledger =
        HarvestLedger::load(&config.harvest.ledger_path).context("Failed to load harvest ledger")?;

    if force {
        let snapshot = index.reader();
        for site in &sites {
            ledger.reset_bound(&site.title);
            if only_site.is_some() {
                let hostname = hostname_of(&site.url)?;
                let removed = indexer
                    .remove_host(&mut writer, &snapshot, &hostname)
                    .context("Failed to remove site documents")?;
                warn!(site = %site.title, %hostname, removed, "Removed documents of site");
            }
        }
        writer.commit().context("Failed to commit removed site documents")?;
    }
    let writer = Arc::new(Mutex::new(writer));

    let timeout = Duration::from_secs(config.harvest.timeout_secs);
    let client = OaiClient::new(&config.harvest.user_agent, timeout)
        .context("Failed to build HTTP client")?;
    let pipeline = Arc::new(HarvestPipeline::new(client, indexer).with_timeout(timeout));

    let requests: Vec<HarvestRequest> = sites
        .iter()
        .map(|site| {
            HarvestRequest::new(site.url.clone(), site.metadata_format)
                .with_from(ledger.last_harvested(&site.title))
                .with_set(site.set.clone())
        })
        .collect();

    let started_at = Utc::now();
    let executor = HarvestExecutor::new(config.harvest.concurrency);
    let results = executor.execute_all(pipeline, requests, writer).await;

    let mut failed_runs = 0usize;
    for (site, result) in sites.iter().zip(results) {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                error!(site = %site.title, error = %e, "Harvest task failed");
                failed_runs += 1;
                continue;
            }
        };

        match &report.outcome {
            RunOutcome::Empty => info!(site = %site.title, "Nothing to harvest"),
            RunOutcome::Completed => info!(
                site = %site.title,
                indexed = report.stats.indexed,
                removed = report.stats.removed,
                failed = report.stats.failed,
                duration_ms = report.stats.total_duration_ms,
                "Harvest completed"
            ),
            RunOutcome::Aborted(e) => error!(site = %site.title, error = %e, "Harvest aborted"),
        }
        for failure in &report.failures {
            warn!(site = %site.title, identifier = %failure.identifier, "{}", failure.reason);
        }

        if !ledger.apply_report(&site.title, started_at, &report) {
            failed_runs += 1;
        }
    }

    ledger.save().context("Failed to save harvest ledger")?;

    if failed_runs > 0 {
        bail!("{failed_runs} harvest run(s) did not complete");
    }
    Ok(())
}

fn run_search(
    config: &Config,
    query: Option<String>,
    filters: &[String],
    page: usize,
    page_size: Option<usize>,
    json: bool,
) -> Result<()> {
    let index = SearchIndex::open(&config.index.path).context("Failed to open index")?;

    let mut request = SearchQuery::new(query)
        .with_page(page, page_size.unwrap_or(config.search.page_size));
    for filter in filters {
        let Some((field, value)) = filter.split_once('=') else {
            bail!("Filter '{filter}' is not of the form field=value");
        };
        request = request.with_filter(field.trim(), value.trim());
    }

    let results = SearchEngine::new(FieldMappingTable::standard())
        .search(&index.reader(), &request)
        .context("Search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(&results);
    }
    Ok(())
}

fn print_results(results: &SearchResults) {
    let pager = &results.pager;
    if pager.total_entries == 0 {
        println!("No results.");
        return;
    }

    println!(
        "Results {}-{} of {} (page {}/{})",
        pager.first(),
        pager.last(),
        pager.total_entries,
        pager.current_page,
        pager.last_page()
    );
    for (i, record) in results.matches.iter().enumerate() {
        println!();
        println!(
            "{}. {}",
            pager.first() + i,
            record.get("title").unwrap_or("(untitled)")
        );
        for field in ["creator", "date", "language", "hostname"] {
            if let Some(value) = record.get(field) {
                println!("   {field}: {value}");
            }
        }
        if let Some(url) = &record.url {
            println!("   url: {url}");
        }
    }

    for facet in &results.facets {
        println!();
        println!("{}:", facet.name);
        for value in &facet.values {
            let marker = if value.active { "*" } else { " " };
            println!("  {marker} {} ({})", value.term, value.count);
        }
    }
}
