use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedhound::config::Config;
use feedhound::discovery::{
    BingSearch, DiscoverySink, FeedDiscovery, NoSearch, OutputFormat, SearchProvider,
};
use feedhound::feed::{
    ArchiveActions, FeedActions, FeedPoller, FeedRsParser, HttpTransport, LoggingActions,
    PollOutcome, PollReport,
};
use feedhound::storage::{Database, DatabaseError};
use feedhound::util::validate_feed_url;

/// Get the config directory path (~/.config/feedhound/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedhound"))
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "feedhound",
    version,
    about = "Adaptive RSS/Atom poller and feed discovery crawler"
)]
struct Args {
    /// Config file (default: ~/.config/feedhound/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database (default: ~/.config/feedhound/feeds.db)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add feeds by URL
    Add {
        urls: Vec<String>,
        /// Read additional URLs from a file, one per line
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// List known feeds and their schedule state
    List,
    /// Exclude a feed from polling
    Block { id: i64 },
    /// Re-include a blocked feed
    Unblock { id: i64 },
    /// Clear a feed's failure counters
    ResetCounters { id: i64 },
    /// Show archived items of a feed, newest first
    Items {
        id: i64,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Poll due feeds (or the given ids)
    Poll {
        ids: Vec<i64>,
        /// Keep polling due feeds until interrupted
        #[arg(long, conflicts_with = "ids")]
        watch: bool,
        /// Only log outcomes, do not archive items
        #[arg(long)]
        no_archive: bool,
    },
    /// Discover feeds from search queries and seed pages
    Discover(DiscoverArgs),
}

#[derive(clap::Args, Debug)]
struct DiscoverArgs {
    /// Search query (repeatable)
    #[arg(short, long = "query")]
    queries: Vec<String>,
    /// File with one query per line
    #[arg(long, value_name = "FILE")]
    queries_file: Option<PathBuf>,
    /// Page to scan directly (repeatable)
    #[arg(long = "url")]
    urls: Vec<String>,
    /// File with one page URL per line
    #[arg(long, value_name = "FILE")]
    urls_file: Option<PathBuf>,
    /// Expand queries with pairwise combinations up to this many searches
    #[arg(long)]
    target: Option<usize>,
    /// Append discovered feeds to this file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,
    /// Write JSON records instead of plain URLs
    #[arg(long)]
    extended: bool,
    /// Worker count (overrides config)
    #[arg(long)]
    threads: Option<usize>,
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

/// Opens the database at `path`, or at the default location in `config_dir`.
async fn open_database(path: Option<PathBuf>, config_dir: &Path) -> Result<Database> {
    let path = match path {
        Some(path) => path,
        None => {
            ensure_private_dir(config_dir)?;
            config_dir.join("feeds.db")
        }
    };
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: the database is locked by another feedhound process.");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

fn format_time(ts: Option<i64>) -> String {
    ts.and_then(|t| Utc.timestamp_opt(t, 0).single())
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn summarize(reports: &[PollReport]) {
    let count = |outcome: PollOutcome| reports.iter().filter(|r| r.outcome == outcome).count();
    println!(
        "Polled {} feeds: {} ok, {} miss, {} slow, {} unparsable, {} unreachable, {} error, {} new items",
        reports.len(),
        count(PollOutcome::Success),
        count(PollOutcome::Miss),
        count(PollOutcome::ExecutionTimeWarning),
        count(PollOutcome::Unparsable),
        count(PollOutcome::Unreachable),
        count(PollOutcome::Error),
        reports.iter().map(|r| r.new_items).sum::<usize>(),
    );
}

async fn run_add(db: &Database, mut urls: Vec<String>, file: Option<PathBuf>) -> Result<()> {
    if let Some(file) = file {
        urls.extend(read_lines(&file)?);
    }

    let mut valid = Vec::with_capacity(urls.len());
    for url in &urls {
        match validate_feed_url(url) {
            Ok(parsed) => valid.push(parsed.to_string()),
            Err(e) => eprintln!("Skipping {url}: {e}"),
        }
    }

    let added = db.insert_feeds(&valid).await.context("Failed to add feeds")?;
    println!(
        "Added {} feeds ({} already known)",
        added,
        valid.len().saturating_sub(added)
    );
    Ok(())
}

async fn run_list(db: &Database) -> Result<()> {
    let feeds = db.list_feeds().await.context("Failed to load feeds")?;
    for feed in &feeds {
        println!(
            "{:>5}  {:<22} {:>5}m  {:<9} {:<16} {:<16} {}{}",
            feed.id,
            feed.last_outcome.as_str(),
            feed.check_interval,
            feed.activity.as_str(),
            format_time(feed.last_poll),
            format_time(feed.next_check()),
            feed.url,
            if feed.blocked { "  [blocked]" } else { "" },
        );
    }
    println!("{} feeds", feeds.len());
    Ok(())
}

async fn run_items(db: &Database, feed_id: i64, limit: i64) -> Result<()> {
    let items = db
        .get_items_for_feed(feed_id, Some(limit))
        .await
        .context("Failed to load items")?;
    for item in items {
        println!(
            "{}  {}  {}",
            format_time(item.published),
            item.title.as_deref().unwrap_or("(untitled)"),
            item.link.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn run_poll(
    config: &Config,
    db: Database,
    ids: Vec<i64>,
    watch: bool,
    archive: bool,
) -> Result<()> {
    let transport =
        HttpTransport::new(config.transport_settings()).context("Failed to build HTTP client")?;
    let actions: Arc<dyn FeedActions> = if archive {
        Arc::new(ArchiveActions::new(db.clone()))
    } else {
        Arc::new(LoggingActions)
    };
    let poller = FeedPoller::new(
        Arc::new(transport),
        Arc::new(FeedRsParser),
        Arc::new(config.schedule()),
        Arc::new(db.clone()),
        actions,
        config.poll_settings(),
    );

    if !ids.is_empty() {
        summarize(&poller.poll_due(ids).await);
        return Ok(());
    }

    loop {
        let due = db
            .due_feed_ids(Utc::now().timestamp())
            .await
            .context("Failed to load due feeds")?;
        if due.is_empty() {
            tracing::debug!("No feeds due");
        } else {
            summarize(&poller.poll_due(due).await);
        }

        if !watch {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(config.watch_interval()) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping");
                return Ok(());
            }
        }
    }
}

async fn run_discover(config: &Config, args: DiscoverArgs) -> Result<()> {
    let DiscoverArgs {
        mut queries,
        queries_file,
        mut urls,
        urls_file,
        target,
        output,
        extended,
        threads,
    } = args;

    if let Some(file) = queries_file {
        queries.extend(read_lines(&file)?);
    }
    if let Some(file) = urls_file {
        urls.extend(read_lines(&file)?);
    }
    if queries.is_empty() && urls.is_empty() {
        anyhow::bail!("Nothing to do: give --query/--queries-file or --url/--urls-file");
    }

    let search: Arc<dyn SearchProvider> = if queries.is_empty() {
        Arc::new(NoSearch)
    } else {
        let key = config.search_api_key().ok_or_else(|| {
            anyhow::anyhow!(
                "Search queries need an API key: set {} or search_api_key in config.toml",
                feedhound::config::SEARCH_API_KEY_ENV
            )
        })?;
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Arc::new(BingSearch::new(client, &config.search_endpoint, key)?)
    };

    let transport =
        HttpTransport::new(config.transport_settings()).context("Failed to build HTTP client")?;
    let format = if extended {
        OutputFormat::Extended
    } else {
        OutputFormat::Plain
    };
    let sink = DiscoverySink::open(&output, format)
        .await
        .with_context(|| format!("Failed to open {}", output.display()))?;

    let mut settings = config.discovery_settings();
    if let Some(threads) = threads {
        settings.threads = threads.max(1);
    }

    let discovery = Arc::new(FeedDiscovery::new(
        search,
        Arc::new(transport),
        Arc::new(sink),
        settings,
    ));
    discovery.add_queries(queries);
    if let Some(target) = target {
        discovery.combine_queries(target);
    }
    discovery.add_urls(urls);

    let stats = discovery.run().await;
    println!(
        "Checked {} pages, found {} feeds ({} errors) -> {}",
        stats.pages_checked,
        stats.feeds_found,
        stats.errors,
        output.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path).context("Failed to load config")?;
    tracing::debug!(config = ?config, "Effective configuration");

    let db_path = args.db;
    let open_db = || open_database(db_path.clone(), &config_dir);

    match args.command {
        Command::Add { urls, file } => run_add(&open_db().await?, urls, file).await,
        Command::List => run_list(&open_db().await?).await,
        Command::Block { id } => {
            open_db().await?.set_feed_blocked(id, true).await?;
            println!("Feed {id} blocked");
            Ok(())
        }
        Command::Unblock { id } => {
            open_db().await?.set_feed_blocked(id, false).await?;
            println!("Feed {id} unblocked");
            Ok(())
        }
        Command::ResetCounters { id } => {
            open_db().await?.reset_feed_counters(id).await?;
            println!("Feed {id} counters reset");
            Ok(())
        }
        Command::Items { id, limit } => run_items(&open_db().await?, id, limit).await,
        Command::Poll {
            ids,
            watch,
            no_archive,
        } => run_poll(&config, open_db().await?, ids, watch, !no_archive).await,
        Command::Discover(discover) => run_discover(&config, discover).await,
    }
}
