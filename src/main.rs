use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use canopy::config::Config;
use canopy::feed::{AggregationResult, Aggregator, HttpTransport, LoadProgress};
use canopy::subscription::{SubscriptionNode, Subscriptions};
use canopy::util::{display_width, truncate_to_width, validate_url_for_open};

const DATE_WIDTH: usize = 16;
const FEED_WIDTH: usize = 20;
const TITLE_WIDTH: usize = 72;

#[derive(Parser, Debug)]
#[command(
    name = "canopy",
    about = "Browse an OPML subscription tree and read its feeds newest-first"
)]
struct Args {
    /// OPML subscription document (overrides `opml_path` from the config)
    #[arg(long, value_name = "FILE")]
    opml: Option<PathBuf>,

    /// Config file (default: ~/.config/canopy/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Load a feed or category by its titles, e.g. "Tech/Rust Blog"
    #[arg(long, value_name = "PATH")]
    select: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Open the link of article N (1-based) in the default browser
    #[arg(long, value_name = "N", requires = "select")]
    open: Option<usize>,

    /// Maximum number of article rows to print
    #[arg(long, value_name = "N", default_value_t = 50)]
    limit: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match args.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from '{}'", path.display()))?,
        None => Config::default(),
    };

    let opml_path = args.opml.clone().unwrap_or_else(|| config.opml_path.clone());
    let document = std::fs::read_to_string(&opml_path).with_context(|| {
        format!(
            "Failed to read subscription file '{}'",
            opml_path.display()
        )
    })?;

    let mut subscriptions = Subscriptions::new();
    let summary = subscriptions
        .import(&document)
        .with_context(|| format!("Invalid OPML in '{}'", opml_path.display()))?;

    let Some(select) = args.select.as_deref() else {
        if args.json {
            println!("{}", serde_json::to_string_pretty(subscriptions.forest())?);
        } else {
            println!("{summary}");
            for node in subscriptions.forest() {
                print_node(node, 0);
            }
        }
        return Ok(());
    };

    let segments: Vec<&str> = select
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let node = subscriptions
        .find(&segments)
        .with_context(|| format!("No feed or category named '{select}'"))?;

    let transport = HttpTransport::new(config.fetch_settings())
        .context("Failed to create HTTP client")?;
    let mut aggregator =
        Aggregator::new(Arc::new(transport)).with_max_concurrent(config.max_concurrent_fetches);

    let progress_task = if !args.json && std::io::stderr().is_terminal() {
        let (tx, rx) = mpsc::channel(64);
        aggregator = aggregator.with_progress(tx);
        Some(tokio::spawn(report_progress(rx)))
    } else {
        None
    };

    let result = aggregator.load(node).await;
    // Closes the progress channel so the reporter finishes.
    drop(aggregator);
    if let Some(task) = progress_task {
        finish_progress(task).await;
    }
    let result = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_articles(&result, args.limit);
    }

    if let Some(n) = args.open {
        open_article(&result, n)?;
    }

    Ok(())
}

async fn report_progress(mut rx: mpsc::Receiver<LoadProgress>) {
    while let Some(update) = rx.recv().await {
        let mark = if update.failed { "!" } else { " " };
        eprint!(
            "\r\x1b[2K[{}/{}]{} {}",
            update.completed,
            update.total,
            mark,
            truncate_to_width(&update.feed_title, 60)
        );
    }
    eprint!("\r\x1b[2K");
}

/// Waits for the progress reporter; returns false if it panicked or was cancelled.
async fn finish_progress(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Progress reporter task failed");
            false
        }
    }
}

fn print_node(node: &SubscriptionNode, depth: usize) {
    let indent = "  ".repeat(depth);
    match node.source_url() {
        Some(url) => println!(
            "{indent}- {}  {}",
            truncate_to_width(&node.title, 40),
            url
        ),
        None => {
            println!("{indent}+ {} ({})", node.title, node.feed_count());
            for child in node.children() {
                print_node(child, depth + 1);
            }
        }
    }
}

/// Truncates or pads `s` to exactly `width` terminal columns.
fn column(s: &str, width: usize) -> String {
    let cell = truncate_to_width(s, width);
    let pad = width.saturating_sub(display_width(&cell));
    format!("{cell}{}", " ".repeat(pad))
}

fn print_articles(result: &AggregationResult, limit: usize) {
    for (i, article) in result.articles.iter().take(limit).enumerate() {
        println!(
            "{:>4}  {}  {}  {}",
            i + 1,
            column(&article.published, DATE_WIDTH),
            column(&article.feed_title, FEED_WIDTH),
            truncate_to_width(&article.title, TITLE_WIDTH)
        );
    }
    if result.articles.len() > limit {
        println!("      ... {} more", result.articles.len() - limit);
    }

    println!();
    println!("{}", result.status_line());
    for failure in &result.failures {
        println!("  failed: {}: {}", failure.feed_title, failure.message);
    }
}

fn open_article(result: &AggregationResult, n: usize) -> Result<()> {
    let article = n
        .checked_sub(1)
        .and_then(|i| result.articles.get(i))
        .with_context(|| format!("No article #{n} ({} loaded)", result.articles.len()))?;

    if article.link.is_empty() {
        anyhow::bail!("Article #{n} has no link");
    }
    let url = validate_url_for_open(&article.link)
        .with_context(|| format!("Refusing to open '{}'", article.link))?;

    tracing::info!(url = %url, "Opening article in browser");
    open::that(url.as_str()).context("Failed to open browser")?;
    Ok(())
}
