//! CLI entry point for `mailquery`.

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};

use mailquery::backend::memory::MemoryMailbox;
use mailquery::config::Config;
use mailquery::model::{Cursor, FetchMode, Hit, ItemId, ItemType, PageDirection, SortOrder};
use mailquery::search::{Clause, SearchParams, SearchResults, Searcher};

#[derive(Parser)]
#[command(
    name = "mailquery",
    version,
    about = "Plan and run structured mailbox search queries"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (overrides $MAILQUERY_CONFIG)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query against a mailbox file
    Search {
        /// Mailbox JSON file (items and text documents)
        mailbox: PathBuf,
        /// Query clause: a JSON file, or inline JSON
        query: String,
        #[command(flatten)]
        options: QueryOptions,
        /// Maximum number of hits to print
        #[arg(short, long, default_value_t = 25)]
        limit: usize,
        /// Item id of the hit to page from
        #[arg(long, requires = "cursor_value")]
        cursor_id: Option<ItemId>,
        /// Sort value of the hit to page from
        #[arg(long, requires = "cursor_id")]
        cursor_value: Option<String>,
        /// Far bound of the page, as a sort value
        #[arg(long, requires = "cursor_id")]
        end_value: Option<String>,
        /// Report how many hits sort before the cursor
        #[arg(long, requires = "cursor_id")]
        offset: bool,
        /// Page backwards from the cursor
        #[arg(long, requires = "cursor_id")]
        backward: bool,
        /// What to fetch per hit
        #[arg(long, value_enum, default_value_t = FetchArg::Item)]
        fetch: FetchArg,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the optimized operation tree for a query
    Explain {
        /// Query clause: a JSON file, or inline JSON
        query: String,
        #[command(flatten)]
        options: QueryOptions,
    },
    /// Show the effective configuration
    Config {
        /// Write the current settings to the config file
        #[arg(long)]
        init: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(clap::Args)]
struct QueryOptions {
    /// Sort order (date-desc, date-asc, id-asc, size-desc, subject-asc, ..., none)
    #[arg(short, long)]
    sort: Option<SortOrder>,
    /// Comma-separated result types (message, conversation, contact, ...)
    #[arg(short, long, value_delimiter = ',')]
    types: Vec<ItemType>,
    /// Search the trash folder too
    #[arg(long)]
    include_trash: bool,
    /// Search the spam folder too
    #[arg(long)]
    include_spam: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum FetchArg {
    Item,
    Id,
    ModSeq,
    Parent,
}

impl From<FetchArg> for FetchMode {
    fn from(arg: FetchArg) -> Self {
        match arg {
            FetchArg::Item => FetchMode::Item,
            FetchArg::Id => FetchMode::Id,
            FetchArg::ModSeq => FetchMode::ModSeq,
            FetchArg::Parent => FetchMode::Parent,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(ref path) = cli.config {
        std::env::set_var("MAILQUERY_CONFIG", path);
    }
    let config = mailquery::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Search {
            mailbox,
            query,
            options,
            limit,
            cursor_id,
            cursor_value,
            end_value,
            offset,
            backward,
            fetch,
            json,
        } => {
            let mut params = options.params(&config).with_fetch(fetch.into());
            if let (Some(id), Some(value)) = (cursor_id, cursor_value) {
                let mut cursor = Cursor::new(id, value);
                cursor.end_sort_value = end_value;
                cursor.include_offset = offset;
                params = params.with_cursor(cursor);
            }
            if backward {
                params = params.with_direction(PageDirection::Backward);
            }
            cmd_search(&mailbox, &query, params, limit, json, &config)
        }
        Commands::Explain { query, options } => cmd_explain(&query, options.params(&config), &config),
        Commands::Config { init } => cmd_config(&config, init),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

impl QueryOptions {
    fn params(&self, config: &Config) -> SearchParams {
        let sort = self.sort.unwrap_or_else(|| {
            config.general.default_sort.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Invalid default_sort in config, using date-desc");
                SortOrder::DateDesc
            })
        });
        let mut params = SearchParams::default()
            .with_sort(sort)
            .with_types(self.types.iter().copied());
        if self.include_trash {
            params = params.including_trash();
        }
        if self.include_spam {
            params = params.including_spam();
        }
        params
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = mailquery::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailquery.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Read a clause from a JSON file, or parse the argument itself as JSON.
fn read_clause(query: &str) -> anyhow::Result<Clause> {
    let trimmed = query.trim_start();
    let text = if trimmed.starts_with('{') || trimmed.starts_with('"') {
        query.to_string()
    } else {
        std::fs::read_to_string(query)
            .map_err(|e| anyhow::anyhow!("cannot read query file '{query}': {e}"))?
    };
    serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("invalid query clause: {e}"))
}

fn cmd_search(
    mailbox_path: &Path,
    query: &str,
    params: SearchParams,
    limit: usize,
    json: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let clause = read_clause(query)?;
    let mailbox = MemoryMailbox::load(mailbox_path)?;
    let searcher = Searcher::new(&mailbox, &mailbox).with_config(config);

    let mut results = searcher.search(&clause, params)?;
    let hits = results.take_hits(limit)?;
    let more = results.peek()?.is_some();

    if json {
        print_search_results_json(&results, &hits, more)?;
    } else {
        print_search_results_table(&results, &hits, more);
    }
    results.close();
    Ok(())
}

fn cmd_explain(query: &str, params: SearchParams, config: &Config) -> anyhow::Result<()> {
    let clause = read_clause(query)?;
    let empty = MemoryMailbox::new("local", Vec::new(), Vec::new());
    let searcher = Searcher::new(&empty, &empty).with_config(config);
    println!("{}", searcher.explain(&clause, &params));
    Ok(())
}

fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        mailquery::config::save_config(config)?;
    }
    match mailquery::config::config_file_path() {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no config location available"),
    }
    println!(
        "# log file: {}",
        mailquery::config::log_file_path(config).display()
    );
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailquery", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Print search results as a human-readable table.
fn print_search_results_table(results: &SearchResults<'_>, hits: &[Hit], more: bool) {
    use humansize::{format_size, BINARY};

    println!();
    println!(
        "  {} result(s){}",
        hits.len(),
        if more { ", more available" } else { "" }
    );
    if let Some(offset) = results.cursor_offset() {
        println!("  {offset} result(s) before the cursor");
    }
    for info in results.result_info() {
        println!("  note: {info}");
    }
    println!();

    if hits.is_empty() {
        return;
    }

    println!(
        "  {:<4} {:<8} {:<17} {:<25} {:<40} {:>8}",
        "#", "Id", "Date", "From", "Subject", "Size"
    );
    println!("  {}", "-".repeat(107));

    for (i, hit) in hits.iter().enumerate() {
        let id = match hit.part {
            Some(ref part) => format!("{}.{part}", hit.item_id),
            None => hit.item_id.to_string(),
        };
        match hit.item() {
            Some(item) => {
                let date = item.date.format("%Y-%m-%d %H:%M").to_string();
                let from: String = item.sender.chars().take(24).collect();
                let subject: String = item.subject.chars().take(39).collect();
                let size = format_size(item.size, BINARY);
                println!(
                    "  {:<4} {:<8} {:<17} {:<25} {:<40} {:>8}",
                    i + 1,
                    id,
                    date,
                    from,
                    subject,
                    size
                );
            }
            None => println!("  {:<4} {:<8} sort={}", i + 1, id, hit.sort_key),
        }
    }
    println!();
}

/// Print search results as JSON.
fn print_search_results_json(
    results: &SearchResults<'_>,
    hits: &[Hit],
    more: bool,
) -> anyhow::Result<()> {
    let items: Vec<serde_json::Value> = hits
        .iter()
        .map(|hit| {
            serde_json::json!({
                "id": hit.item_id,
                "part": hit.part,
                "conversation_id": hit.conversation_id,
                "type": hit.item_type,
                "sort_value": hit.sort_key.to_string(),
                "item": hit.item(),
            })
        })
        .collect();

    let output = serde_json::json!({
        "sort": results.sort_order().as_str(),
        "result_count": hits.len(),
        "more": more,
        "cursor_offset": results.cursor_offset(),
        "info": results.result_info(),
        "results": items,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
