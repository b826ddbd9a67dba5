use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use shelf_cache::http::HttpExecutor;
use shelf_cache::key::QueryArgs;
use shelf_cache::prelude::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(about, version, author, name = "shelf")]
struct Cli {
    /// Root of the catalogue API.
    #[clap(long, env = "SHELF_API_URL", default_value = "http://localhost:3000/api")]
    api_url: String,

    /// Request timeout, in milliseconds.
    #[clap(long, env = "SHELF_TIMEOUT_MS", default_value_t = 10_000)]
    timeout_ms: u64,

    /// JSON file with client settings. Command-line values win over it.
    #[clap(long, env = "SHELF_CONFIG")]
    config: Option<std::path::PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List books.
    List {
        #[clap(long, default_value_t = 1)]
        page:   u32,
        #[clap(long)]
        limit:  Option<u32>,
        #[clap(long, default_value = "")]
        search: String,
        #[clap(long, default_value = "all")]
        filter: String,
        /// Keep loading pages until the listing is exhausted.
        #[clap(long)]
        all:    bool,
    },
    /// Show a single book.
    Show { id: String },
    /// Borrow copies of a book.
    Borrow {
        id:       String,
        quantity: u32,
        /// Days until the book is due.
        #[clap(default_value_t = 14)]
        days:     i64,
    },
    /// Borrowed quantities per book.
    Summary {
        #[clap(long, default_value = "quantity")]
        sort_by: String,
        #[clap(long, default_value = "desc")]
        sort:    String,
        #[clap(long, default_value = "all")]
        filter:  String,
        #[clap(long, default_value = "")]
        search:  String,
    },
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            ClientConfig::from_json(&json)?
        }
        None => ClientConfig::default(),
    };
    config.base_url = cli.api_url.clone();
    config.timeout_ms = cli.timeout_ms;
    Ok(config)
}

async fn fetch_payload<E: QueryExecutor>(store: &QueryStore<E>, query: Query) -> Result<Arc<Payload>> {
    let entry = store.fetch(&query).await?;
    entry
        .shared_payload()
        .with_context(|| format!("no data for {}", query.key()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = config.build_store(HttpExecutor::from_config(&config)?)?;

    match cli.command {
        Command::List {
            page,
            limit,
            search,
            filter,
            all,
        } => {
            let args = BookListArgs {
                page,
                limit: limit.unwrap_or(config.page_limit),
                search,
                filter,
            };
            // Normalizes the arguments the same way the cache keys them.
            let args = BookListArgs::from_args(args.key().args());
            fetch_payload(&store, Query::Books(args.clone())).await?;
            if all {
                while store.load_more(&args).await?.is_some() {}
            }
            match store.payload(&args.key()).await.as_deref() {
                Some(Payload::Books(page)) => print(page)?,
                _ => bail!("unexpected payload for {}", args.key()),
            }
        }
        Command::Show { id } => match fetch_payload(&store, Query::Book(id)).await?.as_ref() {
            Payload::Book(book) => print(book)?,
            other => bail!("unexpected payload: {other:?}"),
        },
        Command::Borrow { id, quantity, days } => {
            let due_date = chrono::Utc::now() + chrono::Duration::days(days);
            match store.mutate(Mutation::borrow(id, quantity, due_date)).await {
                Ok(MutationOutput::Borrowed { message }) => println!("{message}"),
                Ok(other) => bail!("unexpected outcome: {other:?}"),
                Err(err) => bail!("{}", err.user_message()),
            }
        }
        Command::Summary {
            sort_by,
            sort,
            filter,
            search,
        } => {
            let args = BorrowSummaryArgs::from_args(&QueryArgs::from_pairs([
                ("sortBy", sort_by),
                ("sort", sort),
                ("filter", filter),
                ("search", search),
            ]));
            match fetch_payload(&store, Query::BorrowSummary(args)).await?.as_ref() {
                Payload::BorrowSummary(rows) => print(rows)?,
                other => bail!("unexpected payload: {other:?}"),
            }
        }
    }

    store.close().await;
    Ok(())
}
