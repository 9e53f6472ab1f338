use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tradeloop::api::{self, AppState};
use tradeloop::backtest::{BacktestConfig, BacktestEngine};
use tradeloop::execution::{ExecutionConfig, ExecutionManager, PaperBroker};
use tradeloop::ledger::{CsvJournal, TradeLedger};
use tradeloop::streams::{CandleSource, CandleStore, FeedSettings, MarketFeeds};
use tradeloop::trading_core::StrategyBook;
use tradeloop::types::{parse_timestamp, Interval};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API with a paper-trading execution manager
    Serve {
        /// Port to run the web server on
        #[arg(short, long, env = "PORT", default_value = "8000")]
        port: u16,

        /// Bind on all interfaces instead of localhost
        #[arg(long)]
        public: bool,

        /// Candle history CSV (symbol,interval,timestamp,open,high,low,close,volume)
        #[arg(short, long, env = "DATA_CSV")]
        data: Option<PathBuf>,

        /// Append trade and snapshot rows to this CSV journal
        #[arg(short, long, env = "TRADE_JOURNAL")]
        journal: Option<PathBuf>,
    },

    /// Backtest a strategy over a candle CSV and print the report as JSON
    Backtest {
        #[arg(short, long, env = "DATA_CSV")]
        data: PathBuf,

        #[arg(short, long)]
        symbol: String,

        #[arg(short, long, default_value = "5m")]
        interval: String,

        /// Strategy params as JSON, e.g. '{"type":"momentum","entry_bars":3,"exit_bars":2}'
        #[arg(long)]
        strategy: String,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,

        /// Starting cash for the equity curve
        #[arg(long, default_value = "100000")]
        capital: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tradeloop=info".parse()?))
        .init();

    match Cli::parse().command {
        Command::Serve {
            port,
            public,
            data,
            journal,
        } => serve(port, public, data, journal).await,
        Command::Backtest {
            data,
            symbol,
            interval,
            strategy,
            from,
            to,
            capital,
        } => {
            let store = CandleStore::load_csv(&data)
                .with_context(|| format!("failed to load candles from {}", data.display()))?;
            let params: serde_json::Value =
                serde_json::from_str(&strategy).context("--strategy is not valid JSON")?;
            let interval: Interval = interval.parse()?;
            let from = from.as_deref().map(|raw| parse_timestamp(raw, false)).transpose()?;
            let to = to.as_deref().map(|raw| parse_timestamp(raw, true)).transpose()?;

            let engine = BacktestEngine::new(
                Arc::new(store),
                BacktestConfig {
                    initial_capital: capital,
                },
            );
            let report = engine.run_json(&symbol, interval, from, to, &params)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn serve(
    port: u16,
    public: bool,
    data: Option<PathBuf>,
    journal: Option<PathBuf>,
) -> Result<()> {
    let config = ExecutionConfig::from_env().context("invalid execution config")?;
    if !config.is_paper() {
        bail!("PAPER_MODE=false needs a brokerage connector; only paper execution is built in");
    }

    let store = match &data {
        Some(path) => CandleStore::load_csv(path)
            .with_context(|| format!("failed to load candles from {}", path.display()))?,
        None => CandleStore::new(),
    };
    let history: Arc<dyn CandleSource> = Arc::new(store);
    info!("History loaded: {} symbols", history.symbols().len());

    let mut ledger = TradeLedger::new();
    if let Some(path) = &journal {
        let sink = CsvJournal::open(path)
            .with_context(|| format!("failed to open journal {}", path.display()))?;
        info!("Journaling trades to {}", path.display());
        ledger = ledger.with_sink(Arc::new(sink));
    }

    let feeds = MarketFeeds::new(
        history.clone(),
        FeedSettings {
            read_timeout: config.feed_timeout,
            poll_interval: config.poll_interval,
            ..FeedSettings::default()
        },
    );

    let strategies = Arc::new(StrategyBook::new());
    let manager = Arc::new(ExecutionManager::new(
        config,
        strategies.clone(),
        Arc::new(PaperBroker::new()),
        Arc::new(feeds),
        Arc::new(ledger),
    ));

    let state = Arc::new(AppState {
        strategies,
        history: history.clone(),
        backtests: Arc::new(BacktestEngine::new(history, BacktestConfig::default())),
        manager: manager.clone(),
    });
    let app = api::router(state);

    let host = if public { [0, 0, 0, 0] } else { [127, 0, 0, 1] };
    let addr = SocketAddr::from((host, port));
    info!("Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // flatten any open session before exiting
    let outcome = manager.stop_live().await?;
    info!("Shutdown: live session {}", outcome.status);
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler; run until killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
