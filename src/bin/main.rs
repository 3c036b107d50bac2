use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stock_monitor::alert::compose_message;
use stock_monitor::config::{read_or_default, ConfigStore};
use stock_monitor::monitor::Monitor;
use stock_monitor::notifier::{self, ServerChan};
use stock_monitor::portfolio::evaluate;
use stock_monitor::quote::{sina, sina::Sina, QuoteSource};
use stock_monitor::server;
use stock_monitor::state::LastStatus;

// long enough for a cycle already fetching and notifying to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(
    sina::REQUEST_TIMEOUT.as_secs() + notifier::REQUEST_TIMEOUT.as_secs() + 1,
);
const DEFAULT_ADDRESS: &str = "0.0.0.0:8256";

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "MONITOR_CONFIG", default_value = "config.json")]
    config_path: PathBuf,
    #[arg(long, env = "MONITOR_QUOTE_ENDPOINT")]
    quote_endpoint: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the monitor loop and the config API
    Start {
        #[arg(long, env = "MONITOR_ADDRESS", default_value = DEFAULT_ADDRESS)]
        server_address: String,
    },
    /// Print current prices
    Quote {
        #[arg(long, value_delimiter = ',', required = true)]
        code: Vec<String>,
    },
    /// Evaluate the configured portfolio once, ignoring trading hours
    Check,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!(
                "{}=debug,tower_http=debug,reqwest=info",
                env!("CARGO_CRATE_NAME")
            )
            .into()
        }))
        .with(fmt::layer())
        .init();

    let args = Args::parse();

    let quotes = match args.quote_endpoint {
        Some(endpoint) => Sina::with_endpoint(endpoint),
        None => Sina::new(),
    };
    let quotes = match quotes {
        Ok(quotes) => quotes,
        Err(err) => {
            error!("Could not create quote client : {:#}", err);
            return;
        }
    };

    let res = match args.command {
        Some(Commands::Start { server_address }) => {
            run_start(args.config_path, quotes, server_address).await
        }
        Some(Commands::Quote { code }) => run_quote(quotes, code).await,
        Some(Commands::Check) => run_check(args.config_path, quotes).await,
        None => run_start(args.config_path, quotes, String::from(DEFAULT_ADDRESS)).await,
    };

    if let Err(err) = res {
        error!("{:#}", err);
    }
}

async fn run_start(config_path: PathBuf, quotes: Sina, server_address: String) -> Result<()> {
    let config = ConfigStore::load(config_path).await;
    let status = LastStatus::default();
    let notifier = ServerChan::new()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = Monitor::new(quotes, notifier, config.clone(), status.clone());
    let mut monitor_task = tokio::task::spawn(monitor.run(shutdown_rx.clone()));

    let mut server_task = tokio::task::spawn({
        let config = config.clone();
        let status = status.clone();
        async move { server::start(server_address, config, status, shutdown_rx).await }
    });

    info!("{}", "STARTING MONITOR".green());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("{}", "SHUTTING DOWN".yellow());
        }
        res = &mut server_task => {
            match res {
                Ok(Ok(())) => warn!("Server stopped"),
                Ok(Err(err)) => error!("Server failed : {:#}", err),
                Err(err) => error!("Server task failed : {}", err),
            }
        }
        _ = &mut monitor_task => {
            error!("Monitor loop ended unexpectedly");
        }
    }

    let _ = shutdown_tx.send(true);

    if !monitor_task.is_finished()
        && tokio::time::timeout(SHUTDOWN_GRACE, &mut monitor_task)
            .await
            .is_err()
    {
        warn!("Monitor loop did not stop within {:?}", SHUTDOWN_GRACE);
        monitor_task.abort();
    }
    if !server_task.is_finished()
        && tokio::time::timeout(SHUTDOWN_GRACE, &mut server_task)
            .await
            .is_err()
    {
        warn!("Server did not stop within {:?}", SHUTDOWN_GRACE);
        server_task.abort();
    }

    Ok(())
}

async fn run_quote(quotes: Sina, codes: Vec<String>) -> Result<()> {
    let prices = quotes.fetch_prices(&codes).await;
    for code in codes.iter() {
        match prices.get(code) {
            Some(price) => info!("{} : {}", code, price.to_string().yellow()),
            None => warn!("{} : no price", code),
        }
    }
    Ok(())
}

async fn run_check(config_path: PathBuf, quotes: Sina) -> Result<()> {
    let config = read_or_default(&config_path).await?;

    let codes = config
        .portfolio
        .iter()
        .map(|holding| holding.code.clone())
        .collect::<Vec<String>>();
    let prices = quotes.fetch_prices(&codes).await;

    let snapshot = evaluate(&config.portfolio, &prices)?;
    info!("Total value : {}", snapshot.total_value.round_dp(4));

    if snapshot.alerts.is_empty() {
        info!("{}", snapshot);
        info!("{}", "Within bands".green());
    } else {
        info!("{}", compose_message(&snapshot));
        warn!("{} holding(s) outside band", snapshot.alerts.len().to_string().red());
    }

    Ok(())
}
