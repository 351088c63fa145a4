use std::io::{stderr, stdout};
use std::process::exit;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

use simple_bank::config::StoreConfig;
use simple_bank::models::{Account, CreateAccountParams, TransferTxParams, TxContext};
use simple_bank::store::{Backend, MemoryBackend, PgBackend, Queries, Store};
use simple_bank::util::{random_currency, random_owner};

const DEFAULT_TRANSFERS: usize = 10;
const TRANSFER_AMOUNT: i64 = 10;
const OPENING_BALANCE: i64 = 1_000;

#[derive(Debug, Serialize)]
struct BalanceRow {
    account: i64,
    owner: String,
    currency: String,
    balance_before: i64,
    balance_after: i64
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let transfers = match args.get(1).map(|value| value.parse::<usize>()) {
        None => DEFAULT_TRANSFERS,
        Some(Ok(transfers)) => transfers,
        Some(Err(_)) => {
            eprintln!("Usage: simple-bank [transfers:optional] [log_level:optional] > [output].csv");
            eprintln!("Available log levels: error, warn, info, debug, trace (default: error)");
            exit(1);
        }
    };

    let log_level = args.get(2)
        .map(|s| parse_log_level(s)).unwrap_or_else(|| LevelFilter::ERROR);

    setup_logging(log_level);

    let config = StoreConfig::from_env()?;

    let rows = if config.database_url.is_some() {
        run(Store::<PgBackend>::connect(config).await?, transfers).await?
    } else {
        run(Store::<MemoryBackend>::in_memory(config), transfers).await?
    };

    write_results_to_stdout(&rows)?;

    Ok(())
}

/// Opens two accounts and moves money back and forth between them concurrently.
async fn run<B: Backend>(store: Store<B>, transfers: usize) -> Result<Vec<BalanceRow>> {
    let store = Arc::new(store);

    info!("Overdraft policy: {:?}", store.config().overdraft);

    let account_1 = open_account(&*store).await?;
    let account_2 = open_account(&*store).await?;

    let timer = Instant::now();
    let mut handles = Vec::with_capacity(transfers);

    for i in 0..transfers {
        let store = store.clone();
        let params = if i % 2 == 1 {
            TransferTxParams::new(account_2.id, account_1.id, TRANSFER_AMOUNT)
        } else {
            TransferTxParams::new(account_1.id, account_2.id, TRANSFER_AMOUNT)
        };

        handles.push(tokio::spawn(async move {
            store.transfer_tx(&TxContext::new(format!("tx {}", i + 1)), params).await
        }));
    }

    for handle in handles {
        handle.await?.context("transfer failed")?;
    }

    info!("Processed {transfers} transfers in: {:?}", timer.elapsed());

    let mut queries = store.queries().await?;
    let mut rows = Vec::with_capacity(2);

    for before in [account_1, account_2] {
        let after = queries.get_account(before.id).await?;

        rows.push(BalanceRow {
            account: before.id,
            owner: before.owner,
            currency: before.currency.to_string(),
            balance_before: before.balance,
            balance_after: after.balance
        });
    }

    Ok(rows)
}

async fn open_account<B: Backend>(store: &Store<B>) -> Result<Account> {
    let account = store.queries().await?
        .create_account(CreateAccountParams {
            owner: random_owner(),
            balance: OPENING_BALANCE,
            currency: random_currency()
        })
        .await?;

    Ok(account)
}

fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to 'error'", level);
            LevelFilter::ERROR
        }
    }
}

fn setup_logging(level: LevelFilter) {
    //NOTE: stdout carries the CSV report, logs go to stderr
    let terminal_log = fmt::layer()
        .with_target(false)
        .with_writer(stderr)
        .with_filter(level);

    tracing_subscriber::registry()
        .with(terminal_log)
        .init();
}

fn write_results_to_stdout(rows: &[BalanceRow]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(stdout().lock());

    for row in rows {
        writer.serialize(row)?;
    }

    writer.flush()?;

    Ok(())
}
