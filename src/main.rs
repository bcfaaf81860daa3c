use clap::Parser;
use emabot::api::{Account, ProjectXClient};
use emabot::config::Config;
use emabot::engine::{EmaEngine, EmaSettings};
use emabot::trader::{SymbolTrader, Trader};
use emabot::Result;

const DEFAULT_TICK_SIZE: f64 = 0.25;

#[derive(Parser, Debug)]
#[command(name = "emabot", about = "EMA pullback trader for ProjectX futures gateways")]
struct Cli {
    /// Log signals without sending orders, regardless of DRY_RUN.
    #[arg(long)]
    dry_run: bool,

    /// Comma-separated symbol list overriding TRADE_SYMBOLS (e.g. MNQ,ES).
    #[arg(long)]
    symbols: Option<String>,

    /// Seed each symbol, log one snapshot, and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if cli.dry_run {
        config.dry_run = true;
    }
    if let Some(symbols) = &cli.symbols {
        config.symbols = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if config.symbols.is_empty() {
        return Err("no symbols configured".into());
    }

    tracing::info!(
        symbols = ?config.symbols,
        bar_minutes = config.bar_minutes,
        dry_run = config.dry_run,
        "emabot starting"
    );

    let mut api = ProjectXClient::new(&config.api_base, &config.api_user, &config.api_key);
    api.login_with_key().await?;
    if !api.validate_token().await? {
        return Err("gateway rejected the session token right after login".into());
    }
    tracing::info!("gateway login ok");

    let accounts = api.search_accounts(true).await?;
    let account = pick_account(&accounts, config.practice_account_id)?;
    tracing::info!(account_id = account.id, name = %account.name, "trading account selected");

    let mut symbols = Vec::new();
    for symbol in &config.symbols {
        let override_id = config.contract_overrides.get(symbol).map(String::as_str);
        let contract_id = api
            .resolve_contract_id(symbol, override_id, config.force_live)
            .await?;
        let tick_size = lookup_tick_size(&api, &contract_id).await;
        tracing::info!(symbol = %symbol, contract = %contract_id, tick = tick_size, "contract resolved");

        symbols.push(SymbolTrader {
            symbol: symbol.clone(),
            contract_id: contract_id.clone(),
            tick_size,
            engine: EmaEngine::new(symbol, &contract_id, EmaSettings::from(&config)),
        });
    }

    let mut trader = Trader::new(config, api, account.id, symbols);

    if cli.once {
        trader.once().await?;
        return Ok(());
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = trader.run() => {}
    }

    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emabot=info".into()),
        )
        .init();
}

/// Choose the trading account: an explicit id wins, then the first practice
/// account, then any tradable account.
fn pick_account(accounts: &[Account], preferred: Option<i64>) -> Result<Account> {
    if let Some(id) = preferred {
        return accounts
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| format!("account {} not found among active accounts", id).into());
    }
    accounts
        .iter()
        .find(|a| a.can_trade && a.name.to_uppercase().contains("PRACTICE"))
        .or_else(|| accounts.iter().find(|a| a.can_trade))
        .cloned()
        .ok_or_else(|| "no tradable account available".into())
}

async fn lookup_tick_size(api: &ProjectXClient, contract_id: &str) -> f64 {
    match api.search_contracts_by_id(contract_id).await {
        Ok(contracts) => match contracts.first().and_then(|c| c.tick_size) {
            Some(tick) if tick > 0.0 => tick,
            _ => {
                tracing::warn!(contract = contract_id, "no tick size reported, assuming 0.25");
                DEFAULT_TICK_SIZE
            }
        },
        Err(e) => {
            tracing::warn!(contract = contract_id, error = %e, "tick size lookup failed, assuming 0.25");
            DEFAULT_TICK_SIZE
        }
    }
}
