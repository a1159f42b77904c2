//! OKX Racer Bot CLI
//!
//! Registers messaging sessions, mints credentials from them and runs the
//! account cycle.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use racer_bot::{
    AccountWorkflow, Clock, CommandListener, Config, CredentialStore, HelperRefresher, Orchestrator,
    RacerClient, SessionDirectory, SessionHelper, SessionRegistrar, StatsReporter, StatusChannel,
    SystemClock, TelegramBot, UpgradeOptions,
};
use racer_bot::services::Metrics;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "racer-bot")]
#[command(about = "Multi-account bot for the OKX Racer mini-game")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in a new messaging session
    Register {
        /// Phone number in international format, e.g. +15551234567
        #[arg(short, long)]
        phone: String,

        /// Session name (defaults to the current unix timestamp)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Fetch a credential from every registered session
    Refresh,

    /// Cycle all stored credentials until stopped
    Run {
        /// Upgrade the fuel tank when affordable
        #[arg(long)]
        fuel_tank: bool,

        /// Upgrade the turbo charger when affordable
        #[arg(long)]
        turbo: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        Commands::Register { phone, name } => register_session(&config, &phone, name).await?,
        Commands::Refresh => refresh_credentials(&config).await?,
        Commands::Run { fuel_tank, turbo } => {
            let options = if fuel_tank || turbo {
                UpgradeOptions { fuel_tank, turbo }
            } else {
                UpgradeOptions {
                    fuel_tank: ask_yes_no("Upgrade the fuel tank? (y/n): ")?,
                    turbo: ask_yes_no("Upgrade the turbo charger? (y/n): ")?,
                }
            };
            run_bot(&config, options).await?
        }
    }

    Ok(())
}

fn print_banner(title: &str) {
    println!("\n{}", "=".repeat(70));
    println!("  {}", title.bold().cyan());
    println!("{}\n", "=".repeat(70));
}

async fn register_session(config: &Config, phone: &str, name: Option<String>) -> Result<()> {
    if config.api_id.is_none() || config.api_hash.is_none() {
        anyhow::bail!("API_ID and API_HASH are required to register a session");
    }

    let name = name.unwrap_or_else(|| chrono::Utc::now().timestamp().to_string());
    print_banner("REGISTER SESSION");

    let registrar = SessionRegistrar::new(
        SessionHelper::from_config(config),
        SessionDirectory::new(&config.session_dir),
    );
    let handle = registrar
        .register(phone, &name)
        .await
        .context("Session registration failed")?;

    println!(
        "{} {}",
        "New session saved:".green(),
        handle.path.display()
    );
    Ok(())
}

async fn refresh_credentials(config: &Config) -> Result<()> {
    print_banner("REFRESH CREDENTIALS");

    let orchestrator = build_orchestrator(config, UpgradeOptions::default(), None, Metrics::new())?;
    let added = orchestrator.populate().await?;

    let store = CredentialStore::new(&config.data_path);
    let total = store.load().await?.len();
    println!(
        "{} {} new, {} stored in {}",
        "Done:".green(),
        added,
        total,
        config.data_path.display()
    );
    Ok(())
}

async fn run_bot(config: &Config, options: UpgradeOptions) -> Result<()> {
    print_banner("OKX RACER BOT");
    println!(
        "  Fuel tank upgrades: {} | Turbo upgrades: {}",
        if options.fuel_tank { "ON".green() } else { "OFF".red() },
        if options.turbo { "ON".green() } else { "OFF".red() }
    );

    let metrics = Metrics::new();
    let bot = match &config.telegram_bot_token {
        Some(token) => Some(Arc::new(TelegramBot::new(token)?)),
        None => None,
    };
    let channel = bot.clone().map(|b| b as Arc<dyn StatusChannel>);

    let orchestrator = build_orchestrator(config, options, channel, metrics)?;
    let reporter = orchestrator.reporter().clone();

    match bot {
        Some(bot) => {
            let listener = CommandListener::new(bot.clone(), reporter, &config.authorized_users);
            tokio::spawn(listener.run(bot));
            println!("  Send {} to the Telegram bot to begin\n", "/start".bold());
        }
        None => {
            println!("  {}\n", "No TELEGRAM_BOT_TOKEN set, starting immediately".yellow());
            reporter.activate().await;
        }
    }

    tokio::select! {
        result = orchestrator.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}

fn build_orchestrator(
    config: &Config,
    options: UpgradeOptions,
    channel: Option<Arc<dyn StatusChannel>>,
    metrics: Metrics,
) -> Result<Orchestrator> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let reporter = StatsReporter::new(
        channel,
        clock.clone(),
        metrics.clone(),
        config.timings.update_interval,
    );

    let api = Arc::new(RacerClient::new(config, clock.clone(), metrics)?);
    let workflow = AccountWorkflow::new(
        api,
        reporter.clone(),
        clock.clone(),
        config.timings.clone(),
        options,
    );

    let handles = SessionDirectory::new(&config.session_dir)
        .handles()
        .with_context(|| format!("Failed to list sessions in {}", config.session_dir.display()))?;
    info!("Found {} session(s)", handles.len());

    let refresher = Arc::new(HelperRefresher::new(SessionHelper::from_config(config)));

    Ok(Orchestrator::new(
        CredentialStore::new(&config.data_path),
        handles,
        refresher,
        workflow,
        reporter,
        clock,
        config.timings.clone(),
    ))
}

fn ask_yes_no(question: &str) -> Result<bool> {
    print!("{}", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
