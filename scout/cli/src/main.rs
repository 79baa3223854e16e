//! Scout CLI - discovers which model identifiers a provider serves

use std::path::PathBuf;

use chrono::TimeDelta;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{WrapErr, eyre};
use scout_lib::{
    HttpModelProbe, HttpPageFetcher, Recommendation, Scout, ScoutConfig, StalenessPolicy,
};
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

type Engine = Scout<HttpPageFetcher, HttpModelProbe>;

/// Discover and validate model identifiers.
///
/// Examples:
///   scout discover                          # probe, harvest and update the registry
///   scout advise claude-sonnet-4-20250514   # newest verified upgrade
///   scout report --json                     # registry contents as JSON
#[derive(Parser)]
#[command(name = "scout")]
#[command(version)]
#[command(about = "Discover and validate model identifiers", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    log_verbosity: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Registry file [default: <cache dir>/scout/registry.json]
    #[arg(long, global = true, value_name = "PATH")]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one discovery pass and update the registry
    ///
    /// Requires ANTHROPIC_API_KEY. Ctrl-C stops probing early and keeps
    /// whatever was gathered.
    Discover {
        /// Wall-clock budget for the whole run, in seconds
        #[arg(long, value_name = "SECS")]
        deadline: Option<u64>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recommend an upgrade from the registry
    Advise {
        /// Identifier currently in use [default: $ANTHROPIC_MODEL]
        #[arg(value_name = "CURRENT")]
        current: Option<String>,

        /// Print the recommendation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show registry contents and upgrade advice
    Report {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop unverified entries not seen recently
    Prune {
        /// Entries older than this many days are dropped
        #[arg(long, value_name = "DAYS")]
        max_age_days: u32,
    },

    /// Replace the registry with the built-in seed list
    Reset,
}

/// Initialize tracing subscriber based on verbosity and output format
fn init_tracing(verbose: u8, json: bool) {
    let base_filter = match std::env::var("RUST_LOG") {
        Ok(filter) => filter,
        Err(_) => match verbose {
            0 => "warn".to_string(),
            1 => "warn,scout_lib=info,scout=info".to_string(),
            2 => "info,scout_lib=debug,scout=debug".to_string(),
            _ => "debug,scout_lib=trace,scout=trace".to_string(),
        },
    };

    let filter = EnvFilter::try_new(&base_filter).unwrap_or_else(|_| EnvFilter::new("warn"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_file(verbose >= 3)
                    .with_line_number(verbose >= 3)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    }
}

fn engine(config: ScoutConfig, api_key: String) -> color_eyre::Result<Engine> {
    let probe = HttpModelProbe::with_base_url(api_key, config.api_base_url.clone());
    Scout::new(config, HttpPageFetcher::new(), probe).wrap_err("failed to start discovery engine")
}

fn print_recommendation(advice: &Recommendation) {
    match &advice.recommended {
        Some(id) => println!("upgrade available: {id}"),
        None => println!("no upgrade available"),
    }
    println!("  {}", advice.reason);
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_verbosity, cli.log_json);

    let mut config = ScoutConfig::from_env()?;
    if let Some(path) = cli.registry {
        config.registry_path = path;
    }
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());

    match cli.command {
        Commands::Discover { deadline, json } => {
            let api_key = api_key
                .ok_or_else(|| eyre!("ANTHROPIC_API_KEY must be set to probe identifiers"))?;
            if let Some(secs) = deadline {
                if secs == 0 {
                    return Err(eyre!("--deadline must be greater than zero"));
                }
                config.deadline_secs = secs;
            }

            let scout = engine(config, api_key)?;
            let cancel = scout.cancel_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, finishing with partial results");
                    cancel.cancel();
                }
            });

            let run = scout.discover().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                print!("{run}");
            }
            scout.shutdown().await?;
        }

        Commands::Advise { current, json } => {
            let current = current
                .or_else(|| config.current_identifier.clone())
                .ok_or_else(|| eyre!("pass CURRENT or set ANTHROPIC_MODEL"))?;
            let scout = engine(config, api_key.unwrap_or_default())?;
            let advice = scout.advise_upgrade(&current).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&advice)?);
            } else {
                print_recommendation(&advice);
            }
        }

        Commands::Report { json } => {
            let scout = engine(config, api_key.unwrap_or_default())?;
            let status = scout.report().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{status}");
            }
        }

        Commands::Prune { max_age_days } => {
            let scout = engine(config, api_key.unwrap_or_default())?;
            let policy = StalenessPolicy::older_than(TimeDelta::days(i64::from(max_age_days)));
            let dropped = scout.prune(&policy).await?;
            if dropped.is_empty() {
                println!("nothing to prune");
            } else {
                println!("pruned {} entries:", dropped.len());
                for id in dropped {
                    println!("  {id}");
                }
            }
        }

        Commands::Reset => {
            let path = config.registry_path.clone();
            let scout = engine(config, api_key.unwrap_or_default())?;
            scout.reset().await?;
            println!("registry reset to seed list at {}", path.display());
        }
    }

    Ok(())
}
