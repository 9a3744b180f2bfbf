use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossterm::style::Stylize;
use sltax::api::TaxApiClient;
use sltax::config::Config;
use sltax::credentials::{self, API_KEY_ENV, API_KEY_NAME};
use sltax::dates::DateInput;
use sltax::functions::TaxFunctions;
use sltax::normalizer::TabularResult;
use sltax::utils::logging;
use std::path::PathBuf;
use std::process::ExitCode;

mod table_display;

use table_display::{display_grid, export_to_csv, print_json};

#[derive(Parser, Debug)]
#[command(
    name = "sltax",
    version,
    about = "Surplus lines tax calculations from the command line"
)]
struct Cli {
    #[arg(long, global = true, help = "Print the result grid as JSON")]
    json: bool,
    #[arg(long, global = true, help = "Config file (defaults to the user config dir)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override the API base URL")]
    base_url: Option<String>,
    #[arg(long, global = true, value_name = "FILE", help = "Also write the grid to a CSV file")]
    csv: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct CalculationArgs {
    state: String,
    premium: f64,
    #[arg(long, help = "Effective date: YYYY-MM-DD or a spreadsheet date serial")]
    date: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Total tax for a premium
    Calculate(CalculationArgs),
    /// State, premium, total tax and total due
    Details {
        #[command(flatten)]
        args: CalculationArgs,
        #[arg(long)]
        multiline: bool,
    },
    /// Premium, total tax and total due
    WithPremium(CalculationArgs),
    /// Tax and fee components of a calculation
    Breakdown(CalculationArgs),
    /// Current tax rate (percent) for a state
    Rate { state: String },
    /// Tax rate for every state
    Rates,
    /// Full rate schedule for every state
    RatesDetails,
    /// Supported states
    States,
    /// Tax rate (percent) in force on a date
    HistoricalRate { state: String, date: String },
    /// Full rate schedule in force on a date
    HistoricalRateDetails {
        state: String,
        date: String,
        #[arg(long)]
        multiline: bool,
    },
    /// Manage the stored API key
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum KeyCommands {
    Set { key: String },
    Show,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Write a commented default config file
    Init {
        #[arg(long)]
        force: bool,
    },
    Path,
}

/// Show only the last four characters of a stored key
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", visible)
}

/// Whether the environment variable shadows stored keys
fn env_key_overrides(use_env: bool) -> bool {
    use_env
        && std::env::var(API_KEY_ENV)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(base_url) = &cli.base_url {
        config.api.base_url = base_url.clone();
    }
    Ok(config)
}

fn config_command(command: &ConfigCommands, cli: &Cli) -> Result<()> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::get_config_path()?,
    };
    match command {
        ConfigCommands::Path => println!("{}", path.display()),
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                println!(
                    "{}",
                    format!("Config already exists at {} (use --force)", path.display()).yellow()
                );
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, Config::create_default_with_comments())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{}", format!("Config written to {}", path.display()).green());
        }
    }
    Ok(())
}

async fn run_command(functions: &TaxFunctions, command: &Commands) -> TabularResult {
    fn date_of(args: &CalculationArgs) -> Option<DateInput> {
        args.date.as_deref().map(DateInput::parse_arg)
    }

    match command {
        Commands::Calculate(args) => {
            functions
                .calculate(&args.state, Some(args.premium), date_of(args).as_ref())
                .await
        }
        Commands::Details { args, multiline } => {
            functions
                .details(&args.state, Some(args.premium), *multiline, date_of(args).as_ref())
                .await
        }
        Commands::WithPremium(args) => {
            functions
                .with_premium(&args.state, Some(args.premium), date_of(args).as_ref())
                .await
        }
        Commands::Breakdown(args) => {
            functions
                .breakdown(&args.state, Some(args.premium), date_of(args).as_ref())
                .await
        }
        Commands::Rate { state } => functions.rate(state).await,
        Commands::Rates => functions.rates().await,
        Commands::RatesDetails => functions.rates_details().await,
        Commands::States => functions.states().await,
        Commands::HistoricalRate { state, date } => {
            functions
                .historical_rate(state, Some(&DateInput::parse_arg(date)))
                .await
        }
        Commands::HistoricalRateDetails {
            state,
            date,
            multiline,
        } => {
            functions
                .historical_rate_details(state, Some(&DateInput::parse_arg(date)), *multiline)
                .await
        }
        Commands::Key { command } => match command {
            KeyCommands::Set { key } => functions.set_api_key(key),
            // Handled before any client is built
            KeyCommands::Show => TabularResult::default(),
        },
        Commands::Config { .. } => TabularResult::default(),
    }
}

async fn run(cli: Cli) -> Result<bool> {
    if let Commands::Config { command } = &cli.command {
        config_command(command, &cli)?;
        return Ok(true);
    }

    let config = load_config(&cli)?;
    if let Some(path) = logging::init_tracing(&config.logging) {
        eprintln!("Logging to {}", path.display());
    }

    let store = credentials::from_config(&config.credentials)?;

    if let Commands::Key {
        command: KeyCommands::Show,
    } = &cli.command
    {
        match store.get(API_KEY_NAME) {
            Some(key) => println!("{}", mask_key(&key)),
            None => println!("{}", "No API key configured".yellow()),
        }
        return Ok(true);
    }

    let client = TaxApiClient::from_config(&config.api)?;
    let functions = TaxFunctions::new(client, store);

    let grid = run_command(&functions, &cli.command).await;

    if cli.json {
        print_json(&grid)?;
    } else {
        display_grid(&grid);
    }
    if let Some(filename) = &cli.csv {
        export_to_csv(&grid, filename)?;
    }

    if matches!(&cli.command, Commands::Key { command: KeyCommands::Set { .. } })
        && !grid.is_error()
        && env_key_overrides(config.credentials.use_env)
    {
        eprintln!(
            "{}",
            format!("{} is set and takes precedence over the saved key", API_KEY_ENV).yellow()
        );
    }

    Ok(!grid.is_error())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", format!("Error: {:#}", e).red());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("sk-live-123456"), "****3456");
        assert_eq!(mask_key("abc"), "***");
    }

    #[test]
    fn test_env_key_notice_only_when_env_layer_enabled() {
        assert!(!env_key_overrides(false));
    }

    #[test]
    fn test_cli_parses_calculation_flags() {
        let cli = Cli::parse_from([
            "sltax", "--json", "details", "Texas", "10000", "--multiline", "--date", "45000",
        ]);
        assert!(cli.json);
        match cli.command {
            Commands::Details { args, multiline } => {
                assert_eq!(args.state, "Texas");
                assert_eq!(args.premium, 10000.0);
                assert_eq!(args.date.as_deref(), Some("45000"));
                assert!(multiline);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
