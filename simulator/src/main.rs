use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use mixsim_driver::{CliDriver, Driver};
use mixsim_simulator::infra::{self, RunOptions};
use mixsim_simulator::run;
use mixsim_types::{FundEntry, Scenario, Version, WalletSpec};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "mixsim", about = "Coinjoin simulation orchestrator", long_about = None)]
struct Cli {
    /// Container runtime hosting the simulation actors.
    #[arg(long, value_enum, default_value_t = DriverKind::Docker)]
    driver: DriverKind,

    /// Prefix applied to every container name.
    #[arg(long, default_value = "mixsim")]
    namespace: String,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DriverKind {
    Docker,
    Podman,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build or pull every image a scenario needs.
    Build {
        /// Scenario file (JSON); the built-in demo scenario when absent.
        #[arg(long)]
        scenario: Option<PathBuf>,
        #[arg(long)]
        force_rebuild: bool,
        /// Registry prefix; when set, images are pulled instead of built.
        #[arg(long, default_value = "")]
        image_prefix: String,
    },
    /// Run a simulation scenario.
    Run {
        /// Scenario file (JSON); the built-in demo scenario when absent.
        #[arg(long)]
        scenario: Option<PathBuf>,
        #[arg(long)]
        force_rebuild: bool,
        /// Registry prefix; when set, images are pulled instead of built.
        #[arg(long, default_value = "")]
        image_prefix: String,
        /// Skip evidence collection at teardown.
        #[arg(long)]
        no_logs: bool,
    },
    /// Remove every container left over from previous runs.
    Clean,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let driver: Arc<dyn Driver> = match cli.driver {
        DriverKind::Docker => Arc::new(CliDriver::docker(&cli.namespace)),
        DriverKind::Podman => Arc::new(CliDriver::podman(&cli.namespace)),
    };

    match cli.command {
        Command::Build {
            scenario,
            force_rebuild,
            image_prefix,
        } => {
            let scenario = load_scenario(scenario)?;
            let opts = RunOptions {
                image_prefix,
                force_rebuild,
                ..RunOptions::default()
            };
            infra::prepare_images(driver.as_ref(), &opts, &scenario.versions()).await?;
        }
        Command::Run {
            scenario,
            force_rebuild,
            image_prefix,
            no_logs,
        } => {
            let scenario = load_scenario(scenario)?;
            let opts = RunOptions {
                image_prefix,
                force_rebuild,
                no_logs,
                ..RunOptions::default()
            };
            run::execute(driver, scenario, opts).await?;
        }
        Command::Clean => {
            driver.cleanup().await?;
            info!("removed containers");
        }
    }

    Ok(())
}

fn load_scenario(path: Option<PathBuf>) -> anyhow::Result<Scenario> {
    match path {
        Some(path) => Scenario::load(&path)
            .with_context(|| format!("could not load scenario {}", path.display())),
        None => Ok(demo_scenario()),
    }
}

/// Small built-in scenario used when no file is given: a handful of
/// wallets with mixed funding plans and participation windows, stopping
/// after ten rounds.
fn demo_scenario() -> Scenario {
    let wallet = |funds: Vec<FundEntry>| WalletSpec {
        funds,
        ..WalletSpec::default()
    };
    Scenario {
        name: "default".to_string(),
        rounds: 10,
        blocks: 0,
        default_version: Version::new(2, 0, 4),
        distributor_version: None,
        default_anon_target: None,
        default_coin_isolation: None,
        coordinator: Default::default(),
        wallets: vec![
            WalletSpec {
                funds: vec![FundEntry::Plain(200_000), FundEntry::Plain(50_000)],
                anon_target: Some(7),
                ..WalletSpec::default()
            },
            WalletSpec {
                funds: vec![FundEntry::Plain(3_000_000)],
                coin_isolation: Some(true),
                ..WalletSpec::default()
            },
            WalletSpec {
                funds: vec![FundEntry::Plain(1_000_000), FundEntry::Plain(500_000)],
                delay_rounds: 3,
                ..WalletSpec::default()
            },
            wallet(vec![FundEntry::Plain(3_000_000), FundEntry::Plain(15_000)]),
            WalletSpec {
                funds: vec![
                    FundEntry::Plain(1_000_000),
                    FundEntry::Scheduled {
                        value: 500_000,
                        delay_blocks: 0,
                        delay_rounds: 2,
                    },
                ],
                ..WalletSpec::default()
            },
            wallet(vec![FundEntry::Plain(3_000_000), FundEntry::Plain(600_000)]),
        ],
    }
}
