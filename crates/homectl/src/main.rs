use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use anyhow::Context;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use homectl::config::Credentials;
use homectl::engine::Filter;
use homectl::engine::Intent;
use homectl::engine::RefreshOutcome;
use homectl::engine::StateFilter;
use homectl::engine::ToggleOutcome;
use homectl::engine::TypeFilter;
use homectl::remote::http::pick_house;
use homectl::remote::http::HttpHouseApi;
use homectl::Config;
use homectl::Engine;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "homectl", version, about = "Control the devices of a remote smart house")]
struct Cli {
    /// Configuration file; repeat to merge several files
    #[arg(short, long = "config", global = true, default_value = "homectl.toml")]
    config: Vec<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct FilterArgs {
    /// Device type to show, or "all"
    #[arg(long = "type", default_value = "all")]
    kind: TypeFilter,

    /// all, on, off, open or closed
    #[arg(long, default_value = "all")]
    state: StateFilter,
}

impl FilterArgs {
    fn filter(&self) -> Filter {
        Filter {
            kind: self.kind.clone(),
            state: self.state,
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Serve the HTTP API
    Serve,
    /// List the devices of the house
    Devices {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Send one intent to several devices, one after the other
    Batch {
        /// on or off
        intent: Intent,

        #[command(flatten)]
        filter: FilterArgs,

        /// Target every displayed device
        #[arg(long, conflicts_with = "ids")]
        all: bool,

        /// Devices to target
        #[arg(required_unless_present = "all")]
        ids: Vec<String>,
    },
    /// Switch a single device
    Toggle {
        id: String,
        /// on or off
        intent: Intent,
    },
    /// List the houses of the account
    Houses,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, diagnostics) = Config::from_files(&cli.config)?;
    if !diagnostics.is_empty() {
        eprint!("{}", homectl::format_diagnostics(&diagnostics));
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    tracing::info!("homectl starting");

    let mut api = HttpHouseApi::new(config.remote.base_url.clone(), config.remote.request_timeout)
        .context("failed to build HTTP client")?;
    api = match &config.credentials {
        Credentials::Token(token) => api.with_token(token),
        Credentials::Login { login, password } => {
            api.authenticate(login, password)
                .await
                .context("authentication failed")?;
            api
        }
    };

    if let Cmd::Houses = cli.cmd {
        let houses = api.houses().await.context("failed to list houses")?;
        let selected = pick_house(&houses, config.remote.house_id);
        for house in &houses {
            println!(
                "{}{}{}",
                house.house_id,
                if house.owner { " (owner)" } else { "" },
                if selected == Some(house.house_id) { " *" } else { "" }
            );
        }
        return Ok(());
    }

    let house_id = api
        .select_house(config.remote.house_id)
        .await
        .context("failed to select a house")?;
    let browser_url = api.browser_url(house_id);
    tracing::info!("Controlling house {}", house_id);

    let engine = Engine::new(api, house_id).with_timeouts(
        config.remote.request_timeout,
        config.remote.command_timeout,
    );

    let outcome = engine.refresh().await;
    if outcome == RefreshOutcome::HouseNotReady {
        eprintln!(
            "House {} is being initialized. Open {} and retry shortly.",
            house_id, browser_url
        );
    }

    match cli.cmd {
        Cmd::Serve => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown_tx.send(()).ok();
                }
            });
            homectl::api::serve(Arc::new(engine), config.api.socket_addr(), shutdown_rx)
                .await
                .context("HTTP API server failed")?;
        }
        Cmd::Devices { filter } => {
            ensure_loaded(outcome)?;
            engine.set_filter(filter.filter());
            print!("{}", engine.view().render());
        }
        Cmd::Batch {
            intent,
            filter,
            all,
            ids,
        } => {
            ensure_loaded(outcome)?;
            engine.set_filter(filter.filter());
            if all {
                engine.select_all();
            } else {
                for id in &ids {
                    if !engine.select(id) {
                        eprintln!("Skipping {}: not displayed", id);
                    }
                }
            }

            let report = engine.execute_selected(intent).await?;
            println!("{}", report);
            print!("{}", engine.view().render());
        }
        Cmd::Toggle { id, intent } => {
            ensure_loaded(outcome)?;
            match engine.toggle(&id, intent).await? {
                outcome @ ToggleOutcome::Committed { .. } => println!("{}", outcome),
                outcome @ ToggleOutcome::RolledBack { .. } => bail!("{}", outcome),
            }
        }
        Cmd::Houses => {}
    }

    Ok(())
}

fn ensure_loaded(outcome: RefreshOutcome) -> anyhow::Result<()> {
    match outcome {
        RefreshOutcome::Updated | RefreshOutcome::AlreadyInFlight => Ok(()),
        RefreshOutcome::HouseNotReady => bail!("house is not initialized yet"),
        RefreshOutcome::Failed => bail!("failed to load devices"),
    }
}
