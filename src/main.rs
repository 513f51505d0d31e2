//! CLI for the points miner
//!
//! Subcommands:
//! - `run`: log in and mine the configured streamers until Ctrl-C
//! - `resolve`: print the channel id of each given streamer

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use twitch_points_miner::config::load_config;
use twitch_points_miner::miner::Miner;
use twitch_points_miner::twitch::TwitchClient;
use twitch_points_miner::utils::logging;

#[derive(Parser)]
#[command(name = "twitch-points-miner", version)]
enum Command {
    /// Mine channel points until Ctrl-C
    Run {
        /// Streamer to watch; repeat for several. Overrides the configured list.
        #[arg(long = "streamer", short = 's')]
        streamers: Vec<String>,
        /// Do not bet on predictions
        #[arg(long)]
        no_predictions: bool,
        /// Do not join raids
        #[arg(long)]
        no_raid: bool,
        /// Do not claim bonus chests
        #[arg(long)]
        no_claim: bool,
    },
    /// Print the channel id of each streamer
    Resolve {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = Command::parse();

    let mut settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log.level);

    match cmd {
        Command::Run {
            streamers,
            no_predictions,
            no_raid,
            no_claim,
        } => {
            if !streamers.is_empty() {
                settings.miner.streamers = streamers;
            }
            settings.miner.predictions &= !no_predictions;
            settings.miner.raid &= !no_raid;
            settings.miner.claim_bonus &= !no_claim;

            if let Err(e) = Miner::new(settings).run().await {
                error!("Miner failed: {}", e);
                return ExitCode::FAILURE;
            }
            info!("Bye");
        }
        Command::Resolve { names } => {
            let client = match TwitchClient::new(settings.twitch) {
                Ok(client) => client,
                Err(e) => {
                    error!("Failed to build http client: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let mut missing = false;
            for name in names {
                match client.resolve_channel(&name).await {
                    Ok(id) => println!("{name}\t{id}"),
                    Err(e) => {
                        error!("{}", e);
                        missing = true;
                    }
                }
            }
            if missing {
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
