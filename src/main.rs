use clap::{Parser, Subcommand};
use lms_server::catalog::Catalog;
use lms_server::config::Config;
use lms_server::contests::ContestService;
use lms_server::error::Result;
use lms_server::feed::local::LocalFeed;
use lms_server::feed::provider::ProviderFeed;
use lms_server::feed::FixtureFeed;
use lms_server::picks::PickService;
use lms_server::poller::Poller;
use lms_server::results::{RoundOutcome, RoundProcessor};
use lms_server::server::{start_server, AppState};
use lms_server::settings::Settings;
use lms_server::storage::Storage;
use lms_server::{logging, observability};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "lms_server")]
#[command(about = "Last Man Standing elimination contest server")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server with the results poller alongside
    Serve {
        /// Port to listen on (defaults to the configured port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Import a season's teams and fixtures from the match feed
    Import {
        /// Season to import (defaults to the stored current season)
        #[arg(long)]
        season: Option<String>,
    },
    /// Process one gameweek of one contest
    Process {
        #[arg(long)]
        contest: Uuid,
        #[arg(long)]
        gameweek: u32,
    },
    /// Run the results poller
    Poll {
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
    },
}

#[cfg(feature = "db")]
async fn build_storage() -> Result<Arc<dyn Storage>> {
    Ok(Arc::new(lms_server::db::DatabaseStorage::new().await?))
}

#[cfg(not(feature = "db"))]
async fn build_storage() -> Result<Arc<dyn Storage>> {
    Ok(Arc::new(lms_server::storage::InMemoryStorage::new()))
}

fn build_feed(config: &Config) -> Result<Arc<dyn FixtureFeed>> {
    match config.feed.mode.as_str() {
        "local" => Ok(Arc::new(LocalFeed::new(config.feed.fixtures_path.clone()))),
        _ => Ok(Arc::new(ProviderFeed::new(
            config.feed.base_url.clone(),
            config.feed.timeout_seconds,
        )?)),
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    logging::init_logging();
    observability::init_metrics();

    let cli = Cli::parse();
    let config = Config::load()?;

    let storage = build_storage().await?;
    let settings = Arc::new(Settings::new(storage.clone()));
    let feed = build_feed(&config)?;
    let interval = Duration::from_secs(config.poller.interval_seconds);

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            let poller = Arc::new(Poller::new(
                storage.clone(),
                settings.clone(),
                feed.clone(),
                interval,
            ));
            let state = AppState {
                storage: storage.clone(),
                settings: settings.clone(),
                contests: Arc::new(ContestService::new(storage.clone(), settings.clone())),
                picks: Arc::new(PickService::new(storage.clone(), settings.clone())),
                processor: Arc::new(RoundProcessor::new(storage.clone())),
                catalog: Arc::new(Catalog::new(storage.clone())),
                poller: poller.clone(),
                feed: feed.clone(),
            };

            let background = poller.clone();
            tokio::spawn(async move { background.run().await });

            start_server(state, port).await?;
        }
        Commands::Import { season } => {
            println!("📥 Importing season from the match feed...");
            let season = match season {
                Some(s) => s,
                None => settings.current_season().await?,
            };
            let catalog = Catalog::new(storage.clone());
            match catalog.import_season(feed.as_ref(), &season).await {
                Ok(summary) => {
                    settings.set_current_season(&season).await?;
                    println!(
                        "✅ Imported {} teams and {} fixtures for season {}",
                        summary.teams, summary.fixtures, season
                    );
                    if summary.skipped > 0 {
                        println!("⚠️  Skipped {} fixtures with unknown teams", summary.skipped);
                    }
                }
                Err(e) => {
                    error!("Season import failed: {e}");
                    println!("❌ Season import failed: {e}");
                }
            }
        }
        Commands::Process { contest, gameweek } => {
            println!("🔄 Processing gameweek {gameweek}...");
            let processor = RoundProcessor::new(storage.clone());
            match processor.process_round(contest, gameweek).await {
                Ok(RoundOutcome::Processed(processed)) => {
                    println!(
                        "✅ Gameweek {} processed: {} eliminated, {} still alive",
                        gameweek, processed.eliminated, processed.alive_remaining
                    );
                    if processed.completed {
                        match processed.winner_member_id {
                            Some(winner) => println!("🏆 Contest completed, winner {winner}"),
                            None => println!("🤝 Contest completed as a draw"),
                        }
                    }
                }
                Ok(RoundOutcome::AlreadyProcessed) => {
                    println!("ℹ️  Gameweek {gameweek} was already processed");
                }
                Ok(RoundOutcome::NotReady { unfinished }) => {
                    println!(
                        "⏳ Gameweek {gameweek} not ready: {unfinished} fixtures unfinished"
                    );
                }
                Ok(RoundOutcome::NotActive) => {
                    println!("⚠️  Contest is not active");
                }
                Err(e) => {
                    error!("Round processing failed: {e}");
                    println!("❌ Round processing failed: {e}");
                }
            }
        }
        Commands::Poll { once } => {
            let poller = Poller::new(storage.clone(), settings.clone(), feed.clone(), interval);
            if once {
                match poller.tick().await {
                    Ok(summary) => println!(
                        "✅ Poll tick: {} contests, {} rounds processed, {} skipped, {} failures",
                        summary.contests,
                        summary.rounds_processed,
                        summary.rounds_skipped,
                        summary.failures
                    ),
                    Err(e) => {
                        error!("Poll tick failed: {e}");
                        println!("❌ Poll tick failed: {e}");
                    }
                }
            } else {
                println!("🔁 Running results poller every {}s", interval.as_secs());
                poller.run().await;
            }
        }
    }
    Ok(())
}
