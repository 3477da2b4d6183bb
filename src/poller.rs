//! Periodic results poller: pulls fresh outcomes into the catalog, then
//! advances every active contest over a trailing window of gameweeks so a
//! missed tick is self-healing. Every invocation is idempotent, and a
//! failure in one contest or round never blocks the rest of the pass.

use crate::catalog::Catalog;
use crate::constants::PROCESS_WINDOW;
use crate::error::Result;
use crate::feed::FixtureFeed;
use crate::results::{RoundOutcome, RoundProcessor};
use crate::rounds;
use crate::settings::Settings;
use crate::storage::Storage;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    pub contests: usize,
    pub rounds_processed: usize,
    pub rounds_skipped: usize,
    pub failures: usize,
}

pub struct Poller {
    storage: Arc<dyn Storage>,
    settings: Arc<Settings>,
    feed: Arc<dyn FixtureFeed>,
    catalog: Catalog,
    processor: RoundProcessor,
    interval: Duration,
}

impl Poller {
    pub fn new(
        storage: Arc<dyn Storage>,
        settings: Arc<Settings>,
        feed: Arc<dyn FixtureFeed>,
        interval: Duration,
    ) -> Self {
        let catalog = Catalog::new(storage.clone());
        let processor = RoundProcessor::new(storage.clone());
        Self {
            storage,
            settings,
            feed,
            catalog,
            processor,
            interval,
        }
    }

    /// Run ticks forever on the configured interval.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.tick().await {
                Ok(summary) => debug!(?summary, "poller tick finished"),
                Err(e) => error!("poller tick failed: {e}"),
            }
        }
    }

    /// One polling pass: refresh fixture outcomes, then process the
    /// trailing window of gameweeks for every active contest.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickSummary> {
        counter!("lms_poll_ticks_total").increment(1);
        let mut summary = TickSummary::default();

        let season = self.settings.current_season().await?;
        if let Err(e) = self.catalog.refresh_results(self.feed.as_ref(), &season).await {
            // Feed outages are logged and skipped; stored fixtures still
            // allow rounds that already finished to be processed.
            counter!("lms_poll_feed_errors_total").increment(1);
            warn!("fixture refresh failed, continuing with stored data: {e}");
        }

        let active_gameweek =
            rounds::active_gameweek(self.storage.as_ref(), &self.settings, &season).await?;
        let window_start = active_gameweek.saturating_sub(PROCESS_WINDOW - 1).max(1);

        for contest in self.storage.list_active_contests().await? {
            summary.contests += 1;
            let contest_id = contest.id.unwrap();
            let first = window_start.max(contest.start_gameweek);
            for gameweek in first..=active_gameweek {
                match self.processor.process_round(contest_id, gameweek).await {
                    Ok(RoundOutcome::Processed(processed)) => {
                        summary.rounds_processed += 1;
                        info!(
                            contest = %contest_id,
                            gameweek,
                            eliminated = processed.eliminated,
                            "poller processed gameweek"
                        );
                    }
                    Ok(_) => summary.rounds_skipped += 1,
                    Err(e) => {
                        summary.failures += 1;
                        counter!("lms_poll_process_errors_total").increment(1);
                        error!(contest = %contest_id, gameweek, "round processing failed: {e}");
                    }
                }
            }
        }

        Ok(summary)
    }
}
