use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::accounts::{AccountRow, AccountSource, ConfigError};
use crate::alerts::{AlertSink, Severity};
use crate::pipeline::{AccountOutcome, AccountPipeline, AccountReport, ClientFactory};

pub const DEFAULT_CYCLE_PAUSE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts: Vec<AccountReport>,
    /// Rows naming a marketplace no adapter handles.
    pub unknown_marketplaces: Vec<String>,
}

impl CycleSummary {
    pub fn sent(&self) -> usize {
        self.accounts.iter().map(|a| a.sent).sum()
    }

    pub fn failed_accounts(&self) -> usize {
        self.accounts
            .iter()
            .filter(|a| matches!(a.outcome, AccountOutcome::Failed { .. }))
            .count()
    }
}

/// Drives poll cycles over every configured account, one account at a time.
pub struct FleetRunner {
    source: Arc<dyn AccountSource>,
    pipeline: AccountPipeline,
    alerts: Arc<dyn AlertSink>,
    pause: Duration,
}

impl FleetRunner {
    pub fn new(
        source: Arc<dyn AccountSource>,
        factory: Arc<dyn ClientFactory>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            source,
            pipeline: AccountPipeline::new(factory, alerts.clone()),
            alerts,
            pause: DEFAULT_CYCLE_PAUSE,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }

    pub fn source(&self) -> &dyn AccountSource {
        self.source.as_ref()
    }

    /// One cycle. Only a configuration-source failure is returned as an error.
    pub async fn run_cycle(&self) -> Result<CycleSummary, ConfigError> {
        let cycle_id = Uuid::new_v4();
        self.cycle(cycle_id)
            .instrument(info_span!("cycle", %cycle_id))
            .await
    }

    async fn cycle(&self, cycle_id: Uuid) -> Result<CycleSummary, ConfigError> {
        let started_at = Utc::now();
        info!("starting cycle");
        let rows = self.source.load().await?;

        let mut accounts = Vec::new();
        let mut unknown_marketplaces = Vec::new();
        for row in rows {
            match row {
                AccountRow::Known(account) => accounts.push(self.pipeline.run(&account).await),
                AccountRow::UnknownMarketplace {
                    account,
                    marketplace,
                } => {
                    warn!(%account, %marketplace, "marketplace is not supported, account skipped");
                    unknown_marketplaces.push(format!("{account} ({marketplace})"));
                }
            }
        }

        let summary = CycleSummary {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            accounts,
            unknown_marketplaces,
        };
        info!(
            accounts = summary.accounts.len(),
            sent = summary.sent(),
            failed_accounts = summary.failed_accounts(),
            "cycle finished"
        );
        Ok(summary)
    }

    /// Runs a cycle and escalates a configuration failure as a critical alert.
    async fn cycle_and_escalate(&self) {
        if let Err(err) = self.run_cycle().await {
            error!(error = ?err, "cycle aborted");
            self.alerts
                .send(
                    &format!(
                        "Main loop error. Restarting in {} sec.: {err}",
                        self.pause.as_secs()
                    ),
                    Severity::Critical,
                )
                .await;
        }
    }

    /// Runs cycles separated by the fixed pause until `shutdown` resolves. A cycle in
    /// flight when `shutdown` resolves runs to completion; the pause is cut short.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut stopping = false;
        loop {
            let cycle = self.cycle_and_escalate();
            tokio::pin!(cycle);
            loop {
                tokio::select! {
                    () = &mut cycle => break,
                    () = &mut shutdown, if !stopping => {
                        stopping = true;
                        info!("shutdown requested, finishing the current cycle");
                    }
                }
            }
            if stopping {
                break;
            }
            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(self.pause) => {}
            }
        }
        info!("poll loop stopped");
    }

    pub async fn run_forever(&self) {
        self.run_until(std::future::pending::<()>()).await
    }
}
