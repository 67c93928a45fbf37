//! Background housekeeping.
//!
//! Keeps the backend's own service token alive and purges expired requests
//! along with issue records whose lease has ended.
//! Failures are logged and the loop carries on; nothing here ever reaches a
//! caller.

use super::config_service::credentials_of;
use super::{ConfigService, RequestLedger};
use crate::config::HousekeepingConfig;
use crate::errors::Result;
use crate::secrets::TokenBroker;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

pub struct Renewer {
    config: ConfigService,
    ledger: RequestLedger,
    broker: Arc<dyn TokenBroker>,
    settings: HousekeepingConfig,
}

/// Stops a running [`Renewer`]
pub struct RenewerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RenewerHandle {
    /// Signal the loop and wait for it to finish its current pass
    pub async fn stop(self) {
        info!("Stopping background renewer");
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

impl Renewer {
    pub fn new(
        config: ConfigService,
        ledger: RequestLedger,
        broker: Arc<dyn TokenBroker>,
        settings: HousekeepingConfig,
    ) -> Self {
        Self { config, ledger, broker, settings }
    }

    /// Renew the service token once. A backend that was never configured
    /// has nothing to renew.
    pub async fn renew_once(&self) -> Result<bool> {
        let Some(config) = self.config.load_optional().await? else {
            debug!("Backend not configured yet, skipping token renewal");
            return Ok(false);
        };
        self.broker
            .renew_self(&credentials_of(&config), self.settings.renew_increment())
            .await?;
        info!(
            increment_seconds = self.settings.renew_increment_seconds,
            "Service token renewed"
        );
        Ok(true)
    }

    /// One housekeeping pass. Returns the number of records removed.
    pub async fn sweep_once(&self) -> Result<usize> {
        let requests = self.ledger.sweep_expired().await?;
        let issues = self.ledger.sweep_expired_issues().await?;
        if requests + issues > 0 {
            info!(requests, issues, "Expired records swept");
        }
        Ok(requests + issues)
    }

    pub fn spawn(self) -> RenewerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        info!(
            renew_interval_seconds = self.settings.renew_interval_seconds,
            sweep_interval_seconds = self.settings.sweep_interval_seconds,
            "Starting background renewer"
        );

        let task = tokio::spawn(async move {
            let mut renew_tick = interval(self.settings.renew_interval());
            renew_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut sweep_tick = interval(self.settings.sweep_interval());
            sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = renew_tick.tick() => {
                        if let Err(e) = self.renew_once().instrument(crate::workflow_span!("renew_self")).await {
                            warn!(error = %e, "Service token renewal failed");
                        }
                    }
                    _ = sweep_tick.tick() => {
                        if let Err(e) = self.sweep_once().instrument(crate::workflow_span!("sweep")).await {
                            warn!(error = %e, "Request sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Background renewer stopped");
                            break;
                        }
                    }
                }
            }
        });

        RenewerHandle { shutdown_tx, task }
    }
}
