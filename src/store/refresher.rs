//! Background reload of policy and subject snapshots

use super::policies::{PolicySnapshot, PolicyStore};
use super::subjects::SubjectSnapshot;
use crate::authority::{with_timeout, PolicySource};
use crate::error::Result;
use crate::model::{Policy, PolicyService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Reloads a [`PolicyStore`] from a [`PolicySource`]
pub struct PolicyRefresher {
    store: Arc<PolicyStore>,
    source: Arc<dyn PolicySource>,
    timeout: Duration,
}

impl PolicyRefresher {
    pub fn new(store: Arc<PolicyStore>, source: Arc<dyn PolicySource>, timeout: Duration) -> Self {
        PolicyRefresher {
            store,
            source,
            timeout,
        }
    }

    /// Fetch everything and publish; on any failure nothing is published
    pub async fn refresh_now(&self) -> Result<()> {
        let resource = self.fetch(PolicyService::Resource).await?;
        let tag = self.fetch(PolicyService::Tag).await?;
        let condition = self.fetch(PolicyService::Condition).await?;
        let roles = with_timeout("fetch roles", self.timeout, self.source.fetch_roles()).await?;
        let groups = with_timeout(
            "fetch user groups",
            self.timeout,
            self.source.fetch_user_groups(),
        )
        .await?;

        let snapshot = PolicySnapshot::new(resource, tag, condition);
        debug!(policies = snapshot.len(), roles = roles.len(), "publishing snapshots");

        // subjects first so a new policy never sees a stale role set
        self.store.subjects().publish(SubjectSnapshot::new(roles, groups));
        self.store.publish(snapshot);
        Ok(())
    }

    async fn fetch(&self, service: PolicyService) -> Result<Vec<Policy>> {
        with_timeout(
            "fetch policies",
            self.timeout,
            self.source.fetch_policies(service),
        )
        .await
    }

    /// Start the interval task; the first tick fires immediately
    pub fn spawn(self, every: Duration) -> RefresherHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval = ?every, "policy refresher started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh_now().await {
                            error!(error = %e, "policy refresh failed, keeping previous snapshot");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("policy refresher stopped");
        });

        RefresherHandle {
            stop: stop_tx,
            task: Some(task),
        }
    }
}

/// Owner of a running refresher; dropping it stops the task
pub struct RefresherHandle {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RefresherHandle {
    /// Signal the task and wait for it to finish its current refresh
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RefresherHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
