//! Bounded-concurrency execution of planned mutations
//!
//! Every mutation is attempted. A failed or timed-out write is logged and
//! recorded in the report but never aborts the others.

use super::reconcile::Mutation;
use crate::authority::{with_timeout, PolicyAuthority};
use crate::error::{AuthzError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A mutation that did not go through
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedMutation {
    pub target: String,
    pub error: String,
}

/// What happened to a batch of mutations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<FailedMutation>,
}

impl FanOutReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.succeeded == self.attempted
    }
}

/// Runs mutations on at most `workers` tasks at a time
#[derive(Clone)]
pub struct FanOut {
    authority: Arc<dyn PolicyAuthority>,
    workers: usize,
    timeout: Duration,
}

impl FanOut {
    pub fn new(authority: Arc<dyn PolicyAuthority>, workers: usize, timeout: Duration) -> Self {
        FanOut {
            authority,
            workers: workers.max(1),
            timeout,
        }
    }

    /// Attempt every mutation and wait for all of them
    pub async fn execute(&self, mutations: Vec<Mutation>) -> FanOutReport {
        let mut report = FanOutReport {
            attempted: mutations.len(),
            ..Default::default()
        };
        if mutations.is_empty() {
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for mutation in mutations {
            let semaphore = Arc::clone(&semaphore);
            let authority = Arc::clone(&self.authority);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let target = mutation.describe();
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => with_timeout(&target, timeout, apply(authority.as_ref(), mutation)).await,
                    Err(e) => Err(AuthzError::authority("acquire worker", e.to_string())),
                };
                (target, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((target, Ok(()))) => {
                    debug!(%target, "mutation applied");
                    report.succeeded += 1;
                }
                Ok((target, Err(e))) => {
                    warn!(%target, error = %e, "mutation failed");
                    report.failures.push(FailedMutation {
                        target,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "mutation task did not complete");
                    report.failures.push(FailedMutation {
                        target: "unknown".to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "policy mutations finished"
        );
        report
    }
}

async fn apply(authority: &dyn PolicyAuthority, mutation: Mutation) -> Result<()> {
    match mutation {
        Mutation::Create(policy) => authority.create_policy(&policy).await.map(drop),
        Mutation::Update(policy) => authority.update_policy(&policy).await.map(drop),
        Mutation::Delete { id, .. } => authority.delete_policy(&id).await,
    }
}
