//! Runs one operation across many sites with a bounded number of concurrent sessions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use q4mig_core::SiteEntry;
use tokio::task::{self, JoinSet};
use tracing::{info, warn};

use crate::{run_operation, OpContext, Operation, OperationReport};

#[derive(Debug)]
pub struct SiteOutcome {
    pub site: SiteEntry,
    pub result: Result<OperationReport, String>,
}

impl SiteOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Orchestrator {
    ctx: Arc<OpContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<OpContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &OpContext {
        &self.ctx
    }

    /// Run `operation` for every site, at most `max_concurrent_sites` at a time. Sites start
    /// in registry order; one site failing never stops the others. Outcomes come back in
    /// input order.
    pub async fn run(&self, operation: Operation, sites: Vec<SiteEntry>) -> Vec<SiteOutcome> {
        let limit = self.ctx.config.max_concurrent_sites.max(1);
        let total = sites.len();
        let mut queue = sites.into_iter().enumerate().collect::<VecDeque<_>>();
        let mut in_flight: HashMap<task::Id, (usize, SiteEntry)> = HashMap::new();
        let mut running = JoinSet::new();
        let mut outcomes: Vec<(usize, SiteOutcome)> = Vec::with_capacity(total);

        info!(operation = %operation, sites = total, limit, "starting run");
        loop {
            while running.len() < limit {
                let Some((index, site)) = queue.pop_front() else {
                    break;
                };
                let ctx = Arc::clone(&self.ctx);
                let task_site = site.clone();
                let handle = running.spawn(async move {
                    run_operation(&ctx, operation, &task_site)
                        .await
                        .map_err(|err| err.to_string())
                });
                in_flight.insert(handle.id(), (index, site));
            }
            self.record_active(running.len(), limit).await;

            let (id, result) = match running.join_next_with_id().await {
                None => break,
                Some(Ok((id, result))) => (id, result),
                Some(Err(err)) => {
                    warn!(error = %err, "site task aborted");
                    (err.id(), Err(err.to_string()))
                }
            };
            if let Some((index, site)) = in_flight.remove(&id) {
                outcomes.push((index, SiteOutcome { site, result }));
            }
        }
        self.record_active(0, limit).await;

        outcomes.sort_by_key(|(index, _)| *index);
        let failed = outcomes.iter().filter(|(_, o)| !o.is_ok()).count();
        info!(operation = %operation, succeeded = total - failed, failed, "run finished");
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn record_active(&self, active: usize, limit: usize) {
        if let Err(err) = self
            .ctx
            .state
            .update_global(|g| {
                g.active_sites = active;
                g.max_concurrent_sites = limit;
            })
            .await
        {
            warn!(error = %err, "recording active sites");
        }
    }
}
