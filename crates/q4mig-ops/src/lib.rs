//! Operation catalog and runners: delete loops, scrapers, the person/committee merge,
//! migrators, sequenced chains and the multi-site orchestrator.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use q4mig_core::{ContentKind, LoginStatus, OperationStatus, SiteEntry, SiteSide};
use q4mig_screens::{
    login, verify_dashboard, AdminSession, BrowserLauncher, ContentSection, Credentials,
    DriverError, NavigationPolicy, ScreenError,
};
use q4mig_storage::{BackoffPolicy, SnapshotError, SnapshotStore, StateStore};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

pub mod config;
pub mod drain;
pub mod images;
pub mod merge;
pub mod migrate;
pub mod orchestrator;
pub mod scrape;

pub use config::{DrainConfig, MatchConfig, RetryPolicy, RunConfig};
pub use images::{Photo, PhotoSource};
pub use orchestrator::{Orchestrator, SiteOutcome};

pub const CRATE_NAME: &str = "q4mig-ops";

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("session for {site} failed: {source}")]
    Session {
        site: String,
        #[source]
        source: ScreenError,
    },
    #[error("navigation failed: {0}")]
    Navigation(#[from] ScreenError),
    #[error(transparent)]
    Data(#[from] SnapshotError),
    #[error("{label} stalled with {remaining} remaining after {attempts} attempts")]
    Stalled {
        label: String,
        remaining: usize,
        attempts: usize,
    },
    #[error("{operation} left {failed} item(s) failed")]
    Incomplete { operation: String, failed: usize },
    #[error("step {step} failed: {source}")]
    Chain {
        step: String,
        #[source]
        source: Box<OperationError>,
    },
    #[error("run-state: {0}")]
    State(#[from] anyhow::Error),
}

impl From<DriverError> for OperationError {
    fn from(err: DriverError) -> Self {
        OperationError::Navigation(ScreenError::Driver(err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationGroup {
    Delete,
    Scrape,
    Migrate,
    Misc,
}

impl fmt::Display for OperationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationGroup::Delete => "delete",
            OperationGroup::Scrape => "scrape",
            OperationGroup::Migrate => "migrate",
            OperationGroup::Misc => "misc",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    VerifyLogin,
    Delete(ContentSection),
    ScrapePersons,
    ScrapeFaq,
    ScrapeLookupList,
    ScrapeAnalysts,
    ScrapeCommittees,
    MergePersonData,
    MigrateCommittees,
    MigratePersons,
    MigratePersonImages,
    MigrateFaq,
    MigrateLookupList,
    MigrateAnalysts,
    /// Committees, merge, persons, then images on one destination session.
    MigrateGovernance,
}

impl Operation {
    pub fn catalog() -> Vec<Operation> {
        let mut ops = vec![Operation::VerifyLogin];
        ops.extend(ContentSection::ALL.into_iter().map(Operation::Delete));
        ops.extend([
            Operation::ScrapePersons,
            Operation::ScrapeFaq,
            Operation::ScrapeLookupList,
            Operation::ScrapeAnalysts,
            Operation::ScrapeCommittees,
            Operation::MergePersonData,
            Operation::MigrateCommittees,
            Operation::MigratePersons,
            Operation::MigratePersonImages,
            Operation::MigrateFaq,
            Operation::MigrateLookupList,
            Operation::MigrateAnalysts,
            Operation::MigrateGovernance,
        ]);
        ops
    }

    pub fn id(&self) -> String {
        match self {
            Operation::VerifyLogin => "verify-login".into(),
            Operation::Delete(section) => format!("delete-{}", section.screen().section_id),
            Operation::ScrapePersons => "scrape-persons".into(),
            Operation::ScrapeFaq => "scrape-faq".into(),
            Operation::ScrapeLookupList => "scrape-lookup-list".into(),
            Operation::ScrapeAnalysts => "scrape-analysts".into(),
            Operation::ScrapeCommittees => "scrape-committees".into(),
            Operation::MergePersonData => "merge-person-data".into(),
            Operation::MigrateCommittees => "migrate-committees".into(),
            Operation::MigratePersons => "migrate-persons".into(),
            Operation::MigratePersonImages => "migrate-person-images".into(),
            Operation::MigrateFaq => "migrate-faq".into(),
            Operation::MigrateLookupList => "migrate-lookup-list".into(),
            Operation::MigrateAnalysts => "migrate-analysts".into(),
            Operation::MigrateGovernance => "migrate-governance".into(),
        }
    }

    pub fn group(&self) -> OperationGroup {
        match self {
            Operation::Delete(_) => OperationGroup::Delete,
            Operation::ScrapePersons
            | Operation::ScrapeFaq
            | Operation::ScrapeLookupList
            | Operation::ScrapeAnalysts
            | Operation::ScrapeCommittees => OperationGroup::Scrape,
            Operation::MigrateCommittees
            | Operation::MigratePersons
            | Operation::MigratePersonImages
            | Operation::MigrateFaq
            | Operation::MigrateLookupList
            | Operation::MigrateAnalysts
            | Operation::MigrateGovernance => OperationGroup::Migrate,
            Operation::VerifyLogin | Operation::MergePersonData => OperationGroup::Misc,
        }
    }

    /// Admin instance the operation drives; `None` for purely local work.
    pub fn side(&self) -> Option<SiteSide> {
        match self.group() {
            OperationGroup::Scrape => Some(SiteSide::Source),
            OperationGroup::Delete | OperationGroup::Migrate => Some(SiteSide::Destination),
            OperationGroup::Misc => match self {
                Operation::MergePersonData => None,
                _ => Some(SiteSide::Destination),
            },
        }
    }

    pub fn description(&self) -> String {
        match self {
            Operation::VerifyLogin => "log in and verify the dashboard".into(),
            Operation::Delete(section) => format!("delete every {} row", section.screen().label),
            Operation::ScrapePersons => "capture persons by department".into(),
            Operation::ScrapeFaq => "capture FAQ lists and questions".into(),
            Operation::ScrapeLookupList => "capture lookup lists".into(),
            Operation::ScrapeAnalysts => "capture analysts".into(),
            Operation::ScrapeCommittees => "capture committees".into(),
            Operation::MergePersonData => "attach curated committee roles to persons".into(),
            Operation::MigrateCommittees => "create missing committees".into(),
            Operation::MigratePersons => "create missing persons with committee roles".into(),
            Operation::MigratePersonImages => "upload person photos".into(),
            Operation::MigrateFaq => "create missing FAQ lists and questions".into(),
            Operation::MigrateLookupList => "create missing lookup entries".into(),
            Operation::MigrateAnalysts => "create missing analysts".into(),
            Operation::MigrateGovernance => {
                "committees, merge, persons and images in sequence".into()
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Operation::catalog()
            .into_iter()
            .find(|op| op.id() == wanted)
            .ok_or_else(|| format!("unknown operation {s:?}; run `operations` for the list"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub operation: String,
    pub site: String,
    pub created: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub notes: Vec<String>,
}

impl OperationReport {
    pub fn new(operation: Operation, site: &SiteEntry) -> Self {
        Self {
            operation: operation.id(),
            site: site.name.clone(),
            ..Default::default()
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Fold a chained step's counters into this report.
    pub fn absorb(&mut self, step: OperationReport) {
        self.created += step.created;
        self.deleted += step.deleted;
        self.skipped += step.skipped;
        self.failed += step.failed;
        self.notes
            .extend(step.notes.into_iter().map(|n| format!("{}: {n}", step.operation)));
    }
}

/// Everything an operation needs, shared by all concurrently running sites.
pub struct OpContext {
    pub config: RunConfig,
    pub retry: RetryPolicy,
    pub drain: DrainConfig,
    pub matching: MatchConfig,
    pub snapshots: SnapshotStore,
    pub state: Arc<StateStore>,
    pub launcher: Arc<dyn BrowserLauncher>,
    pub credentials: Credentials,
    pub photos: Arc<dyn PhotoSource>,
}

impl OpContext {
    pub fn navigation_policy(&self) -> NavigationPolicy {
        NavigationPolicy {
            backoff: BackoffPolicy::fixed(self.retry.attempts, self.retry.delay),
            wait_timeout: self.config.wait_timeout,
        }
    }
}

/// Run-state and snapshot key of a registry entry.
pub fn site_key(site: &SiteEntry) -> &str {
    &site.destination
}

pub async fn open_session(
    ctx: &OpContext,
    site: &SiteEntry,
    side: SiteSide,
) -> Result<AdminSession, OperationError> {
    let key = site_key(site);
    ctx.state
        .update_site(key, |s| s.login_status = LoginStatus::LoggingIn)
        .await?;
    let urls = ctx.config.urls_for(site.subdomain(side));
    match login(
        ctx.launcher.as_ref(),
        urls,
        &ctx.credentials,
        &ctx.navigation_policy(),
    )
    .await
    {
        Ok(session) => {
            ctx.state
                .update_site(key, |s| {
                    s.login_status = LoginStatus::LoggedIn;
                    s.last_error = None;
                })
                .await?;
            Ok(session)
        }
        Err(err) => {
            let message = err.to_string();
            ctx.state
                .update_site(key, |s| {
                    s.login_status = LoginStatus::LoginFailed;
                    s.last_error = Some(message);
                })
                .await?;
            Err(OperationError::Session {
                site: site.name.clone(),
                source: err,
            })
        }
    }
}

async fn close_session(session: AdminSession, site: &SiteEntry) {
    if let Err(err) = session.close().await {
        warn!(site = %site.name, error = %err, "closing session");
    }
}

/// Run one operation for one site, recording its progress in run-state.
pub async fn run_operation(
    ctx: &OpContext,
    operation: Operation,
    site: &SiteEntry,
) -> Result<OperationReport, OperationError> {
    let key = site_key(site);
    let span = info_span!("operation", site = %site.name, operation = %operation);
    async {
        ctx.state
            .update_site(key, |s| {
                s.current_operation = Some(operation.id());
                s.operation_status = OperationStatus::Running;
                s.last_error = None;
            })
            .await?;

        let outcome = dispatch(ctx, operation, site).await;

        match &outcome {
            Ok(report) => {
                info!(
                    created = report.created,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    failed = report.failed,
                    "operation completed"
                );
                ctx.state
                    .update_site(key, |s| s.operation_status = OperationStatus::Completed)
                    .await?;
            }
            Err(err) => {
                warn!(error = %err, "operation failed");
                let message = err.to_string();
                ctx.state
                    .update_site(key, |s| {
                        s.operation_status = OperationStatus::Failed;
                        s.last_error = Some(message);
                    })
                    .await?;
            }
        }
        outcome
    }
    .instrument(span)
    .await
}

async fn dispatch(
    ctx: &OpContext,
    operation: Operation,
    site: &SiteEntry,
) -> Result<OperationReport, OperationError> {
    match operation {
        Operation::MergePersonData => merge::run(ctx, site).await,
        Operation::MigrateGovernance => run_governance_chain(ctx, site).await,
        _ => {
            let side = operation.side().unwrap_or(SiteSide::Destination);
            let session = open_session(ctx, site, side).await?;
            let outcome = execute(ctx, operation, site, &session).await;
            close_session(session, site).await;
            outcome
        }
    }
}

/// Run a browser-driven operation on an already authenticated session.
pub async fn execute(
    ctx: &OpContext,
    operation: Operation,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    match operation {
        Operation::MigrateGovernance => run_chain(ctx, site, session, &GOVERNANCE_CHAIN).await,
        single => execute_single(ctx, single, site, session).await,
    }
}

async fn execute_single(
    ctx: &OpContext,
    operation: Operation,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    match operation {
        Operation::VerifyLogin => {
            verify_dashboard(session, &ctx.navigation_policy())
                .await
                .map_err(|source| OperationError::Session {
                    site: site.name.clone(),
                    source,
                })?;
            ctx.state
                .update_site(site_key(site), |s| s.dashboard_verified = true)
                .await?;
            let mut report = OperationReport::new(operation, site);
            report.note("dashboard verified");
            Ok(report)
        }
        Operation::Delete(section) => drain::delete_section(ctx, site, session, section).await,
        Operation::ScrapePersons => scrape::scrape_persons(ctx, site, session).await,
        Operation::ScrapeFaq => scrape::scrape_faq(ctx, site, session).await,
        Operation::ScrapeLookupList => scrape::scrape_lookup_list(ctx, site, session).await,
        Operation::ScrapeAnalysts => scrape::scrape_analysts(ctx, site, session).await,
        Operation::ScrapeCommittees => scrape::scrape_committees(ctx, site, session).await,
        Operation::MergePersonData => merge::run(ctx, site).await,
        Operation::MigrateCommittees => migrate::migrate_committees(ctx, site, session).await,
        Operation::MigratePersons => migrate::migrate_persons(ctx, site, session).await,
        Operation::MigratePersonImages => images::migrate_person_images(ctx, site, session).await,
        Operation::MigrateFaq => migrate::migrate_faq(ctx, site, session).await,
        Operation::MigrateLookupList => migrate::migrate_lookup_list(ctx, site, session).await,
        Operation::MigrateAnalysts => migrate::migrate_analysts(ctx, site, session).await,
        Operation::MigrateGovernance => Err(OperationError::Navigation(ScreenError::Extraction(
            "chains cannot be nested".into(),
        ))),
    }
}

pub const GOVERNANCE_CHAIN: [Operation; 4] = [
    Operation::MigrateCommittees,
    Operation::MergePersonData,
    Operation::MigratePersons,
    Operation::MigratePersonImages,
];

async fn run_governance_chain(ctx: &OpContext, site: &SiteEntry) -> Result<OperationReport, OperationError> {
    let session = open_session(ctx, site, SiteSide::Destination).await?;
    let outcome = run_chain(ctx, site, &session, &GOVERNANCE_CHAIN).await;
    close_session(session, site).await;
    outcome
}

/// Run `steps` in order on one session, stopping at the first step that errors or leaves
/// any item failed.
pub async fn run_chain(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
    steps: &[Operation],
) -> Result<OperationReport, OperationError> {
    let mut report = OperationReport::new(Operation::MigrateGovernance, site);
    for step in steps {
        info!(step = %step, "chain step");
        let outcome = execute_single(ctx, *step, site, session)
            .await
            .and_then(|step_report| {
                if step_report.failed > 0 {
                    warn!(step = %step, failed = step_report.failed, notes = ?step_report.notes, "chain step incomplete");
                    Err(OperationError::Incomplete {
                        operation: step_report.operation,
                        failed: step_report.failed,
                    })
                } else {
                    Ok(step_report)
                }
            });
        match outcome {
            Ok(step_report) => report.absorb(step_report),
            Err(err) => {
                return Err(OperationError::Chain {
                    step: step.id(),
                    source: Box::new(err),
                })
            }
        }
    }
    Ok(report)
}

/// Record a snapshot capture in run-state.
pub(crate) async fn mark_captured(
    ctx: &OpContext,
    site: &SiteEntry,
    kind: ContentKind,
) -> Result<(), OperationError> {
    ctx.state
        .update_site(site_key(site), |s| s.mark_captured(kind))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ids_round_trip_and_are_unique() {
        let catalog = Operation::catalog();
        assert_eq!(catalog.len(), 23);
        let mut ids = catalog.iter().map(Operation::id).collect::<Vec<_>>();
        for (op, id) in catalog.iter().zip(&ids) {
            assert_eq!(id.parse::<Operation>().unwrap(), *op);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), catalog.len());
        assert_eq!(
            "delete-press-releases".parse::<Operation>().unwrap(),
            Operation::Delete(ContentSection::PressReleases)
        );
        assert!("delete-everything".parse::<Operation>().is_err());
    }

    #[test]
    fn sides_follow_groups() {
        assert_eq!(Operation::ScrapeFaq.side(), Some(SiteSide::Source));
        assert_eq!(Operation::MigrateFaq.side(), Some(SiteSide::Destination));
        assert_eq!(Operation::MergePersonData.side(), None);
        assert_eq!(Operation::VerifyLogin.group(), OperationGroup::Misc);
    }

    #[test]
    fn absorbed_reports_prefix_notes_with_the_step() {
        let site = SiteEntry {
            name: "Acme".into(),
            source: "acme-old".into(),
            destination: "acme".into(),
        };
        let mut chain = OperationReport::new(Operation::MigrateGovernance, &site);
        let mut step = OperationReport::new(Operation::MigratePersons, &site);
        step.created = 2;
        step.note("Jane Doe: photo missing");
        chain.absorb(step);
        assert_eq!(chain.created, 2);
        assert_eq!(chain.notes, vec!["migrate-persons: Jane Doe: photo missing"]);
    }
}
