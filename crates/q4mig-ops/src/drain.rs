//! Bulk deletion: count what is left, delete one row, repeat until nothing is left or the
//! count stops moving.

use async_trait::async_trait;
use q4mig_core::SiteEntry;
use q4mig_screens::extract::{deletable_rows, error_banner, group_names, list_rows};
use q4mig_screens::pagination::{for_each_page, goto_page};
use q4mig_screens::{
    selectors, AdminPage, AdminSession, ContentNavigator, ContentSection, DriverError, ScreenState,
};
use tracing::{debug, info, warn};

use crate::{DrainConfig, OpContext, Operation, OperationError, OperationReport};

/// What a drain loop works against. Implemented per content section and by test doubles.
#[async_trait]
pub trait DrainTarget: Send {
    /// Rows that can still be deleted.
    async fn remaining(&mut self) -> Result<usize, OperationError>;
    async fn delete_one(&mut self) -> Result<(), OperationError>;
    /// Return to a screen from which `remaining` and `delete_one` can run again.
    async fn recover(&mut self) -> Result<(), OperationError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub initial: usize,
    pub attempts: usize,
    pub step_failures: usize,
}

/// Delete until `remaining` reports zero. Fails once `stuck_limit` consecutive
/// observations show no change; a failed delete step is logged and followed by `recover`.
pub async fn drain(
    target: &mut dyn DrainTarget,
    config: &DrainConfig,
    label: &str,
) -> Result<DrainOutcome, OperationError> {
    let mut outcome = DrainOutcome::default();
    let mut previous: Option<usize> = None;
    let mut stuck = 0usize;

    loop {
        let remaining = match target.remaining().await {
            Ok(n) => n,
            Err(err) => {
                warn!(label, error = %err, "counting rows failed; recovering");
                target.recover().await?;
                target.remaining().await?
            }
        };
        if previous.is_none() {
            outcome.initial = remaining;
        }
        if remaining == 0 {
            info!(label, attempts = outcome.attempts, "drained");
            return Ok(outcome);
        }

        if previous == Some(remaining) {
            stuck += 1;
            if stuck >= config.stuck_limit {
                return Err(OperationError::Stalled {
                    label: label.to_string(),
                    remaining,
                    attempts: outcome.attempts,
                });
            }
        } else {
            stuck = 0;
        }
        previous = Some(remaining);

        outcome.attempts += 1;
        debug!(label, remaining, stuck, attempt = outcome.attempts, "deleting one row");
        if let Err(err) = target.delete_one().await {
            outcome.step_failures += 1;
            warn!(label, error = %err, "delete step failed; recovering");
            target.recover().await?;
        }
    }
}

struct SectionDrain<'a> {
    page: &'a dyn AdminPage,
    nav: &'a ContentNavigator,
    group: Option<usize>,
    comment: &'a str,
    first_deletable: Option<(u32, usize)>,
    pending_approval: usize,
}

#[async_trait]
impl DrainTarget for SectionDrain<'_> {
    async fn remaining(&mut self) -> Result<usize, OperationError> {
        self.nav.reload_items(self.page, self.group).await?;
        let mut deletable = 0usize;
        let mut pending = 0usize;
        let mut first = None;
        for_each_page(self.page, self.nav.policy().wait_timeout, |page_no, html| {
            let rows = list_rows(html)?;
            let candidates = deletable_rows(&rows);
            if first.is_none() {
                first = candidates.first().map(|row| (page_no, row.position));
            }
            pending += rows.len() - candidates.len();
            deletable += candidates.len();
            Ok(())
        })
        .await?;
        self.first_deletable = first;
        self.pending_approval = pending;
        Ok(deletable)
    }

    async fn delete_one(&mut self) -> Result<(), OperationError> {
        let (page_no, position) = self
            .first_deletable
            .ok_or_else(|| DriverError::ElementNotFound {
                selector: selectors::ITEM_DELETE.to_string(),
            })?;
        let wait = self.nav.policy().wait_timeout;
        self.nav.reload_items(self.page, self.group).await?;
        goto_page(self.page, page_no, wait).await?;
        self.page.click_nth(selectors::ITEM_DELETE, position).await?;
        if !self.page.wait_for(selectors::DELETE_MODAL, wait).await? {
            return Err(DriverError::ElementNotFound {
                selector: selectors::DELETE_MODAL.to_string(),
            }
            .into());
        }
        self.page.fill(selectors::DELETE_COMMENT, self.comment).await?;
        self.page.click(selectors::DELETE_CONFIRM).await?;
        self.page.wait_for(selectors::ITEM_TABLE, wait).await?;
        let html = self.page.content().await?;
        if let Some(message) = error_banner(&html)? {
            return Err(OperationError::Navigation(q4mig_screens::ScreenError::Extraction(
                message,
            )));
        }
        Ok(())
    }

    async fn recover(&mut self) -> Result<(), OperationError> {
        self.nav.reload_items(self.page, self.group).await?;
        Ok(())
    }
}

pub async fn delete_section(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
    section: ContentSection,
) -> Result<OperationReport, OperationError> {
    let screen = section.screen();
    let page = session.page();
    let nav = ContentNavigator::new(session.urls().clone(), screen, ctx.navigation_policy())?;
    let mut report = OperationReport::new(Operation::Delete(section), site);

    let groups = if screen.grouped {
        nav.recover(page, ScreenState::GroupList).await?;
        let names = group_names(&page.content().await?)?;
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (Some(i), name))
            .collect::<Vec<_>>()
    } else {
        vec![(None, screen.label.to_string())]
    };

    for (group, name) in groups {
        let mut target = SectionDrain {
            page,
            nav: &nav,
            group,
            comment: &ctx.drain.delete_comment,
            first_deletable: None,
            pending_approval: 0,
        };
        let label = format!("{} / {name}", screen.label);
        let outcome = drain(&mut target, &ctx.drain, &label).await?;
        report.deleted += outcome.initial;
        report.failed += outcome.step_failures;
        report.skipped += target.pending_approval;
        if target.pending_approval > 0 {
            report.note(format!(
                "{name}: {} rows awaiting approval were left in place",
                target.pending_approval
            ));
        }
    }
    Ok(report)
}
