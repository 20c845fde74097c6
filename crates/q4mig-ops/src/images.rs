//! Person photo migration: download, cache by content hash, upload through the edit form.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use q4mig_core::{normalize_name, PersonsMergedSnapshot, SiteEntry};
use q4mig_screens::extract::{error_banner, form_values, has_success_banner};
use q4mig_screens::{selectors, AdminPage, AdminSession, ContentNavigator, ContentSection, ScreenError, ScreenState};
use q4mig_storage::{image_extension, retry_bounded, BackoffPolicy, HttpFetcher, SnapshotError};
use tracing::{debug, info, warn};

use crate::scrape::{open_row, read_groups, survey_rows, RowRef};
use crate::{site_key, OpContext, Operation, OperationError, OperationReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Where person photos come from.
#[async_trait]
pub trait PhotoSource: Send + Sync {
    async fn fetch_photo(&self, site: &str, url: &str) -> anyhow::Result<Photo>;
}

#[async_trait]
impl PhotoSource for HttpFetcher {
    async fn fetch_photo(&self, site: &str, url: &str) -> anyhow::Result<Photo> {
        let response = self
            .fetch_bytes(site, url)
            .await
            .with_context(|| format!("downloading photo {url}"))?;
        if response.body.is_empty() {
            anyhow::bail!("photo {url} is empty");
        }
        Ok(Photo {
            bytes: response.body,
            content_type: response.content_type,
        })
    }
}

const IMAGE_DIR: &str = "images";

pub async fn migrate_person_images(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    let key = site_key(site);
    let merged = ctx.snapshots.read::<PersonsMergedSnapshot>(key).await?.payload;
    let page = session.page();
    let screen = ContentSection::Persons.screen();
    let nav = ContentNavigator::new(session.urls().clone(), screen, ctx.navigation_policy())?;
    let wait = nav.policy().wait_timeout;
    let mut report = OperationReport::new(Operation::MigratePersonImages, site);

    let groups = read_groups(page, &nav).await?;
    for department in &merged.departments {
        let Some(group) = groups
            .iter()
            .position(|g| normalize_name(g) == normalize_name(&department.name))
        else {
            report.skipped += department.persons.len();
            report.note(format!("department {} is missing at the destination", department.name));
            continue;
        };
        let rows = survey_rows(page, &nav, Some(group)).await?;

        for merged_person in &department.persons {
            let person = &merged_person.person;
            let name = person.full_name();
            let Some(url) = person.photo_url.as_deref().filter(|u| !u.trim().is_empty()) else {
                report.skipped += 1;
                continue;
            };
            let Some(row) = rows
                .iter()
                .find(|r| normalize_name(&r.title) == normalize_name(&name))
            else {
                report.failed += 1;
                report.note(format!("{name}: no destination row"));
                continue;
            };

            open_row(page, &nav, Some(group), row).await?;
            let current = form_values(&page.content().await?, screen.fields)?;
            if current.contains_key("photo_url") {
                debug!(person = %name, "photo already present");
                report.skipped += 1;
                nav.goto_state(page, ScreenState::ItemList).await?;
                continue;
            }

            let photo = match ctx.photos.fetch_photo(key, url).await {
                Ok(photo) => photo,
                Err(err) => {
                    warn!(person = %name, error = %err, "photo download failed");
                    report.failed += 1;
                    report.note(format!("{name}: {err:#}"));
                    nav.goto_state(page, ScreenState::ItemList).await?;
                    continue;
                }
            };
            let extension = image_extension(photo.content_type.as_deref(), url);
            let blob = ctx
                .snapshots
                .store_blob(key, IMAGE_DIR, extension, &photo.bytes)
                .await
                .map_err(SnapshotError::from)?;
            debug!(person = %name, hash = %blob.content_hash, deduplicated = blob.deduplicated, "photo cached");

            let policy = BackoffPolicy::fixed(ctx.retry.attempts, ctx.retry.delay);
            let path = blob.absolute_path.as_path();
            let nav_ref = &nav;
            let uploaded = retry_bounded(
                &policy,
                "upload photo",
                |attempt| async move {
                    if attempt > 0 || nav_ref.current(page).await? != ScreenState::EditForm {
                        open_row(page, nav_ref, Some(group), row).await?;
                    }
                    upload_and_save(page, row, path, wait).await
                },
                |_| false,
            )
            .await;
            match uploaded {
                Ok(()) => report.created += 1,
                Err(err) => {
                    report.failed += 1;
                    report.note(format!("{name}: {err}"));
                    nav.reload_items(page, Some(group)).await?;
                }
            }
        }
    }

    info!(uploaded = report.created, skipped = report.skipped, failed = report.failed, "person photos migrated");
    Ok(report)
}

async fn upload_and_save(
    page: &dyn AdminPage,
    row: &RowRef,
    path: &Path,
    wait: Duration,
) -> Result<(), OperationError> {
    page.upload_file(selectors::PHOTO_UPLOAD, path).await?;
    page.click(selectors::SAVE).await?;
    page.wait_for(selectors::SUCCESS_BANNER, wait).await?;
    let html = page.content().await?;
    if has_success_banner(&html)? {
        return Ok(());
    }
    let reason = error_banner(&html)?.unwrap_or_else(|| "no save confirmation".to_string());
    Err(ScreenError::Extraction(format!("saving photo for {}: {reason}", row.title)).into())
}
