//! Source-site scrapers. Each walks a section's groups and pages, opens every row's edit
//! form and writes one snapshot per site.

use std::collections::BTreeMap;

use q4mig_core::{
    Analyst, AnalystsSnapshot, Committee, CommitteesSnapshot, ContentKind, Department, FaqList,
    FaqQuestion, FaqSnapshot, LookupEntry, LookupList, LookupListSnapshot, Person,
    PersonsSnapshot, SiteEntry,
};
use q4mig_screens::extract::{form_values, group_names, list_rows};
use q4mig_screens::pagination::{for_each_page, goto_page};
use q4mig_screens::{
    selectors, AdminPage, AdminSession, AdminUrls, ContentNavigator, ContentSection, FormField,
    ScreenError, ScreenState,
};
use q4mig_storage::{retry_bounded, BackoffPolicy};
use tracing::{debug, info, warn};

use crate::{mark_captured, site_key, OpContext, Operation, OperationError, OperationReport};

pub(crate) type Record = BTreeMap<String, String>;

/// Where a row sits in a paged item list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RowRef {
    pub page: u32,
    pub position: usize,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScrapedGroup {
    pub name: String,
    pub records: Vec<Record>,
}

pub(crate) fn value(record: &Record, key: &str) -> String {
    record.get(key).cloned().unwrap_or_default()
}

/// Every row of one item list, across all pages.
pub(crate) async fn survey_rows(
    page: &dyn AdminPage,
    nav: &ContentNavigator,
    group: Option<usize>,
) -> Result<Vec<RowRef>, OperationError> {
    nav.reload_items(page, group).await?;
    let mut rows = Vec::new();
    for_each_page(page, nav.policy().wait_timeout, |page_no, html| {
        rows.extend(list_rows(html)?.into_iter().map(|row| RowRef {
            page: page_no,
            position: row.position,
            title: row.title,
        }));
        Ok(())
    })
    .await?;
    Ok(rows)
}

/// Group names of a grouped section, in display order.
pub(crate) async fn read_groups(
    page: &dyn AdminPage,
    nav: &ContentNavigator,
) -> Result<Vec<String>, OperationError> {
    nav.recover(page, ScreenState::GroupList).await?;
    Ok(group_names(&page.content().await?)?)
}

/// Open `row`'s edit form from wherever the list currently is.
pub(crate) async fn open_row(
    page: &dyn AdminPage,
    nav: &ContentNavigator,
    group: Option<usize>,
    row: &RowRef,
) -> Result<(), OperationError> {
    let wait = nav.policy().wait_timeout;
    if nav.current(page).await? != ScreenState::ItemList {
        nav.reload_items(page, group).await?;
    }
    goto_page(page, row.page, wait).await?;
    page.click_nth(selectors::ITEM_EDIT, row.position).await?;
    page.wait_for(selectors::EDIT_FORM, wait).await?;
    match nav.current(page).await? {
        ScreenState::EditForm => Ok(()),
        reached => Err(ScreenError::StateNotReached {
            target: format!("{:?} for {}", ScreenState::EditForm, row.title),
            reached: format!("{reached:?}"),
        }
        .into()),
    }
}

async fn read_row(
    ctx: &OpContext,
    page: &dyn AdminPage,
    nav: &ContentNavigator,
    group: Option<usize>,
    row: &RowRef,
    fields: &[FormField],
) -> Result<Record, OperationError> {
    let policy = BackoffPolicy::fixed(ctx.retry.attempts, ctx.retry.delay);
    retry_bounded(
        &policy,
        "read row",
        |_| async move {
            open_row(page, nav, group, row).await?;
            let values = form_values(&page.content().await?, fields)?;
            nav.goto_state(page, ScreenState::ItemList).await?;
            Ok::<_, OperationError>(values)
        },
        |_| false,
    )
    .await
}

/// Scrape every record of `section`. Records missing `required` are reread up to
/// `retry.empty_answer_retries` more times before being kept as they are.
pub(crate) async fn scrape_section(
    ctx: &OpContext,
    session: &AdminSession,
    section: ContentSection,
    required: Option<&str>,
) -> Result<(Vec<ScrapedGroup>, usize), OperationError> {
    let screen = section.screen();
    let page = session.page();
    let nav = ContentNavigator::new(session.urls().clone(), screen, ctx.navigation_policy())?;

    let groups = if screen.grouped {
        read_groups(page, &nav)
            .await?
            .into_iter()
            .enumerate()
            .map(|(i, name)| (Some(i), name))
            .collect::<Vec<_>>()
    } else {
        vec![(None, String::new())]
    };

    let mut scraped = Vec::with_capacity(groups.len());
    let mut still_missing = 0usize;
    for (group, name) in groups {
        let rows = survey_rows(page, &nav, group).await?;
        debug!(group = %name, rows = rows.len(), "surveyed");
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = read_row(ctx, page, &nav, group, row, screen.fields).await?;
            if let Some(key) = required {
                let mut rereads = 0;
                while value(&record, key).is_empty() && rereads < ctx.retry.empty_answer_retries {
                    rereads += 1;
                    debug!(row = %row.title, rereads, "empty {key}; reopening");
                    record = read_row(ctx, page, &nav, group, row, screen.fields).await?;
                }
                if value(&record, key).is_empty() {
                    warn!(row = %row.title, "{key} still empty after {rereads} rereads");
                    still_missing += 1;
                }
            }
            records.push(record);
        }
        scraped.push(ScrapedGroup { name, records });
    }
    Ok((scraped, still_missing))
}

pub(crate) fn persons_from(groups: &[ScrapedGroup], urls: &AdminUrls) -> PersonsSnapshot {
    PersonsSnapshot {
        departments: groups
            .iter()
            .map(|g| Department {
                name: g.name.clone(),
                persons: g
                    .records
                    .iter()
                    .map(|r| Person {
                        first_name: value(r, "first_name"),
                        last_name: value(r, "last_name"),
                        title: value(r, "title"),
                        description: value(r, "description"),
                        photo_url: r.get("photo_url").map(|p| urls.absolute(p)),
                    })
                    .collect(),
            })
            .collect(),
    }
}

pub(crate) fn faq_from(groups: &[ScrapedGroup]) -> FaqSnapshot {
    let mut snapshot = FaqSnapshot {
        lists: groups
            .iter()
            .map(|g| FaqList {
                name: g.name.clone(),
                questions: g
                    .records
                    .iter()
                    .map(|r| FaqQuestion {
                        question: value(r, "question"),
                        answer: value(r, "answer"),
                    })
                    .collect(),
            })
            .collect(),
    };
    snapshot.apply_single_list_rule();
    snapshot
}

pub(crate) fn lookup_lists_from(groups: &[ScrapedGroup]) -> LookupListSnapshot {
    LookupListSnapshot {
        lists: groups
            .iter()
            .map(|g| LookupList {
                lookup_type: g.name.clone(),
                entries: g
                    .records
                    .iter()
                    .map(|r| LookupEntry {
                        text: value(r, "text"),
                        value: value(r, "value"),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn flat_records(groups: Vec<ScrapedGroup>) -> impl Iterator<Item = Record> {
    groups.into_iter().flat_map(|g| g.records)
}

pub(crate) fn analysts_from(groups: Vec<ScrapedGroup>) -> AnalystsSnapshot {
    AnalystsSnapshot {
        analysts: flat_records(groups)
            .map(|r| Analyst {
                firm: value(&r, "firm"),
                name: value(&r, "name"),
                location: value(&r, "location"),
                email: value(&r, "email"),
                phone: value(&r, "phone"),
            })
            .collect(),
    }
}

pub(crate) fn committees_from(groups: Vec<ScrapedGroup>) -> CommitteesSnapshot {
    CommitteesSnapshot {
        committees: flat_records(groups)
            .map(|r| Committee {
                name: value(&r, "name"),
                description: value(&r, "description"),
            })
            .collect(),
    }
}

fn record_count(groups: &[ScrapedGroup]) -> usize {
    groups.iter().map(|g| g.records.len()).sum()
}

pub async fn scrape_persons(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    let (groups, _) = scrape_section(ctx, session, ContentSection::Persons, None).await?;
    let snapshot = persons_from(&groups, session.urls());
    let mut report = OperationReport::new(Operation::ScrapePersons, site);
    report.created = record_count(&groups);
    report.note(format!(
        "{} persons in {} departments",
        report.created,
        snapshot.departments.len()
    ));
    let path = ctx.snapshots.write(site_key(site), snapshot).await?;
    mark_captured(ctx, site, ContentKind::Persons).await?;
    info!(path = %path.display(), "persons captured");
    Ok(report)
}

pub async fn scrape_faq(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    let (groups, empty_answers) =
        scrape_section(ctx, session, ContentSection::Faq, Some("answer")).await?;
    let snapshot = faq_from(&groups);
    let mut report = OperationReport::new(Operation::ScrapeFaq, site);
    report.created = snapshot.question_count();
    report.note(format!(
        "{} questions in {} lists",
        report.created,
        snapshot.lists.len()
    ));
    if empty_answers > 0 {
        report.note(format!("{empty_answers} questions kept with an empty answer"));
    }
    let path = ctx.snapshots.write(site_key(site), snapshot).await?;
    mark_captured(ctx, site, ContentKind::Faq).await?;
    info!(path = %path.display(), "faq captured");
    Ok(report)
}

pub async fn scrape_lookup_list(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    let (groups, _) = scrape_section(ctx, session, ContentSection::LookupList, None).await?;
    let snapshot = lookup_lists_from(&groups);
    let mut report = OperationReport::new(Operation::ScrapeLookupList, site);
    report.created = record_count(&groups);
    ctx.snapshots.write(site_key(site), snapshot).await?;
    mark_captured(ctx, site, ContentKind::LookupList).await?;
    Ok(report)
}

pub async fn scrape_analysts(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    let (groups, _) = scrape_section(ctx, session, ContentSection::Analysts, None).await?;
    let mut report = OperationReport::new(Operation::ScrapeAnalysts, site);
    report.created = record_count(&groups);
    ctx.snapshots
        .write(site_key(site), analysts_from(groups))
        .await?;
    mark_captured(ctx, site, ContentKind::Analysts).await?;
    Ok(report)
}

pub async fn scrape_committees(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    let (groups, _) = scrape_section(ctx, session, ContentSection::Committees, None).await?;
    let mut report = OperationReport::new(Operation::ScrapeCommittees, site);
    report.created = record_count(&groups);
    ctx.snapshots
        .write(site_key(site), committees_from(groups))
        .await?;
    mark_captured(ctx, site, ContentKind::Committees).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn persons_keep_departments_and_absolute_photos() {
        let groups = vec![ScrapedGroup {
            name: "Board of Directors".into(),
            records: vec![record(&[
                ("first_name", "Jane"),
                ("last_name", "Doe"),
                ("photo_url", "/files/jane.jpg"),
            ])],
        }];
        let snapshot = persons_from(&groups, &AdminUrls::new("https://old.example"));
        let jane = &snapshot.departments[0].persons[0];
        assert_eq!(jane.full_name(), "Jane Doe");
        assert_eq!(jane.title, "");
        assert_eq!(jane.photo_url.as_deref(), Some("https://old.example/files/jane.jpg"));
    }

    #[test]
    fn a_single_faq_list_takes_the_canonical_name() {
        let groups = vec![ScrapedGroup {
            name: "Investor Questions".into(),
            records: vec![record(&[("question", "When?"), ("answer", "Soon.")])],
        }];
        assert_eq!(faq_from(&groups).lists[0].name, q4mig_core::SINGLE_FAQ_LIST_NAME);

        let two = vec![groups[0].clone(), ScrapedGroup {
            name: "Governance".into(),
            records: vec![],
        }];
        assert_eq!(faq_from(&two).lists[0].name, "Investor Questions");
    }

    #[test]
    fn flat_sections_concatenate_records() {
        let groups = vec![ScrapedGroup {
            name: String::new(),
            records: vec![
                record(&[("name", "Audit"), ("description", "<p>Oversight</p>")]),
                record(&[("name", "Compensation")]),
            ],
        }];
        let committees = committees_from(groups);
        assert_eq!(committees.committees.len(), 2);
        assert_eq!(committees.committees[1].description, "");
    }

    #[test]
    fn lookup_lists_keep_one_list_per_type() {
        let groups = vec![
            ScrapedGroup {
                name: "Document Category".into(),
                records: vec![
                    record(&[("text", "Annual Report"), ("value", "annual")]),
                    record(&[("text", "Proxy")]),
                ],
            },
            ScrapedGroup {
                name: "Event Type".into(),
                records: vec![],
            },
        ];
        let snapshot = lookup_lists_from(&groups);
        assert_eq!(snapshot.lists.len(), 2);
        assert_eq!(snapshot.lists[0].lookup_type, "Document Category");
        assert_eq!(snapshot.lists[0].entries[1].text, "Proxy");
        assert_eq!(snapshot.lists[0].entries[1].value, "");
        assert!(snapshot.lists[1].entries.is_empty());
    }
}
