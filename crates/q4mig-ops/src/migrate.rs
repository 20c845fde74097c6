//! Destination migrators: diff a snapshot against what the admin already lists and create
//! the missing items one at a time, confirming each save.

use std::collections::BTreeSet;

use q4mig_core::{
    normalize_name, AnalystCommitteeLlm, CommitteeAssignment, FaqSnapshot, LookupListSnapshot,
    PersonsMergedSnapshot, SiteEntry,
};
use q4mig_screens::extract::{
    committee_assignments, error_banner, group_names, has_success_banner, select_options,
};
use q4mig_screens::{
    selectors, AdminPage, AdminSession, ContentNavigator, ContentScreen, ContentSection,
    DriverError, FieldKind, ScreenError,
};
use q4mig_storage::{retry_bounded, BackoffPolicy};
use tracing::{debug, info, warn};

use crate::scrape::{read_groups, survey_rows, Record};
use crate::{site_key, OpContext, Operation, OperationError, OperationReport};

/// One item to create if the destination does not list it yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Planned {
    pub values: Record,
    pub assignments: Vec<CommitteeAssignment>,
}

impl Planned {
    fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: pairs
                .iter()
                .filter(|(_, v)| !v.trim().is_empty())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            assignments: Vec::new(),
        }
    }

    /// Title the item table will show for this item.
    pub fn title(&self, screen: &ContentScreen) -> String {
        screen
            .title_keys
            .iter()
            .filter_map(|k| self.values.get(*k))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannedGroup {
    /// `None` for sections without groups.
    pub name: Option<String>,
    pub items: Vec<Planned>,
}

/// Items a migration plan could not include, with the reason.
pub(crate) type Excluded = Vec<String>;

pub(crate) fn plan_committees(llm: &AnalystCommitteeLlm) -> Vec<PlannedGroup> {
    vec![PlannedGroup {
        name: None,
        items: llm
            .committees
            .iter()
            .map(|c| Planned::new(&[("name", c.name.as_str()), ("description", c.description.as_str())]))
            .collect(),
    }]
}

pub(crate) fn plan_analysts(llm: &AnalystCommitteeLlm) -> Vec<PlannedGroup> {
    vec![PlannedGroup {
        name: None,
        items: llm
            .analysts
            .iter()
            .map(|a| {
                Planned::new(&[
                    ("firm", a.firm.as_str()),
                    ("name", a.name.as_str()),
                    ("location", a.location.as_str()),
                    ("email", a.email.as_str()),
                    ("phone", a.phone.as_str()),
                ])
            })
            .collect(),
    }]
}

/// Questions whose answer never rendered are left out.
pub(crate) fn plan_faq(faq: &FaqSnapshot) -> (Vec<PlannedGroup>, Excluded) {
    let mut excluded = Vec::new();
    let groups = faq
        .lists
        .iter()
        .map(|list| PlannedGroup {
            name: Some(list.name.clone()),
            items: list
                .questions
                .iter()
                .filter(|q| {
                    let keep = !q.answer.trim().is_empty();
                    if !keep {
                        excluded.push(format!("{}: empty answer for {:?}", list.name, q.question));
                    }
                    keep
                })
                .map(|q| Planned::new(&[("question", q.question.as_str()), ("answer", q.answer.as_str())]))
                .collect(),
        })
        .collect();
    (groups, excluded)
}

pub(crate) fn plan_lookup_lists(lookup: &LookupListSnapshot) -> Vec<PlannedGroup> {
    lookup
        .lists
        .iter()
        .map(|list| PlannedGroup {
            name: Some(list.lookup_type.clone()),
            items: list
                .entries
                .iter()
                .map(|e| Planned::new(&[("text", e.text.as_str()), ("value", e.value.as_str())]))
                .collect(),
        })
        .collect()
}

pub(crate) fn plan_persons(merged: &PersonsMergedSnapshot) -> Vec<PlannedGroup> {
    merged
        .departments
        .iter()
        .map(|department| PlannedGroup {
            name: Some(department.name.clone()),
            items: department
                .persons
                .iter()
                .map(|m| {
                    let p = &m.person;
                    let mut planned = Planned::new(&[
                        ("first_name", p.first_name.as_str()),
                        ("last_name", p.last_name.as_str()),
                        ("title", p.title.as_str()),
                        ("description", p.description.as_str()),
                    ]);
                    planned.assignments = m.committees.clone();
                    planned
                })
                .collect(),
        })
        .collect()
}

/// Index of the group called `name`, creating it when missing.
async fn ensure_group(
    page: &dyn AdminPage,
    nav: &ContentNavigator,
    name: &str,
) -> Result<(usize, bool), OperationError> {
    let wanted = normalize_name(name);
    let existing = read_groups(page, nav).await?;
    if let Some(index) = existing.iter().position(|g| normalize_name(g) == wanted) {
        return Ok((index, false));
    }

    let wait = nav.policy().wait_timeout;
    page.click(selectors::ADD_GROUP).await?;
    if !page.wait_for(selectors::GROUP_NAME, wait).await? {
        return Err(DriverError::ElementNotFound {
            selector: selectors::GROUP_NAME.to_string(),
        }
        .into());
    }
    page.fill(selectors::GROUP_NAME, name).await?;
    page.click(selectors::SAVE).await?;
    page.wait_for(selectors::GROUP_TABLE, wait).await?;
    let html = page.content().await?;
    group_names(&html)?
        .iter()
        .position(|g| normalize_name(g) == wanted)
        .map(|index| (index, true))
        .ok_or_else(|| {
            let reason = error_banner(&html).ok().flatten().unwrap_or_default();
            ScreenError::Extraction(format!("group {name} was not created {reason}").trim_end().to_string())
                .into()
        })
}

/// Fill and save one new item. Returns the committee assignments the form did not offer.
async fn create_item(
    page: &dyn AdminPage,
    nav: &ContentNavigator,
    group: Option<usize>,
    item: &Planned,
) -> Result<Vec<String>, OperationError> {
    let wait = nav.policy().wait_timeout;
    nav.reload_items(page, group).await?;
    page.click(selectors::ADD_NEW).await?;
    if !page.wait_for(selectors::EDIT_FORM, wait).await? {
        return Err(DriverError::ElementNotFound {
            selector: selectors::EDIT_FORM.to_string(),
        }
        .into());
    }

    for field in nav.screen().fields {
        let Some(value) = item.values.get(field.key) else {
            continue;
        };
        match field.kind {
            FieldKind::Text | FieldKind::RichText => page.fill(field.selector, value).await?,
            FieldKind::Select => page.select_option(field.selector, value).await?,
            FieldKind::ImagePreview => {}
        }
    }

    let mut unavailable = Vec::new();
    if !item.assignments.is_empty() {
        let offered = select_options(&page.content().await?, selectors::COMMITTEE_SELECT)?;
        for assignment in &item.assignments {
            if !offered.iter().any(|o| o == &assignment.committee) {
                unavailable.push(assignment.committee.clone());
                continue;
            }
            page.select_option(selectors::COMMITTEE_SELECT, &assignment.committee)
                .await?;
            page.select_option(selectors::COMMITTEE_ROLE_SELECT, assignment.role.label())
                .await?;
            page.click(selectors::COMMITTEE_ADD).await?;
        }
        let listed = committee_assignments(&page.content().await?)?;
        for assignment in &item.assignments {
            let entry = format!("{} ({})", assignment.committee, assignment.role.label());
            if !listed.contains(&entry) && !unavailable.contains(&assignment.committee) {
                warn!(assignment = %entry, "committee role not listed after adding");
                unavailable.push(assignment.committee.clone());
            }
        }
    }

    page.click(selectors::SAVE).await?;
    page.wait_for(selectors::SUCCESS_BANNER, wait).await?;
    let html = page.content().await?;
    if has_success_banner(&html)? {
        Ok(unavailable)
    } else {
        let reason = error_banner(&html)?.unwrap_or_else(|| "no save confirmation".to_string());
        Err(ScreenError::Extraction(reason).into())
    }
}

async fn listed_titles(
    page: &dyn AdminPage,
    nav: &ContentNavigator,
    group: Option<usize>,
) -> Result<BTreeSet<String>, OperationError> {
    Ok(survey_rows(page, nav, group)
        .await?
        .into_iter()
        .map(|row| normalize_name(&row.title))
        .collect())
}

/// Create every planned item the destination does not list yet.
pub(crate) async fn migrate_section(
    ctx: &OpContext,
    session: &AdminSession,
    section: ContentSection,
    plan: Vec<PlannedGroup>,
    report: &mut OperationReport,
) -> Result<(), OperationError> {
    let screen = section.screen();
    let page = session.page();
    let nav = ContentNavigator::new(session.urls().clone(), screen, ctx.navigation_policy())?;
    let policy = BackoffPolicy::fixed(ctx.retry.attempts, ctx.retry.delay);

    for planned_group in plan {
        let group = match &planned_group.name {
            Some(name) => {
                let (index, created) = ensure_group(page, &nav, name).await?;
                if created {
                    report.note(format!("created {} group {name}", screen.label));
                }
                Some(index)
            }
            None => None,
        };
        let mut listed = listed_titles(page, &nav, group).await?;

        for item in &planned_group.items {
            let title = item.title(screen);
            let key = normalize_name(&title);
            if key.is_empty() {
                report.failed += 1;
                report.note(format!("{} without a title was not created", screen.label));
                continue;
            }
            if listed.contains(&key) {
                debug!(%title, "already present");
                report.skipped += 1;
                continue;
            }

            let nav_ref = &nav;
            let key_ref = &key;
            let outcome = retry_bounded(
                &policy,
                "create item",
                |attempt| async move {
                    if attempt > 0 && listed_titles(page, nav_ref, group).await?.contains(key_ref) {
                        return Ok(Vec::new());
                    }
                    create_item(page, nav_ref, group, item).await
                },
                |_| false,
            )
            .await;

            match outcome {
                Ok(unavailable) => {
                    report.created += 1;
                    for committee in unavailable {
                        report.note(format!("{title}: committee {committee} is not offered"));
                    }
                    listed.insert(key);
                }
                Err(err) => {
                    warn!(%title, error = %err, "creation failed");
                    report.failed += 1;
                    report.note(format!("{title}: {err}"));
                }
            }
        }
    }
    Ok(())
}

async fn run_plan(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
    operation: Operation,
    section: ContentSection,
    plan: Vec<PlannedGroup>,
) -> Result<OperationReport, OperationError> {
    let mut report = OperationReport::new(operation, site);
    migrate_section(ctx, session, section, plan, &mut report).await?;
    info!(
        created = report.created,
        skipped = report.skipped,
        failed = report.failed,
        "{} migration finished",
        section.screen().label
    );
    Ok(report)
}

pub async fn migrate_committees(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    let llm = ctx.snapshots.read::<AnalystCommitteeLlm>(site_key(site)).await?;
    let plan = plan_committees(&llm.payload);
    run_plan(ctx, site, session, Operation::MigrateCommittees, ContentSection::Committees, plan).await
}

pub async fn migrate_analysts(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    let llm = ctx.snapshots.read::<AnalystCommitteeLlm>(site_key(site)).await?;
    let plan = plan_analysts(&llm.payload);
    run_plan(ctx, site, session, Operation::MigrateAnalysts, ContentSection::Analysts, plan).await
}

pub async fn migrate_faq(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    let mut faq = ctx.snapshots.read::<FaqSnapshot>(site_key(site)).await?.payload;
    faq.apply_single_list_rule();
    let (plan, excluded) = plan_faq(&faq);
    let mut report = run_plan(ctx, site, session, Operation::MigrateFaq, ContentSection::Faq, plan).await?;
    report.skipped += excluded.len();
    for reason in excluded {
        report.note(reason);
    }
    Ok(report)
}

pub async fn migrate_lookup_list(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    let lookup = ctx.snapshots.read::<LookupListSnapshot>(site_key(site)).await?;
    let plan = plan_lookup_lists(&lookup.payload);
    run_plan(ctx, site, session, Operation::MigrateLookupList, ContentSection::LookupList, plan).await
}

pub async fn migrate_persons(
    ctx: &OpContext,
    site: &SiteEntry,
    session: &AdminSession,
) -> Result<OperationReport, OperationError> {
    let merged = ctx.snapshots.read::<PersonsMergedSnapshot>(site_key(site)).await?;
    let plan = plan_persons(&merged.payload);
    run_plan(ctx, site, session, Operation::MigratePersons, ContentSection::Persons, plan).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use q4mig_core::{
        Analyst, CommitteeRole, FaqList, FaqQuestion, LookupEntry, LookupList, MergedDepartment,
        MergedPerson, Person,
    };

    #[test]
    fn faq_plan_drops_empty_answers() {
        let faq = FaqSnapshot {
            lists: vec![FaqList {
                name: "Frequently Asked Questions".into(),
                questions: vec![
                    FaqQuestion { question: "Who is the transfer agent?".into(), answer: "Computershare.".into() },
                    FaqQuestion { question: "When is the AGM?".into(), answer: "   ".into() },
                ],
            }],
        };
        let (plan, excluded) = plan_faq(&faq);
        assert_eq!(plan[0].items.len(), 1);
        assert_eq!(plan[0].name.as_deref(), Some("Frequently Asked Questions"));
        assert_eq!(excluded.len(), 1);
        assert!(excluded[0].contains("When is the AGM?"));
    }

    #[test]
    fn person_titles_follow_the_list_columns() {
        let merged = PersonsMergedSnapshot {
            departments: vec![MergedDepartment {
                name: "Executive Management".into(),
                persons: vec![MergedPerson {
                    person: Person {
                        first_name: "Ann".into(),
                        last_name: "Lee".into(),
                        title: String::new(),
                        ..Person::default()
                    },
                    committees: vec![CommitteeAssignment {
                        committee: "Audit".into(),
                        role: CommitteeRole::ViceChair,
                    }],
                    name_match: None,
                }],
            }],
            unmatched_llm_names: vec![],
        };
        let plan = plan_persons(&merged);
        let ann = &plan[0].items[0];
        assert_eq!(ann.title(ContentSection::Persons.screen()), "Ann Lee");
        assert!(!ann.values.contains_key("title"));
        assert_eq!(ann.assignments[0].role.label(), "Vice Chair");
    }

    #[test]
    fn flat_plans_have_a_single_unnamed_group() {
        let llm = AnalystCommitteeLlm {
            committees: vec![],
            analysts: vec![Analyst {
                firm: "Raymond James".into(),
                name: "Pat Kim".into(),
                ..Analyst::default()
            }],
        };
        let plan = plan_analysts(&llm);
        assert_eq!(plan.len(), 1);
        assert!(plan[0].name.is_none());
        assert_eq!(plan[0].items[0].title(ContentSection::Analysts.screen()), "Pat Kim");
        assert!(plan_committees(&llm)[0].items.is_empty());
    }

    #[test]
    fn lookup_entries_are_titled_by_their_text() {
        let lookup = LookupListSnapshot {
            lists: vec![LookupList {
                lookup_type: "Document Category".into(),
                entries: vec![
                    LookupEntry { text: "Annual Report".into(), value: "annual".into() },
                    LookupEntry { text: "Proxy".into(), value: String::new() },
                ],
            }],
        };
        let plan = plan_lookup_lists(&lookup);
        assert_eq!(plan[0].name.as_deref(), Some("Document Category"));
        let screen = ContentSection::LookupList.screen();
        assert_eq!(plan[0].items[0].title(screen), "Annual Report");
        assert!(!plan[0].items[1].values.contains_key("value"));
    }
}
