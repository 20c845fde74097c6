//! Page-state detection and table-driven navigation between screens.

use std::fmt::Debug;
use std::time::Duration;

use q4mig_storage::{retry_bounded, BackoffPolicy};
use scraper::{Html, Selector};
use tracing::debug;

use crate::selectors;
use crate::{parse_selector, AdminPage, ScreenError};

/// Screens shared by every content section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenState {
    Landing,
    GroupList,
    ItemList,
    EditForm,
}

struct StateRule<S> {
    state: S,
    raw: Vec<&'static str>,
    all_of: Vec<Selector>,
}

/// Priority-ordered rules; the first rule whose selectors are all present wins,
/// otherwise the fallback state is reported.
pub struct StateDetector<S> {
    rules: Vec<StateRule<S>>,
    fallback: S,
}

impl<S: Copy + PartialEq + Debug> StateDetector<S> {
    pub fn new(fallback: S) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    pub fn rule(mut self, state: S, all_of: &[&'static str]) -> Result<Self, ScreenError> {
        let parsed = all_of
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<Vec<_>, _>>()?;
        self.rules.push(StateRule {
            state,
            raw: all_of.to_vec(),
            all_of: parsed,
        });
        Ok(self)
    }

    pub fn fallback(&self) -> S {
        self.fallback
    }

    pub fn detect(&self, html: &str) -> S {
        let document = Html::parse_document(html);
        self.rules
            .iter()
            .find(|rule| Self::rule_matches(&document, rule))
            .map(|rule| rule.state)
            .unwrap_or(self.fallback)
    }

    /// Every rule that matches; more than one means the rule set is ambiguous.
    pub fn matching(&self, html: &str) -> Vec<S> {
        let document = Html::parse_document(html);
        self.rules
            .iter()
            .filter(|rule| Self::rule_matches(&document, rule))
            .map(|rule| rule.state)
            .collect()
    }

    /// First selector of the rule for `state`, used to wait for the screen to render.
    pub fn anchor_for(&self, state: S) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|rule| rule.state == state)
            .and_then(|rule| rule.raw.first().copied())
    }

    fn rule_matches(document: &Html, rule: &StateRule<S>) -> bool {
        !rule.all_of.is_empty()
            && rule
                .all_of
                .iter()
                .all(|sel| document.select(sel).next().is_some())
    }
}

pub fn content_detector() -> Result<StateDetector<ScreenState>, ScreenError> {
    StateDetector::new(ScreenState::Landing)
        .rule(ScreenState::EditForm, &[selectors::EDIT_FORM])?
        .rule(ScreenState::ItemList, &[selectors::ITEM_TABLE])?
        .rule(ScreenState::GroupList, &[selectors::GROUP_TABLE])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionAction {
    Goto(String),
    Click(&'static str),
}

/// `(from, to) -> action`. A `None` source matches any current state; an exact source wins
/// over a wildcard.
pub struct TransitionTable<S> {
    entries: Vec<(Option<S>, S, TransitionAction)>,
}

impl<S: Copy + PartialEq> Default for TransitionTable<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<S: Copy + PartialEq> TransitionTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, from: S, to: S, action: TransitionAction) -> Self {
        self.entries.push((Some(from), to, action));
        self
    }

    pub fn from_any(mut self, to: S, action: TransitionAction) -> Self {
        self.entries.push((None, to, action));
        self
    }

    pub fn action(&self, from: S, to: S) -> Option<&TransitionAction> {
        self.entries
            .iter()
            .find(|(f, t, _)| *f == Some(from) && *t == to)
            .or_else(|| self.entries.iter().find(|(f, t, _)| f.is_none() && *t == to))
            .map(|(_, _, action)| action)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NavigationPolicy {
    pub backoff: BackoffPolicy,
    pub wait_timeout: Duration,
}

impl Default for NavigationPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::fixed(3, Duration::from_millis(750)),
            wait_timeout: Duration::from_secs(5),
        }
    }
}

impl NavigationPolicy {
    /// No waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            backoff: BackoffPolicy::fixed(3, Duration::ZERO),
            wait_timeout: Duration::ZERO,
        }
    }
}

pub async fn detect_current<S: Copy + PartialEq + Debug>(
    page: &dyn AdminPage,
    detector: &StateDetector<S>,
) -> Result<S, ScreenError> {
    let html = page.content().await?;
    Ok(detector.detect(&html))
}

/// Drive `page` to `target`, re-detecting after every attempt. An undefined transition
/// fails at once; otherwise up to `policy.backoff.max_attempts` attempts are made.
pub async fn navigate_to<S>(
    page: &dyn AdminPage,
    detector: &StateDetector<S>,
    table: &TransitionTable<S>,
    target: S,
    policy: &NavigationPolicy,
) -> Result<(), ScreenError>
where
    S: Copy + PartialEq + Debug + Send + Sync,
{
    retry_bounded(
        &policy.backoff,
        "navigate",
        |attempt| async move {
            let current = detect_current(page, detector).await?;
            if current == target {
                return Ok(());
            }
            let action = table
                .action(current, target)
                .ok_or_else(|| ScreenError::NoTransition {
                    from: format!("{current:?}"),
                    to: format!("{target:?}"),
                })?;
            debug!(?current, ?target, attempt, ?action, "transition");
            match action {
                TransitionAction::Goto(url) => page.goto(url).await?,
                TransitionAction::Click(selector) => page.click(selector).await?,
            }
            if let Some(anchor) = detector.anchor_for(target) {
                page.wait_for(anchor, policy.wait_timeout).await?;
            }
            let reached = detect_current(page, detector).await?;
            if reached == target {
                Ok(())
            } else {
                Err(ScreenError::StateNotReached {
                    target: format!("{target:?}"),
                    reached: format!("{reached:?}"),
                })
            }
        },
        |err| matches!(err, ScreenError::NoTransition { .. }),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeAdmin, FakeGroup, FakeItem, FakeSection};
    use crate::{AdminUrls, ContentSection};

    const EDIT: &str = "<html><body><form id='editForm'></form></body></html>";
    const ITEMS: &str = "<html><body><table class='module-items'></table></body></html>";
    const GROUPS: &str = "<html><body><table class='module-groups'></table></body></html>";
    const LANDING: &str = "<html><body><nav id='adminNav'></nav></body></html>";

    #[test]
    fn detector_reports_the_single_matching_state() {
        let detector = content_detector().unwrap();
        assert_eq!(detector.detect(EDIT), ScreenState::EditForm);
        assert_eq!(detector.detect(ITEMS), ScreenState::ItemList);
        assert_eq!(detector.detect(GROUPS), ScreenState::GroupList);
        assert_eq!(detector.detect(LANDING), ScreenState::Landing);
        for html in [EDIT, ITEMS, GROUPS, LANDING] {
            assert!(detector.matching(html).len() <= 1);
        }
    }

    #[test]
    fn detector_requires_all_selectors_of_a_rule() {
        #[derive(Debug, Clone, Copy, PartialEq)]
        enum Modal {
            Closed,
            Open,
        }
        let detector = StateDetector::new(Modal::Closed)
            .rule(Modal::Open, &["#deleteModal", "#txtComments"])
            .unwrap();
        assert_eq!(detector.detect("<div id='deleteModal'></div>"), Modal::Closed);
        assert_eq!(
            detector.detect("<div id='deleteModal'><textarea id='txtComments'></textarea></div>"),
            Modal::Open
        );
    }

    #[test]
    fn exact_transitions_win_over_wildcards() {
        let table = TransitionTable::new()
            .from_any(ScreenState::Landing, TransitionAction::Goto("/home".into()))
            .on(
                ScreenState::EditForm,
                ScreenState::Landing,
                TransitionAction::Click("#btnCancel"),
            );
        assert_eq!(
            table.action(ScreenState::EditForm, ScreenState::Landing),
            Some(&TransitionAction::Click("#btnCancel"))
        );
        assert_eq!(
            table.action(ScreenState::ItemList, ScreenState::Landing),
            Some(&TransitionAction::Goto("/home".into()))
        );
        assert_eq!(table.action(ScreenState::Landing, ScreenState::EditForm), None);
    }

    fn faq_admin() -> FakeAdmin {
        FakeAdmin::logged_in().with_section(
            ContentSection::Faq,
            FakeSection::grouped(vec![FakeGroup::new(
                "General",
                vec![FakeItem::new(&[("question", "Q1"), ("answer", "A1")])],
            )]),
        )
    }

    #[tokio::test]
    async fn navigation_follows_the_table() {
        let admin = faq_admin();
        let urls = AdminUrls::new("https://acme.example");
        let nav = crate::ContentNavigator::new(
            urls,
            ContentSection::Faq.screen(),
            NavigationPolicy::immediate(),
        )
        .unwrap();

        nav.goto_state(&admin, ScreenState::GroupList).await.unwrap();
        assert_eq!(detect_current(&admin, nav.detector()).await.unwrap(), ScreenState::GroupList);
        nav.open_group(&admin, 0).await.unwrap();
        nav.goto_state(&admin, ScreenState::GroupList).await.unwrap();
        nav.goto_state(&admin, ScreenState::Landing).await.unwrap();
    }

    #[tokio::test]
    async fn undefined_transition_fails_without_retrying() {
        let admin = faq_admin();
        let nav = crate::ContentNavigator::new(
            AdminUrls::new("https://acme.example"),
            ContentSection::Faq.screen(),
            NavigationPolicy::immediate(),
        )
        .unwrap();
        nav.goto_state(&admin, ScreenState::GroupList).await.unwrap();
        let before = admin.action_log().len();

        let err = nav.goto_state(&admin, ScreenState::EditForm).await.unwrap_err();
        assert!(matches!(err, ScreenError::NoTransition { .. }));
        assert_eq!(admin.action_log().len(), before);
    }

    #[tokio::test]
    async fn unreachable_state_exhausts_attempts() {
        let admin = FakeAdmin::logged_in();
        let detector = content_detector().unwrap();
        let table = TransitionTable::new().on(
            ScreenState::Landing,
            ScreenState::ItemList,
            TransitionAction::Goto("https://acme.example/nowhere".into()),
        );
        let err = navigate_to(
            &admin,
            &detector,
            &table,
            ScreenState::ItemList,
            &NavigationPolicy::immediate(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScreenError::StateNotReached { .. }));
        let gotos = admin
            .action_log()
            .iter()
            .filter(|a| a.starts_with("goto"))
            .count();
        assert_eq!(gotos, 3);
    }
}
