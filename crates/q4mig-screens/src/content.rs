//! Content sections of the admin and navigation within one section.

use crate::selectors;
use crate::state::{navigate_to, NavigationPolicy, ScreenState, StateDetector, TransitionAction, TransitionTable};
use crate::{content_detector, AdminPage, ScreenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    RichText,
    Select,
    /// Read-only `<img>` whose `src` is the stored file.
    ImagePreview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormField {
    pub key: &'static str,
    pub selector: &'static str,
    pub kind: FieldKind,
}

const fn text(key: &'static str, selector: &'static str) -> FormField {
    FormField {
        key,
        selector,
        kind: FieldKind::Text,
    }
}

const fn rich(key: &'static str, selector: &'static str) -> FormField {
    FormField {
        key,
        selector,
        kind: FieldKind::RichText,
    }
}

/// Capability description of one content section: everything the generic list,
/// delete and create routines need to know about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentScreen {
    pub label: &'static str,
    pub section_id: &'static str,
    pub grouped: bool,
    pub fields: &'static [FormField],
    /// Field keys joined with a space give the row title shown in the item table.
    pub title_keys: &'static [&'static str],
}

impl ContentScreen {
    pub fn field(&self, key: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.key == key)
    }
}

pub const PERSONS: ContentScreen = ContentScreen {
    label: "person",
    section_id: "persons",
    grouped: true,
    fields: &[
        text("first_name", "#txtFirstName"),
        text("last_name", "#txtLastName"),
        text("title", "#txtTitle"),
        rich("description", "#txtDescription"),
        FormField {
            key: "photo_url",
            selector: "img#imgPhotoPreview",
            kind: FieldKind::ImagePreview,
        },
    ],
    title_keys: &["first_name", "last_name"],
};

pub const FAQ: ContentScreen = ContentScreen {
    label: "faq question",
    section_id: "faq",
    grouped: true,
    fields: &[text("question", "#txtQuestion"), rich("answer", "#txtAnswer")],
    title_keys: &["question"],
};

pub const LOOKUP_LIST: ContentScreen = ContentScreen {
    label: "lookup entry",
    section_id: "lookup-list",
    grouped: true,
    fields: &[text("text", "#txtLookupText"), text("value", "#txtLookupValue")],
    title_keys: &["text"],
};

pub const ANALYSTS: ContentScreen = ContentScreen {
    label: "analyst",
    section_id: "analysts",
    grouped: false,
    fields: &[
        text("firm", "#txtFirm"),
        text("name", "#txtAnalystName"),
        text("location", "#txtLocation"),
        text("email", "#txtEmail"),
        text("phone", "#txtPhone"),
    ],
    title_keys: &["name"],
};

pub const COMMITTEES: ContentScreen = ContentScreen {
    label: "committee",
    section_id: "committees",
    grouped: false,
    fields: &[
        text("name", "#txtCommitteeName"),
        rich("description", "#txtCommitteeDescription"),
    ],
    title_keys: &["name"],
};

const TITLE_ONLY: &[FormField] = &[text("title", "#txtTitle")];

pub const DOWNLOAD_LISTS: ContentScreen = ContentScreen {
    label: "download list document",
    section_id: "download-lists",
    grouped: true,
    fields: TITLE_ONLY,
    title_keys: &["title"],
};

pub const EVENTS: ContentScreen = ContentScreen {
    label: "event",
    section_id: "events",
    grouped: false,
    fields: TITLE_ONLY,
    title_keys: &["title"],
};

pub const PRESENTATIONS: ContentScreen = ContentScreen {
    label: "presentation",
    section_id: "presentations",
    grouped: false,
    fields: TITLE_ONLY,
    title_keys: &["title"],
};

pub const PRESS_RELEASES: ContentScreen = ContentScreen {
    label: "press release",
    section_id: "press-releases",
    grouped: false,
    fields: TITLE_ONLY,
    title_keys: &["title"],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentSection {
    Persons,
    Faq,
    LookupList,
    Analysts,
    Committees,
    DownloadLists,
    Events,
    Presentations,
    PressReleases,
}

impl ContentSection {
    pub const ALL: [ContentSection; 9] = [
        ContentSection::Persons,
        ContentSection::Faq,
        ContentSection::LookupList,
        ContentSection::Analysts,
        ContentSection::Committees,
        ContentSection::DownloadLists,
        ContentSection::Events,
        ContentSection::Presentations,
        ContentSection::PressReleases,
    ];

    pub fn screen(self) -> &'static ContentScreen {
        match self {
            ContentSection::Persons => &PERSONS,
            ContentSection::Faq => &FAQ,
            ContentSection::LookupList => &LOOKUP_LIST,
            ContentSection::Analysts => &ANALYSTS,
            ContentSection::Committees => &COMMITTEES,
            ContentSection::DownloadLists => &DOWNLOAD_LISTS,
            ContentSection::Events => &EVENTS,
            ContentSection::Presentations => &PRESENTATIONS,
            ContentSection::PressReleases => &PRESS_RELEASES,
        }
    }

    pub fn from_section_id(section_id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.screen().section_id == section_id)
    }
}

/// URLs of one admin instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminUrls {
    base: String,
}

impl AdminUrls {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Expand a template such as `https://{subdomain}.s4.q4web.com`.
    pub fn from_template(template: &str, subdomain: &str) -> Self {
        Self::new(template.replace("{subdomain}", subdomain))
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn login(&self) -> String {
        format!("{}{}", self.base, selectors::LOGIN_PATH)
    }

    pub fn dashboard(&self) -> String {
        format!("{}{}", self.base, selectors::DASHBOARD_PATH)
    }

    pub fn section(&self, section_id: &str) -> String {
        format!(
            "{}{}?LanguageId=1&SectionId={}",
            self.base,
            selectors::DASHBOARD_PATH,
            section_id
        )
    }

    /// Resolve a possibly site-relative asset path against this instance.
    pub fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if let Some(rest) = path.strip_prefix("//") {
            format!("https://{rest}")
        } else {
            format!("{}/{}", self.base, path.trim_start_matches('/'))
        }
    }
}

/// Detector, transition table and retry policy for one section of one site.
pub struct ContentNavigator {
    urls: AdminUrls,
    screen: &'static ContentScreen,
    detector: StateDetector<ScreenState>,
    table: TransitionTable<ScreenState>,
    policy: NavigationPolicy,
}

impl ContentNavigator {
    pub fn new(
        urls: AdminUrls,
        screen: &'static ContentScreen,
        policy: NavigationPolicy,
    ) -> Result<Self, ScreenError> {
        let list_state = if screen.grouped {
            ScreenState::GroupList
        } else {
            ScreenState::ItemList
        };
        let mut table = TransitionTable::new()
            .from_any(ScreenState::Landing, TransitionAction::Goto(urls.dashboard()))
            .on(
                ScreenState::Landing,
                list_state,
                TransitionAction::Goto(urls.section(screen.section_id)),
            );
        if screen.grouped {
            table = table
                .on(
                    ScreenState::ItemList,
                    ScreenState::GroupList,
                    TransitionAction::Click(selectors::BACK_TO_GROUPS),
                )
                .on(
                    ScreenState::EditForm,
                    ScreenState::GroupList,
                    TransitionAction::Goto(urls.section(screen.section_id)),
                )
                .on(
                    ScreenState::EditForm,
                    ScreenState::ItemList,
                    TransitionAction::Click(selectors::CANCEL),
                );
        } else {
            table = table.on(
                ScreenState::EditForm,
                ScreenState::ItemList,
                TransitionAction::Click(selectors::CANCEL),
            );
        }

        Ok(Self {
            urls,
            screen,
            detector: content_detector()?,
            table,
            policy,
        })
    }

    pub fn screen(&self) -> &'static ContentScreen {
        self.screen
    }

    pub fn urls(&self) -> &AdminUrls {
        &self.urls
    }

    pub fn detector(&self) -> &StateDetector<ScreenState> {
        &self.detector
    }

    pub fn policy(&self) -> &NavigationPolicy {
        &self.policy
    }

    pub async fn current(&self, page: &dyn AdminPage) -> Result<ScreenState, ScreenError> {
        crate::state::detect_current(page, &self.detector).await
    }

    pub async fn goto_state(&self, page: &dyn AdminPage, target: ScreenState) -> Result<(), ScreenError> {
        navigate_to(page, &self.detector, &self.table, target, &self.policy).await
    }

    /// Reach `target` directly, or via the landing screen when no direct route exists.
    pub async fn recover(&self, page: &dyn AdminPage, target: ScreenState) -> Result<(), ScreenError> {
        match self.goto_state(page, target).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.goto_state(page, ScreenState::Landing).await?;
                self.goto_state(page, target).await
            }
        }
    }

    /// Open the item list of the `index`-th group.
    pub async fn open_group(&self, page: &dyn AdminPage, index: usize) -> Result<(), ScreenError> {
        self.recover(page, ScreenState::GroupList).await?;
        page.click_nth(selectors::GROUP_LINK, index).await?;
        page.wait_for(selectors::ITEM_TABLE, self.policy.wait_timeout)
            .await?;
        let reached = self.current(page).await?;
        if reached == ScreenState::ItemList {
            Ok(())
        } else {
            Err(ScreenError::StateNotReached {
                target: format!("{:?}", ScreenState::ItemList),
                reached: format!("{reached:?}"),
            })
        }
    }

    /// Item list of the section, of group `group` for grouped sections.
    pub async fn open_items(&self, page: &dyn AdminPage, group: Option<usize>) -> Result<(), ScreenError> {
        match (self.screen.grouped, group) {
            (true, Some(index)) => self.open_group(page, index).await,
            (true, None) => Err(ScreenError::NoTransition {
                from: "any".into(),
                to: format!("{:?} without a group", ScreenState::ItemList),
            }),
            (false, _) => self.recover(page, ScreenState::ItemList).await,
        }
    }

    /// Item list freshly loaded at its first page.
    pub async fn reload_items(&self, page: &dyn AdminPage, group: Option<usize>) -> Result<(), ScreenError> {
        if self.screen.grouped {
            return self.open_items(page, group).await;
        }
        page.goto(&self.urls.section(self.screen.section_id)).await?;
        page.wait_for(selectors::ITEM_TABLE, self.policy.wait_timeout)
            .await?;
        match self.current(page).await? {
            ScreenState::ItemList => Ok(()),
            reached => Err(ScreenError::StateNotReached {
                target: format!("{:?}", ScreenState::ItemList),
                reached: format!("{reached:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_expand_template_and_sections() {
        let urls = AdminUrls::from_template("https://{subdomain}.s4.q4web.com/", "acme");
        assert_eq!(urls.base(), "https://acme.s4.q4web.com");
        assert_eq!(urls.login(), "https://acme.s4.q4web.com/admin/login.aspx");
        assert_eq!(
            urls.section("faq"),
            "https://acme.s4.q4web.com/admin/default.aspx?LanguageId=1&SectionId=faq"
        );
        assert_eq!(
            urls.absolute("/files/doc_images/jane.jpg"),
            "https://acme.s4.q4web.com/files/doc_images/jane.jpg"
        );
        assert_eq!(urls.absolute("//cdn.example/x.png"), "https://cdn.example/x.png");
    }

    #[test]
    fn section_ids_round_trip() {
        for section in ContentSection::ALL {
            assert_eq!(
                ContentSection::from_section_id(section.screen().section_id),
                Some(section)
            );
            let screen = section.screen();
            for key in screen.title_keys {
                assert!(screen.field(key).is_some(), "{key} missing in {}", screen.label);
            }
        }
    }
}
