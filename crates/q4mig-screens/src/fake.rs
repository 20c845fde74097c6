//! In-memory admin site behind the [`AdminPage`] port. It renders the same markup skeleton
//! the selectors target and applies clicks, fills and saves to its own data, so the
//! navigation and operation layers can be exercised end to end without a browser.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::content::{ContentScreen, ContentSection, FieldKind};
use crate::selectors;
use crate::{has_selector, AdminPage, BrowserLauncher, DriverError};

const DEFAULT_PAGE_SIZE: usize = 10;
const PAGER_WINDOW: u32 = 10;
const ROLES: [&str; 3] = ["Chair", "Vice Chair", "Member"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FakeItem {
    pub fields: BTreeMap<String, String>,
    pub status: Option<String>,
    pub committees: Vec<String>,
}

impl FakeItem {
    pub fn new(fields: &[(&str, &str)]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            status: None,
            committees: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn title(&self, screen: &ContentScreen) -> String {
        screen
            .title_keys
            .iter()
            .filter_map(|k| self.field(k))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeGroup {
    pub name: String,
    pub items: Vec<FakeItem>,
}

impl FakeGroup {
    pub fn new(name: &str, items: Vec<FakeItem>) -> Self {
        Self {
            name: name.to_string(),
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeSection {
    pub grouped: bool,
    pub groups: Vec<FakeGroup>,
}

impl FakeSection {
    pub fn grouped(groups: Vec<FakeGroup>) -> Self {
        Self {
            grouped: true,
            groups,
        }
    }

    pub fn flat(items: Vec<FakeItem>) -> Self {
        Self {
            grouped: false,
            groups: vec![FakeGroup::new("", items)],
        }
    }

    fn empty(grouped: bool) -> Self {
        if grouped {
            Self::grouped(Vec::new())
        } else {
            Self::flat(Vec::new())
        }
    }

    /// Every item of every group, in display order.
    pub fn items(&self) -> Vec<&FakeItem> {
        self.groups.iter().flat_map(|g| g.items.iter()).collect()
    }

    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }

    pub fn group(&self, name: &str) -> Option<&FakeGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Blank,
    Login,
    Dashboard,
    Groups(ContentSection),
    Items {
        section: ContentSection,
        group: usize,
        page: u32,
    },
    Edit {
        section: ContentSection,
        group: usize,
        item: Option<usize>,
        page: u32,
    },
    GroupEdit(ContentSection),
    DeleteModal {
        section: ContentSection,
        group: usize,
        item: usize,
        page: u32,
    },
    NotFound,
}

#[derive(Debug)]
struct FakeState {
    username: String,
    password: String,
    logged_in: bool,
    login_failures: usize,
    lazy_answer_opens: usize,
    stuck_deletes: BTreeSet<ContentSection>,
    sections: BTreeMap<ContentSection, FakeSection>,
    page_size: usize,
    screen: Screen,
    form: BTreeMap<String, String>,
    pending_committees: Vec<String>,
    success: Option<String>,
    error: Option<String>,
    log: Vec<String>,
    closed: bool,
}

/// One scripted admin instance. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeAdmin {
    state: Arc<Mutex<FakeState>>,
}

impl FakeAdmin {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                username: username.to_string(),
                password: password.to_string(),
                logged_in: false,
                login_failures: 0,
                lazy_answer_opens: 0,
                stuck_deletes: BTreeSet::new(),
                sections: BTreeMap::new(),
                page_size: DEFAULT_PAGE_SIZE,
                screen: Screen::Blank,
                form: BTreeMap::new(),
                pending_committees: Vec::new(),
                success: None,
                error: None,
                log: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Already authenticated and sitting on the dashboard.
    pub fn logged_in() -> Self {
        let admin = Self::new("ops", "secret");
        {
            let mut state = admin.lock();
            state.logged_in = true;
            state.screen = Screen::Dashboard;
        }
        admin
    }

    pub fn with_section(self, section: ContentSection, content: FakeSection) -> Self {
        self.lock().sections.insert(section, content);
        self
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.lock().page_size = page_size.max(1);
        self
    }

    pub fn section(&self, section: ContentSection) -> FakeSection {
        self.lock()
            .sections
            .get(&section)
            .cloned()
            .unwrap_or_else(|| FakeSection::empty(section.screen().grouped))
    }

    /// The next `n` correct login submissions bounce back to the login form.
    pub fn set_login_failures(&self, n: usize) {
        self.lock().login_failures = n;
    }

    /// Confirmed deletes in `section` report success but leave the row in place.
    pub fn set_stuck_deletes(&self, section: ContentSection) {
        self.lock().stuck_deletes.insert(section);
    }

    /// The next `n` FAQ edit forms render before their answer editor has loaded.
    pub fn set_lazy_answer_opens(&self, n: usize) {
        self.lock().lazy_answer_opens = n;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn action_log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reopen(&self) {
        let mut state = self.lock();
        state.closed = false;
        state.screen = if state.logged_in {
            Screen::Dashboard
        } else {
            Screen::Blank
        };
    }
}

impl FakeState {
    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    fn section_mut(&mut self, section: ContentSection) -> &mut FakeSection {
        self.sections
            .entry(section)
            .or_insert_with(|| FakeSection::empty(section.screen().grouped))
    }

    fn group_items(&self, section: ContentSection, group: usize) -> &[FakeItem] {
        self.sections
            .get(&section)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.items.as_slice())
            .unwrap_or(&[])
    }

    fn total_pages(&self, section: ContentSection, group: usize) -> u32 {
        let count = self.group_items(section, group).len();
        count.div_ceil(self.page_size).max(1) as u32
    }

    fn route(&mut self, url: &str) {
        self.success = None;
        self.error = None;
        self.form.clear();
        self.screen = if url.contains(selectors::LOGIN_PATH) {
            if self.logged_in {
                Screen::Dashboard
            } else {
                Screen::Login
            }
        } else if url.contains(selectors::DASHBOARD_PATH) {
            if !self.logged_in {
                Screen::Login
            } else {
                match query_param(url, "SectionId").and_then(ContentSection::from_section_id) {
                    Some(section) => {
                        let grouped = self.section_mut(section).grouped;
                        if grouped {
                            Screen::Groups(section)
                        } else {
                            Screen::Items {
                                section,
                                group: 0,
                                page: 1,
                            }
                        }
                    }
                    None if url.contains("SectionId=") => Screen::NotFound,
                    None => Screen::Dashboard,
                }
            }
        } else {
            Screen::NotFound
        };
    }

    fn render(&self) -> String {
        let body = match self.screen {
            Screen::Blank => String::new(),
            Screen::NotFound => "<p>The page you requested could not be found.</p>".to_string(),
            Screen::Login => self.render_login(),
            Screen::Dashboard => format!("{}<h1>{}</h1>", NAV, selectors::DASHBOARD_MARKER),
            Screen::Groups(section) => self.render_groups(section),
            Screen::Items {
                section,
                group,
                page,
            } => self.render_items(section, group, page),
            Screen::Edit { section, .. } => self.render_edit(section),
            Screen::GroupEdit(_) => format!(
                "{NAV}{}<form id=\"editForm\"><input id=\"txtGroupName\" value=\"{}\">\
                 <button id=\"btnSave\">Save</button><button id=\"btnCancel\">Cancel</button></form>",
                self.banners(),
                escape(self.form.get(selectors::GROUP_NAME).map(String::as_str).unwrap_or(""))
            ),
            Screen::DeleteModal {
                section,
                group,
                page,
                ..
            } => format!(
                "{}<div id=\"deleteModal\"><textarea id=\"txtComments\">{}</textarea>\
                 <button id=\"btnConfirmDelete\">Delete</button></div>",
                self.render_items(section, group, page),
                escape(self.form.get(selectors::DELETE_COMMENT).map(String::as_str).unwrap_or(""))
            ),
        };
        format!("<html><head><title>Q4 Admin</title></head><body>{body}</body></html>")
    }

    fn banners(&self) -> String {
        let mut out = String::new();
        if let Some(msg) = &self.success {
            out.push_str(&format!("<div class=\"message-success\">{}</div>", escape(msg)));
        }
        if let Some(msg) = &self.error {
            out.push_str(&format!("<div class=\"message-error\">{}</div>", escape(msg)));
        }
        out
    }

    fn render_login(&self) -> String {
        format!(
            "{}<form id=\"loginForm\"><input id=\"txtUserName\" value=\"{}\">\
             <input id=\"txtPassword\" type=\"password\"><button id=\"btnLogin\">Log in</button></form>",
            self.banners(),
            escape(self.form.get(selectors::LOGIN_USERNAME).map(String::as_str).unwrap_or(""))
        )
    }

    fn render_groups(&self, section: ContentSection) -> String {
        let rows = self
            .sections
            .get(&section)
            .map(|s| {
                s.groups
                    .iter()
                    .map(|g| {
                        format!(
                            "<tr class=\"group-row\"><td class=\"group-title\"><a href=\"#\">{}</a></td>\
                             <td class=\"group-count\">{}</td></tr>",
                            escape(&g.name),
                            g.items.len()
                        )
                    })
                    .collect::<String>()
            })
            .unwrap_or_default();
        format!(
            "{NAV}{}<button id=\"btnAddGroup\">Add Group</button>\
             <table class=\"module-groups\"><tr><th>Group</th><th>Items</th></tr>{rows}</table>",
            self.banners()
        )
    }

    fn render_items(&self, section: ContentSection, group: usize, page: u32) -> String {
        let screen = section.screen();
        let items = self.group_items(section, group);
        let start = (page as usize - 1) * self.page_size;
        let rows = items
            .iter()
            .skip(start)
            .take(self.page_size)
            .map(|item| {
                let status = item
                    .status
                    .as_deref()
                    .map(|s| format!("<td class=\"item-status\">{}</td>", escape(s)))
                    .unwrap_or_default();
                format!(
                    "<tr class=\"item-row\"><td class=\"item-title\">{}</td>{status}\
                     <td><a class=\"item-edit\" href=\"#\">Edit</a> <a class=\"item-delete\" href=\"#\">Delete</a></td></tr>",
                    escape(&item.title(screen))
                )
            })
            .collect::<String>();
        let total = self.total_pages(section, group);
        let pager = if total > 1 {
            let cells = pager_links(page, total)
                .into_iter()
                .map(|(label, _)| format!("<a href=\"#\">{label}</a>"))
                .collect::<Vec<_>>();
            let current = format!("<span>{page}</span>");
            let mut all = cells;
            let insert_at = pager_current_slot(page, total);
            all.insert(insert_at, current);
            format!("<tr class=\"pager\"><td>{}</td></tr>", all.join(" "))
        } else {
            String::new()
        };
        let back = if screen.grouped {
            "<a class=\"back-to-groups\" href=\"#\">Back to groups</a>"
        } else {
            ""
        };
        format!(
            "{NAV}{}{back}<button id=\"btnAddNew\">Add New</button>\
             <table class=\"module-items\"><tr><th>Title</th></tr>{rows}{pager}</table>",
            self.banners()
        )
    }

    fn render_edit(&self, section: ContentSection) -> String {
        let screen = section.screen();
        let mut fields = String::new();
        for field in screen.fields {
            let id = element_id(field.selector);
            let value = self.form.get(field.selector).map(String::as_str).unwrap_or("");
            match field.kind {
                FieldKind::Text => {
                    fields.push_str(&format!("<input id=\"{id}\" value=\"{}\">", escape(value)))
                }
                FieldKind::RichText => {
                    fields.push_str(&format!("<textarea id=\"{id}\">{}</textarea>", escape(value)))
                }
                FieldKind::Select => fields.push_str(&format!(
                    "<select id=\"{id}\"><option selected>{}</option></select>",
                    escape(value)
                )),
                FieldKind::ImagePreview => {
                    if !value.is_empty() {
                        fields.push_str(&format!("<img id=\"{id}\" src=\"{}\">", escape(value)));
                    }
                }
            }
        }
        if section == ContentSection::Persons {
            fields.push_str("<input type=\"file\" id=\"filePhoto\">");
            let committees = self
                .sections
                .get(&ContentSection::Committees)
                .map(|s| {
                    s.items()
                        .into_iter()
                        .filter_map(|c| c.field("name").map(str::to_string))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            fields.push_str(&select_markup(
                "ddlCommittee",
                &committees,
                self.form.get(selectors::COMMITTEE_SELECT),
            ));
            let roles = ROLES.iter().map(|r| r.to_string()).collect::<Vec<_>>();
            fields.push_str(&select_markup(
                "ddlCommitteeRole",
                &roles,
                self.form.get(selectors::COMMITTEE_ROLE_SELECT),
            ));
            fields.push_str("<button id=\"btnAddCommittee\">Add</button><ul class=\"committee-assignments\">");
            for assignment in &self.pending_committees {
                fields.push_str(&format!("<li>{}</li>", escape(assignment)));
            }
            fields.push_str("</ul>");
        }
        format!(
            "{NAV}{}<form id=\"editForm\">{fields}<button id=\"btnSave\">Save</button>\
             <button id=\"btnCancel\">Cancel</button></form>",
            self.banners()
        )
    }

    fn submit_login(&mut self) {
        let user = self.form.get(selectors::LOGIN_USERNAME).cloned().unwrap_or_default();
        let pass = self.form.get(selectors::LOGIN_PASSWORD).cloned().unwrap_or_default();
        self.form.clear();
        if user != self.username || pass != self.password {
            self.error = Some("Invalid user name or password.".into());
            return;
        }
        if self.login_failures > 0 {
            self.login_failures -= 1;
            self.error = Some("The session could not be started. Please try again.".into());
            return;
        }
        self.logged_in = true;
        self.screen = Screen::Dashboard;
    }

    fn open_edit(&mut self, section: ContentSection, group: usize, item: Option<usize>, page: u32) {
        self.form.clear();
        self.pending_committees.clear();
        if let Some(index) = item {
            let screen = section.screen();
            let lazy = section == ContentSection::Faq && self.lazy_answer_opens > 0;
            if lazy {
                self.lazy_answer_opens -= 1;
            }
            if let Some(existing) = self.group_items(section, group).get(index).cloned() {
                for field in screen.fields {
                    if lazy && field.key == "answer" {
                        continue;
                    }
                    if let Some(value) = existing.field(field.key) {
                        self.form.insert(field.selector.to_string(), value.to_string());
                    }
                }
                self.pending_committees = existing.committees;
            }
        }
        self.screen = Screen::Edit {
            section,
            group,
            item,
            page,
        };
    }

    fn save_edit(&mut self, section: ContentSection, group: usize, item: Option<usize>, page: u32) {
        let screen = section.screen();
        let mut fields = BTreeMap::new();
        for field in screen.fields {
            if let Some(value) = self.form.get(field.selector) {
                if !value.trim().is_empty() {
                    fields.insert(field.key.to_string(), value.clone());
                }
            }
        }
        if !screen.title_keys.iter().any(|k| fields.contains_key(*k)) {
            self.error = Some(format!("A {} needs a title.", screen.label));
            return;
        }
        let target = self.section_mut(section);
        if target.groups.is_empty() && !target.grouped {
            target.groups.push(FakeGroup::new("", Vec::new()));
        }
        if group >= target.groups.len() {
            self.error = Some("The group no longer exists.".into());
            return;
        }
        let committees = std::mem::take(&mut self.pending_committees);
        let items = &mut self.section_mut(section).groups[group].items;
        let return_page = match item.and_then(|i| items.get_mut(i)) {
            Some(existing) => {
                existing.fields = fields;
                existing.committees = committees;
                page
            }
            None => {
                items.push(FakeItem {
                    fields,
                    status: None,
                    committees,
                });
                1
            }
        };
        self.form.clear();
        self.screen = Screen::Items {
            section,
            group,
            page: return_page,
        };
        self.success = Some(format!("The {} was saved.", screen.label));
    }

    fn save_group(&mut self, section: ContentSection) {
        let name = self.form.get(selectors::GROUP_NAME).cloned().unwrap_or_default();
        if name.trim().is_empty() {
            self.error = Some("A group needs a name.".into());
            return;
        }
        self.section_mut(section)
            .groups
            .push(FakeGroup::new(name.trim(), Vec::new()));
        self.form.clear();
        self.screen = Screen::Groups(section);
        self.success = Some("The group was saved.".into());
    }

    fn confirm_delete(&mut self, section: ContentSection, group: usize, item: usize, page: u32) {
        let stuck = self.stuck_deletes.contains(&section);
        let pending = self
            .group_items(section, group)
            .get(item)
            .is_some_and(|i| {
                i.status
                    .as_deref()
                    .is_some_and(|s| s == selectors::STATUS_FOR_APPROVAL)
            });
        if pending {
            self.error = Some("Items awaiting approval cannot be deleted.".into());
        } else if !stuck {
            if let Some(g) = self.section_mut(section).groups.get_mut(group) {
                if item < g.items.len() {
                    g.items.remove(item);
                }
            }
            self.success = Some("The item was deleted.".into());
        } else {
            self.success = Some("The item was deleted.".into());
        }
        self.form.clear();
        let last = self.total_pages(section, group);
        self.screen = Screen::Items {
            section,
            group,
            page: page.min(last),
        };
    }

    fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let html = self.render();
        if !has_selector(&html, selector).unwrap_or(false) {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        let kept_error = self.error.take();
        self.success = None;
        match (self.screen, selector) {
            (Screen::Login, selectors::LOGIN_SUBMIT) => self.submit_login(),
            (Screen::Items { section, .. }, selectors::BACK_TO_GROUPS) => {
                self.screen = Screen::Groups(section)
            }
            (Screen::Items { section, group, page }, selectors::ADD_NEW) => {
                self.open_edit(section, group, None, page)
            }
            (Screen::Groups(section), selectors::ADD_GROUP) => {
                self.form.clear();
                self.screen = Screen::GroupEdit(section);
            }
            (Screen::GroupEdit(section), selectors::SAVE) => self.save_group(section),
            (Screen::GroupEdit(section), selectors::CANCEL) => self.screen = Screen::Groups(section),
            (Screen::Edit { section, group, item, page }, selectors::SAVE) => {
                self.save_edit(section, group, item, page)
            }
            (Screen::Edit { section, group, page, .. }, selectors::CANCEL) => {
                self.form.clear();
                self.screen = Screen::Items {
                    section,
                    group,
                    page,
                };
            }
            (Screen::Edit { .. }, selectors::COMMITTEE_ADD) => {
                let committee = self.form.get(selectors::COMMITTEE_SELECT).cloned();
                let role = self
                    .form
                    .get(selectors::COMMITTEE_ROLE_SELECT)
                    .cloned()
                    .unwrap_or_else(|| ROLES[2].to_string());
                match committee {
                    Some(c) if !c.is_empty() => {
                        let entry = format!("{c} ({role})");
                        if !self.pending_committees.contains(&entry) {
                            self.pending_committees.push(entry);
                        }
                    }
                    _ => self.error = Some("Select a committee first.".into()),
                }
            }
            (Screen::DeleteModal { section, group, item, page }, selectors::DELETE_CONFIRM) => {
                self.confirm_delete(section, group, item, page)
            }
            _ => self.error = kept_error,
        }
        Ok(())
    }

    fn click_nth(&mut self, selector: &str, index: usize) -> Result<(), DriverError> {
        let html = self.render();
        let count = crate::count_matches(&html, selector).unwrap_or(0);
        if index >= count {
            return Err(DriverError::ElementNotFound {
                selector: format!("{selector} [{index}]"),
            });
        }
        self.success = None;
        self.error = None;
        match (self.screen, selector) {
            (Screen::Groups(section), selectors::GROUP_LINK) => {
                self.screen = Screen::Items {
                    section,
                    group: index,
                    page: 1,
                }
            }
            (Screen::Items { section, group, page }, selectors::PAGER_LINK) => {
                let total = self.total_pages(section, group);
                if let Some((_, target)) = pager_links(page, total).get(index) {
                    self.screen = Screen::Items {
                        section,
                        group,
                        page: *target,
                    };
                }
            }
            (Screen::Items { section, group, page }, selectors::ITEM_EDIT) => {
                let item = (page as usize - 1) * self.page_size + index;
                self.open_edit(section, group, Some(item), page)
            }
            (Screen::Items { section, group, page }, selectors::ITEM_DELETE) => {
                let item = (page as usize - 1) * self.page_size + index;
                self.form.clear();
                self.screen = Screen::DeleteModal {
                    section,
                    group,
                    item,
                    page,
                };
            }
            _ => {}
        }
        Ok(())
    }

    fn fill(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        let html = self.render();
        let fillable = has_selector(&html, &format!("input{selector}")).unwrap_or(false)
            || has_selector(&html, &format!("textarea{selector}")).unwrap_or(false);
        if !fillable {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        self.form.insert(selector.to_string(), text.to_string());
        Ok(())
    }

    fn select_option(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        let html = self.render();
        let options = crate::extract::select_options(&html, selector).unwrap_or_default();
        if options.is_empty() && !has_selector(&html, selector).unwrap_or(false) {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        if !options.iter().any(|o| o == value) {
            return Err(DriverError::Interaction {
                selector: selector.to_string(),
                reason: format!("no option {value}"),
            });
        }
        self.form.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    fn upload(&mut self, selector: &str, path: &Path) -> Result<(), DriverError> {
        let html = self.render();
        if !has_selector(&html, selector).unwrap_or(false) {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        if !path.exists() {
            return Err(DriverError::Interaction {
                selector: selector.to_string(),
                reason: format!("{} does not exist", path.display()),
            });
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Screen::Edit { section, .. } = self.screen {
            if let Some(preview) = section
                .screen()
                .fields
                .iter()
                .find(|f| f.kind == FieldKind::ImagePreview)
            {
                self.form
                    .insert(preview.selector.to_string(), format!("/files/{name}"));
            }
        }
        Ok(())
    }
}

const NAV: &str = "<nav id=\"adminNav\"><a href=\"#\">Dashboard</a></nav>";

/// `(label, target page)` for every pager link, in document order. The current page is
/// rendered as a span and is not part of this list.
fn pager_links(current: u32, total: u32) -> Vec<(String, u32)> {
    let start = ((current - 1) / PAGER_WINDOW) * PAGER_WINDOW + 1;
    let end = (start + PAGER_WINDOW - 1).min(total);
    let mut links = Vec::new();
    if start > 1 {
        links.push(("...".to_string(), start - 1));
    }
    for p in start..=end {
        if p != current {
            links.push((p.to_string(), p));
        }
    }
    if end < total {
        links.push(("...".to_string(), end + 1));
    }
    links
}

/// Links are ordered by target page, so the current page sits after every lower target.
fn pager_current_slot(current: u32, total: u32) -> usize {
    pager_links(current, total)
        .iter()
        .filter(|(_, target)| *target < current)
        .count()
}

fn select_markup(id: &str, options: &[String], selected: Option<&String>) -> String {
    let mut out = format!("<select id=\"{id}\"><option value=\"\"></option>");
    for option in options {
        let mark = if selected == Some(option) { " selected" } else { "" };
        out.push_str(&format!("<option{mark}>{}</option>", escape(option)));
    }
    out.push_str("</select>");
    out
}

fn element_id(selector: &str) -> &str {
    selector.rsplit('#').next().unwrap_or(selector)
}

fn query_param<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    let query = url.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v)
    })
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl AdminPage for FakeAdmin {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.log.push(format!("goto {url}"));
        state.route(url);
        Ok(())
    }

    async fn content(&self) -> Result<String, DriverError> {
        let state = self.lock();
        state.ensure_open()?;
        Ok(state.render())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let state = self.lock();
        state.ensure_open()?;
        Ok(format!("fake://{:?}", state.screen))
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.log.push(format!("click {selector}"));
        state.click(selector)
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.log.push(format!("click {selector} [{index}]"));
        state.click_nth(selector, index)
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.log.push(format!("fill {selector}"));
        state.fill(selector, text)
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.log.push(format!("select {selector}={value}"));
        state.select_option(selector, value)
    }

    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.log.push(format!("upload {selector}"));
        state.upload(selector, path)
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<bool, DriverError> {
        let state = self.lock();
        state.ensure_open()?;
        let html = state.render();
        Ok(has_selector(&html, selector).unwrap_or(false))
    }

    async fn close(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.closed = true;
        state.form.clear();
        Ok(())
    }
}

/// Launcher over one or more fake sites. A tab talks to the site whose base URL prefixes
/// the last navigation; with a single site every tab talks to it.
#[derive(Debug, Clone)]
pub struct FakeLauncher {
    sites: Arc<Vec<(String, FakeAdmin)>>,
    tabs: Arc<Mutex<TabLedger>>,
}

/// Which sites tabs were bound to, in binding order, and how many tabs were open at once.
#[derive(Debug, Default)]
struct TabLedger {
    bound: Vec<String>,
    open: usize,
    peak: usize,
}

impl FakeLauncher {
    pub fn new(admin: FakeAdmin) -> Self {
        Self::sites(vec![(String::new(), admin)])
    }

    pub fn sites(sites: Vec<(String, FakeAdmin)>) -> Self {
        Self {
            sites: Arc::new(sites),
            tabs: Arc::default(),
        }
    }

    /// Base URL of each launched tab's site, in the order tabs first reached it.
    pub fn bound_sites(&self) -> Vec<String> {
        self.ledger().bound.clone()
    }

    /// Most tabs that were open at the same time.
    pub fn peak_open_tabs(&self) -> usize {
        self.ledger().peak
    }

    pub fn open_tabs(&self) -> usize {
        self.ledger().open
    }

    fn ledger(&self) -> MutexGuard<'_, TabLedger> {
        self.tabs.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn AdminPage>, DriverError> {
        let current = if self.sites.len() == 1 {
            let (base, admin) = &self.sites[0];
            admin.reopen();
            self.ledger().bound.push(base.clone());
            Some(admin.clone())
        } else {
            None
        };
        {
            let mut ledger = self.ledger();
            ledger.open += 1;
            ledger.peak = ledger.peak.max(ledger.open);
        }
        Ok(Box::new(FakeTab {
            sites: Arc::clone(&self.sites),
            tabs: Arc::clone(&self.tabs),
            current: Mutex::new(current),
            closed: Mutex::new(false),
        }))
    }
}

struct FakeTab {
    sites: Arc<Vec<(String, FakeAdmin)>>,
    tabs: Arc<Mutex<TabLedger>>,
    current: Mutex<Option<FakeAdmin>>,
    closed: Mutex<bool>,
}

impl FakeTab {
    fn current(&self) -> Result<FakeAdmin, DriverError> {
        self.current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(DriverError::Closed)
    }

    fn ledger(&self) -> MutexGuard<'_, TabLedger> {
        self.tabs.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl AdminPage for FakeTab {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let matched = self
            .sites
            .iter()
            .find(|(base, _)| !base.is_empty() && url.starts_with(base.as_str()))
            .map(|(base, admin)| (base.clone(), admin.clone()));
        if let Some((base, admin)) = matched {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            if current.is_none() {
                self.ledger().bound.push(base);
            }
            let switched = current
                .as_ref()
                .map_or(true, |c| !Arc::ptr_eq(&c.state, &admin.state));
            if switched {
                admin.reopen();
                *current = Some(admin);
            }
        }
        self.current()?.goto(url).await
    }

    async fn content(&self) -> Result<String, DriverError> {
        self.current()?.content().await
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.current()?.current_url().await
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        self.current()?.click(selector).await
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<(), DriverError> {
        self.current()?.click_nth(selector, index).await
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        self.current()?.fill(selector, text).await
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        self.current()?.select_option(selector, value).await
    }

    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), DriverError> {
        self.current()?.upload_file(selector, path).await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, DriverError> {
        self.current()?.wait_for(selector, timeout).await
    }

    async fn close(&self) -> Result<(), DriverError> {
        let first_close = {
            let mut closed = self.closed.lock().unwrap_or_else(|p| p.into_inner());
            !std::mem::replace(&mut *closed, true)
        };
        if first_close {
            let mut ledger = self.ledger();
            ledger.open = ledger.open.saturating_sub(1);
        }
        match self.current() {
            Ok(admin) => admin.close().await,
            Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::list_rows;
    use crate::pagination::parse_pager;

    fn items(n: usize) -> Vec<FakeItem> {
        (1..=n)
            .map(|i| FakeItem::new(&[("title", &format!("Release {i}"))]))
            .collect()
    }

    #[tokio::test]
    async fn pager_renders_current_page_between_links() {
        let admin = FakeAdmin::logged_in()
            .with_page_size(2)
            .with_section(ContentSection::PressReleases, FakeSection::flat(items(25)));
        admin
            .goto("https://acme.example/admin/default.aspx?LanguageId=1&SectionId=press-releases")
            .await
            .unwrap();
        let html = admin.content().await.unwrap();
        let pager = parse_pager(&html).unwrap();
        assert_eq!(pager.current, Some(1));
        assert_eq!(pager.links.first().map(|l| l.page), Some(Some(2)));
        assert!(pager.links.last().unwrap().is_ellipsis());

        admin.click_nth(selectors::PAGER_LINK, 9).await.unwrap();
        let html = admin.content().await.unwrap();
        let pager = parse_pager(&html).unwrap();
        assert_eq!(pager.current, Some(11));
        assert!(pager.links[0].is_ellipsis());
        assert_eq!(list_rows(&html).unwrap()[0].title, "Release 21");
    }

    #[tokio::test]
    async fn saving_a_new_item_flashes_success() {
        let admin = FakeAdmin::logged_in();
        admin
            .goto("https://acme.example/admin/default.aspx?LanguageId=1&SectionId=committees")
            .await
            .unwrap();
        admin.click(selectors::ADD_NEW).await.unwrap();
        admin.fill("#txtCommitteeName", "Audit & Risk").await.unwrap();
        admin.click(selectors::SAVE).await.unwrap();
        let html = admin.content().await.unwrap();
        assert!(crate::extract::has_success_banner(&html).unwrap());
        assert_eq!(list_rows(&html).unwrap()[0].title, "Audit & Risk");
        assert_eq!(admin.section(ContentSection::Committees).item_count(), 1);
    }

    #[tokio::test]
    async fn clicks_on_missing_elements_fail() {
        let admin = FakeAdmin::logged_in();
        let err = admin.click(selectors::SAVE).await.unwrap_err();
        assert!(matches!(err, DriverError::ElementNotFound { .. }));
        admin.close().await.unwrap();
        assert!(matches!(admin.content().await, Err(DriverError::Closed)));
    }

    #[tokio::test]
    async fn launcher_routes_tabs_by_base_url() {
        let a = FakeAdmin::logged_in();
        let b = FakeAdmin::logged_in();
        let launcher = FakeLauncher::sites(vec![
            ("https://a.example".into(), a.clone()),
            ("https://b.example".into(), b.clone()),
        ]);
        let tab = launcher.launch().await.unwrap();
        tab.goto("https://b.example/admin/default.aspx").await.unwrap();
        assert!(a.action_log().is_empty());
        assert_eq!(b.action_log().len(), 1);
        assert_eq!(launcher.bound_sites(), vec!["https://b.example".to_string()]);
    }

    #[tokio::test]
    async fn launcher_tracks_open_tabs() {
        let launcher = FakeLauncher::new(FakeAdmin::logged_in());
        let first = launcher.launch().await.unwrap();
        let second = launcher.launch().await.unwrap();
        assert_eq!(launcher.open_tabs(), 2);
        first.close().await.unwrap();
        first.close().await.unwrap();
        assert_eq!(launcher.open_tabs(), 1);
        second.close().await.unwrap();
        let third = launcher.launch().await.unwrap();
        third.close().await.unwrap();
        assert_eq!(launcher.open_tabs(), 0);
        assert_eq!(launcher.peak_open_tabs(), 2);
    }
}
