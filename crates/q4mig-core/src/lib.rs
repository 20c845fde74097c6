//! Core domain model for the Q4 admin migrator: site registry, per-site run-state
//! and the content snapshots exchanged between scrapers and migrators.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub const CRATE_NAME: &str = "q4mig-core";

/// Bumped whenever a snapshot payload changes shape.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Name given to the FAQ list when a site only has one.
pub const SINGLE_FAQ_LIST_NAME: &str = "Frequently Asked Questions";

/// One row of the site registry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteEntry {
    pub name: String,
    pub source: String,
    pub destination: String,
}

/// Which admin instance an operation drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SiteSide {
    Source,
    Destination,
}

impl SiteEntry {
    pub fn subdomain(&self, side: SiteSide) -> &str {
        match side {
            SiteSide::Source => &self.source,
            SiteSide::Destination => &self.destination,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    Persons,
    Faq,
    LookupList,
    Analysts,
    Committees,
    AnalystCommitteeLlm,
    PersonsMerged,
}

impl ContentKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ContentKind::Persons => "persons.json",
            ContentKind::Faq => "faq.json",
            ContentKind::LookupList => "lookup_list.json",
            ContentKind::Analysts => "analysts.json",
            ContentKind::Committees => "committees.json",
            ContentKind::AnalystCommitteeLlm => "analyst-committee-llm.json",
            ContentKind::PersonsMerged => "persons-merged.json",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name().trim_end_matches(".json"))
    }
}

/// Versioned envelope written around every snapshot payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<T> {
    pub schema_version: u32,
    pub content_kind: ContentKind,
    pub site: String,
    pub captured_at: DateTime<Utc>,
    pub payload: T,
}

impl<T: SnapshotPayload> Snapshot<T> {
    pub fn new(site: impl Into<String>, payload: T) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            content_kind: T::KIND,
            site: site.into(),
            captured_at: Utc::now(),
            payload,
        }
    }
}

/// Ties a payload type to the one content kind (and file) it is stored under.
pub trait SnapshotPayload: Serialize + DeserializeOwned + Send + Sync {
    const KIND: ContentKind;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub photo_url: Option<String>,
}

impl Person {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub name: String,
    pub persons: Vec<Person>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PersonsSnapshot {
    pub departments: Vec<Department>,
}

impl SnapshotPayload for PersonsSnapshot {
    const KIND: ContentKind = ContentKind::Persons;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FaqQuestion {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FaqList {
    pub name: String,
    pub questions: Vec<FaqQuestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FaqSnapshot {
    pub lists: Vec<FaqList>,
}

impl FaqSnapshot {
    /// A lone list always migrates under the canonical FAQ name.
    pub fn apply_single_list_rule(&mut self) {
        if let [only] = self.lists.as_mut_slice() {
            only.name = SINGLE_FAQ_LIST_NAME.to_string();
        }
    }

    pub fn question_count(&self) -> usize {
        self.lists.iter().map(|l| l.questions.len()).sum()
    }
}

impl SnapshotPayload for FaqSnapshot {
    const KIND: ContentKind = ContentKind::Faq;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LookupEntry {
    pub text: String,
    #[serde(default)]
    pub value: String,
}

/// Lookup lists back the document-category dropdowns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LookupList {
    pub lookup_type: String,
    pub entries: Vec<LookupEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LookupListSnapshot {
    pub lists: Vec<LookupList>,
}

impl SnapshotPayload for LookupListSnapshot {
    const KIND: ContentKind = ContentKind::LookupList;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Analyst {
    pub firm: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalystsSnapshot {
    pub analysts: Vec<Analyst>,
}

impl SnapshotPayload for AnalystsSnapshot {
    const KIND: ContentKind = ContentKind::Analysts;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Committee {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommitteesSnapshot {
    pub committees: Vec<Committee>,
}

impl SnapshotPayload for CommitteesSnapshot {
    const KIND: ContentKind = ContentKind::Committees;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitteeRole {
    Chair,
    ViceChair,
    Member,
}

impl CommitteeRole {
    /// Option label used by the committee-role dropdown.
    pub fn label(self) -> &'static str {
        match self {
            CommitteeRole::Chair => "Chair",
            CommitteeRole::ViceChair => "Vice Chair",
            CommitteeRole::Member => "Member",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmMember {
    pub name: String,
    pub role: CommitteeRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LlmCommittee {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<LlmMember>,
}

/// Curated committee membership and analyst coverage, produced outside this tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalystCommitteeLlm {
    #[serde(default)]
    pub committees: Vec<LlmCommittee>,
    #[serde(default)]
    pub analysts: Vec<Analyst>,
}

impl SnapshotPayload for AnalystCommitteeLlm {
    const KIND: ContentKind = ContentKind::AnalystCommitteeLlm;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchKind {
    Exact,
    Normalized,
    Fuzzy,
    OrderedTokens,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameMatch {
    pub llm_name: String,
    pub kind: MatchKind,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitteeAssignment {
    pub committee: String,
    pub role: CommitteeRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedPerson {
    #[serde(flatten)]
    pub person: Person,
    #[serde(default)]
    pub committees: Vec<CommitteeAssignment>,
    #[serde(default, rename = "match")]
    pub name_match: Option<NameMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MergedDepartment {
    pub name: String,
    pub persons: Vec<MergedPerson>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PersonsMergedSnapshot {
    pub departments: Vec<MergedDepartment>,
    #[serde(default)]
    pub unmatched_llm_names: Vec<String>,
}

impl SnapshotPayload for PersonsMergedSnapshot {
    const KIND: ContentKind = ContentKind::PersonsMerged;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LoginStatus {
    #[default]
    NotStarted,
    LoggingIn,
    LoggedIn,
    LoginFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OperationStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalState {
    pub active_sites: usize,
    pub max_concurrent_sites: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteRunState {
    pub login_status: LoginStatus,
    pub current_operation: Option<String>,
    pub operation_status: OperationStatus,
    pub last_error: Option<String>,
    pub dashboard_verified: bool,
    pub llm_complete: bool,
    pub persons_captured: bool,
    pub faq_captured: bool,
    pub lookup_list_captured: bool,
    pub analyst_list_captured: bool,
    pub committees_captured: bool,
    pub persons_merged: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SiteRunState {
    /// Flip the completeness flag that tracks `kind`.
    pub fn mark_captured(&mut self, kind: ContentKind) {
        match kind {
            ContentKind::Persons => self.persons_captured = true,
            ContentKind::Faq => self.faq_captured = true,
            ContentKind::LookupList => self.lookup_list_captured = true,
            ContentKind::Analysts => self.analyst_list_captured = true,
            ContentKind::Committees => self.committees_captured = true,
            ContentKind::AnalystCommitteeLlm => self.llm_complete = true,
            ContentKind::PersonsMerged => self.persons_merged = true,
        }
    }
}

/// Whole run-state file, keyed by destination subdomain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RunState {
    pub global: GlobalState,
    pub sites: BTreeMap<String, SiteRunState>,
}

const HONORIFICS: &[&str] = &["mr", "mrs", "ms", "miss", "dr", "prof", "sir", "dame"];

/// Lowercase, strip punctuation, collapse whitespace and drop leading honorifics.
pub fn normalize_name(input: &str) -> String {
    name_tokens(input).join(" ")
}

pub fn name_tokens(input: &str) -> Vec<String> {
    let cleaned = input
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    let mut tokens = cleaned
        .split_whitespace()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    while tokens.len() > 1 && HONORIFICS.contains(&tokens[0].as_str()) {
        tokens.remove(0);
    }
    tokens
}
