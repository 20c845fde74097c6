//! Selectors for the shared admin layout. Every content section renders the same
//! group table / item table / edit form / delete modal skeleton.

pub const LOGIN_PATH: &str = "/admin/login.aspx";
pub const DASHBOARD_PATH: &str = "/admin/default.aspx";

pub const LOGIN_FORM: &str = "form#loginForm";
pub const LOGIN_USERNAME: &str = "#txtUserName";
pub const LOGIN_PASSWORD: &str = "#txtPassword";
pub const LOGIN_SUBMIT: &str = "#btnLogin";

pub const ADMIN_NAV: &str = "nav#adminNav";
/// Exact text only the dashboard of an authenticated session shows.
pub const DASHBOARD_MARKER: &str = "Website Management Dashboard";

pub const GROUP_TABLE: &str = "table.module-groups";
pub const GROUP_ROW: &str = "table.module-groups tr.group-row";
pub const GROUP_TITLE: &str = "td.group-title";
pub const GROUP_LINK: &str = "table.module-groups tr.group-row td.group-title a";
pub const ADD_GROUP: &str = "#btnAddGroup";
pub const GROUP_NAME: &str = "#txtGroupName";
pub const BACK_TO_GROUPS: &str = "a.back-to-groups";

pub const ITEM_TABLE: &str = "table.module-items";
pub const ITEM_ROW: &str = "table.module-items tr.item-row";
pub const ITEM_TITLE: &str = "td.item-title";
pub const ITEM_STATUS: &str = "td.item-status";
pub const ITEM_EDIT: &str = "table.module-items tr.item-row a.item-edit";
pub const ITEM_DELETE: &str = "table.module-items tr.item-row a.item-delete";
pub const ADD_NEW: &str = "#btnAddNew";

pub const PAGER_CURRENT: &str = "tr.pager td span";
pub const PAGER_LINK: &str = "tr.pager td a";

pub const EDIT_FORM: &str = "form#editForm";
pub const SAVE: &str = "#btnSave";
pub const CANCEL: &str = "#btnCancel";
pub const SUCCESS_BANNER: &str = ".message-success";
pub const ERROR_BANNER: &str = ".message-error";

pub const DELETE_MODAL: &str = "#deleteModal";
pub const DELETE_COMMENT: &str = "#txtComments";
pub const DELETE_CONFIRM: &str = "#btnConfirmDelete";

pub const PHOTO_UPLOAD: &str = "#filePhoto";
pub const COMMITTEE_SELECT: &str = "select#ddlCommittee";
pub const COMMITTEE_ROLE_SELECT: &str = "select#ddlCommitteeRole";
pub const COMMITTEE_ADD: &str = "#btnAddCommittee";
pub const COMMITTEE_ASSIGNMENT: &str = "ul.committee-assignments li";

/// Rows in this workflow state cannot be deleted until approved.
pub const STATUS_FOR_APPROVAL: &str = "For Approval";
