//! Pure extraction over captured admin markup.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html};

use crate::content::{FieldKind, FormField};
use crate::selectors;
use crate::{parse_selector, select_all_texts, select_first_attr, text_or_none, ScreenError};

/// One row of an item table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    pub title: String,
    pub status: Option<String>,
    /// Zero-based position among the rows of the rendered page.
    pub position: usize,
}

impl ListRow {
    pub fn is_pending_approval(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(selectors::STATUS_FOR_APPROVAL))
    }
}

pub fn list_rows(html: &str) -> Result<Vec<ListRow>, ScreenError> {
    let document = Html::parse_document(html);
    let row_sel = parse_selector(selectors::ITEM_ROW)?;
    let title_sel = parse_selector(selectors::ITEM_TITLE)?;
    let status_sel = parse_selector(selectors::ITEM_STATUS)?;

    Ok(document
        .select(&row_sel)
        .enumerate()
        .map(|(position, row)| ListRow {
            title: first_text_in(&row, &title_sel).unwrap_or_default(),
            status: first_text_in(&row, &status_sel),
            position,
        })
        .collect())
}

/// Rows the delete action may target: everything not waiting on approval.
pub fn deletable_rows(rows: &[ListRow]) -> Vec<&ListRow> {
    rows.iter().filter(|r| !r.is_pending_approval()).collect()
}

pub fn group_names(html: &str) -> Result<Vec<String>, ScreenError> {
    let document = Html::parse_document(html);
    let row_sel = parse_selector(selectors::GROUP_ROW)?;
    let title_sel = parse_selector(selectors::GROUP_TITLE)?;
    Ok(document
        .select(&row_sel)
        .map(|row| first_text_in(&row, &title_sel).unwrap_or_default())
        .collect())
}

/// Current values of `fields` on an edit form, keyed by field key. Empty values are omitted.
pub fn form_values(html: &str, fields: &[FormField]) -> Result<BTreeMap<String, String>, ScreenError> {
    let document = Html::parse_document(html);
    let mut values = BTreeMap::new();
    for field in fields {
        let value = match field.kind {
            FieldKind::Text => select_first_attr(&document, field.selector, "value")?,
            FieldKind::RichText => {
                let sel = parse_selector(field.selector)?;
                document.select(&sel).next().and_then(|n| {
                    let raw = n.text().collect::<String>();
                    let trimmed = raw.trim();
                    (!trimmed.is_empty()).then(|| trimmed.to_string())
                })
            }
            FieldKind::Select => selected_option(&document, field.selector)?,
            FieldKind::ImagePreview => select_first_attr(&document, field.selector, "src")?,
        };
        if let Some(value) = value {
            values.insert(field.key.to_string(), value);
        }
    }
    Ok(values)
}

pub fn has_success_banner(html: &str) -> Result<bool, ScreenError> {
    crate::has_selector(html, selectors::SUCCESS_BANNER)
}

pub fn error_banner(html: &str) -> Result<Option<String>, ScreenError> {
    let document = Html::parse_document(html);
    crate::select_first_text(&document, selectors::ERROR_BANNER)
}

/// Committee assignments already listed on a person's edit form, as `Committee (Role)`.
pub fn committee_assignments(html: &str) -> Result<Vec<String>, ScreenError> {
    let document = Html::parse_document(html);
    select_all_texts(&document, selectors::COMMITTEE_ASSIGNMENT)
}

/// Visible option texts of a `<select>`, skipping the empty placeholder.
pub fn select_options(html: &str, selector: &str) -> Result<Vec<String>, ScreenError> {
    let document = Html::parse_document(html);
    let sel = parse_selector(&format!("{selector} option"))?;
    Ok(document
        .select(&sel)
        .filter_map(|n| text_or_none(n.text().collect::<String>()))
        .collect())
}

fn selected_option(document: &Html, selector: &str) -> Result<Option<String>, ScreenError> {
    let sel = parse_selector(&format!("{selector} option[selected]"))?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>())))
}

fn first_text_in(element: &ElementRef<'_>, selector: &scraper::Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{FAQ, PERSONS};

    const ITEMS: &str = r#"
        <table class="module-items">
          <tr class="item-row"><td class="item-title"> Jane   Doe </td><td class="item-status">Active</td></tr>
          <tr class="item-row"><td class="item-title">John Roe</td><td class="item-status">For Approval</td></tr>
          <tr class="item-row"><td class="item-title">Ann Poe</td></tr>
          <tr class="pager"><td><span>1</span></td></tr>
        </table>"#;

    #[test]
    fn rows_carry_title_status_and_position() {
        let rows = list_rows(ITEMS).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].title, "Jane Doe");
        assert_eq!(rows[1].status.as_deref(), Some("For Approval"));
        assert_eq!(rows[2].position, 2);
        assert_eq!(rows[2].status, None);
    }

    #[test]
    fn pending_approval_rows_are_not_deletable() {
        let rows = list_rows(ITEMS).unwrap();
        let deletable = deletable_rows(&rows)
            .into_iter()
            .map(|r| r.position)
            .collect::<Vec<_>>();
        assert_eq!(deletable, vec![0, 2]);
    }

    #[test]
    fn groups_are_read_in_order() {
        let html = r#"<table class="module-groups">
            <tr class="group-row"><td class="group-title"><a>General</a></td></tr>
            <tr class="group-row"><td class="group-title"><a>Investors</a></td></tr>
        </table>"#;
        assert_eq!(group_names(html).unwrap(), vec!["General", "Investors"]);
    }

    #[test]
    fn form_values_read_every_field_kind() {
        let html = r#"<form id="editForm">
            <input id="txtFirstName" value="Jane">
            <input id="txtLastName" value="Doe">
            <input id="txtTitle" value="">
            <textarea id="txtDescription">
              <p>Board member since 2010.</p>
            </textarea>
            <img id="imgPhotoPreview" src="/files/jane.jpg">
        </form>"#;
        let values = form_values(html, PERSONS.fields).unwrap();
        assert_eq!(values.get("first_name").map(String::as_str), Some("Jane"));
        assert_eq!(values.get("photo_url").map(String::as_str), Some("/files/jane.jpg"));
        assert!(values.get("title").is_none());
        assert!(values["description"].contains("Board member since 2010."));
    }

    #[test]
    fn empty_rich_text_is_absent() {
        let html = r#"<form id="editForm"><input id="txtQuestion" value="Q"><textarea id="txtAnswer">  </textarea></form>"#;
        let values = form_values(html, FAQ.fields).unwrap();
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn select_helpers_read_options() {
        let html = r#"<select id="ddlCommittee"><option value=""></option>
            <option>Audit</option><option selected>Compensation</option></select>
            <ul class="committee-assignments"><li>Audit (Chair)</li></ul>"#;
        assert_eq!(
            select_options(html, "select#ddlCommittee").unwrap(),
            vec!["Audit", "Compensation"]
        );
        let document = Html::parse_document(html);
        assert_eq!(
            selected_option(&document, "select#ddlCommittee").unwrap().as_deref(),
            Some("Compensation")
        );
        assert_eq!(committee_assignments(html).unwrap(), vec!["Audit (Chair)"]);
    }
}
