//! Grid pager traversal. Pages render a window of numbered links plus `...` links that
//! jump past either end of the window.

use std::collections::BTreeSet;

use scraper::Html;
use tracing::debug;

use crate::selectors;
use crate::{parse_selector, AdminPage, ScreenError};

/// Hard stop for a pager that keeps producing new page numbers.
const MAX_PAGES: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerLink {
    pub index: usize,
    pub text: String,
    pub page: Option<u32>,
}

impl PagerLink {
    pub fn is_ellipsis(&self) -> bool {
        self.page.is_none()
            && (self.text == "..."
                || self.text == "\u{2026}"
                || self.text.to_ascii_lowercase().contains("more"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PagerSnapshot {
    pub current: Option<u32>,
    pub links: Vec<PagerLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStep {
    Page { page: u32, link_index: usize },
    More { link_index: usize },
    Done,
}

pub fn parse_pager(html: &str) -> Result<PagerSnapshot, ScreenError> {
    let document = Html::parse_document(html);
    let current_sel = parse_selector(selectors::PAGER_CURRENT)?;
    let link_sel = parse_selector(selectors::PAGER_LINK)?;

    let current = document
        .select(&current_sel)
        .filter_map(|n| n.text().collect::<String>().trim().parse::<u32>().ok())
        .next();
    let links = document
        .select(&link_sel)
        .enumerate()
        .map(|(index, n)| {
            let text = n.text().collect::<String>().trim().to_string();
            let page = text.parse::<u32>().ok();
            PagerLink { index, text, page }
        })
        .collect();

    Ok(PagerSnapshot { current, links })
}

/// Lowest unvisited numbered link first; otherwise a trailing `...` link; otherwise done.
pub fn next_page(pager: &PagerSnapshot, visited: &BTreeSet<u32>) -> PageStep {
    if let Some(link) = pager
        .links
        .iter()
        .filter(|l| l.page.is_some_and(|p| !visited.contains(&p)))
        .min_by_key(|l| l.page)
    {
        return PageStep::Page {
            page: link.page.unwrap_or_default(),
            link_index: link.index,
        };
    }

    let last_numbered = pager
        .links
        .iter()
        .filter(|l| l.page.is_some())
        .map(|l| l.index)
        .max();
    let trailing = pager
        .links
        .iter()
        .filter(|l| l.is_ellipsis())
        .filter(|l| last_numbered.map_or(true, |last| l.index > last))
        .last();
    match trailing {
        Some(link) => PageStep::More {
            link_index: link.index,
        },
        None => PageStep::Done,
    }
}

/// Walk every page of the current grid, handing each page's HTML to `on_page`.
/// Returns the page numbers visited, in visiting order.
pub async fn for_each_page<F>(
    page: &dyn AdminPage,
    wait_timeout: std::time::Duration,
    mut on_page: F,
) -> Result<Vec<u32>, ScreenError>
where
    F: FnMut(u32, &str) -> Result<(), ScreenError> + Send,
{
    let mut visited = BTreeSet::new();
    let mut order = Vec::new();

    loop {
        let html = page.content().await?;
        let pager = parse_pager(&html)?;
        let current = pager.current.unwrap_or(1);
        if !visited.insert(current) {
            debug!(current, "pager returned to a visited page; stopping");
            break;
        }
        order.push(current);
        on_page(current, &html)?;
        if order.len() >= MAX_PAGES {
            break;
        }

        match next_page(&pager, &visited) {
            PageStep::Page { link_index, .. } | PageStep::More { link_index } => {
                page.click_nth(selectors::PAGER_LINK, link_index).await?;
                page.wait_for(selectors::ITEM_TABLE, wait_timeout).await?;
            }
            PageStep::Done => break,
        }
    }

    Ok(order)
}

/// Move the grid to page `target`, following `...` links when it is outside the window.
pub async fn goto_page(
    page: &dyn AdminPage,
    target: u32,
    wait_timeout: std::time::Duration,
) -> Result<(), ScreenError> {
    for _ in 0..MAX_PAGES {
        let html = page.content().await?;
        let pager = parse_pager(&html)?;
        let current = pager.current.unwrap_or(1);
        if current == target {
            return Ok(());
        }

        let numbered = pager.links.iter().filter_map(|l| l.page).collect::<Vec<_>>();
        let link_index = if let Some(link) = pager.links.iter().find(|l| l.page == Some(target)) {
            link.index
        } else {
            let ellipses = pager.links.iter().filter(|l| l.is_ellipsis()).collect::<Vec<_>>();
            let forward = target > numbered.iter().copied().max().unwrap_or(current).max(current);
            let pick = if forward { ellipses.last() } else { ellipses.first() };
            match pick {
                Some(link) => link.index,
                None => {
                    return Err(ScreenError::Extraction(format!(
                        "page {target} is not reachable from page {current}"
                    )))
                }
            }
        };
        page.click_nth(selectors::PAGER_LINK, link_index).await?;
        page.wait_for(selectors::ITEM_TABLE, wait_timeout).await?;
    }
    Err(ScreenError::Extraction(format!("page {target} not reached")))
}
