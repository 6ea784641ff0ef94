//! Page arithmetic and pagination links.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use url::form_urlencoded;

/// Query parameter carrying the page number.
pub const PAGE_NUMBER_PARAM: &str = "page_number";

/// Position of one page within a result list. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    pub total_entries: usize,
    pub entries_per_page: usize,
    pub current_page: usize,
}

impl Pager {
    /// Page size and page number below 1 are raised to 1.
    pub fn new(total_entries: usize, entries_per_page: usize, current_page: usize) -> Self {
        Self {
            total_entries,
            entries_per_page: entries_per_page.max(1),
            current_page: current_page.max(1),
        }
    }

    pub fn first_page(&self) -> usize {
        1
    }

    /// At least 1, also for an empty result list.
    pub fn last_page(&self) -> usize {
        self.total_entries.div_ceil(self.entries_per_page).max(1)
    }

    /// 1-based number of the first entry on the current page; 0 when empty.
    /// Saturates at `usize::MAX` for pages far past the end.
    pub fn first(&self) -> usize {
        if self.total_entries == 0 {
            0
        } else {
            (self.current_page - 1)
                .saturating_mul(self.entries_per_page)
                .saturating_add(1)
        }
    }

    /// 1-based number of the last entry on the current page.
    pub fn last(&self) -> usize {
        if self.current_page == self.last_page() {
            self.total_entries
        } else {
            self.current_page.saturating_mul(self.entries_per_page)
        }
    }

    pub fn previous_page(&self) -> Option<usize> {
        (self.current_page > 1).then(|| self.current_page - 1)
    }

    pub fn next_page(&self) -> Option<usize> {
        (self.current_page < self.last_page()).then(|| self.current_page + 1)
    }
}

impl Serialize for Pager {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Pager", 9)?;
        state.serialize_field("total_entries", &self.total_entries)?;
        state.serialize_field("entries_per_page", &self.entries_per_page)?;
        state.serialize_field("current_page", &self.current_page)?;
        state.serialize_field("first_page", &self.first_page())?;
        state.serialize_field("last_page", &self.last_page())?;
        state.serialize_field("first", &self.first())?;
        state.serialize_field("last", &self.last())?;
        state.serialize_field("previous_page", &self.previous_page())?;
        state.serialize_field("next_page", &self.next_page())?;
        state.end()
    }
}

/// One entry of a pagination bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLink {
    pub label: String,
    pub current: bool,
    pub url: String,
    pub class: String,
}

/// Builds the pagination bar: optional "Previous", one link per page, and
/// optional "Next". `None` when everything fits on one page.
///
/// Every link keeps `params` (minus any page number) and sets its own
/// page number.
pub fn paginator(pager: &Pager, base_url: &str, params: &[(String, String)]) -> Option<Vec<PageLink>> {
    if pager.last_page() == 1 {
        return None;
    }

    let common: Vec<(&str, &str)> = params
        .iter()
        .filter(|(name, _)| name != PAGE_NUMBER_PARAM)
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    let link = |label: String, page: usize, current: bool, class: &str| PageLink {
        label,
        current,
        url: paged_url(base_url, &common, page),
        class: format!("page-link page-link-{class}"),
    };

    let mut out = Vec::new();
    if let Some(previous) = pager.previous_page() {
        out.push(link("Previous".to_string(), previous, false, "previous"));
    }
    for page in pager.first_page()..=pager.last_page() {
        out.push(link(
            page.to_string(),
            page,
            page == pager.current_page,
            &page.to_string(),
        ));
    }
    if let Some(next) = pager.next_page() {
        out.push(link("Next".to_string(), next, false, "next"));
    }
    Some(out)
}

fn paged_url(base_url: &str, common: &[(&str, &str)], page: usize) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(common.iter().copied())
        .append_pair(PAGE_NUMBER_PARAM, &page.to_string())
        .finish();
    format!("{base_url}?{query}")
}
