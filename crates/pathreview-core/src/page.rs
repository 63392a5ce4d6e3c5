//! Pagination, window locators and list-view search filters.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::ReviewError;
use crate::selection::normalize_path;

/// Items per page offered by the list view.
pub const PAGE_SIZE_CHOICES: [u64; 4] = [50, 100, 500, 1000];

/// Paging metadata returned with every page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
    /// Unknown for some backends; `has_more` is authoritative then.
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub has_more: bool,
}

impl Pagination {
    /// Offset of the page following this one.
    pub fn next_offset(&self) -> u64 {
        self.offset + self.limit
    }

    pub fn has_next(&self) -> bool {
        match self.total {
            Some(total) => self.next_offset() < total,
            None => self.has_more,
        }
    }

    /// Zero-based page index.
    pub fn page_index(&self) -> u64 {
        if self.limit == 0 {
            0
        } else {
            self.offset / self.limit
        }
    }

    pub fn total_pages(&self) -> Option<u64> {
        if self.limit == 0 {
            return None;
        }
        self.total.map(|total| total.div_ceil(self.limit))
    }

    /// Items not yet loaded, when the total is known.
    pub fn remaining(&self, loaded: u64) -> Option<u64> {
        self.total.map(|total| total.saturating_sub(loaded))
    }
}

/// Offset/limit of a page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u64,
}

impl PageRequest {
    pub fn first(limit: u64) -> Self {
        Self { offset: 0, limit }
    }

    pub fn page(index: u64, limit: u64) -> Self {
        Self {
            offset: index * limit,
            limit,
        }
    }
}

/// Which slice of the diff a window shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Children of one folder (tree view).
    Folder(CompactString),
    /// A flat filtered and sorted slice (list view).
    Search(Box<SearchQuery>),
}

impl Locator {
    pub fn folder(path: &str) -> Self {
        Self::Folder(normalize_path(path).as_ref().into())
    }

    pub fn search(query: SearchQuery) -> Self {
        Self::Search(Box::new(query))
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder(_))
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Folder(path) => write!(f, "folder {path}"),
            Self::Search(query) => match &query.text {
                Some(text) => write!(f, "search \"{text}\""),
                None => write!(f, "search"),
            },
        }
    }
}

/// Field the free-text query matches against.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SearchField {
    #[default]
    Path,
    Name,
}

/// Node type filter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TypeFilter {
    #[default]
    Both,
    Folder,
    File,
}

/// Comparison operator for numeric filters.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Comparison {
    #[default]
    #[strum(to_string = "equals", serialize = "eq")]
    Equals,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn matches(self, value: u64, operand: u64) -> bool {
        match self {
            Self::Equals => value == operand,
            Self::Gt => value > operand,
            Self::Gte => value >= operand,
            Self::Lt => value < operand,
            Self::Lte => value <= operand,
        }
    }
}

/// Unit a size filter is entered in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum SizeUnit {
    #[default]
    #[serde(rename = "bytes")]
    #[strum(to_string = "bytes", serialize = "b")]
    Bytes,
    #[serde(rename = "KB")]
    #[strum(serialize = "KB")]
    Kb,
    #[serde(rename = "MB")]
    #[strum(serialize = "MB")]
    Mb,
    #[serde(rename = "GB")]
    #[strum(serialize = "GB")]
    Gb,
}

impl SizeUnit {
    pub fn multiplier(self) -> u64 {
        match self {
            Self::Bytes => 1,
            Self::Kb => 1024,
            Self::Mb => 1024 * 1024,
            Self::Gb => 1024 * 1024 * 1024,
        }
    }

    /// Convert a value in this unit to whole bytes.
    pub fn to_bytes(self, value: f64) -> Result<u64, ReviewError> {
        if !value.is_finite() || value < 0.0 {
            return Err(ReviewError::InvalidFilter {
                message: format!("size must be a non-negative number, got {value}"),
            });
        }
        Ok((value * self.multiplier() as f64).round() as u64)
    }
}

/// Status filter; traversal- or copy-scoped depending on the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum StatusFilter {
    #[serde(rename = "pending")]
    #[strum(serialize = "pending")]
    Pending,
    #[serde(rename = "failed")]
    #[strum(serialize = "failed")]
    Failed,
    #[serde(rename = "NotOnSrc")]
    #[strum(to_string = "NotOnSrc", serialize = "not_on_src")]
    NotOnSrc,
    #[serde(rename = "excluded")]
    #[strum(serialize = "excluded")]
    Excluded,
}

/// Sortable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum SortField {
    Name,
    Path,
    Depth,
    Size,
    Type,
    TraversalStatus,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    pub fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// A numeric filter: operator plus operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericFilter<T> {
    pub op: Comparison,
    pub value: T,
}

/// Filters and sort order of a list-view search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    #[serde(default)]
    pub text: Option<CompactString>,
    #[serde(default)]
    pub field: SearchField,
    #[serde(default)]
    pub type_filter: TypeFilter,
    #[serde(default)]
    pub depth: Option<NumericFilter<u32>>,
    /// Always in bytes.
    #[serde(default)]
    pub size: Option<NumericFilter<u64>>,
    #[serde(default)]
    pub status: Option<StatusFilter>,
    #[serde(default)]
    pub sort: Option<SortField>,
    #[serde(default)]
    pub sort_dir: SortDir,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the free-text query, sanitized. Blank input clears it.
    pub fn with_text(mut self, raw: &str) -> Self {
        self.text = sanitize_query(raw);
        self
    }

    pub fn with_field(mut self, field: SearchField) -> Self {
        self.field = field;
        self
    }

    pub fn with_type(mut self, type_filter: TypeFilter) -> Self {
        self.type_filter = type_filter;
        self
    }

    pub fn with_depth(mut self, op: Comparison, value: u32) -> Self {
        self.depth = Some(NumericFilter { op, value });
        self
    }

    /// Size filter entered in `unit`; stored in bytes.
    pub fn with_size(mut self, op: Comparison, value: f64, unit: SizeUnit) -> Result<Self, ReviewError> {
        self.size = Some(NumericFilter {
            op,
            value: unit.to_bytes(value)?,
        });
        Ok(self)
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_sort(mut self, field: SortField, dir: SortDir) -> Self {
        self.sort = Some(field);
        self.sort_dir = dir;
        self
    }

    /// Sort by `field`; selecting the active field again flips the direction.
    pub fn toggle_sort(&mut self, field: SortField) {
        if self.sort == Some(field) {
            self.sort_dir = self.sort_dir.flipped();
        } else {
            self.sort = Some(field);
            self.sort_dir = SortDir::Asc;
        }
    }

    /// Size filter that applies; folders carry no size.
    pub fn effective_size(&self) -> Option<NumericFilter<u64>> {
        match self.type_filter {
            TypeFilter::Folder => None,
            _ => self.size,
        }
    }

    /// Drop every filter, keeping the sort order.
    pub fn clear_filters(&mut self) {
        *self = Self {
            sort: self.sort,
            sort_dir: self.sort_dir,
            ..Self::default()
        };
    }

    pub fn has_filters(&self) -> bool {
        self.text.is_some()
            || self.type_filter != TypeFilter::Both
            || self.depth.is_some()
            || self.effective_size().is_some()
            || self.status.is_some()
    }
}

/// Trim and strip control characters. `None` when nothing is left.
pub fn sanitize_query(raw: &str) -> Option<CompactString> {
    let cleaned: CompactString = raw.trim().chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_pagination_has_next() {
        let page = Pagination {
            offset: 100,
            limit: 100,
            total: Some(250),
            has_more: false,
        };
        assert!(page.has_next());
        assert_eq!(page.total_pages(), Some(3));
        assert_eq!(page.page_index(), 1);

        let last = Pagination {
            offset: 200,
            ..page
        };
        assert!(!last.has_next());

        let unknown = Pagination {
            offset: 0,
            limit: 50,
            total: None,
            has_more: true,
        };
        assert!(unknown.has_next());
        assert_eq!(unknown.total_pages(), None);
    }

    #[test]
    fn test_sanitize_query() {
        assert_eq!(sanitize_query("  foo\u{0}bar\n "), Some("foobar".into()));
        assert_eq!(sanitize_query(" \t "), None);
    }

    #[test]
    fn test_size_units() {
        assert_eq!(SizeUnit::Mb.to_bytes(1.5).unwrap(), 1_572_864);
        assert_eq!(SizeUnit::from_str("kb").unwrap(), SizeUnit::Kb);
        assert!(SizeUnit::Gb.to_bytes(-1.0).is_err());
    }

    #[test]
    fn test_toggle_sort_flips_direction() {
        let mut query = SearchQuery::new();
        query.toggle_sort(SortField::Size);
        assert_eq!(query.sort_dir, SortDir::Asc);
        query.toggle_sort(SortField::Size);
        assert_eq!(query.sort_dir, SortDir::Desc);
        query.toggle_sort(SortField::Name);
        assert_eq!(query.sort, Some(SortField::Name));
        assert_eq!(query.sort_dir, SortDir::Asc);
    }

    #[test]
    fn test_size_ignored_for_folders() {
        let query = SearchQuery::new()
            .with_type(TypeFilter::Folder)
            .with_size(Comparison::Gt, 10.0, SizeUnit::Kb)
            .unwrap();
        assert!(query.effective_size().is_none());
        assert!(query.has_filters());
    }

    #[test]
    fn test_clear_filters_keeps_sort() {
        let mut query = SearchQuery::new()
            .with_text("docs")
            .with_status(StatusFilter::Failed)
            .with_sort(SortField::Depth, SortDir::Desc);
        query.clear_filters();
        assert!(!query.has_filters());
        assert_eq!(query.sort, Some(SortField::Depth));
        assert_eq!(query.sort_dir, SortDir::Desc);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(StatusFilter::NotOnSrc.to_string(), "NotOnSrc");
        assert_eq!(SortField::TraversalStatus.to_string(), "traversalStatus");
        assert_eq!(Comparison::from_str("eq").unwrap(), Comparison::Equals);
        assert_eq!(Comparison::Gte.to_string(), "gte");
    }
}
