//! Paginated window over folder pages or search results.
//!
//! Every request is described by a [`PageTicket`] carrying the locator it
//! was issued for, its sequence number, and the edit epoch at issue time.
//! Responses are matched against the window's current state when they
//! arrive, and stale ones are dropped.

use std::collections::BTreeSet;

use compact_str::CompactString;
use pathreview_api::{ApiError, DiffPage};
use pathreview_core::{
    DiffNode, Locator, NodeKey, PageRequest, Pagination, ReviewStats, SearchQuery,
};

/// One outstanding page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTicket {
    pub id: u64,
    pub locator: Locator,
    pub request: PageRequest,
    /// Concatenate onto the window instead of replacing it.
    pub append: bool,
    /// Edit epoch when the request was issued.
    pub epoch: u64,
}

/// Why a response was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stale {
    /// The window moved to another folder or query.
    Locator,
    /// A newer replacing load was issued after this one.
    Superseded,
    /// An edit settled after the request went out.
    PreEdit,
}

/// Result of applying a response.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Replaced(usize),
    Appended(usize),
    Failed(ApiError),
    Discarded(Stale),
}

/// The loaded slice of the diff.
#[derive(Debug, Clone)]
pub struct Window {
    locator: Locator,
    items: Vec<DiffNode>,
    pagination: Pagination,
    stats: Option<ReviewStats>,
    page_size: u64,
    show_dst_only: bool,
    next_ticket: u64,
    latest_replace: Option<u64>,
    outstanding: BTreeSet<u64>,
    error: Option<ApiError>,
}

impl Window {
    /// An empty window on the root folder.
    pub fn new(page_size: u64, show_dst_only: bool) -> Self {
        Self {
            locator: Locator::folder("/"),
            items: Vec::new(),
            pagination: Pagination::default(),
            stats: None,
            page_size: page_size.max(1),
            show_dst_only,
            next_ticket: 0,
            latest_replace: None,
            outstanding: BTreeSet::new(),
            error: None,
        }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn items(&self) -> &[DiffNode] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [DiffNode] {
        &mut self.items
    }

    pub fn node(&self, id: &NodeKey) -> Option<&DiffNode> {
        self.items.iter().find(|n| &n.id == id)
    }

    pub fn node_mut(&mut self, id: &NodeKey) -> Option<&mut DiffNode> {
        self.items.iter_mut().find(|n| &n.id == id)
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    /// Aggregates of the latest search page.
    pub fn stats(&self) -> Option<&ReviewStats> {
        self.stats.as_ref()
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn is_loading(&self) -> bool {
        !self.outstanding.is_empty()
    }

    /// Error of the last failed load, cleared by the next success.
    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    /// Current folder, when showing the tree.
    pub fn folder(&self) -> Option<&str> {
        match &self.locator {
            Locator::Folder(path) => Some(path),
            Locator::Search(_) => None,
        }
    }

    /// Ancestors of the current folder, root first, ending with the folder itself.
    pub fn breadcrumbs(&self) -> Vec<CompactString> {
        let Some(folder) = self.folder() else {
            return Vec::new();
        };
        let mut crumbs = vec![CompactString::const_new("/")];
        let mut path = CompactString::default();
        for segment in folder.split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(segment);
            crumbs.push(path.clone());
        }
        crumbs
    }

    fn issue(&mut self, locator: Locator, request: PageRequest, append: bool, epoch: u64) -> PageTicket {
        let id = self.next_ticket;
        self.next_ticket += 1;
        if !append {
            self.locator = locator.clone();
            self.latest_replace = Some(id);
        }
        self.outstanding.insert(id);
        tracing::debug!(target: "window", id, %locator, offset = request.offset, append, "Page requested");
        PageTicket {
            id,
            locator,
            request,
            append,
            epoch,
        }
    }

    /// Children of `path`. Always a replacing load.
    pub fn open_folder(&mut self, path: &str, epoch: u64) -> PageTicket {
        self.issue(
            Locator::folder(path),
            PageRequest::first(self.page_size),
            false,
            epoch,
        )
    }

    /// Parent folder of the current one; `None` at the root or in search.
    pub fn back(&mut self, epoch: u64) -> Option<PageTicket> {
        let crumbs = self.breadcrumbs();
        let parent = crumbs.len().checked_sub(2).map(|i| crumbs[i].clone())?;
        Some(self.open_folder(&parent, epoch))
    }

    /// Jump to breadcrumb `index`.
    pub fn jump(&mut self, index: usize, epoch: u64) -> Option<PageTicket> {
        let crumb = self.breadcrumbs().get(index).cloned()?;
        Some(self.open_folder(&crumb, epoch))
    }

    pub fn root(&mut self, epoch: u64) -> PageTicket {
        self.open_folder("/", epoch)
    }

    /// First page of `query`. Filter and sort changes always restart at offset 0.
    pub fn search(&mut self, query: SearchQuery, epoch: u64) -> PageTicket {
        self.issue(
            Locator::search(query),
            PageRequest::first(self.page_size),
            false,
            epoch,
        )
    }

    /// Next slice appended to the window, when there is one.
    pub fn load_more(&mut self, epoch: u64) -> Option<PageTicket> {
        if !self.pagination.has_next() || self.is_loading() {
            return None;
        }
        let request = PageRequest {
            offset: self.pagination.next_offset(),
            limit: self.page_size,
        };
        Some(self.issue(self.locator.clone(), request, true, epoch))
    }

    /// Replace the window with page `index`, bounded by the known total
    /// or by `has_more` when the total is unknown.
    pub fn goto_page(&mut self, index: u64, epoch: u64) -> Option<PageTicket> {
        let current = self.pagination.page_index();
        let allowed = match self.pagination.total_pages() {
            Some(pages) => index < pages.max(1),
            None => index <= current || (index == current + 1 && self.pagination.has_more),
        };
        if !allowed {
            return None;
        }
        let request = PageRequest::page(index, self.page_size);
        Some(self.issue(self.locator.clone(), request, false, epoch))
    }

    pub fn next_page(&mut self, epoch: u64) -> Option<PageTicket> {
        self.goto_page(self.pagination.page_index() + 1, epoch)
    }

    pub fn prev_page(&mut self, epoch: u64) -> Option<PageTicket> {
        let index = self.pagination.page_index().checked_sub(1)?;
        self.goto_page(index, epoch)
    }

    /// Change items per page and go back to the first page.
    pub fn set_page_size(&mut self, size: u64, epoch: u64) -> PageTicket {
        self.page_size = size.max(1);
        self.issue(
            self.locator.clone(),
            PageRequest::first(self.page_size),
            false,
            epoch,
        )
    }

    /// Re-read what is currently shown.
    pub fn reload(&mut self, epoch: u64) -> PageTicket {
        let request = match self.locator {
            // Appended folder pages are re-read in one request.
            Locator::Folder(_) => PageRequest::first((self.items.len() as u64).max(self.page_size)),
            Locator::Search(_) => PageRequest::page(self.pagination.page_index(), self.page_size),
        };
        self.issue(self.locator.clone(), request, false, epoch)
    }

    /// Issue `ticket` again under the current epoch.
    pub fn reissue(&mut self, ticket: &PageTicket, epoch: u64) -> PageTicket {
        self.outstanding.remove(&ticket.id);
        self.issue(ticket.locator.clone(), ticket.request, ticket.append, epoch)
    }

    fn staleness(&self, ticket: &PageTicket, epoch: u64) -> Option<Stale> {
        if ticket.locator != self.locator {
            return Some(Stale::Locator);
        }
        let superseded = match self.latest_replace {
            Some(latest) if ticket.append => ticket.id < latest,
            Some(latest) => ticket.id != latest,
            None => false,
        };
        if superseded {
            return Some(Stale::Superseded);
        }
        (ticket.epoch < epoch).then_some(Stale::PreEdit)
    }

    /// Apply the response to `ticket`. `epoch` is the current edit epoch.
    pub fn accept(
        &mut self,
        ticket: &PageTicket,
        response: Result<DiffPage, ApiError>,
        epoch: u64,
    ) -> LoadOutcome {
        self.outstanding.remove(&ticket.id);

        if let Some(stale) = self.staleness(ticket, epoch) {
            tracing::debug!(target: "window", id = ticket.id, ?stale, "Discarding page");
            return LoadOutcome::Discarded(stale);
        }

        let page = match response {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(target: "window", locator = %ticket.locator, error = %err, "Page load failed");
                self.error = Some(err.clone());
                return LoadOutcome::Failed(err);
            }
        };
        self.error = None;

        let hide_dst_only = ticket.locator.is_folder() && !self.show_dst_only;
        let items: Vec<DiffNode> = page
            .items
            .into_iter()
            .filter(|node| !hide_dst_only || node.visible_in_tree())
            .collect();
        let count = items.len();

        self.pagination = page.pagination;
        if page.stats.is_some() {
            self.stats = page.stats;
        }

        if ticket.append {
            self.items.extend(items);
            LoadOutcome::Appended(count)
        } else {
            self.items = items;
            LoadOutcome::Replaced(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathreview_core::{NodeSide, NodeType};

    fn page(items: Vec<DiffNode>, offset: u64, total: u64) -> DiffPage {
        let limit = 2;
        DiffPage {
            pagination: Pagination {
                offset,
                limit,
                total: Some(total),
                has_more: offset + limit < total,
            },
            items,
            stats: None,
        }
    }

    fn file(id: &str, path: &str) -> DiffNode {
        DiffNode::new_src_only(id, path, NodeType::File, NodeSide::new(format!("s-{id}")))
    }

    #[test]
    fn test_breadcrumbs() {
        let mut window = Window::new(2, false);
        let ticket = window.open_folder("/a/b", 0);
        assert_eq!(ticket.locator, Locator::folder("/a/b"));
        assert_eq!(window.breadcrumbs(), vec!["/", "/a", "/a/b"]);

        let back = window.back(0).unwrap();
        assert_eq!(back.locator, Locator::folder("/a"));
        window.root(0);
        assert!(window.back(0).is_none());
    }

    #[test]
    fn test_append_then_stale_locator() {
        let mut window = Window::new(2, false);
        let first = window.open_folder("/x", 0);
        window.accept(&first, Ok(page(vec![file("1", "/x/1"), file("2", "/x/2")], 0, 3)), 0);

        let more = window.load_more(0).unwrap();
        assert_eq!(more.request.offset, 2);

        let other = window.open_folder("/y", 0);
        assert_eq!(
            window.accept(&more, Ok(page(vec![file("3", "/x/3")], 2, 3)), 0),
            LoadOutcome::Discarded(Stale::Locator)
        );
        assert_eq!(
            window.accept(&other, Ok(page(vec![file("9", "/y/9")], 0, 1)), 0),
            LoadOutcome::Replaced(1)
        );
        assert_eq!(window.items().len(), 1);
    }

    #[test]
    fn test_superseded_replace() {
        let mut window = Window::new(2, false);
        let query = SearchQuery::new().with_text("a");
        let old = window.search(query.clone(), 0);
        let new = window.search(query, 0);
        assert_eq!(
            window.accept(&old, Ok(page(vec![], 0, 0)), 0),
            LoadOutcome::Discarded(Stale::Superseded)
        );
        assert_eq!(
            window.accept(&new, Ok(page(vec![file("1", "/1")], 0, 1)), 0),
            LoadOutcome::Replaced(1)
        );
    }

    #[test]
    fn test_pre_edit_response_discarded() {
        let mut window = Window::new(2, false);
        let ticket = window.open_folder("/", 0);
        assert_eq!(
            window.accept(&ticket, Ok(page(vec![], 0, 0)), 1),
            LoadOutcome::Discarded(Stale::PreEdit)
        );
        let again = window.reissue(&ticket, 1);
        assert_eq!(
            window.accept(&again, Ok(page(vec![], 0, 0)), 1),
            LoadOutcome::Replaced(0)
        );
    }

    #[test]
    fn test_tree_hides_dst_only() {
        let mut window = Window::new(10, false);
        let ticket = window.open_folder("/", 0);
        let dst_only = DiffNode::new_dst_only("d", "/d", NodeType::File, NodeSide::new("d"));
        window.accept(&ticket, Ok(page(vec![file("1", "/1"), dst_only.clone()], 0, 2)), 0);
        assert_eq!(window.items().len(), 1);

        let mut showing = Window::new(10, true);
        let ticket = showing.open_folder("/", 0);
        showing.accept(&ticket, Ok(page(vec![file("1", "/1"), dst_only], 0, 2)), 0);
        assert_eq!(showing.items().len(), 2);
    }

    #[test]
    fn test_page_bounds() {
        let mut window = Window::new(2, false);
        let ticket = window.search(SearchQuery::new(), 0);
        window.accept(&ticket, Ok(page(vec![file("1", "/1"), file("2", "/2")], 0, 3)), 0);

        assert!(window.prev_page(0).is_none());
        let next = window.next_page(0).unwrap();
        assert_eq!(next.request.offset, 2);
        window.accept(&next, Ok(page(vec![file("3", "/3")], 2, 3)), 0);
        assert!(window.next_page(0).is_none());

        let resized = window.set_page_size(50, 0);
        assert_eq!(resized.request, PageRequest::first(50));
    }

    #[test]
    fn test_failed_load_sets_error() {
        let mut window = Window::new(2, false);
        let ticket = window.open_folder("/", 0);
        let err = ApiError::Status {
            status: 500,
            body: "down".into(),
        };
        assert_eq!(
            window.accept(&ticket, Err(err.clone()), 0),
            LoadOutcome::Failed(err)
        );
        assert!(window.error().is_some());
        assert!(!window.is_loading());
    }
}
