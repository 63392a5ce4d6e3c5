//! Core types for pathreview.
//!
//! This crate holds the diff node model, the phase-aware status resolver,
//! hierarchical selection, search and pagination types, and configuration
//! shared by the rest of the workspace. Nothing here performs I/O apart from
//! reading the config file.

mod config;
mod error;
mod node;
mod page;
mod resolve;
mod selection;
mod stats;
mod status;

pub use config::{ENV_API_BASE, ENV_TOKEN, ReviewConfig, ReviewConfigBuilder};
pub use error::ReviewError;
pub use node::{BackendId, DiffNode, NodeKey, NodeSide, NodeTargets, NodeType, Side};
pub use page::{
    Comparison, Locator, NumericFilter, PAGE_SIZE_CHOICES, PageRequest, Pagination, SearchField,
    SearchQuery, SizeUnit, SortDir, SortField, StatusFilter, TypeFilter, sanitize_query,
};
pub use resolve::{ClickAction, Resolution, StatusCategory, resolve};
pub use selection::{
    Selected, SelectedEntry, Selection, SelectionAction, is_descendant, normalize_path,
};
pub use stats::{CopyBlocker, ReviewStats};
pub use status::{CopyStatus, MigrationPhase, TraversalStatus};
