//! Diff node types.

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::ReviewError;
use crate::status::{CopyStatus, TraversalStatus};

/// Identifier of a node within the current view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(pub CompactString);

impl NodeKey {
    pub fn new(key: impl Into<CompactString>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Backend identifier of one side of a node. Independent per side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(pub CompactString);

impl BackendId {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Folder or file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Folder,
    File,
}

/// Which side of the comparison a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Src,
    Dst,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Src => write!(f, "src"),
            Self::Dst => write!(f, "dst"),
        }
    }
}

/// Per-side record of a compared node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSide {
    pub id: BackendId,
    #[serde(default)]
    pub traversal_status: TraversalStatus,
    #[serde(default)]
    pub copy_status: CopyStatus,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Files only.
    #[serde(default)]
    pub size: Option<u64>,
}

impl NodeSide {
    /// A discovered side: traversal succeeded, copy pending.
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self {
            id: BackendId::new(id),
            traversal_status: TraversalStatus::Successful,
            copy_status: CopyStatus::default(),
            last_updated: None,
            size: None,
        }
    }

    pub fn with_traversal(mut self, status: TraversalStatus) -> Self {
        self.traversal_status = status;
        self
    }

    pub fn with_copy(mut self, status: CopyStatus) -> Self {
        self.copy_status = status;
        self
    }
}

/// One compared filesystem entity and its dual src/dst presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffNode {
    pub id: NodeKey,
    #[serde(alias = "displayName")]
    pub name: CompactString,
    pub location_path: CompactString,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub in_src: bool,
    pub in_dst: bool,
    #[serde(default)]
    pub src: Option<NodeSide>,
    #[serde(default)]
    pub dst: Option<NodeSide>,
    /// Mirror of `src.copy_status`, used when `src` is absent.
    #[serde(default)]
    pub copy_status: Option<CopyStatus>,
    /// Mirror of the primary side's traversal status.
    #[serde(default)]
    pub traversal_status: Option<TraversalStatus>,
    #[serde(default)]
    pub depth_level: Option<u32>,
    #[serde(default)]
    pub size: Option<u64>,
    /// Client-side flag: the user asked for this node to be retried.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retry_marked: bool,
}

impl DiffNode {
    /// Create a node present on the source only.
    pub fn new_src_only(
        id: impl Into<CompactString>,
        location_path: impl Into<CompactString>,
        node_type: NodeType,
        src: NodeSide,
    ) -> Self {
        let location_path = location_path.into();
        Self {
            id: NodeKey::new(id),
            name: name_from_path(&location_path),
            location_path,
            node_type,
            in_src: true,
            in_dst: false,
            copy_status: Some(src.copy_status),
            traversal_status: Some(src.traversal_status),
            src: Some(src),
            dst: None,
            depth_level: None,
            size: None,
            retry_marked: false,
        }
    }

    /// Create a node present on both sides.
    pub fn new_on_both(
        id: impl Into<CompactString>,
        location_path: impl Into<CompactString>,
        node_type: NodeType,
        src: NodeSide,
        dst: NodeSide,
    ) -> Self {
        let mut node = Self::new_src_only(id, location_path, node_type, src);
        node.in_dst = true;
        node.dst = Some(dst);
        node
    }

    /// Create a node present on the destination only.
    pub fn new_dst_only(
        id: impl Into<CompactString>,
        location_path: impl Into<CompactString>,
        node_type: NodeType,
        dst: NodeSide,
    ) -> Self {
        let location_path = location_path.into();
        Self {
            id: NodeKey::new(id),
            name: name_from_path(&location_path),
            location_path,
            node_type,
            in_src: false,
            in_dst: true,
            copy_status: None,
            traversal_status: Some(TraversalStatus::NotOnSrc),
            src: None,
            dst: Some(dst),
            depth_level: None,
            size: None,
            retry_marked: false,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.node_type == NodeType::Folder
    }

    pub fn is_file(&self) -> bool {
        self.node_type == NodeType::File
    }

    /// Present on the destination but not the source. Informational only.
    pub fn is_dst_only(&self) -> bool {
        !self.in_src && self.in_dst
    }

    pub fn exists_on_both(&self) -> bool {
        self.in_src && self.in_dst
    }

    /// Folders present on both sides cannot be edited.
    pub fn is_locked(&self) -> bool {
        self.is_folder() && self.exists_on_both()
    }

    /// A node present on neither side is never produced by the backend.
    pub fn is_valid(&self) -> bool {
        self.in_src || self.in_dst
    }

    /// Copy status of the primary side, falling back to the mirror.
    pub fn effective_copy_status(&self) -> CopyStatus {
        self.src
            .as_ref()
            .map(|s| s.copy_status)
            .or(self.copy_status)
            .unwrap_or_default()
    }

    /// Either side failed traversal.
    pub fn traversal_failed(&self) -> bool {
        self.sides().any(|s| s.traversal_status.is_failed())
            || self.traversal_status.is_some_and(TraversalStatus::is_failed)
    }

    /// Either side is waiting on (re)traversal.
    pub fn traversal_pending(&self) -> bool {
        self.sides().any(|s| s.traversal_status.is_pending())
            || self.traversal_status.is_some_and(TraversalStatus::is_pending)
    }

    /// Hidden from folder pages unless destination-only nodes are requested.
    pub fn visible_in_tree(&self) -> bool {
        self.in_src && self.traversal_status != Some(TraversalStatus::NotOnSrc)
    }

    pub fn sides(&self) -> impl Iterator<Item = &NodeSide> {
        self.src.iter().chain(self.dst.iter())
    }

    pub fn side(&self, side: Side) -> Option<&NodeSide> {
        match side {
            Side::Src => self.src.as_ref(),
            Side::Dst => self.dst.as_ref(),
        }
    }

    pub fn side_mut(&mut self, side: Side) -> Option<&mut NodeSide> {
        match side {
            Side::Src => self.src.as_mut(),
            Side::Dst => self.dst.as_mut(),
        }
    }

    /// Backend ids a mutation on this node must address, primary first.
    ///
    /// `src.id` always when present; `dst.id` additionally when present and
    /// distinct from `src.id`.
    pub fn targets(&self) -> Result<NodeTargets, ReviewError> {
        let src = self.src.as_ref().map(|s| s.id.clone());
        let dst = self
            .dst
            .as_ref()
            .map(|d| d.id.clone())
            .filter(|d| src.as_ref() != Some(d));

        match (src, dst) {
            (Some(primary), secondary) => Ok(NodeTargets {
                primary: (Side::Src, primary),
                secondary: secondary.map(|id| (Side::Dst, id)),
            }),
            (None, Some(primary)) => Ok(NodeTargets {
                primary: (Side::Dst, primary),
                secondary: None,
            }),
            (None, None) => Err(ReviewError::NoBackendId {
                node: self.id.clone(),
            }),
        }
    }

    /// Display size: file size of the primary side, or the mirror.
    pub fn display_size(&self) -> Option<u64> {
        self.src
            .as_ref()
            .and_then(|s| s.size)
            .or_else(|| self.dst.as_ref().and_then(|d| d.size))
            .or(self.size)
    }

    /// Path depth, counted in segments below the root.
    pub fn depth(&self) -> u32 {
        self.depth_level.unwrap_or_else(|| {
            self.location_path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .count() as u32
        })
    }
}

/// Backend ids addressed by a single-node mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTargets {
    pub primary: (Side, BackendId),
    pub secondary: Option<(Side, BackendId)>,
}

impl NodeTargets {
    pub fn iter(&self) -> impl Iterator<Item = &(Side, BackendId)> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    pub fn ids(&self) -> impl Iterator<Item = &BackendId> {
        self.iter().map(|(_, id)| id)
    }

    pub fn len(&self) -> usize {
        1 + usize::from(self.secondary.is_some())
    }

    pub fn is_dual(&self) -> bool {
        self.secondary.is_some()
    }
}

fn name_from_path(path: &str) -> CompactString {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("/")
        .into()
}
