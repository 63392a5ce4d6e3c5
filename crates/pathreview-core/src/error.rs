//! Error types shared by the review engine.

use thiserror::Error;

use crate::node::NodeKey;
use crate::status::MigrationPhase;

/// Errors raised locally, before any remote call is made.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReviewError {
    /// The node carries no backend id on either side.
    #[error("Node {node} has no backend id")]
    NoBackendId { node: NodeKey },

    /// The node is not part of the loaded window.
    #[error("Node {node} is not loaded")]
    UnknownNode { node: NodeKey },

    /// The edit is not permitted in the current phase.
    #[error("{action} is not permitted during {phase}")]
    PhaseLocked {
        action: &'static str,
        phase: MigrationPhase,
    },

    /// The node is read-only (locked folder or destination-only).
    #[error("Node {node} is read-only")]
    ReadOnly { node: NodeKey },

    /// A search filter could not be parsed.
    #[error("Invalid filter: {message}")]
    InvalidFilter { message: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl ReviewError {
    /// Phase violations are silent no-ops rather than user-facing errors.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::PhaseLocked { .. } | Self::ReadOnly { .. })
    }
}
