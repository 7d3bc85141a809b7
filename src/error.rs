//! Error types for the overlay engine.

use crate::types::Position;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("world '{0}' is not loaded")]
    UnknownWorld(String),

    #[error("position {0} is already owned by another overlay")]
    PositionOccupied(Position),

    #[error("{axis} coordinate {value} does not fit the packed key")]
    CoordinateOutOfRange { axis: char, value: i32 },

    #[error("position {0} is not part of this group")]
    NotAMember(Position),

    #[error("overlay is not a group")]
    NotAGroup,

    #[error("overlay is no longer registered")]
    Detached,

    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OverlayError>;
