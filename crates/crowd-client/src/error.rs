use common::BackendError;
use thiserror::Error;

use crate::camera::CameraError;
use crate::decoder::DecodeError;

/// Failures the client can surface, grouped by how they are handled.
///
/// Each variant stays local to the operation that produced it: transport and
/// decode failures are logged and absorbed, upstream and camera failures turn
/// into user-visible notices.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Push channel could not be established or dropped
    #[error("push channel unavailable: {0}")]
    Transport(String),

    /// A single push message could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Video analysis, frame analysis or frame listing request failed
    #[error(transparent)]
    Upstream(#[from] BackendError),

    /// Camera could not be acquired or read
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The session controller has shut down
    #[error("session closed")]
    SessionClosed,
}

impl ClientError {
    /// Whether the failure should be shown to the user as a notice
    pub fn is_user_visible(&self) -> bool {
        matches!(self, ClientError::Upstream(_) | ClientError::Camera(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
