use std::time::Duration;
use thiserror::Error;

use super::platform::PlatformError;

/// Errors surfaced to the command layer by voice operations.
///
/// Remote 403/404-class failures are expected outcomes, not bugs: callers of
/// cleanup paths downgrade them to warnings, while direct user actions report
/// them as-is.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("channel creation is on cooldown for another {0:?}")]
    CooldownActive(Duration),
    #[error("another operation for this channel scope is already in progress")]
    ScopeLocked,
    #[error("no managed channel with id {0}")]
    UnknownChannel(u64),
    #[error("the current owner is still connected to the channel")]
    OwnerPresent,
    #[error("only the channel owner may do this")]
    NotOwner,
    #[error("the remote channel no longer exists")]
    RemoteNotFound,
    #[error("missing permissions for the remote operation")]
    RemoteForbidden,
    #[error("platform error: {0}")]
    Platform(String),
    #[error("database error: {0}")]
    Database(anyhow::Error),
}

impl From<PlatformError> for VoiceError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::NotFound => VoiceError::RemoteNotFound,
            PlatformError::Forbidden => VoiceError::RemoteForbidden,
            PlatformError::Other(msg) => VoiceError::Platform(msg),
        }
    }
}

impl From<anyhow::Error> for VoiceError {
    fn from(err: anyhow::Error) -> Self {
        VoiceError::Database(err)
    }
}
