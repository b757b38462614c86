use std::{error, sync::Arc, time::Duration};

use thiserror::Error;

use crate::store::StoreError;

/// The reason a session could not be kept alive
#[derive(Debug, Error)]
pub enum RefreshError {
    /// There is no refresh token to exchange
    #[error("no refresh token is available")]
    MissingRefreshToken,
    /// The refresh call did not settle in time
    #[error("token refresh did not complete within {0:?}")]
    TimedOut(Duration),
    /// The refresh source refused or failed to issue a new token
    #[error("token refresh was rejected")]
    Rejected(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// A request replayed with a freshly refreshed token was rejected again
    #[error("request was rejected again after refreshing the access token")]
    RetryRejected,
    /// The session was ended explicitly while the request was waiting
    #[error("session was ended while waiting for a token refresh")]
    SessionEnded,
    /// Stored credentials could not be read
    #[error("unable to read stored credentials")]
    Store(#[from] StoreError),
    /// The refresh task panicked or was cancelled before settling
    #[error("token refresh was abandoned before it settled")]
    Abandoned,
}

/// A terminal authorization failure
///
/// Every request waiting on the same failed refresh receives a clone of the
/// same error.
#[derive(Clone, Debug, Error)]
#[error("session expired")]
pub struct SessionExpired {
    #[source]
    cause: Arc<RefreshError>,
}

impl SessionExpired {
    pub(crate) fn new(cause: RefreshError) -> Self {
        Self {
            cause: Arc::new(cause),
        }
    }

    /// The reason the session expired
    pub fn cause(&self) -> &RefreshError {
        &self.cause
    }
}
