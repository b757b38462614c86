//! Sources of refreshed access tokens

use std::error;

use async_trait::async_trait;

use crate::{AccessToken, RefreshToken, RefreshTokenRef};

#[cfg(feature = "endpoint")]
pub mod endpoint;

#[cfg(feature = "endpoint")]
pub use endpoint::RefreshEndpointSource;

/// The tokens issued by a successful refresh
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshedTokens {
    /// The new access token
    pub access_token: AccessToken,
    /// A replacement refresh token, if the authority rotates them
    pub refresh_token: Option<RefreshToken>,
}

/// An asynchronous source for refreshed access tokens
#[async_trait]
pub trait AsyncTokenRefresher: Send + Sync {
    /// The error type returned in the event that refreshing fails
    type Error: error::Error + Send + Sync + 'static;

    /// Exchanges a refresh token for a new access token
    async fn refresh(&self, refresh_token: &RefreshTokenRef)
        -> Result<RefreshedTokens, Self::Error>;
}
