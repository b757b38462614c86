//! A refresh source that calls the backend's refresh endpoint
//!
//! The endpoint accepts `{ "refresh": "<token>" }` and answers a successful
//! exchange with `{ "access": "<token>" }`, optionally including a rotated
//! `"refresh"` token.

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use thiserror::Error;

use super::{AsyncTokenRefresher, RefreshedTokens};
use crate::RefreshTokenRef;

mod dto;

/// A refresh source backed by an HTTP endpoint
///
/// The client given to this source should not itself carry the session
/// middleware stack, or a rejected refresh could try to refresh itself.
#[derive(Clone, Debug)]
pub struct RefreshEndpointSource {
    client: ClientWithMiddleware,
    refresh_url: reqwest::Url,
}

impl RefreshEndpointSource {
    /// Constructs a new refresh endpoint source
    pub fn new(client: reqwest::Client, refresh_url: reqwest::Url) -> Self {
        Self::with_middleware_client(client.into(), refresh_url)
    }

    /// Constructs a refresh endpoint source over a client with its own middleware
    pub fn with_middleware_client(client: ClientWithMiddleware, refresh_url: reqwest::Url) -> Self {
        Self {
            client,
            refresh_url,
        }
    }

    /// The URL that refresh requests are sent to
    pub fn refresh_url(&self) -> &reqwest::Url {
        &self.refresh_url
    }
}

#[async_trait]
impl AsyncTokenRefresher for RefreshEndpointSource {
    type Error = RefreshEndpointError;

    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<RefreshedTokens, Self::Error> {
        request_refresh(&self.client, self.refresh_url.clone(), refresh_token).await
    }
}

/// An error while attempting to refresh an access token
#[derive(Debug, Error)]
pub enum RefreshEndpointError {
    /// The endpoint answered with an error status
    #[error("refresh endpoint responded with {status}: {body}")]
    ErrorWithBody {
        /// The response status
        status: reqwest::StatusCode,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing refreshed token body")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send the refresh request
    #[error("error sending request to refresh endpoint")]
    RequestSend(#[source] reqwest_middleware::Error),
}

#[tracing::instrument(
    err,
    skip(client, refresh_url, refresh_token),
    fields(refresh_url = %refresh_url),
)]
async fn request_refresh(
    client: &ClientWithMiddleware,
    refresh_url: reqwest::Url,
    refresh_token: &RefreshTokenRef,
) -> Result<RefreshedTokens, RefreshEndpointError> {
    tracing::trace!("requesting refreshed access token");

    let resp = client
        .post(refresh_url)
        .json(&dto::RefreshRequest {
            refresh: refresh_token,
        })
        .send()
        .await
        .map_err(RefreshEndpointError::RequestSend)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received refresh response"
    );

    if !status.is_success() {
        let body = resp
            .text()
            .await
            .map_err(RefreshEndpointError::BodyReadError)?;
        return Err(RefreshEndpointError::ErrorWithBody { status, body });
    }

    let body = resp
        .bytes()
        .await
        .map_err(RefreshEndpointError::BodyReadError)?;
    let resp: dto::RefreshResponse = serde_json::from_slice(&body)?;

    tracing::info!(
        has_refresh_token = resp.refresh.is_some(),
        "received refreshed access token"
    );

    Ok(RefreshedTokens {
        access_token: resp.access,
        refresh_token: resp.refresh,
    })
}
