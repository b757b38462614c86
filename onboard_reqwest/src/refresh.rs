use onboard_tokens::RefreshCoordinator;
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Error, Middleware, Next, Result};

use crate::{
    authenticate::AttachedToken,
    retry::{self, RetriedAfterRefresh},
};

/// A middleware that recovers from expired access tokens
///
/// When a request sent with a stored access token is rejected with
/// `401 Unauthorized`, the request is held until the [`RefreshCoordinator`]
/// has a new token and is then replayed once with it. However many requests
/// are rejected together, they share a single refresh.
///
/// If the refresh fails, or the replay is rejected as well, the request fails
/// with [`SessionExpired`][onboard_tokens::SessionExpired] wrapped in
/// [`Error::Middleware`]. Rejections of requests that did not carry a stored
/// token, or whose body cannot be replayed, are returned unchanged.
///
/// This middleware must come before [`AccessTokenMiddleware`][crate::AccessTokenMiddleware]
/// in the stack so that it observes rejections of the tokens that one attaches.
#[derive(Clone, Debug)]
pub struct RefreshMiddleware {
    coordinator: RefreshCoordinator,
}

impl RefreshMiddleware {
    /// Construct a new middleware around a refresh coordinator
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait::async_trait]
impl Middleware for RefreshMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if extensions.get::<RetriedAfterRefresh>().is_some() {
            return next.run(req, extensions).await;
        }

        let replay = req.try_clone();
        let resp = next.clone().run(req, extensions).await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let Some(rejected) = extensions.get::<AttachedToken>().cloned() else {
            tracing::trace!("rejected request did not carry a stored access token");
            return Ok(resp);
        };

        let Some(replay) = replay else {
            tracing::warn!(
                path = resp.url().path(),
                "rejected request has a streaming body and cannot be replayed"
            );
            return Ok(resp);
        };

        tracing::debug!(
            path = resp.url().path(),
            "access token rejected, waiting for refresh"
        );
        drop(resp);

        let token = self
            .coordinator
            .refreshed_token(rejected.token())
            .await
            .map_err(Error::middleware)?;

        let retried = retry::redispatch(replay, &token, extensions, next).await?;

        if retried.status() == StatusCode::UNAUTHORIZED {
            let expired = self.coordinator.invalidate_session(&token).await;
            return Err(Error::middleware(expired));
        }

        Ok(retried)
    }
}
