//! Replaying requests after a token refresh

use onboard_tokens::AccessTokenRef;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Error, Next, Result};

use crate::authenticate::{bearer_header, AttachedToken};

/// Marks a request as already replayed once after a token refresh
///
/// A request carrying this marker is never handed to the refresh coordinator,
/// so a replay that is rejected again ends the session instead of looping.
/// Callers may set it up front with
/// [`RequestBuilder::with_extension`][reqwest_middleware::RequestBuilder::with_extension]
/// to keep a request out of refresh handling entirely.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetriedAfterRefresh;

/// Sends a copy of a rejected request again with a refreshed access token
///
/// Only the `Authorization` header changes. Method, URL, the other headers,
/// and the body are sent exactly as they were.
pub(crate) async fn redispatch(
    mut req: Request,
    token: &AccessTokenRef,
    extensions: &mut http::Extensions,
    next: Next<'_>,
) -> Result<Response> {
    let value = bearer_header(token).map_err(Error::middleware)?;
    req.headers_mut().insert(header::AUTHORIZATION, value);

    extensions.insert(RetriedAfterRefresh);
    extensions.insert(AttachedToken::new(token.to_owned()));

    tracing::debug!(
        method = %req.method(),
        path = req.url().path(),
        "replaying request with refreshed access token"
    );

    next.run(req, extensions).await
}
