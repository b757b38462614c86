//! Classification and reporting of terminal request failures

use std::{error, fmt, sync::Arc};

use onboard_tokens::{RefreshError, SessionExpired, SessionListener};
use reqwest::{Method, Request, Response, StatusCode, Url};
use reqwest_middleware::{Error, Middleware, Next, Result};

/// The kinds of failure that warrant telling the user
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The session could not be refreshed and the user must log in again
    SessionExpired,
    /// No response was received at all
    Network,
    /// The backend answered with a server error status
    ServerFault,
}

/// Classifies the outcome of a request
///
/// Returns `None` for successes and for failures that are left entirely to
/// the caller.
pub fn classify(result: &Result<Response>) -> Option<FailureKind> {
    match result {
        Ok(resp) if resp.status().is_server_error() => Some(FailureKind::ServerFault),
        Ok(_) => None,
        Err(Error::Reqwest(err)) if is_network_failure(err) => Some(FailureKind::Network),
        Err(Error::Middleware(err)) if err.downcast_ref::<SessionExpired>().is_some() => {
            Some(FailureKind::SessionExpired)
        }
        Err(_) => None,
    }
}

fn is_network_failure(err: &reqwest::Error) -> bool {
    err.status().is_none() && !err.is_builder()
}

/// Produces the user-visible side effects of terminal failures
///
/// Session expiry is reported through [`SessionListener`] by the refresh
/// coordinator, exactly once per ended session. The other kinds are reported
/// here for every failing request. In all cases the failure still reaches the
/// original caller.
pub trait FailureReporter: SessionListener {
    /// A request failed without receiving any response
    fn network_failure(&self, method: &Method, url: &Url, error: &reqwest::Error);

    /// A request received a server error response
    fn server_fault(&self, method: &Method, url: &Url, status: StatusCode);
}

/// A failure reporter that only logs
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl SessionListener for TracingReporter {
    fn session_expired(&self, cause: &RefreshError) {
        let error: &(dyn error::Error + 'static) = cause;
        tracing::warn!(error, "session expired, redirecting to login");
    }
}

impl FailureReporter for TracingReporter {
    fn network_failure(&self, method: &Method, url: &Url, error: &reqwest::Error) {
        let error: &(dyn error::Error + 'static) = error;
        tracing::warn!(
            %method,
            path = url.path(),
            error,
            "request failed without a response"
        );
    }

    fn server_fault(&self, method: &Method, url: &Url, status: StatusCode) {
        tracing::warn!(
            %method,
            path = url.path(),
            response.status = status.as_u16(),
            "backend reported a server error"
        );
    }
}

/// A middleware that reports network failures and server faults
///
/// Place this first in the stack so that it sees the final outcome of every
/// request, including replays after a refresh.
#[derive(Clone)]
pub struct FailureReportingMiddleware {
    reporter: Arc<dyn FailureReporter>,
}

impl FailureReportingMiddleware {
    /// Construct a new middleware around a reporter
    pub fn new(reporter: Arc<dyn FailureReporter>) -> Self {
        Self { reporter }
    }
}

impl fmt::Debug for FailureReportingMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FailureReportingMiddleware").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Middleware for FailureReportingMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let method = req.method().clone();
        let url = req.url().clone();

        let result = next.run(req, extensions).await;

        match (classify(&result), &result) {
            (Some(FailureKind::Network), Err(Error::Reqwest(err))) => {
                self.reporter.network_failure(&method, &url, err)
            }
            (Some(FailureKind::ServerFault), Ok(resp)) => {
                self.reporter.server_fault(&method, &url, resp.status())
            }
            (Some(FailureKind::SessionExpired), _) => {
                tracing::debug!(%method, path = url.path(), "request failed, session expired")
            }
            _ => {}
        }

        result
    }
}
