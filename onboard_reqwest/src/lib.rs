//! Session-aware middleware for `reqwest`
//!
//! [`SessionClient`] assembles a
//! [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware) that
//! attaches the stored access token to every request for the backend. When
//! the backend rejects a request with `401 Unauthorized`, the request waits
//! on a single shared token refresh and is then replayed once with the new
//! token. If the refresh fails, or the replay is rejected too, the session
//! ends and the caller receives a [`SessionExpired`](onboard_tokens::SessionExpired)
//! error.
//!
//! ```
//! use onboard_reqwest::{ClientConfig, SessionClient};
//! # use onboard_tokens::{AccessToken, RefreshToken};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let config = ClientConfig::new("https://hr.example.com".parse().unwrap())
//!     .with_path_prefix("api");
//! let client = SessionClient::builder(config).build().unwrap();
//!
//! client
//!     .login(
//!         &AccessToken::from_static("access"),
//!         &RefreshToken::from_static("refresh"),
//!         None,
//!     )
//!     .await
//!     .unwrap();
//!
//! let req = client.get("onboarding/plans/");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The individual middleware can also be used on their own. The
//! [`AccessTokenMiddleware`] can be configured to add an authorization token
//! only conditionally, using predicates that can be composed together.
//!
//! ```
//! use onboard_reqwest::{AccessTokenMiddleware, HttpsOnly, SameOrigin};
//! use onboard_tokens::CredentialStore;
//! use predicates::prelude::PredicateBooleanExt;
//!
//! let backend = "https://hr.example.com".parse().unwrap();
//! AccessTokenMiddleware::new(CredentialStore::in_memory())
//!     .with_predicate(HttpsOnly.and(SameOrigin::new(&backend)));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod authenticate;
mod client;
mod config;
mod predicate;
mod refresh;
mod report;
mod retry;

pub use authenticate::{AccessTokenMiddleware, AttachedToken};
pub use client::{SessionClient, SessionClientBuilder};
pub use config::ClientConfig;
pub use predicate::{HttpsOnly, SameOrigin};
pub use refresh::RefreshMiddleware;
pub use report::{
    classify, FailureKind, FailureReporter, FailureReportingMiddleware, TracingReporter,
};
pub use retry::RetriedAfterRefresh;
