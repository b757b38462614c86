//! Single-flight access token refresh for session clients
//!
//! A session is a short-lived access token, a longer-lived refresh token, and
//! some cached user data, all kept in a [`CredentialStore`]. When the access
//! token expires, many requests tend to be rejected at about the same moment.
//! The [`RefreshCoordinator`] makes sure those rejections cause exactly one
//! refresh: the first rejected request starts it, every other one waits on
//! it, and all of them receive the same outcome.
//!
//! If the refresh succeeds, the new access token is stored before any waiting
//! request is released, so replays always carry the new credential. If it
//! fails, the store is cleared and the [`SessionListener`] is told, once, that
//! the user has to log in again.
//!
//! ```
//! use onboard_tokens::{
//!     sources::RefreshEndpointSource, store::CredentialStore, AccessToken, RefreshCoordinator,
//! };
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//!
//! let store = CredentialStore::in_memory();
//! let refresher = RefreshEndpointSource::new(
//!     reqwest::Client::new(),
//!     "https://api.example.com/auth/refresh/".parse().unwrap(),
//! );
//!
//! let coordinator = RefreshCoordinator::builder(store, refresher)
//!     .with_timeout(std::time::Duration::from_secs(10))
//!     .build();
//!
//! let rejected = AccessToken::from_static("expired-token");
//! # /* Commented out due to this trying to interact with the world.
//! let replacement = coordinator.refreshed_token(&rejected).await?;
//! # */
//! # }
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `endpoint`: Provides [`RefreshEndpointSource`][sources::RefreshEndpointSource], which
//!   exchanges refresh tokens against an HTTP refresh endpoint using [reqwest].
//! * `file`: Provides [`FileStore`][store::FileStore], a credential backend persisted to the
//!   local filesystem.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod coordinator;
mod error;
pub mod sources;
pub mod store;

pub use braids::*;
pub use coordinator::{
    LogSessionListener, RefreshCoordinator, RefreshCoordinatorBuilder, SessionListener,
};
pub use error::{RefreshError, SessionExpired};
pub use store::{CredentialPair, CredentialStore};
