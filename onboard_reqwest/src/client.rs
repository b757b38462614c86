use std::{fmt, sync::Arc};

use onboard_tokens::{
    sources::{AsyncTokenRefresher, RefreshEndpointSource},
    store::StoreError,
    AccessTokenRef, CredentialStore, RefreshCoordinator, RefreshTokenRef, SessionListener,
};
use reqwest::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, RequestBuilder};

use crate::{
    predicate::SameOrigin, AccessTokenMiddleware, ClientConfig, FailureReporter,
    FailureReportingMiddleware, RefreshMiddleware, TracingReporter,
};

/// An HTTP client for a backend that issues refreshable access tokens
///
/// Requests go through, in order:
///
/// 1. [`FailureReportingMiddleware`], which reports network failures and
///    server faults,
/// 2. [`RefreshMiddleware`], which replays requests rejected with an expired
///    token once the shared refresh completes,
/// 3. [`AccessTokenMiddleware`], which attaches the stored access token to
///    requests for the backend's origin,
/// 4. any middleware added with
///    [`with_middleware()`][SessionClientBuilder::with_middleware()], and
///    finally the transport.
///
/// The client owns the [`RefreshCoordinator`] for its session. Cloning the
/// client shares that coordinator, so every clone observes the same refresh.
#[derive(Clone, Debug)]
pub struct SessionClient {
    client: ClientWithMiddleware,
    coordinator: RefreshCoordinator,
    config: Arc<ClientConfig>,
}

impl SessionClient {
    /// Starts building a client for the given configuration
    pub fn builder(config: ClientConfig) -> SessionClientBuilder {
        SessionClientBuilder {
            config,
            store: None,
            http: None,
            reporter: Arc::new(TracingReporter),
            listener: Arc::new(TracingReporter),
            middleware: Vec::new(),
        }
    }

    /// Starts a request for a path relative to the configured prefix
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.config.endpoint(path))
    }

    /// Starts a `GET` request
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    /// Starts a `POST` request
    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// Starts a `PUT` request
    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    /// Starts a `PATCH` request
    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    /// Starts a `DELETE` request
    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Stores the credentials issued by a successful login
    pub async fn login(
        &self,
        access_token: &AccessTokenRef,
        refresh_token: &RefreshTokenRef,
        user_data: Option<&serde_json::Value>,
    ) -> Result<(), StoreError> {
        self.coordinator
            .begin_session(access_token, Some(refresh_token), user_data)
            .await
    }

    /// Ends the session and forgets all stored credentials
    pub async fn logout(&self) -> Result<(), StoreError> {
        self.coordinator.end_session().await
    }

    /// The credential store backing this client's session
    pub fn store(&self) -> &CredentialStore {
        self.coordinator.store()
    }

    /// The refresh coordinator owned by this client
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// The underlying middleware client, for requests to absolute URLs
    pub fn client(&self) -> &ClientWithMiddleware {
        &self.client
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

/// Builder for a [`SessionClient`]
pub struct SessionClientBuilder {
    config: ClientConfig,
    store: Option<CredentialStore>,
    http: Option<reqwest::Client>,
    reporter: Arc<dyn FailureReporter>,
    listener: Arc<dyn SessionListener>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl SessionClientBuilder {
    /// Uses the given credential store
    ///
    /// Defaults to an in-memory store using the configured storage keys.
    pub fn with_store(mut self, store: CredentialStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses the given `reqwest` client as the transport
    ///
    /// Defaults to a client with the configured timeout.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Reports terminal failures, including expired sessions, to `reporter`
    pub fn with_reporter<R>(mut self, reporter: Arc<R>) -> Self
    where
        R: FailureReporter + 'static,
    {
        self.reporter = reporter.clone();
        self.listener = reporter;
        self
    }

    /// Adds a middleware that runs after the session middleware, just before the transport
    pub fn with_middleware<M>(mut self, middleware: M) -> Self
    where
        M: Middleware,
    {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Builds a client that refreshes tokens against the configured refresh endpoint
    pub fn build(self) -> Result<SessionClient, reqwest::Error> {
        let http = self.http_client()?;
        let refresher = RefreshEndpointSource::new(http.clone(), self.config.refresh_url());
        Ok(self.assemble(http, refresher))
    }

    /// Builds a client that refreshes tokens using the given source
    pub fn build_with_refresher<R>(self, refresher: R) -> Result<SessionClient, reqwest::Error>
    where
        R: AsyncTokenRefresher + 'static,
    {
        let http = self.http_client()?;
        Ok(self.assemble(http, refresher))
    }

    fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        match &self.http {
            Some(client) => Ok(client.clone()),
            None => reqwest::Client::builder()
                .timeout(self.config.timeout())
                .build(),
        }
    }

    fn assemble<R>(self, http: reqwest::Client, refresher: R) -> SessionClient
    where
        R: AsyncTokenRefresher + 'static,
    {
        let config = self.config;
        let store = self.store.unwrap_or_else(|| {
            CredentialStore::in_memory().with_keys(config.storage_keys.clone())
        });

        let coordinator = RefreshCoordinator::builder(store, refresher)
            .with_timeout(config.timeout())
            .with_listener(self.listener)
            .build();

        let authenticate = AccessTokenMiddleware::new(coordinator.store().clone())
            .with_predicate(SameOrigin::new(&config.base_url));

        let client = self
            .middleware
            .into_iter()
            .fold(
                ClientBuilder::new(http)
                    .with(FailureReportingMiddleware::new(self.reporter))
                    .with(RefreshMiddleware::new(coordinator.clone()))
                    .with(authenticate),
                ClientBuilder::with_arc,
            )
            .build();

        tracing::debug!(
            base_url = %config.base_url,
            path_prefix = %config.path_prefix,
            timeout_secs = config.timeout_secs,
            "built session client"
        );

        SessionClient {
            client,
            coordinator,
            config: Arc::new(config),
        }
    }
}

impl fmt::Debug for SessionClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionClientBuilder")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}
