use std::{error, fmt, mem, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
    sources::{AsyncTokenRefresher, RefreshedTokens},
    store::{CredentialStore, StoreError},
    AccessToken, AccessTokenRef, RefreshError, RefreshTokenRef, SessionExpired,
};

const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives notice when a session can no longer be kept alive
///
/// This is where an application forces its user back to the login entry
/// point. Stored credentials have already been cleared by the time this is
/// called.
pub trait SessionListener: Send + Sync {
    /// Called once each time a session ends because it could not be refreshed
    fn session_expired(&self, cause: &RefreshError);
}

/// A session listener that only logs
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSessionListener;

impl SessionListener for LogSessionListener {
    fn session_expired(&self, cause: &RefreshError) {
        tracing::warn!(
            error = (cause as &dyn error::Error),
            "session expired, login required"
        );
    }
}

type Waiter = oneshot::Sender<Result<AccessToken, SessionExpired>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RefreshState {
    Idle,
    Refreshing { cycle: u64 },
}

#[derive(Debug)]
struct State {
    refresh: RefreshState,
    last_cycle: u64,
    waiters: Vec<Waiter>,
    latest: Option<AccessToken>,
    // Set once a session has ended, until the next one begins.
    ended: Option<SessionExpired>,
    // Bumped on every settled transition.
    generation: u64,
}

impl State {
    fn is_current(&self, cycle: u64) -> bool {
        self.refresh == RefreshState::Refreshing { cycle }
    }

    /// Returns to idle and hands back everyone who was waiting, oldest first
    fn drain(&mut self) -> Vec<Waiter> {
        self.refresh = RefreshState::Idle;
        self.generation += 1;
        mem::take(&mut self.waiters)
    }

    /// Records a new session token and releases everyone waiting
    fn resume(&mut self, token: &AccessTokenRef) -> Vec<Waiter> {
        self.latest = Some(token.to_owned());
        self.ended = None;
        self.drain()
    }

    /// Records the end of the session and releases everyone waiting
    fn end(&mut self, expired: &SessionExpired) -> Vec<Waiter> {
        self.latest = None;
        self.ended = Some(expired.clone());
        self.drain()
    }
}

#[async_trait]
trait DynRefresher: Send + Sync {
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<RefreshedTokens, Box<dyn error::Error + Send + Sync + 'static>>;
}

struct Erased<R>(R);

#[async_trait]
impl<R: AsyncTokenRefresher> DynRefresher for Erased<R> {
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<RefreshedTokens, Box<dyn error::Error + Send + Sync + 'static>> {
        Ok(self.0.refresh(refresh_token).await?)
    }
}

struct Inner {
    state: Mutex<State>,
    // Serializes everything that writes the store on behalf of a session
    // transition, so a stale refresh cannot land after a logout.
    transitions: tokio::sync::Mutex<()>,
    store: CredentialStore,
    refresher: Box<dyn DynRefresher>,
    listener: Arc<dyn SessionListener>,
    timeout: Duration,
}

/// Coordinates access token refreshes for every request sharing a session
///
/// However many requests are rejected at once, at most one refresh is in
/// flight. Every rejected request waits on that refresh and then receives
/// either the new access token or the error that ended the session.
///
/// Cloning the coordinator is cheap; all clones share the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

/// Builder for a [`RefreshCoordinator`]
pub struct RefreshCoordinatorBuilder {
    store: CredentialStore,
    refresher: Box<dyn DynRefresher>,
    listener: Arc<dyn SessionListener>,
    timeout: Duration,
}

impl RefreshCoordinatorBuilder {
    /// Sets how long a refresh may take before it is treated as failed
    ///
    /// Defaults to 30 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the listener told when a session expires
    ///
    /// Defaults to [`LogSessionListener`].
    pub fn with_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Builds the coordinator
    pub fn build(self) -> RefreshCoordinator {
        RefreshCoordinator {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    refresh: RefreshState::Idle,
                    last_cycle: 0,
                    waiters: Vec::new(),
                    latest: None,
                    ended: None,
                    generation: 0,
                }),
                transitions: tokio::sync::Mutex::new(()),
                store: self.store,
                refresher: self.refresher,
                listener: self.listener,
                timeout: self.timeout,
            }),
        }
    }
}

impl fmt::Debug for RefreshCoordinatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCoordinatorBuilder")
            .field("store", &self.store)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    /// Starts building a coordinator over a credential store and refresh source
    pub fn builder<R>(store: CredentialStore, refresher: R) -> RefreshCoordinatorBuilder
    where
        R: AsyncTokenRefresher + 'static,
    {
        RefreshCoordinatorBuilder {
            store,
            refresher: Box::new(Erased(refresher)),
            listener: Arc::new(LogSessionListener),
            timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    /// The credential store this coordinator keeps up to date
    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().refresh != RefreshState::Idle
    }

    /// The number of requests waiting on the in-flight refresh
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Obtains a replacement for an access token that was just rejected
    ///
    /// If a refresh is already in flight, this waits on it. Otherwise it starts
    /// one. If the store already holds a different access token than the one
    /// rejected, that token is returned without refreshing again. Once a
    /// session has ended, every later rejection receives the error that ended
    /// it until a new session begins.
    ///
    /// The refresh runs on its own task, so dropping this future does not
    /// affect anyone else waiting on the same refresh.
    pub async fn refreshed_token(
        &self,
        rejected: &AccessTokenRef,
    ) -> Result<AccessToken, SessionExpired> {
        let observed = self.inner.state.lock().generation;
        let stored = self.inner.stored_access_token().await;

        let (tx, rx) = oneshot::channel();

        let started = {
            let mut state = self.inner.state.lock();

            // A transition settled while the store was being read, so what was
            // read may already be out of date.
            if state.generation != observed {
                if let Some(latest) = state
                    .latest
                    .as_ref()
                    .filter(|latest| latest.as_str() != rejected.as_str())
                {
                    tracing::debug!("rejected access token was superseded by a refresh");
                    return Ok(latest.clone());
                }
            }

            if let Some(stored) = stored.filter(|stored| stored.as_str() != rejected.as_str()) {
                tracing::debug!("rejected access token was already replaced in the store");
                return Ok(stored);
            }

            if let Some(ended) = &state.ended {
                tracing::debug!("session has already ended");
                return Err(ended.clone());
            }

            state.waiters.push(tx);

            match state.refresh {
                RefreshState::Refreshing { cycle } => {
                    tracing::debug!(
                        cycle,
                        waiting = state.waiters.len(),
                        "joining in-flight token refresh"
                    );
                    None
                }
                RefreshState::Idle => {
                    state.last_cycle += 1;
                    let cycle = state.last_cycle;
                    state.refresh = RefreshState::Refreshing { cycle };
                    Some(cycle)
                }
            }
        };

        if let Some(cycle) = started {
            tracing::debug!(cycle, "starting token refresh");
            self.spawn_refresh(cycle);
        }

        rx.await
            .unwrap_or_else(|_| Err(SessionExpired::new(RefreshError::Abandoned)))
    }

    /// Ends the session after a request replayed with `rejected` was refused again
    ///
    /// Only the first report ends the session; later reports receive the error
    /// that ended it. A report for a token that has since been replaced, by a
    /// refresh or in the store, leaves the current session alone.
    pub async fn invalidate_session(&self, rejected: &AccessTokenRef) -> SessionExpired {
        let expired = SessionExpired::new(RefreshError::RetryRejected);
        let _transition = self.inner.transitions.lock().await;
        let stored = self.inner.stored_access_token().await;

        let waiters = {
            let mut state = self.inner.state.lock();
            if let Some(ended) = &state.ended {
                tracing::debug!("session for rejected access token has already ended");
                return ended.clone();
            }

            let is_rejected = |token: &AccessToken| token.as_str() == rejected.as_str();
            let is_current = state.latest.as_ref().map_or(false, is_rejected)
                || stored.as_ref().map_or(false, is_rejected);
            if !is_current {
                tracing::debug!("rejected access token was already replaced");
                return expired;
            }

            state.end(&expired)
        };

        tracing::warn!(
            waiting = waiters.len(),
            "refreshed access token was rejected, ending session"
        );
        self.inner.expire(expired.cause()).await;
        notify(waiters, Err(expired.clone()));

        expired
    }

    /// Starts a new session with freshly issued credentials
    ///
    /// Requests waiting on an in-flight refresh are released with the new
    /// access token, and the result of that refresh is discarded.
    pub async fn begin_session(
        &self,
        access_token: &AccessTokenRef,
        refresh_token: Option<&RefreshTokenRef>,
        user_data: Option<&serde_json::Value>,
    ) -> Result<(), StoreError> {
        let _transition = self.inner.transitions.lock().await;

        self.inner
            .store
            .set(access_token, refresh_token, user_data)
            .await?;

        let waiters = self.inner.state.lock().resume(access_token);

        tracing::info!(waiting = waiters.len(), "session started");
        notify(waiters, Ok(access_token.to_owned()));

        Ok(())
    }

    /// Ends the current session and clears stored credentials
    ///
    /// The session listener is not called, as ending the session was asked for.
    pub async fn end_session(&self) -> Result<(), StoreError> {
        let _transition = self.inner.transitions.lock().await;

        let ended = SessionExpired::new(RefreshError::SessionEnded);
        let waiters = self.inner.state.lock().end(&ended);

        let cleared = self.inner.store.clear().await;
        notify(waiters, Err(ended));

        tracing::info!("session ended");
        cleared
    }

    fn spawn_refresh(&self, cycle: u64) {
        let inner = self.inner.clone();
        let task = tokio::spawn({
            let inner = inner.clone();
            async move { inner.run_refresh(cycle).await }
        });

        tokio::spawn(async move {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    if err.is_panic() {
                        tracing::error!(cycle, "token refresh panicked!");
                    } else {
                        tracing::info!(cycle, "token refresh was cancelled");
                    }
                    Err(RefreshError::Abandoned)
                }
            };

            inner.settle(cycle, outcome).await;
        });
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RefreshCoordinator")
            .field("store", &self.inner.store)
            .field("refresh", &state.refresh)
            .field("waiting", &state.waiters.len())
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn stored_access_token(&self) -> Option<AccessToken> {
        match self.store.access_token().await {
            Ok(stored) => stored,
            Err(error) => {
                tracing::debug!(
                    error = (&error as &dyn error::Error),
                    "unable to read stored access token"
                );
                None
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn run_refresh(&self, cycle: u64) -> Result<RefreshedTokens, RefreshError> {
        let refresh_token = self
            .store
            .get()
            .await?
            .refresh_token
            .ok_or(RefreshError::MissingRefreshToken)?;

        match tokio::time::timeout(self.timeout, self.refresher.refresh(&refresh_token)).await {
            Ok(Ok(tokens)) => Ok(tokens),
            Ok(Err(error)) => Err(RefreshError::Rejected(error)),
            Err(_) => Err(RefreshError::TimedOut(self.timeout)),
        }
    }

    async fn settle(&self, cycle: u64, outcome: Result<RefreshedTokens, RefreshError>) {
        let _transition = self.transitions.lock().await;

        let current = self.state.lock().is_current(cycle);
        if !current {
            tracing::debug!(cycle, "discarding result of superseded token refresh");
            return;
        }

        match outcome {
            Ok(tokens) => {
                // The store must hold the new token before anyone is replayed.
                if let Err(error) = self
                    .store
                    .set(
                        &tokens.access_token,
                        tokens.refresh_token.as_deref(),
                        None,
                    )
                    .await
                {
                    tracing::warn!(
                        cycle,
                        error = (&error as &dyn error::Error),
                        "unable to persist refreshed access token"
                    );
                }

                let waiters = self.state.lock().resume(&tokens.access_token);

                tracing::info!(
                    cycle,
                    waiting = waiters.len(),
                    rotated_refresh_token = tokens.refresh_token.is_some(),
                    "token refresh succeeded, replaying waiting requests"
                );
                notify(waiters, Ok(tokens.access_token));
            }
            Err(error) => {
                let expired = SessionExpired::new(error);
                // Ended before the store is cleared, so that a rejection
                // arriving meanwhile cannot start another cycle.
                let waiters = self.state.lock().end(&expired);

                tracing::warn!(
                    cycle,
                    waiting = waiters.len(),
                    error = (expired.cause() as &dyn error::Error),
                    "token refresh failed, ending session"
                );
                self.expire(expired.cause()).await;
                notify(waiters, Err(expired));
            }
        }
    }

    async fn expire(&self, cause: &RefreshError) {
        if let Err(error) = self.store.clear().await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to clear stored credentials"
            );
        }

        self.listener.session_expired(cause);
    }
}

fn notify(waiters: Vec<Waiter>, outcome: Result<AccessToken, SessionExpired>) {
    for waiter in waiters {
        if waiter.send(outcome.clone()).is_err() {
            tracing::trace!("waiting request was dropped before the refresh settled");
        }
    }
}
