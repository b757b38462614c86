use bytes::{BufMut, BytesMut};
use onboard_tokens::{AccessToken, AccessTokenRef, CredentialStore};
use predicates::prelude::*;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Error, Middleware, Next, Result};

use crate::predicate::HttpsOnly;

/// The access token a request was sent with
///
/// Present in a request's extensions only when the token was attached by
/// [`AccessTokenMiddleware`] or by a replay after a refresh. Requests that
/// carried their own `Authorization` header have none.
#[derive(Clone, Debug)]
pub struct AttachedToken(AccessToken);

impl AttachedToken {
    pub(crate) fn new(token: AccessToken) -> Self {
        Self(token)
    }

    /// The access token that was attached
    pub fn token(&self) -> &AccessTokenRef {
        &self.0
    }
}

/// Builds a sensitive `Bearer` authorization value
pub(crate) fn bearer_header(
    token: &AccessTokenRef,
) -> std::result::Result<header::HeaderValue, header::InvalidHeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())?;
    value.set_sensitive(true);
    Ok(value)
}

/// A middleware that injects the stored access token into outgoing requests
///
/// If no access token is stored, the request is sent unmodified.
#[derive(Clone, Debug)]
pub struct AccessTokenMiddleware<P> {
    store: CredentialStore,
    predicate: P,
}

impl AccessTokenMiddleware<HttpsOnly> {
    /// Construct a new middleware from a credential store
    ///
    /// By default, this middleware will only send its token if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(store: CredentialStore) -> Self {
        Self {
            store,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<P> {
        AccessTokenMiddleware {
            store: self.store,
            predicate,
        }
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AccessTokenMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            match self.store.access_token().await.map_err(Error::middleware)? {
                Some(token) => {
                    let value = bearer_header(&token).map_err(Error::middleware)?;
                    req.headers_mut().insert(header::AUTHORIZATION, value);
                    tracing::trace!("attached access token");
                    extensions.insert(AttachedToken::new(token));
                }
                None => {
                    tracing::trace!("no access token stored, sending request without one");
                }
            }
        }

        next.run(req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use onboard_tokens::RefreshToken;
    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;

    use super::*;

    const TEST_TOKEN: &str = "this-is-a-test-token";
    const BEARER_TEST_TOKEN: &str = "Bearer this-is-a-test-token";

    struct AuthChecker {
        expected_authorization: String,
        checked: AtomicBool,
    }

    impl AuthChecker {
        pub fn new(expected: impl Into<String>) -> Self {
            Self {
                expected_authorization: expected.into(),
                checked: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl Middleware for AuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let authorization_header = req
                .headers()
                .get(header::AUTHORIZATION)
                .expect("no authorization header")
                .to_str()
                .expect("authorization header was not valid UTF-8");

            assert_eq!(authorization_header, self.expected_authorization);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    #[derive(Default)]
    struct NoAuthChecker {
        checked: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Middleware for NoAuthChecker {
        async fn handle(
            &self,
            req: Request,
            extensions: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            assert_eq!(req.headers().get(header::AUTHORIZATION), None);
            assert!(extensions.get::<AttachedToken>().is_none());
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    struct AttachedTokenChecker {
        checked: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Middleware for AttachedTokenChecker {
        async fn handle(
            &self,
            _: Request,
            extensions: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let attached = extensions
                .get::<AttachedToken>()
                .expect("no attached token recorded");
            assert_eq!(attached.token().as_str(), TEST_TOKEN);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    async fn prepare_middleware() -> AccessTokenMiddleware<HttpsOnly> {
        let store = CredentialStore::in_memory();
        store
            .set(
                &AccessToken::from_static(TEST_TOKEN),
                Some(&*RefreshToken::from_static("refresh")),
                None,
            )
            .await
            .unwrap();

        AccessTokenMiddleware::new(store)
    }

    mod when_request_does_not_have_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_with_defaults_attaches_token_on_https_request() {
            let middleware = prepare_middleware().await;
            let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn middleware_records_the_attached_token() {
            let middleware = prepare_middleware().await;
            let checker = Arc::new(AttachedTokenChecker {
                checked: AtomicBool::new(false),
            });

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(checker.clone())
                .build();

            client.get("https://example.com").send().await.unwrap();

            assert!(checker.checked.load(Ordering::Acquire));
        }

        mod and_predicate_evaluates_to_attach {
            use super::*;

            #[tokio::test]
            async fn middleware_attaches_access_token() {
                let middleware = prepare_middleware()
                    .await
                    .with_predicate(predicate::always());
                let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("http://localhost:8000").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }

        mod and_predicate_evaluates_to_ignore {
            use super::*;

            #[tokio::test]
            async fn middleware_does_not_attach_access_token() {
                let middleware = prepare_middleware()
                    .await
                    .with_predicate(predicate::never());
                let auth_checker = Arc::new(NoAuthChecker::default());

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("https://example.com").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }

        mod and_no_access_token_is_stored {
            use super::*;

            #[tokio::test]
            async fn middleware_sends_the_request_unmodified() {
                let middleware = AccessTokenMiddleware::new(CredentialStore::in_memory());
                let auth_checker = Arc::new(NoAuthChecker::default());

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("https://example.com").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }
    }

    mod when_request_already_contains_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_does_not_attach_access_token() {
            const OVERRIDE_TOKEN: &str = "overridden!";
            // Reqwest uses a capital `B` bearer
            const BEARER_OVERRIDE_TOKEN: &str = "Bearer overridden!";

            let middleware = prepare_middleware().await;
            let auth_checker = Arc::new(AuthChecker::new(BEARER_OVERRIDE_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client
                .get("https://example.com")
                .bearer_auth(OVERRIDE_TOKEN)
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }
    }

    #[test]
    fn bearer_header_is_marked_sensitive() {
        let value = bearer_header(&AccessToken::from_static("abc")).unwrap();
        assert_eq!(value, "Bearer abc");
        assert!(value.is_sensitive());
    }

    #[test]
    fn bearer_header_rejects_control_characters() {
        assert!(bearer_header(&AccessToken::from_static("abc\ndef")).is_err());
    }
}
