//! Predicates deciding which requests may carry an access token

use std::fmt;

use predicates::{prelude::*, reflection};
use reqwest::Request;

/// Only attach an access token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach an access token if the request shares the backend's scheme, host, and port
///
/// This is what [`SessionClient`][crate::SessionClient] uses, so that absolute
/// URLs pointing elsewhere never see the session's token.
#[derive(Clone, Debug)]
pub struct SameOrigin {
    origin: url::Origin,
}

impl SameOrigin {
    /// Construct a new predicate matching the origin of `url`
    pub fn new(url: &url::Url) -> Self {
        Self {
            origin: url.origin(),
        }
    }
}

impl Predicate<Request> for SameOrigin {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().origin() == self.origin
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "origin",
                    req.url().origin().ascii_serialization(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for SameOrigin {}
impl fmt::Display for SameOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("origin == ")?;
        f.write_str(&self.origin.ascii_serialization())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> Request {
        Request::new(reqwest::Method::GET, url.parse().unwrap())
    }

    mod https_only_predicate {
        use super::*;

        #[test]
        fn matches_when_request_has_https_scheme() {
            let result = dbg!(HttpsOnly.find_case(true, &get("https://example.com")));
            assert!(result.is_none())
        }

        #[test]
        fn does_not_match_when_request_has_http_scheme() {
            let result = dbg!(HttpsOnly.find_case(false, &get("http://example.com")));
            assert!(result.is_none())
        }
    }

    mod same_origin_predicate {
        use super::*;

        fn predicate() -> SameOrigin {
            SameOrigin::new(&"https://api.example.com/api/v1/".parse().unwrap())
        }

        #[test]
        fn matches_any_path_on_the_same_origin() {
            let predicate = predicate();
            let result = dbg!(predicate.find_case(true, &get("https://api.example.com/users/")));
            assert!(result.is_none())
        }

        #[test]
        fn does_not_match_a_different_scheme() {
            let predicate = predicate();
            let result = dbg!(predicate.find_case(false, &get("http://api.example.com/users/")));
            assert!(result.is_none())
        }

        #[test]
        fn does_not_match_a_different_port() {
            let predicate = predicate();
            let result =
                dbg!(predicate.find_case(false, &get("https://api.example.com:8443/users/")));
            assert!(result.is_none())
        }

        #[test]
        fn does_not_match_a_different_host() {
            let predicate = predicate();
            let result = dbg!(predicate.find_case(false, &get("https://cdn.example.net/a.png")));
            assert!(result.is_none())
        }
    }
}
