//! DTOs for the refresh endpoint

use serde::{Deserialize, Serialize};

use crate::{AccessToken, RefreshToken, RefreshTokenRef};

#[derive(Debug, Serialize)]
pub(super) struct RefreshRequest<'a> {
    pub refresh: &'a RefreshTokenRef,
}

#[derive(Debug, Deserialize)]
pub(super) struct RefreshResponse {
    pub access: AccessToken,
    #[serde(default)]
    pub refresh: Option<RefreshToken>,
}
