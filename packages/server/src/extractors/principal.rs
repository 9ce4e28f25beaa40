use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

use crate::error::AppError;

/// The caller's identity, injected by the upstream auth gateway.
///
/// The core does not authenticate; its contract with the auth layer is a
/// principal id and a permission set carried on trusted headers. A request
/// without the permissions header counts as a trusted local invocation
/// (single-node development, in-cluster tooling) and receives the wildcard
/// grant; a gateway that sends the header controls exactly what the caller
/// may do.
#[derive(Clone, Debug)]
pub struct Principal {
    pub owner_id: String,
    pub permissions: Vec<String>,
}

const PRINCIPAL_HEADER: &str = "x-principal-id";
const PERMISSIONS_HEADER: &str = "x-principal-permissions";
const DEFAULT_PRINCIPAL: &str = "admin";
const WILDCARD: &str = "*";

impl Principal {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission || p == WILDCARD)
    }

    /// Gate an operation on a permission, e.g. `resource:delete`.
    pub fn require_permission(&self, permission: &str) -> Result<(), AppError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(AppError::PermissionDenied)
        }
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner_id = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_PRINCIPAL)
            .to_string();

        let permissions = match parts.headers.get(PERMISSIONS_HEADER) {
            Some(value) => value
                .to_str()
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            None => vec![WILDCARD.to_string()],
        };

        Ok(Principal {
            owner_id,
            permissions,
        })
    }
}
