#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a resource version.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in
/// SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionState {
    /// Registered in the catalog, waiting for the processor to finish.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "PENDING"))]
    Pending,
    /// Processing succeeded (or was not required); the version is usable.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "ACTIVE"))]
    Active,
    /// The processor failed; details are kept in the version metadata.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "ERROR"))]
    Error,
}

impl VersionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
        }
    }

    /// Returns true if the version may be overwritten by a same-semver upload.
    pub fn is_overwritable(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for VersionState {
    fn default() -> Self {
        Self::Pending
    }
}

/// Visibility scope of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceScope {
    /// Visible only to the owning principal.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "PRIVATE"))]
    Private,
    /// Visible to every principal.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "PUBLIC"))]
    Public,
}

impl ResourceScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "PRIVATE",
            Self::Public => "PUBLIC",
        }
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for ResourceScope {
    fn default() -> Self {
        Self::Private
    }
}

/// Error when parsing an invalid state or scope string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStateError {
    invalid: String,
}

impl fmt::Display for ParseStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value '{}'", self.invalid)
    }
}

impl std::error::Error for ParseStateError {}

impl FromStr for VersionState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ACTIVE" => Ok(Self::Active),
            "ERROR" => Ok(Self::Error),
            _ => Err(ParseStateError {
                invalid: s.to_string(),
            }),
        }
    }
}

impl FromStr for ResourceScope {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRIVATE" => Ok(Self::Private),
            "PUBLIC" => Ok(Self::Public),
            _ => Err(ParseStateError {
                invalid: s.to_string(),
            }),
        }
    }
}
