use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::entity::category;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CategoryResponse {
    pub id: String,
    pub type_key: String,
    pub name: String,
    /// Empty string means root.
    pub parent_id: String,
}

impl From<category::Model> for CategoryResponse {
    fn from(model: category::Model) -> Self {
        Self {
            id: model.id,
            type_key: model.type_key,
            name: model.name,
            parent_id: model.parent_id,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCategoryRequest {
    pub type_key: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListCategoriesQuery {
    #[serde(rename = "type")]
    pub type_key: Option<String>,
}
