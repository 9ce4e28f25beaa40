use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::entity::resource_type;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResourceTypeResponse {
    pub type_key: String,
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub schema_def: Option<Value>,
    pub category_mode: String,
    pub integration_mode: String,
    pub upload_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub process_conf: Option<Value>,
    /// Whether versions of this type go through asynchronous processing.
    pub has_processor: bool,
}

impl From<resource_type::Model> for ResourceTypeResponse {
    fn from(model: resource_type::Model) -> Self {
        let has_processor = model
            .processor_cmd
            .as_deref()
            .is_some_and(|cmd| !cmd.trim().is_empty());
        Self {
            type_key: model.type_key,
            type_name: model.type_name,
            schema_def: model.schema_def,
            category_mode: model.category_mode,
            integration_mode: model.integration_mode,
            upload_mode: model.upload_mode,
            process_conf: model.process_conf,
            has_processor,
        }
    }
}
