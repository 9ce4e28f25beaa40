pub mod category;
pub mod resource;
pub mod resource_dependency;
pub mod resource_type;
pub mod resource_version;
