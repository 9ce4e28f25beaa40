pub mod category;
pub mod resource;
pub mod resource_type;
pub mod upload;
