pub mod auth;
pub mod catalog_handlers;
pub mod health_handlers;
pub mod object_handlers;
pub mod publish_handlers;
pub mod user_handlers;
