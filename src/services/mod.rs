pub mod catalog;
pub mod claims;
pub mod extractor;
pub mod persister;
pub mod presign;
pub mod queue;
pub mod roles;
pub mod storage_service;
pub mod subscriptions;
pub mod validator;
pub mod worker;
