pub mod error;
pub mod finalizer;
pub mod namespace;
pub mod registry;
pub mod storage;
pub mod upload_service;
pub mod worker;
