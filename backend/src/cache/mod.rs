pub mod cache_service;
pub mod memory_store;
pub mod models;
