pub mod command_gateway;
pub mod config;
pub mod error;
pub mod preferences;
pub mod result_cache;
pub mod storage;
