pub mod access;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod storage;
