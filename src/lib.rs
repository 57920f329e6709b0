pub mod config;
pub mod crawler;
pub mod pipeline;
pub mod storage;
