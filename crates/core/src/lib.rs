pub mod config;
pub mod domain;
pub mod engine;
pub mod ingest;
pub mod llm;
pub mod notify;
pub mod storage;
pub mod time;
pub mod venue;
