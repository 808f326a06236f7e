// Library interface for newscast modules
// This allows tests and other binaries to import modules

pub mod model;
pub mod stage;
pub mod dedup;
pub mod llm;
pub mod ingestion;
pub mod scraping;
pub mod speech;
pub mod delivery;
pub mod storage;
pub mod pipeline;
pub mod server;
