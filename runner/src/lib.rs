pub mod collector;
pub mod config;
pub mod executors;
pub mod ingest;
pub mod registry;
pub mod results;
pub mod sync;
