pub mod blob_store;
pub mod classifier;
pub mod config;
pub mod db_pool;
pub mod db_schema;
pub mod error;
pub mod local_cache;
pub mod memory_remote;
pub mod models;
pub mod remote_store;
pub mod social_graph;
pub mod sync_coordinator;
pub mod upload_pipeline;

pub use error::{StoreError, SyncError, SyncResult};
