pub mod db_init;
pub mod store;
pub mod memory_store;
pub mod mongo_store;
pub mod mirror;
pub mod mongo_mirror;
pub mod notifier;
pub mod matcher;
pub mod ingestor;

pub mod alerts_service;
