pub mod category_registry;
pub mod elasticsearch_service;
pub mod ingest_service;
pub mod memory_store;
pub mod search_service;
pub mod storage;
pub mod youtube_client;
