pub mod signature;
pub mod shard;
pub mod posting_store;
pub mod record;
pub mod record_cache;
pub mod sort;
pub mod message_index;
