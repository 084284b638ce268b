pub mod layout;
pub mod file_lock;
pub mod handle_pool;
pub mod lines;
