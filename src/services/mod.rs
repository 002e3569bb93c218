pub mod client;
pub mod filesystem;
pub mod local_store;
