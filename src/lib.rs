//! A Hadoop-style filesystem façade over a Manta-style object store.
//!
//! `services::filesystem::MantaFileSystem` is the entry point; it talks to
//! any `services::client::ObjectStoreClient`, of which the SQLite-backed
//! `services::local_store::LocalObjectStore` is the bundled implementation.

pub mod config;
pub mod errors;
pub mod fs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

#[cfg(test)]
mod testing;
