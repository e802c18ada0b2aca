#![forbid(unsafe_code)]

pub mod kv;
pub mod repo;

pub use kv::{InMemoryKvStore, KvStore, StorageError};
