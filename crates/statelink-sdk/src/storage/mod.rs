//! 本地持久化

pub mod kv;

pub use kv::{namespaces, KvStore};
