//! Impls - in-process implementations of the ports.

pub mod inmem_store;

pub use self::inmem_store::InMemoryTaskStore;
