//! Session persistence adapters

pub mod jsonl;

pub use jsonl::JsonlSessionStore;
