//! Storage backends for the entity registry

pub mod memory;
pub mod redb;
