//! Core primitives for the verification layer.
//!
//! Leaves first: canonical serialization and hashing, path safety
//! predicates, timestamp parsing, violation/verdict types, and the shape
//! narrowing helpers every rule engine is built from.

pub mod canonical;
pub mod error;
pub mod output;
pub mod paths;
pub mod report;
pub mod shape;
pub mod time;
