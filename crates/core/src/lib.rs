//! Redirect-rule domain model and mutation/query engine.
//!
//! Everything in this crate is storage-agnostic: persistence is reached
//! through the [`store::RuleStore`] and [`store::OrderingTree`] traits, which
//! the `waypoint-db` crate implements on top of PostgreSQL and
//! [`memory::MemoryRuleStore`] implements in process.

pub mod config;
pub mod error;
pub mod matcher;
pub mod memory;
pub mod query;
pub mod quota;
pub mod redirect;
pub mod service;
pub mod settings;
pub mod sources;
pub mod store;
pub mod types;
pub mod validation;
