//! Redirect rule validation.
//!
//! Provides violation types and a pure-logic evaluator. Lookups the rules
//! depend on (uniqueness owner, quota counts) are gathered by the caller
//! into a [`rules::ValidationContext`], so nothing here touches storage.

pub mod evaluator;
pub mod rules;

pub use evaluator::validate;
pub use rules::{FieldViolation, ValidationContext};
