//! Provider implementations.

pub mod anthropic;
