//! Platform-agnostic wire contracts and errors.

pub mod contracts;
pub mod errors;
