//! API route handlers

pub mod flush;
pub mod health;
