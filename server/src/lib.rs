//! Flush sink that persists aggregated StatsD metrics into capped,
//! time-bucketed collections.

pub mod api;
pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
