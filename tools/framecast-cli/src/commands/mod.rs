pub mod config;
pub mod fetch;
pub mod plan;
pub mod probe;
