//! CLI command implementations

pub mod config;
pub mod load;
pub mod manifest;

pub use config::execute as config;
pub use load::execute as load;
pub use manifest::execute as manifest;
