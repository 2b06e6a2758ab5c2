pub mod assignment;
pub mod config;
pub mod errors;
pub mod logging;
