pub mod checks;
pub mod client;
pub mod config;
pub mod config_validation;
pub mod errors;
pub mod executor;
pub mod load_models;
pub mod metrics;
pub mod output;
pub mod percentiles;
pub mod report;
pub mod sinks;
pub mod summary;
pub mod thresholds;
pub mod utils;
pub mod worker;
pub mod yaml_config;
