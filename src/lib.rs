// Public modules
pub mod agent;
pub mod aggregate;
pub mod alert;
pub mod api;
pub mod breakdown;
pub mod config;
pub mod csv;
pub mod email;
pub mod error;
pub mod kubernetes;
pub mod loki;
pub mod pdf;
pub mod prometheus;
pub mod report;
pub mod slack;
pub mod state;
pub mod types;
pub mod units;

// Re-export commonly used items
pub use config::{load_config, load_config_with_env, EnvironmentProvider, MockEnvironment, SystemEnvironment};
pub use state::AppState;
pub use types::*;
pub use units::{bytes_to_mebibytes, normalize_cpu_cores, normalize_memory_bytes};
