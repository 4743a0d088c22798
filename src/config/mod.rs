//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → ServerConfig moved into the server at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the server starts; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{GatewayConfig, ObservabilityConfig, ServerConfig};
pub use schema::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_MESSAGE_BYTES, UPGRADE_PATH};
