//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → shared via Arc by every request of a SafeClient
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a client built from it never changes
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{GuardConfig, HttpConfig, ObservabilityConfig, PolicyConfig, RedirectConfig, TimeoutConfig};
pub use validation::{validate_config, ValidationError};
