//! Configuration.
//!
//! Three layers: process environment over the TOML file over built-in
//! defaults, with runtime overrides from the store applied on top. The
//! effective config is resolved through [`ConfigHandle`], never captured at
//! startup.

mod handle;
mod loader;
mod types;

pub use handle::ConfigHandle;
pub use loader::{load_config, load_config_from_str};
pub use types::*;
