//! # cadence-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`CadenceSettings::default()`]
//! 2. **User file**: `~/.cadence/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `CADENCE_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use cadence_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("memory bound: {}", settings.chat.max_memory_length);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
