//! # chatline-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ChatlineSettings::default()`]
//! 2. **User file**: `~/.chatline/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CHATLINE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<ChatlineSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// The first call loads `~/.chatline/settings.json` with env overrides and
/// caches the result. If loading fails, compiled defaults are used.
pub fn get_settings() -> &'static ChatlineSettings {
    SETTINGS.get_or_init(|| match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            ChatlineSettings::default()
        }
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: ChatlineSettings) -> std::result::Result<(), ChatlineSettings> {
    SETTINGS.set(settings)
}
