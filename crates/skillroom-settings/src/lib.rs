//! # skillroom-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SkillroomSettings::default()`]
//! 2. **User file**: `~/.skillroom/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SKILLROOM_*` overrides (highest priority)
//!
//! Callers load once at startup and pass the
//! value (or the section they need) down explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_dir, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = SkillroomSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.assistant.model, "gpt-3.5-turbo");
        assert_eq!(settings.client.compile_delay_ms, 1000);
        assert_eq!(settings.client.file_chunk_size, 16 * 1024);
        assert_eq!(settings.assistant.max_history_turns, 20);
    }

    #[test]
    fn settings_path_under_settings_dir() {
        assert!(settings_path().starts_with(settings_dir()));
        assert!(settings_path().ends_with("settings.json"));
    }
}
