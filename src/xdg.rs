//! XDG base directories for werk
//!
//! - `$XDG_CACHE_HOME/werk/` (default: `~/.cache/werk/`) - provisioned tools
//! - `$XDG_CONFIG_HOME/werk/` (default: `~/.config/werk/`) - user configuration

use std::path::PathBuf;

/// Default cache directory (tool store lives under `tools/`)
///
/// ```
/// let cache_dir = werk::xdg::cache_dir();
/// assert!(cache_dir.ends_with("werk") || cache_dir.ends_with(".werk-cache"));
/// ```
pub fn cache_dir() -> PathBuf {
    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg_cache).join("werk")
    } else if let Some(cache) = dirs::cache_dir() {
        cache.join("werk")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".cache").join("werk")
    } else {
        PathBuf::from(".werk-cache")
    }
}

/// User configuration directory, holding the global `config.toml`
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        Some(PathBuf::from(xdg_config).join("werk"))
    } else {
        dirs::home_dir().map(|home| home.join(".config").join("werk"))
    }
}
