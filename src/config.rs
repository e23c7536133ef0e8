//! The explicit configuration bundle consumed by the engine (spec §6, §9).
//!
//! There is no process-wide state: everything the engine needs travels in
//! one `EngineConfig`, constructed once and shared read-only across the
//! dispatcher's worker pool.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Configuration forwarded to the engine and, where noted, to the
/// translator backend selected by `service`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Font-name regex forcing formula classification (§4.1 item 4).
    #[serde(default)]
    pub vfont: Option<String>,
    /// Character regex forcing formula classification (§4.1 item 4).
    #[serde(default)]
    pub vchar: Option<String>,
    /// Worker count for the translation dispatcher. `0` resolves to the
    /// platform's default parallelism.
    #[serde(default)]
    pub thread: usize,
    pub lang_in: String,
    pub lang_out: String,
    pub service: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub envs: HashMap<String, String>,
    #[serde(default)]
    pub ignore_cache: bool,
}

impl EngineConfig {
    /// Resolved worker count: `thread` verbatim, or the platform's default
    /// parallelism when `thread == 0` ("0 means the runtime's default pool
    /// size", spec §6).
    pub fn resolved_threads(&self) -> usize {
        if self.thread > 0 {
            return self.thread;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Compile `vfont` into a [`regex::Regex`], surfacing a malformed
    /// pattern as [`EngineError::InvalidConfig`].
    pub fn vfont_regex(&self) -> Result<Option<regex::Regex>> {
        compile_optional(self.vfont.as_deref())
    }

    /// Compile `vchar` into a [`regex::Regex`].
    pub fn vchar_regex(&self) -> Result<Option<regex::Regex>> {
        compile_optional(self.vchar.as_deref())
    }
}

fn compile_optional(pattern: Option<&str>) -> Result<Option<regex::Regex>> {
    match pattern {
        None => Ok(None),
        Some(src) => regex::Regex::new(src)
            .map(Some)
            .map_err(|e| EngineError::InvalidConfig(e.to_string())),
    }
}

/// Default line height for a given output language (spec §4.4 table),
/// matched case-insensitively against `lang_out`.
pub fn default_line_height(lang_out: &str) -> f32 {
    match lang_out.to_lowercase().as_str() {
        "zh" | "zh-cn" | "zh-tw" | "zh-hans" | "zh-hant" => 1.4,
        "ja" => 1.1,
        "ko" | "en" => 1.2,
        "ar" => 1.0,
        "ru" | "uk" | "ta" => 0.8,
        _ => 1.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_height_table() {
        assert_eq!(default_line_height("ZH-CN"), 1.4);
        assert_eq!(default_line_height("ja"), 1.1);
        assert_eq!(default_line_height("en"), 1.2);
        assert_eq!(default_line_height("ko"), 1.2);
        assert_eq!(default_line_height("ar"), 1.0);
        assert_eq!(default_line_height("ru"), 0.8);
        assert_eq!(default_line_height("fr"), 1.1);
    }

    #[test]
    fn resolved_threads_defaults_when_zero() {
        let cfg = EngineConfig {
            vfont: None,
            vchar: None,
            thread: 0,
            lang_in: "en".into(),
            lang_out: "zh".into(),
            service: "identity".into(),
            prompt: None,
            envs: HashMap::new(),
            ignore_cache: false,
        };
        assert!(cfg.resolved_threads() >= 1);
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let cfg = EngineConfig {
            vfont: Some("(".into()),
            vchar: None,
            thread: 1,
            lang_in: "en".into(),
            lang_out: "en".into(),
            service: "identity".into(),
            prompt: None,
            envs: HashMap::new(),
            ignore_cache: false,
        };
        assert!(cfg.vfont_regex().is_err());
    }
}
