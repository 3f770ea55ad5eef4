//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs the fields it changes.

use serde::{Deserialize, Serialize};

use crate::loader::quill_home;

/// Root settings type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuillSettings {
    /// Generation endpoint and sampling defaults.
    pub api: ApiSettings,
    /// Context-window management.
    pub context: ContextSettings,
    /// Sampling for summarization calls.
    pub summary: SummarySettings,
    /// Where conversations are persisted.
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl Default for QuillSettings {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            context: ContextSettings::default(),
            summary: SummarySettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL of an OpenAI-compatible endpoint. Empty means unconfigured.
    pub endpoint: String,
    /// Bearer credential. Empty means unconfigured.
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated between streamed chunks.
    pub idle_timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.8,
            max_tokens: 1024,
            connect_timeout_secs: 30,
            idle_timeout_secs: 90,
        }
    }
}

impl ApiSettings {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// A fold fires once more than `2 * max_history_turns` turns are unfolded.
    pub max_history_turns: usize,
    /// Most recent turns left verbatim by a fold. 0 folds everything.
    pub fold_keep_count: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_history_turns: 10,
            fold_keep_count: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummarySettings {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Json,
    Sqlite,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub data_dir: String,
    pub backend: StorageBackend,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: quill_home().to_string_lossy().into_owned(),
            backend: StorageBackend::Json,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
