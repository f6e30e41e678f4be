use serde::{Deserialize, Serialize};

use std::path::PathBuf;

/// The two fixed manzai roles. Every line of a script belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tsukkomi,
    Boke,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Tsukkomi => f.write_str("tsukkomi"),
            Role::Boke => f.write_str("boke"),
        }
    }
}

/// One line of dialogue. `text` is non-empty by construction: parsing drops
/// empty lines before a `ScriptLine` is ever built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub role: Role,
    pub text: String,
}

/// A generated script. Holds at least one line whenever returned from a
/// successful generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub topic: String,
    pub lines: Vec<ScriptLine>,
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("prompt template not found: {0}")]
    NotFound(String),

    #[error("template variable not filled: {0}")]
    MissingVariable(String),

    #[error("malformed template: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{backend} backend unavailable during {phase}: {message}")]
    BackendUnavailable {
        backend: &'static str,
        phase: &'static str,
        message: String,
    },

    #[error("model '{model}' is not available. available models: {list}", list = .available.join(", "))]
    ModelUnavailable {
        model: String,
        available: Vec<String>,
    },

    #[error("could not extract a script from model output: {0}")]
    Parse(String),

    #[error("storage error at {path}: {source}", path = .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audio file not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl ServiceError {
    /// Classify a transport-level failure against a backend, preserving the
    /// phase it happened in.
    pub(crate) fn backend(backend: &'static str, phase: &'static str, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("timeout: {err}")
        } else if err.is_connect() {
            format!("connection error: {err}")
        } else {
            err.to_string()
        };
        ServiceError::BackendUnavailable {
            backend,
            phase,
            message,
        }
    }

    pub(crate) fn backend_status(
        backend: &'static str,
        phase: &'static str,
        status: reqwest::StatusCode,
        body: String,
    ) -> Self {
        ServiceError::BackendUnavailable {
            backend,
            phase,
            message: format!("status {status}: {body}"),
        }
    }
}

/// Process-level settings for the two backends and the audio directory.
/// Components are constructed from this once at startup and passed around
/// by reference; nothing reads the environment after that.
#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub ollama_url: String,
    pub voicevox_url: String,
    pub audio_dir: PathBuf,
    pub default_model: String,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            voicevox_url: "http://localhost:50021".to_string(),
            audio_dir: default_audio_dir(),
            default_model: "gemma3:4b".to_string(),
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ollama_url: env_or("OLLAMA_URL", &defaults.ollama_url),
            voicevox_url: env_or("VOICEVOX_URL", &defaults.voicevox_url),
            audio_dir: std::env::var("AUDIO_OUTPUT_DIR")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.audio_dir),
            default_model: env_or("OLLAMA_MODEL", &defaults.default_model),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .and_then(|v| {
            let t = v.trim().to_string();
            if t.is_empty() {
                None
            } else {
                Some(t)
            }
        })
        .unwrap_or_else(|| default.to_string())
}

fn default_audio_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("manzai-studio").join("audio"))
        .unwrap_or_else(|| PathBuf::from("audio"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Tsukkomi).unwrap(), "\"tsukkomi\"");
        assert_eq!(serde_json::to_string(&Role::Boke).unwrap(), "\"boke\"");
        let back: Role = serde_json::from_str("\"boke\"").unwrap();
        assert_eq!(back, Role::Boke);
    }

    #[test]
    fn test_backend_status_message() {
        let err = ServiceError::backend_status(
            "voicevox",
            "synthesis",
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "boom".to_string(),
        );
        let text = err.to_string();
        assert!(text.contains("voicevox"));
        assert!(text.contains("synthesis"));
        assert!(text.contains("500"));
    }

    #[test]
    fn test_default_config_urls() {
        let cfg = StudioConfig::default();
        assert_eq!(cfg.ollama_url, "http://localhost:11434");
        assert_eq!(cfg.voicevox_url, "http://localhost:50021");
    }
}
