use std::path::PathBuf;

use crate::error::AppError;
use crate::search::DEFAULT_TOP_K;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Application configuration loaded from environment variables.
///
/// Remote client settings (`AZURE_ENDPOINT`, `AZURE_API_KEY`, timeouts and
/// retries) live in `llm_common::openai::OpenAiClientConfig`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Model identifier sent with every completion request.
    pub model_name: String,
    /// Directory holding one JSON record per knowledge document.
    pub knowledge_path: PathBuf,
    /// Directory where uploaded images are stored.
    pub upload_dir: PathBuf,
    /// Socket address for the HTTP server.
    pub listen_addr: String,
    /// Number of documents injected into a knowledge-augmented prompt.
    pub top_k: usize,
    /// Request body limit for image uploads.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Optional:
    /// - `AZURE_MODEL_NAME` (default: "gpt-4o")
    /// - `KNOWLEDGE_PATH` (default: "knowledge/medical_conditions")
    /// - `UPLOAD_DIR` (default: "uploads")
    /// - `LISTEN_ADDR` (default: "127.0.0.1:5000")
    /// - `KNOWLEDGE_TOP_K` (default: 3, must be positive)
    /// - `MAX_UPLOAD_BYTES` (default: 16 MiB)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let top_k = match get("KNOWLEDGE_TOP_K") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| {
                    AppError::Config(format!("KNOWLEDGE_TOP_K must be a positive integer, got {raw:?}"))
                })?,
            None => DEFAULT_TOP_K,
        };

        let max_upload_bytes = match get("MAX_UPLOAD_BYTES") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                AppError::Config(format!("MAX_UPLOAD_BYTES must be a byte count, got {raw:?}"))
            })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            model_name: get("AZURE_MODEL_NAME").unwrap_or_else(|| "gpt-4o".to_string()),
            knowledge_path: get("KNOWLEDGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("knowledge/medical_conditions")),
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            listen_addr: get("LISTEN_ADDR").unwrap_or_else(|| "127.0.0.1:5000".to_string()),
            top_k,
            max_upload_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.model_name, "gpt-4o");
        assert_eq!(config.knowledge_path, PathBuf::from("knowledge/medical_conditions"));
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.listen_addr, "127.0.0.1:5000");
        assert_eq!(config.top_k, 3);
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn overrides_are_read() {
        let config = Config::from_lookup(lookup(&[
            ("AZURE_MODEL_NAME", "gpt-4o-mini"),
            ("KNOWLEDGE_PATH", "/srv/knowledge"),
            ("KNOWLEDGE_TOP_K", "5"),
            ("LISTEN_ADDR", "0.0.0.0:8080"),
        ]))
        .expect("config");
        assert_eq!(config.model_name, "gpt-4o-mini");
        assert_eq!(config.knowledge_path, PathBuf::from("/srv/knowledge"));
        assert_eq!(config.top_k, 5);
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        let err = Config::from_lookup(lookup(&[("KNOWLEDGE_TOP_K", "0")])).expect_err("zero top_k");
        assert!(matches!(err, AppError::Config(_)));

        let err = Config::from_lookup(lookup(&[("MAX_UPLOAD_BYTES", "lots")])).expect_err("bad size");
        assert!(matches!(err, AppError::Config(_)));
    }
}
