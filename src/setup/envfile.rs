//! `.env` parsing and rendering.
//!
//! Reading goes through `dotenvy`; rendering is ours so key order and
//! section comments survive a rewrite. Rendering is
//! stable: canonical keys first, grouped under section comments, then any
//! other keys in insertion order.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use super::SetupError;
use crate::config::{BedrockConfig, RagSettings};

/// Canonical key order, grouped by section.
pub const SECTIONS: &[(&str, &[&str])] = &[
    ("AWS", &["AWS_REGION", "AWS_PROFILE"]),
    (
        "Bedrock models",
        &["BEDROCK_CLAUDE_MODEL_ID", "BEDROCK_CLAUDE_HAIKU_MODEL_ID", "BEDROCK_TITAN_EMBEDDING_MODEL_ID"],
    ),
    ("Sampling", &["BEDROCK_MAX_TOKENS", "BEDROCK_TEMPERATURE", "BEDROCK_TOP_P", "BEDROCK_TOP_K"]),
    (
        "Retry and requests",
        &[
            "BEDROCK_RETRY_MAX_ATTEMPTS",
            "BEDROCK_RETRY_BACKOFF_FACTOR",
            "BEDROCK_RETRY_MAX_BACKOFF",
            "BEDROCK_REQUEST_TIMEOUT",
            "BEDROCK_MAX_CONCURRENT_REQUESTS",
        ],
    ),
    (
        "Embeddings and vision",
        &[
            "BEDROCK_EMBEDDING_BATCH_SIZE",
            "BEDROCK_EMBEDDING_DIMENSIONS",
            "BEDROCK_MAX_IMAGE_SIZE",
            "BEDROCK_IMAGE_QUALITY",
        ],
    ),
    (
        "RAG Anything",
        &[
            "WORKING_DIR",
            "OUTPUT_DIR",
            "PARSER",
            "PARSE_METHOD",
            "MAX_CONCURRENT_FILES",
            "ENABLE_IMAGE_PROCESSING",
            "ENABLE_TABLE_PROCESSING",
            "ENABLE_EQUATION_PROCESSING",
            "CONTEXT_WINDOW",
            "MAX_CONTEXT_TOKENS",
        ],
    ),
    ("Logging", &["LOG_LEVEL", "LOG_DIR"]),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: Vec<(String, String)>,
}

impl EnvFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads entries with `dotenvy`, so quoting, `export ` prefixes and inline
    /// comments follow the usual `.env` rules. Malformed lines are skipped
    /// with a warning.
    pub fn parse(text: &str) -> Self {
        Self::from_entries(dotenvy::from_read_iter(text.as_bytes()))
    }

    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let iter = dotenvy::from_path_iter(path).map_err(|e| SetupError::EnvFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self::from_entries(iter))
    }

    fn from_entries(entries: impl Iterator<Item = dotenvy::Result<(String, String)>>) -> Self {
        let mut file = Self::new();
        for entry in entries {
            match entry {
                Ok((key, value)) => file.set(&key, value),
                Err(dotenvy::Error::Io(e)) => {
                    warn!(error = %e, "stopped reading env file");
                    break;
                }
                Err(e) => warn!(error = %e, "skipping malformed env line"),
            }
        }
        file
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Replace in place, or append.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn set_if_absent(&mut self, key: &str, value: impl Into<String>) -> bool {
        if self.contains(key) {
            return false;
        }
        self.set(key, value);
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self, header: &str) -> String {
        let mut out = String::new();
        for line in header.lines() {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
        let mut written: Vec<&str> = Vec::new();
        for (section, keys) in SECTIONS {
            let present: Vec<&str> = keys.iter().copied().filter(|k| self.contains(k)).collect();
            if present.is_empty() {
                continue;
            }
            out.push_str(&format!("\n# {section}\n"));
            for k in present {
                out.push_str(&format!("{k}={}\n", quote(self.get(k).unwrap_or_default())));
                written.push(k);
            }
        }
        let extra: Vec<&(String, String)> =
            self.entries.iter().filter(|(k, _)| !written.contains(&k.as_str())).collect();
        if !extra.is_empty() {
            out.push_str("\n# Other\n");
            for (k, v) in extra {
                out.push_str(&format!("{k}={}\n", quote(v)));
            }
        }
        out
    }
}

/// Quote `v` so it reads back unchanged: bare when safe, single quotes when
/// possible (no substitution inside), double quotes with escapes otherwise.
fn quote(v: &str) -> String {
    let bare = v
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_.:/@+,=?&%".contains(c));
    if bare {
        return v.to_string();
    }
    if !v.contains('\'') {
        return format!("'{v}'");
    }
    let mut out = String::with_capacity(v.len() + 2);
    out.push('"');
    for c in v.chars() {
        match c {
            '"' | '\\' | '$' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// `.env` contents for a fresh install.
pub fn default_env(bedrock: &BedrockConfig, rag: &RagSettings) -> EnvFile {
    let mut f = EnvFile::new();
    f.set("AWS_REGION", &bedrock.aws_region);
    if let Some(p) = &bedrock.aws_profile {
        f.set("AWS_PROFILE", p);
    }
    f.set("BEDROCK_CLAUDE_MODEL_ID", &bedrock.claude_model_id);
    f.set("BEDROCK_CLAUDE_HAIKU_MODEL_ID", &bedrock.claude_haiku_model_id);
    f.set("BEDROCK_TITAN_EMBEDDING_MODEL_ID", &bedrock.titan_embedding_model_id);
    f.set("BEDROCK_MAX_TOKENS", bedrock.max_tokens.to_string());
    f.set("BEDROCK_TEMPERATURE", bedrock.temperature.to_string());
    f.set("BEDROCK_TOP_P", bedrock.top_p.to_string());
    f.set("BEDROCK_TOP_K", bedrock.top_k.to_string());
    f.set("BEDROCK_RETRY_MAX_ATTEMPTS", bedrock.retry_max_attempts.to_string());
    f.set("BEDROCK_RETRY_BACKOFF_FACTOR", format!("{:?}", bedrock.retry_backoff_factor));
    f.set("BEDROCK_RETRY_MAX_BACKOFF", format!("{:?}", bedrock.retry_max_backoff));
    f.set("BEDROCK_REQUEST_TIMEOUT", bedrock.request_timeout.to_string());
    f.set("BEDROCK_MAX_CONCURRENT_REQUESTS", bedrock.max_concurrent_requests.to_string());
    f.set("BEDROCK_EMBEDDING_BATCH_SIZE", bedrock.embedding_batch_size.to_string());
    if let Some(d) = bedrock.embedding_dimensions {
        f.set("BEDROCK_EMBEDDING_DIMENSIONS", d.to_string());
    }
    f.set("BEDROCK_MAX_IMAGE_SIZE", bedrock.max_image_size.to_string());
    f.set("BEDROCK_IMAGE_QUALITY", &bedrock.image_quality);

    f.set("WORKING_DIR", &rag.working_dir);
    f.set("OUTPUT_DIR", &rag.output_dir);
    f.set("PARSER", &rag.parser);
    f.set("PARSE_METHOD", &rag.parse_method);
    f.set("MAX_CONCURRENT_FILES", rag.max_concurrent_files.to_string());
    f.set("ENABLE_IMAGE_PROCESSING", rag.enable_image_processing.to_string());
    f.set("ENABLE_TABLE_PROCESSING", rag.enable_table_processing.to_string());
    f.set("ENABLE_EQUATION_PROCESSING", rag.enable_equation_processing.to_string());
    f.set("LOG_LEVEL", &rag.log_level);
    f.set("LOG_DIR", &rag.log_dir);
    f
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// File existed and `force` was not set.
    Kept,
}

/// Write `file` to `path` unless it already exists and `force` is false.
pub fn write_env_file(path: &Path, file: &EnvFile, header: &str, force: bool) -> Result<WriteOutcome, SetupError> {
    if path.exists() && !force {
        info!(path = %path.display(), "env file exists; keeping it");
        return Ok(WriteOutcome::Kept);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| SetupError::EnvFile { path: path.to_path_buf(), message: e.to_string() })?;
    }
    fs::write(path, file.render(header))
        .map_err(|e| SetupError::EnvFile { path: path.to_path_buf(), message: e.to_string() })?;
    info!(path = %path.display(), keys = file.len(), "env file written");
    Ok(WriteOutcome::Written)
}
