//! Bedrock model settings and RAG engine settings, sourced from the
//! environment (`.env` is loaded into it at startup).

use std::collections::HashMap;

use serde::Serialize;

use crate::bedrock::BedrockError;

use super::env::{EnvReader, map_env, process_env};

pub const DEFAULT_CLAUDE_MODEL_ID: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";
pub const DEFAULT_HAIKU_MODEL_ID: &str = "anthropic.claude-3-haiku-20240307-v1:0";
pub const DEFAULT_TITAN_EMBEDDING_MODEL_ID: &str = "amazon.titan-embed-text-v2:0";

/// AWS error codes that are always worth another attempt.
pub const DEFAULT_RETRYABLE_CODES: [&str; 5] = [
    "ThrottlingException",
    "ServiceUnavailableException",
    "InternalServerException",
    "ModelTimeoutException",
    "ModelNotReadyException",
];

/// Upper bound for `max_concurrent_requests`; far below `Semaphore::MAX_PERMITS`.
pub const MAX_CONCURRENT_REQUESTS: usize = 1000;
/// Upper bound for `retry_max_backoff`, in seconds.
pub const MAX_RETRY_BACKOFF_SECS: f64 = 3600.0;

// ── Retry ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_factor: f64,
    /// Seconds.
    pub max_backoff: f64,
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: 2.0,
            max_backoff: 60.0,
            retryable_errors: DEFAULT_RETRYABLE_CODES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ── Bedrock ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct BedrockConfig {
    pub aws_region: String,
    pub aws_profile: Option<String>,

    pub claude_model_id: String,
    pub claude_haiku_model_id: String,
    pub titan_embedding_model_id: String,

    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,

    pub retry_max_attempts: u32,
    pub retry_backoff_factor: f64,
    pub retry_max_backoff: f64,

    /// Seconds.
    pub request_timeout: u64,
    pub max_concurrent_requests: usize,

    pub embedding_batch_size: usize,
    pub embedding_dimensions: Option<u32>,

    /// Longest side in pixels; validation allows up to twice this.
    pub max_image_size: u32,
    /// `standard` or `high`.
    pub image_quality: String,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            aws_region: "us-east-1".into(),
            aws_profile: None,
            claude_model_id: DEFAULT_CLAUDE_MODEL_ID.into(),
            claude_haiku_model_id: DEFAULT_HAIKU_MODEL_ID.into(),
            titan_embedding_model_id: DEFAULT_TITAN_EMBEDDING_MODEL_ID.into(),
            max_tokens: 4096,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 250,
            retry_max_attempts: 3,
            retry_backoff_factor: 2.0,
            retry_max_backoff: 60.0,
            request_timeout: 300,
            max_concurrent_requests: 10,
            embedding_batch_size: 25,
            embedding_dimensions: None,
            max_image_size: 1024,
            image_quality: "standard".into(),
        }
    }
}

impl BedrockConfig {
    /// Read every `AWS_*` / `BEDROCK_*` key from the process environment and
    /// validate the result.
    pub fn from_env() -> Result<Self, BedrockError> {
        Self::from_reader(&process_env())
    }

    /// Same as [`from_env`](Self::from_env) over a fixed map.
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self, BedrockError> {
        Self::from_reader(&map_env(vars))
    }

    pub fn from_reader<F>(env: &EnvReader<F>) -> Result<Self, BedrockError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let cfg = Self {
            aws_region: env.string("AWS_REGION", &d.aws_region),
            aws_profile: env.opt_string("AWS_PROFILE"),
            claude_model_id: env.string("BEDROCK_CLAUDE_MODEL_ID", &d.claude_model_id),
            claude_haiku_model_id: env.string("BEDROCK_CLAUDE_HAIKU_MODEL_ID", &d.claude_haiku_model_id),
            titan_embedding_model_id: env
                .string("BEDROCK_TITAN_EMBEDDING_MODEL_ID", &d.titan_embedding_model_id),
            max_tokens: env.parsed("BEDROCK_MAX_TOKENS", d.max_tokens),
            temperature: env.parsed("BEDROCK_TEMPERATURE", d.temperature),
            top_p: env.parsed("BEDROCK_TOP_P", d.top_p),
            top_k: env.parsed("BEDROCK_TOP_K", d.top_k),
            retry_max_attempts: env.parsed("BEDROCK_RETRY_MAX_ATTEMPTS", d.retry_max_attempts),
            retry_backoff_factor: env.parsed("BEDROCK_RETRY_BACKOFF_FACTOR", d.retry_backoff_factor),
            retry_max_backoff: env.parsed("BEDROCK_RETRY_MAX_BACKOFF", d.retry_max_backoff),
            request_timeout: env.parsed("BEDROCK_REQUEST_TIMEOUT", d.request_timeout),
            max_concurrent_requests: env
                .parsed("BEDROCK_MAX_CONCURRENT_REQUESTS", d.max_concurrent_requests),
            embedding_batch_size: env.parsed("BEDROCK_EMBEDDING_BATCH_SIZE", d.embedding_batch_size),
            embedding_dimensions: env.opt_parsed("BEDROCK_EMBEDDING_DIMENSIONS"),
            max_image_size: env.parsed("BEDROCK_MAX_IMAGE_SIZE", d.max_image_size),
            image_quality: env.string("BEDROCK_IMAGE_QUALITY", &d.image_quality),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check every setting, collecting all violations into one error.
    pub fn validate(&self) -> Result<(), BedrockError> {
        let mut errors: Vec<&str> = Vec::new();

        if self.aws_region.is_empty() {
            errors.push("AWS region is required");
        }
        if self.claude_model_id.is_empty() {
            errors.push("Claude model ID is required");
        }
        if self.claude_haiku_model_id.is_empty() {
            errors.push("Claude Haiku model ID is required");
        }
        if self.titan_embedding_model_id.is_empty() {
            errors.push("Titan embedding model ID is required");
        }

        if self.max_tokens == 0 {
            errors.push("max_tokens must be positive");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            errors.push("temperature must be between 0.0 and 2.0");
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            errors.push("top_p must be between 0.0 and 1.0");
        }
        if self.top_k == 0 {
            errors.push("top_k must be positive");
        }

        if self.retry_max_attempts == 0 {
            errors.push("retry_max_attempts must be positive");
        }
        if !self.retry_backoff_factor.is_finite() || self.retry_backoff_factor <= 1.0 {
            errors.push("retry_backoff_factor must be a finite number greater than 1.0");
        }
        if !(self.retry_max_backoff > 0.0 && self.retry_max_backoff <= MAX_RETRY_BACKOFF_SECS) {
            errors.push("retry_max_backoff must be between 0 and 3600 seconds");
        }

        if self.request_timeout == 0 {
            errors.push("request_timeout must be positive");
        }
        if self.max_concurrent_requests == 0 {
            errors.push("max_concurrent_requests must be positive");
        } else if self.max_concurrent_requests > MAX_CONCURRENT_REQUESTS {
            errors.push("max_concurrent_requests must be at most 1000");
        }

        if self.embedding_batch_size == 0 {
            errors.push("embedding_batch_size must be positive");
        }
        if self.embedding_dimensions == Some(0) {
            errors.push("embedding_dimensions must be positive if specified");
        }

        if self.max_image_size == 0 {
            errors.push("max_image_size must be positive");
        }
        if self.image_quality != "standard" && self.image_quality != "high" {
            errors.push("image_quality must be 'standard' or 'high'");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BedrockError::configuration(format!(
                "Configuration validation failed: {}",
                errors.join("; ")
            )))
        }
    }

    /// JPEG quality for prepared images: 95 for `high`, else 85.
    pub fn jpeg_quality(&self) -> u8 {
        if self.image_quality == "high" { 95 } else { 85 }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            backoff_factor: self.retry_backoff_factor,
            max_backoff: self.retry_max_backoff,
            ..RetryConfig::default()
        }
    }

    /// Flat JSON view for `info` output and logs.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// ── RAG engine settings ──────────────────────────────────────────────────────

/// Settings consumed by the external RAG engine. This crate only writes and
/// reports them.
#[derive(Debug, Clone, Serialize)]
pub struct RagSettings {
    pub working_dir: String,
    pub output_dir: String,
    pub parser: String,
    pub parse_method: String,
    pub max_concurrent_files: u32,
    pub enable_image_processing: bool,
    pub enable_table_processing: bool,
    pub enable_equation_processing: bool,
    pub log_level: String,
    pub log_dir: String,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            working_dir: "./rag_storage".into(),
            output_dir: "./output".into(),
            parser: "mineru".into(),
            parse_method: "auto".into(),
            max_concurrent_files: 4,
            enable_image_processing: true,
            enable_table_processing: true,
            enable_equation_processing: true,
            log_level: "INFO".into(),
            log_dir: "./logs".into(),
        }
    }
}

impl RagSettings {
    pub fn from_env() -> Self {
        Self::from_reader(&process_env())
    }

    pub fn from_reader<F>(env: &EnvReader<F>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        Self {
            working_dir: env.string("WORKING_DIR", &d.working_dir),
            output_dir: env.string("OUTPUT_DIR", &d.output_dir),
            parser: env.string("PARSER", &d.parser),
            parse_method: env.string("PARSE_METHOD", &d.parse_method),
            max_concurrent_files: env.parsed("MAX_CONCURRENT_FILES", d.max_concurrent_files),
            enable_image_processing: env.flag("ENABLE_IMAGE_PROCESSING", d.enable_image_processing),
            enable_table_processing: env.flag("ENABLE_TABLE_PROCESSING", d.enable_table_processing),
            enable_equation_processing: env
                .flag("ENABLE_EQUATION_PROCESSING", d.enable_equation_processing),
            log_level: env.string("LOG_LEVEL", &d.log_level),
            log_dir: env.string("LOG_DIR", &d.log_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_validate() {
        let cfg = BedrockConfig::from_map(HashMap::new()).unwrap();
        assert_eq!(cfg.aws_region, "us-east-1");
        assert_eq!(cfg.claude_model_id, DEFAULT_CLAUDE_MODEL_ID);
        assert_eq!(cfg.max_tokens, 4096);
        assert_eq!(cfg.top_k, 250);
        assert_eq!(cfg.embedding_dimensions, None);
    }

    #[test]
    fn env_values_override_defaults() {
        let cfg = BedrockConfig::from_map(vars(&[
            ("AWS_REGION", "eu-west-1"),
            ("BEDROCK_MAX_TOKENS", "1024"),
            ("BEDROCK_TEMPERATURE", "0.2"),
            ("BEDROCK_EMBEDDING_DIMENSIONS", "512"),
            ("AWS_PROFILE", "dev"),
        ]))
        .unwrap();
        assert_eq!(cfg.aws_region, "eu-west-1");
        assert_eq!(cfg.max_tokens, 1024);
        assert_eq!(cfg.temperature, 0.2);
        assert_eq!(cfg.embedding_dimensions, Some(512));
        assert_eq!(cfg.aws_profile.as_deref(), Some("dev"));
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let cfg = BedrockConfig::from_map(vars(&[("BEDROCK_TOP_K", "many")])).unwrap();
        assert_eq!(cfg.top_k, 250);
    }

    #[test]
    fn validation_reports_every_violation() {
        let cfg = BedrockConfig {
            max_tokens: 0,
            temperature: 2.5,
            top_p: 1.5,
            retry_backoff_factor: 1.0,
            image_quality: "ultra".into(),
            ..BedrockConfig::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("Configuration validation failed"));
        assert!(err.contains("max_tokens must be positive"));
        assert!(err.contains("temperature must be between 0.0 and 2.0"));
        assert!(err.contains("top_p must be between 0.0 and 1.0"));
        assert!(err.contains("retry_backoff_factor must be a finite number greater than 1.0"));
        assert!(err.contains("image_quality must be 'standard' or 'high'"));
        assert_eq!(err.matches("; ").count(), 4);
    }

    #[test]
    fn oversized_concurrency_rejected() {
        let err = BedrockConfig::from_map(vars(&[(
            "BEDROCK_MAX_CONCURRENT_REQUESTS",
            "18446744073709551615",
        )]))
        .unwrap_err()
        .to_string();
        assert!(err.contains("max_concurrent_requests must be at most 1000"), "{err}");

        let ok = BedrockConfig::from_map(vars(&[("BEDROCK_MAX_CONCURRENT_REQUESTS", "1000")])).unwrap();
        assert_eq!(ok.max_concurrent_requests, MAX_CONCURRENT_REQUESTS);
    }

    #[test]
    fn non_finite_backoff_rejected() {
        for (key, value) in [
            ("BEDROCK_RETRY_MAX_BACKOFF", "inf"),
            ("BEDROCK_RETRY_MAX_BACKOFF", "NaN"),
            ("BEDROCK_RETRY_MAX_BACKOFF", "1e9"),
            ("BEDROCK_RETRY_BACKOFF_FACTOR", "inf"),
            ("BEDROCK_RETRY_BACKOFF_FACTOR", "NaN"),
        ] {
            let err = BedrockConfig::from_map(vars(&[(key, value)])).unwrap_err().to_string();
            assert!(err.contains("retry_"), "{key}={value}: {err}");
        }
        // Huge but finite factors pass; the backoff cap keeps sleeps bounded.
        let cfg = BedrockConfig::from_map(vars(&[("BEDROCK_RETRY_BACKOFF_FACTOR", "1e300")])).unwrap();
        assert_eq!(cfg.retry_backoff_factor, 1e300);
    }

    #[test]
    fn zero_dimensions_rejected() {
        let err = BedrockConfig::from_map(vars(&[("BEDROCK_EMBEDDING_DIMENSIONS", "0")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("embedding_dimensions must be positive if specified"));
    }

    #[test]
    fn retry_config_carries_default_codes() {
        let cfg = BedrockConfig {
            retry_max_attempts: 5,
            ..BedrockConfig::default()
        };
        let r = cfg.retry_config();
        assert_eq!(r.max_attempts, 5);
        assert_eq!(r.retryable_errors.len(), 5);
        assert!(r.retryable_errors.iter().any(|c| c == "ThrottlingException"));
    }

    #[test]
    fn rag_settings_flags() {
        let env = map_env(vars(&[("ENABLE_TABLE_PROCESSING", "no"), ("MAX_CONCURRENT_FILES", "8")]));
        let rag = RagSettings::from_reader(&env);
        assert!(!rag.enable_table_processing);
        assert!(rag.enable_image_processing);
        assert_eq!(rag.max_concurrent_files, 8);
    }
}
