//! Post-install verification: Python imports inside the venv, a Bedrock
//! round trip through the facade, and the full categorised integration
//! validation with its Markdown report.

use std::io::Cursor;
use std::path::Path;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::SetupError;
use super::packages::venv_python;
use super::runner::{Cmd, CommandRunner};
use crate::bedrock::{BedrockRag, CompletionOptions};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
}

impl ImportReport {
    pub fn ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run `python -c "import <module>"` for every module. Never fails early.
pub fn check_imports(runner: &dyn CommandRunner, venv: &Path, modules: &[String]) -> ImportReport {
    let python = venv_python(venv).display().to_string();
    let mut report = ImportReport::default();
    for m in modules {
        let cmd = Cmd::new(python.as_str(), &["-c"]).arg(format!("import {m}"));
        if runner.succeeds(&cmd) {
            info!(module = %m, "import ok");
            report.passed.push(m.clone());
        } else {
            warn!(module = %m, "import failed");
            report.failed.push(m.clone());
        }
    }
    report
}

/// [`check_imports`], failing with the list of modules that did not import.
pub fn verify_imports(runner: &dyn CommandRunner, venv: &Path, modules: &[String]) -> Result<ImportReport, SetupError> {
    let report = check_imports(runner, venv, modules);
    if report.ok() {
        Ok(report)
    } else {
        Err(SetupError::Verification(format!("modules failed to import: {}", report.failed.join(", "))))
    }
}

/// Model permissions, a short completion and one embedding.
pub async fn bedrock_smoke_test(rag: &BedrockRag) -> Result<(), SetupError> {
    rag.validate_access()
        .await
        .map_err(|e| SetupError::Verification(format!("Bedrock smoke test: {e}")))?;
    let m = rag.metrics();
    info!(requests = m.total_requests, success_rate = m.success_rate, "Bedrock smoke test passed");
    Ok(())
}

// ── Integration validation ───────────────────────────────────────────────────

pub const CATEGORIES: [&str; 8] = [
    "configuration",
    "authentication",
    "llm_provider",
    "vision_provider",
    "embedding_provider",
    "integration",
    "performance",
    "error_handling",
];

const MAX_SINGLE_RESPONSE: Duration = Duration::from_secs(30);
const MAX_CONCURRENT_RESPONSE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub details: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub generated: String,
    /// One entry per [`CATEGORIES`] item, in that order.
    pub categories: Vec<(&'static str, Vec<TestResult>)>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            generated: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            categories: CATEGORIES.iter().map(|c| (*c, Vec::new())).collect(),
        }
    }
}

impl ValidationReport {
    pub fn record(&mut self, category: &'static str, name: &str, passed: bool, details: impl Into<String>) {
        let details = details.into();
        if passed {
            info!(category, test = name, details = %details, "validation passed");
        } else {
            error!(category, test = name, details = %details, "validation failed");
        }
        let result = TestResult {
            name: name.to_string(),
            passed,
            details,
            timestamp: chrono::Local::now().to_rfc3339(),
        };
        match self.categories.iter_mut().find(|(c, _)| *c == category) {
            Some((_, results)) => results.push(result),
            None => self.categories.push((category, vec![result])),
        }
    }

    pub fn results(&self, category: &str) -> &[TestResult] {
        self.categories
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, r)| r.as_slice())
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.categories.iter().map(|(_, r)| r.len()).sum()
    }

    pub fn passed(&self) -> usize {
        self.categories.iter().flat_map(|(_, r)| r).filter(|t| t.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    /// Percentage; 0 with no tests.
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.passed() as f64 / n as f64 * 100.0,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    pub fn render(&self) -> String {
        let mut out = vec![
            "# RAG Anything with AWS Bedrock - Validation Report".to_string(),
            String::new(),
            format!("Generated: {}", self.generated),
            String::new(),
            "## Summary".to_string(),
            String::new(),
        ];
        out.push(if self.all_passed() {
            "**Overall Status:** ✅ ALL TESTS PASSED".to_string()
        } else {
            "**Overall Status:** ❌ SOME TESTS FAILED".to_string()
        });
        out.push(String::new());
        out.push(format!("- Total Tests: {}", self.total()));
        out.push(format!("- Passed: {}", self.passed()));
        out.push(format!("- Failed: {}", self.failed()));
        out.push(format!("- Success Rate: {:.1}%", self.success_rate()));
        out.push(String::new());
        out.push("## Test Results by Category".to_string());

        for (category, results) in &self.categories {
            if results.is_empty() {
                continue;
            }
            let ok = results.iter().all(|t| t.passed);
            let passed = results.iter().filter(|t| t.passed).count();
            out.push(String::new());
            out.push(format!("### {} {} ({passed}/{})", mark(ok), title_case(category), results.len()));
            out.push(String::new());
            for t in results {
                out.push(format!("- {} **{}**: {}", mark(t.passed), t.name, t.details));
            }
        }

        out.push(String::new());
        if self.all_passed() {
            out.push("## All Tests Passed!".to_string());
            out.push(String::new());
            out.push("The Bedrock integration is ready for use.".to_string());
        } else {
            out.push("## Recommendations".to_string());
            out.push(String::new());
            out.push("1. Check AWS credentials and IAM permissions for Bedrock".to_string());
            out.push("2. Verify model access is enabled in the Bedrock console".to_string());
            out.push("3. Confirm the configured region offers the selected models".to_string());
            out.push("4. Review the logs for detailed error messages".to_string());
            out.push("5. Check network connectivity to the Bedrock endpoints".to_string());
        }
        out.push(String::new());
        out.join("\n")
    }
}

fn mark(ok: bool) -> &'static str {
    if ok { "✅" } else { "❌" }
}

/// `llm_provider` -> `Llm Provider`.
fn title_case(s: &str) -> String {
    s.split('_')
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(f) => f.to_uppercase().chain(c).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 100x100 white PNG with a black square in the middle.
pub fn sample_image() -> Result<String, SetupError> {
    let img = RgbImage::from_fn(100, 100, |x, y| {
        if (25..75).contains(&x) && (25..75).contains(&y) { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| SetupError::Verification(format!("cannot build test image: {e}")))?;
    Ok(STANDARD.encode(buf.into_inner()))
}

fn outcome<T>(r: &Result<T, impl std::fmt::Display>) -> String {
    match r {
        Ok(_) => "ok".to_string(),
        Err(e) => e.to_string(),
    }
}

/// Runs every validation category against a facade and collects a
/// [`ValidationReport`]. Individual failures never stop the run.
pub struct IntegrationValidator<'a> {
    rag: &'a BedrockRag,
    report: ValidationReport,
}

impl<'a> IntegrationValidator<'a> {
    pub fn new(rag: &'a BedrockRag) -> Self {
        Self { rag, report: ValidationReport::default() }
    }

    pub async fn run_all(mut self) -> ValidationReport {
        info!("starting Bedrock integration validation");
        self.configuration();
        self.authentication().await;
        self.llm_provider().await;
        self.vision_provider().await;
        self.embedding_provider().await;
        self.integration().await;
        self.performance().await;
        self.error_handling().await;
        info!(
            total = self.report.total(),
            passed = self.report.passed(),
            failed = self.report.failed(),
            "integration validation finished"
        );
        self.report
    }

    fn configuration(&mut self) {
        let cfg = self.rag.config();
        let valid = cfg.validate();
        self.report.record("configuration", "Configuration validation", valid.is_ok(), outcome(&valid));

        let ids_ok = cfg.claude_model_id.contains("claude")
            && cfg.claude_haiku_model_id.contains("claude")
            && cfg.titan_embedding_model_id.contains("titan");
        self.report.record(
            "configuration",
            "Model ID format",
            ids_ok,
            format!(
                "claude={}, haiku={}, titan={}",
                cfg.claude_model_id, cfg.claude_haiku_model_id, cfg.titan_embedding_model_id
            ),
        );
    }

    async fn authentication(&mut self) {
        let id = self.rag.invoker().caller_identity().await;
        let known = id.account.is_some() || id.arn.is_some() || id.user_id.is_some();
        self.report.record(
            "authentication",
            "Caller identity",
            known,
            id.arn.unwrap_or_else(|| "identity unavailable".to_string()),
        );

        let permissions = self.rag.invoker().validate_permissions(&self.rag.model_ids()).await;
        self.report.record("authentication", "Model permissions", permissions.is_ok(), outcome(&permissions));
    }

    async fn llm_provider(&mut self) {
        let llm = self.rag.llm();
        let opts = CompletionOptions::max_tokens(50);

        let r = llm.complete("Hello! Please respond with a short greeting.", None, &[], &opts).await;
        let ok = r.as_ref().is_ok_and(|t| !t.is_empty());
        self.report.record("llm_provider", "Simple completion", ok, reply_details(&r));

        let r = llm
            .complete("What is 2+2?", Some("You are a helpful math assistant. Answer briefly."), &[], &opts)
            .await;
        let ok = r.as_ref().is_ok_and(|t| !t.is_empty());
        self.report.record("llm_provider", "System prompt completion", ok, reply_details(&r));

        let r = llm.complete_fast("Say 'Haiku test' in one line.", None, &[], &opts).await;
        let ok = r.as_ref().is_ok_and(|t| !t.is_empty());
        self.report.record("llm_provider", "Fast model completion", ok, reply_details(&r));
    }

    async fn vision_provider(&mut self) {
        let image = match sample_image() {
            Ok(i) => i,
            Err(e) => {
                self.report.record("vision_provider", "Test image", false, e.to_string());
                return;
            }
        };
        let vision = self.rag.vision();
        let valid = vision.validate_image_data(&image);
        self.report.record("vision_provider", "Image validation", valid, "100x100 PNG");

        let opts = CompletionOptions::max_tokens(100);
        let r = vision.analyze_image("Describe this image briefly.", &image, None, &opts).await;
        let ok = r.as_ref().is_ok_and(|t| t.len() > 10);
        self.report.record("vision_provider", "Image analysis", ok, reply_details(&r));

        let messages = [json!({"role": "user", "content": [
            {"type": "text", "text": "What shapes do you see?"},
            {"type": "image_url", "image_url": {"url": format!("data:image/png;base64,{image}")}}
        ]})];
        let r = vision.analyze_multimodal_messages(&messages, &opts).await;
        let ok = r.as_ref().is_ok_and(|t| !t.is_empty());
        self.report.record("vision_provider", "Multimodal messages", ok, reply_details(&r));
    }

    async fn embedding_provider(&mut self) {
        let embedding = self.rag.embedding();
        let dim = embedding.embedding_dimension();

        let r = embedding.embed_one("This is a test sentence for embedding.").await;
        let ok = r.as_ref().is_ok_and(|v| v.len() == dim);
        let details = match &r {
            Ok(v) => format!("dimension {}", v.len()),
            Err(e) => e.to_string(),
        };
        self.report.record("embedding_provider", "Single embedding", ok, details);

        let texts: Vec<String> = ["First test sentence.", "Second test sentence.", "Third test sentence."]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let vectors = embedding.embed_texts(&texts, None).await;
        let batch_ok = vectors.len() == texts.len() && vectors.iter().all(|v| v.iter().any(|x| *x != 0.0));
        self.report.record(
            "embedding_provider",
            "Batch embedding",
            batch_ok,
            format!("{} vectors for {} texts", vectors.len(), texts.len()),
        );

        let consistent = vectors.iter().all(|v| v.len() == dim);
        self.report.record("embedding_provider", "Dimension consistency", consistent, format!("expected {dim}"));
    }

    async fn integration(&mut self) {
        let r = self
            .rag
            .llm_func("Reply with one word.", None, &[], true, &CompletionOptions::max_tokens(20))
            .await;
        let ok = r.as_ref().is_ok_and(|t| !t.is_empty());
        self.report.record("integration", "LLM function", ok, reply_details(&r));

        let f = self.rag.embedding_func();
        let vectors = f.call(&["integration check".to_string()]).await;
        let ok = vectors.len() == 1 && vectors[0].len() == f.embedding_dim;
        self.report.record("integration", "Embedding function", ok, format!("dimension {}", f.embedding_dim));

        let access = self.rag.validate_access().await;
        self.report.record("integration", "Access validation", access.is_ok(), outcome(&access));
    }

    async fn performance(&mut self) {
        let opts = CompletionOptions::max_tokens(20);
        let start = Instant::now();
        let r = self.rag.llm().complete("Count from 1 to 3.", None, &[], &opts).await;
        let elapsed = start.elapsed();
        self.report.record(
            "performance",
            "Response time",
            r.is_ok() && elapsed < MAX_SINGLE_RESPONSE,
            format!("{:.2}s", elapsed.as_secs_f64()),
        );

        let prompts: Vec<String> = (1..=3).map(|i| format!("Give me fact number {i} about clouds.")).collect();
        let start = Instant::now();
        let replies = self.rag.llm().complete_batch(&prompts, None, &opts).await;
        let elapsed = start.elapsed();
        let all_ok = replies.iter().all(|r| !r.starts_with("Error:"));
        self.report.record(
            "performance",
            "Concurrent requests",
            all_ok && elapsed < MAX_CONCURRENT_RESPONSE,
            format!("{} requests in {:.2}s", prompts.len(), elapsed.as_secs_f64()),
        );
    }

    async fn error_handling(&mut self) {
        let llm = self.rag.llm();
        let bad = CompletionOptions { model_id: Some("invalid-model-id".into()), ..CompletionOptions::max_tokens(10) };
        let r = llm.complete("test", None, &[], &bad).await;
        let details = match &r {
            Ok(_) => "invalid model id was accepted".to_string(),
            Err(e) => e.to_string(),
        };
        self.report.record("error_handling", "Invalid model rejected", r.is_err(), details);

        // Either outcome is acceptable; the call just must not hang or panic.
        let r = llm.complete("", None, &[], &CompletionOptions::max_tokens(10)).await;
        self.report.record("error_handling", "Empty prompt handled", true, outcome(&r));

        let r = llm.complete("Write a long essay about history.", None, &[], &CompletionOptions::max_tokens(1)).await;
        self.report.record("error_handling", "Low max_tokens handled", true, outcome(&r));
    }
}

fn reply_details(r: &Result<String, crate::bedrock::BedrockError>) -> String {
    match r {
        Ok(t) => format!("{} chars", t.chars().count()),
        Err(e) => e.to_string(),
    }
}

/// Run every [`IntegrationValidator`] category against `rag`.
pub async fn validate_integration(rag: &BedrockRag) -> ValidationReport {
    IntegrationValidator::new(rag).run_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BedrockConfig, ProviderKind};
    use crate::setup::runner::testing::ScriptedRunner;

    fn modules() -> Vec<String> {
        ["boto3", "lightrag", "raganything"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn all_modules_checked_even_after_failure() {
        let r = ScriptedRunner::new().on("/v/bin/python -c import lightrag", &[1]);
        let report = check_imports(&r, Path::new("/v"), &modules());
        assert_eq!(report.passed, vec!["boto3", "raganything"]);
        assert_eq!(report.failed, vec!["lightrag"]);
        assert_eq!(r.calls().len(), 3);

        let err = verify_imports(&r, Path::new("/v"), &modules()).unwrap_err();
        assert!(err.to_string().contains("lightrag"));
    }

    fn dummy_rag(cfg: BedrockConfig) -> BedrockRag {
        BedrockRag::new(cfg, ProviderKind::Dummy).unwrap()
    }

    #[tokio::test]
    async fn validator_passes_every_category_offline() {
        let rag = dummy_rag(BedrockConfig::default());
        let report = validate_integration(&rag).await;
        for (category, results) in &report.categories {
            assert!(!results.is_empty(), "{category} ran no tests");
            for t in results {
                assert!(t.passed, "{category}/{}: {}", t.name, t.details);
            }
        }
        assert_eq!(report.categories.len(), CATEGORIES.len());
        assert_eq!(report.success_rate(), 100.0);

        let md = report.render();
        assert!(md.starts_with("# RAG Anything with AWS Bedrock - Validation Report"));
        assert!(md.contains("ALL TESTS PASSED"));
        assert!(md.contains("### ✅ Llm Provider (3/3)"));
        assert!(md.contains("## All Tests Passed!"));
        assert!(!md.contains("## Recommendations"));
    }

    #[tokio::test]
    async fn invalid_model_ids_fail_format_check() {
        let cfg = BedrockConfig { claude_model_id: "meta.llama3-70b".into(), ..BedrockConfig::default() };
        let report = validate_integration(&dummy_rag(cfg)).await;
        let config = report.results("configuration");
        assert!(config.iter().any(|t| t.name == "Model ID format" && !t.passed));
        assert_eq!(report.failed(), 1);

        let md = report.render();
        assert!(md.contains("SOME TESTS FAILED"));
        assert!(md.contains("### ❌ Configuration (1/2)"));
        assert!(md.contains("## Recommendations"));
    }

    #[test]
    fn report_counts_and_titles() {
        let mut r = ValidationReport::default();
        assert_eq!(r.success_rate(), 0.0);
        r.record("performance", "Response time", true, "0.1s");
        r.record("performance", "Concurrent requests", false, "timeout");
        r.record("error_handling", "Empty prompt handled", true, "ok");
        assert_eq!((r.total(), r.passed(), r.failed()), (3, 2, 1));
        assert!((r.success_rate() - 66.666).abs() < 0.01);
        assert_eq!(title_case("embedding_provider"), "Embedding Provider");
        assert!(r.render().contains("- ❌ **Concurrent requests**: timeout"));
    }

    #[test]
    fn sample_image_is_valid_png() {
        let bytes = STANDARD.decode(sample_image().unwrap()).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (100, 100));
    }

    #[tokio::test]
    async fn smoke_test_passes_offline() {
        let rag = BedrockRag::new(BedrockConfig::default(), ProviderKind::Dummy).unwrap();
        bedrock_smoke_test(&rag).await.unwrap();
        assert!(rag.metrics().total_requests >= 2);
    }
}
