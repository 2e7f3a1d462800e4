//! Pre-migration compatibility check.
//!
//! Each check appends to one of three lists: issues block migration, warnings
//! are reported, recommendations are advisory. [`CheckReport::render`] turns
//! the result into a Markdown report.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info};
use walkdir::WalkDir;

use super::runner::{Cmd, CommandRunner};
use crate::bedrock::{BedrockRag, CompletionOptions, missing_models};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
pub const MIN_FREE_GB: f64 = 5.0;
pub const RECOMMENDED_FREE_GB: f64 = 10.0;
pub const LARGE_STORAGE_MB: f64 = 1000.0;
const REQUIRED_MODULES: [&str; 2] = ["boto3", "botocore"];
const RECOMMENDED_MODULES: [(&str, &str); 2] =
    [("uvloop", "High-performance event loop"), ("aiofiles", "Async file operations")];
const CONFIG_FILES: [&str; 3] = [".env", "config.json", "settings.yaml"];

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub installation_dir: PathBuf,
    pub generated: String,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl CheckReport {
    pub fn compatible(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = vec![
            "# RAG Anything to AWS Bedrock Compatibility Report".to_string(),
            format!("Generated: {}", self.generated),
            format!("Installation Directory: {}", self.installation_dir.display()),
            String::new(),
        ];
        if self.compatible() {
            out.push("## Compatibility Status: COMPATIBLE".into());
            out.push("Your system is ready for migration to AWS Bedrock.".into());
        } else {
            out.push("## Compatibility Status: ISSUES FOUND".into());
            out.push(format!(
                "Found {} critical issues that must be resolved before migration.",
                self.issues.len()
            ));
        }
        out.push(String::new());

        section(&mut out, "Critical Issues", "These issues must be resolved before migration:", &self.issues);
        section(
            &mut out,
            "Warnings",
            "These issues should be addressed but won't prevent migration:",
            &self.warnings,
        );
        section(
            &mut out,
            "Recommendations",
            "Consider these improvements for better performance:",
            &self.recommendations,
        );

        out.push("## Next Steps".into());
        if self.compatible() {
            out.push("1. Resolve any warnings if desired".into());
            out.push("2. Run the migration: `rag-bedrock migrate --source /path/to/current --target /opt/raganything`".into());
            out.push("3. Test the migrated installation".into());
        } else {
            out.push("1. Resolve all critical issues listed above".into());
            out.push("2. Run this compatibility check again".into());
            out.push("3. Proceed with migration once all issues are resolved".into());
        }
        out.join("\n")
    }
}

fn section(out: &mut Vec<String>, title: &str, lead: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push(format!("## {title}"));
    out.push(lead.to_string());
    out.push(String::new());
    for (i, item) in items.iter().enumerate() {
        out.push(format!("{}. {item}", i + 1));
    }
    out.push(String::new());
}

/// Bedrock endpoints checked for reachability in `region`.
pub fn aws_endpoints(region: &str) -> Vec<String> {
    vec![
        format!("https://bedrock.{region}.amazonaws.com"),
        format!("https://bedrock-runtime.{region}.amazonaws.com"),
        "https://sts.amazonaws.com".to_string(),
    ]
}

/// `Python 3.11.6` → `(3, 11)`.
pub fn parse_python_version(output: &str) -> Option<(u32, u32)> {
    let version = output.split_whitespace().find(|w| w.chars().next().is_some_and(|c| c.is_ascii_digit()))?;
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Total size of regular files under `dir`. Symlinks are not followed and
/// unreadable entries count as zero.
pub fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

pub struct CompatibilityChecker {
    installation_dir: PathBuf,
    python: String,
    report: CheckReport,
}

impl CompatibilityChecker {
    pub fn new(installation_dir: impl Into<PathBuf>, python: impl Into<String>) -> Self {
        let installation_dir = installation_dir.into();
        Self {
            report: CheckReport { installation_dir: installation_dir.clone(), ..CheckReport::default() },
            installation_dir,
            python: python.into(),
        }
    }

    pub fn report(&self) -> &CheckReport {
        &self.report
    }

    pub fn into_report(mut self) -> CheckReport {
        self.report.generated = chrono::Local::now().format("%Y-%m-%d %H:%M:%S %Z").to_string();
        self.report
    }

    // ── Checks ───────────────────────────────────────────────────────────────

    /// Python 3.10+ and the AWS SDK modules.
    pub fn check_system_requirements(&mut self, runner: &dyn CommandRunner) -> bool {
        let mut ok = true;
        match runner.run(&Cmd::new(self.python.as_str(), &["--version"])) {
            Ok(out) if out.success() => {
                // Python < 3.4 prints the version on stderr.
                let text = if out.stdout.trim().is_empty() { &out.stderr } else { &out.stdout };
                match parse_python_version(text) {
                    Some((major, minor)) if (major, minor) < (3, 10) => {
                        self.report
                            .issues
                            .push(format!("Python {major}.{minor} is not supported. Requires Python 3.10+"));
                        ok = false;
                    }
                    Some((major, minor)) => info!(major, minor, "python version supported"),
                    None => self.report.warnings.push(format!("Could not parse Python version from `{}`", text.trim())),
                }
            }
            _ => {
                self.report.issues.push(format!("Python interpreter `{}` not found", self.python));
                ok = false;
            }
        }

        for module in REQUIRED_MODULES {
            if !self.importable(runner, module) {
                self.report.issues.push(format!("Required package '{module}' is not installed"));
                ok = false;
            }
        }
        for (module, why) in RECOMMENDED_MODULES {
            if !self.importable(runner, module) {
                self.report.recommendations.push(format!("Install '{module}' for better performance ({why})"));
            }
        }
        ok
    }

    fn importable(&self, runner: &dyn CommandRunner, module: &str) -> bool {
        runner.succeeds(&Cmd::new(self.python.as_str(), &["-c"]).arg(format!("import {module}")))
    }

    /// AWS CLI presence and a resolvable caller identity.
    pub async fn check_aws_environment(&mut self, runner: &dyn CommandRunner, rag: &BedrockRag) -> bool {
        if !runner.succeeds(&Cmd::new("which", &["aws"])) {
            self.report
                .warnings
                .push("AWS CLI is not installed - consider installing for easier management".into());
        }
        let identity = rag.invoker().caller_identity().await;
        match identity.account {
            Some(account) => {
                info!(account = %account, "AWS connectivity verified");
                true
            }
            None => {
                self.report
                    .issues
                    .push("AWS credentials not found. Configure IAM role or AWS credentials.".into());
                false
            }
        }
    }

    /// Required models listed, and a 10-token Haiku invocation.
    pub async fn check_bedrock_access(&mut self, rag: &BedrockRag) -> bool {
        let cfg = rag.config();
        let required = [
            cfg.claude_model_id.as_str(),
            cfg.claude_haiku_model_id.as_str(),
            cfg.titan_embedding_model_id.as_str(),
        ];
        let available = match rag.invoker().list_models().await {
            Ok(m) => m,
            Err(e) => {
                self.report.issues.push(format!("Cannot list Bedrock models: {e}"));
                return false;
            }
        };
        let missing = missing_models(&available, &required);
        let mut ok = missing.is_empty();
        for id in missing {
            self.report.issues.push(format!("Required model not available: {id}"));
        }

        match rag.llm().complete_fast("Hello", None, &[], &CompletionOptions::max_tokens(10)).await {
            Ok(_) => info!("Bedrock model invocation test successful"),
            Err(e) => match e.code() {
                Some("AccessDeniedException") => {
                    self.report.issues.push("Access denied to Bedrock models. Check IAM permissions.".into());
                    ok = false;
                }
                Some("ValidationException") => info!("Bedrock access confirmed (validation error expected)"),
                _ => self.report.warnings.push(format!("Bedrock model test failed: {e}")),
            },
        }
        ok
    }

    /// Existing config files, vector storage size and leftover local models.
    pub fn check_existing_installation(&mut self) -> bool {
        let dir = &self.installation_dir;
        if !dir.is_dir() {
            self.report
                .issues
                .push(format!("Installation directory does not exist: {}", dir.display()));
            return false;
        }
        match CONFIG_FILES.iter().find(|f| dir.join(f).exists()) {
            Some(f) => info!(file = f, "found configuration file"),
            None => self
                .report
                .warnings
                .push("No configuration files found - migration will use defaults".into()),
        }

        let storage = dir.join("rag_storage");
        if storage.is_dir() {
            let size_mb = dir_size(&storage) as f64 / MIB;
            info!(size_mb, "vector database found");
            if size_mb > LARGE_STORAGE_MB {
                self.report
                    .warnings
                    .push(format!("Large vector database ({size_mb:.1} MB) - migration may take time"));
            }
        } else {
            self.report.warnings.push("No existing vector database found - starting fresh".into());
        }

        if dir.join("models").exists() {
            self.report
                .recommendations
                .push("Remove local models directory after migration to save space".into());
        }
        true
    }

    pub fn check_disk_space(&mut self) -> bool {
        let free = match fs2::available_space(&self.installation_dir) {
            Ok(b) => b,
            Err(e) => {
                self.report.warnings.push(format!("Could not check disk space: {e}"));
                return true;
            }
        };
        self.classify_free_space(free)
    }

    fn classify_free_space(&mut self, free_bytes: u64) -> bool {
        let free_gb = free_bytes as f64 / GIB;
        if free_gb < MIN_FREE_GB {
            self.report.issues.push(format!(
                "Insufficient disk space: {free_gb:.1} GB available, need at least {MIN_FREE_GB:.0} GB"
            ));
            return false;
        }
        if free_gb < RECOMMENDED_FREE_GB {
            self.report.warnings.push(format!(
                "Low disk space: {free_gb:.1} GB available, recommend at least {RECOMMENDED_FREE_GB:.0} GB"
            ));
        } else {
            info!(free_gb, "sufficient disk space");
        }
        true
    }

    /// Any HTTP response counts as reachable; only transport failures warn.
    pub async fn check_network(&mut self, endpoints: &[String]) -> bool {
        let client = match reqwest::Client::builder().timeout(Duration::from_secs(5)).build() {
            Ok(c) => c,
            Err(e) => {
                self.report.warnings.push(format!("Could not build HTTP client: {e}"));
                return true;
            }
        };
        for url in endpoints {
            match client.head(url).send().await {
                Ok(resp) => info!(endpoint = %url, status = resp.status().as_u16(), "endpoint reachable"),
                Err(_) => self
                    .report
                    .warnings
                    .push(format!("Cannot reach {url} - check network connectivity")),
            }
        }
        true
    }

    /// Every check in order. Returns `false` when any check recorded an issue.
    pub async fn run_all(&mut self, runner: &dyn CommandRunner, rag: &BedrockRag, endpoints: &[String]) -> bool {
        let mut results = Vec::new();
        results.push(("System Requirements", self.check_system_requirements(runner)));
        results.push(("AWS Environment", self.check_aws_environment(runner, rag).await));
        results.push(("Bedrock Access", self.check_bedrock_access(rag).await));
        results.push(("Existing Installation", self.check_existing_installation()));
        results.push(("Disk Space", self.check_disk_space()));
        results.push(("Network Connectivity", self.check_network(endpoints).await));

        let mut all = true;
        for (name, ok) in results {
            if ok {
                info!(check = name, "check passed");
            } else {
                error!(check = name, "check failed");
                all = false;
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use crate::config::{BedrockConfig, ProviderKind};
    use crate::setup::runner::testing::ScriptedRunner;

    fn rag() -> BedrockRag {
        BedrockRag::new(BedrockConfig::default(), ProviderKind::Dummy).unwrap()
    }

    #[test]
    fn python_version_parsing() {
        assert_eq!(parse_python_version("Python 3.11.6\n"), Some((3, 11)));
        assert_eq!(parse_python_version("Python 3.9"), Some((3, 9)));
        assert_eq!(parse_python_version("nope"), None);
    }

    #[test]
    fn old_python_and_missing_sdk_are_issues() {
        let r = ScriptedRunner::new()
            .stdout("python3 --version", "Python 3.9.16")
            .on("python3 -c import botocore", &[1])
            .on("python3 -c import uvloop", &[1]);
        let mut c = CompatibilityChecker::new("/tmp", "python3");
        assert!(!c.check_system_requirements(&r));
        let rep = c.report();
        assert_eq!(rep.issues.len(), 2);
        assert!(rep.issues[0].contains("Python 3.9"));
        assert!(rep.issues[1].contains("botocore"));
        assert_eq!(rep.recommendations.len(), 1);
    }

    #[test]
    fn disk_thresholds() {
        let mut c = CompatibilityChecker::new("/tmp", "python3");
        assert!(!c.classify_free_space(4 * 1024 * 1024 * 1024));
        assert!(c.classify_free_space(8 * 1024 * 1024 * 1024));
        assert!(c.classify_free_space(20 * 1024 * 1024 * 1024));
        assert_eq!(c.report().issues.len(), 1);
        assert_eq!(c.report().warnings.len(), 1);
    }

    #[test]
    fn installation_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = CompatibilityChecker::new(dir.path(), "python3");
        assert!(c.check_existing_installation());
        assert_eq!(c.report().warnings.len(), 2);

        fs::write(dir.path().join(".env"), "A=1").unwrap();
        fs::create_dir_all(dir.path().join("rag_storage/sub")).unwrap();
        fs::write(dir.path().join("rag_storage/sub/vdb.json"), vec![0u8; 2048]).unwrap();
        fs::create_dir(dir.path().join("models")).unwrap();
        assert_eq!(dir_size(&dir.path().join("rag_storage")), 2048);

        let mut c = CompatibilityChecker::new(dir.path(), "python3");
        assert!(c.check_existing_installation());
        assert!(c.report().warnings.is_empty());
        assert_eq!(c.report().recommendations.len(), 1);

        let mut c = CompatibilityChecker::new(dir.path().join("missing"), "python3");
        assert!(!c.check_existing_installation());
    }

    #[test]
    fn dir_size_walks_nested_trees() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("rag_storage");
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("top.json"), vec![0u8; 100]).unwrap();
        fs::write(root.join("a/b/c/deep.bin"), vec![0u8; 4096]).unwrap();
        fs::write(root.join("a/mid.txt"), vec![0u8; 10]).unwrap();
        assert_eq!(dir_size(&root), 4206);
        assert_eq!(dir_size(&root.join("a/b")), 4096);
        assert_eq!(dir_size(&dir.path().join("absent")), 0);
    }

    #[cfg(unix)]
    #[test]
    fn dir_size_ignores_symlink_loops() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("f"), vec![0u8; 7]).unwrap();
        std::os::unix::fs::symlink(&root, root.join("loop")).unwrap();
        assert_eq!(dir_size(&root), 7);
    }

    #[tokio::test]
    async fn offline_run_is_compatible() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".env"), "A=1").unwrap();
        fs::create_dir(dir.path().join("rag_storage")).unwrap();
        let r = ScriptedRunner::new().stdout("python3 --version", "Python 3.11.6");
        let mut c = CompatibilityChecker::new(dir.path(), "python3");
        let ok = c.run_all(&r, &rag(), &[]).await;
        let report = c.into_report();
        assert_eq!(ok, report.compatible(), "{:?}", report.issues);
        let text = report.render();
        assert!(text.starts_with("# RAG Anything to AWS Bedrock Compatibility Report"));
        assert!(text.contains("## Next Steps"));
    }

    #[test]
    fn render_numbers_issues() {
        let report = CheckReport {
            installation_dir: PathBuf::from("/opt/rag"),
            generated: "now".into(),
            issues: vec!["a".into(), "b".into()],
            ..CheckReport::default()
        };
        let text = report.render();
        assert!(text.contains("ISSUES FOUND"));
        assert!(text.contains("Found 2 critical issues"));
        assert!(text.contains("1. a\n2. b"));
        assert!(!text.contains("## Warnings"));
    }
}
