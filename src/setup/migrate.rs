//! Configuration migration from an OpenAI/Ollama-style install to Bedrock.
//!
//! Reads the source `.env`, selected process environment keys and
//! `config.json`, maps what has a Bedrock counterpart, fills Bedrock defaults
//! and carries RAG engine settings over. Data directories are copied into the
//! target layout and the result is validated. Nothing is deleted: an existing
//! backup or target data directory is moved aside or kept.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::SetupError;
use super::envfile::{EnvFile, WriteOutcome, write_env_file};
use crate::config::{DEFAULT_CLAUDE_MODEL_ID, DEFAULT_HAIKU_MODEL_ID, DEFAULT_TITAN_EMBEDDING_MODEL_ID};

/// Old key to Bedrock key.
pub const KEY_MAPPINGS: &[(&str, &str)] = &[
    ("LLM_MODEL", "BEDROCK_CLAUDE_MODEL_ID"),
    ("EMBEDDING_MODEL", "BEDROCK_TITAN_EMBEDDING_MODEL_ID"),
];

/// Provider keys with no Bedrock meaning.
pub const REMOVED_KEYS: &[&str] = &[
    "LLM_BINDING_API_KEY",
    "LLM_BINDING_HOST",
    "EMBEDDING_BINDING_API_KEY",
    "EMBEDDING_BINDING_HOST",
];

pub const BEDROCK_DEFAULTS: &[(&str, &str)] = &[
    ("AWS_REGION", "us-east-1"),
    ("BEDROCK_CLAUDE_MODEL_ID", DEFAULT_CLAUDE_MODEL_ID),
    ("BEDROCK_CLAUDE_HAIKU_MODEL_ID", DEFAULT_HAIKU_MODEL_ID),
    ("BEDROCK_TITAN_EMBEDDING_MODEL_ID", DEFAULT_TITAN_EMBEDDING_MODEL_ID),
    ("BEDROCK_MAX_TOKENS", "4096"),
    ("BEDROCK_TEMPERATURE", "0.7"),
    ("BEDROCK_RETRY_MAX_ATTEMPTS", "3"),
    ("BEDROCK_RETRY_BACKOFF_FACTOR", "2.0"),
];

pub const PRESERVED_KEYS: &[&str] = &[
    "WORKING_DIR",
    "OUTPUT_DIR",
    "PARSER",
    "PARSE_METHOD",
    "ENABLE_IMAGE_PROCESSING",
    "ENABLE_TABLE_PROCESSING",
    "ENABLE_EQUATION_PROCESSING",
    "MAX_CONCURRENT_FILES",
    "CONTEXT_WINDOW",
    "MAX_CONTEXT_TOKENS",
    "LOG_LEVEL",
    "LOG_DIR",
];

pub const REQUIRED_KEYS: &[&str] = &["AWS_REGION", "BEDROCK_CLAUDE_MODEL_ID", "BEDROCK_TITAN_EMBEDDING_MODEL_ID"];

/// Process environment keys picked up as migration input.
const ENV_PREFIXES: &[&str] = &["LLM_", "EMBEDDING_", "WORKING_DIR", "OUTPUT_DIR"];

/// Files copied into the backup directory when present.
const CONFIG_FILES: &[&str] = &[".env", "config.json", "settings.yaml", "raganything.conf"];

/// Directories copied into the backup directory when present.
const BACKUP_DIRS: &[&str] = &["rag_storage", "logs"];

/// Source directory to its place under the target.
pub const DATA_DIRS: &[(&str, &str)] = &[
    ("rag_storage", "data/rag_storage"),
    ("output", "data/output"),
    ("cache", "cache"),
];

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub source: PathBuf,
    pub target: PathBuf,
    /// `None` skips the backup.
    pub backup_dir: Option<PathBuf>,
    /// Overwrite an existing target `.env` and replace existing target data
    /// directories (the old ones are moved aside).
    pub force: bool,
    /// Report what would happen without touching the filesystem.
    pub dry_run: bool,
}

impl MigrationOptions {
    /// Backup under `<source>/backup`.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        let source = source.into();
        Self {
            backup_dir: Some(source.join("backup")),
            source,
            target: target.into(),
            force: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub source: PathBuf,
    pub target: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub backed_up: Vec<String>,
    pub mapped: Vec<(String, String)>,
    pub removed: Vec<String>,
    pub defaulted: Vec<String>,
    pub preserved: Vec<String>,
    /// Previous backup moved out of the way.
    pub previous_backup: Option<PathBuf>,
    pub data: Vec<DataMove>,
    pub env_path: PathBuf,
    pub outcome: Option<WriteOutcome>,
    pub result: EnvFile,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataOutcome {
    /// Number of files copied.
    Copied(u64),
    /// Target existed and `force` was not set.
    KeptExisting,
    /// Dry run.
    Planned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMove {
    pub from: PathBuf,
    pub to: PathBuf,
    pub outcome: DataOutcome,
    /// Existing target moved aside before the copy.
    pub replaced: Option<PathBuf>,
}

/// Source `.env`, then matching process env keys, then `config.json`; later
/// sources win.
pub fn read_existing(source: &Path, process_env: &BTreeMap<String, String>) -> Result<EnvFile, SetupError> {
    let mut merged = EnvFile::new();

    let env_path = source.join(".env");
    if env_path.exists() {
        let file = EnvFile::load(&env_path)?;
        for k in file.keys() {
            merged.set(k, file.get(k).unwrap_or_default());
        }
    }

    for (k, v) in process_env {
        if ENV_PREFIXES.iter().any(|p| k.starts_with(p)) {
            merged.set(k, v.as_str());
        }
    }

    let json_path = source.join("config.json");
    if json_path.exists() {
        let text = fs::read_to_string(&json_path).map_err(|e| SetupError::io("read config.json", e))?;
        let json: Value = serde_json::from_str(&text).map_err(|e| SetupError::EnvFile {
            path: json_path.clone(),
            message: format!("invalid JSON: {e}"),
        })?;
        if let Value::Object(map) = json {
            for (k, v) in map {
                let v = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                merged.set(&k, v);
            }
        }
    }
    Ok(merged)
}

/// Map `existing` into a Bedrock `.env`, recording every decision in `report`.
pub fn build_bedrock_env(existing: &EnvFile, target: &Path, report: &mut MigrationReport) -> EnvFile {
    let mut out = EnvFile::new();

    for (old, new) in KEY_MAPPINGS {
        if let Some(v) = existing.get(old) {
            out.set(new, v);
            report.mapped.push((old.to_string(), new.to_string()));
        }
    }
    for key in REMOVED_KEYS {
        if existing.contains(key) {
            report.removed.push(key.to_string());
        }
    }
    for (k, v) in BEDROCK_DEFAULTS {
        if out.set_if_absent(k, *v) {
            report.defaulted.push(k.to_string());
        }
    }
    for key in PRESERVED_KEYS {
        if let Some(v) = existing.get(key) {
            out.set(key, v);
            report.preserved.push(key.to_string());
            continue;
        }
        let fallback = match *key {
            "WORKING_DIR" => target.join("data").join("rag_storage"),
            "OUTPUT_DIR" => target.join("data").join("output"),
            "LOG_DIR" => target.join("logs"),
            _ => continue,
        };
        out.set(key, fallback.display().to_string());
        report.defaulted.push(key.to_string());
    }
    out
}

/// Required keys missing from `env`.
pub fn missing_required(env: &EnvFile) -> Vec<&'static str> {
    REQUIRED_KEYS.iter().copied().filter(|k| !env.contains(k)).collect()
}

/// `<path>.<timestamp>`, with a counter appended if that exists too.
fn aside_path(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let base = format!("{}.{stamp}", path.display());
    let mut candidate = PathBuf::from(&base);
    let mut n = 1;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{base}.{n}"));
        n += 1;
    }
    candidate
}

fn move_aside(path: &Path) -> Result<PathBuf, SetupError> {
    let aside = aside_path(path);
    fs::rename(path, &aside)
        .map_err(|e| SetupError::io(format!("move {} aside", path.display()), e))?;
    warn!(from = %path.display(), to = %aside.display(), "moved existing directory aside");
    Ok(aside)
}

/// Copy the tree under `from` into `to`; returns the number of files copied.
/// Symlinks are skipped.
pub fn copy_tree(from: &Path, to: &Path) -> Result<u64, SetupError> {
    let mut files = 0;
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| SetupError::io(format!("walk {}", from.display()), e.into()))?;
        let Ok(rel) = entry.path().strip_prefix(from) else { continue };
        let dest = to.join(rel);
        let kind = entry.file_type();
        if kind.is_dir() {
            fs::create_dir_all(&dest).map_err(|e| SetupError::io(format!("create {}", dest.display()), e))?;
        } else if kind.is_file() {
            fs::copy(entry.path(), &dest)
                .map_err(|e| SetupError::io(format!("copy {}", entry.path().display()), e))?;
            files += 1;
        } else {
            debug!(path = %entry.path().display(), "skipping symlink");
        }
    }
    Ok(files)
}

/// Copy config files, `rag_storage` and `logs` into `dir`. An existing
/// backup directory is moved aside first; its path is returned.
pub fn backup(source: &Path, dir: &Path) -> Result<(Vec<String>, Option<PathBuf>), SetupError> {
    let previous = if dir.exists() { Some(move_aside(dir)?) } else { None };
    fs::create_dir_all(dir).map_err(|e| SetupError::io(format!("create backup {}", dir.display()), e))?;
    let mut copied = Vec::new();
    for name in CONFIG_FILES {
        let from = source.join(name);
        if from.is_file() {
            fs::copy(&from, dir.join(name)).map_err(|e| SetupError::io(format!("back up {name}"), e))?;
            info!(file = name, "backed up");
            copied.push(name.to_string());
        }
    }
    for name in BACKUP_DIRS {
        let from = source.join(name);
        if from.is_dir() {
            let files = copy_tree(&from, &dir.join(name))?;
            info!(dir = name, files, "backed up");
            copied.push(format!("{name}/"));
        }
    }
    Ok((copied, previous))
}

/// Copy `rag_storage`, `output` and `cache` into the target layout. A
/// non-empty target directory is kept unless `force`, in which case it is
/// moved aside first.
pub fn migrate_data(source: &Path, target: &Path, force: bool, dry_run: bool) -> Result<Vec<DataMove>, SetupError> {
    let mut moves = Vec::new();
    for (from_name, to_name) in DATA_DIRS {
        let from = source.join(from_name);
        if !from.is_dir() {
            debug!(dir = %from.display(), "no data to migrate");
            continue;
        }
        let to = target.join(to_name);
        let occupied = fs::read_dir(&to).map(|mut d| d.next().is_some()).unwrap_or(false);
        let mut replaced = None;
        let outcome = if dry_run {
            DataOutcome::Planned
        } else if occupied && !force {
            warn!(target = %to.display(), "target data directory exists; pass --force to replace it");
            DataOutcome::KeptExisting
        } else {
            if occupied {
                replaced = Some(move_aside(&to)?);
            }
            let files = copy_tree(&from, &to)?;
            info!(from = %from.display(), to = %to.display(), files, "migrated data");
            DataOutcome::Copied(files)
        };
        moves.push(DataMove { from, to, outcome, replaced });
    }
    Ok(moves)
}

/// Check the migrated target: `.env` present with every required key.
/// Returns warnings; a missing `data/rag_storage` is only a warning.
pub fn validate_migration(target: &Path) -> Result<Vec<String>, SetupError> {
    let env_path = target.join(".env");
    if !env_path.is_file() {
        return Err(SetupError::Verification(format!("configuration file not found: {}", env_path.display())));
    }
    let env = EnvFile::load(&env_path)?;
    let missing = missing_required(&env);
    if !missing.is_empty() {
        return Err(SetupError::Verification(format!("required configuration keys missing: {missing:?}")));
    }
    let mut warnings = Vec::new();
    let storage = target.join("data").join("rag_storage");
    if !storage.is_dir() {
        warn!(path = %storage.display(), "RAG storage directory not found");
        warnings.push(format!("RAG storage directory not found: {}", storage.display()));
    }
    info!(target = %target.display(), "migration validated");
    Ok(warnings)
}

/// Run the migration and write `migration_report.md` into the target.
pub fn migrate(opts: &MigrationOptions, process_env: &BTreeMap<String, String>) -> Result<MigrationReport, SetupError> {
    if !opts.source.is_dir() {
        return Err(SetupError::io(
            format!("source directory {}", opts.source.display()),
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        ));
    }

    let mut report = MigrationReport {
        source: opts.source.clone(),
        target: opts.target.clone(),
        backup_dir: opts.backup_dir.clone(),
        env_path: opts.target.join(".env"),
        ..MigrationReport::default()
    };

    let existing = read_existing(&opts.source, process_env)?;
    let env = build_bedrock_env(&existing, &opts.target, &mut report);

    let missing = missing_required(&env);
    if !missing.is_empty() {
        return Err(SetupError::Verification(format!("required configuration keys missing: {missing:?}")));
    }

    if opts.dry_run {
        report.data = migrate_data(&opts.source, &opts.target, opts.force, true)?;
        report.result = env;
        info!(source = %opts.source.display(), "dry run; nothing written");
        return Ok(report);
    }

    if let Some(dir) = &opts.backup_dir {
        let (copied, previous) = backup(&opts.source, dir)?;
        report.backed_up = copied;
        report.previous_backup = previous;
    }

    fs::create_dir_all(&opts.target)
        .map_err(|e| SetupError::io(format!("create {}", opts.target.display()), e))?;
    report.data = migrate_data(&opts.source, &opts.target, opts.force, false)?;

    let outcome = write_env_file(
        &report.env_path,
        &env,
        "RAG Anything with AWS Bedrock configuration\nMigrated from existing installation",
        opts.force,
    )?;
    if outcome == WriteOutcome::Kept {
        warn!(path = %report.env_path.display(), "target .env exists; pass --force to overwrite");
    }
    report.outcome = Some(outcome);
    report.result = env;
    report.warnings = validate_migration(&opts.target)?;

    let report_path = opts.target.join("migration_report.md");
    fs::write(&report_path, render_report(&report, &chrono::Local::now().to_rfc3339()))
        .map_err(|e| SetupError::io(format!("write {}", report_path.display()), e))?;
    info!(report = %report_path.display(), "migration report written");
    Ok(report)
}

pub fn render_report(r: &MigrationReport, date: &str) -> String {
    let mut out = vec![
        "# RAG Anything to AWS Bedrock Migration Report".to_string(),
        format!("Migration Date: {date}"),
        format!("Source Directory: {}", r.source.display()),
        format!("Target Directory: {}", r.target.display()),
    ];
    if let Some(b) = &r.backup_dir {
        out.push(format!("Backup Directory: {}", b.display()));
    }
    if let Some(p) = &r.previous_backup {
        out.push(format!("Previous Backup Moved To: {}", p.display()));
    }
    out.push(String::new());
    out.push("## Configuration Changes".into());
    out.push(String::new());
    out.push("### Mapped:".into());
    out.extend(r.mapped.iter().map(|(a, b)| format!("- {a} -> {b}")));
    out.push(String::new());
    out.push("### Removed (OpenAI/Ollama specific):".into());
    out.extend(r.removed.iter().map(|k| format!("- {k}")));
    out.push(String::new());
    out.push("### Added (AWS Bedrock specific):".into());
    out.extend(r.defaulted.iter().map(|k| format!("- {k}={}", r.result.get(k).unwrap_or_default())));
    out.push(String::new());
    out.push("### Preserved:".into());
    out.extend(r.preserved.iter().map(|k| format!("- {k}")));
    out.push(String::new());
    out.push("## Data Migrated".into());
    for m in &r.data {
        let what = match &m.outcome {
            DataOutcome::Copied(n) => format!("copied {n} files"),
            DataOutcome::KeptExisting => "target exists, kept".to_string(),
            DataOutcome::Planned => "planned".to_string(),
        };
        out.push(format!("- {} -> {} ({what})", m.from.display(), m.to.display()));
        if let Some(old) = &m.replaced {
            out.push(format!("  - previous contents moved to {}", old.display()));
        }
    }
    if !r.warnings.is_empty() {
        out.push(String::new());
        out.push("## Warnings".into());
        out.extend(r.warnings.iter().map(|w| format!("- {w}")));
    }
    out.push(String::new());
    out.push("## Next Steps".into());
    out.push(format!("1. Review the migrated configuration in: {}", r.env_path.display()));
    out.push("2. Ensure AWS credentials are configured (IAM role or AWS CLI)".into());
    out.push("3. Test the Bedrock integration: rag-bedrock verify".into());
    out.push("4. Start the service: systemctl start raganything".into());
    if let Some(b) = &r.backup_dir {
        out.push(String::new());
        out.push("## Rollback Instructions".into());
        out.push("1. Stop the service: systemctl stop raganything".into());
        out.push(format!("2. Restore from backup: cp -r {}/. {}/", b.display(), r.source.display()));
        out.push("3. Restart with the old configuration".into());
    }
    out.push(String::new());
    out.join("\n")
}
