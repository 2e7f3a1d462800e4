//! `rag-bedrock`: installer and operator CLI for RAG Anything on AWS Bedrock.
//!
//! Startup sequence:
//!   1. Load .env from the working directory (if present)
//!   2. Parse flags and load config
//!   3. Load the project's .env (if present)
//!   4. Init logger once (CLI `-v` flags > env > config)
//!   5. Dispatch the command

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::info;

use rag_bedrock::bedrock::{BedrockRag, CompletionOptions};
use rag_bedrock::config::{self, BedrockConfig, Config, RagSettings};
use rag_bedrock::error::AppError;
use rag_bedrock::setup::SetupError;
use rag_bedrock::setup::checker::{CompatibilityChecker, aws_endpoints};
use rag_bedrock::setup::migrate::{MigrationOptions, migrate};
use rag_bedrock::setup::packages::venv_python;
use rag_bedrock::setup::pipeline::{InstallOptions, Installer, Stage};
use rag_bedrock::setup::runner::SystemRunner;
use rag_bedrock::setup::migrate::DataOutcome;
use rag_bedrock::setup::verify::{bedrock_smoke_test, validate_integration, verify_imports};
use rag_bedrock::{logger, ui};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        ui::error(format!("error: {e}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();

    let Some(args) = parse_cli_args(std::env::args().skip(1))? else {
        print_help();
        return Ok(());
    };

    let cfg = config::load(args.config_path.as_deref())?;
    let _ = dotenvy::from_path(cfg.env_path());

    let effective_log_level = logger::level_for_verbosity(args.verbosity).unwrap_or(cfg.log_level.as_str());
    logger::init(effective_log_level, args.verbosity > 0, cfg.log_file.as_deref())?;

    info!(
        project = %cfg.project_name,
        project_dir = %cfg.project_dir.display(),
        provider = cfg.provider.as_str(),
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    match args.command {
        Command::Install { force_env, skip_smoke_test, skip_service_install } => {
            let opts = InstallOptions { force_env, skip_smoke_test, skip_service_install };
            let summary = installer(&cfg, opts, &Stage::ALL).await?;
            ui::ok(format!("RAG Anything installed in {}", cfg.project_dir.display()));
            if let Some(files) = summary.service {
                ui::info(format!("start the service with: sudo systemctl start {}", cfg.service.name));
                ui::info(format!("dashboard body: {}", files.dashboard.display()));
            }
        }
        Command::Env { force } => {
            let opts = InstallOptions { force_env: force, ..InstallOptions::default() };
            installer(&cfg, opts, &[Stage::EnvFile]).await?;
        }
        Command::Scaffold => {
            installer(&cfg, InstallOptions::default(), &[Stage::Scaffold]).await?;
        }
        Command::Service { skip_install } => {
            let opts = InstallOptions { skip_service_install: skip_install, ..InstallOptions::default() };
            installer(&cfg, opts, &[Stage::Service]).await?;
        }
        Command::Verify => {
            let runner = SystemRunner::detect();
            let imports = verify_imports(&runner, &cfg.venv_path(), &cfg.install.import_checks)?;
            ui::ok(format!("imports: {}", imports.passed.join(", ")));
            let rag = facade(&cfg)?;
            bedrock_smoke_test(&rag).await?;
            ui::ok("Bedrock access verified");
        }
        Command::Validate { output } => {
            let rag = facade(&cfg)?;
            let spinner = ui::Spinner::start("validating the Bedrock integration");
            let report = validate_integration(&rag).await;
            drop(spinner);
            let text = report.render();
            match output {
                Some(path) => {
                    std::fs::write(&path, &text)?;
                    ui::info(format!("validation report saved to {}", path.display()));
                }
                None => println!("{text}"),
            }
            if !report.all_passed() {
                return Err(SetupError::Verification(format!(
                    "{} of {} validation tests failed",
                    report.failed(),
                    report.total()
                ))
                .into());
            }
            ui::ok(format!("all {} validation tests passed", report.total()));
        }
        Command::Check { installation_dir, output } => {
            let dir = installation_dir.unwrap_or_else(|| cfg.project_dir.clone());
            let venv_py = venv_python(&cfg.venv_path());
            let python = if venv_py.exists() { venv_py.display().to_string() } else { cfg.install.python.clone() };
            let rag = facade(&cfg)?;
            let runner = SystemRunner::detect();

            let mut checker = CompatibilityChecker::new(dir, python);
            let spinner = ui::Spinner::start("running compatibility checks");
            let ok = checker.run_all(&runner, &rag, &aws_endpoints(&rag.config().aws_region)).await;
            drop(spinner);
            let report = checker.into_report();
            let text = report.render();
            match output {
                Some(path) => {
                    std::fs::write(&path, &text)?;
                    ui::info(format!("compatibility report saved to {}", path.display()));
                }
                None => println!("{text}"),
            }
            if !ok {
                return Err(SetupError::Verification(format!(
                    "compatibility check found {} critical issues",
                    report.issues.len()
                ))
                .into());
            }
            ui::ok("compatibility check passed; ready for migration");
        }
        Command::Migrate { source, target, backup, force, dry_run } => {
            let target = target.unwrap_or_else(|| cfg.project_dir.clone());
            let defaults = MigrationOptions::new(source, target);
            let backup_dir = match backup {
                BackupChoice::Default => defaults.backup_dir.clone(),
                BackupChoice::At(dir) => Some(dir),
                BackupChoice::Skip => None,
            };
            let opts = MigrationOptions { backup_dir, force, dry_run, ..defaults };
            let process_env: BTreeMap<String, String> = std::env::vars().collect();
            let report = migrate(&opts, &process_env)?;
            for (from, to) in &report.mapped {
                ui::info(format!("{from} -> {to}"));
            }
            if !report.removed.is_empty() {
                ui::warn(format!("dropped: {}", report.removed.join(", ")));
            }
            for m in &report.data {
                match &m.outcome {
                    DataOutcome::Copied(n) => ui::info(format!("{} -> {} ({n} files)", m.from.display(), m.to.display())),
                    DataOutcome::KeptExisting => {
                        ui::warn(format!("{} exists; kept (pass --force to replace)", m.to.display()))
                    }
                    DataOutcome::Planned => ui::info(format!("would copy {} -> {}", m.from.display(), m.to.display())),
                }
            }
            if let Some(old) = &report.previous_backup {
                ui::info(format!("previous backup moved to {}", old.display()));
            }
            for w in &report.warnings {
                ui::warn(w);
            }
            if dry_run {
                ui::ok("dry run complete; nothing written");
            } else {
                ui::ok(format!("migrated configuration to {}", report.env_path.display()));
            }
        }
        Command::Complete { prompt, fast, publish } => {
            let rag = facade(&cfg)?;
            let text = rag.llm_func(&prompt, None, &[], fast, &CompletionOptions::default()).await;
            publish_metrics(&rag, publish).await;
            println!("{}", text?);
        }
        Command::Embed { text, publish } => {
            let rag = facade(&cfg)?;
            let v = rag.embedding().embed_one(&text).await;
            publish_metrics(&rag, publish).await;
            let v = v?;
            let head: Vec<f64> = v.iter().take(8).copied().collect();
            println!("{}", serde_json::json!({ "dimension": v.len(), "head": head }));
        }
        Command::CloudWatch { dashboard, alarms, name } => {
            let rag = facade(&cfg)?;
            cloudwatch_setup(&cfg, &rag, dashboard, alarms, name).await?;
        }
        Command::Info => {
            let rag = facade(&cfg)?;
            let info = serde_json::to_string_pretty(&rag.info()).map_err(|e| AppError::Config(e.to_string()))?;
            println!("{info}");
            let models = rag.llm().list_available_models().await;
            ui::info(format!("{} foundation models visible", models.len()));
        }
    }
    Ok(())
}

async fn installer(
    cfg: &Config,
    opts: InstallOptions,
    stages: &[Stage],
) -> Result<rag_bedrock::setup::pipeline::InstallSummary, AppError> {
    let runner = SystemRunner::detect();
    let installer = Installer::new(cfg, &runner, BedrockConfig::from_env()?, RagSettings::from_env(), opts);
    Ok(installer.run_stages(stages).await?)
}

fn facade(cfg: &Config) -> Result<BedrockRag, AppError> {
    Ok(BedrockRag::new(BedrockConfig::from_env()?, cfg.provider)?)
}

#[cfg(feature = "cloudwatch")]
async fn publish_metrics(rag: &BedrockRag, publish: bool) {
    use rag_bedrock::bedrock::MetricsPublisher;
    use rag_bedrock::bedrock::cloudwatch::CloudWatchApi;

    if !publish {
        return;
    }
    let api = CloudWatchApi::new(&rag.config().aws_region).await;
    let sent = MetricsPublisher::new(api).flush(rag.monitor()).await;
    ui::info(format!("published {sent} metric points"));
}

#[cfg(not(feature = "cloudwatch"))]
async fn publish_metrics(_rag: &BedrockRag, publish: bool) {
    if publish {
        ui::warn("built without the cloudwatch feature; metrics not published");
    }
}

#[cfg(feature = "cloudwatch")]
async fn cloudwatch_setup(
    cfg: &Config,
    rag: &BedrockRag,
    dashboard: bool,
    alarms: bool,
    name: Option<String>,
) -> Result<(), AppError> {
    use rag_bedrock::bedrock::MetricsPublisher;
    use rag_bedrock::bedrock::cloudwatch::CloudWatchApi;

    // Neither flag means both.
    let (dashboard, alarms) = if dashboard || alarms { (dashboard, alarms) } else { (true, true) };
    let region = rag.config().aws_region.clone();
    let publisher = MetricsPublisher::new(CloudWatchApi::new(&region).await);
    if dashboard {
        let name = name.unwrap_or_else(|| cfg.service.dashboard_name.clone());
        publisher.create_dashboard(&name, &region, &rag.model_ids()).await?;
        ui::ok(format!("dashboard {name} created in {region}"));
    }
    if alarms {
        let created = publisher.setup_alarms().await;
        ui::ok(format!("alarms created: {}", created.join(", ")));
    }
    Ok(())
}

#[cfg(not(feature = "cloudwatch"))]
async fn cloudwatch_setup(
    _cfg: &Config,
    _rag: &BedrockRag,
    _dashboard: bool,
    _alarms: bool,
    _name: Option<String>,
) -> Result<(), AppError> {
    Err(usage("this build does not include the cloudwatch feature"))
}

// ── CLI arg parsing ────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum BackupChoice {
    Default,
    At(PathBuf),
    Skip,
}

#[derive(Debug, PartialEq)]
enum Command {
    Install { force_env: bool, skip_smoke_test: bool, skip_service_install: bool },
    Env { force: bool },
    Scaffold,
    Service { skip_install: bool },
    Verify,
    Validate { output: Option<PathBuf> },
    Check { installation_dir: Option<PathBuf>, output: Option<PathBuf> },
    Migrate { source: PathBuf, target: Option<PathBuf>, backup: BackupChoice, force: bool, dry_run: bool },
    Complete { prompt: String, fast: bool, publish: bool },
    Embed { text: String, publish: bool },
    CloudWatch { dashboard: bool, alarms: bool, name: Option<String> },
    Info,
}

#[derive(Debug)]
struct CliArgs {
    verbosity: u8,
    config_path: Option<String>,
    command: Command,
}

/// Options that take a value.
const VALUE_OPTIONS: &[&str] = &["--installation-dir", "--output", "--source", "--target", "--backup", "--name"];

/// `(flags, value options)` accepted by `command`; `None` for an unknown command.
fn accepted(command: &str) -> Option<(&'static [&'static str], &'static [&'static str])> {
    Some(match command {
        "install" => (&["--force", "--skip-smoke-test", "--no-service"], &[]),
        "env" => (&["--force"], &[]),
        "scaffold" | "verify" | "info" => (&[], &[]),
        "service" => (&["--no-install"], &[]),
        "validate" => (&[], &["--output"]),
        "check" => (&[], &["--installation-dir", "--output"]),
        "migrate" => (&["--force", "--dry-run", "--no-backup"], &["--source", "--target", "--backup"]),
        "complete" => (&["--fast", "--publish-metrics"], &[]),
        "embed" => (&["--publish-metrics"], &[]),
        "cloudwatch" => (&["--dashboard", "--alarms"], &["--name"]),
        _ => return None,
    })
}

/// `Ok(None)` means help was requested.
fn parse_cli_args(args: impl Iterator<Item = String>) -> Result<Option<CliArgs>, AppError> {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut command: Option<String> = None;
    let mut flags: Vec<String> = Vec::new();
    let mut positional: Vec<String> = Vec::new();
    let mut values: BTreeMap<String, String> = BTreeMap::new();

    let mut iter = args;
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-f" | "--config" => {
                config_path = Some(iter.next().ok_or_else(|| usage("-f/--config requires a path argument"))?);
            }
            a if VALUE_OPTIONS.contains(&a) => {
                let v = iter.next().ok_or_else(|| usage(&format!("{arg} requires a value")))?;
                values.insert(arg, v);
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            a if a.starts_with('-') && a.len() > 1 => flags.push(arg),
            _ if command.is_none() => command = Some(arg),
            _ => positional.push(arg),
        }
    }

    let Some(name) = command else {
        return Ok(None);
    };
    let (known_flags, known_values) = accepted(&name).ok_or_else(|| usage(&format!("unknown command `{name}`")))?;
    if let Some(bad) = flags.iter().find(|f| !known_flags.contains(&f.as_str())) {
        return Err(usage(&format!("unknown option `{bad}` for `{name}`")));
    }
    if let Some(bad) = values.keys().find(|k| !known_values.contains(&k.as_str())) {
        return Err(usage(&format!("unknown option `{bad}` for `{name}`")));
    }
    if !positional.is_empty() && name != "complete" && name != "embed" {
        return Err(usage(&format!("unexpected argument `{}` for `{name}`", positional[0])));
    }

    let has = |f: &str| flags.iter().any(|x| x == f);
    let mut value = |k: &str| values.remove(k);
    let command = match name.as_str() {
        "install" => Command::Install {
            force_env: has("--force"),
            skip_smoke_test: has("--skip-smoke-test"),
            skip_service_install: has("--no-service"),
        },
        "env" => Command::Env { force: has("--force") },
        "scaffold" => Command::Scaffold,
        "service" => Command::Service { skip_install: has("--no-install") },
        "verify" => Command::Verify,
        "validate" => Command::Validate { output: value("--output").map(PathBuf::from) },
        "check" => Command::Check {
            installation_dir: value("--installation-dir").map(PathBuf::from),
            output: value("--output").map(PathBuf::from),
        },
        "migrate" => {
            let backup = match (value("--backup"), has("--no-backup")) {
                (Some(_), true) => return Err(usage("--backup and --no-backup are mutually exclusive")),
                (Some(dir), false) => BackupChoice::At(PathBuf::from(dir)),
                (None, true) => BackupChoice::Skip,
                (None, false) => BackupChoice::Default,
            };
            Command::Migrate {
                source: value("--source").map(PathBuf::from).ok_or_else(|| usage("migrate requires --source"))?,
                target: value("--target").map(PathBuf::from),
                backup,
                force: has("--force"),
                dry_run: has("--dry-run"),
            }
        }
        "complete" => Command::Complete {
            prompt: non_empty(positional.join(" ")).ok_or_else(|| usage("complete requires a prompt"))?,
            fast: has("--fast"),
            publish: has("--publish-metrics"),
        },
        "embed" => Command::Embed {
            text: non_empty(positional.join(" ")).ok_or_else(|| usage("embed requires text"))?,
            publish: has("--publish-metrics"),
        },
        "cloudwatch" => Command::CloudWatch {
            dashboard: has("--dashboard"),
            alarms: has("--alarms"),
            name: value("--name"),
        },
        _ => Command::Info,
    };
    Ok(Some(CliArgs { verbosity, config_path, command }))
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

fn usage(msg: &str) -> AppError {
    AppError::Usage(format!("{msg} (see --help)"))
}

fn print_help() {
    println!("Usage: rag-bedrock [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  install [--force] [--skip-smoke-test] [--no-service]   run every setup stage");
    println!("  env [--force]                                          write the project .env");
    println!("  scaffold                                               create the directory layout");
    println!("  service [--no-install]                                 render and register the systemd unit");
    println!("  verify                                                 import checks and Bedrock smoke test");
    println!("  validate [--output F]                                  full integration validation report");
    println!("  check [--installation-dir D] [--output F]              compatibility report");
    println!("  migrate --source D [--target D] [--backup D | --no-backup] [--force] [--dry-run]");
    println!("                                                         migrate an existing install to Bedrock");
    println!("  complete <prompt> [--fast] [--publish-metrics]         one Claude completion");
    println!("  embed <text> [--publish-metrics]                       one Titan embedding");
    println!("  cloudwatch [--dashboard] [--alarms] [--name N]         create the dashboard and alarms");
    println!("  info                                                   model settings and providers");
    println!();
    println!("Options:");
    println!("  -h, --help                 Print help");
    println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
    println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
}
