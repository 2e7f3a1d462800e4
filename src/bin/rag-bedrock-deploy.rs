//! `rag-bedrock-deploy`: validate, create, update or delete the CloudFormation
//! stack that hosts RAG Anything.
//!
//! Defaults come from the `[deploy]` section of the app config; every value
//! can be overridden by a flag (see `--help`).

use std::process;

use rag_bedrock::config;
use rag_bedrock::deploy::{self, CloudFormationApi, DeployError, DeployOutcome, Deployer, Parsed};
use rag_bedrock::error::AppError;
use rag_bedrock::{logger, ui};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        ui::error(format!("error: {e}"));
        process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();
    let cfg = config::load(None)?;

    let args = match deploy::parse_args(std::env::args().skip(1), &cfg.deploy)? {
        Parsed::Help => {
            eprintln!("{}", deploy::usage());
            return Ok(());
        }
        Parsed::Run(a) => a,
    };
    let level = logger::level_for_verbosity(args.verbosity).unwrap_or(cfg.log_level.as_str());
    logger::init(level, args.verbosity > 0, None)?;

    // Relative templates are looked up in the working directory first.
    let template = if args.template.exists() { args.template.clone() } else { cfg.resolve(&args.template) };
    let body = std::fs::read_to_string(&template).map_err(|e| DeployError::Template {
        path: template.clone(),
        message: e.to_string(),
    })?;

    ui::info(format!("stack {} in {} ({})", args.stack_name, args.region, args.environment));
    let api = CloudFormationApi::new(&args.region).await;
    let spinner = ui::Spinner::start("talking to CloudFormation");
    let outcome = Deployer::new(&api).run(&args, &body).await;
    drop(spinner);

    match outcome? {
        DeployOutcome::Validated => ui::ok("template is valid"),
        DeployOutcome::NothingToDelete => ui::warn(format!("stack {} does not exist; nothing to delete", args.stack_name)),
        DeployOutcome::Deleted => ui::ok(format!("stack {} deleted", args.stack_name)),
        DeployOutcome::NoChanges => ui::ok("no updates are to be performed"),
        DeployOutcome::Created { outputs } | DeployOutcome::Updated { outputs } => {
            ui::ok(format!("stack {} is ready", args.stack_name));
            for (k, v) in outputs {
                println!("  {k}: {v}");
            }
        }
    }
    Ok(())
}
