//! Remote Deployer - Entry Point
//!
//! Serves one artifact over a short-lived HTTP file server and has a remote
//! container management endpoint pull and install it.
//!
//! Usage: remote-deployer --artifact=<file> [--action=deploy|undeploy|redeploy]
//!        [--settings=<json file>] [--<config key>=<value> ...]

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use colored::Colorize;
use remote_deployer::config::{ConfigSource, DeploySettings, Layered};
use remote_deployer::deploy::{deploy_with_retry, HttpDeployOrchestrator};
use remote_deployer::filesys::file::File;
use remote_deployer::logs::init_logging;
use remote_deployer::models::outcome::{DeployFailure, DeploymentReport};

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        println!(
            "{} {} ({}, built {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            option_env!("GIT_HASH").unwrap_or("unknown"),
            option_env!("BUILD_TIME").unwrap_or("unknown")
        );
        return ExitCode::SUCCESS;
    }

    let Some(artifact) = cli_args.get("artifact").cloned() else {
        eprintln!("{}", "Missing --artifact=<file>".red());
        return ExitCode::from(2);
    };

    // Settings file, overridden by command line keys
    let file_settings: HashMap<String, String> = match cli_args.get("settings") {
        Some(path) => match File::new(path).read_json().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("{} {}: {}", "Unable to read settings file".red(), path, e);
                return ExitCode::FAILURE;
            }
        },
        None => HashMap::new(),
    };
    let source = Layered::new()
        .with(&cli_args as &dyn ConfigSource)
        .with(&file_settings as &dyn ConfigSource);

    let settings = match DeploySettings::resolve(&source) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "Invalid configuration:".red(), e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let _log_guard = match init_logging(settings.logging.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let mut orchestrator = match HttpDeployOrchestrator::from_settings(&settings) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Unable to create deployer: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let action = cli_args
        .get("action")
        .map(|a| a.to_lowercase())
        .unwrap_or_else(|| "deploy".to_string());
    info!(
        "Running {} of {} against {}:{}",
        action, artifact, settings.endpoint.host, settings.endpoint.port
    );

    let result = match action.as_str() {
        "deploy" => deploy_with_retry(&mut orchestrator, &artifact, &settings.retry).await,
        "undeploy" => orchestrator.undeploy(&artifact).await,
        "redeploy" => orchestrator.redeploy(&artifact).await,
        other => {
            eprintln!("{} {}", "Unknown action:".red(), other);
            return ExitCode::from(2);
        }
    };

    report(result)
}

fn report(result: Result<DeploymentReport, DeployFailure>) -> ExitCode {
    match result {
        Ok(report) => {
            println!(
                "{} {:?} of '{}' from {}",
                "SUCCESS".green().bold(),
                report.action,
                report.artifact,
                report.pull_url
            );
            if let Ok(json) = serde_json::to_string_pretty(&report) {
                println!("{}", json);
            }
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!(
                "{} [{}] {}",
                "FAILED".red().bold(),
                failure.error.kind(),
                failure
            );
            ExitCode::FAILURE
        }
    }
}
