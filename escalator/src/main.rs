//! Escalator command line.
//!
//! Writes and inspects engine configuration, and runs the configured deterministic
//! validators against a saved response, without calling any model.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use escalator::core::retry_config::Stage;
use escalator::core::types::{LlmRequest, LlmResponse};
use escalator::core::validation::ValidationResult;
use escalator::exit_codes;
use escalator::io::config::{EngineConfig, ValidatorSpec, load_config, write_config};
use escalator::validators::ValidationContext;
use escalator::validators::registry::ValidatorRegistry;

#[derive(Parser)]
#[command(
    name = "escalator",
    version,
    about = "Staged retry and validation engine for LLM calls"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the built-in validator names.
    Validators,
    /// Write a starter config with the default retry policy.
    InitConfig {
        /// Path to the TOML config to create.
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Load a config file, check retry thresholds, and build its validators.
    CheckConfig {
        /// Path to the TOML config.
        path: PathBuf,
    },
    /// Run the configured validators against a response and print a JSON report.
    Check {
        /// Path to the TOML config.
        #[arg(long)]
        config: PathBuf,
        /// Response file. Reads stdin when omitted.
        #[arg(long)]
        response: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct CheckReport<'a> {
    valid: bool,
    validators_run: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_validator: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ValidationResult>,
}

#[tokio::main]
async fn main() {
    escalator::logging::init();
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Validators => cmd_validators(),
        Command::InitConfig { path, force } => cmd_init_config(&path, force),
        Command::CheckConfig { path } => cmd_check_config(&path),
        Command::Check { config, response } => cmd_check(&config, response.as_deref()).await,
    }
}

fn cmd_validators() -> Result<i32> {
    for name in ValidatorRegistry::with_builtins().names() {
        println!("{name}");
    }
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &starter_config())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn starter_config() -> EngineConfig {
    EngineConfig {
        validators: vec![ValidatorSpec {
            name: "non_empty".to_string(),
            params: Value::Null,
        }],
        ..EngineConfig::default()
    }
}

fn cmd_check_config(path: &Path) -> Result<i32> {
    if !path.exists() {
        anyhow::bail!("config not found: {}", path.display());
    }
    let cfg = load_config(path)?;
    let validators = cfg.build_validators(&ValidatorRegistry::with_builtins())?;
    println!(
        "config ok: {} validators, {} tools, max_attempts {}",
        validators.len(),
        cfg.tools.len(),
        cfg.retry.max_attempts
    );
    Ok(exit_codes::OK)
}

async fn cmd_check(config_path: &Path, response_path: Option<&Path>) -> Result<i32> {
    if !config_path.exists() {
        anyhow::bail!("config not found: {}", config_path.display());
    }
    let cfg = load_config(config_path)?;
    let validators = cfg.build_validators(&ValidatorRegistry::with_builtins())?;
    let content = read_response(response_path)?;
    let response = LlmResponse::new(content);

    let request = LlmRequest::default();
    let cancel = CancellationToken::new();
    let ctx = ValidationContext {
        attempt: 1,
        stage: Stage::Basic,
        original_request: &request,
        tools: &[],
        depth: 0,
        cancel: &cancel,
    };

    let mut report = CheckReport {
        valid: true,
        validators_run: 0,
        failed_validator: None,
        result: None,
    };
    for validator in &validators {
        report.validators_run += 1;
        let result = validator.validate(&response, &ctx).await;
        if !result.is_valid() {
            report.valid = false;
            report.failed_validator = Some(validator.name());
            report.result = Some(result);
            break;
        }
    }

    let rendered = serde_json::to_string_pretty(&report).context("serialize report")?;
    println!("{rendered}");
    Ok(if report.valid {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn read_response(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path).with_context(|| format!("read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read response from stdin")?;
            Ok(buf)
        }
    }
}
