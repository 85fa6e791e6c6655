//! Remedy - self-healing patch orchestrator CLI
//!
//! The `remedy` command drives patch sessions offline against scripted
//! sandbox outcomes, and exposes the envelope schema and policy presets.
//!
//! ## Commands
//!
//! - `run`: Drive a full session from a JSON request file
//! - `schema`: Print the draft-07 envelope schema
//! - `presets`: Show the built-in policy presets

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, Level};

use remedy_core::ports::fakes::ScriptedSandbox;
use remedy_core::{
    envelope_schema, init_tracing, run_session, BasicSanitizer, Engine, EnginePolicy, EnginePorts,
    LimitsHit, ResourceObserved, ResourceUsage, SandboxOutcome, SessionRequest, SystemClock,
    ThreadJitterRng, WaitBounds,
};

#[derive(Parser)]
#[command(name = "remedy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Self-healing patch orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a session from a JSON request file with scripted sandbox outcomes
    Run {
        /// Path to the request file (see `RunFile` format)
        #[arg(short, long)]
        request: PathBuf,

        /// Policy preset: sota, mid_tier, or local_small
        #[arg(long)]
        preset: Option<String>,

        /// JSON policy file overriding the preset
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Maximum attempts for the session
        #[arg(long, default_value_t = 5)]
        max_attempts: u32,

        /// Pretty-print the final envelope
        #[arg(long)]
        pretty: bool,
    },

    /// Print the draft-07 envelope schema
    Schema,

    /// Show the built-in policy presets
    Presets,
}

/// One scripted sandbox outcome in a request file.
#[derive(Debug, Deserialize)]
struct ScriptedOutcome {
    success: bool,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    wall_ms: u64,
    #[serde(default)]
    cpu_percent: f64,
    #[serde(default)]
    time_limit_hit: bool,
}

impl ScriptedOutcome {
    fn into_outcome(self) -> SandboxOutcome {
        SandboxOutcome {
            success: self.success,
            test_results: Vec::new(),
            error_message: self.error_message,
            resource_usage: ResourceUsage {
                observed: ResourceObserved {
                    wall_ms: self.wall_ms,
                    memory_mb: 0,
                    cpu_percent: self.cpu_percent,
                    limits_hit: LimitsHit {
                        time: self.time_limit_hit,
                        ..LimitsHit::default()
                    },
                },
                ..ResourceUsage::default()
            },
        }
    }
}

/// The `run` subcommand's input file.
#[derive(Debug, Deserialize)]
struct RunFile {
    session: SessionRequest,
    #[serde(default)]
    script: Vec<ScriptedOutcome>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            request,
            preset,
            policy,
            max_attempts,
            pretty,
        } => run_command(request, preset, policy, max_attempts, pretty).await,
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&envelope_schema())?);
            Ok(())
        }
        Commands::Presets => {
            let presets = serde_json::json!({
                "sota": EnginePolicy::sota(),
                "mid_tier": EnginePolicy::mid_tier(),
                "local_small": EnginePolicy::local_small(),
            });
            println!("{}", serde_json::to_string_pretty(&presets)?);
            Ok(())
        }
    }
}

async fn run_command(
    request_path: PathBuf,
    preset: Option<String>,
    policy_path: Option<PathBuf>,
    max_attempts: u32,
    pretty: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(&request_path)
        .with_context(|| format!("reading request file {}", request_path.display()))?;
    let run_file: RunFile = serde_json::from_str(&raw).context("parsing request file")?;

    let policy = resolve_policy(preset, policy_path)?;

    let outcomes: Vec<SandboxOutcome> = run_file
        .script
        .into_iter()
        .map(ScriptedOutcome::into_outcome)
        .collect();
    if outcomes.is_empty() {
        bail!("request file has an empty sandbox script");
    }

    let ports = EnginePorts {
        sandbox: Arc::new(ScriptedSandbox::new(outcomes)),
        clock: Arc::new(SystemClock),
        rng: Arc::new(ThreadJitterRng),
        sanitizer: Arc::new(BasicSanitizer),
    };
    let mut engine = Engine::new(policy, ports);

    let outcome = run_session(
        &mut engine,
        run_file.session,
        max_attempts,
        WaitBounds::default(),
        None,
        None,
    )
    .await?;

    info!(
        verdict = %outcome.verdict,
        attempts = outcome.attempts,
        "session finished"
    );

    if pretty {
        println!("{}", serde_json::to_string_pretty(&outcome.envelope)?);
    } else {
        println!("{}", outcome.envelope);
    }
    Ok(())
}

fn resolve_policy(preset: Option<String>, policy_path: Option<PathBuf>) -> Result<EnginePolicy> {
    if let Some(path) = policy_path {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading policy file {}", path.display()))?;
        return serde_json::from_str(&raw).context("parsing policy file");
    }
    match preset {
        Some(name) => EnginePolicy::preset(&name)
            .with_context(|| format!("unknown preset `{name}` (try sota, mid_tier, local_small)")),
        None => Ok(EnginePolicy::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_policy_default() {
        let policy = resolve_policy(None, None).unwrap();
        assert_eq!(policy, EnginePolicy::default());
    }

    #[test]
    fn test_resolve_policy_preset() {
        let policy = resolve_policy(Some("sota".to_string()), None).unwrap();
        assert_eq!(policy, EnginePolicy::sota());
        assert!(resolve_policy(Some("bogus".to_string()), None).is_err());
    }

    #[test]
    fn test_resolve_policy_file_overrides_preset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, r#"{"rate_limit_per_min": 2}"#).unwrap();
        let policy =
            resolve_policy(Some("sota".to_string()), Some(path)).unwrap();
        assert_eq!(policy.rate_limit_per_min, 2);
        // Unspecified fields fall back to defaults, not the preset.
        assert_eq!(policy.max_syntax_attempts, 5);
    }

    #[test]
    fn test_run_file_parses() {
        let raw = r#"{
            "session": {
                "patch_id": null,
                "class": "syntax",
                "message": "missing )",
                "patch_code": "console.log(\"x\");",
                "original_code": "console.log(\"x\"",
                "language": "javascript",
                "logits": [0.9, 0.1],
                "history": null,
                "metadata": null
            },
            "script": [
                {"success": false, "error_message": "missing )"},
                {"success": true}
            ]
        }"#;
        let run_file: RunFile = serde_json::from_str(raw).unwrap();
        assert_eq!(run_file.script.len(), 2);
        let outcome = run_file.script.into_iter().next().unwrap().into_outcome();
        assert!(!outcome.success);
        assert_eq!(outcome.error_message.as_deref(), Some("missing )"));
    }
}
