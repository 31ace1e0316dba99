use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use capgate_api::{PlatformFacts, VersionCode};
use capgate_engine::request::partition;
use capgate_engine::{HostConfig, HostPresets};
use capgate_sim::tracing_support::{init_subscriber_with_config, TracingConfig, TracingFormat};
use capgate_sim::{expand_capability, run_scenario, Scenario};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "capgate-sim", version, about = "Simulate capability request runs")]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = TracingFormat::Compact, env = "CAPGATE_LOG_FORMAT")]
    log_format: TracingFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scenario file to completion
    Run {
        scenario: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,

        /// Append audit events to this JSONL file
        #[arg(long)]
        audit: Option<PathBuf>,
    },
    /// Show how capabilities are routed on a platform
    Partition {
        #[arg(long)]
        os: VersionCode,

        #[arg(long)]
        target: VersionCode,

        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,

        #[arg(required = true)]
        capabilities: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Serialize)]
struct PartitionView {
    ordinary: Vec<String>,
    special: Vec<String>,
    auto_granted: Vec<String>,
    unrequestable: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let log_config = TracingConfig {
        format: cli.log_format,
        ..TracingConfig::default()
    };
    // A subscriber may already be installed when embedded
    let _ = init_subscriber_with_config(log_config);

    match cli.command {
        Command::Run {
            scenario,
            format,
            audit,
        } => {
            let loaded = Scenario::from_file(&scenario)
                .with_context(|| format!("loading {}", scenario.display()))?;
            let config = match audit {
                Some(path) => HostConfig::builder()
                    .app_name("capgate-sim")
                    .audit_file(path)
                    .build()?,
                None => HostPresets::quiet(),
            };

            let report = run_scenario(&loaded, config).await?;
            match format {
                OutputFormat::Pretty => println!("{}", report),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            Ok(if report.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Partition {
            os,
            target,
            format,
            capabilities,
        } => {
            let facts = PlatformFacts::new(os, target);
            let split = partition(capabilities.iter().map(|id| expand_capability(id)), &facts);
            let view = PartitionView {
                ordinary: split.ordinary.iter().map(|c| c.to_string()).collect(),
                special: split.special.iter().map(|g| g.to_string()).collect(),
                auto_granted: split.auto_granted.iter().map(|c| c.to_string()).collect(),
                unrequestable: split.unrequestable.iter().map(|c| c.to_string()).collect(),
            };
            match format {
                OutputFormat::Pretty => {
                    let line = |items: &[String]| {
                        if items.is_empty() {
                            "-".to_string()
                        } else {
                            items.join(", ")
                        }
                    };
                    println!("Platform: os {} / target {}", os, target);
                    println!("  ordinary:      {}", line(&view.ordinary));
                    println!("  special:       {}", line(&view.special));
                    println!("  auto-granted:  {}", line(&view.auto_granted));
                    println!("  unrequestable: {}", line(&view.unrequestable));
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
