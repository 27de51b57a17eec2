//! caseflow CLI: operator interface to the workflow engine.

use std::path::PathBuf;
use std::sync::Arc;

use caseflow::config::Config;
use caseflow::engine::Engine;
use caseflow::model::{Measurements, NewCase, Priority};
use caseflow::priority;
use caseflow::repository::InMemoryRepository;
use caseflow::telemetry::init_telemetry;
use clap::{Parser, Subcommand};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "caseflow", about = "Workflow and queue engine for staged case journeys")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the stage registry
    Stages,
    /// Compute an urgency level from intake measurements
    Priority {
        /// Systolic blood pressure (mmHg)
        #[arg(long)]
        systolic: Option<f64>,
        /// Diastolic blood pressure (mmHg)
        #[arg(long)]
        diastolic: Option<f64>,
        /// Pulse (beats per minute)
        #[arg(long)]
        pulse: Option<f64>,
        /// Temperature (degrees Celsius)
        #[arg(long)]
        temperature: Option<f64>,
        /// Oxygen saturation (percent)
        #[arg(long)]
        spo2: Option<f64>,
        /// Respiratory rate (breaths per minute)
        #[arg(long)]
        respiratory_rate: Option<f64>,
    },
    /// Run the engine against an in-memory repository until Ctrl-C
    Serve {
        /// JSON file with cases to register at startup
        #[arg(long)]
        seed: Option<PathBuf>,
    },
}

/// One entry of a `serve --seed` file.
#[derive(Debug, Deserialize)]
struct SeedCase {
    name: String,
    identifier: String,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    measurements: Option<Measurements>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Stages => cmd_stages(&config),
        Command::Priority {
            systolic,
            diastolic,
            pulse,
            temperature,
            spo2,
            respiratory_rate,
        } => {
            let measurements = Measurements {
                systolic,
                diastolic,
                pulse,
                temperature,
                oxygen_saturation: spo2,
                respiratory_rate,
            };
            cmd_priority(&measurements);
            Ok(())
        }
        Command::Serve { seed } => cmd_serve(&config, seed).await,
    }
}

fn cmd_stages(config: &Config) -> anyhow::Result<()> {
    let registry = config.load_registry()?;

    println!(
        "{:<4}  {:<22}  {:<26}  {:<16}  {:<28}  FLAGS",
        "POS", "ID", "LABEL", "ACTIVE", "COMPLETES AS"
    );
    println!("{}", "-".repeat(110));

    for stage in registry.iter() {
        let mut flags = Vec::new();
        if !stage.pre_entry_statuses.is_empty() {
            flags.push("intake");
        }
        if stage.diagnostic {
            flags.push("diagnostic");
        }
        if stage.payment_gated {
            flags.push("payment-gated");
        }
        if stage.emergency_bypass {
            flags.push("emergency-bypass");
        }
        if stage.terminal_capable {
            flags.push("terminal-capable");
        }
        println!(
            "{:<4}  {:<22}  {:<26}  {:<16}  {:<28}  {}",
            stage.position,
            stage.id,
            stage.label,
            stage.active_status,
            stage.completion_status,
            flags.join(",")
        );
    }

    println!("\n{} stage(s)", registry.len());
    Ok(())
}

fn cmd_priority(measurements: &Measurements) {
    let level = priority::compute(measurements);
    println!("{level}");
    for (name, hit) in priority::contributing(measurements) {
        println!("  {name}: {hit}");
    }
}

async fn cmd_serve(config: &Config, seed: Option<PathBuf>) -> anyhow::Result<()> {
    let _guard = init_telemetry(config.telemetry_config("caseflow"))?;

    let registry = config.load_registry()?;
    let repository = Arc::new(InMemoryRepository::new());
    let engine = Arc::new(Engine::new(registry, repository, config.engine_config()));

    // Mirror every notification into the operator log.
    let mut feed = engine.notifications().subscribe("operator-log");
    tokio::spawn(async move {
        while let Some(n) = feed.recv().await {
            tracing::info!(
                seq = n.seq,
                case = %n.case_id,
                stage = n.stage.as_ref().map(|s| s.to_string()).unwrap_or_default(),
                severity = ?n.severity,
                kind = n.kind.name(),
                "notification"
            );
        }
    });

    engine.load_from_repository().await?;

    if let Some(path) = seed {
        let raw = tokio::fs::read_to_string(&path).await?;
        let cases: Vec<SeedCase> = serde_json::from_str(&raw)?;
        for seed in cases {
            let mut new = NewCase::new(seed.name, seed.identifier).priority(seed.priority);
            if let Some(m) = seed.measurements {
                new = new.measurements(m);
            }
            let case = engine.register(new).await?;
            println!("Registered: {} ({}, {})", case.id, case.name, case.priority);
        }
    }

    let ctrl = Arc::clone(&engine);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    engine.run().await?;
    Ok(())
}
