// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! kvlink demo driver
//!
//! Runs one entity and a set of writer processes against it, then prints
//! what the entity ended up storing.
//!
//! # Usage
//!
//! ```bash
//! # Five writers for three seconds
//! kvlink-demo --processes 5 --duration-secs 3
//!
//! # More writers than sessions: the extra ones are refused
//! kvlink-demo --processes 12 --limit 10
//!
//! # Using configuration file
//! kvlink-demo --config kvlink.toml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use kvlink::{Entity, KvlinkConfig, Process, ProcessId};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// kvlink demo driver
#[derive(Parser, Debug)]
#[command(name = "kvlink-demo")]
#[command(about = "Run writer processes against a kvlink entity")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of writer processes
    #[arg(short, long, default_value = "5")]
    processes: u32,

    /// Session limit (overrides the configuration file)
    #[arg(short, long)]
    limit: Option<usize>,

    /// How long the writers run (seconds)
    #[arg(short, long, default_value = "3")]
    duration_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "kvlink.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let mut config = match args.config {
        Some(ref path) => KvlinkConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => KvlinkConfig::default(),
    };
    if let Some(limit) = args.limit {
        config.entity.max_sessions = limit;
    }

    let entity = Entity::new(config.entity.clone()).context("creating entity")?;

    println!("kvlink demo v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!(
        "Writers: {}, session limit: {}",
        args.processes, config.entity.max_sessions
    );
    println!("Press Ctrl+C to stop early...");
    println!();

    let mut writers = Vec::new();
    for id in 0..args.processes {
        match kvlink::with_process_fn(id, &entity, config.process.clone(), write_forever) {
            Ok(process) => writers.push(process),
            Err(e) => warn!(process = id, "Writer not started: {}", e),
        }
    }
    info!(started = writers.len(), "Writers running");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for Ctrl+C")?;
            println!("\nShutting down...");
        }
    }

    kvlink::shutdown_all(&writers);
    for writer in &writers {
        writer.closed().await;
    }
    entity.shutdown();

    println!("Stored records: {}", entity.len());
    print!("{}", entity);
    Ok(())
}

/// Add `proc <id>, num <n>` keys every 100 ms until the process stops.
async fn write_forever(process: Process) {
    let id: ProcessId = process.id();
    let mut tick = tokio::time::interval(Duration::from_millis(100));
    let mut num = 0u64;

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = process.closed() => return,
        }

        let key = format!("proc {}, num {}", id, num);
        if process.add(key.clone(), key).is_err() {
            return;
        }
        num += 1;
    }
}

fn cmd_gen_config(output: PathBuf) -> anyhow::Result<()> {
    let config = KvlinkConfig::default();
    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# kvlink configuration
# Generated by kvlink-demo gen-config

{}"#,
        toml_str
    );

    std::fs::write(&output, content)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    match KvlinkConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Entity:");
            println!("  max_sessions: {}", config.entity.max_sessions);
            println!(
                "  session idle timeout: {:?}",
                config.entity.session_idle_timeout()
            );
            println!("Process:");
            println!("  max_msg_size: {}", config.process.max_msg_size);
            println!("  send_msg_cutoff: {}", config.process.send_msg_cutoff);
            println!(
                "  resend interval: {:?}",
                config.process.resend_interval()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
