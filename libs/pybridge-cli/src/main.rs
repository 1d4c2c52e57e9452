// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! pybridge CLI
//!
//! Drives a bridge session from the command line: provisioning, worker
//! startup and one-shot task dispatch.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "pybridge")]
#[command(author, version, about = "Python worker bridge CLI", long_about = None)]
struct Cli {
    /// Bridge config file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the work directory
    #[arg(long, global = true, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the runtime and start the worker
    Init {
        /// Session key (generated if not specified)
        #[arg(long)]
        session_key: Option<String>,
    },

    /// Execute one task and write its output
    Exec {
        /// Task type (e.g. SENTIMENT, YOLO)
        #[arg(long)]
        task: String,

        /// Task metadata
        #[arg(long, default_value = "NONE")]
        metadata: String,

        /// Read input bytes from a file
        #[arg(long, conflicts_with = "text")]
        input: Option<PathBuf>,

        /// Use a UTF-8 string as input
        #[arg(long)]
        text: Option<String>,

        /// Write output to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Analyze the sentiment of a text
    Sentiment {
        text: String,
    },

    /// Query worker status
    Status,

    /// Run a plugin task with space-joined arguments
    Plugin {
        task: String,
        args: Vec<String>,
    },

    /// Process a raw pixel file in place over the legacy file transport
    Raw {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        #[arg(long)]
        channels: u32,
    },

    /// Extract a runtime archive into a target directory
    Provision {
        #[arg(long)]
        target: PathBuf,

        #[arg(long)]
        archive: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = cli.command else {
        Cli::parse_from(["pybridge", "--help"]);
        return Ok(());
    };

    let config = || commands::load_config(cli.config.as_deref(), cli.work_dir.clone());

    match command {
        Commands::Provision { target, archive } => commands::provision::run(&target, &archive)?,
        Commands::Init { session_key } => commands::session::init(config()?, session_key).await?,
        Commands::Exec {
            task,
            metadata,
            input,
            text,
            output,
        } => {
            let client = commands::connect(config()?).await?;
            let payload = commands::exec::read_input(input.as_deref(), text.as_deref())?;
            commands::exec::run(&client, &task, &metadata, &payload, output.as_deref())?;
        }
        Commands::Sentiment { text } => {
            let client = commands::connect(config()?).await?;
            println!("{}", client.analyze_sentiment(&text));
        }
        Commands::Status => {
            let client = commands::connect(config()?).await?;
            commands::session::status(&client)?;
        }
        Commands::Plugin { task, args } => {
            let client = commands::connect(config()?).await?;
            println!("{}", client.plugin(&task, &args));
        }
        Commands::Raw {
            input,
            width,
            height,
            channels,
        } => {
            let client = commands::detached(config()?);
            commands::exec::raw(&client, &input, width, height, channels)?;
        }
    }

    Ok(())
}
