//! Runnable demos for the agent SDK (one demo per module).

mod demos;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::demos::{message_logger, quick_start};

/// Agent SDK demos driving the `kimi` CLI.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Working directory handed to the agent.
    #[arg(short, long, default_value = ".")]
    work_dir: PathBuf,

    /// Model name override.
    #[arg(short, long)]
    model: Option<String>,

    #[command(subcommand)]
    demo: Demo,
}

#[derive(Subcommand, Debug)]
enum Demo {
    /// Ask the agent to create hello.txt and print its reply.
    QuickStart,
    /// Catalog a directory, logging every aggregated message.
    MessageLogger {
        /// Directory for the message log and the final report.
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    demos::load_env();
    agent_sdk::init_observability();
    let args = Args::parse();
    let runtime = agent_sdk::vendors::kimi_cli::KimiCliRuntime::from_env()?;
    let mut options = agent_sdk::PromptOptions::new()
        .work_dir(args.work_dir.clone())
        .yolo(true);
    if let Some(model) = args.model {
        options = options.model(model);
    }

    match args.demo {
        Demo::QuickStart => quick_start::run(&runtime, options).await?,
        Demo::MessageLogger { output_dir } => {
            let report = message_logger::run(&runtime, options, &output_dir).await?;
            println!("Wrote message log to {}", report.log_path.display());
            println!("Wrote catalog report to {}", report.report_path.display());
        }
    }
    Ok(())
}
