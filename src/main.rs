//! `readaloud` command line: practise a sentence with typed input and manage
//! the queue of attempt records waiting for the logging endpoint.

use std::{
    io::{self, Read},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use readaloud_lib::{
    recognizer::HypothesisSource, session::SessionState, utils::logging::init_logging,
    PracticeApp, PracticeResult,
};

#[derive(Parser)]
#[command(name = "readaloud")]
#[command(version)]
#[command(about = "Read-aloud practice checker with offline-safe attempt logging", long_about = None)]
struct Cli {
    /// Directory holding the queue database and settings.json
    #[arg(long, env = "READALOUD_HOME", default_value = ".readaloud")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check an attempt at reading SENTENCE and log it
    Practice {
        sentence: String,

        /// What was said; read from stdin when omitted
        #[arg(long)]
        spoken: Option<String>,
    },

    /// Deliver queued attempt records now
    Flush,

    /// List attempt records still waiting for delivery
    Pending,

    /// Score SPOKEN against EXPECTED without logging anything
    Score { expected: String, spoken: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Score { expected, spoken } => {
            print_json(&PracticeResult::evaluate(&expected, &spoken))
        }
        Commands::Practice { sentence, spoken } => {
            let spoken = match spoken {
                Some(text) => Some(text),
                None => read_stdin()?,
            };
            practice(cli.data_dir, sentence, spoken).await
        }
        Commands::Flush => {
            let app = PracticeApp::open(&cli.data_dir).await?;
            let report = app.flush().await;
            print_json(&report)?;
            app.shutdown().await;
            Ok(())
        }
        Commands::Pending => {
            let app = PracticeApp::open(&cli.data_dir).await?;
            let pending = app.queue().pending().await?;
            print_json(&pending)?;
            app.shutdown().await;
            Ok(())
        }
    }
}

async fn practice(data_dir: PathBuf, sentence: String, spoken: Option<String>) -> Result<()> {
    let app = PracticeApp::open(&data_dir).await?;

    // Without text there is nothing to recognise; take the manual path.
    let source = match spoken.clone() {
        Some(text) => HypothesisSource::ManualInput(text),
        None => HypothesisSource::Unavailable,
    };
    let controller = app.new_session(sentence, source)?;
    controller.start().await?;

    let mut snapshot = controller.wait_settled().await;
    if snapshot.state == SessionState::Finalizing {
        snapshot = controller.submit_manual(spoken).await?;
    }

    let result = snapshot
        .result
        .context("practice session settled without a result")?;
    print_json(&result)?;

    let report = app.flush().await;
    if report.failed > 0 {
        log::warn!(
            "{} attempt record(s) could not be delivered; they stay queued",
            report.failed
        );
    }
    app.shutdown().await;
    Ok(())
}

fn read_stdin() -> Result<Option<String>> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read spoken text from stdin")?;
    let text = buffer.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
