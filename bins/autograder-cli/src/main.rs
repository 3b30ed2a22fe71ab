mod commands;

use anyhow::Result;
use autograder_common::types::JobStatus;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "autograder-cli")]
#[command(about = "Autograder CLI - Inspect languages, prefetch images, grade programs locally", long_about = None)]
struct Cli {
    /// Language configuration file (defaults to the built-in registry)
    #[arg(long, global = true, env = "LANGUAGES_FILE")]
    languages_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured languages
    Languages,

    /// Pull every sandbox image the languages need
    Pull,

    /// Grade one program against a problem, printing the job as JSON
    Grade {
        /// Problem id (a directory under the problems directory)
        #[arg(short, long)]
        problem: String,

        /// Language name (e.g., python, sed)
        #[arg(short, long)]
        language: String,

        /// Program file to submit
        file: PathBuf,

        /// Root of the problem fixtures
        #[arg(long, env = "PROBLEMS_DIR", default_value = "problems")]
        problems_dir: PathBuf,

        /// Execution deadline in milliseconds
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = commands::load_registry(cli.languages_file.as_deref())?;

    match cli.command {
        Commands::Languages => {
            commands::list_languages(&registry);
        }
        Commands::Pull => {
            commands::pull_images(&registry).await?;
        }
        Commands::Grade {
            problem,
            language,
            file,
            problems_dir,
            timeout_ms,
        } => {
            let snapshot =
                commands::grade(registry, &problems_dir, &problem, &language, &file, timeout_ms)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);

            if snapshot.status != JobStatus::Correct {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
