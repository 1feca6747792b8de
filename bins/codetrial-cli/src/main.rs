mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use codetrial_common::catalog::DEFAULT_TESTS_PATH;
use codetrial_common::config::SandboxKind;
use codetrial_common::languages::DEFAULT_LANGUAGES_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codetrial-cli")]
#[command(about = "Codetrial CLI - Grade code locally and manage languages and tests", long_about = None)]
struct Cli {
    /// Path to languages.json
    #[arg(long, global = true, default_value = DEFAULT_LANGUAGES_PATH)]
    languages: PathBuf,

    /// Path to tests.json
    #[arg(long, global = true, default_value = DEFAULT_TESTS_PATH)]
    tests: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a source file against a catalog test or a case file
    Run {
        /// Language of the source file (python, java, rust, bash)
        #[arg(short, long)]
        language: String,

        /// Source file to grade
        #[arg(short, long)]
        source: PathBuf,

        /// Catalog test id (see `codetrial-cli tests`)
        #[arg(short, long, conflicts_with = "cases", required_unless_present = "cases")]
        test: Option<String>,

        /// JSON file with [{"input": ..., "expected_output": ...}]
        #[arg(short, long)]
        cases: Option<PathBuf>,

        /// Sandbox backend
        #[arg(long, default_value = "process", value_parser = parse_sandbox)]
        sandbox: SandboxKind,

        /// Print full program output for failed cases
        #[arg(short, long, default_value = "false")]
        verbose: bool,
    },

    /// List configured languages
    Languages,

    /// List catalog tests
    Tests,

    /// Add a toolchain for one of the supported languages to languages.json
    AddLang {
        /// Language name (python, java, rust, bash)
        #[arg(short, long)]
        name: String,

        /// Toolchain version (e.g., 3.12, 21)
        #[arg(long, default_value = "latest")]
        version: String,

        /// Docker image for the container backend
        #[arg(short, long)]
        image: String,

        /// File the source is written to (e.g., main.py)
        #[arg(long)]
        source_file: String,

        /// Compile command, space separated (optional)
        #[arg(long)]
        compile: Option<String>,

        /// Run command, space separated
        #[arg(short, long)]
        run: String,

        /// Memory limit in MB
        #[arg(short, long, default_value = "256")]
        memory: u64,

        /// CPU time limit per case in milliseconds
        #[arg(long, default_value = "2000")]
        cpu_time_ms: u64,

        /// Wall time limit per case in milliseconds
        #[arg(long, default_value = "5000")]
        wall_time_ms: u64,

        /// CPU limit for the container backend
        #[arg(long, default_value = "0.5")]
        cpu: f32,
    },

    /// Remove a language from languages.json
    RemoveLang {
        /// Language name
        #[arg(short, long)]
        name: String,

        /// Skip confirmation prompt
        #[arg(short, long, default_value = "false")]
        yes: bool,
    },
}

fn parse_sandbox(s: &str) -> Result<SandboxKind, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            language,
            source,
            test,
            cases,
            sandbox,
            verbose,
        } => {
            let passed = commands::run_submission(commands::RunArgs {
                languages_path: &cli.languages,
                tests_path: &cli.tests,
                language: &language,
                source: &source,
                test_id: test.as_deref(),
                cases_path: cases.as_deref(),
                sandbox,
                verbose,
            })
            .await?;

            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Languages => {
            commands::list_languages(&cli.languages)?;
        }
        Commands::Tests => {
            commands::list_tests(&cli.tests)?;
        }
        Commands::AddLang {
            name,
            version,
            image,
            source_file,
            compile,
            run,
            memory,
            cpu_time_ms,
            wall_time_ms,
            cpu,
        } => {
            commands::add_language(
                &cli.languages,
                commands::NewLanguage {
                    name: &name,
                    version: &version,
                    image: &image,
                    source_file: &source_file,
                    compile: compile.as_deref(),
                    run: &run,
                    memory_mb: memory,
                    cpu_time_ms,
                    wall_time_ms,
                    cpu,
                },
            )?;
        }
        Commands::RemoveLang { name, yes } => {
            commands::remove_language(&cli.languages, &name, yes)?;
        }
    }

    Ok(())
}
