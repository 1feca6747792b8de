// CLI commands for grading and managing Codetrial configuration
use anyhow::{bail, Context, Result};
use codetrial_common::catalog::TestCatalog;
use codetrial_common::config::{SandboxKind, ServiceConfig};
use codetrial_common::languages::{
    builtin_languages, LanguageConfig, LanguageLimits, LanguageRegistry, LanguagesJson,
};
use codetrial_common::types::{Language, SubmissionResult, SubmissionState, TestCase};
use codetrial_engine::{
    DockerSandbox, Evaluator, NewSubmission, ProcessSandbox, SandboxRunner, Scheduler,
    SchedulerConfig,
};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const CLI_SESSION: &str = "cli";

pub struct RunArgs<'a> {
    pub languages_path: &'a Path,
    pub tests_path: &'a Path,
    pub language: &'a str,
    pub source: &'a Path,
    pub test_id: Option<&'a str>,
    pub cases_path: Option<&'a Path>,
    pub sandbox: SandboxKind,
    pub verbose: bool,
}

fn load_cases(path: &Path) -> Result<Vec<TestCase>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let cases: Vec<TestCase> =
        serde_json::from_str(&content).context("Failed to parse test cases")?;
    if cases.is_empty() {
        bail!("{} contains no test cases", path.display());
    }
    Ok(cases)
}

/// Grade a local source file; returns whether every case passed
pub async fn run_submission(args: RunArgs<'_>) -> Result<bool> {
    let language: Language = args.language.parse()?;
    let source_code = fs::read_to_string(args.source)
        .with_context(|| format!("Failed to read {}", args.source.display()))?;

    let registry = Arc::new(LanguageRegistry::load_or_builtin(args.languages_path)?);
    if !registry.is_enabled(language) {
        bail!("Language '{}' is not configured in {}", language, args.languages_path.display());
    }

    let (test_id, test_cases, deadline) = match (args.test_id, args.cases_path) {
        (Some(id), _) => {
            let catalog = TestCatalog::load(args.tests_path)?;
            let test = catalog
                .get(id)
                .with_context(|| format!("Test '{}' not found in {}", id, args.tests_path.display()))?;
            println!("📋 Test: {} ({:?}, {} min)", test.title, test.difficulty, test.duration_minutes);
            (
                id.to_string(),
                test.test_cases.clone(),
                Some(Duration::from_secs(u64::from(test.duration_minutes) * 60)),
            )
        }
        (None, Some(path)) => (path.display().to_string(), load_cases(path)?, None),
        (None, None) => bail!("Either --test or --cases is required"),
    };

    println!(
        "🚀 Grading {} ({}) against {} case(s) in the {} sandbox...\n",
        args.source.display(),
        language,
        test_cases.len(),
        match args.sandbox {
            SandboxKind::Process => "process",
            SandboxKind::Docker => "docker",
        }
    );

    let config = ServiceConfig::default();
    let runner: Arc<dyn SandboxRunner> = match args.sandbox {
        SandboxKind::Process => Arc::new(ProcessSandbox::new(registry.clone(), &config.sandbox_root)),
        SandboxKind::Docker => Arc::new(DockerSandbox::connect(registry.clone())?),
    };
    let evaluator = Evaluator::new(runner, registry, config.output_limit_bytes);
    let scheduler = Scheduler::new(evaluator, SchedulerConfig::from_service(&config));

    let handle = scheduler.submit(NewSubmission {
        session_id: CLI_SESSION.to_string(),
        language,
        source_code,
        test_id,
        test_cases,
        deadline,
    })?;

    let result = scheduler
        .wait(handle.submission_id)
        .await
        .context("Submission result is no longer available")?;

    print_result(&result, args.verbose);
    Ok(result.overall_passed)
}

fn print_result(result: &SubmissionResult, verbose: bool) {
    for verdict in &result.verdicts {
        if verdict.passed {
            println!("  ✓ Case {} ({} ms)", verdict.test_case_index + 1, verdict.wall_time_ms);
            continue;
        }

        println!("  ✗ Case {} ({} ms)", verdict.test_case_index + 1, verdict.wall_time_ms);
        if let Some(summary) = &verdict.diff_summary {
            for line in summary.lines() {
                println!("      {}", line);
            }
        }
        if verbose && !verdict.actual_output.is_empty() {
            println!("      Output:");
            for line in verdict.actual_output.lines() {
                println!("        {}", line);
            }
        }
    }

    let passed = result.verdicts.iter().filter(|v| v.passed).count();
    println!();
    match result.state {
        SubmissionState::Completed if result.overall_passed => {
            println!("✅ All {} case(s) passed", result.total_cases)
        }
        SubmissionState::Completed => {
            println!("❌ {} / {} case(s) passed", passed, result.total_cases)
        }
        SubmissionState::TimedOut => println!(
            "⏰ Time is up: {} / {} case(s) graded, {} passed",
            result.verdicts.len(),
            result.total_cases,
            passed
        ),
        state => {
            println!("⚠️  Submission ended as {}", state);
            if let Some(error) = &result.error {
                println!("   {}", error);
            }
        }
    }
}

fn load_languages_config(path: &Path) -> Result<LanguagesJson> {
    if !path.exists() {
        return Ok(LanguagesJson { languages: vec![] });
    }

    let content = fs::read_to_string(path).context("Failed to read languages.json")?;
    serde_json::from_str(&content).context("Failed to parse languages.json")
}

fn save_languages_config(path: &Path, config: &LanguagesJson) -> Result<()> {
    // Ensure config directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json_content =
        serde_json::to_string_pretty(&config).context("Failed to serialize languages.json")?;

    fs::write(path, json_content).context("Failed to write languages.json")?;

    Ok(())
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

pub struct NewLanguage<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub image: &'a str,
    pub source_file: &'a str,
    pub compile: Option<&'a str>,
    pub run: &'a str,
    pub memory_mb: u64,
    pub cpu_time_ms: u64,
    pub wall_time_ms: u64,
    pub cpu: f32,
}

pub fn add_language(path: &Path, new: NewLanguage<'_>) -> Result<()> {
    println!("🚀 Adding language: {}", new.name);

    let language: Language = new.name.parse()?;
    if new.source_file.trim().is_empty() {
        bail!("Source file name cannot be empty");
    }
    if new.memory_mb == 0 || new.cpu_time_ms == 0 || new.wall_time_ms == 0 {
        bail!("Resource limits must be greater than zero");
    }

    // Load existing config
    let mut languages_json = load_languages_config(path)?;

    // Check if language already exists
    if languages_json.languages.iter().any(|l| l.name == language) {
        bail!("Language '{}' already exists in config", language);
    }

    // Starter template comes from the built-in toolchain
    let template = builtin_languages()
        .into_iter()
        .find(|l| l.name == language)
        .map(|l| l.template)
        .unwrap_or_default();

    languages_json.languages.push(LanguageConfig {
        name: language,
        version: new.version.to_string(),
        image: new.image.to_string(),
        source_file: new.source_file.to_string(),
        compile: new.compile.map(split_command).filter(|argv| !argv.is_empty()),
        run: split_command(new.run),
        limits: LanguageLimits {
            cpu_time_ms: new.cpu_time_ms,
            wall_time_ms: new.wall_time_ms,
            memory_limit_mb: new.memory_mb,
        },
        cpu_limit: new.cpu,
        template,
    });

    // Same checks the service applies at startup
    LanguageRegistry::new(languages_json.languages.clone())?;

    println!("📝 Updating {}...", path.display());
    save_languages_config(path, &languages_json)?;

    println!("✅ Language '{}' added successfully!", language);
    println!("\n📋 Next steps:");
    println!("  1. Restart codetrial-api to pick up the change");
    println!("  2. Try it: codetrial-cli run --language {} --source <file> --test <id>", language);

    Ok(())
}

pub fn remove_language(path: &Path, name: &str, yes: bool) -> Result<()> {
    println!("🗑️  Removing language: {}", name);

    let language: Language = name.parse()?;
    let mut languages_json = load_languages_config(path)?;

    // Find language
    let lang_index = languages_json
        .languages
        .iter()
        .position(|l| l.name == language)
        .ok_or_else(|| anyhow::anyhow!("Language '{}' not found in config", language))?;

    if languages_json.languages.len() == 1 {
        bail!("Cannot remove the last configured language");
    }

    // Confirm deletion
    if !yes {
        print!("⚠️  This will remove the '{}' entry from {}\n", language, path.display());
        print!("\nContinue? (y/N): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("❌ Aborted");
            return Ok(());
        }
    }

    languages_json.languages.remove(lang_index);
    println!("📝 Updating {}...", path.display());
    save_languages_config(path, &languages_json)?;

    println!("✅ Language '{}' removed successfully!", language);
    Ok(())
}

pub fn list_languages(path: &Path) -> Result<()> {
    let registry = LanguageRegistry::load_or_builtin(path)?;

    println!("📋 Configured Languages:\n");
    println!(
        "{:<8} {:<8} {:<24} {:<12} {:<12} {:<10}",
        "Name", "Version", "Image", "CPU time", "Wall time", "Memory"
    );
    println!("{}", "─".repeat(80));

    let mut count = 0;
    for lang in registry.configs() {
        println!(
            "{:<8} {:<8} {:<24} {:<12} {:<12} {} MB",
            lang.name.as_str(),
            lang.version,
            lang.image,
            format!("{} ms", lang.limits.cpu_time_ms),
            format!("{} ms", lang.limits.wall_time_ms),
            lang.limits.memory_limit_mb
        );
        count += 1;
    }

    println!("\n✅ Total: {} language(s)", count);

    Ok(())
}

pub fn list_tests(path: &Path) -> Result<()> {
    let catalog = TestCatalog::load_or_empty(path)?;

    if catalog.is_empty() {
        println!("No tests in {}.", path.display());
        return Ok(());
    }

    println!("📋 Tests:\n");
    println!(
        "{:<22} {:<28} {:<8} {:<10} {:<6}",
        "Id", "Title", "Level", "Duration", "Cases"
    );
    println!("{}", "─".repeat(80));

    for test in catalog.list() {
        println!(
            "{:<22} {:<28} {:<8} {:<10} {:<6}",
            test.id,
            test.title,
            format!("{:?}", test.difficulty),
            format!("{} min", test.duration_minutes),
            test.test_cases.len()
        );
    }

    println!("\n✅ Total: {} test(s)", catalog.len());

    Ok(())
}
