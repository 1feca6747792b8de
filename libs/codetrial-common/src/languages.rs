// Language configuration management
// Loads languages.json and exposes per-language toolchains and resource limits

use crate::types::Language;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

pub const DEFAULT_LANGUAGES_PATH: &str = "config/languages.json";

/// Per-case resource limits for a language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageLimits {
    pub cpu_time_ms: u64,
    pub wall_time_ms: u64,
    pub memory_limit_mb: u64,
}

impl Default for LanguageLimits {
    fn default() -> Self {
        Self {
            cpu_time_ms: 2000,
            wall_time_ms: 5000,
            memory_limit_mb: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: Language,
    pub version: String,
    /// Docker image used by the container backend
    pub image: String,
    /// File name the source code is written to inside the sandbox
    pub source_file: String,
    /// Compile / syntax-check step; a non-zero exit is a compile error
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
    #[serde(default)]
    pub limits: LanguageLimits,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f32,
    /// Starter code shown in the editor
    #[serde(default)]
    pub template: String,
}

fn default_cpu_limit() -> f32 {
    0.5
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LanguagesJson {
    pub languages: Vec<LanguageConfig>,
}

const PYTHON_TEMPLATE: &str = r#"def solution():
    # Write your code here
    pass

# Don't modify below this line
if __name__ == "__main__":
    result = solution()
    print(result)"#;

const JAVA_TEMPLATE: &str = r#"public class Main {
    public static void solution() {
        // Write your code here
    }

    // Don't modify below this line
    public static void main(String[] args) {
        solution();
    }
}"#;

const RUST_TEMPLATE: &str = r#"use std::io::{self, Read};

fn solution(input: &str) -> String {
    // Write your code here
    input.trim().to_string()
}

fn main() {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input).unwrap();
    println!("{}", solution(&input));
}"#;

const BASH_TEMPLATE: &str = r#"#!/usr/bin/env bash
read -r line
# Write your code here
echo "$line""#;

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Built-in toolchains, used when no languages.json is present
pub fn builtin_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig {
            name: Language::Python,
            version: "3.12".to_string(),
            image: "python:3.12-slim".to_string(),
            source_file: "main.py".to_string(),
            compile: Some(argv(&["python3", "-m", "py_compile", "main.py"])),
            run: argv(&["python3", "-u", "main.py"]),
            limits: LanguageLimits::default(),
            cpu_limit: 0.5,
            template: PYTHON_TEMPLATE.to_string(),
        },
        LanguageConfig {
            name: Language::Java,
            version: "21".to_string(),
            image: "eclipse-temurin:21-jdk".to_string(),
            source_file: "Main.java".to_string(),
            compile: Some(argv(&["javac", "Main.java"])),
            run: argv(&[
                "java",
                "-Xmx256m",
                "-XX:CompressedClassSpaceSize=64m",
                "-XX:ReservedCodeCacheSize=64m",
                "-cp",
                ".",
                "Main",
            ]),
            limits: LanguageLimits {
                cpu_time_ms: 4000,
                wall_time_ms: 8000,
                memory_limit_mb: 1024,
            },
            cpu_limit: 1.0,
            template: JAVA_TEMPLATE.to_string(),
        },
        LanguageConfig {
            name: Language::Rust,
            version: "1.80".to_string(),
            image: "rust:1.80-slim".to_string(),
            source_file: "main.rs".to_string(),
            compile: Some(argv(&["rustc", "-O", "-o", "main", "main.rs"])),
            run: argv(&["./main"]),
            limits: LanguageLimits {
                cpu_time_ms: 2000,
                wall_time_ms: 5000,
                memory_limit_mb: 512,
            },
            cpu_limit: 1.0,
            template: RUST_TEMPLATE.to_string(),
        },
        LanguageConfig {
            name: Language::Bash,
            version: "5".to_string(),
            image: "bash:5".to_string(),
            source_file: "main.sh".to_string(),
            compile: Some(argv(&["bash", "-n", "main.sh"])),
            run: argv(&["bash", "main.sh"]),
            limits: LanguageLimits::default(),
            cpu_limit: 0.5,
            template: BASH_TEMPLATE.to_string(),
        },
    ]
}

/// Registry of configured languages
/// This is the authoritative source for which languages are enabled
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    configs: BTreeMap<Language, LanguageConfig>,
}

impl LanguageRegistry {
    pub fn new(languages: Vec<LanguageConfig>) -> Result<Self> {
        let mut configs = BTreeMap::new();
        for lang in languages {
            if lang.run.is_empty() {
                bail!("Language '{}' has an empty run command", lang.name);
            }
            if configs.insert(lang.name, lang).is_some() {
                bail!("Language configured twice in languages.json");
            }
        }

        if configs.is_empty() {
            bail!("No languages configured");
        }

        Ok(Self { configs })
    }

    pub fn builtin() -> Self {
        Self {
            configs: builtin_languages().into_iter().map(|c| (c.name, c)).collect(),
        }
    }

    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path).context("Failed to read languages.json")?;
        let languages_json: LanguagesJson =
            serde_json::from_str(&content).context("Failed to parse languages.json")?;

        Self::new(languages_json.languages)
    }

    /// Load from `path`, falling back to the built-in toolchains when the file is missing
    pub fn load_or_builtin(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(path = %path.display(), "languages.json not found, using built-in toolchains");
            Ok(Self::builtin())
        }
    }

    /// Keep only the given languages enabled
    pub fn restrict_to(mut self, enabled: &HashSet<Language>) -> Result<Self> {
        for lang in enabled {
            if !self.configs.contains_key(lang) {
                bail!("Language '{}' is enabled but not configured", lang);
            }
        }
        self.configs.retain(|lang, _| enabled.contains(lang));
        if self.configs.is_empty() {
            bail!("No languages enabled");
        }
        Ok(self)
    }

    /// Check if a language is enabled
    pub fn is_enabled(&self, language: Language) -> bool {
        self.configs.contains_key(&language)
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: Language) -> Result<&LanguageConfig> {
        self.configs
            .get(&language)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language))
    }

    /// List all enabled languages
    pub fn list_languages(&self) -> Vec<Language> {
        self.configs.keys().copied().collect()
    }

    pub fn configs(&self) -> impl Iterator<Item = &LanguageConfig> {
        self.configs.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_registry_has_every_language() {
        let registry = LanguageRegistry::builtin();
        for lang in Language::ALL {
            assert!(registry.is_enabled(lang));
            assert!(!registry.get_config(lang).unwrap().run.is_empty());
        }
    }

    #[test]
    fn test_shipped_languages_json_parses() {
        // Workspace config, relative to this crate
        let registry = LanguageRegistry::load(Path::new("../../config/languages.json")).unwrap();
        assert!(registry.is_enabled(Language::Python));
        assert!(registry.is_enabled(Language::Java));
        assert!(!registry.get_config(Language::Python).unwrap().template.is_empty());
    }

    #[test]
    fn test_load_rejects_duplicates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let python = serde_json::to_value(&builtin_languages()[0]).unwrap();
        let body = serde_json::json!({ "languages": [python.clone(), python] });
        write!(file, "{}", body).unwrap();

        assert!(LanguageRegistry::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_builtin() {
        let registry = LanguageRegistry::load_or_builtin(Path::new("/nonexistent/languages.json")).unwrap();
        assert_eq!(registry.list_languages().len(), Language::ALL.len());
    }

    #[test]
    fn test_restrict_to_enabled_set() {
        let enabled: HashSet<Language> = [Language::Python, Language::Bash].into_iter().collect();
        let registry = LanguageRegistry::builtin().restrict_to(&enabled).unwrap();

        assert!(registry.is_enabled(Language::Python));
        assert!(!registry.is_enabled(Language::Java));
        assert!(registry.get_config(Language::Java).is_err());
    }
}
