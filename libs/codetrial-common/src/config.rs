// Service configuration, read from CODETRIAL_* environment variables

use crate::catalog::DEFAULT_TESTS_PATH;
use crate::languages::DEFAULT_LANGUAGES_PATH;
use crate::types::Language;
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for {var}: '{value}' ({reason})")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxKind {
    Process,
    Docker,
}

impl FromStr for SandboxKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "process" | "local" => Ok(SandboxKind::Process),
            "docker" => Ok(SandboxKind::Docker),
            other => Err(format!("expected 'process' or 'docker', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub languages_path: PathBuf,
    pub tests_path: PathBuf,
    /// `None` enables every configured language
    pub enabled_languages: Option<HashSet<Language>>,
    pub max_concurrent_per_session: usize,
    pub worker_pool_size: usize,
    pub max_queued: usize,
    /// Deadline for tests without their own duration
    pub test_duration: Duration,
    pub output_limit_bytes: usize,
    pub result_retention: Duration,
    pub sandbox: SandboxKind,
    pub sandbox_root: PathBuf,
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            languages_path: PathBuf::from(DEFAULT_LANGUAGES_PATH),
            tests_path: PathBuf::from(DEFAULT_TESTS_PATH),
            enabled_languages: None,
            max_concurrent_per_session: 1,
            worker_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            max_queued: 256,
            test_duration: Duration::from_secs(30 * 60),
            output_limit_bytes: 64 * 1024,
            // Same 24h window results used to be kept for
            result_retention: Duration::from_secs(86_400),
            sandbox: SandboxKind::Process,
            sandbox_root: std::env::temp_dir().join("codetrial"),
            log_format: LogFormat::Text,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("CODETRIAL_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(path) = lookup("CODETRIAL_LANGUAGES_PATH") {
            config.languages_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("CODETRIAL_TESTS_PATH") {
            config.tests_path = PathBuf::from(path);
        }
        if let Some(list) = lookup("CODETRIAL_ENABLED_LANGUAGES") {
            config.enabled_languages = Some(parse_languages(&list)?);
        }
        if let Some(v) = lookup("CODETRIAL_MAX_CONCURRENT_PER_SESSION") {
            config.max_concurrent_per_session = parse_positive("CODETRIAL_MAX_CONCURRENT_PER_SESSION", &v)?;
        }
        if let Some(v) = lookup("CODETRIAL_WORKER_POOL_SIZE") {
            config.worker_pool_size = parse_positive("CODETRIAL_WORKER_POOL_SIZE", &v)?;
        }
        if let Some(v) = lookup("CODETRIAL_MAX_QUEUED") {
            config.max_queued = parse_positive("CODETRIAL_MAX_QUEUED", &v)?;
        }
        if let Some(v) = lookup("CODETRIAL_TEST_DURATION_SECS") {
            config.test_duration =
                Duration::from_secs(parse_positive("CODETRIAL_TEST_DURATION_SECS", &v)? as u64);
        }
        if let Some(v) = lookup("CODETRIAL_OUTPUT_LIMIT_BYTES") {
            config.output_limit_bytes = parse_positive("CODETRIAL_OUTPUT_LIMIT_BYTES", &v)?;
        }
        if let Some(v) = lookup("CODETRIAL_RESULT_RETENTION_SECS") {
            config.result_retention =
                Duration::from_secs(parse_positive("CODETRIAL_RESULT_RETENTION_SECS", &v)? as u64);
        }
        if let Some(v) = lookup("CODETRIAL_SANDBOX") {
            config.sandbox = v.parse::<SandboxKind>().map_err(|reason| ConfigError {
                var: "CODETRIAL_SANDBOX",
                value: v.clone(),
                reason,
            })?;
        }
        if let Some(path) = lookup("CODETRIAL_SANDBOX_ROOT") {
            config.sandbox_root = PathBuf::from(path);
        }
        if let Some(v) = lookup("CODETRIAL_LOG_FORMAT") {
            config.log_format = match v.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "pretty" => LogFormat::Text,
                _ => {
                    return Err(ConfigError {
                        var: "CODETRIAL_LOG_FORMAT",
                        value: v,
                        reason: "expected 'text' or 'json'".to_string(),
                    })
                }
            };
        }

        Ok(config)
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        Ok(_) => Err(ConfigError {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Err(e) => Err(ConfigError {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn parse_languages(list: &str) -> Result<HashSet<Language>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Language>().map_err(|e| ConfigError {
                var: "CODETRIAL_ENABLED_LANGUAGES",
                value: list.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.max_concurrent_per_session, 1);
        assert_eq!(config.test_duration, Duration::from_secs(1800));
        assert_eq!(config.sandbox, SandboxKind::Process);
        assert!(config.enabled_languages.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("CODETRIAL_MAX_CONCURRENT_PER_SESSION", "2"),
            ("CODETRIAL_WORKER_POOL_SIZE", "8"),
            ("CODETRIAL_TEST_DURATION_SECS", "90"),
            ("CODETRIAL_ENABLED_LANGUAGES", "python, java"),
            ("CODETRIAL_SANDBOX", "docker"),
            ("CODETRIAL_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.max_concurrent_per_session, 2);
        assert_eq!(config.worker_pool_size, 8);
        assert_eq!(config.test_duration, Duration::from_secs(90));
        assert_eq!(config.sandbox, SandboxKind::Docker);
        assert_eq!(config.log_format, LogFormat::Json);
        let enabled = config.enabled_languages.unwrap();
        assert!(enabled.contains(&Language::Python));
        assert!(enabled.contains(&Language::Java));
        assert_eq!(enabled.len(), 2);
    }

    #[test]
    fn test_rejects_zero_and_garbage() {
        let err = ServiceConfig::from_lookup(lookup(&[("CODETRIAL_WORKER_POOL_SIZE", "0")])).unwrap_err();
        assert_eq!(err.var, "CODETRIAL_WORKER_POOL_SIZE");

        assert!(ServiceConfig::from_lookup(lookup(&[("CODETRIAL_MAX_QUEUED", "lots")])).is_err());
        assert!(ServiceConfig::from_lookup(lookup(&[("CODETRIAL_ENABLED_LANGUAGES", "python,cobol")])).is_err());
        assert!(ServiceConfig::from_lookup(lookup(&[("CODETRIAL_SANDBOX", "vm")])).is_err());
    }
}
