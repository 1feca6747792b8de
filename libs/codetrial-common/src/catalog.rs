// Test catalog: the mock tests a submission can reference by id

use crate::types::{Difficulty, TestCase, TestDefinition};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use uuid::Uuid;

pub const DEFAULT_TESTS_PATH: &str = "config/tests.json";
pub const DEFAULT_DURATION_MINUTES: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TestValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("duration must be at least one minute")]
    InvalidDuration,
    #[error("at least one test case is required")]
    NoTestCases,
    #[error("test case {0} needs both an input and an expected output")]
    IncompleteTestCase(usize),
    #[error("test '{0}' already exists")]
    DuplicateId(String),
}

/// Body of a "create test" request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewTest {
    pub title: String,
    pub description: String,
    pub function_name: String,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    pub test_cases: Vec<TestCase>,
}

impl NewTest {
    /// Check every field and build a definition with a fresh id
    pub fn validate(self) -> Result<TestDefinition, TestValidationError> {
        if self.title.trim().is_empty() {
            return Err(TestValidationError::MissingField("title"));
        }
        if self.description.trim().is_empty() {
            return Err(TestValidationError::MissingField("description"));
        }
        if self.function_name.trim().is_empty() {
            return Err(TestValidationError::MissingField("function_name"));
        }

        let duration_minutes = self.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
        if duration_minutes == 0 {
            return Err(TestValidationError::InvalidDuration);
        }

        if self.test_cases.is_empty() {
            return Err(TestValidationError::NoTestCases);
        }
        if let Some(idx) = self
            .test_cases
            .iter()
            .position(|tc| tc.input.trim().is_empty() || tc.expected_output.trim().is_empty())
        {
            return Err(TestValidationError::IncompleteTestCase(idx));
        }

        Ok(TestDefinition {
            id: Uuid::new_v4().to_string(),
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            function_name: self.function_name.trim().to_string(),
            duration_minutes,
            difficulty: self.difficulty.unwrap_or(Difficulty::Easy),
            test_cases: self.test_cases,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TestsJson {
    tests: Vec<TestDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct TestCatalog {
    tests: BTreeMap<String, TestDefinition>,
}

impl TestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the seed catalog from tests.json
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let parsed: TestsJson = serde_json::from_str(&content).context("Failed to parse tests.json")?;

        let mut catalog = Self::new();
        for test in parsed.tests {
            catalog
                .insert(test)
                .context("Invalid entry in tests.json")?;
        }
        Ok(catalog)
    }

    /// Empty catalog when the file is missing
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(path = %path.display(), "tests.json not found, starting with an empty catalog");
            Ok(Self::new())
        }
    }

    pub fn insert(&mut self, test: TestDefinition) -> Result<(), TestValidationError> {
        if self.tests.contains_key(&test.id) {
            return Err(TestValidationError::DuplicateId(test.id));
        }
        if test.duration_minutes == 0 {
            return Err(TestValidationError::InvalidDuration);
        }
        if test.test_cases.is_empty() {
            return Err(TestValidationError::NoTestCases);
        }
        self.tests.insert(test.id.clone(), test);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&TestDefinition> {
        self.tests.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &TestDefinition> {
        self.tests.values()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}
