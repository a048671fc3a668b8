// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request parameter validation and normalization.
//!
//! Everything that feeds a fingerprint is normalized here so that requests
//! meaning the same thing digest the same way: runtime environments get a
//! fixed shape, constraints are parsed into a sorted list and library usage
//! reports have their lists sorted.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use url::Url;

// ============================================================================
// Application stack
// ============================================================================

/// Requirements of a Python application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationStack {
    /// Direct requirements (Pipfile or requirements.in).
    pub requirements: String,
    /// Pinned requirements (Pipfile.lock or requirements.txt).
    #[serde(default)]
    pub requirements_lock: Option<String>,
    /// Format of the requirement files.
    #[serde(default = "default_requirements_format")]
    pub requirements_format: String,
}

fn default_requirements_format() -> String {
    "pipenv".to_string()
}

const REQUIREMENTS_FORMATS: &[&str] = &["pipenv", "pip", "pip-tools"];

impl ApplicationStack {
    /// Parse the `application_stack` body field.
    pub fn parse(value: Option<Value>, require_lock: bool) -> Result<Self, String> {
        let value = match value {
            None | Some(Value::Null) => return Err("application_stack is required".to_string()),
            Some(value) => value,
        };

        let stack: ApplicationStack = serde_json::from_value(value).map_err(|e| e.to_string())?;

        if stack.requirements.trim().is_empty() {
            return Err("requirements must not be empty".to_string());
        }
        if require_lock
            && stack
                .requirements_lock
                .as_deref()
                .is_none_or(|lock| lock.trim().is_empty())
        {
            return Err("requirements_lock is required".to_string());
        }
        if !REQUIREMENTS_FORMATS.contains(&stack.requirements_format.as_str()) {
            return Err(format!(
                "unknown requirements format '{}'",
                stack.requirements_format
            ));
        }

        Ok(stack)
    }
}

// ============================================================================
// Runtime environment
// ============================================================================

/// Operating system of a runtime environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatingSystem {
    /// Distribution name.
    #[serde(default)]
    pub name: Option<String>,
    /// Distribution version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Hardware of a runtime environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hardware {
    /// CPU family id.
    #[serde(default)]
    pub cpu_family: Option<u32>,
    /// CPU model id.
    #[serde(default)]
    pub cpu_model: Option<u32>,
    /// GPU model.
    #[serde(default)]
    pub gpu_model: Option<String>,
}

/// Environment an application stack runs in.
///
/// Unknown fields are rejected. Serializes with every field present so that
/// omitted and explicitly-null fields digest the same.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(missing_docs)]
pub struct RuntimeEnvironment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub operating_system: Option<OperatingSystem>,
    #[serde(default)]
    pub hardware: Option<Hardware>,
    #[serde(default)]
    pub python_version: Option<String>,
    #[serde(default)]
    pub cuda_version: Option<String>,
    #[serde(default)]
    pub base_image: Option<String>,
    #[serde(default)]
    pub cudnn_version: Option<String>,
    #[serde(default)]
    pub mkl_version: Option<String>,
    #[serde(default)]
    pub openblas_version: Option<String>,
    #[serde(default)]
    pub openmpi_version: Option<String>,
}

impl RuntimeEnvironment {
    /// Parse the `runtime_environment` body field; absent means empty.
    pub fn parse(value: Option<Value>) -> Result<Self, String> {
        let parsed = match value {
            None | Some(Value::Null) => RuntimeEnvironment::default(),
            Some(value) => serde_json::from_value(value).map_err(|e| e.to_string())?,
        };
        Ok(parsed.normalized())
    }

    fn normalized(mut self) -> Self {
        self.operating_system.get_or_insert_with(OperatingSystem::default);
        self.hardware.get_or_insert_with(Hardware::default);
        self
    }
}

// ============================================================================
// Constraints
// ============================================================================

/// A version constraint on one package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Constraint {
    /// Normalized package name.
    pub package_name: String,
    /// Version specifier, `*` when any version is allowed.
    pub version: String,
}

fn constraint_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*((?:===|==|!=|~=|<=|>=|<|>)\s*[A-Za-z0-9.*+!_-]+(?:\s*,\s*(?:===|==|!=|~=|<=|>=|<|>)\s*[A-Za-z0-9.*+!_-]+)*)?$",
        )
        .expect("constraint pattern is a valid regex")
    })
}

/// Normalize a package name: lower case, runs of `-`, `_` and `.` become `-`.
pub fn normalize_package_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            separator = true;
            continue;
        }
        if separator && !normalized.is_empty() {
            normalized.push('-');
        }
        separator = false;
        normalized.push(c.to_ascii_lowercase());
    }
    normalized
}

/// Parse constraints, one per line. Blank lines and `#` comments are skipped.
/// The result is sorted by package name.
pub fn parse_constraints(raw: &str) -> Result<Vec<Constraint>, String> {
    let mut seen = BTreeSet::new();
    let mut constraints = Vec::new();

    for (number, line) in raw.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let captures = constraint_pattern()
            .captures(line)
            .ok_or_else(|| format!("failed to parse constraint on line {}: {:?}", number + 1, line))?;

        let package_name = normalize_package_name(&captures[1]);
        let version = captures
            .get(2)
            .map(|m| m.as_str().split_whitespace().collect::<String>())
            .unwrap_or_else(|| "*".to_string());

        if !seen.insert(package_name.clone()) {
            return Err(format!(
                "multiple constraints for package {:?} found",
                package_name
            ));
        }
        constraints.push(Constraint {
            package_name,
            version,
        });
    }

    constraints.sort();
    Ok(constraints)
}

// ============================================================================
// Library usage, enums, URLs
// ============================================================================

/// Sort every list in the `report` of a library usage document.
pub fn normalize_library_usage(library_usage: Option<Value>) -> Option<Value> {
    let mut library_usage = library_usage?;

    if let Some(report) = library_usage
        .get_mut("report")
        .and_then(Value::as_object_mut)
    {
        for usage in report.values_mut() {
            if let Value::Array(items) = usage {
                items.sort_by_key(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
        }
    }

    Some(library_usage)
}

/// Kind of advice requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationType {
    /// Latest versions.
    Latest,
    /// Stable versions.
    Stable,
    /// Versions suitable for testing.
    Testing,
    /// Versions with the best performance.
    Performance,
    /// Versions without known vulnerabilities.
    Security,
}

impl RecommendationType {
    /// Parse a query value, case-insensitively.
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.to_ascii_lowercase().as_str() {
            "latest" => Ok(Self::Latest),
            "stable" => Ok(Self::Stable),
            "testing" => Ok(Self::Testing),
            "performance" => Ok(Self::Performance),
            "security" => Ok(Self::Security),
            _ => Err(format!("Unknown recommendation type '{}'", raw)),
        }
    }
}

/// Upper-case a source type; empty values count as absent.
pub fn normalize_source_type(source_type: Option<&str>) -> Option<String> {
    source_type
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_uppercase)
}

/// Validate a callback target: an absolute http(s) URL with a host.
pub fn validate_callback_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid callback URL {:?}: {}", raw, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("callback URL scheme must be http or https, got {:?}", url.scheme()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(format!("callback URL {:?} has no host", raw));
    }
    Ok(url)
}

const GITHUB_HOSTS: &[&str] = &["github.com", "www.github.com"];

/// Validate a GitHub project URL (`https://github.com/<org>/<repo>`).
/// Trailing slashes are stripped from the returned URL.
pub fn parse_project_url(raw: &str) -> Result<String, String> {
    let project_url = raw.trim().trim_end_matches('/');
    let url = Url::parse(project_url).map_err(|_| "Error processing project_url".to_string())?;

    let segments: Vec<&str> = url.path().trim_start_matches('/').split('/').collect();
    if segments.len() != 2 || segments.iter().any(|s| s.is_empty()) {
        return Err("project_url path does not have a length of 2".to_string());
    }
    if !url.host_str().is_some_and(|host| GITHUB_HOSTS.contains(&host)) {
        return Err("project url is not from github.com".to_string());
    }

    Ok(project_url.to_string())
}
