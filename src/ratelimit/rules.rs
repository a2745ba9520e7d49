//! Route class configuration and matching.
//!
//! This module handles loading and validating route classes from YAML. Each
//! class carries its own rate limit rule and an optional path prefix; the
//! class without a prefix catches every path the others do not match.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, WardenError};

/// A complete rate limit configuration containing the route classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Route classes, each with its own limiter
    #[serde(default = "default_classes")]
    pub classes: Vec<RouteClassConfig>,
}

/// Configuration for a single route class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteClassConfig {
    /// Class name, also used as the identifier namespace
    pub name: String,
    /// Path prefix this class applies to (if not set, this is the fallback class)
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// Rate limit to apply to this class
    pub rate_limit: RateLimitRule,
}

/// A rate limit rule specifying the limit and time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Number of requests allowed per window
    pub requests_per_unit: u64,
    /// The time unit
    pub unit: TimeUnit,
    /// How many units make one window
    #[serde(default = "default_unit_multiplier")]
    pub unit_multiplier: u32,
}

fn default_unit_multiplier() -> u32 {
    1
}

impl RateLimitRule {
    pub fn new(requests_per_unit: u64, unit: TimeUnit, unit_multiplier: u32) -> Self {
        Self {
            requests_per_unit,
            unit,
            unit_multiplier,
        }
    }

    /// Get the window length for this rule.
    pub fn window(&self) -> Duration {
        self.unit.duration() * self.unit_multiplier
    }
}

/// Time unit for rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// General traffic, API routes and authentication routes.
fn default_classes() -> Vec<RouteClassConfig> {
    vec![
        RouteClassConfig {
            name: "api".to_string(),
            path_prefix: Some("/api/".to_string()),
            rate_limit: RateLimitRule::new(50, TimeUnit::Minute, 1),
        },
        RouteClassConfig {
            name: "auth".to_string(),
            path_prefix: Some("/auth/".to_string()),
            rate_limit: RateLimitRule::new(5, TimeUnit::Minute, 15),
        },
        RouteClassConfig {
            name: "general".to_string(),
            path_prefix: None,
            rate_limit: RateLimitRule::new(100, TimeUnit::Minute, 1),
        },
    ]
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            classes: default_classes(),
        }
    }
}

impl RateLimitConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading route class configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateLimitConfig = serde_yaml::from_str(yaml).map_err(|e| {
            WardenError::Config(format!("Failed to parse route class config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check names are unique, limits non-zero, and exactly one fallback class exists.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut fallbacks = 0;

        for class in &self.classes {
            if class.name.is_empty() {
                return Err(WardenError::Config("route class name is empty".to_string()));
            }
            if class.name.contains(':') {
                return Err(WardenError::Config(format!(
                    "route class name '{}' must not contain ':'",
                    class.name
                )));
            }
            if !names.insert(class.name.as_str()) {
                return Err(WardenError::Config(format!(
                    "duplicate route class '{}'",
                    class.name
                )));
            }
            if class.rate_limit.requests_per_unit == 0 || class.rate_limit.unit_multiplier == 0 {
                return Err(WardenError::Config(format!(
                    "route class '{}' must allow at least one request per non-empty window",
                    class.name
                )));
            }
            if class.path_prefix.is_none() {
                fallbacks += 1;
            }
        }

        if fallbacks != 1 {
            return Err(WardenError::Config(format!(
                "expected exactly one route class without path_prefix, found {}",
                fallbacks
            )));
        }

        Ok(())
    }
}
