//! Target specifiers of the form `project:target[:configuration]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TargetError {
    #[error("Invalid target '{0}': expected project:target[:configuration]")]
    Malformed(String),
}

/// A project target, optionally with a named configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub project: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TargetError::Malformed(s.to_string());
        let mut parts = s.split(':');
        let project = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        let target = parts.next().filter(|t| !t.is_empty()).ok_or_else(malformed)?;
        let configuration = match parts.next() {
            Some("") => return Err(malformed()),
            other => other.map(str::to_string),
        };
        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Target {
            project: project.to_string(),
            target: target.to_string(),
            configuration,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.target)?;
        if let Some(configuration) = &self.configuration {
            write!(f, ":{configuration}")?;
        }
        Ok(())
    }
}
