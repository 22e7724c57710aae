//! Crawl and execution lifecycle states.
//!
//! `Created -> Launched -> {Finished, Stopped, Error}`. A crawl is reused by
//! every execution of its observatory, so a terminal crawl may be launched
//! again; a launched one may not.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unrecognized status '{0}'")]
pub struct ParseStatusError(pub String);

/// Lifecycle state of a single crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Created,
    Launched,
    Finished,
    Stopped,
    Error,
}

/// The operations that move a crawl between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlAction {
    Launch,
    Finish,
    Stop,
    Fail,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Created => "created",
            CrawlStatus::Launched => "launched",
            CrawlStatus::Finished => "finished",
            CrawlStatus::Stopped => "stopped",
            CrawlStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CrawlStatus::Finished | CrawlStatus::Stopped | CrawlStatus::Error
        )
    }

    /// The state reached by applying `action`, or `None` if the transition is
    /// not allowed from here.
    pub fn apply(self, action: CrawlAction) -> Option<CrawlStatus> {
        match (self, action) {
            (status, CrawlAction::Launch) if status == CrawlStatus::Created || status.is_terminal() => {
                Some(CrawlStatus::Launched)
            }
            (CrawlStatus::Launched, CrawlAction::Finish) => Some(CrawlStatus::Finished),
            (CrawlStatus::Launched, CrawlAction::Stop) => Some(CrawlStatus::Stopped),
            (CrawlStatus::Launched, CrawlAction::Fail) => Some(CrawlStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrawlStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(CrawlStatus::Created),
            "launched" => Ok(CrawlStatus::Launched),
            "finished" => Ok(CrawlStatus::Finished),
            "stopped" => Ok(CrawlStatus::Stopped),
            "error" => Ok(CrawlStatus::Error),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl fmt::Display for CrawlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrawlAction::Launch => "launch",
            CrawlAction::Finish => "finish",
            CrawlAction::Stop => "stop",
            CrawlAction::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of an observatory execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Launched,
    Finished,
    Stopped,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Launched => "launched",
            ExecutionStatus::Finished => "finished",
            ExecutionStatus::Stopped => "stopped",
            ExecutionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "launched" => Ok(ExecutionStatus::Launched),
            "finished" => Ok(ExecutionStatus::Finished),
            "stopped" => Ok(ExecutionStatus::Stopped),
            "error" => Ok(ExecutionStatus::Error),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_allowed_from_created_and_terminal_states() {
        for from in [
            CrawlStatus::Created,
            CrawlStatus::Finished,
            CrawlStatus::Stopped,
            CrawlStatus::Error,
        ] {
            assert_eq!(from.apply(CrawlAction::Launch), Some(CrawlStatus::Launched));
        }
        assert_eq!(CrawlStatus::Launched.apply(CrawlAction::Launch), None);
    }

    #[test]
    fn test_only_launched_crawls_can_end() {
        assert_eq!(
            CrawlStatus::Launched.apply(CrawlAction::Finish),
            Some(CrawlStatus::Finished)
        );
        assert_eq!(
            CrawlStatus::Launched.apply(CrawlAction::Stop),
            Some(CrawlStatus::Stopped)
        );
        assert_eq!(
            CrawlStatus::Launched.apply(CrawlAction::Fail),
            Some(CrawlStatus::Error)
        );
        assert_eq!(CrawlStatus::Created.apply(CrawlAction::Finish), None);
        assert_eq!(CrawlStatus::Finished.apply(CrawlAction::Stop), None);
        assert_eq!(CrawlStatus::Stopped.apply(CrawlAction::Fail), None);
    }

    #[test]
    fn test_status_string_round_trip() {
        for s in ["created", "launched", "finished", "stopped", "error"] {
            assert_eq!(s.parse::<CrawlStatus>().unwrap().as_str(), s);
        }
        assert!("running".parse::<CrawlStatus>().is_err());
        assert!("created".parse::<ExecutionStatus>().is_err());
    }
}
