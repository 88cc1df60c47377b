use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// BuildKind
// ---------------------------------------------------------------------------

/// The sampling mode requested for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildKind {
    AllValid,
    AllCurrent,
    TWise,
    Random,
    Integration,
}

impl BuildKind {
    pub fn all() -> &'static [BuildKind] {
        &[
            BuildKind::AllValid,
            BuildKind::AllCurrent,
            BuildKind::TWise,
            BuildKind::Random,
            BuildKind::Integration,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildKind::AllValid => "all_valid",
            BuildKind::AllCurrent => "all_current",
            BuildKind::TWise => "t_wise",
            BuildKind::Random => "random",
            BuildKind::Integration => "integration",
        }
    }

    /// Infix used when every variant is materialized as its own project:
    /// `<project><separator><index>`.
    pub fn project_separator(self) -> &'static str {
        match self {
            BuildKind::AllValid => "-variant-",
            BuildKind::AllCurrent => "-config-",
            BuildKind::TWise => "-twise-",
            BuildKind::Random => "-random-",
            BuildKind::Integration => "-integration-",
        }
    }

    /// Human-readable job title.
    pub fn job_title(self) -> &'static str {
        match self {
            BuildKind::AllValid => "Build all valid configurations",
            BuildKind::AllCurrent => "Build all current configurations",
            BuildKind::TWise => "Build t-wise configurations",
            BuildKind::Random => "Build random configurations",
            BuildKind::Integration => "Build integration configurations",
        }
    }
}

impl fmt::Display for BuildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildKind {
    type Err = crate::error::ProdlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all_valid" | "all-valid" => Ok(BuildKind::AllValid),
            "all_current" | "all-current" | "current" => Ok(BuildKind::AllCurrent),
            "t_wise" | "t-wise" | "twise" => Ok(BuildKind::TWise),
            "random" => Ok(BuildKind::Random),
            "integration" => Ok(BuildKind::Integration),
            _ => Err(crate::error::ProdlineError::UnknownBuildKind(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// BuildOrder
// ---------------------------------------------------------------------------

/// Ordering policy name as it appears in config files and on the command line.
/// Combined with the interaction strength it becomes a
/// [`crate::buffer::OrderingPolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOrder {
    #[default]
    Default,
    Dissimilarity,
    Interaction,
}

impl BuildOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildOrder::Default => "default",
            BuildOrder::Dissimilarity => "dissimilarity",
            BuildOrder::Interaction => "interaction",
        }
    }
}

impl fmt::Display for BuildOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildOrder {
    type Err = crate::error::ProdlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(BuildOrder::Default),
            "dissimilarity" => Ok(BuildOrder::Dissimilarity),
            "interaction" => Ok(BuildOrder::Interaction),
            _ => Err(crate::error::ProdlineError::UnknownOrderingPolicy(
                s.to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle of the producer task.
///
/// Transitions: `NotStarted → Running → Cancelled | Finished`. Both terminal
/// states are final; see [`crate::job::SharedStatus`] for the enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    Running,
    Cancelled,
    Finished,
}

impl JobStatus {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Running => 1,
            Self::Cancelled => 2,
            Self::Finished => 3,
        }
    }

    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Cancelled,
            3 => Self::Finished,
            _ => Self::NotStarted,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished)
    }
}

// ---------------------------------------------------------------------------
// WorkerState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Building,
    Terminated,
}

impl WorkerState {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Building => 1,
            Self::Terminated => 2,
        }
    }

    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Building,
            2 => Self::Terminated,
            _ => Self::Idle,
        }
    }
}

// ---------------------------------------------------------------------------
// BuildOutcome
// ---------------------------------------------------------------------------

/// Result of building one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildOutcome {
    Success,
    Failed { reason: String },
    Skipped { reason: String },
}

impl BuildOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildOutcome::Success => f.write_str("success"),
            BuildOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            BuildOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_kind_parse_accepts_both_spellings() {
        assert_eq!("all-valid".parse::<BuildKind>().unwrap(), BuildKind::AllValid);
        assert_eq!("t_wise".parse::<BuildKind>().unwrap(), BuildKind::TWise);
        for kind in BuildKind::all() {
            assert_eq!(kind.as_str().parse::<BuildKind>().unwrap(), *kind);
        }
    }

    #[test]
    fn unknown_build_kind_is_an_error() {
        let err = "everything".parse::<BuildKind>().unwrap_err();
        assert!(err.to_string().contains("everything"));
    }

    #[test]
    fn separators_are_distinct() {
        let mut seps: Vec<_> = BuildKind::all()
            .iter()
            .map(|k| k.project_separator())
            .collect();
        seps.sort();
        seps.dedup();
        assert_eq!(seps.len(), BuildKind::all().len());
    }

    #[test]
    fn job_status_u8_roundtrip() {
        for status in [
            JobStatus::NotStarted,
            JobStatus::Running,
            JobStatus::Cancelled,
            JobStatus::Finished,
        ] {
            assert_eq!(JobStatus::from_u8(status.as_u8()), status);
        }
        assert!(JobStatus::Finished.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn build_outcome_yaml_tagged() {
        let outcome = BuildOutcome::failed("exit code 1");
        let yaml = serde_yaml::to_string(&outcome).unwrap();
        assert!(yaml.contains("type: failed"));
        let parsed: BuildOutcome = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, outcome);
    }
}
