use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStage {
    Downloading,
    Extracting,
    Configuring,
    Building,
    Installing,
    Done,
    Failed,
    Cancelled,
}

impl BuildStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    fn next(self) -> Option<Self> {
        match self {
            Self::Downloading => Some(Self::Extracting),
            Self::Extracting => Some(Self::Configuring),
            Self::Configuring => Some(Self::Building),
            Self::Building => Some(Self::Installing),
            Self::Installing => Some(Self::Done),
            Self::Done | Self::Failed | Self::Cancelled => None,
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Configuring => "configuring",
            Self::Building => "building",
            Self::Installing => "installing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Stages advance strictly one step at a time; `Failed` and `Cancelled` are
/// reachable from any non-terminal stage. Terminal stages are absorbing.
pub fn validate_transition(from: BuildStage, to: BuildStage) -> Result<(), CoreError> {
    let valid = !from.is_terminal()
        && (from.next() == Some(to) || matches!(to, BuildStage::Failed | BuildStage::Cancelled));

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
