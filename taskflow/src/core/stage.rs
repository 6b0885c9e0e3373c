//! Task lifecycle stages and the legal transition graph.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Position of a task in its lifecycle.
///
/// `Pending` is the sole entry stage; `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Assigned,
    InProgress,
    Review,
    Done,
    Failed,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Pending,
        Stage::Assigned,
        Stage::InProgress,
        Stage::Review,
        Stage::Done,
        Stage::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    ///
    /// `Review -> Assigned` is the only backward edge (bounded rework after a
    /// rejected review); nothing leaves a terminal stage.
    pub fn can_transition(self, to: Stage) -> bool {
        use Stage::{Assigned, Done, Failed, InProgress, Pending, Review};
        matches!(
            (self, to),
            (Pending, Assigned)
                | (Assigned, InProgress)
                | (InProgress, Review)
                | (InProgress, Done)
                | (Review, Done)
                | (Review, Assigned)
                | (Assigned | InProgress | Review, Failed)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|stage| {
                stage.as_str() == normalized || stage.as_str().replace('_', "") == normalized
            })
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}
