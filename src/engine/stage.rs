//! Processing stages and their ordering.
//!
//! Pages move forward through a fixed sequence of stages. Three terminal
//! values mark a page that will never progress again; they sort after every
//! working stage so `stage >= X` reads as "already past X".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Loaded into the project, nothing done yet
    Init,
    /// Source read and front matter extracted
    Prepare,
    /// Content parsed into its intermediate form
    Parse,
    /// Cross-page references resolved
    Resolve,
    /// Collection-wide step (numbering, navigation), run once per collection
    Finalize,
    /// Output written
    Render,
    /// The page itself could not complete a stage
    Failed,
    /// A page this one required could not complete
    DependencyFailed,
    /// The collection barrier could not be satisfied
    CollectionFailed,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown stage '{0}' (expected one of: init, prepare, parse, resolve, finalize, render)")]
pub struct ParseStageError(String);

impl Stage {
    /// Working stages in processing order.
    pub const PIPELINE: [Stage; 6] = [
        Stage::Init,
        Stage::Prepare,
        Stage::Parse,
        Stage::Resolve,
        Stage::Finalize,
        Stage::Render,
    ];

    /// The stage that runs once per collection behind a barrier.
    pub const SHARED: Stage = Stage::Finalize;

    /// The stage every page of a collection must reach before `SHARED` runs.
    pub const BARRIER: Stage = Stage::Resolve;

    /// The final working stage.
    pub const LAST: Stage = Stage::Render;

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Stage::Failed | Stage::DependencyFailed | Stage::CollectionFailed
        )
    }

    pub fn is_shared(self) -> bool {
        self == Self::SHARED
    }

    /// The working stage immediately before this one.
    ///
    /// `None` for `Init` and for terminal values.
    pub fn previous(self) -> Option<Stage> {
        let index = Self::PIPELINE.iter().position(|s| *s == self)?;
        index.checked_sub(1).map(|i| Self::PIPELINE[i])
    }

    /// The working stage immediately after this one.
    pub fn next(self) -> Option<Stage> {
        let index = Self::PIPELINE.iter().position(|s| *s == self)?;
        Self::PIPELINE.get(index + 1).copied()
    }

    /// Stages strictly after `from`, up to and including `to`.
    ///
    /// Empty when `from >= to` or when either end is terminal, which gives
    /// "ensure at least" semantics to callers walking the result.
    pub fn range(from: Stage, to: Stage) -> impl Iterator<Item = Stage> {
        let usable = !from.is_terminal() && !to.is_terminal();
        Self::PIPELINE
            .into_iter()
            .filter(move |s| usable && *s > from && *s <= to)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Prepare => "prepare",
            Stage::Parse => "parse",
            Stage::Resolve => "resolve",
            Stage::Finalize => "finalize",
            Stage::Render => "render",
            Stage::Failed => "failed",
            Stage::DependencyFailed => "dependency_failed",
            Stage::CollectionFailed => "collection_failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ParseStageError;

    /// Only working stages can be named; terminal values are never a target.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::PIPELINE
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_is_exclusive_inclusive() {
        let stages: Vec<_> = Stage::range(Stage::Prepare, Stage::Finalize).collect();
        assert_eq!(stages, vec![Stage::Parse, Stage::Resolve, Stage::Finalize]);
    }

    #[test]
    fn test_range_empty_when_already_there() {
        assert_eq!(Stage::range(Stage::Resolve, Stage::Resolve).count(), 0);
        assert_eq!(Stage::range(Stage::Render, Stage::Parse).count(), 0);
    }

    #[test]
    fn test_range_from_terminal_is_empty() {
        assert_eq!(Stage::range(Stage::Failed, Stage::Render).count(), 0);
        assert_eq!(Stage::range(Stage::Init, Stage::DependencyFailed).count(), 0);
    }

    #[test]
    fn test_terminal_sorts_after_working_stages() {
        for stage in Stage::PIPELINE {
            assert!(stage < Stage::Failed);
            assert!(stage < Stage::DependencyFailed);
            assert!(stage < Stage::CollectionFailed);
        }
        assert!(Stage::Init < Stage::Prepare);
        assert!(Stage::Finalize < Stage::Render);
    }

    #[test]
    fn test_previous_and_next() {
        assert_eq!(Stage::SHARED.previous(), Some(Stage::BARRIER));
        assert_eq!(Stage::Init.previous(), None);
        assert_eq!(Stage::Render.next(), None);
        assert_eq!(Stage::Parse.next(), Some(Stage::Resolve));
        assert_eq!(Stage::Failed.previous(), None);
    }

    #[test]
    fn test_parse_stage_names() {
        assert_eq!("render".parse::<Stage>(), Ok(Stage::Render));
        assert_eq!(" Resolve ".parse::<Stage>(), Ok(Stage::Resolve));
        assert!("failed".parse::<Stage>().is_err());
        assert!("compile".parse::<Stage>().is_err());
    }
}
