//! Issues and the failure taxonomy.
//!
//! Three kinds of failure are kept apart so reporting can separate a page's
//! own problems from noise caused elsewhere:
//!
//! - `Failed`: the page could not complete a stage on its own merits
//! - `DependencyFailed`: a page it required did not get where it needed to be
//! - `CollectionFailed`: a sibling broke before the collection-wide stage
//!
//! Every error here is `Clone`: a memoized outcome is handed to each waiter.

use std::fmt;
use std::sync::Arc;

use super::model::{CollectionId, PageId};
use super::runner::StageRequest;
use super::stage::Stage;

// =============================================================================
// Issues
// =============================================================================

/// A user-facing content problem, e.g. a broken link.
///
/// A page holding one or more issues after a stage has not completed that
/// stage, however cleanly the stage itself ran.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Issue {
    /// Page the issue belongs to. Collection stages use this to attribute
    /// issues; `None` means every page of the collection.
    pub page: Option<PageId>,
    /// Short machine-readable kind, e.g. `broken-link`
    pub code: String,
    pub message: String,
    /// 1-based source line, when known
    pub line: Option<u32>,
}

impl Issue {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            page: None,
            code: code.into(),
            message: message.into(),
            line: None,
        }
    }

    pub fn with_page(mut self, page: PageId) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Whether this issue applies to `page`.
    pub fn concerns(&self, page: &PageId) -> bool {
        self.page.as_ref().is_none_or(|p| p == page)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

// =============================================================================
// Errors raised by stage runners
// =============================================================================

/// What a stage runner can report besides a normal output.
#[derive(thiserror::Error, Debug, Clone)]
pub enum StageError {
    /// The stage asked for another page and that page failed.
    #[error(transparent)]
    Dependency(#[from] EnsureError),

    /// The stage asked for something that is already waiting on it.
    #[error("dependency cycle: {}", format_chain(.0))]
    Cycle(Vec<StageRequest>),

    /// Anything unexpected: I/O, bugs, broken invariants.
    #[error("{0:#}")]
    Internal(Arc<anyhow::Error>),
}

impl StageError {
    pub fn internal(error: impl Into<anyhow::Error>) -> Self {
        Self::Internal(Arc::new(error.into()))
    }
}

impl From<anyhow::Error> for StageError {
    fn from(error: anyhow::Error) -> Self {
        Self::Internal(Arc::new(error))
    }
}

fn format_chain(chain: &[StageRequest]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

// =============================================================================
// Errors returned by the waiter
// =============================================================================

/// Why a page failed on its own merits.
#[derive(Debug, Clone)]
pub enum FailureCause {
    /// Declared content problems.
    Issues(Vec<Issue>),
    /// An unexpected error from the stage runner; may be an engine bug.
    Internal(Arc<anyhow::Error>),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Issues(issues) if issues.len() == 1 => write!(f, "{}", issues[0]),
            FailureCause::Issues(issues) => write!(f, "{} issues", issues.len()),
            FailureCause::Internal(error) => write!(f, "internal error: {error:#}"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum EnsureError {
    #[error("'{page}' failed at {stage}: {cause}")]
    Failed {
        page: PageId,
        stage: Stage,
        cause: FailureCause,
    },

    #[error("'{page}' blocked at {stage}: {cause}")]
    DependencyFailed {
        page: PageId,
        stage: Stage,
        cause: Box<EnsureError>,
    },

    #[error(
        "'{page}' cannot run {stage} for '{collection}': blocked by {}",
        join_pages(.blocked_by)
    )]
    CollectionFailed {
        page: PageId,
        collection: CollectionId,
        stage: Stage,
        blocked_by: Vec<PageId>,
    },

    #[error("page '{0}' is not part of the project")]
    UnknownPage(PageId),
}

fn join_pages(pages: &[PageId]) -> String {
    pages
        .iter()
        .map(PageId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl EnsureError {
    pub fn page(&self) -> &PageId {
        match self {
            EnsureError::Failed { page, .. }
            | EnsureError::DependencyFailed { page, .. }
            | EnsureError::CollectionFailed { page, .. }
            | EnsureError::UnknownPage(page) => page,
        }
    }

    /// The stage the page was trying to complete when it failed.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EnsureError::Failed { stage, .. }
            | EnsureError::DependencyFailed { stage, .. }
            | EnsureError::CollectionFailed { stage, .. } => Some(*stage),
            EnsureError::UnknownPage(_) => None,
        }
    }

    /// The terminal stage this error puts a page into.
    pub fn terminal_stage(&self) -> Stage {
        match self {
            EnsureError::Failed { .. } | EnsureError::UnknownPage(_) => Stage::Failed,
            EnsureError::DependencyFailed { .. } => Stage::DependencyFailed,
            EnsureError::CollectionFailed { .. } => Stage::CollectionFailed,
        }
    }

    /// Follow `DependencyFailed` links to the error that started it.
    pub fn root_cause(&self) -> &EnsureError {
        let mut current = self;
        while let EnsureError::DependencyFailed { cause, .. } = current {
            current = cause;
        }
        current
    }

    /// Issues carried by a `Failed` error; empty for everything else.
    pub fn issues(&self) -> &[Issue] {
        match self {
            EnsureError::Failed {
                cause: FailureCause::Issues(issues),
                ..
            } => issues,
            _ => &[],
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            EnsureError::Failed {
                cause: FailureCause::Internal(_),
                ..
            }
        )
    }
}

/// Every failure from a fan-out, collected without stopping early.
#[derive(thiserror::Error, Debug, Clone, Default)]
#[error("{} page(s) did not complete", .errors.len())]
pub struct AggregateError {
    errors: Vec<EnsureError>,
}

impl AggregateError {
    /// `Ok` when no result failed, otherwise every failure in input order.
    pub fn from_results<I>(results: I) -> Result<(), AggregateError>
    where
        I: IntoIterator<Item = Result<(), EnsureError>>,
    {
        let errors: Vec<_> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AggregateError { errors })
        }
    }

    pub fn errors(&self) -> &[EnsureError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn failed_pages(&self) -> impl Iterator<Item = &PageId> {
        self.errors.iter().map(EnsureError::page)
    }
}

/// Why bringing a whole collection forward did not succeed.
#[derive(thiserror::Error, Debug, Clone)]
pub enum EnsureAllError {
    #[error("collection '{0}' is not part of the project")]
    UnknownCollection(CollectionId),

    #[error(transparent)]
    Incomplete(#[from] AggregateError),
}

impl EnsureAllError {
    /// Pages that did not complete; empty for an unknown collection.
    pub fn failed_pages(&self) -> impl Iterator<Item = &PageId> {
        let errors = match self {
            EnsureAllError::Incomplete(aggregate) => aggregate.errors(),
            EnsureAllError::UnknownCollection(_) => &[],
        };
        errors.iter().map(EnsureError::page)
    }
}

impl IntoIterator for AggregateError {
    type Item = EnsureError;
    type IntoIter = std::vec::IntoIter<EnsureError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}
