//! End-of-build summary: pages grouped by the state they finished in.

use std::fmt;

use super::cache::CacheStats;
use super::error::{EnsureError, FailureCause, Issue};
use super::model::{CollectionId, PageId};
use super::runner::StageRunner;
use super::stage::Stage;
use super::waiter::Waiter;

/// A page that failed on its own merits.
#[derive(Debug, Clone)]
pub struct FailedPage {
    pub page: PageId,
    pub stage: Stage,
    pub issues: Vec<Issue>,
    /// Full error chain when the failure was unexpected rather than declared
    pub internal: Option<String>,
}

/// A page that could not continue because something it needed failed.
#[derive(Debug, Clone)]
pub struct BlockedPage {
    pub page: PageId,
    pub stage: Stage,
    /// The page whose own failure started the chain
    pub root: PageId,
}

/// A page stopped at the collection barrier.
#[derive(Debug, Clone)]
pub struct CollectionBlockedPage {
    pub page: PageId,
    pub collection: CollectionId,
    pub stage: Stage,
    pub blocked_by: Vec<PageId>,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub target: Stage,
    pub completed: Vec<PageId>,
    /// Pages that neither failed nor reached the target
    pub incomplete: Vec<(PageId, Stage)>,
    pub failed: Vec<FailedPage>,
    pub blocked: Vec<BlockedPage>,
    pub collection_failed: Vec<CollectionBlockedPage>,
    pub cache: CacheStats,
}

impl BuildReport {
    /// Snapshot every page of the waiter's project.
    pub fn collect<R: StageRunner>(waiter: &Waiter<R>, target: Stage) -> Self {
        let mut report = Self {
            target,
            completed: Vec::new(),
            incomplete: Vec::new(),
            failed: Vec::new(),
            blocked: Vec::new(),
            collection_failed: Vec::new(),
            cache: waiter.cache().stats(),
        };

        for page in waiter.project().pages() {
            let Some(status) = waiter.status(page) else {
                continue;
            };

            let Some(failure) = status.failure else {
                if status.stage >= target {
                    report.completed.push(page.clone());
                } else {
                    report.incomplete.push((page.clone(), status.stage));
                }
                continue;
            };

            match &failure {
                EnsureError::Failed { stage, cause, .. } => report.failed.push(FailedPage {
                    page: page.clone(),
                    stage: *stage,
                    issues: status.issues,
                    internal: match cause {
                        FailureCause::Internal(error) => Some(format!("{error:?}")),
                        FailureCause::Issues(_) => None,
                    },
                }),
                EnsureError::DependencyFailed { stage, .. } => report.blocked.push(BlockedPage {
                    page: page.clone(),
                    stage: *stage,
                    root: failure.root_cause().page().clone(),
                }),
                EnsureError::CollectionFailed {
                    collection,
                    stage,
                    blocked_by,
                    ..
                } => report.collection_failed.push(CollectionBlockedPage {
                    page: page.clone(),
                    collection: collection.clone(),
                    stage: *stage,
                    blocked_by: blocked_by.clone(),
                }),
                EnsureError::UnknownPage(_) => report.failed.push(FailedPage {
                    page: page.clone(),
                    stage: status.stage,
                    issues: Vec::new(),
                    internal: Some(failure.to_string()),
                }),
            }
        }

        report
    }

    /// True when every page reached the target.
    pub fn is_success(&self) -> bool {
        self.failure_count() == 0 && self.incomplete.is_empty()
    }

    /// Pages in any terminal failure state.
    pub fn failure_count(&self) -> usize {
        self.failed.len() + self.blocked.len() + self.collection_failed.len()
    }

    /// Declared issues across all failed pages.
    pub fn issue_count(&self) -> usize {
        self.failed.iter().map(|f| f.issues.len()).sum()
    }

    pub fn page_count(&self) -> usize {
        self.completed.len() + self.incomplete.len() + self.failure_count()
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for failed in &self.failed {
            match &failed.internal {
                Some(internal) => {
                    writeln!(f, "error: {} (internal error at {})", failed.page, failed.stage)?;
                    for line in internal.lines() {
                        writeln!(f, "    {line}")?;
                    }
                }
                None => {
                    writeln!(f, "error: {} (at {})", failed.page, failed.stage)?;
                    for issue in &failed.issues {
                        writeln!(f, "  - {issue}")?;
                    }
                }
            }
        }

        for blocked in &self.blocked {
            writeln!(
                f,
                "blocked: {} (blocked by failures elsewhere, starting at {})",
                blocked.page, blocked.root
            )?;
        }

        for page in &self.collection_failed {
            let siblings: Vec<_> = page.blocked_by.iter().map(PageId::as_str).collect();
            writeln!(
                f,
                "blocked: {} (shared stage {} of '{}' could not run: {} failed)",
                page.page,
                page.stage,
                page.collection,
                siblings.join(", ")
            )?;
        }

        for (page, stage) in &self.incomplete {
            writeln!(f, "incomplete: {page} (stopped at {stage})")?;
        }

        write!(
            f,
            "{} of {} page(s) reached {}; {} failed ({} issue(s)); cache: {} hit(s), {} miss(es), {} stored",
            self.completed.len(),
            self.page_count(),
            self.target,
            self.failure_count(),
            self.issue_count(),
            self.cache.hits,
            self.cache.misses,
            self.cache.stores,
        )
    }
}
