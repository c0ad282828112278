//! Staged build engine.
//!
//! Pages move through a fixed sequence of [`Stage`]s. A [`Waiter`] drives
//! them on demand, running each stage at most once per page through a
//! single-flight [`Memoizer`], caching clean results in a content-addressed
//! [`Cache`], and holding the collection-wide stage behind a barrier until
//! every page of the collection is ready for it.
//!
//! What a stage actually does is up to the [`StageRunner`] plugged in.

mod cache;
mod error;
mod memo;
mod model;
mod report;
mod runner;
mod stage;
mod waiter;


pub use cache::{Cache, CacheError, CacheKey, CacheStats, engine_fingerprint};
pub use error::{AggregateError, EnsureAllError, EnsureError, FailureCause, Issue, StageError};
pub use memo::{Memoizer, Pending};
pub use model::{Collection, CollectionId, PageId, Project, ProjectError};
pub use report::{BlockedPage, BuildReport, CollectionBlockedPage, FailedPage};
pub use runner::{StageContext, StageOutput, StageRequest, StageRunner};
pub use stage::{ParseStageError, Stage};
pub use waiter::{PageStatus, Waiter};
