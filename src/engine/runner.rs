//! The interface stage implementations plug into.
//!
//! A [`StageRunner`] does the actual work of each stage (reading, parsing,
//! resolving, rendering). The waiter decides *when* that work runs and what
//! its outcome means; the runner only decides *what* it is.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::{EnsureError, Issue, StageError};
use super::model::{Collection, CollectionId, PageId, Project};
use super::stage::Stage;
use super::waiter::Waiter;

/// The result of one successful stage run: an opaque payload plus any
/// issues found along the way.
#[derive(Debug, Clone)]
pub struct StageOutput<P> {
    pub payload: P,
    pub issues: Vec<Issue>,
}

impl<P> StageOutput<P> {
    pub fn ok(payload: P) -> Self {
        Self {
            payload,
            issues: Vec::new(),
        }
    }

    pub fn with_issues(payload: P, issues: Vec<Issue>) -> Self {
        Self { payload, issues }
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[async_trait]
pub trait StageRunner: Send + Sync + Sized + 'static {
    /// What per-page stages produce.
    type PagePayload: Clone + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// What the collection-wide stage produces.
    type CollectionPayload: Clone + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// Run a per-page stage.
    ///
    /// May call [`StageContext::require`] to bring other pages forward first;
    /// a failure there should be returned with `?` so the waiter can tell it
    /// apart from this page's own problems.
    async fn run_page_stage(
        &self,
        stage: Stage,
        page: &PageId,
        ctx: &StageContext<Self>,
    ) -> Result<StageOutput<Self::PagePayload>, StageError>;

    /// Run the collection-wide stage. Called at most once per collection,
    /// after every page has completed the stage before it.
    async fn run_collection_stage(
        &self,
        stage: Stage,
        collection: &Collection,
        ctx: &StageContext<Self>,
    ) -> Result<StageOutput<Self::CollectionPayload>, StageError>;

    /// The content of everything a per-page stage reads, used to key the
    /// cache. `None` (the default) means the stage is never cached, which is
    /// right for stages with side effects.
    async fn cache_inputs(
        &self,
        _stage: Stage,
        _page: &PageId,
        _ctx: &StageContext<Self>,
    ) -> Option<Vec<Vec<u8>>> {
        None
    }
}

/// One link in the chain of requests that led to a stage run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StageRequest {
    Page { page: PageId, stage: Stage },
    Collection { collection: CollectionId, stage: Stage },
}

impl fmt::Display for StageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageRequest::Page { page, stage } => write!(f, "{page}@{stage}"),
            StageRequest::Collection { collection, stage } => {
                write!(f, "[{collection}]@{stage}")
            }
        }
    }
}

/// A stage runner's handle back into the waiter.
pub struct StageContext<R: StageRunner> {
    waiter: Waiter<R>,
    /// Requests that led here, outermost first; the last one is the stage
    /// this context was built for.
    chain: Vec<StageRequest>,
}

impl<R: StageRunner> StageContext<R> {
    pub(crate) fn new(waiter: Waiter<R>, chain: Vec<StageRequest>) -> Self {
        Self { waiter, chain }
    }

    pub fn project(&self) -> &Project {
        self.waiter.project()
    }

    /// The request being served.
    pub fn current(&self) -> Option<&StageRequest> {
        self.chain.last()
    }

    pub fn chain(&self) -> &[StageRequest] {
        &self.chain
    }

    /// Bring `page` to at least `stage` before continuing.
    ///
    /// Fails with [`StageError::Cycle`] when the request would wait on work
    /// that is itself waiting on this stage, whether through this request
    /// chain or through stages other callers have in flight.
    pub async fn require(&self, page: &PageId, stage: Stage) -> Result<(), StageError> {
        if self.would_cycle(page, stage) {
            let mut chain = self.chain.clone();
            chain.push(StageRequest::Page {
                page: page.clone(),
                stage,
            });
            return Err(StageError::Cycle(chain));
        }

        // Held until the wait is over.
        let _wait = match self.current() {
            Some(from) => Some(
                self.waiter
                    .enter_wait(from, page, stage)
                    .map_err(StageError::Cycle)?,
            ),
            None => None,
        };

        self.waiter
            .ensure_with_chain(page.clone(), stage, self.chain.clone())
            .await
            .map_err(|error| match error {
                EnsureError::UnknownPage(page) => {
                    StageError::internal(anyhow::anyhow!("required unknown page '{page}'"))
                }
                other => StageError::Dependency(other),
            })
    }

    /// Payload a page produced at `stage` in this run, if it got that far.
    pub fn page_payload(&self, page: &PageId, stage: Stage) -> Option<R::PagePayload> {
        self.waiter.page_payload(page, stage)
    }

    /// Payload of a collection's shared stage, once it has run.
    pub fn collection_payload(&self, collection: &CollectionId) -> Option<R::CollectionPayload> {
        self.waiter.collection_payload(collection)
    }

    pub fn stage_of(&self, page: &PageId) -> Option<Stage> {
        self.waiter.stage_of(page)
    }

    fn would_cycle(&self, page: &PageId, stage: Stage) -> bool {
        let project = self.waiter.project();
        let same_collection = |other: &PageId| {
            project
                .collection_of(other)
                .is_some_and(|c| c.contains(page))
        };

        self.chain.iter().any(|link| match link {
            // That stage is in flight and waiting on us.
            StageRequest::Page {
                page: running,
                stage: running_stage,
            } => {
                (running == page && *running_stage <= stage)
                    // The barrier would wait for `running` to get past a stage
                    // it is still busy with.
                    || (stage >= Stage::SHARED
                        && *running_stage < Stage::SHARED
                        && same_collection(running))
            }
            StageRequest::Collection {
                collection,
                stage: running_stage,
            } => {
                stage >= *running_stage
                    && project
                        .collection(collection)
                        .is_some_and(|c| c.contains(page))
            }
        })
    }
}
