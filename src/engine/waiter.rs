//! The waiter: drives pages through their stages.
//!
//! `ensure_stage(page, target)` walks a page forward one stage at a time.
//! Each stage's work goes through a single-flight table, so however many
//! callers ask for the same page and stage, the runner does it once and
//! everyone sees the same outcome. The collection-wide stage is keyed by
//! collection instead of page and sits behind a barrier: every page of the
//! collection must first reach [`Stage::BARRIER`].
//!
//! Page state lives here and only changes inside the waiter. A page's stage
//! only moves forward, or jumps once into a terminal failure state where it
//! stays for the rest of the run.
//!
//! Every `require` made by a running stage is recorded as an edge of a
//! wait-for graph. A request that would close a loop in that graph is
//! refused with [`StageError::Cycle`] instead of waiting forever.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use super::cache::{Cache, CacheKey};
use super::error::{
    AggregateError, EnsureAllError, EnsureError, FailureCause, Issue, StageError,
};
use super::memo::Memoizer;
use super::model::{Collection, CollectionId, PageId, Project};
use super::runner::{StageContext, StageOutput, StageRequest, StageRunner};
use super::stage::Stage;

type Outcome<P> = Result<StageOutput<P>, StageError>;

/// Running stage -> the stages it is blocked on.
type WaitGraph = HashMap<StageRequest, Vec<StageRequest>>;

/// A page's runtime state, as seen from outside the waiter.
#[derive(Debug, Clone)]
pub struct PageStatus {
    pub stage: Stage,
    /// Issues collected by the stage that failed the page
    pub issues: Vec<Issue>,
    /// The terminal error, once the page has one
    pub failure: Option<EnsureError>,
}

impl PageStatus {
    fn new() -> Self {
        Self {
            stage: Stage::Init,
            issues: Vec::new(),
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.failure.is_some()
    }
}

struct WaiterInner<R: StageRunner> {
    runner: R,
    project: Project,
    cache: Cache,
    pages: Mutex<HashMap<PageId, PageStatus>>,
    page_work: Memoizer<(PageId, Stage), Outcome<R::PagePayload>>,
    collection_work: Memoizer<(CollectionId, Stage), Outcome<R::CollectionPayload>>,
    waits: Mutex<WaitGraph>,
}

/// Drives pages of a project through their stages. Cheap to clone.
pub struct Waiter<R: StageRunner> {
    inner: Arc<WaiterInner<R>>,
}

impl<R: StageRunner> Clone for Waiter<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

type SiblingTasks = Vec<(PageId, JoinHandle<Result<(), EnsureError>>)>;

impl<R: StageRunner> Waiter<R> {
    /// Every page of `project` starts at `Stage::Init`.
    pub fn new(runner: R, project: Project, cache: Cache) -> Self {
        let pages = project
            .pages()
            .map(|page| (page.clone(), PageStatus::new()))
            .collect();

        Self {
            inner: Arc::new(WaiterInner {
                runner,
                project,
                cache,
                pages: Mutex::new(pages),
                page_work: Memoizer::new(),
                collection_work: Memoizer::new(),
                waits: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn project(&self) -> &Project {
        &self.inner.project
    }

    pub fn runner(&self) -> &R {
        &self.inner.runner
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    pub fn status(&self, page: &PageId) -> Option<PageStatus> {
        self.inner.pages.lock().get(page).cloned()
    }

    pub fn stage_of(&self, page: &PageId) -> Option<Stage> {
        self.inner.pages.lock().get(page).map(|status| status.stage)
    }

    /// Payload a page produced at `stage`, if that stage has finished.
    pub fn page_payload(&self, page: &PageId, stage: Stage) -> Option<R::PagePayload> {
        self.inner
            .page_work
            .peek(&(page.clone(), stage))?
            .ok()
            .map(|output| output.payload)
    }

    /// Payload of a collection's shared stage, if it has finished.
    pub fn collection_payload(&self, collection: &CollectionId) -> Option<R::CollectionPayload> {
        self.inner
            .collection_work
            .peek(&(collection.clone(), Stage::SHARED))?
            .ok()
            .map(|output| output.payload)
    }

    /// Bring `page` to at least `target`.
    ///
    /// Returns immediately when the page is already there, and returns the
    /// page's terminal error when it has one, without retrying.
    pub fn ensure_stage(
        &self,
        page: &PageId,
        target: Stage,
    ) -> BoxFuture<'static, Result<(), EnsureError>> {
        self.ensure_with_chain(page.clone(), target, Vec::new())
    }

    pub(crate) fn ensure_with_chain(
        &self,
        page: PageId,
        target: Stage,
        chain: Vec<StageRequest>,
    ) -> BoxFuture<'static, Result<(), EnsureError>> {
        let waiter = self.clone();
        async move { waiter.drive(page, target, chain).await }.boxed()
    }

    /// Bring every page of a collection to `target`, letting each one reach
    /// its own final state before reporting all failures together.
    pub async fn ensure_all(
        &self,
        collection: &CollectionId,
        target: Stage,
    ) -> Result<(), EnsureAllError> {
        let Some(members) = self.inner.project.collection(collection) else {
            return Err(EnsureAllError::UnknownCollection(collection.clone()));
        };
        let results = join_all(
            members
                .pages()
                .iter()
                .map(|page| self.ensure_stage(page, target)),
        )
        .await;
        Ok(AggregateError::from_results(results)?)
    }

    /// `ensure_all` over every collection of the project.
    pub async fn ensure_project(&self, target: Stage) -> Result<(), AggregateError> {
        let results = join_all(
            self.inner
                .project
                .pages()
                .map(|page| self.ensure_stage(page, target)),
        )
        .await;
        AggregateError::from_results(results)
    }

    async fn drive(
        &self,
        page: PageId,
        target: Stage,
        chain: Vec<StageRequest>,
    ) -> Result<(), EnsureError> {
        let Some(collection) = self.inner.project.collection_of(&page) else {
            return Err(EnsureError::UnknownPage(page));
        };

        let current = self.current_stage(&page)?;
        if current == target {
            return Ok(());
        }
        let roadmap: Vec<Stage> = Stage::range(current, target).collect();

        // Get siblings moving now; they are only waited for at the barrier.
        let mut siblings = roadmap
            .contains(&Stage::SHARED)
            .then(|| self.start_siblings(collection, &page, &chain));

        for stage in roadmap {
            // Another caller may have failed this page meanwhile.
            self.current_stage(&page)?;

            if stage.is_shared() {
                if let Some(siblings) = siblings.take() {
                    self.await_barrier(collection, &page, siblings).await?;
                }
                let outcome = self.run_collection_stage(collection, stage, &chain).await;
                let outcome = outcome.map(|output| {
                    output
                        .issues
                        .into_iter()
                        .filter(|issue| issue.concerns(&page))
                        .collect()
                });
                self.settle(&page, stage, outcome)?;
            } else {
                let outcome = self.run_page_stage(&page, stage, &chain).await;
                self.settle(&page, stage, outcome.map(|output| output.issues))?;
            }
        }

        Ok(())
    }

    fn start_siblings(
        &self,
        collection: &Collection,
        page: &PageId,
        chain: &[StageRequest],
    ) -> SiblingTasks {
        let mut chain = chain.to_vec();
        chain.push(StageRequest::Collection {
            collection: collection.id().clone(),
            stage: Stage::SHARED,
        });

        self.barrier_pending(collection, page)
            .into_iter()
            .map(|sibling| {
                let task = tokio::spawn(self.ensure_with_chain(
                    sibling.clone(),
                    Stage::BARRIER,
                    chain.clone(),
                ));
                (sibling, task)
            })
            .collect()
    }

    /// Siblings of `page` still to be waited for at the barrier: those not
    /// yet there, and failed ones so the barrier sees their error.
    pub(super) fn barrier_pending(&self, collection: &Collection, page: &PageId) -> Vec<PageId> {
        let pages = self.inner.pages.lock();
        collection
            .pages()
            .iter()
            .filter(|sibling| *sibling != page)
            .filter(|sibling| {
                !pages.get(*sibling).is_some_and(|status| {
                    status.failure.is_none() && status.stage >= Stage::BARRIER
                })
            })
            .cloned()
            .collect()
    }

    /// Wait for every sibling to reach the barrier. A sibling that got past
    /// it and failed later does not block the collection.
    async fn await_barrier(
        &self,
        collection: &Collection,
        page: &PageId,
        siblings: SiblingTasks,
    ) -> Result<(), EnsureError> {
        let (ids, tasks): (Vec<_>, Vec<_>) = siblings.into_iter().unzip();
        let results = join_all(tasks).await;

        let blocked_by: Vec<PageId> = ids
            .into_iter()
            .zip(results)
            .filter_map(|(sibling, result)| match result {
                Ok(Ok(())) => None,
                Ok(Err(error)) if error.stage().is_some_and(|s| s > Stage::BARRIER) => None,
                Ok(Err(_)) => Some(sibling),
                Err(join_error) => {
                    tracing::error!(page = %sibling, error = %join_error, "sibling task aborted");
                    Some(sibling)
                }
            })
            .collect();

        if blocked_by.is_empty() {
            return Ok(());
        }

        Err(self.fail(
            page,
            EnsureError::CollectionFailed {
                page: page.clone(),
                collection: collection.id().clone(),
                stage: Stage::SHARED,
                blocked_by,
            },
        ))
    }

    async fn run_page_stage(
        &self,
        page: &PageId,
        stage: Stage,
        chain: &[StageRequest],
    ) -> Outcome<R::PagePayload> {
        let waiter = self.clone();
        let page = page.clone();
        let mut chain = chain.to_vec();
        chain.push(StageRequest::Page {
            page: page.clone(),
            stage,
        });

        self.inner
            .page_work
            .get((page.clone(), stage), move || async move {
                waiter.produce_page(page, stage, chain).await
            })
            .await
    }

    async fn produce_page(
        &self,
        page: PageId,
        stage: Stage,
        chain: Vec<StageRequest>,
    ) -> Outcome<R::PagePayload> {
        let ctx = StageContext::new(self.clone(), chain);

        let key = self.cache_key(&page, stage, &ctx).await;
        if let Some(key) = &key
            && let Some(payload) = self.load_cached(&page, stage, key).await
        {
            return Ok(StageOutput::ok(payload));
        }

        tracing::debug!(%page, %stage, "running stage");
        let output = self.inner.runner.run_page_stage(stage, &page, &ctx).await?;

        if let Some(key) = &key
            && output.is_clean()
        {
            self.store_cached(&page, stage, key, &output.payload).await;
        }
        Ok(output)
    }

    async fn run_collection_stage(
        &self,
        collection: &Collection,
        stage: Stage,
        chain: &[StageRequest],
    ) -> Outcome<R::CollectionPayload> {
        let waiter = self.clone();
        let id = collection.id().clone();
        let mut chain = chain.to_vec();
        chain.push(StageRequest::Collection {
            collection: id.clone(),
            stage,
        });

        self.inner
            .collection_work
            .get((id.clone(), stage), move || async move {
                waiter.produce_collection(id, stage, chain).await
            })
            .await
    }

    async fn produce_collection(
        &self,
        id: CollectionId,
        stage: Stage,
        chain: Vec<StageRequest>,
    ) -> Outcome<R::CollectionPayload> {
        let Some(collection) = self.inner.project.collection(&id) else {
            return Err(StageError::internal(anyhow::anyhow!(
                "unknown collection '{id}'"
            )));
        };
        let ctx = StageContext::new(self.clone(), chain);

        tracing::debug!(collection = %id, %stage, "running collection stage");
        self.inner
            .runner
            .run_collection_stage(stage, collection, &ctx)
            .await
    }

    // =========================================================================
    // Cache
    // =========================================================================

    async fn cache_key(&self, page: &PageId, stage: Stage, ctx: &StageContext<R>) -> Option<CacheKey> {
        if !self.inner.cache.is_enabled() {
            return None;
        }
        let collection = self.inner.project.collection_of(page)?;
        let inputs = self.inner.runner.cache_inputs(stage, page, ctx).await?;
        Some(CacheKey::new(collection.fingerprint(), page, stage, inputs))
    }

    async fn load_cached<T: DeserializeOwned>(
        &self,
        page: &PageId,
        stage: Stage,
        key: &CacheKey,
    ) -> Option<T> {
        match self.inner.cache.load(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(payload) => {
                    tracing::debug!(%page, %stage, "cache hit");
                    Some(payload)
                }
                Err(error) => {
                    tracing::warn!(%page, %stage, %error, "ignoring unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(%error, "cache lookup failed");
                None
            }
        }
    }

    async fn store_cached<T: Serialize>(&self, page: &PageId, stage: Stage, key: &CacheKey, payload: &T) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(%page, %stage, %error, "payload cannot be cached");
                return;
            }
        };
        if let Err(error) = self.inner.cache.store(key, &bytes).await {
            tracing::warn!(%error, "cache store failed");
        }
    }

    // =========================================================================
    // Wait-for graph
    // =========================================================================

    /// Record that the running stage `from` is about to wait for `page` to
    /// reach `target`. Fails with the loop when that wait could never end.
    ///
    /// The edge is removed when the returned guard is dropped.
    pub(crate) fn enter_wait(
        &self,
        from: &StageRequest,
        page: &PageId,
        target: Stage,
    ) -> Result<WaitGuard<R>, Vec<StageRequest>> {
        let targets = self.wait_targets(page, target);

        let mut waits = self.inner.waits.lock();
        if let Some(cycle) = self.find_wait_path(&waits, &targets, from) {
            return Err(cycle);
        }
        waits
            .entry(from.clone())
            .or_default()
            .extend(targets.iter().cloned());
        drop(waits);

        Ok(WaitGuard {
            waiter: self.clone(),
            from: from.clone(),
            targets,
        })
    }

    /// Every unit of work `page` has to get through to reach `target`.
    fn wait_targets(&self, page: &PageId, target: Stage) -> Vec<StageRequest> {
        let collection = self.inner.project.collection_of(page);
        Stage::range(Stage::Init, target)
            .filter_map(|stage| {
                if stage.is_shared() {
                    collection.map(|c| StageRequest::Collection {
                        collection: c.id().clone(),
                        stage,
                    })
                } else {
                    Some(StageRequest::Page {
                        page: page.clone(),
                        stage,
                    })
                }
            })
            .collect()
    }

    /// What `node` cannot finish without. Finished work waits on nothing; a
    /// pending shared stage waits on every member reaching the barrier.
    fn blocked_on(&self, node: &StageRequest, waits: &WaitGraph) -> Vec<StageRequest> {
        if self.is_finished(node) {
            return Vec::new();
        }
        let mut blocked_on = waits.get(node).cloned().unwrap_or_default();
        if let StageRequest::Collection { collection, .. } = node
            && let Some(collection) = self.inner.project.collection(collection)
        {
            for page in collection.pages() {
                blocked_on.extend(Stage::range(Stage::Init, Stage::BARRIER).map(|stage| {
                    StageRequest::Page {
                        page: page.clone(),
                        stage,
                    }
                }));
            }
        }
        blocked_on
    }

    fn is_finished(&self, node: &StageRequest) -> bool {
        match node {
            StageRequest::Page { page, stage } => {
                self.inner.page_work.is_finished(&(page.clone(), *stage))
            }
            StageRequest::Collection { collection, stage } => self
                .inner
                .collection_work
                .is_finished(&(collection.clone(), *stage)),
        }
    }

    /// A path `from -> targets.. -> from`, if one exists.
    fn find_wait_path(
        &self,
        waits: &WaitGraph,
        targets: &[StageRequest],
        from: &StageRequest,
    ) -> Option<Vec<StageRequest>> {
        let mut parents: HashMap<StageRequest, Option<StageRequest>> = HashMap::new();
        let mut stack = Vec::new();
        for target in targets {
            if !parents.contains_key(target) {
                parents.insert(target.clone(), None);
                stack.push(target.clone());
            }
        }

        while let Some(node) = stack.pop() {
            if &node == from {
                let mut path = vec![from.clone()];
                let mut cursor = parents.get(&node).cloned().flatten();
                while let Some(previous) = cursor {
                    cursor = parents.get(&previous).cloned().flatten();
                    path.push(previous);
                }
                path.push(from.clone());
                path.reverse();
                return Some(path);
            }
            for next in self.blocked_on(&node, waits) {
                if !parents.contains_key(&next) {
                    parents.insert(next.clone(), Some(node.clone()));
                    stack.push(next);
                }
            }
        }
        None
    }

    // =========================================================================
    // State transitions
    // =========================================================================

    /// The page's stage, or its terminal error.
    fn current_stage(&self, page: &PageId) -> Result<Stage, EnsureError> {
        let pages = self.inner.pages.lock();
        let status = pages
            .get(page)
            .ok_or_else(|| EnsureError::UnknownPage(page.clone()))?;
        match &status.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(status.stage),
        }
    }

    /// Apply the outcome of running `stage` for `page`.
    fn settle(
        &self,
        page: &PageId,
        stage: Stage,
        outcome: Result<Vec<Issue>, StageError>,
    ) -> Result<(), EnsureError> {
        let error = match outcome {
            Ok(issues) if issues.is_empty() => {
                self.advance(page, stage);
                return Ok(());
            }
            Ok(issues) => EnsureError::Failed {
                page: page.clone(),
                stage,
                cause: FailureCause::Issues(issues),
            },
            Err(StageError::Dependency(cause)) => EnsureError::DependencyFailed {
                page: page.clone(),
                stage,
                cause: Box::new(cause),
            },
            Err(cycle @ StageError::Cycle(_)) => EnsureError::Failed {
                page: page.clone(),
                stage,
                cause: FailureCause::Issues(vec![
                    Issue::new("dependency-cycle", cycle.to_string()).with_page(page.clone()),
                ]),
            },
            Err(StageError::Internal(error)) => EnsureError::Failed {
                page: page.clone(),
                stage,
                cause: FailureCause::Internal(error),
            },
        };

        Err(self.fail(page, error))
    }

    fn advance(&self, page: &PageId, stage: Stage) {
        let mut pages = self.inner.pages.lock();
        if let Some(status) = pages.get_mut(page)
            && status.failure.is_none()
            && status.stage < stage
        {
            tracing::debug!(%page, %stage, "stage complete");
            status.stage = stage;
        }
    }

    /// Move the page into the error's terminal state. The first terminal
    /// error wins; later ones are dropped in its favour.
    fn fail(&self, page: &PageId, error: EnsureError) -> EnsureError {
        let mut pages = self.inner.pages.lock();
        let Some(status) = pages.get_mut(page) else {
            return error;
        };
        if let Some(existing) = &status.failure {
            return existing.clone();
        }

        status.stage = error.terminal_stage();
        status.issues.extend(error.issues().iter().cloned());
        status.failure = Some(error.clone());
        tracing::debug!(%page, stage = %status.stage, %error, "page failed");
        error
    }
}

/// An edge of the wait-for graph, removed on drop.
pub(crate) struct WaitGuard<R: StageRunner> {
    waiter: Waiter<R>,
    from: StageRequest,
    targets: Vec<StageRequest>,
}

impl<R: StageRunner> Drop for WaitGuard<R> {
    fn drop(&mut self) {
        let mut waits = self.waiter.inner.waits.lock();
        let Some(edges) = waits.get_mut(&self.from) else {
            return;
        };
        for target in &self.targets {
            if let Some(index) = edges.iter().position(|edge| edge == target) {
                edges.swap_remove(index);
            }
        }
        let done = edges.is_empty();
        if done {
            waits.remove(&self.from);
        }
    }
}
