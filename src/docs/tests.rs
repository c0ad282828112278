//! End-to-end runs of the Markdown runner over a temporary volume.

use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use super::*;
use crate::engine::{BuildReport, Cache, EnsureError, Waiter};

struct Fixture {
    dir: TempDir,
    config: Config,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (path, content) in files {
            write(&dir.path().join("guide").join(path), content);
        }
        Self {
            dir,
            config: Config::starter("Manual"),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn output(&self, page: &str) -> PathBuf {
        self.root().join("_build/guide").join(page)
    }

    async fn build(&self, cache: Cache) -> Waiter<DocsRunner> {
        let (runner, project) = DocsRunner::load(&self.config, self.root()).unwrap();
        let waiter = Waiter::new(runner, project, cache);
        let _ = waiter.ensure_project(Stage::Render).await;
        waiter
    }
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn id(page: &str) -> PageId {
    PageId::new(format!("guide/{page}"))
}

const INTRO: &str = "---\ntitle: Welcome\n---\n# Intro heading\n\nHello.\n";
const SETUP: &str = "# Setup\n\nRead the [intro](intro.md) first.\n";
const DEEP: &str = "Deep page, back to [intro](../intro.md#top).\n";

#[tokio::test]
async fn test_build_writes_every_page() {
    let fixture = Fixture::new(&[
        ("intro.md", INTRO),
        ("setup.md", SETUP),
        ("start/deep.md", DEEP),
    ]);

    let waiter = fixture.build(Cache::disabled()).await;

    let report = BuildReport::collect(&waiter, Stage::Render);
    assert!(report.is_success(), "{report}");

    let setup = std::fs::read_to_string(fixture.output("setup.html")).unwrap();
    assert!(setup.contains("href=\"intro.html\""));
    assert!(setup.contains("1. Welcome"));
    assert!(setup.contains("2. Setup"));
    assert!(setup.contains("<li class=\"current\">"));

    let deep = std::fs::read_to_string(fixture.output("start/deep.html")).unwrap();
    assert!(deep.contains("href=\"../intro.html#top\""));
    assert!(deep.contains("3. Deep"));

    assert_eq!(
        waiter.page_payload(&id("setup.md"), Stage::Resolve),
        Some(PageData::Resolved(vec![PageLink {
            href: "intro.md".into(),
            target: id("intro.md"),
            title: "Welcome".into(),
        }]))
    );

    let index = waiter
        .collection_payload(&CollectionId::new("guide"))
        .unwrap();
    assert_eq!(index.title, "User Guide");
    let numbers: Vec<_> = index.entries.iter().map(|e| e.number).collect();
    assert_eq!(numbers, vec![Some(1), Some(2), Some(3)]);
}

#[tokio::test]
async fn test_broken_link_fails_the_page_and_blocks_the_volume() {
    let fixture = Fixture::new(&[
        ("intro.md", INTRO),
        ("setup.md", "# Setup\n\nSee [missing](nope.md).\n"),
    ]);

    let waiter = fixture.build(Cache::disabled()).await;

    let status = waiter.status(&id("setup.md")).unwrap();
    assert_eq!(status.stage, Stage::Failed);
    assert_eq!(status.issues.len(), 1);
    assert_eq!(status.issues[0].code, "broken-link");
    assert_eq!(status.issues[0].line, Some(3));

    assert_eq!(waiter.stage_of(&id("intro.md")), Some(Stage::CollectionFailed));
    assert!(!fixture.output("intro.html").exists());

    let report = BuildReport::collect(&waiter, Stage::Render);
    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.collection_failed.len(), 1);
}

#[tokio::test]
async fn test_invalid_front_matter_is_an_issue() {
    let fixture = Fixture::new(&[("intro.md", "---\ntitle: [oops\n---\n# Intro\n")]);

    let waiter = fixture.build(Cache::disabled()).await;

    let status = waiter.status(&id("intro.md")).unwrap();
    assert_eq!(status.stage, Stage::Failed);
    assert_eq!(status.issues[0].code, "front-matter");
    assert!(status.issues[0].line.is_some());
    assert!(matches!(
        status.failure,
        Some(EnsureError::Failed {
            stage: Stage::Prepare,
            ..
        })
    ));
}

#[tokio::test]
async fn test_linking_to_a_failed_page_is_a_dependency_failure() {
    let fixture = Fixture::new(&[
        ("intro.md", "---\ntitle: [oops\n---\n# Intro\n"),
        ("setup.md", SETUP),
    ]);

    let waiter = fixture.build(Cache::disabled()).await;

    let status = waiter.status(&id("setup.md")).unwrap();
    assert_eq!(status.stage, Stage::DependencyFailed);
    assert!(status.issues.is_empty());
    let failure = status.failure.unwrap();
    assert_eq!(failure.stage(), Some(Stage::Resolve));
    assert_eq!(failure.root_cause().page(), &id("intro.md"));
}

#[tokio::test]
async fn test_hidden_pages_are_not_numbered() {
    let fixture = Fixture::new(&[
        ("intro.md", INTRO),
        ("setup.md", "---\nhidden: true\n---\n# Setup\n"),
        ("start/deep.md", DEEP),
    ]);

    let waiter = fixture.build(Cache::disabled()).await;

    let index = waiter
        .collection_payload(&CollectionId::new("guide"))
        .unwrap();
    let numbers: Vec<_> = index.entries.iter().map(|e| e.number).collect();
    assert_eq!(numbers, vec![Some(1), None, Some(2)]);

    let setup = std::fs::read_to_string(fixture.output("setup.html")).unwrap();
    assert!(!setup.contains("class=\"current\""));
}

#[tokio::test]
async fn test_pages_rendering_to_the_same_file_are_reported() {
    let fixture = Fixture::new(&[("a.markdown", "# First\n"), ("a.md", "# Second\n")]);

    let waiter = fixture.build(Cache::disabled()).await;

    assert_eq!(waiter.stage_of(&id("a.markdown")), Some(Stage::Render));
    let status = waiter.status(&id("a.md")).unwrap();
    assert_eq!(status.stage, Stage::Failed);
    assert_eq!(status.issues[0].code, "duplicate-output");
}

#[tokio::test]
async fn test_unchanged_pages_come_from_the_cache() {
    let fixture = Fixture::new(&[("intro.md", INTRO), ("setup.md", SETUP)]);
    let cache_dir = fixture.root().join(".folio/cache");

    let first = fixture.build(Cache::open(&cache_dir).await.unwrap()).await;
    let stats = first.cache().stats();
    assert_eq!((stats.hits, stats.misses, stats.stores), (0, 6, 6));

    let second = fixture.build(Cache::open(&cache_dir).await.unwrap()).await;
    let stats = second.cache().stats();
    assert_eq!((stats.hits, stats.misses, stats.stores), (6, 0, 0));
    assert!(BuildReport::collect(&second, Stage::Render).is_success());
    assert!(fixture.output("setup.html").exists());

    // A new title for the link target invalidates the linking page's resolve.
    write(
        &fixture.root().join("guide/intro.md"),
        "---\ntitle: Start Here\n---\nHello.\n",
    );
    let third = fixture.build(Cache::open(&cache_dir).await.unwrap()).await;
    let stats = third.cache().stats();
    assert_eq!((stats.hits, stats.misses), (2, 4));
    assert_eq!(
        third.page_payload(&id("setup.md"), Stage::Resolve),
        Some(PageData::Resolved(vec![PageLink {
            href: "intro.md".into(),
            target: id("intro.md"),
            title: "Start Here".into(),
        }]))
    );
}

#[test]
fn test_load_rejects_missing_volume() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::starter("Manual");
    let result = DocsRunner::load(&config, dir.path());
    assert!(matches!(
        result,
        Err(DocsError::Source(SourceError::PathNotFound(_)))
    ));
}
