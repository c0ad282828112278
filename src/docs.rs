//! Markdown volumes as a stage runner.
//!
//! Each `.md` file under a volume directory is a page:
//!
//! - `prepare`: read the file and split off its front matter
//! - `parse`: render Markdown, collect headings and links to other pages
//! - `resolve`: check every page link and bring its target to `parse`
//! - `finalize` (whole volume): number pages and build the navigation
//! - `render`: fill the page template and write `<output>/<page>.html`

mod document;
mod markdown;
mod paths;
mod render;
mod source;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use pulldown_cmark::Options;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::engine::{
    Collection, CollectionId, Issue, PageId, Project, ProjectError, Stage, StageContext,
    StageError, StageOutput, StageRunner,
};
use crate::util::title_case;

pub use document::{FrontMatter, FrontMatterError, SourceDocument, parse_front_matter};
pub use markdown::{LinkRef, MarkdownError, MarkdownOutput, markdown_options, render_markdown};
pub use paths::{output_path, page_id, relative_url, resolve_link};
pub use render::{NavLink, PageContext, RenderError, Renderer, TocEntry};
pub use source::{SourceError, Volume};

use render::{PageInfo, ProjectContext, VolumeContext};

#[derive(thiserror::Error, Debug)]
pub enum DocsError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Markdown(#[from] MarkdownError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Project(#[from] ProjectError),
}

// =============================================================================
// Payloads
// =============================================================================

/// What a page carries out of each stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PageData {
    Prepared(SourceDocument),
    Parsed(ParsedPage),
    Resolved(Vec<PageLink>),
    Rendered(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPage {
    pub title: String,
    pub description: Option<String>,
    pub hidden: bool,
    pub html: String,
    pub toc: Vec<TocEntry>,
    /// Links to other pages; lines are relative to the source file
    pub links: Vec<LinkRef>,
    pub extra: HashMap<String, serde_json::Value>,
}

/// A link checked during `resolve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLink {
    pub href: String,
    pub target: PageId,
    pub title: String,
}

/// The numbered table of contents of a volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeIndex {
    pub title: String,
    pub entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub page: PageId,
    pub title: String,
    /// `None` for hidden pages
    pub number: Option<u32>,
}

// =============================================================================
// Runner
// =============================================================================

pub struct DocsRunner {
    project_name: String,
    output_dir: PathBuf,
    options: Options,
    renderer: Renderer,
    volumes: HashMap<CollectionId, Volume>,
}

impl DocsRunner {
    /// Discover every configured volume and build the runner together with
    /// the project it runs over. Relative paths resolve against `base_path`.
    pub fn load(config: &Config, base_path: &Path) -> Result<(Self, Project), DocsError> {
        let options = markdown_options(&config.markdown)?;
        let template = config
            .project
            .template
            .as_ref()
            .map(|template| base_path.join(template));
        let renderer = Renderer::new(template.as_deref())?;

        let mut volumes = HashMap::new();
        let mut collections = Vec::new();
        for volume_config in &config.volumes {
            let volume = Volume::discover(volume_config.clone(), base_path)?;
            let id = CollectionId::new(volume.name());
            tracing::debug!(volume = %id, pages = volume.pages.len(), "discovered volume");

            collections.push(Collection::new(
                id.clone(),
                volume.page_ids(),
                config.volume_fingerprint(volume_config),
            ));
            volumes.insert(id, volume);
        }
        let project = Project::new(collections)?;

        let runner = Self {
            project_name: config.project.name.clone(),
            output_dir: base_path.join(&config.project.output),
            options,
            renderer,
            volumes,
        };
        Ok((runner, project))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn locate(&self, page: &PageId) -> Result<(&Volume, PathBuf), StageError> {
        let (name, relative) = paths::split_page_id(page)
            .ok_or_else(|| anyhow::anyhow!("malformed page id '{page}'"))?;
        let volume = self
            .volumes
            .get(&CollectionId::new(name))
            .ok_or_else(|| anyhow::anyhow!("page '{page}' belongs to no volume"))?;
        Ok((volume, volume.source_path(relative)))
    }

    async fn read_source(&self, page: &PageId) -> Result<Vec<u8>, StageError> {
        let (_, path) = self.locate(page)?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(bytes)
    }

    async fn prepare(&self, page: &PageId) -> Result<StageOutput<PageData>, StageError> {
        let bytes = self.read_source(page).await?;
        let source = String::from_utf8(bytes).with_context(|| format!("'{page}' is not UTF-8"))?;

        match parse_front_matter(&source) {
            Ok(document) => Ok(StageOutput::ok(PageData::Prepared(document))),
            Err(error) => {
                let mut issue = Issue::new("front-matter", error.to_string()).with_page(page.clone());
                if let Some(line) = error.line {
                    issue = issue.with_line(line);
                }
                Ok(StageOutput::with_issues(
                    PageData::Prepared(SourceDocument::plain(&source)),
                    vec![issue],
                ))
            }
        }
    }

    fn parse(&self, page: &PageId, ctx: &StageContext<Self>) -> Result<StageOutput<PageData>, StageError> {
        let document = match ctx.page_payload(page, Stage::Prepare) {
            Some(PageData::Prepared(document)) => document,
            _ => return Err(missing_payload(page, Stage::Prepare)),
        };
        let output = render_markdown(&document.body, self.options);

        let front_matter = document.front_matter;
        let title = front_matter
            .title
            .or_else(|| output.toc.first().map(|entry| entry.text.clone()))
            .unwrap_or_else(|| file_title(page));
        let links = output
            .links
            .into_iter()
            .map(|link| LinkRef {
                line: link.line + document.body_line - 1,
                ..link
            })
            .collect();

        Ok(StageOutput::ok(PageData::Parsed(ParsedPage {
            title,
            description: front_matter.description,
            hidden: front_matter.hidden,
            html: output.html,
            toc: output.toc,
            links,
            extra: front_matter.extra,
        })))
    }

    async fn resolve(
        &self,
        page: &PageId,
        ctx: &StageContext<Self>,
    ) -> Result<StageOutput<PageData>, StageError> {
        let parsed = parsed_page(ctx, page)?;

        let mut links = Vec::new();
        let mut issues = Vec::new();
        for link in &parsed.links {
            let target = resolve_link(page, &link.href).filter(|target| ctx.project().contains(target));
            let Some(target) = target else {
                issues.push(
                    Issue::new(
                        "broken-link",
                        format!("link to '{}' does not match any page", link.href),
                    )
                    .with_page(page.clone())
                    .with_line(link.line),
                );
                continue;
            };

            if target != *page {
                ctx.require(&target, Stage::Parse).await?;
            }
            let title = parsed_page(ctx, &target)?.title;
            links.push(PageLink {
                href: link.href.clone(),
                target,
                title,
            });
        }

        Ok(StageOutput::with_issues(PageData::Resolved(links), issues))
    }

    fn finalize(
        &self,
        collection: &Collection,
        ctx: &StageContext<Self>,
    ) -> Result<StageOutput<VolumeIndex>, StageError> {
        let volume = self
            .volumes
            .get(collection.id())
            .ok_or_else(|| anyhow::anyhow!("no volume named '{}'", collection.id()))?;

        let mut entries = Vec::new();
        let mut issues = Vec::new();
        let mut outputs: HashMap<String, &PageId> = HashMap::new();
        let mut number = 0;

        for page in collection.pages() {
            let parsed = parsed_page(ctx, page)?;

            match outputs.entry(paths::html_path(page)) {
                Entry::Occupied(first) => issues.push(
                    Issue::new(
                        "duplicate-output",
                        format!("'{page}' and '{}' both render to {}", first.get(), first.key()),
                    )
                    .with_page(page.clone()),
                ),
                Entry::Vacant(slot) => {
                    slot.insert(page);
                }
            }

            let page_number = (!parsed.hidden).then(|| {
                number += 1;
                number
            });
            entries.push(IndexEntry {
                page: page.clone(),
                title: parsed.title,
                number: page_number,
            });
        }

        Ok(StageOutput::with_issues(
            VolumeIndex {
                title: volume.config.title(),
                entries,
            },
            issues,
        ))
    }

    async fn render(
        &self,
        page: &PageId,
        ctx: &StageContext<Self>,
    ) -> Result<StageOutput<PageData>, StageError> {
        let parsed = parsed_page(ctx, page)?;
        let (volume, _) = self.locate(page)?;
        let volume_id = CollectionId::new(volume.name());
        let index = ctx
            .collection_payload(&volume_id)
            .ok_or_else(|| anyhow::anyhow!("volume '{volume_id}' has no index"))?;

        let nav: Vec<NavLink> = index
            .entries
            .iter()
            .filter_map(|entry| {
                Some(NavLink {
                    title: entry.title.clone(),
                    url: relative_url(page, &entry.page),
                    number: entry.number?,
                    current: entry.page == *page,
                })
            })
            .collect();
        let position = nav.iter().position(|link| link.current);
        let prev = position
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| nav.get(i))
            .cloned();
        let next = position.and_then(|i| nav.get(i + 1)).cloned();
        let number = index
            .entries
            .iter()
            .find(|entry| entry.page == *page)
            .and_then(|entry| entry.number);

        let context = PageContext {
            project: ProjectContext {
                name: self.project_name.clone(),
            },
            volume: VolumeContext {
                name: volume.name().to_string(),
                title: index.title.clone(),
            },
            page: PageInfo {
                title: parsed.title,
                description: parsed.description,
                number,
                extra: parsed.extra,
            },
            content: parsed.html,
            nav,
            toc: parsed.toc,
            prev,
            next,
        };
        let html = self
            .renderer
            .render_page(&context)
            .with_context(|| format!("rendering '{page}'"))?;

        let output = output_path(&self.output_dir, page);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&output, html)
            .await
            .with_context(|| format!("writing {}", output.display()))?;
        tracing::debug!(%page, output = %output.display(), "wrote page");

        Ok(StageOutput::ok(PageData::Rendered(output)))
    }
}

#[async_trait]
impl StageRunner for DocsRunner {
    type PagePayload = PageData;
    type CollectionPayload = VolumeIndex;

    async fn run_page_stage(
        &self,
        stage: Stage,
        page: &PageId,
        ctx: &StageContext<Self>,
    ) -> Result<StageOutput<PageData>, StageError> {
        match stage {
            Stage::Prepare => self.prepare(page).await,
            Stage::Parse => self.parse(page, ctx),
            Stage::Resolve => self.resolve(page, ctx).await,
            Stage::Render => self.render(page, ctx).await,
            other => Err(anyhow::anyhow!("{other} is not a page stage").into()),
        }
    }

    async fn run_collection_stage(
        &self,
        stage: Stage,
        collection: &Collection,
        ctx: &StageContext<Self>,
    ) -> Result<StageOutput<VolumeIndex>, StageError> {
        match stage {
            Stage::Finalize => self.finalize(collection, ctx),
            other => Err(anyhow::anyhow!("{other} is not a volume stage").into()),
        }
    }

    async fn cache_inputs(
        &self,
        stage: Stage,
        page: &PageId,
        ctx: &StageContext<Self>,
    ) -> Option<Vec<Vec<u8>>> {
        let source = self.read_source(page).await.ok()?;
        match stage {
            Stage::Prepare | Stage::Parse => Some(vec![source]),
            Stage::Resolve => {
                let parsed = parsed_page(ctx, page).ok()?;
                let mut inputs = vec![source, page_list(ctx)];
                for link in &parsed.links {
                    if let Some(target) = resolve_link(page, &link.href)
                        && ctx.project().contains(&target)
                    {
                        inputs.push(self.read_source(&target).await.ok()?);
                    }
                }
                Some(inputs)
            }
            _ => None,
        }
    }
}

fn parsed_page(ctx: &StageContext<DocsRunner>, page: &PageId) -> Result<ParsedPage, StageError> {
    match ctx.page_payload(page, Stage::Parse) {
        Some(PageData::Parsed(parsed)) => Ok(parsed),
        _ => Err(missing_payload(page, Stage::Parse)),
    }
}

fn missing_payload(page: &PageId, stage: Stage) -> StageError {
    anyhow::anyhow!("no {stage} output for '{page}'").into()
}

/// Every page id of the project, one per line.
fn page_list(ctx: &StageContext<DocsRunner>) -> Vec<u8> {
    ctx.project()
        .pages()
        .map(PageId::as_str)
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

fn file_title(page: &PageId) -> String {
    Path::new(page.as_str())
        .file_stem()
        .and_then(|s| s.to_str())
        .map(title_case)
        .unwrap_or_else(|| "Untitled".to_string())
}

#[cfg(test)]
mod tests;
