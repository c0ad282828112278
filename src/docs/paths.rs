//! Page id, link and output path conversions.
//!
//! A page id is `<volume>/<path within the volume>` with `/` separators,
//! e.g. `guide/getting-started/install.md`. Output files mirror page ids
//! with an `.html` extension, so relative links between pages keep working
//! once rendered.

use std::path::{Path, PathBuf};

use crate::engine::PageId;

const PAGE_EXTENSIONS: [&str; 2] = ["md", "markdown"];

/// The id of the page at `relative` inside `volume`.
pub fn page_id(volume: &str, relative: &Path) -> PageId {
    let relative = relative.to_string_lossy().replace('\\', "/");
    PageId::new(format!("{volume}/{relative}"))
}

/// Split a page id into its volume name and volume-relative path.
pub fn split_page_id(page: &PageId) -> Option<(&str, &str)> {
    page.as_str().split_once('/')
}

/// Whether a file name looks like a Markdown page.
pub fn is_page_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| PAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Whether a link destination points at another page of the project.
///
/// Absolute URLs, root-relative paths and same-page anchors are not.
pub fn is_page_link(href: &str) -> bool {
    if href.contains("://") || href.starts_with("mailto:") || href.starts_with('/') {
        return false;
    }
    let path = strip_fragment(href);
    !path.is_empty() && is_page_file(Path::new(path))
}

/// Resolve a relative page link against the page it appears on.
///
/// Returns `None` when the link climbs above the project root.
pub fn resolve_link(from: &PageId, href: &str) -> Option<PageId> {
    let path = strip_fragment(href);
    if path.is_empty() {
        return None;
    }

    let mut segments: Vec<&str> = from.as_str().split('/').collect();
    segments.pop();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    // Needs at least a volume and a file.
    if segments.len() < 2 {
        return None;
    }
    Some(PageId::new(segments.join("/")))
}

/// Rewrite a page link to point at the rendered page.
///
/// ```ignore
/// link_to_html("setup.md#install") => "setup.html#install"
/// ```
pub fn link_to_html(href: &str) -> String {
    let path = strip_fragment(href);
    let suffix = &href[path.len()..];
    format!("{}{}", with_html_extension(path), suffix)
}

/// The page's rendered file, relative to the output directory.
pub fn html_path(page: &PageId) -> String {
    with_html_extension(page.as_str())
}

/// Where a page is written.
pub fn output_path(output_dir: &Path, page: &PageId) -> PathBuf {
    output_dir.join(html_path(page))
}

/// Link from the rendered `from` page to the rendered `to` page.
pub fn relative_url(from: &PageId, to: &PageId) -> String {
    let target = html_path(to);
    let from_dirs: Vec<&str> = from.as_str().split('/').collect();
    let from_dirs = &from_dirs[..from_dirs.len().saturating_sub(1)];
    let to_parts: Vec<&str> = target.split('/').collect();
    let to_dirs = &to_parts[..to_parts.len().saturating_sub(1)];

    let common = from_dirs
        .iter()
        .zip(to_dirs)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from_dirs.len() - common];
    parts.extend(&to_parts[common..]);
    parts.join("/")
}

fn strip_fragment(href: &str) -> &str {
    href.split(['#', '?']).next().unwrap_or(href)
}

fn with_html_extension(path: &str) -> String {
    let stem = match path.rsplit_once('.') {
        Some((stem, ext)) if PAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()) => stem,
        _ => path,
    };
    format!("{stem}.html")
}
