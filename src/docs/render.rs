use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

const PAGE_TEMPLATE: &str = "page.html";

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>{{ page.title }} - {{ volume.title }} - {{ project.name }}</title>
  {% if page.description %}<meta name="description" content="{{ page.description }}">{% endif %}
</head>
<body>
  <nav>
    <p class="volume">{{ volume.title }}</p>
    <ol>
    {% for link in nav %}
      <li{% if link.current %} class="current"{% endif %}><a href="{{ link.url }}">{{ link.number }}. {{ link.title }}</a></li>
    {% endfor %}
    </ol>
  </nav>
  <main>
    {{ content | safe }}
  </main>
  <footer>
    {% if prev %}<a rel="prev" href="{{ prev.url }}">{{ prev.title }}</a>{% endif %}
    {% if next %}<a rel="next" href="{{ next.url }}">{{ next.title }}</a>{% endif %}
  </footer>
</body>
</html>
"#;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("template not found: {0}")]
    TemplateNotFound(String),
}

/// The page renderer, wrapping Tera.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    /// Load the page template from `template`, or use the built-in one.
    pub fn new(template: Option<&Path>) -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        match template {
            Some(path) => {
                if !path.is_file() {
                    return Err(RenderError::TemplateNotFound(path.display().to_string()));
                }
                tera.add_template_file(path, Some(PAGE_TEMPLATE))?;
            }
            None => tera.add_raw_template(PAGE_TEMPLATE, DEFAULT_TEMPLATE)?,
        }
        Ok(Self { tera })
    }

    /// Render a page with the given context.
    pub fn render_page(&self, context: &PageContext) -> Result<String, RenderError> {
        let mut tera_context = Context::new();
        tera_context.insert("project", &context.project);
        tera_context.insert("volume", &context.volume);
        tera_context.insert("page", &context.page);
        tera_context.insert("content", &context.content);
        tera_context.insert("nav", &context.nav);
        tera_context.insert("toc", &context.toc);
        tera_context.insert("prev", &context.prev);
        tera_context.insert("next", &context.next);

        Ok(self.tera.render(PAGE_TEMPLATE, &tera_context)?)
    }
}

/// Context passed to the page template.
#[derive(Debug, Serialize)]
pub struct PageContext {
    pub project: ProjectContext,
    pub volume: VolumeContext,
    pub page: PageInfo,
    pub content: String,
    pub nav: Vec<NavLink>,
    /// Table of contents for the current page
    pub toc: Vec<TocEntry>,
    pub prev: Option<NavLink>,
    pub next: Option<NavLink>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectContext {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeContext {
    pub name: String,
    pub title: String,
}

/// Information about the current page.
#[derive(Debug, Serialize)]
pub struct PageInfo {
    pub title: String,
    pub description: Option<String>,
    /// Position in the volume, absent for hidden pages
    pub number: Option<u32>,
    /// Custom front matter fields (flattened to top level, e.g., `page.author`)
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A single navigation link.
#[derive(Debug, Clone, Serialize)]
pub struct NavLink {
    pub title: String,
    pub url: String,
    pub number: u32,
    /// Whether this link is the page being rendered
    pub current: bool,
}

/// A table of contents entry for the current page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    /// The heading text
    pub text: String,
    /// The heading id (for anchor links)
    pub id: String,
    /// The heading level (1-6)
    pub level: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(number: u32, title: &str, current: bool) -> NavLink {
        NavLink {
            title: title.into(),
            url: format!("{}.html", title.to_lowercase()),
            number,
            current,
        }
    }

    fn context() -> PageContext {
        PageContext {
            project: ProjectContext {
                name: "Manual".into(),
            },
            volume: VolumeContext {
                name: "guide".into(),
                title: "User Guide".into(),
            },
            page: PageInfo {
                title: "Setup <fast>".into(),
                description: None,
                number: Some(2),
                extra: HashMap::new(),
            },
            content: "<p>Hello</p>".into(),
            nav: vec![link(1, "Intro", false), link(2, "Setup", true)],
            toc: vec![],
            prev: Some(link(1, "Intro", false)),
            next: None,
        }
    }

    #[test]
    fn test_render_default_template() {
        let renderer = Renderer::new(None).unwrap();
        let html = renderer.render_page(&context()).unwrap();

        assert!(html.contains("<title>Setup &lt;fast&gt; - User Guide - Manual</title>"));
        assert!(html.contains("<p>Hello</p>"));
        assert!(html.contains("<li class=\"current\">"));
        assert!(html.contains("2. Setup"));
        assert!(html.contains("rel=\"prev\""));
        assert!(!html.contains("rel=\"next\""));
    }

    #[test]
    fn test_render_custom_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "{{ page.number }}|{{ page.title }}|{{ content | safe }}").unwrap();

        let renderer = Renderer::new(Some(&path)).unwrap();
        let html = renderer.render_page(&context()).unwrap();

        assert_eq!(html, "2|Setup &lt;fast&gt;|<p>Hello</p>");
    }

    #[test]
    fn test_missing_template() {
        let result = Renderer::new(Some(Path::new("/no/such/template.html")));
        assert!(matches!(result, Err(RenderError::TemplateNotFound(_))));
    }
}
