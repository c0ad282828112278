use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Front matter metadata parsed from the top of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    /// Page title (overrides the heading- or filename-derived title)
    pub title: Option<String>,
    /// Page description for previews
    pub description: Option<String>,
    /// Leave the page out of the volume navigation and numbering
    #[serde(default)]
    pub hidden: bool,
    /// Additional arbitrary metadata, available in templates as `page.*`
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A page's source split into front matter and Markdown body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub front_matter: FrontMatter,
    /// Markdown content without the front matter block
    pub body: String,
    /// 1-based line of the source file where `body` starts
    pub body_line: u32,
}

impl SourceDocument {
    /// The whole source as Markdown, without front matter.
    pub fn plain(source: &str) -> Self {
        Self {
            front_matter: FrontMatter::default(),
            body: source.to_string(),
            body_line: 1,
        }
    }
}

/// Front matter that is present but not valid YAML.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("invalid front matter: {message}")]
pub struct FrontMatterError {
    pub message: String,
    /// 1-based line in the source file, when known
    pub line: Option<u32>,
}

/// Parse front matter from a page's source.
///
/// Front matter is a YAML block delimited by `---` lines at the very start
/// of the file:
///
/// ```markdown
/// ---
/// title: My Page
/// description: A description
/// custom_field: custom value
/// ---
///
/// # Content starts here
/// ```
///
/// A source without an opening or closing delimiter is all Markdown.
pub fn parse_front_matter(source: &str) -> Result<SourceDocument, FrontMatterError> {
    let Some(rest) = source
        .strip_prefix("---\n")
        .or_else(|| source.strip_prefix("---\r\n"))
    else {
        return Ok(SourceDocument::plain(source));
    };

    let mut offset = 0;
    let mut line_no: u32 = 1;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let front_matter = parse_yaml(yaml)?;
            return Ok(SourceDocument {
                front_matter,
                body: body.to_string(),
                // Opening delimiter, `line_no - 1` YAML lines, closing delimiter.
                body_line: line_no + 2,
            });
        }
        offset += line.len();
        line_no += 1;
    }

    Ok(SourceDocument::plain(source))
}

fn parse_yaml(yaml: &str) -> Result<FrontMatter, FrontMatterError> {
    if yaml.trim().is_empty() {
        return Ok(FrontMatter::default());
    }
    serde_yaml::from_str(yaml).map_err(|error| FrontMatterError {
        line: error.location().map(|location| location.line() as u32 + 1),
        message: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_front_matter_basic() {
        let content = r#"---
title: My Page
description: A test page
---

# Hello World
"#;
        let parsed = parse_front_matter(content).unwrap();
        assert_eq!(parsed.front_matter.title, Some("My Page".to_string()));
        assert_eq!(
            parsed.front_matter.description,
            Some("A test page".to_string())
        );
        assert_eq!(parsed.body.trim(), "# Hello World");
        assert_eq!(parsed.body_line, 5);
    }

    #[test]
    fn test_parse_front_matter_with_custom_fields() {
        let content = r#"---
title: Custom Page
author: John Doe
hidden: true
tags:
  - rust
  - documentation
---

Content here
"#;
        let parsed = parse_front_matter(content).unwrap();
        assert_eq!(parsed.front_matter.title, Some("Custom Page".to_string()));
        assert!(parsed.front_matter.hidden);
        assert_eq!(
            parsed.front_matter.extra.get("author"),
            Some(&serde_json::Value::String("John Doe".into()))
        );
        assert!(parsed.front_matter.extra.contains_key("tags"));
    }

    #[test]
    fn test_parse_front_matter_no_front_matter() {
        let content = "# Just Markdown\n\nNo front matter here.";
        let parsed = parse_front_matter(content).unwrap();
        assert_eq!(parsed.front_matter.title, None);
        assert_eq!(parsed.body, content);
        assert_eq!(parsed.body_line, 1);
    }

    #[test]
    fn test_parse_front_matter_empty_front_matter() {
        let content = "---\n---\n\n# Content";
        let parsed = parse_front_matter(content).unwrap();
        assert_eq!(parsed.front_matter, FrontMatter::default());
        assert!(parsed.body.trim_start().starts_with("# Content"));
        assert_eq!(parsed.body_line, 3);
    }

    #[test]
    fn test_parse_front_matter_unclosed_is_markdown() {
        let content = "---\ntitle: Oops\n\n# Content";
        let parsed = parse_front_matter(content).unwrap();
        assert_eq!(parsed.front_matter.title, None);
        assert_eq!(parsed.body, content);
    }

    #[test]
    fn test_parse_front_matter_invalid_yaml() {
        let content = "---\ntitle: [unclosed\n---\nBody";
        let error = parse_front_matter(content).unwrap_err();
        assert!(error.to_string().starts_with("invalid front matter"));
        assert!(error.line.is_some());
    }
}
