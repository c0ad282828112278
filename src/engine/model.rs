//! Pages, collections and the project that holds them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity of a page, unique within the project (e.g. `guide/install.md`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(Arc<str>);

impl PageId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PageId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Identity of a collection (volume).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(Arc<str>);

impl CollectionId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// An ordered set of pages sharing one collection-wide stage.
#[derive(Debug, Clone)]
pub struct Collection {
    id: CollectionId,
    pages: Vec<PageId>,
    /// Fingerprint of the configuration that shaped this collection;
    /// part of every cache key for its pages.
    fingerprint: String,
}

impl Collection {
    pub fn new(id: CollectionId, pages: Vec<PageId>, fingerprint: impl Into<String>) -> Self {
        Self {
            id,
            pages,
            fingerprint: fingerprint.into(),
        }
    }

    pub fn id(&self) -> &CollectionId {
        &self.id
    }

    pub fn pages(&self) -> &[PageId] {
        &self.pages
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn contains(&self, page: &PageId) -> bool {
        self.pages.contains(page)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectError {
    #[error("collection '{0}' is defined more than once")]
    DuplicateCollection(CollectionId),

    #[error("page '{page}' appears in both '{first}' and '{second}'")]
    DuplicatePage {
        page: PageId,
        first: CollectionId,
        second: CollectionId,
    },
}

/// Every collection taking part in a build.
#[derive(Debug, Clone, Default)]
pub struct Project {
    collections: Vec<Collection>,
    /// Page -> index into `collections`
    page_index: HashMap<PageId, usize>,
}

impl Project {
    /// Build a project, rejecting duplicated collections or pages.
    pub fn new(collections: Vec<Collection>) -> Result<Self, ProjectError> {
        let mut page_index: HashMap<PageId, usize> = HashMap::new();

        for (index, collection) in collections.iter().enumerate() {
            if collections[..index].iter().any(|c| c.id == collection.id) {
                return Err(ProjectError::DuplicateCollection(collection.id.clone()));
            }
            for page in &collection.pages {
                if let Some(&existing) = page_index.get(page) {
                    return Err(ProjectError::DuplicatePage {
                        page: page.clone(),
                        first: collections[existing].id.clone(),
                        second: collection.id.clone(),
                    });
                }
                page_index.insert(page.clone(), index);
            }
        }

        Ok(Self {
            collections,
            page_index,
        })
    }

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    pub fn collection(&self, id: &CollectionId) -> Option<&Collection> {
        self.collections.iter().find(|c| &c.id == id)
    }

    /// The collection a page belongs to.
    pub fn collection_of(&self, page: &PageId) -> Option<&Collection> {
        self.page_index.get(page).map(|&i| &self.collections[i])
    }

    pub fn contains(&self, page: &PageId) -> bool {
        self.page_index.contains_key(page)
    }

    /// All pages, collection by collection, in declaration order.
    pub fn pages(&self) -> impl Iterator<Item = &PageId> {
        self.collections.iter().flat_map(|c| c.pages.iter())
    }

    pub fn page_count(&self) -> usize {
        self.page_index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(name: &str, pages: &[&str]) -> Collection {
        Collection::new(
            CollectionId::new(name),
            pages.iter().map(|p| PageId::new(p)).collect(),
            "fp",
        )
    }

    #[test]
    fn test_project_indexes_pages() {
        let project = Project::new(vec![
            collection("guide", &["guide/a.md", "guide/b.md"]),
            collection("api", &["api/index.md"]),
        ])
        .unwrap();

        assert_eq!(project.page_count(), 3);
        assert_eq!(
            project.collection_of(&PageId::new("api/index.md")).map(|c| c.id().as_str()),
            Some("api")
        );
        assert!(project.collection_of(&PageId::new("nope.md")).is_none());
        let order: Vec<_> = project.pages().map(|p| p.as_str()).collect();
        assert_eq!(order, vec!["guide/a.md", "guide/b.md", "api/index.md"]);
    }

    #[test]
    fn test_project_rejects_duplicate_page() {
        let err = Project::new(vec![
            collection("guide", &["shared.md"]),
            collection("api", &["shared.md"]),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            ProjectError::DuplicatePage {
                page: PageId::new("shared.md"),
                first: CollectionId::new("guide"),
                second: CollectionId::new("api"),
            }
        );
    }

    #[test]
    fn test_project_rejects_duplicate_collection() {
        let err = Project::new(vec![collection("guide", &["a.md"]), collection("guide", &["b.md"])])
            .unwrap_err();
        assert_eq!(err, ProjectError::DuplicateCollection(CollectionId::new("guide")));
    }
}
