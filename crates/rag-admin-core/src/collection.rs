//! View collections: independently owned, ordered snapshots of models.
//!
//! A collection never aliases another collection's models. The same logical
//! model may sit in the full list, the filtered list, and a detail view at the
//! same time, each as its own copy. Membership changes only through explicit
//! load, insert, and remove calls made by the owning session.

use serde::Serialize;

use crate::models::{Model, ModelStatus};

/// A named, ordered sequence of model copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewCollection {
    name: String,
    models: Vec<Model>,
}

impl ViewCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: Vec::new(),
        }
    }

    pub fn with_models(name: impl Into<String>, models: Vec<Model>) -> Self {
        Self {
            name: name.into(),
            models,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Model> {
        self.models.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Mutable access for the merger. Linear scan; insertion order is kept.
    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Model> {
        self.models.iter_mut().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Replace the whole snapshot (page load).
    pub fn replace_all(&mut self, models: Vec<Model>) {
        self.models = models;
    }

    /// Append a newly created model. Returns `false` if the id is already
    /// present.
    pub fn insert(&mut self, model: Model) -> bool {
        if self.contains(&model.id) {
            return false;
        }
        self.models.push(model);
        true
    }

    /// Drop a deleted model, returning it if it was held.
    pub fn remove(&mut self, id: &str) -> Option<Model> {
        let index = self.models.iter().position(|m| m.id == id)?;
        Some(self.models.remove(index))
    }
}

impl<'a> IntoIterator for &'a ViewCollection {
    type Item = &'a Model;
    type IntoIter = std::slice::Iter<'a, Model>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.iter()
    }
}

/// Search and status filter used to derive the filtered view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelFilter {
    /// Case-insensitive substring matched against name and description.
    pub search: Option<String>,
    /// Exact training status match; `None` means all.
    pub status: Option<ModelStatus>,
}

impl ModelFilter {
    pub fn matches(&self, model: &Model) -> bool {
        if let Some(term) = self.search.as_deref().filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            if !model.name.to_lowercase().contains(&term)
                && !model.description.to_lowercase().contains(&term)
            {
                return false;
            }
        }
        match self.status {
            Some(status) => model.status == status,
            None => true,
        }
    }

    /// Copy the matching models of `source` into a new collection named `name`.
    pub fn apply(&self, name: &str, source: &ViewCollection) -> ViewCollection {
        ViewCollection::with_models(
            name,
            source
                .iter()
                .filter(|m| self.matches(m))
                .cloned()
                .collect(),
        )
    }
}

/// Number of pages needed to show `total` models, `page_size` per page.
pub fn page_count(total: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size as u64)
}

/// Whether `page` (1-based) exists for the given totals.
pub fn is_valid_page(page: u32, total: u64, page_size: u32) -> bool {
    page >= 1 && (page as u64) <= page_count(total, page_size)
}
