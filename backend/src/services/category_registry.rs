use crate::error::IngestError;
use crate::models::Category;
use crate::utils::category_slug;
use anyhow::Result;
use std::collections::HashSet;

pub const DEFAULT_CATEGORY_NAMES: [&str; 3] = ["AI & Technology", "Marketing", "Fitness & Health"];

impl Category {
    pub fn from_name(name: &str) -> Result<Self> {
        let name = name.trim();
        let id = category_slug(name);
        if id.is_empty() {
            return Err(anyhow::anyhow!(
                "Category name '{name}' has no usable characters"
            ));
        }

        Ok(Category {
            collection: format!("videos_{id}"),
            id,
            name: name.to_string(),
        })
    }
}

/// The fixed set of categories, decided at startup.
#[derive(Debug, Clone)]
pub struct CategoryRegistry {
    categories: Vec<Category>,
}

impl CategoryRegistry {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Err(anyhow::anyhow!("At least one category must be configured"));
        }

        let mut seen = HashSet::new();
        let mut categories = Vec::with_capacity(names.len());
        for name in names {
            let category = Category::from_name(name.as_ref())?;
            if !seen.insert(category.id.clone()) {
                return Err(anyhow::anyhow!(
                    "Duplicate category id '{}' (from '{}')",
                    category.id,
                    category.name
                ));
            }
            categories.push(category);
        }

        Ok(Self { categories })
    }

    pub fn all(&self) -> &[Category] {
        &self.categories
    }

    /// Look a category up by id or by its display name.
    pub fn get(&self, key: &str) -> Option<&Category> {
        self.categories
            .iter()
            .find(|c| c.id == key || c.name == key)
    }

    pub fn resolve(&self, key: &str) -> Result<&Category, IngestError> {
        self.get(key)
            .ok_or_else(|| IngestError::NotFound(format!("Category '{key}' not found")))
    }
}
