//! Per-job category lookup with create-on-miss

use std::collections::HashMap;

use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::Category;
use crate::ports::CategoryStore;

/// Category name to id cache for one sync job
///
/// Seeded from the user's existing categories. Names are matched
/// case-insensitively after trimming. A miss creates a non-default category
/// through the store, so it shares the job's transaction.
pub struct CategoryResolver {
    user_id: Uuid,
    by_name: HashMap<String, Uuid>,
    created: usize,
}

impl CategoryResolver {
    pub fn new(user_id: Uuid, existing: Vec<Category>) -> Self {
        let by_name = existing
            .into_iter()
            .map(|c| (normalize(&c.name), c.id))
            .collect();
        Self {
            user_id,
            by_name,
            created: 0,
        }
    }

    /// Resolve a provider category name, creating it if unseen
    ///
    /// Blank names resolve to no category.
    pub fn resolve(&mut self, store: &mut dyn CategoryStore, name: &str) -> Result<Option<Uuid>> {
        let key = normalize(name);
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(id) = self.by_name.get(&key) {
            return Ok(Some(*id));
        }

        let category = Category::new(self.user_id, name.trim());
        store.insert_category(&category)?;
        tracing::debug!(category_id = %category.id, "category created");
        self.by_name.insert(key, category.id);
        self.created += 1;
        Ok(Some(category.id))
    }

    /// Categories created by this resolver
    pub fn created(&self) -> usize {
        self.created
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
