//! Category domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A spending or income category owned by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Seeded categories are default; ones created from provider data are not
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Category {
    /// A non-default category, as created on first sight of a provider name
    pub fn new(user_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            is_default: false,
            created_at: Utc::now(),
        }
    }
}
