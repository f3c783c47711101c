//! Repository ports used inside a sync transaction

use crate::domain::result::Result;
use crate::domain::Category;

/// Category persistence needed by the category resolver
///
/// Implemented by the database unit of work so that categories created
/// during a sync commit or roll back with the rest of the job.
pub trait CategoryStore {
    fn insert_category(&mut self, category: &Category) -> Result<()>;
}
