use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::repository::{DraftRepository, RepositoryError};

/// Permanently removes drafts whose retention window has passed.
///
/// Soft-deleted drafts are swept too. Running it twice at the same instant
/// removes nothing the second time.
pub struct ExpiryReaper<'a, R> {
    drafts: &'a R,
}

impl<'a, R> ExpiryReaper<'a, R>
where
    R: DraftRepository,
{
    pub fn new(drafts: &'a R) -> Self {
        Self { drafts }
    }

    pub fn prune(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let candidates = self.drafts.expired_before(now)?;
        let mut removed = 0;

        for id in candidates {
            match self.drafts.purge(id) {
                Ok(true) => removed += 1,
                Ok(false) | Err(RepositoryError::NotFound) => {
                    debug!(draft_id = %id, "expired draft already gone");
                }
                Err(err) => return Err(err),
            }
        }

        if removed > 0 {
            info!(removed, "pruned expired drafts");
        }
        Ok(removed)
    }
}
