//! Deletion backlog records and their claim/process lifecycle.
//!
//! A backlog row marks an entity (folder or file) whose downstream deletion
//! side effects still have to be applied. Rows move one way only:
//!
//! ```text
//! eligible (claimed=false, processed=false)
//!     └─ claim ──► claimed (claimed=true, processed=false)
//!                      └─ mark_processed ──► processed (claimed=true, processed=true)
//! ```
//!
//! Rows are never deleted by the sweeper. The cursor position of the
//! claiming iterator is re-derived from these two flags on every poll.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::EntityId;

/// Lifecycle flags shared by every backlog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogState {
    pub claimed: bool,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl BacklogState {
    /// A freshly created, eligible row.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            claimed: false,
            processed: false,
            created_at: now,
            updated_at: now,
            claimed_at: None,
            processed_at: None,
        }
    }

    /// Eligible for claiming iff neither claimed nor processed.
    pub fn is_eligible(&self) -> bool {
        !self.claimed && !self.processed
    }

    /// Claim the row. Returns `false` (and changes nothing) if it was not eligible.
    pub fn claim(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_eligible() {
            return false;
        }
        self.claimed = true;
        self.claimed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Mark the row processed.
    ///
    /// Returns `Ok(false)` when the row was already processed; `processed_at`
    /// is only written on the false→true edge. Processing an unclaimed row
    /// is rejected since `processed` implies `claimed`.
    pub fn mark_processed(&mut self, now: DateTime<Utc>) -> DomainResult<bool> {
        if !self.claimed {
            return Err(DomainError::invariant(
                "cannot mark an unclaimed backlog row as processed",
            ));
        }
        if self.processed {
            return Ok(false);
        }
        self.processed = true;
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(true)
    }
}

/// Common view over backlog rows, regardless of the entity kind.
pub trait BacklogRecord: Clone + Send + Sync + 'static {
    /// External identifier of the entity this row refers to.
    fn id(&self) -> EntityId;

    fn state(&self) -> &BacklogState;

    fn state_mut(&mut self) -> &mut BacklogState;

    fn is_eligible(&self) -> bool {
        self.state().is_eligible()
    }

    fn is_claimed(&self) -> bool {
        self.state().claimed
    }

    fn is_processed(&self) -> bool {
        self.state().processed
    }
}

/// Backlog row of the `deleted_folders` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedFolder {
    pub folder_id: EntityId,
    #[serde(flatten)]
    pub state: BacklogState,
}

impl DeletedFolder {
    pub fn new(folder_id: EntityId, now: DateTime<Utc>) -> Self {
        Self {
            folder_id,
            state: BacklogState::new(now),
        }
    }
}

impl BacklogRecord for DeletedFolder {
    fn id(&self) -> EntityId {
        self.folder_id
    }

    fn state(&self) -> &BacklogState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BacklogState {
        &mut self.state
    }
}

/// Backlog row of the `deleted_files` table.
///
/// `network_file_id` is the identifier the storage network knows the file
/// by; it is what the external deletion API expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedFile {
    pub file_id: EntityId,
    pub network_file_id: String,
    #[serde(flatten)]
    pub state: BacklogState,
}

impl DeletedFile {
    pub fn new(file_id: EntityId, network_file_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            file_id,
            network_file_id: network_file_id.into(),
            state: BacklogState::new(now),
        }
    }
}

impl BacklogRecord for DeletedFile {
    fn id(&self) -> EntityId {
        self.file_id
    }

    fn state(&self) -> &BacklogState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BacklogState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fresh_row_is_eligible() {
        let row = DeletedFolder::new(EntityId::new(), Utc::now());
        assert!(row.is_eligible());
        assert!(!row.is_claimed());
        assert!(!row.is_processed());
    }

    #[test]
    fn claim_is_one_way() {
        let mut state = BacklogState::new(Utc::now());
        assert!(state.claim(Utc::now()));
        assert!(!state.is_eligible());

        let first_claim = state.claimed_at;
        assert!(!state.claim(Utc::now()));
        assert_eq!(state.claimed_at, first_claim);
    }

    #[test]
    fn processing_requires_claim() {
        let mut state = BacklogState::new(Utc::now());
        let err = state.mark_processed(Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert!(!state.processed);
        assert!(state.processed_at.is_none());
    }

    #[test]
    fn processed_at_written_once() {
        let mut state = BacklogState::new(Utc::now());
        state.claim(Utc::now());

        assert!(state.mark_processed(Utc::now()).unwrap());
        let stamped = state.processed_at;
        assert!(stamped.is_some());

        assert!(!state.mark_processed(Utc::now()).unwrap());
        assert_eq!(state.processed_at, stamped);
    }

    #[test]
    fn folder_serializes_flat() {
        let row = DeletedFolder::new(EntityId::new(), Utc::now());
        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("folder_id").is_some());
        assert_eq!(json["claimed"], false);
        assert_eq!(json["processed"], false);
        assert!(json.get("state").is_none());
    }

    proptest! {
        // Any interleaving of claim/process attempts keeps `processed => claimed`.
        #[test]
        fn processed_implies_claimed(ops in proptest::collection::vec(any::<bool>(), 0..16)) {
            let mut state = BacklogState::new(Utc::now());
            for claim in ops {
                if claim {
                    state.claim(Utc::now());
                } else {
                    let _ = state.mark_processed(Utc::now());
                }
                prop_assert!(!state.processed || state.claimed);
                prop_assert_eq!(state.processed, state.processed_at.is_some());
            }
        }
    }
}
