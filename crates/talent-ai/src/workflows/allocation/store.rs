use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::domain::{normalize_title, Candidate, CandidateId, Position, PositionDraft, PositionId};
use super::ledger::{
    AllocationHistory, AllocationHistoryLog, AuditEntry, AuditLedger, ScoreRecord, ScoreStore,
};
use super::repository::{AllocationRepository, CandidateCommit, RepositoryError};

#[derive(Default)]
struct StoreState {
    candidates: BTreeMap<CandidateId, Candidate>,
    positions: BTreeMap<PositionId, Position>,
    scores: ScoreStore,
    history: AllocationHistoryLog,
    audit: AuditLedger,
}

/// Process-local repository. A single mutex makes each commit atomic; version checks
/// still guard against stale writers racing through the async layer.
pub struct InMemoryAllocationStore {
    state: Mutex<StoreState>,
    candidate_sequence: AtomicU64,
    position_sequence: AtomicU64,
}

impl Default for InMemoryAllocationStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            candidate_sequence: AtomicU64::new(1),
            position_sequence: AtomicU64::new(1),
        }
    }
}

impl InMemoryAllocationStore {
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }

    /// Ledger sizes, handy for asserting append-only behavior.
    pub fn ledger_counts(&self) -> Result<LedgerCounts, RepositoryError> {
        let state = self.lock()?;
        Ok(LedgerCounts {
            scores: state.scores.len(),
            history: state.history.len(),
            audit: state.audit.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerCounts {
    pub scores: usize,
    pub history: usize,
    pub audit: usize,
}

fn assignment_changed(stored: &Candidate, next: &Candidate) -> bool {
    stored.current_position != next.current_position
        || stored.current_score != next.current_score
        || stored.position_locked != next.position_locked
}

impl AllocationRepository for InMemoryAllocationStore {
    fn next_candidate_id(&self) -> Result<CandidateId, RepositoryError> {
        Ok(CandidateId(
            self.candidate_sequence.fetch_add(1, Ordering::Relaxed),
        ))
    }

    fn commit(&self, commit: CandidateCommit) -> Result<Candidate, RepositoryError> {
        let mut state = self.lock()?;
        let CandidateCommit {
            mut candidate,
            expected_version,
            scores,
            history,
            audit,
        } = commit;

        let next_version = match expected_version {
            None => {
                if state.candidates.contains_key(&candidate.id) {
                    return Err(RepositoryError::DuplicateCandidate(candidate.id));
                }
                1
            }
            Some(expected) => {
                let stored = state
                    .candidates
                    .get(&candidate.id)
                    .ok_or(RepositoryError::NotFound)?;
                if stored.version != expected {
                    return Err(RepositoryError::Conflict {
                        candidate_id: candidate.id,
                        expected,
                        found: stored.version,
                    });
                }
                if stored.position_locked && assignment_changed(stored, &candidate) {
                    return Err(RepositoryError::LockedAssignment(candidate.id));
                }
                expected + 1
            }
        };

        candidate.version = next_version;
        state.candidates.insert(candidate.id, candidate.clone());
        for record in scores {
            state.scores.append(record);
        }
        if let Some(entry) = history {
            state.history.append(entry);
        }
        for entry in audit {
            state.audit.append(entry);
        }
        Ok(candidate)
    }

    fn fetch_candidate(&self, id: CandidateId) -> Result<Option<Candidate>, RepositoryError> {
        Ok(self.lock()?.candidates.get(&id).cloned())
    }

    fn list_all_candidates(&self) -> Result<Vec<Candidate>, RepositoryError> {
        Ok(self.lock()?.candidates.values().cloned().collect())
    }

    fn insert_position(&self, draft: PositionDraft) -> Result<Position, RepositoryError> {
        let mut state = self.lock()?;
        let normalized = normalize_title(&draft.name);
        if state
            .positions
            .values()
            .any(|position| normalize_title(&position.name) == normalized)
        {
            return Err(RepositoryError::DuplicatePosition(draft.name));
        }

        let position = Position {
            id: PositionId(self.position_sequence.fetch_add(1, Ordering::Relaxed)),
            name: draft.name,
            description: draft.description,
            requirements: draft.requirements,
            nice_to_have: draft.nice_to_have,
            active: true,
            created_at: Utc::now(),
        };
        state.positions.insert(position.id, position.clone());
        Ok(position)
    }

    fn set_position_active(
        &self,
        id: PositionId,
        active: bool,
    ) -> Result<Position, RepositoryError> {
        let mut state = self.lock()?;
        let position = state
            .positions
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        position.active = active;
        Ok(position.clone())
    }

    fn fetch_position(&self, id: PositionId) -> Result<Option<Position>, RepositoryError> {
        Ok(self.lock()?.positions.get(&id).cloned())
    }

    fn list_active_positions(&self) -> Result<Vec<Position>, RepositoryError> {
        Ok(self
            .lock()?
            .positions
            .values()
            .filter(|position| position.active)
            .cloned()
            .collect())
    }

    fn append_score_record(&self, record: ScoreRecord) -> Result<(), RepositoryError> {
        self.lock()?.scores.append(record);
        Ok(())
    }

    fn append_audit(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        self.lock()?.audit.append(entry);
        Ok(())
    }

    fn score_records(&self, id: CandidateId) -> Result<Vec<ScoreRecord>, RepositoryError> {
        Ok(self.lock()?.scores.for_candidate(id))
    }

    fn score_records_for_position(
        &self,
        id: PositionId,
    ) -> Result<Vec<ScoreRecord>, RepositoryError> {
        Ok(self.lock()?.scores.for_position(id))
    }

    fn allocation_history(
        &self,
        id: CandidateId,
    ) -> Result<Vec<AllocationHistory>, RepositoryError> {
        Ok(self.lock()?.history.for_candidate(id))
    }

    fn audit_for_candidate(&self, id: CandidateId) -> Result<Vec<AuditEntry>, RepositoryError> {
        Ok(self.lock()?.audit.for_candidate(id))
    }

    fn audit_for_position(&self, id: PositionId) -> Result<Vec<AuditEntry>, RepositoryError> {
        Ok(self.lock()?.audit.for_position(id))
    }
}
