//! Review scheduling on top of a card store

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::algorithm::{apply_review, preview_intervals};
use super::models::{Card, Rating, ReviewRecord, ReviewStats};
use super::storage::{CardStore, StoreError};

#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Card not found: {0}")]
    CardNotFound(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SchedulingError>;

/// Computes and persists review outcomes.
///
/// All time-dependent operations take `now` explicitly so results are
/// reproducible.
pub struct SchedulingEngine {
    store: Arc<dyn CardStore>,
}

impl SchedulingEngine {
    pub fn new(store: Arc<dyn CardStore>) -> Self {
        Self { store }
    }

    /// Number of cards in the subject that are due at `now`
    pub fn due_count(&self, subject_id: Uuid, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.store.count_due(subject_id, now)?)
    }

    /// The most overdue card in the subject, oldest capture first on ties
    pub fn next_due(&self, subject_id: Uuid, now: DateTime<Utc>) -> Result<Option<Card>> {
        Ok(self.store.next_due(subject_id, now)?)
    }

    /// Grade a card and write back its next scheduling state
    pub fn grade(&self, card_id: Uuid, rating: Rating, now: DateTime<Utc>) -> Result<Card> {
        let card = self
            .store
            .get_card(card_id)?
            .ok_or(SchedulingError::CardNotFound(card_id))?;

        let next = apply_review(&card, rating, now);

        // The card may have been removed between the read and the write
        if !self.store.update_card(&next)? {
            return Err(SchedulingError::CardNotFound(card_id));
        }

        if let Err(e) = self.store.record_review(&ReviewRecord::for_card(&next, rating, now)) {
            log::warn!("Failed to record review for card {}: {}", card_id, e);
        }

        log::debug!(
            "Graded card {} as {}: {:?}, interval {:.2}d, ease {:.2}, due {}",
            card_id,
            rating.as_str(),
            next.state,
            next.interval_days,
            next.ease,
            next.due_at
        );

        Ok(next)
    }

    /// Interval each rating would give the card, in days (again, good, easy)
    pub fn preview(&self, card_id: Uuid, now: DateTime<Utc>) -> Result<[f64; 3]> {
        let card = self
            .store
            .get_card(card_id)?
            .ok_or(SchedulingError::CardNotFound(card_id))?;
        Ok(preview_intervals(&card, now))
    }

    pub fn stats(&self, subject_id: Uuid, now: DateTime<Utc>) -> Result<ReviewStats> {
        Ok(self.store.stats(subject_id, now)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flashcards::models::{CardState, DEFAULT_SUBJECT_ID};
    use crate::flashcards::storage::SqliteCardStore;
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn setup() -> (Arc<SqliteCardStore>, SchedulingEngine) {
        let store = Arc::new(SqliteCardStore::open_in_memory().unwrap());
        let engine = SchedulingEngine::new(store.clone());
        (store, engine)
    }

    fn insert(store: &SqliteCardStore, created: i64) -> Card {
        let card = Card::new(Uuid::new_v4(), DEFAULT_SUBJECT_ID, PathBuf::from("c.png"), t(created));
        store.insert_card(&card).unwrap();
        card
    }

    #[test]
    fn test_grade_persists_next_state() {
        let (store, engine) = setup();
        let card = insert(&store, 1_000);
        let now = t(2_000);

        let graded = engine.grade(card.id, Rating::Good, now).unwrap();
        assert_eq!(graded.state, CardState::Review);
        assert_eq!(graded.due_at, now + Duration::days(1));

        let stored = store.get_card(card.id).unwrap().unwrap();
        assert_eq!(stored, graded);
        assert_eq!(stored.last_reviewed_at, Some(now));
    }

    #[test]
    fn test_graded_card_matches_stored_card_at_sub_millisecond_now() {
        let (store, engine) = setup();
        let card = insert(&store, 1_000);
        let now = Utc.timestamp_nanos(1_700_000_000_123_456_789);

        let graded = engine.grade(card.id, Rating::Easy, now).unwrap();
        let stored = store.get_card(card.id).unwrap().unwrap();
        assert_eq!(stored, graded);
        assert_eq!(stored.last_reviewed_at, Some(t(1_700_000_000_123)));
    }

    #[test]
    fn test_grade_unknown_card_fails() {
        let (_store, engine) = setup();
        let id = Uuid::new_v4();
        match engine.grade(id, Rating::Easy, t(0)) {
            Err(SchedulingError::CardNotFound(missing)) => assert_eq!(missing, id),
            other => panic!("expected CardNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_graded_card_leaves_due_queue() {
        let (store, engine) = setup();
        let first = insert(&store, 1_000);
        let second = insert(&store, 2_000);
        let now = t(5_000);

        assert_eq!(engine.due_count(DEFAULT_SUBJECT_ID, now).unwrap(), 2);
        assert_eq!(engine.next_due(DEFAULT_SUBJECT_ID, now).unwrap().unwrap().id, first.id);

        engine.grade(first.id, Rating::Again, now).unwrap();
        assert_eq!(engine.due_count(DEFAULT_SUBJECT_ID, now).unwrap(), 1);
        assert_eq!(engine.next_due(DEFAULT_SUBJECT_ID, now).unwrap().unwrap().id, second.id);

        // Relearning step comes due again ten minutes later
        let later = now + Duration::minutes(10);
        engine.grade(second.id, Rating::Easy, now).unwrap();
        assert_eq!(engine.next_due(DEFAULT_SUBJECT_ID, later).unwrap().unwrap().id, first.id);
    }

    #[test]
    fn test_grade_records_review() {
        let (store, engine) = setup();
        let card = insert(&store, 0);
        let now = t(60_000);

        engine.grade(card.id, Rating::Again, now).unwrap();
        engine.grade(card.id, Rating::Good, now + Duration::minutes(10)).unwrap();

        let stats = engine.stats(DEFAULT_SUBJECT_ID, now + Duration::minutes(10)).unwrap();
        assert_eq!(stats.reviews_today, 2);
        assert_eq!(stats.lapses_today, 1);
        assert_eq!(stats.review_cards, 1);
    }

    #[test]
    fn test_preview_matches_grade() {
        let (store, engine) = setup();
        let card = insert(&store, 0);
        let now = t(1_000);

        let [_, good, _] = engine.preview(card.id, now).unwrap();
        let graded = engine.grade(card.id, Rating::Good, now).unwrap();
        assert_eq!(good, graded.interval_days);
    }
}
