//! Data models for the flashcard system

use std::path::PathBuf;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::algorithm::INITIAL_EASE;

/// Id of the subject every capture falls back to
pub const DEFAULT_SUBJECT_ID: Uuid = Uuid::nil();

/// Name of the default subject
pub const DEFAULT_SUBJECT_NAME: &str = "Default";

/// Truncate a timestamp to the millisecond precision cards are stored with
pub fn to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(ts)
}

/// A named collection of captured cards
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Subject {
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            is_default: false,
            created_at: to_millis(Utc::now()),
        }
    }

    /// The reserved subject, created on first open of a store
    pub fn default_subject() -> Self {
        Self {
            id: DEFAULT_SUBJECT_ID,
            name: DEFAULT_SUBJECT_NAME.to_string(),
            is_default: true,
            created_at: to_millis(Utc::now()),
        }
    }
}

/// Status of a card in the spaced repetition system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CardState {
    /// Never reviewed
    #[default]
    New,
    /// Lapsed, waiting for the short relearning step
    Learning,
    /// Regular spaced review
    Review,
}

impl CardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Learning => "learning",
            Self::Review => "review",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "learning" => Some(Self::Learning),
            "review" => Some(Self::Review),
            _ => None,
        }
    }
}

/// User rating given during review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Rating {
    Again,
    Good,
    Easy,
}

impl Rating {
    pub const ALL: [Rating; 3] = [Rating::Again, Rating::Good, Rating::Easy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Again => "again",
            Self::Good => "good",
            Self::Easy => "easy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "again" | "1" => Some(Self::Again),
            "good" | "3" => Some(Self::Good),
            "easy" | "4" => Some(Self::Easy),
            _ => None,
        }
    }
}

/// A captured screenshot together with its scheduling state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub image_path: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub state: CardState,
    pub due_at: DateTime<Utc>,
    /// Current interval in days
    #[serde(default)]
    pub interval_days: f64,
    #[serde(default = "default_ease")]
    pub ease: f64,
    /// Successful reviews since the last lapse
    #[serde(default)]
    pub reps: u32,
    #[serde(default)]
    pub lapses: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

fn default_ease() -> f64 {
    INITIAL_EASE
}

impl Card {
    /// A fresh card, due immediately
    pub fn new(id: Uuid, subject_id: Uuid, image_path: PathBuf, created_at: DateTime<Utc>) -> Self {
        let created_at = to_millis(created_at);
        Self {
            id,
            subject_id,
            image_path,
            created_at,
            state: CardState::New,
            due_at: created_at,
            interval_days: 0.0,
            ease: INITIAL_EASE,
            reps: 0,
            lapses: 0,
            last_reviewed_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

/// A record of a single review
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub id: Uuid,
    pub card_id: Uuid,
    pub rating: Rating,
    /// Interval produced by this review (days)
    pub interval_days: f64,
    /// Ease after this review
    pub ease: f64,
    pub reviewed_at: DateTime<Utc>,
}

impl ReviewRecord {
    pub fn for_card(card: &Card, rating: Rating, reviewed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            card_id: card.id,
            rating,
            interval_days: card.interval_days,
            ease: card.ease,
            reviewed_at,
        }
    }
}

/// Statistics for a subject
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    pub total_cards: usize,
    pub new_cards: usize,
    pub learning_cards: usize,
    pub review_cards: usize,
    pub due_cards: usize,
    pub reviews_today: usize,
    pub lapses_today: usize,
}
