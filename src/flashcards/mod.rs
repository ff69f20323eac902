//! Flashcard and spaced repetition system
//!
//! This module provides:
//! - Subjects (named collections of captured cards)
//! - Card scheduling with a fixed three-rating algorithm
//! - SQLite persistence and review statistics

pub mod algorithm;
pub mod engine;
pub mod models;
pub mod storage;

pub use engine::{SchedulingEngine, SchedulingError};
pub use models::*;
pub use storage::{CardStore, SqliteCardStore, StoreError};
