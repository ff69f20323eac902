//! Capture lifecycle coordination
//!
//! A `CaptureSession` is created once per process and shared by `Arc`. It
//! guarantees:
//! - at most one acquisition is in flight; a new capture cancels the
//!   previous one and waits (bounded) for it to wind down
//! - a cancelled attempt never persists a card
//! - only the most recently saved capture can be undone, and only until
//!   its undo window closes

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::images::{ImageStore, ImageStoreError};
use super::source::{AcquisitionError, ImageSource};
use crate::flashcards::{to_millis, Card, CardStore, StoreError};

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Superseded or abandoned. Never shown to the user.
    #[error("Capture cancelled")]
    Cancelled,

    #[error("{0}")]
    Acquisition(AcquisitionError),

    #[error("Could not store the screenshot: {0}")]
    Image(#[from] ImageStoreError),

    #[error("Could not save the capture: {0}")]
    Store(#[from] StoreError),
}

impl From<AcquisitionError> for CaptureError {
    fn from(err: AcquisitionError) -> Self {
        match err {
            AcquisitionError::Cancelled => Self::Cancelled,
            other => Self::Acquisition(other),
        }
    }
}

/// Outbound notifications for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureEvent {
    #[serde(rename_all = "camelCase")]
    Saved {
        card_id: Uuid,
        image_ref: PathBuf,
        remaining_window_ms: u64,
    },
    Notice { message: String },
}

/// Handle for reversing the most recent capture
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoToken {
    pub card_id: Uuid,
    pub image_ref: PathBuf,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub undo_window: Duration,
    /// How long a new capture waits for a cancelled one to stop
    pub cancel_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            undo_window: Duration::from_millis(5000),
            cancel_grace: Duration::from_millis(250),
        }
    }
}

struct ActiveAcquisition {
    attempt: u64,
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

#[derive(Default)]
struct SessionState {
    attempts: u64,
    active: Option<ActiveAcquisition>,
    undo: Option<UndoToken>,
}

/// Clears the in-flight marker and signals completion however the attempt
/// ends, including when the caller drops the capture future.
struct AttemptGuard<'a> {
    session: &'a CaptureSession,
    attempt: u64,
    finished: watch::Sender<bool>,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.session.state();
        if state.active.as_ref().map(|a| a.attempt) == Some(self.attempt) {
            state.active = None;
        }
        drop(state);
        self.finished.send_replace(true);
    }
}

pub struct CaptureSession {
    source: Arc<dyn ImageSource>,
    store: Arc<dyn CardStore>,
    images: Arc<dyn ImageStore>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    events: broadcast::Sender<CaptureEvent>,
}

impl CaptureSession {
    pub fn new(
        source: Arc<dyn ImageSource>,
        store: Arc<dyn CardStore>,
        images: Arc<dyn ImageStore>,
        settings: SessionSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            source,
            store,
            images,
            settings,
            state: Mutex::new(SessionState::default()),
            events,
        }
    }

    /// Receive `Saved` and `Notice` events
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CaptureEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn is_capturing(&self) -> bool {
        self.state().active.is_some()
    }

    /// The current undo token, if its window is still open
    pub fn pending_undo(&self) -> Option<UndoToken> {
        let now = Utc::now();
        self.state()
            .undo
            .as_ref()
            .filter(|token| now <= token.expires_at)
            .cloned()
    }

    /// Take a screenshot into `subject_id` (or the default subject).
    ///
    /// Cancels any capture still in flight. Returns `Cancelled` silently if
    /// this attempt is itself superseded or abandoned; other failures are
    /// also announced with a `Notice` event.
    pub async fn begin_capture(&self, subject_id: Option<Uuid>) -> Result<Card, CaptureError> {
        let result = self.run_capture(subject_id).await;
        match &result {
            Ok(card) => log::info!("Capture saved as card {} in subject {}", card.id, card.subject_id),
            Err(CaptureError::Cancelled) => log::debug!("Capture cancelled"),
            Err(e) => {
                log::warn!("Capture failed: {}", e);
                self.emit(CaptureEvent::Notice {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_capture(&self, subject_id: Option<Uuid>) -> Result<Card, CaptureError> {
        let subject_id = self.store.resolve_subject(subject_id)?;

        let (guard, cancel, prior) = self.start_attempt();
        if let Some(prior) = prior {
            self.wait_for_prior(prior).await;
        }
        if cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }

        if let Err(e) = self.source.clear_staging().await {
            log::warn!("Failed to clear capture staging for '{}': {}", self.source.name(), e);
        }

        log::debug!("Acquiring screenshot via '{}' (attempt {})", self.source.name(), guard.attempt);
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AcquisitionError::Cancelled),
            acquired = self.source.acquire(cancel.clone()) => acquired,
        }?;

        let card = self.commit(subject_id, &cancel, &bytes)?;
        drop(guard);
        Ok(card)
    }

    /// Install a fresh attempt as the active one, handing back the one it
    /// replaced (already signalled to cancel)
    fn start_attempt(&self) -> (AttemptGuard<'_>, CancellationToken, Option<ActiveAcquisition>) {
        let mut state = self.state();
        let prior = state.active.take();
        if let Some(prior) = &prior {
            log::debug!("Superseding capture attempt {}", prior.attempt);
            prior.cancel.cancel();
        }

        state.attempts += 1;
        let attempt = state.attempts;
        let cancel = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(false);
        state.active = Some(ActiveAcquisition {
            attempt,
            cancel: cancel.clone(),
            finished: finished_rx,
        });
        drop(state);

        let guard = AttemptGuard {
            session: self,
            attempt,
            finished: finished_tx,
        };
        (guard, cancel, prior)
    }

    async fn wait_for_prior(&self, prior: ActiveAcquisition) {
        let mut finished = prior.finished;
        let waited =
            tokio::time::timeout(self.settings.cancel_grace, finished.wait_for(|done| *done)).await;
        if waited.is_err() {
            log::warn!(
                "Capture attempt {} did not stop within {:?}, continuing",
                prior.attempt,
                self.settings.cancel_grace
            );
        }
    }

    /// Persist acquired bytes and open the undo window.
    ///
    /// Runs under the state lock so a concurrent supersession either lands
    /// before (and this attempt is cancelled) or after the save.
    fn commit(&self, subject_id: Uuid, cancel: &CancellationToken, bytes: &[u8]) -> Result<Card, CaptureError> {
        let mut state = self.state();
        if cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }

        let now = to_millis(Utc::now());
        let card_id = Uuid::new_v4();
        let image_path = self.images.save(subject_id, card_id, bytes)?;
        let card = Card::new(card_id, subject_id, image_path.clone(), now);

        // The image file is not rolled back if the row cannot be written
        if let Err(e) = self.store.insert_card(&card) {
            log::error!("Failed to save card {} (image left at {:?}): {}", card_id, image_path, e);
            return Err(e.into());
        }

        // The window opens once the card is actually saved
        let saved_at = to_millis(Utc::now());
        let window = chrono::Duration::from_std(self.settings.undo_window)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(5000));
        let expires_at = saved_at + window;
        state.undo = Some(UndoToken {
            card_id,
            image_ref: image_path.clone(),
            expires_at,
        });
        drop(state);

        let remaining_window_ms = (expires_at - Utc::now()).num_milliseconds().max(0) as u64;
        self.emit(CaptureEvent::Saved {
            card_id,
            image_ref: image_path,
            remaining_window_ms,
        });
        Ok(card)
    }

    /// Cancel the capture in flight, if any
    pub fn cancel_in_flight(&self) {
        if let Some(active) = &self.state().active {
            log::debug!("Cancelling capture attempt {}", active.attempt);
            active.cancel.cancel();
        }
    }

    /// Called when the app regains focus.
    ///
    /// For sources that cannot be cancelled directly, focus returning while
    /// the staging area is still empty means the user walked away from the
    /// capture tool. This is a heuristic: a tool that stages its image late
    /// is cancelled too. Returns whether a capture was cancelled.
    pub fn focus_regained(&self) -> bool {
        let state = self.state();
        let Some(active) = &state.active else {
            return false;
        };
        if active.cancel.is_cancelled() {
            return false;
        }
        if self.source.staging_empty() == Some(true) {
            log::info!(
                "Capture attempt {} abandoned (focus regained, nothing staged)",
                active.attempt
            );
            active.cancel.cancel();
            return true;
        }
        false
    }

    /// Undo the most recent capture if `card_id` matches and the window is open
    pub fn undo(&self, card_id: Uuid) -> bool {
        self.undo_at(card_id, Utc::now())
    }

    pub fn undo_at(&self, card_id: Uuid, now: DateTime<Utc>) -> bool {
        let token = {
            let mut state = self.state();
            match state.undo.take() {
                Some(token) if token.card_id == card_id && now <= token.expires_at => token,
                Some(token) if now > token.expires_at => {
                    log::debug!("Undo window for card {} has closed", token.card_id);
                    return false;
                }
                other => {
                    state.undo = other;
                    return false;
                }
            }
        };

        match self.store.delete_card(card_id) {
            Ok(true) => {}
            Ok(false) => {
                log::warn!("Undo: card {} was already gone", card_id);
                return false;
            }
            Err(e) => {
                log::error!("Undo: failed to delete card {}: {}", card_id, e);
                self.state().undo.get_or_insert(token);
                return false;
            }
        }

        if let Err(e) = self.images.delete(&token.image_ref) {
            log::warn!("Undo: failed to remove image {:?}: {}", token.image_ref, e);
        }

        log::info!("Undid capture {}", card_id);
        true
    }
}
