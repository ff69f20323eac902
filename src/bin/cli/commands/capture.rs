use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast::error::TryRecvError;

use snapdeck_lib::capture::{CaptureError, CaptureEvent, CaptureSession, FileSource, ImageSource};
use snapdeck_lib::flashcards::Card;

use crate::app::App;
use crate::OutputFormat;

pub fn run_capture(
    app: &App,
    subject: Option<&str>,
    offer_undo: bool,
    format: &OutputFormat,
) -> Result<()> {
    let source = app.config.image_source()?;
    run_session(app, source, subject, offer_undo, format)
}

pub fn run_import(
    app: &App,
    file: PathBuf,
    subject: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    if !file.is_file() {
        bail!("{} is not a file", file.display());
    }
    run_session(app, Arc::new(FileSource::new(file)), subject, false, format)
}

fn run_session(
    app: &App,
    source: Arc<dyn ImageSource>,
    subject: Option<&str>,
    offer_undo: bool,
    format: &OutputFormat,
) -> Result<()> {
    let subject_id = match subject {
        Some(name) => Some(app.find_subject(name)?.id),
        None => None,
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let session = app.session(source);

    let outcome = runtime.block_on(async {
        let mut events = session.subscribe();

        // Ctrl-C abandons the capture instead of killing the process mid-write
        let watcher = {
            let session = session.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    session.cancel_in_flight();
                }
            })
        };

        let result = session.begin_capture(subject_id).await;
        watcher.abort();

        let card = match result {
            Ok(card) => card,
            Err(CaptureError::Cancelled) => {
                if let OutputFormat::Plain = format {
                    eprintln!("Capture cancelled.");
                }
                return Ok(());
            }
            Err(e) => return Err(e).context("Capture failed"),
        };

        let remaining_ms = saved_window(&mut events, &card)
            .unwrap_or(session.settings().undo_window.as_millis() as u64);
        print_card(&card, remaining_ms, format)?;

        if offer_undo && remaining_ms > 0 {
            wait_for_undo(&session, &card, Duration::from_millis(remaining_ms), format).await?;
        }
        Ok(())
    });

    // A pending stdin read would otherwise hold shutdown open
    runtime.shutdown_timeout(Duration::from_millis(100));
    outcome
}

/// Remaining undo window reported with the save event for `card`
fn saved_window(
    events: &mut tokio::sync::broadcast::Receiver<CaptureEvent>,
    card: &Card,
) -> Option<u64> {
    loop {
        match events.try_recv() {
            Ok(CaptureEvent::Saved {
                card_id,
                remaining_window_ms,
                ..
            }) if card_id == card.id => return Some(remaining_window_ms),
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
        }
    }
}

fn print_card(card: &Card, remaining_ms: u64, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "card": card,
                "undoWindowMs": remaining_ms,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("Saved card {}", card.id);
            println!("  Image: {}", card.image_path.display());
        }
    }
    Ok(())
}

async fn wait_for_undo(
    session: &CaptureSession,
    card: &Card,
    window: Duration,
    format: &OutputFormat,
) -> Result<()> {
    if let OutputFormat::Plain = format {
        println!("Press Enter within {:.1}s to undo.", window.as_secs_f64());
    }

    let mut line = String::new();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let answered = match tokio::time::timeout(window, stdin.read_line(&mut line)).await {
        Ok(Ok(n)) => n > 0,
        Ok(Err(e)) => return Err(e).context("Failed to read from stdin"),
        Err(_) => false,
    };
    let undone = answered && session.undo(card.id);

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({ "cardId": card.id, "undone": undone });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain if undone => println!("Undone."),
        OutputFormat::Plain if answered => println!("Too late to undo."),
        OutputFormat::Plain => println!("Kept."),
    }
    Ok(())
}
