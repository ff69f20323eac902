use anyhow::{Context, Result};
use chrono::Utc;

use snapdeck_lib::capture::ImageStore;
use snapdeck_lib::flashcards::CardStore;

use crate::app::App;
use crate::OutputFormat;

pub fn run_list(app: &App, format: &OutputFormat) -> Result<()> {
    let subjects = app.list_subjects()?;
    let now = Utc::now();

    let mut rows = Vec::with_capacity(subjects.len());
    for subject in &subjects {
        let stats = app.engine.stats(subject.id, now)?;
        rows.push((subject, stats));
    }

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = rows
                .iter()
                .map(|(subject, stats)| {
                    serde_json::json!({
                        "id": subject.id.to_string(),
                        "name": subject.name,
                        "isDefault": subject.is_default,
                        "cardCount": stats.total_cards,
                        "dueCount": stats.due_cards,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            let name_width = subjects.iter().map(|s| s.name.len()).max().unwrap_or(4).clamp(4, 40);

            println!("{:<nw$} {:>6} {:>6}", "Name", "Cards", "Due", nw = name_width);
            println!(
                "{} {} {}",
                "\u{2500}".repeat(name_width),
                "\u{2500}".repeat(6),
                "\u{2500}".repeat(6)
            );
            for (subject, stats) in &rows {
                let marker = if subject.is_default { " *" } else { "" };
                println!(
                    "{:<nw$} {:>6} {:>6}{}",
                    subject.name,
                    stats.total_cards,
                    stats.due_cards,
                    marker,
                    nw = name_width
                );
            }
        }
    }

    Ok(())
}

pub fn run_create(app: &App, name: &str, format: &OutputFormat) -> Result<()> {
    let subject = app
        .store
        .create_subject(name)
        .with_context(|| format!("Failed to create subject '{}'", name))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&subject)?),
        OutputFormat::Plain => println!("Created subject \"{}\" ({})", subject.name, subject.id),
    }
    Ok(())
}

pub fn run_rename(app: &App, current: &str, new_name: &str, format: &OutputFormat) -> Result<()> {
    let subject = app.find_subject(current)?;
    let renamed = app
        .store
        .rename_subject(subject.id, new_name)
        .with_context(|| format!("Failed to rename subject '{}'", subject.name))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&renamed)?),
        OutputFormat::Plain => println!("Renamed \"{}\" to \"{}\"", subject.name, renamed.name),
    }
    Ok(())
}

pub fn run_delete(app: &App, name: &str, format: &OutputFormat) -> Result<()> {
    let subject = app.find_subject(name)?;
    let image_paths = app
        .store
        .delete_subject(subject.id)
        .with_context(|| format!("Failed to delete subject '{}'", subject.name))?;

    for path in &image_paths {
        if let Err(e) = app.images.delete(path) {
            log::warn!("Failed to remove image {:?}: {}", path, e);
        }
    }

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "id": subject.id.to_string(),
                "name": subject.name,
                "deletedCards": image_paths.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => println!(
            "Deleted subject \"{}\" and {} card(s)",
            subject.name,
            image_paths.len()
        ),
    }
    Ok(())
}
