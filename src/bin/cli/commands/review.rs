use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;

use snapdeck_lib::flashcards::algorithm::format_interval;
use snapdeck_lib::flashcards::Rating;

use crate::app::App;
use crate::OutputFormat;

pub fn run_due(app: &App, subject: &str, format: &OutputFormat) -> Result<()> {
    let subject = app.find_subject(subject)?;
    let count = app.engine.due_count(subject.id, Utc::now())?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "subjectId": subject.id.to_string(),
                "subject": subject.name,
                "due": count,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => println!("{}: {} card(s) due", subject.name, count),
    }
    Ok(())
}

pub fn run_next(app: &App, subject: &str, format: &OutputFormat) -> Result<()> {
    let subject = app.find_subject(subject)?;
    let now = Utc::now();

    let Some(card) = app.engine.next_due(subject.id, now)? else {
        match format {
            OutputFormat::Json => println!("null"),
            OutputFormat::Plain => println!("Nothing due in {}.", subject.name),
        }
        return Ok(());
    };
    let intervals = app.engine.preview(card.id, now)?;

    match format {
        OutputFormat::Json => {
            let preview: serde_json::Map<String, serde_json::Value> = Rating::ALL
                .iter()
                .zip(intervals)
                .map(|(rating, days)| (rating.as_str().to_string(), serde_json::json!(days)))
                .collect();
            let output = serde_json::json!({
                "card": card,
                "intervals": preview,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("Card {}", card.id);
            println!("  Image: {}", card.image_path.display());
            println!("  State: {}", card.state.as_str());
            let choices = Rating::ALL
                .iter()
                .zip(intervals)
                .map(|(rating, days)| format!("{} ({})", rating.as_str(), format_interval(days)))
                .collect::<Vec<_>>()
                .join("  ");
            println!("  Grade: {}", choices);
        }
    }
    Ok(())
}

pub fn run_grade(app: &App, card: &str, rating: &str, format: &OutputFormat) -> Result<()> {
    let card_id = Uuid::parse_str(card).with_context(|| format!("Invalid card ID '{}'", card))?;
    let rating = Rating::parse(rating)
        .with_context(|| format!("Unknown rating '{}' (expected again, good or easy)", rating))?;

    let card = app
        .engine
        .grade(card_id, rating, Utc::now())
        .context("Failed to grade card")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&card)?),
        OutputFormat::Plain => println!(
            "Graded {} as {}. Next review in {} ({})",
            card.id,
            rating.as_str(),
            format_interval(card.interval_days),
            card.due_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        ),
    }
    Ok(())
}

pub fn run_stats(app: &App, subject: &str, format: &OutputFormat) -> Result<()> {
    let subject = app.find_subject(subject)?;
    let stats = app.engine.stats(subject.id, Utc::now())?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Plain => {
            println!("{}", subject.name);
            println!("  Cards:    {}", stats.total_cards);
            println!(
                "            {} new, {} learning, {} review",
                stats.new_cards, stats.learning_cards, stats.review_cards
            );
            println!("  Due:      {}", stats.due_cards);
            println!(
                "  Reviewed: {} in the last 24h ({} lapsed)",
                stats.reviews_today, stats.lapses_today
            );
        }
    }
    Ok(())
}
