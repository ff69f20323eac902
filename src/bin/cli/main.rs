mod app;
mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "snapdeck-cli", about = "Screenshot flashcards from the terminal", version)]
struct Cli {
    /// Config file (default: <config_dir>/snapdeck/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Manage subjects
    #[command(subcommand)]
    Subjects(SubjectCommand),

    /// Take a screenshot and save it as a new card
    Capture {
        /// Subject name (case-insensitive prefix match, default subject if omitted)
        #[arg(long)]
        subject: Option<String>,
        /// Offer to undo the capture while the undo window is open
        #[arg(long)]
        undo: bool,
    },

    /// Add an existing image file as a new card
    Import {
        /// Image file
        file: PathBuf,
        /// Subject name
        #[arg(long)]
        subject: Option<String>,
    },

    /// Number of cards due for review
    Due {
        /// Subject name
        subject: String,
    },

    /// Show the next card to review
    Next {
        /// Subject name
        subject: String,
    },

    /// Grade a card
    Grade {
        /// Card ID
        card: String,
        /// again, good or easy
        rating: String,
    },

    /// Review statistics for a subject
    Stats {
        /// Subject name
        subject: String,
    },
}

#[derive(Subcommand)]
enum SubjectCommand {
    /// List subjects with card counts
    List,

    /// Create a subject
    Create { name: String },

    /// Rename a subject
    Rename {
        /// Current name
        subject: String,
        new_name: String,
    },

    /// Delete a subject and all of its cards
    Delete { subject: String },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let app = app::App::new(cli.config.as_deref())?;

    match cli.command {
        Command::Subjects(subcmd) => match subcmd {
            SubjectCommand::List => commands::subjects::run_list(&app, &cli.format)?,
            SubjectCommand::Create { name } => {
                commands::subjects::run_create(&app, &name, &cli.format)?
            }
            SubjectCommand::Rename { subject, new_name } => {
                commands::subjects::run_rename(&app, &subject, &new_name, &cli.format)?
            }
            SubjectCommand::Delete { subject } => {
                commands::subjects::run_delete(&app, &subject, &cli.format)?
            }
        },
        Command::Capture { subject, undo } => {
            commands::capture::run_capture(&app, subject.as_deref(), undo, &cli.format)?;
        }
        Command::Import { file, subject } => {
            commands::capture::run_import(&app, file, subject.as_deref(), &cli.format)?;
        }
        Command::Due { subject } => {
            commands::review::run_due(&app, &subject, &cli.format)?;
        }
        Command::Next { subject } => {
            commands::review::run_next(&app, &subject, &cli.format)?;
        }
        Command::Grade { card, rating } => {
            commands::review::run_grade(&app, &card, &rating, &cli.format)?;
        }
        Command::Stats { subject } => {
            commands::review::run_stats(&app, &subject, &cli.format)?;
        }
    }

    Ok(())
}
