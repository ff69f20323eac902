use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use snapdeck_lib::capture::{CaptureSession, FileImageStore, ImageSource};
use snapdeck_lib::config::AppConfig;
use snapdeck_lib::flashcards::{CardStore, SchedulingEngine, SqliteCardStore, Subject};

/// Shared application state for CLI commands
pub struct App {
    pub config: AppConfig,
    pub store: Arc<SqliteCardStore>,
    pub images: Arc<FileImageStore>,
    pub engine: SchedulingEngine,
}

impl App {
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = AppConfig::load(config_path).context("Failed to load config")?;
        let data_dir = config.data_dir().context("Failed to get data directory")?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;

        let db_path = config.db_path()?;
        let store = Arc::new(
            SqliteCardStore::open(&db_path)
                .with_context(|| format!("Failed to open {}", db_path.display()))?,
        );
        let images = Arc::new(FileImageStore::new(&data_dir));
        let engine = SchedulingEngine::new(store.clone());

        Ok(Self {
            config,
            store,
            images,
            engine,
        })
    }

    /// A capture session over the given source
    pub fn session(&self, source: Arc<dyn ImageSource>) -> Arc<CaptureSession> {
        Arc::new(CaptureSession::new(
            source,
            self.store.clone(),
            self.images.clone(),
            self.config.session_settings(),
        ))
    }

    pub fn list_subjects(&self) -> Result<Vec<Subject>> {
        self.store.list_subjects().context("Failed to list subjects")
    }

    /// Find a subject by name (case-insensitive, exact match first, then prefix)
    pub fn find_subject(&self, name: &str) -> Result<Subject> {
        let subjects = self.list_subjects()?;
        let name_lower = name.to_lowercase();

        if let Some(s) = subjects.iter().find(|s| s.name.to_lowercase() == name_lower) {
            return Ok(s.clone());
        }

        let matches: Vec<&Subject> = subjects
            .iter()
            .filter(|s| s.name.to_lowercase().starts_with(&name_lower))
            .collect();

        match matches.len() {
            0 => bail!(
                "No subject matching '{}'. Available subjects:\n{}",
                name,
                subjects
                    .iter()
                    .map(|s| format!("  - {}", s.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
            1 => Ok(matches[0].clone()),
            _ => bail!(
                "Ambiguous subject name '{}'. Matches:\n{}",
                name,
                matches
                    .iter()
                    .map(|s| format!("  - {}", s.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
        }
    }
}
