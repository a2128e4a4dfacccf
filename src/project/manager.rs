// Project manager for loading and saving songs

use crate::config::EngineConfig;
use crate::project::serialization::*;
use crate::project::types::SongDocument;
use crate::sequencer::pattern::PatternError;
use crate::sequencer::song::Song;
use std::path::Path;

/// Project error types
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RON error: {0}")]
    Ron(String),

    #[error("Invalid project structure: {0}")]
    Invalid(String),

    #[error("Unsupported document version {0}")]
    UnsupportedVersion(String),

    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),
}

/// On-disk text format, chosen from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectFormat {
    Ron,
    Json,
}

impl ProjectFormat {
    /// `.json` files are JSON, everything else RON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ProjectFormat::Json,
            _ => ProjectFormat::Ron,
        }
    }
}

/// Project manager - handles saving/loading songs
pub struct ProjectManager {
    config: EngineConfig,
}

impl ProjectManager {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Write a song document, through a temporary file renamed into place
    pub fn save_document<P: AsRef<Path>>(
        &self,
        document: &SongDocument,
        path: P,
    ) -> Result<(), ProjectError> {
        let path = path.as_ref();
        let text = match ProjectFormat::from_path(path) {
            ProjectFormat::Ron => serialize_to_ron(document)?,
            ProjectFormat::Json => serialize_to_json(document)?,
        };

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        std::fs::write(&temp, text)?;
        std::fs::rename(&temp, path)?;

        log::info!("Saved song '{}' to {}", document.title, path.display());
        Ok(())
    }

    /// Read and check a song document
    pub fn load_document<P: AsRef<Path>>(&self, path: P) -> Result<SongDocument, ProjectError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let document = match ProjectFormat::from_path(path) {
            ProjectFormat::Ron => deserialize_from_ron(&text)?,
            ProjectFormat::Json => deserialize_from_json(&text)?,
        };

        if !document.version.is_compatible() {
            return Err(ProjectError::UnsupportedVersion(document.version.to_string()));
        }
        crate::project::validate_document(&document)?;
        Ok(document)
    }

    pub fn save_song<P: AsRef<Path>>(&self, song: &Song, path: P) -> Result<(), ProjectError> {
        self.save_document(&song_to_document(song), path)
    }

    pub fn load_song<P: AsRef<Path>>(&self, path: P) -> Result<Song, ProjectError> {
        let document = self.load_document(path)?;
        song_from_document(&document, &self.config)
    }
}

impl Default for ProjectManager {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
