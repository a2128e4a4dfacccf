// Système de notifications pour les fautes du moteur
//
// Notifications carry `Cow<'static, str>` so the realtime side can report a
// fault with a static message without allocating.

use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

/// Niveau de sévérité d'une notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Catégorie de notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    /// Deferred reclamation (queue overflow, arena exhaustion)
    Reclaim,
    /// Command execution failures worth showing to the user
    Command,
    /// Realtime playback faults (output buffer overrun)
    Playback,
}

/// Notification avec timestamp et métadonnées
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub category: NotificationCategory,
    pub message: Cow<'static, str>,
    pub timestamp: u64, // Unix timestamp en millisecondes
}

impl Notification {
    /// Crée une nouvelle notification avec le timestamp actuel
    pub fn new(
        level: NotificationLevel,
        category: NotificationCategory,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            level,
            category,
            message: message.into(),
            timestamp,
        }
    }

    pub fn info(category: NotificationCategory, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(NotificationLevel::Info, category, message)
    }

    pub fn warning(
        category: NotificationCategory,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(NotificationLevel::Warning, category, message)
    }

    pub fn error(category: NotificationCategory, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(NotificationLevel::Error, category, message)
    }

    /// Vérifie si la notification est plus récente que N millisecondes
    pub fn is_recent(&self, max_age_ms: u64) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        now.saturating_sub(self.timestamp) < max_age_ms
    }
}
