use crate::config::AppConfig;
use crate::email::Mailer;
use crate::notify::EventBroadcaster;
use crate::shared::utils::DbPool;

/// Shared application state handed to every handler behind an `Arc`.
///
/// The event broadcaster is constructed once in `main` and injected here so
/// the ticket handlers never reach for a module-level singleton.
pub struct AppState {
    pub config: AppConfig,
    pub conn: DbPool,
    pub events: EventBroadcaster,
    pub mailer: Mailer,
}
