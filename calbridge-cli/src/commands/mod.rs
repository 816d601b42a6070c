pub mod doctor;
pub mod events;
pub mod history;
pub mod mutate;
pub mod reminder;

use anyhow::Result;
use calbridge_core::journal::{Journal, Session};
use calbridge_core::{BridgeConfig, CalendarClient};

/// Window `events` covers when `--to` is absent.
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Everything a command needs: loaded config, the backend behind its
/// supervisor, and whether this is a dry run.
pub struct Context {
    pub config: BridgeConfig,
    pub client: CalendarClient,
    pub dry_run: bool,
}

impl Context {
    pub fn session(&self) -> Result<Session> {
        let journal = Journal::new(&self.config.journal_dir()?);
        Ok(Session::new(self.client.clone(), journal, self.dry_run))
    }
}
