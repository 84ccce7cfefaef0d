// Notification seam. Delivery is best-effort: failures are logged and never
// undo a committed mutation.

use std::fmt;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::model::{DraftId, FantasyTeam, LeagueId};

/// Where an announcement is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    League(LeagueId),
    Draft(DraftId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::League(id) => write!(f, "league {id}"),
            Scope::Draft(id) => write!(f, "draft {id}"),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn announce(&self, scope: Scope, message: &str) -> Result<(), String>;
    fn notify_turn(&self, team: &FantasyTeam) -> Result<(), String>;
}

/// Deliver an announcement, logging any failure.
pub(crate) fn announce(notifier: &dyn Notifier, scope: Scope, message: &str) {
    if let Err(e) = notifier.announce(scope, message) {
        warn!("announcement to {scope} failed: {e}");
    }
}

pub(crate) fn notify_turn(notifier: &dyn Notifier, team: &FantasyTeam) {
    if let Err(e) = notifier.notify_turn(team) {
        warn!("turn notification for team {} failed: {e}", team.id);
    }
}

/// Writes every notification to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn announce(&self, scope: Scope, message: &str) -> Result<(), String> {
        info!(target: "rosterbook::announce", "[{scope}] {message}");
        Ok(())
    }

    fn notify_turn(&self, team: &FantasyTeam) -> Result<(), String> {
        info!(target: "rosterbook::announce", "{} ({}) is on the clock", team.name, team.id);
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Announce(Scope, String),
    Turn(FantasyTeam),
}

/// Keeps notifications in memory; used by tests and by callers that render
/// them after the fact.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock().expect("notifier mutex poisoned"))
    }
}

impl Notifier for RecordingNotifier {
    fn announce(&self, scope: Scope, message: &str) -> Result<(), String> {
        self.notices
            .lock()
            .map_err(|e| e.to_string())?
            .push(Notice::Announce(scope, message.to_string()));
        Ok(())
    }

    fn notify_turn(&self, team: &FantasyTeam) -> Result<(), String> {
        self.notices
            .lock()
            .map_err(|e| e.to_string())?
            .push(Notice::Turn(team.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl Notifier for Failing {
        fn announce(&self, _: Scope, _: &str) -> Result<(), String> {
            Err("channel unavailable".into())
        }
        fn notify_turn(&self, _: &FantasyTeam) -> Result<(), String> {
            Err("channel unavailable".into())
        }
    }

    #[test]
    fn failures_are_swallowed() {
        announce(&Failing, Scope::League(LeagueId(1)), "hello");
        notify_turn(
            &Failing,
            &FantasyTeam {
                id: crate::model::FantasyTeamId(1),
                name: "A".into(),
                league_id: LeagueId(1),
            },
        );
    }

    #[test]
    fn recording_notifier_drains() {
        let rec = RecordingNotifier::default();
        announce(&rec, Scope::Draft(DraftId(2)), "pick made");
        let notices = rec.take();
        assert_eq!(
            notices,
            vec![Notice::Announce(Scope::Draft(DraftId(2)), "pick made".into())]
        );
        assert!(rec.take().is_empty());
    }
}
