// Draft engine: turn-based allocation of entrants to fantasy teams.
//
// Lifecycle: NotStarted -> Ordered -> InProgress -> Complete. Completion
// writes one ledger entry per pick exactly once, guarded by the draft's
// `materialized` flag.

use rand::Rng;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use super::order::{pick_schedule, shuffle_slots};
use crate::db::{self, Database};
use crate::eligibility::{CompetitionContext, EligibilityOracle};
use crate::error::{EngineError, EngineResult};
use crate::ledger;
use crate::model::{
    Actor, Draft, DraftId, DraftPick, DraftSlot, DraftStatus, EntrantId, FantasyTeam,
    FantasyTeamId, LeagueId, LedgerEntry,
};
use crate::notify::{self, Notifier, Scope};
use crate::waiver;

/// Result of a successful pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PickOutcome {
    pub pick: DraftPick,
    pub team: FantasyTeam,
    /// Team now on the clock, or `None` once the draft is complete.
    pub next: Option<FantasyTeam>,
    /// True when this pick completed the draft and its results were
    /// written to the ledger.
    pub materialized: bool,
}

pub struct DraftEngine<'a> {
    db: &'a Database,
    oracle: &'a dyn EligibilityOracle,
    notifier: &'a dyn Notifier,
}

impl<'a> DraftEngine<'a> {
    pub fn new(
        db: &'a Database,
        oracle: &'a dyn EligibilityOracle,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            db,
            oracle,
            notifier,
        }
    }

    /// Create a draft for `league` against `competition_key`. No slots or
    /// picks exist yet.
    pub fn create_draft(
        &self,
        league_id: LeagueId,
        competition_key: &str,
        rounds: u32,
    ) -> EngineResult<Draft> {
        let draft = self.db.write(|tx| {
            let league = db::league(tx, league_id)?;
            if !league.active {
                return Err(EngineError::InvalidState(format!(
                    "league {league_id} is not active"
                )));
            }
            if db::league_teams(tx, league_id)?.is_empty() {
                return Err(EngineError::InvalidState(format!(
                    "league {league_id} has no fantasy teams"
                )));
            }
            if rounds == 0 || rounds < league.min_starts {
                return Err(EngineError::InvalidState(format!(
                    "a draft needs at least {} rounds, got {rounds}",
                    league.min_starts.max(1)
                )));
            }
            if !league.is_region && db::competition(tx, competition_key)?.is_none() {
                return Err(EngineError::not_found("competition", competition_key));
            }
            tx.execute(
                "INSERT INTO drafts (league_id, competition_key, rounds) VALUES (?1, ?2, ?3)",
                params![league_id, competition_key, rounds],
            )?;
            load_draft(tx, DraftId(tx.last_insert_rowid()))
        })?;
        info!(
            "created draft {} for league {} ({}, {} rounds)",
            draft.id, draft.league_id, draft.competition_key, draft.rounds
        );
        Ok(draft)
    }

    /// Shuffle the league's teams into draft slots.
    pub fn generate_draft_order(&self, draft_id: DraftId) -> EngineResult<Vec<DraftSlot>> {
        self.generate_draft_order_with(draft_id, &mut rand::thread_rng())
    }

    pub fn generate_draft_order_with<R: Rng + ?Sized>(
        &self,
        draft_id: DraftId,
        rng: &mut R,
    ) -> EngineResult<Vec<DraftSlot>> {
        let order = self.db.write(|tx| {
            let draft = load_draft(tx, draft_id)?;
            ensure_not_started(tx, draft_id)?;
            let teams: Vec<FantasyTeamId> = db::league_teams(tx, draft.league_id)?
                .into_iter()
                .map(|t| t.id)
                .collect();
            let order = shuffle_slots(&teams, rng);
            write_order(tx, draft_id, &order)?;
            Ok(order)
        })?;
        info!("generated order for draft {draft_id}: {} slots", order.len());
        Ok(order)
    }

    /// Administrative explicit order: `teams[0]` gets slot 1, and so on. Must
    /// name every team of the league exactly once.
    pub fn set_draft_order(
        &self,
        draft_id: DraftId,
        teams: &[FantasyTeamId],
    ) -> EngineResult<Vec<DraftSlot>> {
        self.db.write(|tx| {
            let draft = load_draft(tx, draft_id)?;
            ensure_not_started(tx, draft_id)?;
            let mut expected: Vec<FantasyTeamId> = db::league_teams(tx, draft.league_id)?
                .into_iter()
                .map(|t| t.id)
                .collect();
            let mut given = teams.to_vec();
            expected.sort();
            given.sort();
            if expected != given {
                return Err(EngineError::InvalidState(format!(
                    "draft order must list each of the {} league teams exactly once",
                    expected.len()
                )));
            }
            let order: Vec<DraftSlot> = teams
                .iter()
                .zip(1..)
                .map(|(&fantasy_team_id, slot)| DraftSlot {
                    fantasy_team_id,
                    slot,
                })
                .collect();
            write_order(tx, draft_id, &order)?;
            Ok(order)
        })
    }

    /// Generate every pick row in serpentine order, all unfilled.
    pub fn start_draft(&self, draft_id: DraftId) -> EngineResult<usize> {
        let (created, first) = self.db.write(|tx| {
            let draft = load_draft(tx, draft_id)?;
            let order = load_order(tx, draft_id)?;
            if order.is_empty() {
                return Err(EngineError::InvalidState(format!(
                    "draft {draft_id} has no order; generate one first"
                )));
            }
            ensure_not_started(tx, draft_id)?;
            let schedule = pick_schedule(&order, draft.rounds);
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO draft_picks (draft_id, pick_number, fantasy_team_id, entrant_id)
                     VALUES (?1, ?2, ?3, NULL)",
                )?;
                for (pick_number, team) in &schedule {
                    stmt.execute(params![draft_id, pick_number, team])?;
                }
            }
            let first = match schedule.first() {
                Some((_, team)) => Some(db::fantasy_team(tx, *team)?),
                None => None,
            };
            Ok((schedule.len(), first))
        })?;
        info!("started draft {draft_id} with {created} picks");
        notify::announce(self.notifier, Scope::Draft(draft_id), "The draft has started!");
        if let Some(team) = first {
            notify::notify_turn(self.notifier, &team);
        }
        Ok(created)
    }

    /// The unfilled pick with the lowest number, or `None` when complete or
    /// not yet started.
    pub fn current_pick(&self, draft_id: DraftId) -> EngineResult<Option<DraftPick>> {
        self.db.read(|conn| {
            load_draft(conn, draft_id)?;
            current_pick(conn, draft_id)
        })
    }

    /// Fill the current pick with `entrant`. Validation runs in order: draft
    /// not complete, actor on the clock (administrators bypass), entrant not
    /// already taken, entrant eligible. A rejected pick writes nothing.
    pub fn make_pick(
        &self,
        draft_id: DraftId,
        actor: Actor,
        entrant: EntrantId,
    ) -> EngineResult<PickOutcome> {
        let outcome = self.db.write(|tx| {
            let draft = load_draft(tx, draft_id)?;
            let league = db::league(tx, draft.league_id)?;

            let Some(mut pick) = current_pick(tx, draft_id)? else {
                if has_picks(tx, draft_id)? {
                    return Err(EngineError::DraftComplete);
                }
                return Err(EngineError::InvalidState(format!(
                    "draft {draft_id} has not started"
                )));
            };

            if !actor.may_act_for(pick.fantasy_team_id) {
                return Err(EngineError::WrongTurn {
                    actor: actor.to_string(),
                    on_clock: pick.fantasy_team_id,
                });
            }

            db::entrant(tx, entrant)?;
            if is_picked(tx, draft_id, entrant)?
                || held_by_open_draft(tx, league.id, entrant)?
                || ledger::owner_of(tx, league.id, entrant)?.is_some()
            {
                return Err(EngineError::AlreadyTaken(entrant));
            }

            let context = CompetitionContext::for_draft(&league, &draft);
            if !self.oracle.is_eligible(tx, entrant, &context)? {
                return Err(EngineError::NotEligible(entrant));
            }

            let filled = tx
                .execute(
                    "UPDATE draft_picks SET entrant_id = ?3
                     WHERE draft_id = ?1 AND pick_number = ?2 AND entrant_id IS NULL",
                    params![draft_id, pick.pick_number, entrant],
                )
                .map_err(|e| {
                    if is_constraint_violation(&e) {
                        EngineError::AlreadyTaken(entrant)
                    } else {
                        EngineError::Storage(e)
                    }
                })?;
            if filled == 0 {
                return Err(EngineError::Conflict(format!(
                    "pick #{} was already made",
                    pick.pick_number
                )));
            }
            pick.entrant_id = Some(entrant);

            let team = db::fantasy_team(tx, pick.fantasy_team_id)?;
            let (next, materialized) = on_pick_completion(tx, &draft)?;
            Ok(PickOutcome {
                pick,
                team,
                next,
                materialized,
            })
        })?;

        info!(
            "draft {draft_id}: pick #{} -> team {} takes entrant {entrant} ({actor})",
            outcome.pick.pick_number, outcome.team.id
        );
        self.announce_pick(draft_id, &outcome);
        Ok(outcome)
    }

    /// Re-run completion handling. Materializes a fully filled draft that has
    /// not been written to the ledger yet; a no-op otherwise.
    pub fn on_pick_completion(&self, draft_id: DraftId) -> EngineResult<bool> {
        let materialized = self.db.write(|tx| {
            let draft = load_draft(tx, draft_id)?;
            let (_, materialized) = on_pick_completion(tx, &draft)?;
            Ok(materialized)
        })?;
        if materialized {
            notify::announce(self.notifier, Scope::Draft(draft_id), "Draft is complete!");
        }
        Ok(materialized)
    }

    /// Delete every pick so the draft can be restarted. Not allowed once the
    /// results are in the ledger.
    pub fn reset_draft(&self, draft_id: DraftId) -> EngineResult<usize> {
        let deleted = self.db.write(|tx| {
            let draft = load_draft(tx, draft_id)?;
            if draft.materialized {
                return Err(EngineError::InvalidState(format!(
                    "draft {draft_id} is already in the ledger and cannot be reset"
                )));
            }
            Ok(tx.execute(
                "DELETE FROM draft_picks WHERE draft_id = ?1",
                params![draft_id],
            )?)
        })?;
        info!("reset draft {draft_id}: removed {deleted} picks");
        Ok(deleted)
    }

    fn announce_pick(&self, draft_id: DraftId, outcome: &PickOutcome) {
        let scope = Scope::Draft(draft_id);
        if let Some(entrant) = outcome.pick.entrant_id {
            notify::announce(
                self.notifier,
                scope,
                &format!(
                    "{} selected entrant {entrant} with pick #{}",
                    outcome.team.name, outcome.pick.pick_number
                ),
            );
        }
        match &outcome.next {
            Some(team) => notify::notify_turn(self.notifier, team),
            None if outcome.materialized => notify::announce(self.notifier, scope, "Draft is complete!"),
            None => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

impl Database {
    pub fn draft(&self, id: DraftId) -> EngineResult<Draft> {
        self.read(|conn| load_draft(conn, id))
    }

    /// Slot order for a draft, ascending by slot.
    pub fn draft_order(&self, id: DraftId) -> EngineResult<Vec<DraftSlot>> {
        self.read(|conn| {
            load_draft(conn, id)?;
            load_order(conn, id)
        })
    }

    /// All picks for a draft ordered by pick number.
    pub fn draft_picks(&self, id: DraftId) -> EngineResult<Vec<DraftPick>> {
        self.read(|conn| {
            load_draft(conn, id)?;
            load_picks(conn, id)
        })
    }

    pub fn draft_status(&self, id: DraftId) -> EngineResult<DraftStatus> {
        self.read(|conn| {
            load_draft(conn, id)?;
            if load_order(conn, id)?.is_empty() {
                return Ok(DraftStatus::NotStarted);
            }
            if !has_picks(conn, id)? {
                return Ok(DraftStatus::Ordered);
            }
            Ok(match current_pick(conn, id)? {
                Some(_) => DraftStatus::InProgress,
                None => DraftStatus::Complete,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

pub(crate) fn load_draft(conn: &Connection, id: DraftId) -> EngineResult<Draft> {
    conn.query_row(
        "SELECT draft_id, league_id, competition_key, rounds, materialized
         FROM drafts WHERE draft_id = ?1",
        params![id],
        |row| {
            Ok(Draft {
                id: row.get(0)?,
                league_id: row.get(1)?,
                competition_key: row.get(2)?,
                rounds: row.get(3)?,
                materialized: row.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("draft", id))
}

pub(crate) fn load_order(conn: &Connection, id: DraftId) -> EngineResult<Vec<DraftSlot>> {
    let mut stmt = conn.prepare(
        "SELECT fantasy_team_id, slot FROM draft_order WHERE draft_id = ?1 ORDER BY slot",
    )?;
    let order = stmt
        .query_map(params![id], |row| {
            Ok(DraftSlot {
                fantasy_team_id: row.get(0)?,
                slot: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(order)
}

fn load_picks(conn: &Connection, id: DraftId) -> EngineResult<Vec<DraftPick>> {
    let mut stmt = conn.prepare(
        "SELECT draft_id, pick_number, fantasy_team_id, entrant_id
         FROM draft_picks WHERE draft_id = ?1 ORDER BY pick_number",
    )?;
    let picks = stmt
        .query_map(params![id], |row| {
            Ok(DraftPick {
                draft_id: row.get(0)?,
                pick_number: row.get(1)?,
                fantasy_team_id: row.get(2)?,
                entrant_id: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(picks)
}

fn current_pick(conn: &Connection, id: DraftId) -> EngineResult<Option<DraftPick>> {
    let pick = conn
        .query_row(
            "SELECT draft_id, pick_number, fantasy_team_id, entrant_id
             FROM draft_picks WHERE draft_id = ?1 AND entrant_id IS NULL
             ORDER BY pick_number LIMIT 1",
            params![id],
            |row| {
                Ok(DraftPick {
                    draft_id: row.get(0)?,
                    pick_number: row.get(1)?,
                    fantasy_team_id: row.get(2)?,
                    entrant_id: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(pick)
}

fn has_picks(conn: &Connection, id: DraftId) -> EngineResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM draft_picks WHERE draft_id = ?1)",
        params![id],
        |row| row.get(0),
    )?)
}

fn is_picked(conn: &Connection, id: DraftId, entrant: EntrantId) -> EngineResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM draft_picks WHERE draft_id = ?1 AND entrant_id = ?2)",
        params![id, entrant],
        |row| row.get(0),
    )?)
}

/// Whether `entrant` fills a pick in any draft of `league` that has not yet
/// been written to the ledger.
pub(crate) fn held_by_open_draft(
    conn: &Connection,
    league: LeagueId,
    entrant: EntrantId,
) -> EngineResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM draft_picks p JOIN drafts d ON d.draft_id = p.draft_id
             WHERE d.league_id = ?1 AND d.materialized = 0 AND p.entrant_id = ?2)",
        params![league, entrant],
        |row| row.get(0),
    )?)
}

fn ensure_not_started(conn: &Connection, id: DraftId) -> EngineResult<()> {
    if has_picks(conn, id)? {
        return Err(EngineError::InvalidState(format!(
            "draft {id} has already started"
        )));
    }
    Ok(())
}

fn write_order(conn: &Connection, id: DraftId, order: &[DraftSlot]) -> EngineResult<()> {
    conn.execute("DELETE FROM draft_order WHERE draft_id = ?1", params![id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO draft_order (draft_id, fantasy_team_id, slot) VALUES (?1, ?2, ?3)",
    )?;
    for slot in order {
        stmt.execute(params![id, slot.fantasy_team_id, slot.slot])?;
    }
    Ok(())
}

/// After a pick: find who is on the clock, and when nobody is, write the
/// draft into the ledger unless that already happened.
fn on_pick_completion(
    conn: &Connection,
    draft: &Draft,
) -> EngineResult<(Option<FantasyTeam>, bool)> {
    if let Some(next) = current_pick(conn, draft.id)? {
        return Ok((Some(db::fantasy_team(conn, next.fantasy_team_id)?), false));
    }
    if !has_picks(conn, draft.id)? {
        return Ok((None, false));
    }
    Ok((None, materialize(conn, draft)?))
}

fn materialize(conn: &Connection, draft: &Draft) -> EngineResult<bool> {
    let flipped = conn.execute(
        "UPDATE drafts SET materialized = 1 WHERE draft_id = ?1 AND materialized = 0",
        params![draft.id],
    )?;
    if flipped == 0 {
        debug!("draft {} already materialized", draft.id);
        return Ok(false);
    }

    let picks = load_picks(conn, draft.id)?;
    for pick in &picks {
        let Some(entrant_id) = pick.entrant_id else {
            return Err(EngineError::InvalidState(format!(
                "pick #{} of draft {} is unfilled",
                pick.pick_number, draft.id
            )));
        };
        ledger::insert(
            conn,
            &LedgerEntry {
                entrant_id,
                fantasy_team_id: pick.fantasy_team_id,
                league_id: draft.league_id,
                draft_id: Some(draft.id),
            },
        )?;
    }

    // Last slot waives first.
    let reversed: Vec<FantasyTeamId> = load_order(conn, draft.id)?
        .into_iter()
        .rev()
        .map(|s| s.fantasy_team_id)
        .collect();
    if waiver::seed_if_empty(conn, draft.league_id, &reversed)? {
        debug!("seeded waiver priority for league {} from draft {}", draft.league_id, draft.id);
    }

    info!(
        "draft {} complete: wrote {} ledger entries for league {}",
        draft.id,
        picks.len(),
        draft.league_id
    );
    Ok(true)
}
