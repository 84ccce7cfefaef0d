// SQLite store shared by every engine.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::model::{
    Competition, CompetitionResult, Entrant, EntrantId, FantasyTeam, FantasyTeamId, League,
    LeagueId, SeasonWeek,
};
use crate::waiver;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entrants (
        entrant_id        INTEGER PRIMARY KEY,
        name              TEXT NOT NULL,
        in_region         INTEGER NOT NULL DEFAULT 0,
        first_active_year INTEGER
    );

    CREATE TABLE IF NOT EXISTS competitions (
        competition_key TEXT PRIMARY KEY,
        name            TEXT NOT NULL,
        year            INTEGER NOT NULL,
        week            INTEGER NOT NULL,
        in_region       INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS competition_results (
        entrant_id      INTEGER NOT NULL REFERENCES entrants(entrant_id),
        competition_key TEXT NOT NULL REFERENCES competitions(competition_key),
        qual_points     INTEGER NOT NULL DEFAULT 0,
        alliance_points INTEGER NOT NULL DEFAULT 0,
        elim_points     INTEGER NOT NULL DEFAULT 0,
        award_points    INTEGER NOT NULL DEFAULT 0,
        rookie_points   INTEGER NOT NULL DEFAULT 0,
        stat_correction INTEGER NOT NULL DEFAULT 0,
        finished        INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (entrant_id, competition_key)
    );

    CREATE TABLE IF NOT EXISTS leagues (
        league_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT NOT NULL,
        year        INTEGER NOT NULL,
        active      INTEGER NOT NULL DEFAULT 1,
        roster_size INTEGER NOT NULL DEFAULT 8,
        min_starts  INTEGER NOT NULL DEFAULT 3,
        is_region   INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS fantasy_teams (
        fantasy_team_id INTEGER PRIMARY KEY AUTOINCREMENT,
        name            TEXT NOT NULL,
        league_id       INTEGER NOT NULL REFERENCES leagues(league_id)
    );

    CREATE TABLE IF NOT EXISTS season_weeks (
        year           INTEGER PRIMARY KEY,
        week           INTEGER NOT NULL,
        lineups_locked INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS drafts (
        draft_id        INTEGER PRIMARY KEY AUTOINCREMENT,
        league_id       INTEGER NOT NULL REFERENCES leagues(league_id),
        competition_key TEXT NOT NULL,
        rounds          INTEGER NOT NULL,
        materialized    INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS draft_order (
        draft_id        INTEGER NOT NULL REFERENCES drafts(draft_id),
        fantasy_team_id INTEGER NOT NULL REFERENCES fantasy_teams(fantasy_team_id),
        slot            INTEGER NOT NULL,
        PRIMARY KEY (draft_id, fantasy_team_id),
        UNIQUE (draft_id, slot)
    );

    CREATE TABLE IF NOT EXISTS draft_picks (
        draft_id        INTEGER NOT NULL REFERENCES drafts(draft_id),
        pick_number     INTEGER NOT NULL,
        fantasy_team_id INTEGER NOT NULL REFERENCES fantasy_teams(fantasy_team_id),
        entrant_id      INTEGER REFERENCES entrants(entrant_id),
        PRIMARY KEY (draft_id, pick_number)
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_draft_picks_entrant
        ON draft_picks(draft_id, entrant_id) WHERE entrant_id IS NOT NULL;

    CREATE TABLE IF NOT EXISTS ledger (
        league_id       INTEGER NOT NULL REFERENCES leagues(league_id),
        entrant_id      INTEGER NOT NULL REFERENCES entrants(entrant_id),
        fantasy_team_id INTEGER NOT NULL REFERENCES fantasy_teams(fantasy_team_id),
        draft_id        INTEGER REFERENCES drafts(draft_id),
        PRIMARY KEY (league_id, entrant_id)
    );

    CREATE INDEX IF NOT EXISTS idx_ledger_team ON ledger(fantasy_team_id);

    CREATE TABLE IF NOT EXISTS starts (
        league_id       INTEGER NOT NULL REFERENCES leagues(league_id),
        fantasy_team_id INTEGER NOT NULL REFERENCES fantasy_teams(fantasy_team_id),
        entrant_id      INTEGER NOT NULL REFERENCES entrants(entrant_id),
        competition_key TEXT NOT NULL REFERENCES competitions(competition_key),
        week            INTEGER NOT NULL,
        PRIMARY KEY (league_id, fantasy_team_id, entrant_id, competition_key, week)
    );

    CREATE TABLE IF NOT EXISTS waiver_priority (
        league_id       INTEGER NOT NULL REFERENCES leagues(league_id),
        fantasy_team_id INTEGER NOT NULL REFERENCES fantasy_teams(fantasy_team_id),
        priority        INTEGER NOT NULL,
        PRIMARY KEY (league_id, fantasy_team_id),
        UNIQUE (league_id, priority)
    );

    CREATE TABLE IF NOT EXISTS waiver_claims (
        fantasy_team_id INTEGER NOT NULL REFERENCES fantasy_teams(fantasy_team_id),
        league_id       INTEGER NOT NULL REFERENCES leagues(league_id),
        add_entrant     INTEGER NOT NULL REFERENCES entrants(entrant_id),
        drop_entrant    INTEGER NOT NULL REFERENCES entrants(entrant_id),
        sub_priority    INTEGER NOT NULL,
        PRIMARY KEY (fantasy_team_id, sub_priority)
    );

    CREATE TABLE IF NOT EXISTS waiver_pool (
        league_id  INTEGER NOT NULL REFERENCES leagues(league_id),
        entrant_id INTEGER NOT NULL REFERENCES entrants(entrant_id),
        PRIMARY KEY (league_id, entrant_id)
    );

    CREATE TABLE IF NOT EXISTS trade_proposals (
        trade_id        INTEGER PRIMARY KEY AUTOINCREMENT,
        league_id       INTEGER NOT NULL REFERENCES leagues(league_id),
        proposer_id     INTEGER NOT NULL REFERENCES fantasy_teams(fantasy_team_id),
        counterparty_id INTEGER NOT NULL REFERENCES fantasy_teams(fantasy_team_id),
        created_at      TEXT NOT NULL,
        expires_at      TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS trade_entrants (
        trade_id   INTEGER NOT NULL REFERENCES trade_proposals(trade_id) ON DELETE CASCADE,
        entrant_id INTEGER NOT NULL REFERENCES entrants(entrant_id),
        offered    INTEGER NOT NULL,
        PRIMARY KEY (trade_id, entrant_id)
    );
";

/// Parameters for a new league.
#[derive(Debug, Clone)]
pub struct NewLeague {
    pub name: String,
    pub year: i32,
    pub roster_size: u32,
    pub min_starts: u32,
    pub is_region: bool,
}

/// Outcome of an insert-or-update of reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

/// The authoritative store. Every mutation runs inside one immediate
/// transaction while holding the connection lock, so engine operations are
/// atomic and serialized.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral database.
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(SCHEMA)?;
        info!("database ready at {path}");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Run `f` inside one immediate transaction. Any error rolls back every
    /// write `f` made.
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> EngineResult<T>) -> EngineResult<T> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run a read-only closure against the connection.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> EngineResult<T>) -> EngineResult<T> {
        let conn = self.conn();
        f(&conn)
    }

    // ------------------------------------------------------------------
    // League setup
    // ------------------------------------------------------------------

    pub fn create_league(&self, new: &NewLeague) -> EngineResult<League> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO leagues (name, year, active, roster_size, min_starts, is_region)
                 VALUES (?1, ?2, 1, ?3, ?4, ?5)",
                params![new.name, new.year, new.roster_size, new.min_starts, new.is_region],
            )?;
            let id = LeagueId(tx.last_insert_rowid());
            info!("created league {id} ({})", new.name);
            league(tx, id)
        })
    }

    pub fn set_league_active(&self, id: LeagueId, active: bool) -> EngineResult<()> {
        self.write(|tx| {
            let changed = tx.execute(
                "UPDATE leagues SET active = ?2 WHERE league_id = ?1",
                params![id, active],
            )?;
            if changed == 0 {
                return Err(EngineError::not_found("league", id));
            }
            Ok(())
        })
    }

    pub fn create_fantasy_team(&self, league_id: LeagueId, name: &str) -> EngineResult<FantasyTeam> {
        self.write(|tx| {
            league(tx, league_id)?;
            tx.execute(
                "INSERT INTO fantasy_teams (name, league_id) VALUES (?1, ?2)",
                params![name, league_id],
            )?;
            let id = FantasyTeamId(tx.last_insert_rowid());
            if waiver::append_if_seeded(tx, league_id, id)? {
                debug!("team {id} joins waiver priority of league {league_id} last");
            }
            info!("created fantasy team {id} ({name}) in league {league_id}");
            fantasy_team(tx, id)
        })
    }

    pub fn rename_fantasy_team(&self, id: FantasyTeamId, name: &str) -> EngineResult<FantasyTeam> {
        if name.trim().is_empty() || !name.is_ascii() {
            return Err(EngineError::InvalidState(format!("invalid team name {name:?}")));
        }
        self.write(|tx| {
            let changed = tx.execute(
                "UPDATE fantasy_teams SET name = ?2 WHERE fantasy_team_id = ?1",
                params![id, name],
            )?;
            if changed == 0 {
                return Err(EngineError::not_found("fantasy team", id));
            }
            fantasy_team(tx, id)
        })
    }

    pub fn set_season_week(&self, week: SeasonWeek) -> EngineResult<()> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO season_weeks (year, week, lineups_locked) VALUES (?1, ?2, ?3)
                 ON CONFLICT(year) DO UPDATE SET
                    week = excluded.week,
                    lineups_locked = excluded.lineups_locked",
                params![week.year, week.week, week.lineups_locked],
            )?;
            info!(
                "season {} now week {} (lineups {})",
                week.year,
                week.week,
                if week.lineups_locked { "locked" } else { "open" }
            );
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Reference data
    // ------------------------------------------------------------------

    pub fn upsert_entrant(&self, entrant: &Entrant) -> EngineResult<Upsert> {
        self.write(|tx| upsert_entrant(tx, entrant))
    }

    pub fn upsert_competition(&self, competition: &Competition) -> EngineResult<Upsert> {
        self.write(|tx| upsert_competition(tx, competition))
    }

    pub fn record_result(&self, result: &CompetitionResult) -> EngineResult<Upsert> {
        self.write(|tx| upsert_result(tx, result))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn league(&self, id: LeagueId) -> EngineResult<League> {
        self.read(|conn| league(conn, id))
    }

    pub fn fantasy_team(&self, id: FantasyTeamId) -> EngineResult<FantasyTeam> {
        self.read(|conn| fantasy_team(conn, id))
    }

    pub fn league_teams(&self, id: LeagueId) -> EngineResult<Vec<FantasyTeam>> {
        self.read(|conn| league_teams(conn, id))
    }

    pub fn entrant(&self, id: EntrantId) -> EngineResult<Entrant> {
        self.read(|conn| entrant(conn, id))
    }

    pub fn season_week(&self, year: i32) -> EngineResult<SeasonWeek> {
        self.read(|conn| season_week(conn, year))
    }
}

// ---------------------------------------------------------------------------
// Row helpers shared by the engines. They take a plain `Connection` so they
// work inside and outside a transaction.
// ---------------------------------------------------------------------------

fn league_from_row(row: &Row<'_>) -> rusqlite::Result<League> {
    Ok(League {
        id: row.get(0)?,
        name: row.get(1)?,
        year: row.get(2)?,
        active: row.get(3)?,
        roster_size: row.get(4)?,
        min_starts: row.get(5)?,
        is_region: row.get(6)?,
    })
}

pub(crate) fn league(conn: &Connection, id: LeagueId) -> EngineResult<League> {
    conn.query_row(
        "SELECT league_id, name, year, active, roster_size, min_starts, is_region
         FROM leagues WHERE league_id = ?1",
        params![id],
        league_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("league", id))
}

pub(crate) fn fantasy_team(conn: &Connection, id: FantasyTeamId) -> EngineResult<FantasyTeam> {
    conn.query_row(
        "SELECT fantasy_team_id, name, league_id FROM fantasy_teams WHERE fantasy_team_id = ?1",
        params![id],
        |row| {
            Ok(FantasyTeam {
                id: row.get(0)?,
                name: row.get(1)?,
                league_id: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("fantasy team", id))
}

pub(crate) fn league_teams(conn: &Connection, id: LeagueId) -> EngineResult<Vec<FantasyTeam>> {
    let mut stmt = conn.prepare(
        "SELECT fantasy_team_id, name, league_id FROM fantasy_teams
         WHERE league_id = ?1 ORDER BY fantasy_team_id",
    )?;
    let teams = stmt
        .query_map(params![id], |row| {
            Ok(FantasyTeam {
                id: row.get(0)?,
                name: row.get(1)?,
                league_id: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(teams)
}

pub(crate) fn entrant(conn: &Connection, id: EntrantId) -> EngineResult<Entrant> {
    conn.query_row(
        "SELECT entrant_id, name, in_region, first_active_year FROM entrants WHERE entrant_id = ?1",
        params![id],
        |row| {
            Ok(Entrant {
                id: row.get(0)?,
                name: row.get(1)?,
                in_region: row.get(2)?,
                first_active_year: row.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("entrant", id))
}

pub(crate) fn competition(conn: &Connection, key: &str) -> EngineResult<Option<Competition>> {
    let comp = conn
        .query_row(
            "SELECT competition_key, name, year, week, in_region
             FROM competitions WHERE competition_key = ?1",
            params![key],
            |row| {
                Ok(Competition {
                    key: row.get(0)?,
                    name: row.get(1)?,
                    year: row.get(2)?,
                    week: row.get(3)?,
                    in_region: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(comp)
}

pub(crate) fn season_week(conn: &Connection, year: i32) -> EngineResult<SeasonWeek> {
    let week = conn
        .query_row(
            "SELECT year, week, lineups_locked FROM season_weeks WHERE year = ?1",
            params![year],
            |row| {
                Ok(SeasonWeek {
                    year: row.get(0)?,
                    week: row.get(1)?,
                    lineups_locked: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(week.unwrap_or_else(|| SeasonWeek::opening(year)))
}

pub(crate) fn upsert_entrant(conn: &Connection, entrant: &Entrant) -> EngineResult<Upsert> {
    let existing: Option<(String, bool, Option<i32>)> = conn
        .query_row(
            "SELECT name, in_region, first_active_year FROM entrants WHERE entrant_id = ?1",
            params![entrant.id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    match existing {
        None => {
            conn.execute(
                "INSERT INTO entrants (entrant_id, name, in_region, first_active_year)
                 VALUES (?1, ?2, ?3, ?4)",
                params![entrant.id, entrant.name, entrant.in_region, entrant.first_active_year],
            )?;
            Ok(Upsert::Inserted)
        }
        Some((name, in_region, year))
            if name == entrant.name
                && in_region == entrant.in_region
                && year == entrant.first_active_year =>
        {
            Ok(Upsert::Unchanged)
        }
        Some(_) => {
            conn.execute(
                "UPDATE entrants SET name = ?2, in_region = ?3, first_active_year = ?4
                 WHERE entrant_id = ?1",
                params![entrant.id, entrant.name, entrant.in_region, entrant.first_active_year],
            )?;
            Ok(Upsert::Updated)
        }
    }
}

pub(crate) fn upsert_competition(conn: &Connection, comp: &Competition) -> EngineResult<Upsert> {
    match competition(conn, &comp.key)? {
        None => {
            conn.execute(
                "INSERT INTO competitions (competition_key, name, year, week, in_region)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![comp.key, comp.name, comp.year, comp.week, comp.in_region],
            )?;
            Ok(Upsert::Inserted)
        }
        Some(existing) if existing == *comp => Ok(Upsert::Unchanged),
        Some(_) => {
            conn.execute(
                "UPDATE competitions SET name = ?2, year = ?3, week = ?4, in_region = ?5
                 WHERE competition_key = ?1",
                params![comp.key, comp.name, comp.year, comp.week, comp.in_region],
            )?;
            Ok(Upsert::Updated)
        }
    }
}

pub(crate) fn upsert_result(conn: &Connection, result: &CompetitionResult) -> EngineResult<Upsert> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM competition_results
                       WHERE entrant_id = ?1 AND competition_key = ?2)",
        params![result.entrant_id, result.competition_key],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO competition_results
            (entrant_id, competition_key, qual_points, alliance_points, elim_points,
             award_points, rookie_points, stat_correction, finished)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(entrant_id, competition_key) DO UPDATE SET
            qual_points     = excluded.qual_points,
            alliance_points = excluded.alliance_points,
            elim_points     = excluded.elim_points,
            award_points    = excluded.award_points,
            rookie_points   = excluded.rookie_points,
            stat_correction = excluded.stat_correction,
            finished        = excluded.finished",
        params![
            result.entrant_id,
            result.competition_key,
            result.qual_points,
            result.alliance_points,
            result.elim_points,
            result.award_points,
            result.rookie_points,
            result.stat_correction,
            result.finished,
        ],
    )?;
    Ok(if exists { Upsert::Updated } else { Upsert::Inserted })
}
