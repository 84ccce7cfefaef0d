// Roster ledger: the authoritative entrant -> fantasy team ownership per league.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::model::{DraftId, EntrantId, FantasyTeamId, LeagueId, LedgerEntry};

/// Current owner of `entrant` in `league`, if any.
pub(crate) fn owner_of(
    conn: &Connection,
    league: LeagueId,
    entrant: EntrantId,
) -> EngineResult<Option<FantasyTeamId>> {
    let owner = conn
        .query_row(
            "SELECT fantasy_team_id FROM ledger WHERE league_id = ?1 AND entrant_id = ?2",
            params![league, entrant],
            |row| row.get(0),
        )
        .optional()?;
    Ok(owner)
}

pub(crate) fn owns(
    conn: &Connection,
    league: LeagueId,
    team: FantasyTeamId,
    entrant: EntrantId,
) -> EngineResult<bool> {
    Ok(owner_of(conn, league, entrant)? == Some(team))
}

/// Insert a new ownership row. Fails with `Conflict` if the entrant is
/// already owned in the league.
pub(crate) fn insert(conn: &Connection, entry: &LedgerEntry) -> EngineResult<()> {
    if let Some(owner) = owner_of(conn, entry.league_id, entry.entrant_id)? {
        return Err(EngineError::Conflict(format!(
            "entrant {} is already owned by team {owner} in league {}",
            entry.entrant_id, entry.league_id
        )));
    }
    conn.execute(
        "INSERT INTO ledger (league_id, entrant_id, fantasy_team_id, draft_id)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.league_id,
            entry.entrant_id,
            entry.fantasy_team_id,
            entry.draft_id
        ],
    )?;
    Ok(())
}

/// Remove `entrant` from `team`. Fails with `Conflict` if the team no longer
/// owns it.
pub(crate) fn remove(
    conn: &Connection,
    league: LeagueId,
    team: FantasyTeamId,
    entrant: EntrantId,
) -> EngineResult<()> {
    let removed = conn.execute(
        "DELETE FROM ledger WHERE league_id = ?1 AND entrant_id = ?2 AND fantasy_team_id = ?3",
        params![league, entrant, team],
    )?;
    if removed == 0 {
        return Err(EngineError::Conflict(format!(
            "team {team} no longer owns entrant {entrant}"
        )));
    }
    Ok(())
}

/// Move `entrant` from `from` to `to`, conditional on `from` still owning it.
pub(crate) fn transfer(
    conn: &Connection,
    league: LeagueId,
    entrant: EntrantId,
    from: FantasyTeamId,
    to: FantasyTeamId,
) -> EngineResult<()> {
    let moved = conn.execute(
        "UPDATE ledger SET fantasy_team_id = ?4
         WHERE league_id = ?1 AND entrant_id = ?2 AND fantasy_team_id = ?3",
        params![league, entrant, from, to],
    )?;
    if moved == 0 {
        return Err(EngineError::Conflict(format!(
            "entrant {entrant} is no longer owned by team {from}"
        )));
    }
    Ok(())
}

/// Delete started designations for `entrant` from `from_week` onward. When
/// `team` is given only that team's designations are removed.
pub(crate) fn strip_starts(
    conn: &Connection,
    league: LeagueId,
    entrant: EntrantId,
    team: Option<FantasyTeamId>,
    from_week: u32,
) -> EngineResult<usize> {
    let removed = match team {
        Some(team) => conn.execute(
            "DELETE FROM starts
             WHERE league_id = ?1 AND entrant_id = ?2 AND fantasy_team_id = ?3 AND week >= ?4",
            params![league, entrant, team, from_week],
        )?,
        None => conn.execute(
            "DELETE FROM starts WHERE league_id = ?1 AND entrant_id = ?2 AND week >= ?3",
            params![league, entrant, from_week],
        )?,
    };
    Ok(removed)
}

fn entries_where(
    conn: &Connection,
    clause: &str,
    arg: i64,
) -> EngineResult<Vec<LedgerEntry>> {
    let sql = format!(
        "SELECT entrant_id, fantasy_team_id, league_id, draft_id FROM ledger
         WHERE {clause} = ?1 ORDER BY fantasy_team_id, entrant_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params![arg], |row| {
            Ok(LedgerEntry {
                entrant_id: row.get(0)?,
                fantasy_team_id: row.get(1)?,
                league_id: row.get(2)?,
                draft_id: row.get::<_, Option<DraftId>>(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub(crate) fn league_entries(conn: &Connection, league: LeagueId) -> EngineResult<Vec<LedgerEntry>> {
    entries_where(conn, "league_id", league.0)
}

pub(crate) fn team_entries(conn: &Connection, team: FantasyTeamId) -> EngineResult<Vec<LedgerEntry>> {
    entries_where(conn, "fantasy_team_id", team.0)
}

impl Database {
    /// Current ledger contents for a league, grouped by team.
    pub fn ledger(&self, league: LeagueId) -> EngineResult<Vec<LedgerEntry>> {
        self.read(|conn| league_entries(conn, league))
    }

    /// Entrants currently owned by one fantasy team.
    pub fn roster(&self, team: FantasyTeamId) -> EngineResult<Vec<EntrantId>> {
        self.read(|conn| {
            Ok(team_entries(conn, team)?
                .into_iter()
                .map(|e| e.entrant_id)
                .collect())
        })
    }

    pub fn owner_of(&self, league: LeagueId, entrant: EntrantId) -> EngineResult<Option<FantasyTeamId>> {
        self.read(|conn| owner_of(conn, league, entrant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{entrant_fixture, region_league, test_db};
    use crate::error::ErrorKind;

    fn setup() -> (Database, LeagueId, FantasyTeamId, FantasyTeamId) {
        let db = test_db();
        let league = region_league(&db, 1);
        let a = db.create_fantasy_team(league.id, "A").unwrap();
        let b = db.create_fantasy_team(league.id, "B").unwrap();
        for id in [118, 254] {
            db.upsert_entrant(&entrant_fixture(id, true)).unwrap();
        }
        (db, league.id, a.id, b.id)
    }

    fn entry(league: LeagueId, team: FantasyTeamId, entrant: u32) -> LedgerEntry {
        LedgerEntry {
            entrant_id: EntrantId(entrant),
            fantasy_team_id: team,
            league_id: league,
            draft_id: None,
        }
    }

    #[test]
    fn insert_enforces_one_owner_per_league() {
        let (db, league, a, b) = setup();
        db.write(|tx| insert(tx, &entry(league, a, 118))).unwrap();
        let err = db.write(|tx| insert(tx, &entry(league, b, 118))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(db.owner_of(league, EntrantId(118)).unwrap(), Some(a));
    }

    #[test]
    fn transfer_requires_current_owner() {
        let (db, league, a, b) = setup();
        db.write(|tx| insert(tx, &entry(league, a, 118))).unwrap();

        let err = db
            .write(|tx| transfer(tx, league, EntrantId(118), b, a))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        db.write(|tx| transfer(tx, league, EntrantId(118), a, b)).unwrap();
        assert_eq!(db.roster(b).unwrap(), vec![EntrantId(118)]);
        assert!(db.roster(a).unwrap().is_empty());
    }

    #[test]
    fn remove_missing_entry_is_conflict() {
        let (db, league, a, _) = setup();
        let err = db
            .write(|tx| remove(tx, league, a, EntrantId(254)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn ledger_lists_league_entries() {
        let (db, league, a, b) = setup();
        db.write(|tx| {
            insert(tx, &entry(league, b, 254))?;
            insert(tx, &entry(league, a, 118))
        })
        .unwrap();
        let entries = db.ledger(league).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].fantasy_team_id, a);
        assert_eq!(entries[1].fantasy_team_id, b);
    }
}
