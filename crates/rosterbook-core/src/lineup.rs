// Weekly "started" designations for region leagues.

use rusqlite::{params, Connection};
use tracing::info;

use crate::db::{self, Database};
use crate::error::{EngineError, EngineResult};
use crate::ledger;
use crate::model::{Actor, EntrantId, FantasyTeam, FantasyTeamId, League, Start};

/// Limits applied to starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineupRules {
    /// Times one entrant may be started in a league before the championship week.
    pub max_starts_per_entrant: u32,
    pub championship_week: u32,
    /// Extra lineup slots every team gets in the championship week.
    pub championship_extra_starts: u32,
}

impl Default for LineupRules {
    fn default() -> Self {
        Self {
            max_starts_per_entrant: 2,
            championship_week: 6,
            championship_extra_starts: 1,
        }
    }
}

impl LineupRules {
    fn slots(&self, league: &League, week: u32) -> u32 {
        if week == self.championship_week {
            league.min_starts + self.championship_extra_starts
        } else {
            league.min_starts
        }
    }
}

pub struct LineupBook<'a> {
    db: &'a Database,
    rules: LineupRules,
}

impl<'a> LineupBook<'a> {
    pub fn new(db: &'a Database, rules: LineupRules) -> Self {
        Self { db, rules }
    }

    /// Start `entrant` for `team` in `week` at the single region competition
    /// the entrant attends that week.
    pub fn start_entrant(
        &self,
        actor: Actor,
        team: FantasyTeamId,
        entrant: EntrantId,
        week: u32,
    ) -> EngineResult<Start> {
        let start = self.db.write(|tx| {
            let (fantasy_team, league) = editable_lineup(tx, actor, team, week)?;
            if !ledger::owns(tx, league.id, team, entrant)? {
                return Err(EngineError::InvalidState(format!(
                    "team {team} does not own entrant {entrant}"
                )));
            }

            let current = starts_where(tx, "fantasy_team_id = ?1 AND week = ?2", params![team, week])?;
            if current.len() as u32 >= self.rules.slots(&league, week) {
                return Err(EngineError::InvalidState(format!(
                    "{} is already starting the maximum number of entrants in week {week}",
                    fantasy_team.name
                )));
            }
            if current.iter().any(|s| s.entrant_id == entrant) {
                return Err(EngineError::Conflict(format!(
                    "entrant {entrant} is already starting in week {week}"
                )));
            }

            let competitions = region_competitions_for(tx, &league, entrant, week)?;
            let competition_key = match competitions.as_slice() {
                [] => {
                    return Err(EngineError::InvalidState(format!(
                        "entrant {entrant} is not competing in week {week}"
                    )))
                }
                [key] => key.clone(),
                _ => {
                    return Err(EngineError::InvalidState(format!(
                        "entrant {entrant} attends {} competitions in week {week}",
                        competitions.len()
                    )))
                }
            };

            if week != self.rules.championship_week {
                let used: u32 = tx.query_row(
                    "SELECT COUNT(*) FROM starts
                     WHERE league_id = ?1 AND entrant_id = ?2 AND week < ?3",
                    params![league.id, entrant, self.rules.championship_week],
                    |row| row.get(0),
                )?;
                if used >= self.rules.max_starts_per_entrant {
                    return Err(EngineError::InvalidState(format!(
                        "entrant {entrant} has reached {} starts before the championship",
                        self.rules.max_starts_per_entrant
                    )));
                }
            }

            let start = Start {
                fantasy_team_id: team,
                entrant_id: entrant,
                league_id: league.id,
                competition_key,
                week,
            };
            tx.execute(
                "INSERT INTO starts (league_id, fantasy_team_id, entrant_id, competition_key, week)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![start.league_id, team, entrant, start.competition_key, week],
            )?;
            Ok(start)
        })?;
        info!(
            "team {team} starting entrant {entrant} at {} in week {week}",
            start.competition_key
        );
        Ok(start)
    }

    pub fn sit_entrant(
        &self,
        actor: Actor,
        team: FantasyTeamId,
        entrant: EntrantId,
        week: u32,
    ) -> EngineResult<()> {
        self.db.write(|tx| {
            let (_, league) = editable_lineup(tx, actor, team, week)?;
            let removed = tx.execute(
                "DELETE FROM starts
                 WHERE league_id = ?1 AND fantasy_team_id = ?2 AND entrant_id = ?3 AND week = ?4",
                params![league.id, team, entrant, week],
            )?;
            if removed == 0 {
                return Err(EngineError::not_found(
                    "start",
                    format!("{entrant} in week {week}"),
                ));
            }
            Ok(())
        })?;
        info!("team {team} sat entrant {entrant} in week {week}");
        Ok(())
    }
}

impl Database {
    /// Every designation held by a team, by week.
    pub fn starts(&self, team: FantasyTeamId) -> EngineResult<Vec<Start>> {
        self.read(|conn| starts_where(conn, "fantasy_team_id = ?1", params![team]))
    }
}

/// Load the team and league and check the lineup for `week` may change.
fn editable_lineup(
    conn: &Connection,
    actor: Actor,
    team: FantasyTeamId,
    week: u32,
) -> EngineResult<(FantasyTeam, League)> {
    if !actor.may_act_for(team) {
        return Err(EngineError::AuthorizationDenied(format!(
            "{actor} cannot set the lineup of team {team}"
        )));
    }
    let fantasy_team = db::fantasy_team(conn, team)?;
    let league = db::league(conn, fantasy_team.league_id)?;
    if !league.is_region {
        return Err(EngineError::InvalidState(format!(
            "league {} does not use starting lineups",
            league.id
        )));
    }
    let season = db::season_week(conn, league.year)?;
    let locked = week < season.week || (week == season.week && season.lineups_locked);
    if locked && !actor.is_admin() {
        return Err(EngineError::InvalidState(format!(
            "lineups are locked for week {week}"
        )));
    }
    Ok((fantasy_team, league))
}

fn region_competitions_for(
    conn: &Connection,
    league: &League,
    entrant: EntrantId,
    week: u32,
) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT c.competition_key FROM competitions c
         JOIN competition_results r ON r.competition_key = c.competition_key
         WHERE r.entrant_id = ?1 AND c.year = ?2 AND c.week = ?3 AND c.in_region = 1
         ORDER BY c.competition_key",
    )?;
    let keys = stmt
        .query_map(params![entrant, league.year, week], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(keys)
}

fn starts_where(
    conn: &Connection,
    clause: &str,
    args: impl rusqlite::Params,
) -> EngineResult<Vec<Start>> {
    let sql = format!(
        "SELECT fantasy_team_id, entrant_id, league_id, competition_key, week FROM starts
         WHERE {clause} ORDER BY week, entrant_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let starts = stmt
        .query_map(args, |row| {
            Ok(Start {
                fantasy_team_id: row.get(0)?,
                entrant_id: row.get(1)?,
                league_id: row.get(2)?,
                competition_key: row.get(3)?,
                week: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(starts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{entrant_fixture, region_league, test_db};
    use crate::error::ErrorKind;
    use crate::model::{Competition, CompetitionResult, LeagueId, LedgerEntry, SeasonWeek};

    struct Fixture {
        db: Database,
        league: LeagueId,
        a: FantasyTeamId,
        b: FantasyTeamId,
    }

    /// Region league with two lineup slots. A owns 118, 254 and 33; B owns 67.
    /// Week 1 has region events "w1a" and "w1b", week 6 has "champs".
    fn fixture() -> Fixture {
        let db = test_db();
        let league = region_league(&db, 2).id;
        let a = db.create_fantasy_team(league, "A").unwrap().id;
        let b = db.create_fantasy_team(league, "B").unwrap().id;
        for id in [118, 254, 33, 67] {
            db.upsert_entrant(&entrant_fixture(id, true)).unwrap();
        }
        for (key, week) in [
            ("w1a", 1),
            ("w1b", 1),
            ("w2", 2),
            ("w2b", 2),
            ("w3", 3),
            ("w4", 4),
            ("champs", 6),
        ] {
            db.upsert_competition(&Competition {
                key: key.into(),
                name: key.into(),
                year: 2025,
                week,
                in_region: true,
            })
            .unwrap();
        }
        let results = [
            (118, "w1a"),
            (254, "w1a"),
            (33, "w1a"),
            (67, "w1b"),
            (118, "w2"),
            (118, "w3"),
            (118, "w4"),
            (118, "champs"),
            // 254 attends two region events in week 2.
            (254, "w2"),
            (254, "w2b"),
        ];
        for (entrant, key) in results {
            db.record_result(&CompetitionResult {
                entrant_id: EntrantId(entrant),
                competition_key: key.into(),
                ..Default::default()
            })
            .unwrap();
        }
        db.write(|tx| {
            for (team, entrant) in [(a, 118), (a, 254), (a, 33), (b, 67)] {
                ledger::insert(
                    tx,
                    &LedgerEntry {
                        entrant_id: EntrantId(entrant),
                        fantasy_team_id: team,
                        league_id: league,
                        draft_id: None,
                    },
                )?;
            }
            Ok(())
        })
        .unwrap();
        Fixture { db, league, a, b }
    }

    fn book(db: &Database) -> LineupBook<'_> {
        LineupBook::new(db, LineupRules::default())
    }

    #[test]
    fn start_picks_the_entrants_competition() {
        let f = fixture();
        let start = book(&f.db)
            .start_entrant(Actor::Team(f.a), f.a, EntrantId(118), 1)
            .unwrap();
        assert_eq!(start.competition_key, "w1a");
        assert_eq!(start.league_id, f.league);
        assert_eq!(f.db.starts(f.a).unwrap(), vec![start]);
    }

    #[test]
    fn lineup_slots_are_capped() {
        let f = fixture();
        let book = book(&f.db);
        book.start_entrant(Actor::Team(f.a), f.a, EntrantId(118), 1).unwrap();
        book.start_entrant(Actor::Team(f.a), f.a, EntrantId(254), 1).unwrap();
        let err = book
            .start_entrant(Actor::Team(f.a), f.a, EntrantId(33), 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn start_rejections() {
        let f = fixture();
        let book = book(&f.db);
        // Not owned.
        let err = book.start_entrant(Actor::Team(f.a), f.a, EntrantId(67), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        // Not competing.
        let err = book.start_entrant(Actor::Team(f.a), f.a, EntrantId(33), 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        // Two competitions in one week.
        let err = book.start_entrant(Actor::Team(f.a), f.a, EntrantId(254), 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        // Someone else's lineup.
        let err = book.start_entrant(Actor::Team(f.b), f.a, EntrantId(118), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);
        // Twice in one week.
        book.start_entrant(Actor::Team(f.a), f.a, EntrantId(118), 1).unwrap();
        let err = book.start_entrant(Actor::Team(f.a), f.a, EntrantId(118), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn entrant_start_limit_lifts_for_championship() {
        let f = fixture();
        let book = book(&f.db);
        let a = Actor::Team(f.a);
        book.start_entrant(a, f.a, EntrantId(118), 1).unwrap();
        book.start_entrant(a, f.a, EntrantId(118), 2).unwrap();
        let err = book.start_entrant(a, f.a, EntrantId(118), 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        book.start_entrant(a, f.a, EntrantId(118), 6).unwrap();
    }

    #[test]
    fn locked_weeks_reject_teams_but_not_admins() {
        let f = fixture();
        f.db.set_season_week(SeasonWeek {
            year: 2025,
            week: 1,
            lineups_locked: true,
        })
        .unwrap();
        let book = book(&f.db);
        let err = book.start_entrant(Actor::Team(f.a), f.a, EntrantId(118), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        book.start_entrant(Actor::Administrator, f.a, EntrantId(118), 1).unwrap();
        book.start_entrant(Actor::Team(f.a), f.a, EntrantId(118), 2).unwrap();
    }

    #[test]
    fn sit_removes_only_that_week() {
        let f = fixture();
        let book = book(&f.db);
        let a = Actor::Team(f.a);
        book.start_entrant(a, f.a, EntrantId(118), 1).unwrap();
        book.start_entrant(a, f.a, EntrantId(118), 2).unwrap();
        book.sit_entrant(a, f.a, EntrantId(118), 1).unwrap();
        let weeks: Vec<u32> = f.db.starts(f.a).unwrap().iter().map(|s| s.week).collect();
        assert_eq!(weeks, vec![2]);
        let err = book.sit_entrant(a, f.a, EntrantId(118), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn non_region_leagues_have_no_lineups() {
        let db = test_db();
        let league = db
            .create_league(&crate::db::NewLeague {
                name: "Event".into(),
                year: 2025,
                roster_size: 3,
                min_starts: 3,
                is_region: false,
            })
            .unwrap();
        let team = db.create_fantasy_team(league.id, "Solo").unwrap().id;
        let err = book(&db)
            .start_entrant(Actor::Team(team), team, EntrantId(1), 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
