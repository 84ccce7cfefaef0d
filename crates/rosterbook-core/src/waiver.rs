// Waiver engine: per-league priority order, claims, and the processing cycle.
//
// Priority is held as an ordered sequence of teams (index 0 = priority 1) and
// always rewritten in full, so it stays a dense permutation.

use std::collections::HashSet;

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::{self, Database};
use crate::draft;
use crate::eligibility::{CompetitionContext, EligibilityOracle};
use crate::error::{EngineError, EngineResult};
use crate::ledger;
use crate::model::{Actor, EntrantId, FantasyTeam, FantasyTeamId, LeagueId, LedgerEntry, WaiverClaim};
use crate::notify::{self, Notifier, Scope};

/// A claim that succeeded during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutedClaim {
    pub fantasy_team_id: FantasyTeamId,
    pub added: EntrantId,
    pub dropped: EntrantId,
    /// Priority the team held when the claim executed.
    pub priority: u32,
}

/// Summary of one `process_league_waivers` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WaiverReport {
    pub executed: Vec<ExecutedClaim>,
    pub discarded: usize,
    /// Entrants that went unclaimed and are now ordinary free agents.
    pub cleared: Vec<EntrantId>,
    /// Priority order after the cycle.
    pub priority: Vec<FantasyTeamId>,
}

pub struct WaiverEngine<'a> {
    db: &'a Database,
    oracle: &'a dyn EligibilityOracle,
    notifier: &'a dyn Notifier,
}

impl<'a> WaiverEngine<'a> {
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

    /// Replace the league's priority with `teams` (index 0 = priority 1).
    pub fn seed_priority(&self, league: LeagueId, teams: &[FantasyTeamId]) -> EngineResult<()> {
        self.db.write(|tx| {
            db::league(tx, league)?;
            let mut expected: Vec<FantasyTeamId> =
                db::league_teams(tx, league)?.into_iter().map(|t| t.id).collect();
            let mut given = teams.to_vec();
            expected.sort();
            given.sort();
            if expected != given {
                return Err(EngineError::InvalidState(format!(
                    "waiver priority must list each of the {} league teams exactly once",
                    expected.len()
                )));
            }
            write_priority(tx, league, teams)
        })?;
        info!("seeded waiver priority for league {league}: {teams:?}");
        Ok(())
    }

    /// Release an unowned entrant into the league's waiver pool.
    pub fn place_on_waivers(&self, league: LeagueId, entrant: EntrantId) -> EngineResult<()> {
        self.db.write(|tx| {
            db::league(tx, league)?;
            db::entrant(tx, entrant)?;
            if let Some(owner) = ledger::owner_of(tx, league, entrant)? {
                return Err(EngineError::Conflict(format!(
                    "entrant {entrant} is owned by team {owner}"
                )));
            }
            if draft::engine::held_by_open_draft(tx, league, entrant)? {
                return Err(EngineError::AlreadyTaken(entrant));
            }
            if in_pool(tx, league, entrant)? {
                return Err(EngineError::InvalidState(format!(
                    "entrant {entrant} is already on waivers"
                )));
            }
            add_to_pool(tx, league, entrant)
        })?;
        info!("entrant {entrant} placed on waivers in league {league}");
        Ok(())
    }

    /// Queue a claim for `add` (on waivers) dropping `drop` (owned by `team`).
    /// Administrators may claim while lineups are locked.
    pub fn submit_claim(
        &self,
        actor: Actor,
        team: FantasyTeamId,
        add: EntrantId,
        drop: EntrantId,
    ) -> EngineResult<WaiverClaim> {
        ensure_may_act(actor, team)?;
        let claim = self.db.write(|tx| {
            let fantasy_team = db::fantasy_team(tx, team)?;
            let league_id = fantasy_team.league_id;
            ensure_window_open(tx, league_id, actor)?;
            if !in_pool(tx, league_id, add)? {
                return Err(EngineError::InvalidState(format!(
                    "entrant {add} is not on waivers"
                )));
            }
            if !ledger::owns(tx, league_id, team, drop)? {
                return Err(EngineError::InvalidState(format!(
                    "team {team} does not own entrant {drop}"
                )));
            }
            let mut claims = load_claims(tx, team)?;
            if claims
                .iter()
                .any(|c| c.add_entrant == add && c.drop_entrant == drop)
            {
                return Err(EngineError::Conflict(format!(
                    "team {team} already claims {add} dropping {drop}"
                )));
            }
            let claim = WaiverClaim {
                fantasy_team_id: team,
                league_id,
                add_entrant: add,
                drop_entrant: drop,
                sub_priority: claims.len() as u32 + 1,
            };
            claims.push(claim.clone());
            rewrite_claims(tx, team, &claims)?;
            Ok(claim)
        })?;
        info!(
            "team {team} claimed entrant {add} dropping {drop} (sub-priority {})",
            claim.sub_priority
        );
        Ok(claim)
    }

    /// Withdraw the claim at `sub_priority`; later claims move up by one.
    pub fn cancel_claim(
        &self,
        actor: Actor,
        team: FantasyTeamId,
        sub_priority: u32,
    ) -> EngineResult<WaiverClaim> {
        ensure_may_act(actor, team)?;
        let removed = self.db.write(|tx| {
            let fantasy_team = db::fantasy_team(tx, team)?;
            ensure_window_open(tx, fantasy_team.league_id, actor)?;
            let mut claims = load_claims(tx, team)?;
            let idx = claims
                .iter()
                .position(|c| c.sub_priority == sub_priority)
                .ok_or_else(|| EngineError::not_found("waiver claim", sub_priority))?;
            let removed = claims.remove(idx);
            rewrite_claims(tx, team, &claims)?;
            Ok(removed)
        })?;
        info!(
            "team {team} cancelled claim for {} dropping {}",
            removed.add_entrant, removed.drop_entrant
        );
        Ok(removed)
    }

    /// Run one waiver cycle for `league`.
    ///
    /// Walks priorities 1..=N. The team holding the current priority has its
    /// claims tried in sub-priority order; an invalid claim is discarded and
    /// the next one tried, a valid one executes and sends the team to the
    /// back of the order, after which the same priority is evaluated again
    /// for whichever team now holds it. A team without claims advances the
    /// walk. Entrants that were on waivers when the cycle began and went
    /// unclaimed become free agents; entrants dropped during the cycle stay
    /// on waivers for the next one. A league without a priority order has no
    /// claims served, and its pool is simply cleared.
    pub fn process_league_waivers(&self, league: LeagueId) -> EngineResult<WaiverReport> {
        let report = self.db.write(|tx| {
            let league_row = db::league(tx, league)?;
            let week = db::season_week(tx, league_row.year)?.week;
            let mut order = load_priority(tx, league)?;
            if order.is_empty() {
                debug!("league {league} has no waiver priority; clearing the pool only");
            }

            let initial_pool = load_pool(tx, league)?;
            let mut claimable: HashSet<EntrantId> = initial_pool.iter().copied().collect();
            let mut report = WaiverReport::default();

            let n = order.len();
            let mut waiver_num = 1;
            while waiver_num <= n {
                let team = order[waiver_num - 1];
                let mut claims = load_claims(tx, team)?;
                if claims.is_empty() {
                    waiver_num += 1;
                    continue;
                }
                let claim = claims.remove(0);
                rewrite_claims(tx, team, &claims)?;

                let valid = claimable.contains(&claim.add_entrant)
                    && ledger::owner_of(tx, league, claim.add_entrant)?.is_none()
                    && ledger::owns(tx, league, team, claim.drop_entrant)?;
                if !valid {
                    debug!(
                        "discarded claim by team {team} for {} dropping {}",
                        claim.add_entrant, claim.drop_entrant
                    );
                    report.discarded += 1;
                    continue;
                }

                execute_swap(tx, league, team, claim.add_entrant, claim.drop_entrant, week)?;
                claimable.remove(&claim.add_entrant);
                report.executed.push(ExecutedClaim {
                    fantasy_team_id: team,
                    added: claim.add_entrant,
                    dropped: claim.drop_entrant,
                    priority: waiver_num as u32,
                });

                order.remove(waiver_num - 1);
                order.push(team);
                write_priority(tx, league, &order)?;
            }

            for entrant in &initial_pool {
                if claimable.contains(entrant) {
                    report.cleared.push(*entrant);
                }
                tx.execute(
                    "DELETE FROM waiver_pool WHERE league_id = ?1 AND entrant_id = ?2",
                    params![league, entrant],
                )?;
            }
            tx.execute(
                "DELETE FROM waiver_claims WHERE league_id = ?1",
                params![league],
            )?;
            report.priority = order;
            Ok(report)
        })?;

        info!(
            "processed waivers for league {league}: {} executed, {} discarded, {} cleared",
            report.executed.len(),
            report.discarded,
            report.cleared.len()
        );
        for executed in &report.executed {
            notify::announce(
                self.notifier,
                Scope::League(league),
                &format!(
                    "Team {} claimed entrant {} and dropped entrant {}",
                    executed.fantasy_team_id, executed.added, executed.dropped
                ),
            );
        }
        Ok(report)
    }

    /// Immediate add/drop of a free agent. The dropped entrant goes on
    /// waivers. Entrants already on waivers must be claimed instead, unless an
    /// administrator is acting.
    pub fn add_free_agent(
        &self,
        actor: Actor,
        team: FantasyTeamId,
        add: EntrantId,
        drop: EntrantId,
    ) -> EngineResult<()> {
        ensure_may_act(actor, team)?;
        let fantasy_team: FantasyTeam = self.db.write(|tx| {
            let fantasy_team = db::fantasy_team(tx, team)?;
            let league = db::league(tx, fantasy_team.league_id)?;
            let season = db::season_week(tx, league.year)?;
            if season.lineups_locked && !actor.is_admin() {
                return Err(EngineError::InvalidState(
                    "cannot make a transaction with locked lineups".into(),
                ));
            }
            db::entrant(tx, add)?;
            if !ledger::owns(tx, league.id, team, drop)? {
                return Err(EngineError::InvalidState(format!(
                    "team {team} does not own entrant {drop}"
                )));
            }
            if in_pool(tx, league.id, add)? {
                if !actor.is_admin() {
                    return Err(EngineError::InvalidState(format!(
                        "entrant {add} is on waivers; submit a claim instead"
                    )));
                }
                remove_from_pool(tx, league.id, add)?;
            }
            if let Some(owner) = ledger::owner_of(tx, league.id, add)? {
                return Err(EngineError::Conflict(format!(
                    "entrant {add} is already owned by team {owner}"
                )));
            }
            if draft::engine::held_by_open_draft(tx, league.id, add)? {
                return Err(EngineError::AlreadyTaken(add));
            }
            let context = CompetitionContext::for_free_agency(&league);
            if !self.oracle.is_eligible(tx, add, &context)? {
                return Err(EngineError::NotEligible(add));
            }
            execute_swap(tx, league.id, team, add, drop, season.week)?;
            Ok(fantasy_team)
        })?;
        info!("team {team} added free agent {add} and dropped {drop}");
        notify::announce(
            self.notifier,
            Scope::League(fantasy_team.league_id),
            &format!(
                "{} successfully added entrant {add} and dropped {drop}!",
                fantasy_team.name
            ),
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

impl Database {
    /// Teams in priority order; index 0 holds priority 1.
    pub fn waiver_priority(&self, league: LeagueId) -> EngineResult<Vec<FantasyTeamId>> {
        self.read(|conn| load_priority(conn, league))
    }

    /// A team's pending claims in sub-priority order.
    pub fn pending_claims(&self, team: FantasyTeamId) -> EngineResult<Vec<WaiverClaim>> {
        self.read(|conn| load_claims(conn, team))
    }

    pub fn waiver_pool(&self, league: LeagueId) -> EngineResult<Vec<EntrantId>> {
        self.read(|conn| load_pool(conn, league))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ensure_may_act(actor: Actor, team: FantasyTeamId) -> EngineResult<()> {
    if !actor.may_act_for(team) {
        return Err(EngineError::AuthorizationDenied(format!(
            "{actor} cannot manage team {team}"
        )));
    }
    Ok(())
}

fn ensure_window_open(conn: &Connection, league: LeagueId, actor: Actor) -> EngineResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    let league = db::league(conn, league)?;
    if db::season_week(conn, league.year)?.lineups_locked {
        return Err(EngineError::InvalidState(
            "waivers are closed while lineups are locked".into(),
        ));
    }
    Ok(())
}

/// Move `drop` to waivers and `add` onto `team`.
fn execute_swap(
    conn: &Connection,
    league: LeagueId,
    team: FantasyTeamId,
    add: EntrantId,
    drop: EntrantId,
    week: u32,
) -> EngineResult<()> {
    remove_from_pool(conn, league, add)?;
    add_to_pool(conn, league, drop)?;
    ledger::strip_starts(conn, league, drop, None, week)?;
    ledger::remove(conn, league, team, drop)?;
    ledger::insert(
        conn,
        &LedgerEntry {
            entrant_id: add,
            fantasy_team_id: team,
            league_id: league,
            draft_id: None,
        },
    )
}

pub(crate) fn load_priority(conn: &Connection, league: LeagueId) -> EngineResult<Vec<FantasyTeamId>> {
    let mut stmt = conn.prepare(
        "SELECT fantasy_team_id FROM waiver_priority WHERE league_id = ?1 ORDER BY priority",
    )?;
    let order = stmt
        .query_map(params![league], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(order)
}

fn write_priority(conn: &Connection, league: LeagueId, order: &[FantasyTeamId]) -> EngineResult<()> {
    conn.execute(
        "DELETE FROM waiver_priority WHERE league_id = ?1",
        params![league],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO waiver_priority (league_id, fantasy_team_id, priority) VALUES (?1, ?2, ?3)",
    )?;
    for (idx, team) in order.iter().enumerate() {
        stmt.execute(params![league, team, idx as u32 + 1])?;
    }
    Ok(())
}

/// Write `order` as the league's priority unless one already exists.
pub(crate) fn seed_if_empty(
    conn: &Connection,
    league: LeagueId,
    order: &[FantasyTeamId],
) -> EngineResult<bool> {
    if !load_priority(conn, league)?.is_empty() || order.is_empty() {
        return Ok(false);
    }
    write_priority(conn, league, order)?;
    Ok(true)
}

/// Give a newly created team the last priority when the league already has
/// an order; leagues that are not seeded yet are left alone.
pub(crate) fn append_if_seeded(
    conn: &Connection,
    league: LeagueId,
    team: FantasyTeamId,
) -> EngineResult<bool> {
    let mut order = load_priority(conn, league)?;
    if order.is_empty() || order.contains(&team) {
        return Ok(false);
    }
    order.push(team);
    write_priority(conn, league, &order)?;
    Ok(true)
}

fn load_claims(conn: &Connection, team: FantasyTeamId) -> EngineResult<Vec<WaiverClaim>> {
    let mut stmt = conn.prepare(
        "SELECT fantasy_team_id, league_id, add_entrant, drop_entrant, sub_priority
         FROM waiver_claims WHERE fantasy_team_id = ?1 ORDER BY sub_priority",
    )?;
    let claims = stmt
        .query_map(params![team], |row| {
            Ok(WaiverClaim {
                fantasy_team_id: row.get(0)?,
                league_id: row.get(1)?,
                add_entrant: row.get(2)?,
                drop_entrant: row.get(3)?,
                sub_priority: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(claims)
}

/// Replace a team's claims, renumbering sub-priorities 1..=k in list order.
fn rewrite_claims(conn: &Connection, team: FantasyTeamId, claims: &[WaiverClaim]) -> EngineResult<()> {
    conn.execute(
        "DELETE FROM waiver_claims WHERE fantasy_team_id = ?1",
        params![team],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO waiver_claims (fantasy_team_id, league_id, add_entrant, drop_entrant, sub_priority)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (idx, claim) in claims.iter().enumerate() {
        stmt.execute(params![
            team,
            claim.league_id,
            claim.add_entrant,
            claim.drop_entrant,
            idx as u32 + 1
        ])?;
    }
    Ok(())
}

fn load_pool(conn: &Connection, league: LeagueId) -> EngineResult<Vec<EntrantId>> {
    let mut stmt = conn.prepare(
        "SELECT entrant_id FROM waiver_pool WHERE league_id = ?1 ORDER BY entrant_id",
    )?;
    let pool = stmt
        .query_map(params![league], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pool)
}

fn in_pool(conn: &Connection, league: LeagueId, entrant: EntrantId) -> EngineResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM waiver_pool WHERE league_id = ?1 AND entrant_id = ?2)",
        params![league, entrant],
        |row| row.get(0),
    )?)
}

fn add_to_pool(conn: &Connection, league: LeagueId, entrant: EntrantId) -> EngineResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO waiver_pool (league_id, entrant_id) VALUES (?1, ?2)",
        params![league, entrant],
    )?;
    Ok(())
}

fn remove_from_pool(conn: &Connection, league: LeagueId, entrant: EntrantId) -> EngineResult<()> {
    conn.execute(
        "DELETE FROM waiver_pool WHERE league_id = ?1 AND entrant_id = ?2",
        params![league, entrant],
    )?;
    Ok(())
}
