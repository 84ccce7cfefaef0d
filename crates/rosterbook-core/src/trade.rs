// Trade engine: bilateral proposals with an expiry, re-validated at accept.

use std::collections::HashSet;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::db::{self, Database};
use crate::error::{EngineError, EngineResult};
use crate::ledger;
use crate::model::{Actor, EntrantId, FantasyTeamId, LeagueId, TradeId, TradeProposal};
use crate::notify::{self, Notifier, Scope};

/// Source of the current time. Swapped out in tests.
pub type Clock = fn() -> DateTime<Utc>;

pub struct TradeEngine<'a> {
    db: &'a Database,
    notifier: &'a dyn Notifier,
    ttl: Duration,
    clock: Clock,
}

impl<'a> TradeEngine<'a> {
    pub fn new(db: &'a Database, notifier: &'a dyn Notifier, ttl: Duration) -> Self {
        Self {
            db,
            notifier,
            ttl,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Offer `offered` (owned by `proposer`) for `requested` (owned by
    /// `counterparty`).
    pub fn propose_trade(
        &self,
        actor: Actor,
        proposer: FantasyTeamId,
        counterparty: FantasyTeamId,
        offered: &[EntrantId],
        requested: &[EntrantId],
    ) -> EngineResult<TradeProposal> {
        if !actor.may_act_for(proposer) {
            return Err(EngineError::AuthorizationDenied(format!(
                "{actor} cannot propose trades for team {proposer}"
            )));
        }
        validate_lists(offered, requested)?;
        let now = (self.clock)();

        let proposal = self.db.write(|tx| {
            let from = db::fantasy_team(tx, proposer)?;
            let to = db::fantasy_team(tx, counterparty)?;
            if from.id == to.id {
                return Err(EngineError::InvalidState(
                    "a team cannot trade with itself".into(),
                ));
            }
            if from.league_id != to.league_id {
                return Err(EngineError::InvalidState(format!(
                    "teams {} and {} are in different leagues",
                    from.id, to.id
                )));
            }
            let league = from.league_id;
            ensure_window_open(tx, league, actor)?;
            ensure_owned(tx, league, proposer, offered, EngineError::InvalidState)?;
            ensure_owned(tx, league, counterparty, requested, EngineError::InvalidState)?;

            let expires_at = now.checked_add_signed(self.ttl).ok_or_else(|| {
                EngineError::InvalidState(format!("proposal lifetime {} is out of range", self.ttl))
            })?;
            tx.execute(
                "INSERT INTO trade_proposals
                    (league_id, proposer_id, counterparty_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![league, proposer, counterparty, stamp(now), stamp(expires_at)],
            )?;
            let id = TradeId(tx.last_insert_rowid());
            let mut stmt = tx.prepare(
                "INSERT INTO trade_entrants (trade_id, entrant_id, offered) VALUES (?1, ?2, ?3)",
            )?;
            for entrant in offered {
                stmt.execute(params![id, entrant, true])?;
            }
            for entrant in requested {
                stmt.execute(params![id, entrant, false])?;
            }
            load_trade(tx, id)
        })?;

        info!(
            "trade {} proposed: team {proposer} offers {:?} to team {counterparty} for {:?}",
            proposal.id, proposal.offered, proposal.requested
        );
        notify::announce(
            self.notifier,
            Scope::League(proposal.league_id),
            &format!(
                "Team {proposer} proposed trade {} to team {counterparty}",
                proposal.id
            ),
        );
        Ok(proposal)
    }

    /// Execute a proposal. Ownership is re-checked and any drift since the
    /// proposal was made fails the whole trade with `Conflict`.
    pub fn accept_trade(&self, actor: Actor, trade: TradeId) -> EngineResult<TradeProposal> {
        let now = (self.clock)();
        let proposal = self.db.write(|tx| {
            let proposal = load_trade(tx, trade)?;
            if !actor.may_act_for(proposal.counterparty) {
                return Err(EngineError::AuthorizationDenied(format!(
                    "trade {trade} is addressed to team {}, not {actor}",
                    proposal.counterparty
                )));
            }
            let league = db::league(tx, proposal.league_id)?;
            let season = db::season_week(tx, league.year)?;
            if !actor.is_admin() {
                if season.lineups_locked {
                    return Err(EngineError::InvalidState(
                        "the trade window is closed while lineups are locked".into(),
                    ));
                }
                if proposal.is_expired(now) {
                    return Err(EngineError::InvalidState(format!(
                        "trade {trade} expired at {}",
                        proposal.expires_at
                    )));
                }
            }

            ensure_owned(tx, league.id, proposal.proposer, &proposal.offered, EngineError::Conflict)?;
            ensure_owned(
                tx,
                league.id,
                proposal.counterparty,
                &proposal.requested,
                EngineError::Conflict,
            )?;

            for entrant in &proposal.offered {
                ledger::strip_starts(tx, league.id, *entrant, Some(proposal.proposer), season.week)?;
                ledger::transfer(tx, league.id, *entrant, proposal.proposer, proposal.counterparty)?;
            }
            for entrant in &proposal.requested {
                ledger::strip_starts(
                    tx,
                    league.id,
                    *entrant,
                    Some(proposal.counterparty),
                    season.week,
                )?;
                ledger::transfer(tx, league.id, *entrant, proposal.counterparty, proposal.proposer)?;
            }
            delete_trade(tx, trade)?;
            Ok(proposal)
        })?;

        info!(
            "trade {trade} accepted by {actor}: {:?} <-> {:?}",
            proposal.offered, proposal.requested
        );
        notify::announce(
            self.notifier,
            Scope::League(proposal.league_id),
            &format!(
                "Trade {trade} between team {} and team {} has been accepted",
                proposal.proposer, proposal.counterparty
            ),
        );
        Ok(proposal)
    }

    /// Reject a proposal without moving anyone.
    pub fn decline_trade(&self, actor: Actor, trade: TradeId) -> EngineResult<()> {
        let proposal = self.db.write(|tx| {
            let proposal = load_trade(tx, trade)?;
            if !actor.may_act_for(proposal.counterparty) {
                return Err(EngineError::AuthorizationDenied(format!(
                    "trade {trade} is addressed to team {}, not {actor}",
                    proposal.counterparty
                )));
            }
            delete_trade(tx, trade)?;
            Ok(proposal)
        })?;
        info!("trade {trade} declined by {actor}");
        notify::announce(
            self.notifier,
            Scope::League(proposal.league_id),
            &format!("Trade {trade} was declined by team {}", proposal.counterparty),
        );
        Ok(())
    }

    /// Delete every proposal expired as of `now`, returning their ids.
    pub fn expire_trades(&self, now: DateTime<Utc>) -> EngineResult<Vec<TradeId>> {
        let expired = self.db.write(|tx| {
            let mut expired = Vec::new();
            for id in all_trade_ids(tx)? {
                if load_trade(tx, id)?.is_expired(now) {
                    delete_trade(tx, id)?;
                    expired.push(id);
                }
            }
            Ok(expired)
        })?;
        if !expired.is_empty() {
            info!("expired {} trade proposal(s): {expired:?}", expired.len());
        }
        Ok(expired)
    }
}

impl Database {
    pub fn trade(&self, id: TradeId) -> EngineResult<TradeProposal> {
        self.read(|conn| load_trade(conn, id))
    }

    /// Proposals where `team` is either side, oldest first.
    pub fn pending_trades(&self, team: FantasyTeamId) -> EngineResult<Vec<TradeProposal>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT trade_id FROM trade_proposals
                 WHERE proposer_id = ?1 OR counterparty_id = ?1 ORDER BY trade_id",
            )?;
            let ids = stmt
                .query_map(params![team], |row| row.get::<_, TradeId>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.into_iter().map(|id| load_trade(conn, id)).collect()
        })
    }
}

fn validate_lists(offered: &[EntrantId], requested: &[EntrantId]) -> EngineResult<()> {
    if offered.is_empty() || requested.is_empty() {
        return Err(EngineError::InvalidState(
            "a trade must offer and request at least one entrant".into(),
        ));
    }
    if offered.len() != requested.len() {
        return Err(EngineError::InvalidState(format!(
            "unequal trade: {} offered for {} requested",
            offered.len(),
            requested.len()
        )));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = offered.iter().chain(requested).find(|e| !seen.insert(**e)) {
        return Err(EngineError::InvalidState(format!(
            "entrant {dup} appears more than once in the trade"
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
            "the trade window is closed while lineups are locked".into(),
        ));
    }
    Ok(())
}

fn ensure_owned(
    conn: &Connection,
    league: LeagueId,
    team: FantasyTeamId,
    entrants: &[EntrantId],
    err: fn(String) -> EngineError,
) -> EngineResult<()> {
    for entrant in entrants {
        if !ledger::owns(conn, league, team, *entrant)? {
            return Err(err(format!("team {team} does not own entrant {entrant}")));
        }
    }
    Ok(())
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn all_trade_ids(conn: &Connection) -> EngineResult<Vec<TradeId>> {
    let mut stmt = conn.prepare("SELECT trade_id FROM trade_proposals ORDER BY trade_id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn load_trade(conn: &Connection, id: TradeId) -> EngineResult<TradeProposal> {
    let proposal = conn
        .query_row(
            "SELECT trade_id, league_id, proposer_id, counterparty_id, created_at, expires_at
             FROM trade_proposals WHERE trade_id = ?1",
            params![id],
            |row| {
                Ok(TradeProposal {
                    id: row.get(0)?,
                    league_id: row.get(1)?,
                    proposer: row.get(2)?,
                    counterparty: row.get(3)?,
                    created_at: parse_stamp(4, row.get(4)?)?,
                    expires_at: parse_stamp(5, row.get(5)?)?,
                    offered: Vec::new(),
                    requested: Vec::new(),
                })
            },
        )
        .optional()?;
    let mut proposal = proposal.ok_or_else(|| EngineError::not_found("trade", id))?;

    let mut stmt = conn.prepare(
        "SELECT entrant_id, offered FROM trade_entrants WHERE trade_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((row.get::<_, EntrantId>(0)?, row.get::<_, bool>(1)?))
    })?;
    for row in rows {
        let (entrant, offered) = row?;
        if offered {
            proposal.offered.push(entrant);
        } else {
            proposal.requested.push(entrant);
        }
    }
    Ok(proposal)
}

fn delete_trade(conn: &Connection, id: TradeId) -> EngineResult<()> {
    conn.execute("DELETE FROM trade_entrants WHERE trade_id = ?1", params![id])?;
    conn.execute("DELETE FROM trade_proposals WHERE trade_id = ?1", params![id])?;
    Ok(())
}
