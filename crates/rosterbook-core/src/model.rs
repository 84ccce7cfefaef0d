// Domain types shared by the draft, waiver and trade engines.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map($name)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                <$inner>::column_result(value).map($name)
            }
        }
    };
}

id_type!(
    /// A real-world competing team, identified by its public team number.
    EntrantId(u32)
);
id_type!(LeagueId(i64));
id_type!(FantasyTeamId(i64));
id_type!(DraftId(i64));
id_type!(TradeId(i64));

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrant {
    pub id: EntrantId,
    pub name: String,
    /// Whether the entrant belongs to the home region tracked by region leagues.
    pub in_region: bool,
    pub first_active_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competition {
    pub key: String,
    pub name: String,
    pub year: i32,
    pub week: u32,
    pub in_region: bool,
}

/// Per-entrant, per-competition point components. Only the linkage matters to
/// the transaction engines; the components are stored opaquely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionResult {
    pub entrant_id: EntrantId,
    pub competition_key: String,
    pub qual_points: i64,
    pub alliance_points: i64,
    pub elim_points: i64,
    pub award_points: i64,
    pub rookie_points: i64,
    pub stat_correction: i64,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct League {
    pub id: LeagueId,
    pub name: String,
    pub year: i32,
    pub active: bool,
    pub roster_size: u32,
    /// Number of entrants each team starts per week; also the draft's
    /// minimum round count.
    pub min_starts: u32,
    pub is_region: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FantasyTeam {
    pub id: FantasyTeamId,
    pub name: String,
    pub league_id: LeagueId,
}

/// Current week and lineup lock for one season year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonWeek {
    pub year: i32,
    pub week: u32,
    pub lineups_locked: bool,
}

impl SeasonWeek {
    /// State assumed for a season that has never been configured.
    pub fn opening(year: i32) -> Self {
        SeasonWeek {
            year,
            week: 1,
            lineups_locked: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entrant_id: EntrantId,
    pub fantasy_team_id: FantasyTeamId,
    pub league_id: LeagueId,
    /// Draft the entrant was first acquired through, if any.
    pub draft_id: Option<DraftId>,
}

/// A weekly "started" designation of an owned entrant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Start {
    pub fantasy_team_id: FantasyTeamId,
    pub entrant_id: EntrantId,
    pub league_id: LeagueId,
    pub competition_key: String,
    pub week: u32,
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub id: DraftId,
    pub league_id: LeagueId,
    /// Target competition key; region leagues draft against the whole season.
    pub competition_key: String,
    pub rounds: u32,
    pub materialized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DraftStatus {
    NotStarted,
    Ordered,
    InProgress,
    Complete,
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DraftStatus::NotStarted => "not started",
            DraftStatus::Ordered => "ordered",
            DraftStatus::InProgress => "in progress",
            DraftStatus::Complete => "complete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSlot {
    pub fantasy_team_id: FantasyTeamId,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPick {
    pub draft_id: DraftId,
    pub pick_number: u32,
    pub fantasy_team_id: FantasyTeamId,
    /// `None` until the pick is made.
    pub entrant_id: Option<EntrantId>,
}

impl DraftPick {
    pub fn is_filled(&self) -> bool {
        self.entrant_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// Waivers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiverClaim {
    pub fantasy_team_id: FantasyTeamId,
    pub league_id: LeagueId,
    pub add_entrant: EntrantId,
    pub drop_entrant: EntrantId,
    /// Dense 1..k ordering within the owning team's claims.
    pub sub_priority: u32,
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub id: TradeId,
    pub league_id: LeagueId,
    pub proposer: FantasyTeamId,
    pub counterparty: FantasyTeamId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub offered: Vec<EntrantId>,
    pub requested: Vec<EntrantId>,
}

impl TradeProposal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Acting capability
// ---------------------------------------------------------------------------

/// Who is performing an operation. Administrators bypass turn and
/// counterparty checks, never eligibility or uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    Team(FantasyTeamId),
    Administrator,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Administrator)
    }

    /// True when the actor is the given team or an administrator.
    pub fn may_act_for(&self, team: FantasyTeamId) -> bool {
        match self {
            Actor::Team(id) => *id == team,
            Actor::Administrator => true,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Team(id) => write!(f, "team {id}"),
            Actor::Administrator => f.write_str("administrator"),
        }
    }
}
