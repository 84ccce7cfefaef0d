// Eligibility: which entrants may be acquired in a given competition context.

use std::collections::HashSet;

use rusqlite::{params, Connection};

use crate::error::EngineResult;
use crate::model::{Draft, EntrantId, League};

/// The competition scope an acquisition is judged against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompetitionContext {
    /// Entrants with a result at one competition.
    Competition { key: String },
    /// Entrants with a result anywhere in a season, optionally restricted to
    /// region-flagged entrants.
    Season { year: i32, region_only: bool },
}

impl CompetitionContext {
    /// Region leagues draft against the whole season; other leagues draft
    /// against the draft's target competition.
    pub fn for_draft(league: &League, draft: &Draft) -> Self {
        if league.is_region {
            CompetitionContext::Season {
                year: league.year,
                region_only: true,
            }
        } else {
            CompetitionContext::Competition {
                key: draft.competition_key.clone(),
            }
        }
    }

    /// Scope for free-agent pickups during the season.
    pub fn for_free_agency(league: &League) -> Self {
        CompetitionContext::Season {
            year: league.year,
            region_only: league.is_region,
        }
    }
}

/// Every entrant eligible under `context`.
pub fn eligible_entrants(
    conn: &Connection,
    context: &CompetitionContext,
) -> EngineResult<HashSet<EntrantId>> {
    let ids = match context {
        CompetitionContext::Competition { key } => {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT entrant_id FROM competition_results WHERE competition_key = ?1",
            )?;
            let ids = stmt
                .query_map(params![key], |row| row.get(0))?
                .collect::<Result<HashSet<EntrantId>, _>>()?;
            ids
        }
        CompetitionContext::Season { year, region_only } => {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT e.entrant_id
                 FROM entrants e
                 JOIN competition_results r ON r.entrant_id = e.entrant_id
                 JOIN competitions c ON c.competition_key = r.competition_key
                 WHERE c.year = ?1 AND (?2 = 0 OR e.in_region = 1)",
            )?;
            let ids = stmt
                .query_map(params![year, region_only], |row| row.get(0))?
                .collect::<Result<HashSet<EntrantId>, _>>()?;
            ids
        }
    };
    Ok(ids)
}

/// Answers whether one entrant may be acquired in a context.
pub trait EligibilityOracle: Send + Sync {
    fn is_eligible(
        &self,
        conn: &Connection,
        entrant: EntrantId,
        context: &CompetitionContext,
    ) -> EngineResult<bool>;
}

/// Oracle backed by the competition results held in the store.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreEligibility;

impl EligibilityOracle for StoreEligibility {
    fn is_eligible(
        &self,
        conn: &Connection,
        entrant: EntrantId,
        context: &CompetitionContext,
    ) -> EngineResult<bool> {
        Ok(eligible_entrants(conn, context)?.contains(&entrant))
    }
}

/// Oracle that accepts everyone. Useful for offseason leagues without
/// imported results.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl EligibilityOracle for AllowAll {
    fn is_eligible(&self, _: &Connection, _: EntrantId, _: &CompetitionContext) -> EngineResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{entrant_fixture, test_db};
    use crate::model::{Competition, CompetitionResult};

    fn seed(db: &crate::db::Database) {
        db.upsert_entrant(&entrant_fixture(118, false)).unwrap();
        db.upsert_entrant(&entrant_fixture(254, false)).unwrap();
        db.upsert_entrant(&entrant_fixture(33, true)).unwrap();
        db.upsert_entrant(&entrant_fixture(67, true)).unwrap();
        for (key, year, region) in [("2025txhou", 2025, false), ("2025milan", 2025, true), ("2024milan", 2024, true)] {
            db.upsert_competition(&Competition {
                key: key.into(),
                name: key.into(),
                year,
                week: 1,
                in_region: region,
            })
            .unwrap();
        }
        for (entrant, key) in [(118, "2025txhou"), (254, "2025txhou"), (33, "2025milan"), (67, "2024milan")] {
            db.record_result(&CompetitionResult {
                entrant_id: EntrantId(entrant),
                competition_key: key.into(),
                ..Default::default()
            })
            .unwrap();
        }
    }

    #[test]
    fn competition_scope_uses_results_at_that_competition() {
        let db = test_db();
        seed(&db);
        let ctx = CompetitionContext::Competition {
            key: "2025txhou".into(),
        };
        let set = db.read(|conn| eligible_entrants(conn, &ctx)).unwrap();
        assert_eq!(set, HashSet::from([EntrantId(118), EntrantId(254)]));
    }

    #[test]
    fn region_season_scope_filters_region_and_year() {
        let db = test_db();
        seed(&db);
        let ctx = CompetitionContext::Season {
            year: 2025,
            region_only: true,
        };
        let set = db.read(|conn| eligible_entrants(conn, &ctx)).unwrap();
        assert_eq!(set, HashSet::from([EntrantId(33)]));

        let open = CompetitionContext::Season {
            year: 2025,
            region_only: false,
        };
        let set = db.read(|conn| eligible_entrants(conn, &open)).unwrap();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn store_oracle_answers_membership() {
        let db = test_db();
        seed(&db);
        let ctx = CompetitionContext::Competition {
            key: "2025txhou".into(),
        };
        let oracle = StoreEligibility;
        assert!(db.read(|c| oracle.is_eligible(c, EntrantId(118), &ctx)).unwrap());
        assert!(!db.read(|c| oracle.is_eligible(c, EntrantId(33), &ctx)).unwrap());
    }
}
