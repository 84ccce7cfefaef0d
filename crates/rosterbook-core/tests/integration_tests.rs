// Integration tests for the roster transaction engines.
//
// These drive a league end-to-end through the public API: reference data
// import, a snake draft, a waiver cycle, and trades.

use chrono::Duration;
use rand::rngs::StdRng;
use rand::SeedableRng;

use rosterbook_core::model::{
    Actor, CompetitionResult, DraftId, DraftStatus, Entrant, EntrantId, FantasyTeamId, LeagueId,
};
use rosterbook_core::notify::Notice;
use rosterbook_core::{
    Database, DraftEngine, ErrorKind, ImportKind, Importer, NewLeague, RecordingNotifier,
    StoreEligibility, TradeEngine, WaiverEngine,
};

// ===========================================================================
// Test helpers
// ===========================================================================

const ENTRANTS: &str = "\
entrant,name,in_region,first_active_year
118,Robonauts,true,1997
254,Cheesy Poofs,true,1999
33,Killer Bees,true,1995
67,The HOT Team,true,1996
1,The Juggernauts,true,1997
2,Trojans,true,1997
3,Outsiders,false,1997";

const COMPETITIONS: &str = "\
key,name,year,week,in_region
2025mitry,Troy District,2025,1,true";

const RESULTS: &str = "\
entrant,competition,qual_points
118,2025mitry,10
254,2025mitry,9
33,2025mitry,8
67,2025mitry,7
1,2025mitry,6
2,2025mitry,5
3,2025mitry,4";

struct League {
    db: Database,
    notifier: RecordingNotifier,
    id: LeagueId,
    a: FantasyTeamId,
    b: FantasyTeamId,
}

fn league_with_data() -> League {
    let db = Database::open(":memory:").unwrap();
    let importer = Importer::new(&db, 3);
    for (kind, data) in [
        (ImportKind::Entrants, ENTRANTS),
        (ImportKind::Competitions, COMPETITIONS),
        (ImportKind::Results, RESULTS),
    ] {
        let summary = importer
            .import_reader(kind, data.as_bytes(), &mut |_| {})
            .unwrap();
        assert_eq!(summary.skipped, 0, "{kind} import skipped rows");
    }

    let id = db
        .create_league(&NewLeague {
            name: "Michigan".into(),
            year: 2025,
            roster_size: 4,
            min_starts: 2,
            is_region: true,
        })
        .unwrap()
        .id;
    let a = db.create_fantasy_team(id, "A").unwrap().id;
    let b = db.create_fantasy_team(id, "B").unwrap().id;
    League {
        db,
        notifier: RecordingNotifier::default(),
        id,
        a,
        b,
    }
}

/// Run the two-round draft: A takes 118 and 67, B takes 254 and 33.
fn drafted(league: &League) -> DraftId {
    let engine = DraftEngine::new(&league.db, &StoreEligibility, &league.notifier);
    let draft = engine.create_draft(league.id, "2025mitry", 2).unwrap().id;
    engine.set_draft_order(draft, &[league.a, league.b]).unwrap();
    engine.start_draft(draft).unwrap();
    for (team, entrant) in [(league.a, 118), (league.b, 254), (league.b, 33), (league.a, 67)] {
        engine
            .make_pick(draft, Actor::Team(team), EntrantId(entrant))
            .unwrap();
    }
    draft
}

/// Extend the league to four teams (A, B, C, D) and six more region
/// entrants (4..=9) with results, then run a two-round draft in slot order
/// A, B, C, D.
fn four_team_draft(league: &League) -> (FantasyTeamId, FantasyTeamId, DraftId) {
    let c = league.db.create_fantasy_team(league.id, "C").unwrap().id;
    let d = league.db.create_fantasy_team(league.id, "D").unwrap().id;
    for id in 4..=9 {
        league
            .db
            .upsert_entrant(&Entrant {
                id: EntrantId(id),
                name: format!("Entrant {id}"),
                in_region: true,
                first_active_year: Some(2020),
            })
            .unwrap();
        league
            .db
            .record_result(&CompetitionResult {
                entrant_id: EntrantId(id),
                competition_key: "2025mitry".into(),
                qual_points: 3,
                ..Default::default()
            })
            .unwrap();
    }

    let engine = DraftEngine::new(&league.db, &StoreEligibility, &league.notifier);
    let draft = engine.create_draft(league.id, "2025mitry", 2).unwrap().id;
    engine
        .set_draft_order(draft, &[league.a, league.b, c, d])
        .unwrap();
    engine.start_draft(draft).unwrap();
    let picks = [
        (league.a, 118),
        (league.b, 254),
        (c, 33),
        (d, 67),
        (d, 1),
        (c, 2),
        (league.b, 4),
        (league.a, 5),
    ];
    for (team, entrant) in picks {
        engine
            .make_pick(draft, Actor::Team(team), EntrantId(entrant))
            .unwrap();
    }
    (c, d, draft)
}

// ===========================================================================
// Draft
// ===========================================================================

#[test]
fn snake_draft_fills_the_ledger() {
    let league = league_with_data();
    let engine = DraftEngine::new(&league.db, &StoreEligibility, &league.notifier);
    let draft = engine.create_draft(league.id, "2025mitry", 2).unwrap().id;
    assert_eq!(league.db.draft_status(draft).unwrap(), DraftStatus::NotStarted);

    engine.set_draft_order(draft, &[league.a, league.b]).unwrap();
    assert_eq!(engine.start_draft(draft).unwrap(), 4);
    let owners: Vec<FantasyTeamId> = league
        .db
        .draft_picks(draft)
        .unwrap()
        .iter()
        .map(|p| p.fantasy_team_id)
        .collect();
    assert_eq!(owners, vec![league.a, league.b, league.b, league.a]);

    engine.make_pick(draft, Actor::Team(league.a), EntrantId(118)).unwrap();
    let err = engine
        .make_pick(draft, Actor::Team(league.b), EntrantId(118))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Out of region.
    let err = engine
        .make_pick(draft, Actor::Team(league.b), EntrantId(3))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    engine.make_pick(draft, Actor::Team(league.b), EntrantId(254)).unwrap();
    engine.make_pick(draft, Actor::Team(league.b), EntrantId(33)).unwrap();
    assert_eq!(league.db.draft_status(draft).unwrap(), DraftStatus::InProgress);
    let last = engine
        .make_pick(draft, Actor::Team(league.a), EntrantId(67))
        .unwrap();
    assert!(last.materialized);
    assert!(last.next.is_none());
    assert_eq!(league.db.draft_status(draft).unwrap(), DraftStatus::Complete);

    let ledger = league.db.ledger(league.id).unwrap();
    assert_eq!(ledger.len(), 4);
    assert!(ledger.iter().all(|e| e.draft_id == Some(draft)));
    assert_eq!(league.db.roster(league.a).unwrap(), vec![EntrantId(67), EntrantId(118)]);

    // Re-running completion does not duplicate ledger rows.
    assert!(!engine.on_pick_completion(draft).unwrap());
    assert_eq!(league.db.ledger(league.id).unwrap().len(), 4);
    assert_eq!(engine.reset_draft(draft).unwrap_err().kind(), ErrorKind::InvalidState);

    let notices = league.notifier.take();
    assert!(notices.contains(&Notice::Announce(
        rosterbook_core::Scope::Draft(draft),
        "Draft is complete!".into()
    )));
}

#[test]
fn four_team_start_snakes_through_three_rounds() {
    let league = league_with_data();
    let c = league.db.create_fantasy_team(league.id, "C").unwrap().id;
    let d = league.db.create_fantasy_team(league.id, "D").unwrap().id;
    let engine = DraftEngine::new(&league.db, &StoreEligibility, &league.notifier);
    let draft = engine.create_draft(league.id, "2025mitry", 3).unwrap().id;
    engine
        .set_draft_order(draft, &[league.a, league.b, c, d])
        .unwrap();
    assert_eq!(engine.start_draft(draft).unwrap(), 12);

    let picks = league.db.draft_picks(draft).unwrap();
    let numbers: Vec<u32> = picks.iter().map(|p| p.pick_number).collect();
    assert_eq!(numbers, (1..=12).collect::<Vec<_>>());
    let owners: Vec<FantasyTeamId> = picks.iter().map(|p| p.fantasy_team_id).collect();
    let (a, b) = (league.a, league.b);
    assert_eq!(owners, vec![a, b, c, d, d, c, b, a, a, b, c, d]);
    assert!(picks.iter().all(|p| p.entrant_id.is_none()));
    assert_eq!(
        engine.current_pick(draft).unwrap().map(|p| p.fantasy_team_id),
        Some(a)
    );
}

#[test]
fn seeded_shuffle_is_reproducible() {
    let league = league_with_data();
    let engine = DraftEngine::new(&league.db, &StoreEligibility, &league.notifier);
    let first = engine.create_draft(league.id, "2025mitry", 2).unwrap().id;
    let second = engine.create_draft(league.id, "2025mitry", 2).unwrap().id;
    let x = engine
        .generate_draft_order_with(first, &mut StdRng::seed_from_u64(11))
        .unwrap();
    let y = engine
        .generate_draft_order_with(second, &mut StdRng::seed_from_u64(11))
        .unwrap();
    assert_eq!(x, y);
}

// ===========================================================================
// Waivers
// ===========================================================================

#[test]
fn waiver_cycle_after_draft() {
    let league = league_with_data();
    drafted(&league);
    // Last draft slot waives first.
    assert_eq!(league.db.waiver_priority(league.id).unwrap(), vec![league.b, league.a]);

    let waivers = WaiverEngine::new(&league.db, &StoreEligibility, &league.notifier);
    waivers.place_on_waivers(league.id, EntrantId(1)).unwrap();
    waivers.submit_claim(Actor::Team(league.a), league.a, EntrantId(1), EntrantId(118)).unwrap();
    waivers.submit_claim(Actor::Team(league.b), league.b, EntrantId(1), EntrantId(33)).unwrap();

    let report = waivers.process_league_waivers(league.id).unwrap();
    assert_eq!(report.executed.len(), 1);
    assert_eq!(report.executed[0].fantasy_team_id, league.b);
    assert_eq!(report.discarded, 1);
    assert_eq!(league.db.waiver_priority(league.id).unwrap(), vec![league.a, league.b]);
    assert_eq!(league.db.owner_of(league.id, EntrantId(1)).unwrap(), Some(league.b));
    assert_eq!(league.db.waiver_pool(league.id).unwrap(), vec![EntrantId(33)]);

    // Next cycle: nobody claims 33, so it becomes a free agent.
    let report = waivers.process_league_waivers(league.id).unwrap();
    assert_eq!(report.cleared, vec![EntrantId(33)]);
    assert!(league.db.waiver_pool(league.id).unwrap().is_empty());
}

#[test]
fn priority_stays_a_permutation_after_several_winners() {
    let league = league_with_data();
    let (c, d, _) = four_team_draft(&league);
    let (a, b) = (league.a, league.b);
    assert_eq!(league.db.waiver_priority(league.id).unwrap(), vec![d, c, b, a]);

    let waivers = WaiverEngine::new(&league.db, &StoreEligibility, &league.notifier);
    for entrant in [6, 7, 8] {
        waivers.place_on_waivers(league.id, EntrantId(entrant)).unwrap();
    }
    let claims = [
        (d, 6, 67),
        (c, 6, 33),
        (c, 7, 2),
        (b, 8, 254),
        (a, 6, 118),
        (a, 7, 5),
    ];
    for (team, add, drop) in claims {
        waivers
            .submit_claim(Actor::Team(team), team, EntrantId(add), EntrantId(drop))
            .unwrap();
    }

    let report = waivers.process_league_waivers(league.id).unwrap();
    let winners: Vec<(FantasyTeamId, EntrantId, u32)> = report
        .executed
        .iter()
        .map(|e| (e.fantasy_team_id, e.added, e.priority))
        .collect();
    assert_eq!(
        winners,
        vec![(d, EntrantId(6), 1), (c, EntrantId(7), 1), (b, EntrantId(8), 1)]
    );
    assert_eq!(report.discarded, 3);
    assert!(report.cleared.is_empty());

    let priority = league.db.waiver_priority(league.id).unwrap();
    assert_eq!(priority, vec![a, d, c, b]);
    let mut sorted = priority.clone();
    sorted.sort();
    let mut teams: Vec<FantasyTeamId> = league
        .db
        .league_teams(league.id)
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    teams.sort();
    assert_eq!(sorted, teams);

    assert_eq!(
        league.db.waiver_pool(league.id).unwrap(),
        vec![EntrantId(2), EntrantId(67), EntrantId(254)]
    );
    assert_eq!(league.db.roster(a).unwrap(), vec![EntrantId(5), EntrantId(118)]);
    assert_eq!(league.db.ledger(league.id).unwrap().len(), 8);
    assert!(league.db.pending_claims(a).unwrap().is_empty());
}

// ===========================================================================
// Trades
// ===========================================================================

#[test]
fn trade_round_trip_and_drift() {
    let league = league_with_data();
    drafted(&league);
    let trades = TradeEngine::new(&league.db, &league.notifier, Duration::minutes(60));

    let p = trades
        .propose_trade(Actor::Team(league.a), league.a, league.b, &[EntrantId(67)], &[EntrantId(254)])
        .unwrap();
    assert_eq!(league.db.pending_trades(league.b).unwrap().len(), 1);
    trades.accept_trade(Actor::Team(league.b), p.id).unwrap();
    assert_eq!(league.db.owner_of(league.id, EntrantId(67)).unwrap(), Some(league.b));
    assert_eq!(league.db.owner_of(league.id, EntrantId(254)).unwrap(), Some(league.a));

    // B releases 33 for a free agent after the proposal is made.
    let p = trades
        .propose_trade(Actor::Team(league.a), league.a, league.b, &[EntrantId(118)], &[EntrantId(33)])
        .unwrap();
    WaiverEngine::new(&league.db, &StoreEligibility, &league.notifier)
        .add_free_agent(Actor::Team(league.b), league.b, EntrantId(2), EntrantId(33))
        .unwrap();
    let err = trades.accept_trade(Actor::Team(league.b), p.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(league.db.owner_of(league.id, EntrantId(118)).unwrap(), Some(league.a));
    assert_eq!(league.db.ledger(league.id).unwrap().len(), 4);
}
