// Line-oriented administrative command surface.
//
// One command per line, whitespace separated, with an optional trailing
// `as admin` or `as team <id>`. Lines without an actor run as the
// administrator. Lists (draft orders, trade sides) are comma separated.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use rosterbook_core::config::Config;
use rosterbook_core::model::{
    Actor, Competition, DraftId, Entrant, EntrantId, FantasyTeamId, LeagueId, SeasonWeek, TradeId,
};
use rosterbook_core::{
    Database, DraftEngine, EngineError, ImportError, ImportKind, Importer, LineupBook, LogNotifier, NewLeague,
    StoreEligibility, TradeEngine, WaiverEngine,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // Setup
    CreateLeague {
        name: String,
        year: i32,
        roster_size: u32,
        min_starts: u32,
        is_region: bool,
    },
    CreateTeam { league: LeagueId, name: String },
    RenameTeam { team: FantasyTeamId, name: String },
    AddEntrant { entrant: Entrant },
    AddCompetition { competition: Competition },
    SetWeek { week: SeasonWeek },
    Import { kind: ImportKind, path: PathBuf },

    // Draft
    CreateDraft { league: LeagueId, competition: String, rounds: u32 },
    OrderDraft { draft: DraftId },
    SetOrder { draft: DraftId, teams: Vec<FantasyTeamId> },
    StartDraft { draft: DraftId },
    Pick { draft: DraftId, entrant: EntrantId },
    ResetDraft { draft: DraftId },

    // Waivers
    SeedPriority { league: LeagueId, teams: Vec<FantasyTeamId> },
    Release { league: LeagueId, entrant: EntrantId },
    Claim { team: FantasyTeamId, add: EntrantId, drop: EntrantId },
    CancelClaim { team: FantasyTeamId, sub_priority: u32 },
    AddDrop { team: FantasyTeamId, add: EntrantId, drop: EntrantId },
    ProcessWaivers { league: LeagueId },

    // Trades
    Propose {
        proposer: FantasyTeamId,
        counterparty: FantasyTeamId,
        offered: Vec<EntrantId>,
        requested: Vec<EntrantId>,
    },
    Accept { trade: TradeId },
    Decline { trade: TradeId },
    ExpireTrades,

    // Lineups
    Start { team: FantasyTeamId, entrant: EntrantId, week: u32 },
    Sit { team: FantasyTeamId, entrant: EntrantId, week: u32 },

    // Reads
    Order { draft: DraftId },
    Picks { draft: DraftId },
    Status { draft: DraftId },
    Priority { league: LeagueId },
    Claims { team: FantasyTeamId },
    Ledger { league: LeagueId },
    Trades { team: FantasyTeamId },
    Starts { team: FantasyTeamId },
}

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub command: Command,
    pub actor: Actor,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(input: &str) -> anyhow::Result<Option<Line>> {
    let input = input.trim();
    if input.is_empty() || input.starts_with('#') {
        return Ok(None);
    }
    let mut tokens: Vec<&str> = input.split_whitespace().collect();
    let actor = take_actor(&mut tokens)?;
    let (name, args) = tokens
        .split_first()
        .ok_or_else(|| anyhow!("missing command"))?;
    let command = parse_command(name, args)?;
    Ok(Some(Line { command, actor }))
}

fn take_actor(tokens: &mut Vec<&str>) -> anyhow::Result<Actor> {
    let n = tokens.len();
    if n >= 2 && tokens[n - 2] == "as" && tokens[n - 1] == "admin" {
        tokens.truncate(n - 2);
        return Ok(Actor::Administrator);
    }
    if n >= 3 && tokens[n - 3] == "as" && tokens[n - 2] == "team" {
        let team = num(tokens[n - 1], "acting team")?;
        tokens.truncate(n - 3);
        return Ok(Actor::Team(team));
    }
    Ok(Actor::Administrator)
}

fn parse_command(name: &str, args: &[&str]) -> anyhow::Result<Command> {
    let command = match name {
        "create-league" => {
            expect_min(name, args, 5, "<year> <roster-size> <min-starts> <region|open> <name...>")?;
            Command::CreateLeague {
                year: num(args[0], "year")?,
                roster_size: num(args[1], "roster size")?,
                min_starts: num(args[2], "min starts")?,
                is_region: region_flag(args[3])?,
                name: args[4..].join(" "),
            }
        }
        "create-team" => {
            expect_min(name, args, 2, "<league> <name...>")?;
            Command::CreateTeam {
                league: num(args[0], "league")?,
                name: args[1..].join(" "),
            }
        }
        "rename-team" => {
            expect_min(name, args, 2, "<team> <name...>")?;
            Command::RenameTeam {
                team: num(args[0], "team")?,
                name: args[1..].join(" "),
            }
        }
        "add-entrant" => {
            expect_min(name, args, 3, "<entrant> <region|open> <name...>")?;
            Command::AddEntrant {
                entrant: Entrant {
                    id: num(args[0], "entrant")?,
                    in_region: region_flag(args[1])?,
                    name: args[2..].join(" "),
                    first_active_year: None,
                },
            }
        }
        "add-competition" => {
            expect_min(name, args, 5, "<key> <year> <week> <region|open> <name...>")?;
            Command::AddCompetition {
                competition: Competition {
                    key: args[0].to_string(),
                    year: num(args[1], "year")?,
                    week: num(args[2], "week")?,
                    in_region: region_flag(args[3])?,
                    name: args[4..].join(" "),
                },
            }
        }
        "set-week" => {
            expect_exact(name, args, 3, "<year> <week> <locked|open>")?;
            Command::SetWeek {
                week: SeasonWeek {
                    year: num(args[0], "year")?,
                    week: num(args[1], "week")?,
                    lineups_locked: match args[2] {
                        "locked" => true,
                        "open" => false,
                        other => bail!("expected `locked` or `open`, got {other:?}"),
                    },
                },
            }
        }
        "import" => {
            expect_exact(name, args, 2, "<entrants|competitions|results> <path>")?;
            Command::Import {
                kind: args[0].parse().map_err(|e: String| anyhow!(e))?,
                path: PathBuf::from(args[1]),
            }
        }
        "create-draft" => {
            expect_exact(name, args, 3, "<league> <competition> <rounds>")?;
            Command::CreateDraft {
                league: num(args[0], "league")?,
                competition: args[1].to_string(),
                rounds: num(args[2], "rounds")?,
            }
        }
        "order-draft" => Command::OrderDraft {
            draft: single(name, args, "draft")?,
        },
        "set-order" => {
            expect_exact(name, args, 2, "<draft> <team,team,...>")?;
            Command::SetOrder {
                draft: num(args[0], "draft")?,
                teams: list(args[1], "team")?,
            }
        }
        "start-draft" => Command::StartDraft {
            draft: single(name, args, "draft")?,
        },
        "pick" => {
            expect_exact(name, args, 2, "<draft> <entrant>")?;
            Command::Pick {
                draft: num(args[0], "draft")?,
                entrant: num(args[1], "entrant")?,
            }
        }
        "reset-draft" => Command::ResetDraft {
            draft: single(name, args, "draft")?,
        },
        "seed-priority" => {
            expect_exact(name, args, 2, "<league> <team,team,...>")?;
            Command::SeedPriority {
                league: num(args[0], "league")?,
                teams: list(args[1], "team")?,
            }
        }
        "release" => {
            expect_exact(name, args, 2, "<league> <entrant>")?;
            Command::Release {
                league: num(args[0], "league")?,
                entrant: num(args[1], "entrant")?,
            }
        }
        "claim" | "add-drop" => {
            expect_exact(name, args, 3, "<team> <add> <drop>")?;
            let team = num(args[0], "team")?;
            let add = num(args[1], "add entrant")?;
            let drop = num(args[2], "drop entrant")?;
            if name == "claim" {
                Command::Claim { team, add, drop }
            } else {
                Command::AddDrop { team, add, drop }
            }
        }
        "cancel-claim" => {
            expect_exact(name, args, 2, "<team> <sub-priority>")?;
            Command::CancelClaim {
                team: num(args[0], "team")?,
                sub_priority: num(args[1], "sub-priority")?,
            }
        }
        "process-waivers" => Command::ProcessWaivers {
            league: single(name, args, "league")?,
        },
        "propose" => {
            expect_exact(name, args, 4, "<proposer> <counterparty> <offered,...> <requested,...>")?;
            Command::Propose {
                proposer: num(args[0], "proposer")?,
                counterparty: num(args[1], "counterparty")?,
                offered: list(args[2], "offered entrant")?,
                requested: list(args[3], "requested entrant")?,
            }
        }
        "accept" => Command::Accept {
            trade: single(name, args, "trade")?,
        },
        "decline" => Command::Decline {
            trade: single(name, args, "trade")?,
        },
        "expire-trades" => {
            expect_exact(name, args, 0, "")?;
            Command::ExpireTrades
        }
        "start" | "sit" => {
            expect_exact(name, args, 3, "<team> <entrant> <week>")?;
            let team = num(args[0], "team")?;
            let entrant = num(args[1], "entrant")?;
            let week = num(args[2], "week")?;
            if name == "start" {
                Command::Start { team, entrant, week }
            } else {
                Command::Sit { team, entrant, week }
            }
        }
        "order" => Command::Order {
            draft: single(name, args, "draft")?,
        },
        "picks" => Command::Picks {
            draft: single(name, args, "draft")?,
        },
        "status" => Command::Status {
            draft: single(name, args, "draft")?,
        },
        "priority" => Command::Priority {
            league: single(name, args, "league")?,
        },
        "claims" => Command::Claims {
            team: single(name, args, "team")?,
        },
        "ledger" => Command::Ledger {
            league: single(name, args, "league")?,
        },
        "trades" => Command::Trades {
            team: single(name, args, "team")?,
        },
        "starts" => Command::Starts {
            team: single(name, args, "team")?,
        },
        other => bail!("unknown command {other:?}"),
    };
    Ok(command)
}

fn num<T>(token: &str, what: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    token
        .parse()
        .with_context(|| format!("invalid {what} {token:?}"))
}

fn list<T>(token: &str, what: &str) -> anyhow::Result<Vec<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    token
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| num(s, what))
        .collect()
}

fn single<T>(name: &str, args: &[&str], what: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    expect_exact(name, args, 1, &format!("<{what}>"))?;
    num(args[0], what)
}

fn region_flag(token: &str) -> anyhow::Result<bool> {
    match token {
        "region" => Ok(true),
        "open" => Ok(false),
        other => bail!("expected `region` or `open`, got {other:?}"),
    }
}

fn expect_exact(name: &str, args: &[&str], n: usize, usage: &str) -> anyhow::Result<()> {
    if args.len() != n {
        bail!("usage: {name} {usage}");
    }
    Ok(())
}

fn expect_min(name: &str, args: &[&str], n: usize, usage: &str) -> anyhow::Result<()> {
    if args.len() < n {
        bail!("usage: {name} {usage}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Everything a command needs: the store, configuration and collaborators.
pub struct Session {
    db: Database,
    config: Config,
    oracle: StoreEligibility,
    notifier: LogNotifier,
}

impl Session {
    pub fn new(db: Database, config: Config) -> Self {
        Self {
            db,
            config,
            oracle: StoreEligibility,
            notifier: LogNotifier,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Run one command and return its JSON result.
    pub fn execute(&self, line: Line) -> anyhow::Result<Value> {
        let Line { command, actor } = line;
        let drafts = || DraftEngine::new(&self.db, &self.oracle, &self.notifier);
        let waivers = || WaiverEngine::new(&self.db, &self.oracle, &self.notifier);
        let trades = || TradeEngine::new(&self.db, &self.notifier, self.config.proposal_ttl());
        let lineups = || LineupBook::new(&self.db, self.config.lineups);

        let value = match command {
            Command::CreateLeague {
                name,
                year,
                roster_size,
                min_starts,
                is_region,
            } => {
                require_admin(actor)?;
                json!(self.db.create_league(&NewLeague {
                    name,
                    year,
                    roster_size,
                    min_starts,
                    is_region,
                })?)
            }
            Command::CreateTeam { league, name } => {
                require_admin(actor)?;
                json!(self.db.create_fantasy_team(league, &name)?)
            }
            Command::RenameTeam { team, name } => {
                require_team(actor, team)?;
                json!(self.db.rename_fantasy_team(team, &name)?)
            }
            Command::AddEntrant { entrant } => {
                require_admin(actor)?;
                let outcome = self.db.upsert_entrant(&entrant)?;
                json!({ "entrant": entrant.id, "outcome": format!("{outcome:?}") })
            }
            Command::AddCompetition { competition } => {
                require_admin(actor)?;
                let outcome = self.db.upsert_competition(&competition)?;
                json!({ "competition": competition.key, "outcome": format!("{outcome:?}") })
            }
            Command::SetWeek { week } => {
                require_admin(actor)?;
                self.db.set_season_week(week)?;
                json!(week)
            }
            Command::Import { kind, path } => {
                require_admin(actor)?;
                let summary = Importer::new(&self.db, self.config.import_batch_size).import_path(
                    kind,
                    &path,
                    &mut |progress| info!("import {kind}: {} rows processed", progress.rows()),
                )?;
                json!(summary)
            }

            Command::CreateDraft {
                league,
                competition,
                rounds,
            } => {
                require_admin(actor)?;
                json!(drafts().create_draft(league, &competition, rounds)?)
            }
            Command::OrderDraft { draft } => {
                require_admin(actor)?;
                json!(drafts().generate_draft_order(draft)?)
            }
            Command::SetOrder { draft, teams } => {
                require_admin(actor)?;
                json!(drafts().set_draft_order(draft, &teams)?)
            }
            Command::StartDraft { draft } => {
                require_admin(actor)?;
                json!({ "draft": draft, "picks": drafts().start_draft(draft)? })
            }
            Command::Pick { draft, entrant } => json!(drafts().make_pick(draft, actor, entrant)?),
            Command::ResetDraft { draft } => {
                require_admin(actor)?;
                json!({ "draft": draft, "deleted": drafts().reset_draft(draft)? })
            }

            Command::SeedPriority { league, teams } => {
                require_admin(actor)?;
                waivers().seed_priority(league, &teams)?;
                json!(self.db.waiver_priority(league)?)
            }
            Command::Release { league, entrant } => {
                require_admin(actor)?;
                waivers().place_on_waivers(league, entrant)?;
                json!(self.db.waiver_pool(league)?)
            }
            Command::Claim { team, add, drop } => {
                json!(waivers().submit_claim(actor, team, add, drop)?)
            }
            Command::CancelClaim { team, sub_priority } => {
                json!(waivers().cancel_claim(actor, team, sub_priority)?)
            }
            Command::AddDrop { team, add, drop } => {
                waivers().add_free_agent(actor, team, add, drop)?;
                json!(self.db.roster(team)?)
            }
            Command::ProcessWaivers { league } => {
                require_admin(actor)?;
                json!(waivers().process_league_waivers(league)?)
            }

            Command::Propose {
                proposer,
                counterparty,
                offered,
                requested,
            } => json!(trades().propose_trade(actor, proposer, counterparty, &offered, &requested)?),
            Command::Accept { trade } => json!(trades().accept_trade(actor, trade)?),
            Command::Decline { trade } => {
                trades().decline_trade(actor, trade)?;
                json!({ "declined": trade })
            }
            Command::ExpireTrades => {
                require_admin(actor)?;
                json!(trades().expire_trades(Utc::now())?)
            }

            Command::Start {
                team,
                entrant,
                week,
            } => json!(lineups().start_entrant(actor, team, entrant, week)?),
            Command::Sit {
                team,
                entrant,
                week,
            } => {
                lineups().sit_entrant(actor, team, entrant, week)?;
                json!(self.db.starts(team)?)
            }

            Command::Order { draft } => json!(self.db.draft_order(draft)?),
            Command::Picks { draft } => json!(self.db.draft_picks(draft)?),
            Command::Status { draft } => json!(self.db.draft_status(draft)?.to_string()),
            Command::Priority { league } => json!(self.db.waiver_priority(league)?),
            Command::Claims { team } => json!(self.db.pending_claims(team)?),
            Command::Ledger { league } => json!(self.db.ledger(league)?),
            Command::Trades { team } => json!(self.db.pending_trades(team)?),
            Command::Starts { team } => json!(self.db.starts(team)?),
        };
        Ok(value)
    }
}

fn require_admin(actor: Actor) -> Result<(), EngineError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::AuthorizationDenied(format!(
            "{actor} is not an administrator"
        )))
    }
}

fn require_team(actor: Actor, team: FantasyTeamId) -> Result<(), EngineError> {
    if actor.may_act_for(team) {
        Ok(())
    } else {
        Err(EngineError::AuthorizationDenied(format!(
            "{actor} cannot act for team {team}"
        )))
    }
}

/// Render a failed command as JSON, keeping the engine's error kind.
pub fn error_json(err: &anyhow::Error) -> Value {
    match engine_error(err) {
        Some(engine) => json!({
            "error": format!("{:?}", engine.kind()),
            "message": engine.to_string(),
        }),
        None => json!({ "error": "Command", "message": format!("{err:#}") }),
    }
}

/// The engine error behind `err`, including one wrapped by an import.
fn engine_error(err: &anyhow::Error) -> Option<&EngineError> {
    err.chain().find_map(|cause| {
        cause
            .downcast_ref::<EngineError>()
            .or_else(|| match cause.downcast_ref::<ImportError>() {
                Some(ImportError::Engine(inner)) => Some(inner),
                _ => None,
            })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
