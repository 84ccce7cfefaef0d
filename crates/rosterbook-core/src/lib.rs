// Library root: the roster transaction engines and their store.

pub mod config;
pub mod db;
pub mod draft;
pub mod eligibility;
pub mod error;
pub mod import;
pub mod ledger;
pub mod lineup;
pub mod model;
pub mod notify;
pub mod trade;
pub mod waiver;

pub use db::{Database, NewLeague, Upsert};
pub use draft::{DraftEngine, PickOutcome};
pub use eligibility::{eligible_entrants, AllowAll, CompetitionContext, EligibilityOracle, StoreEligibility};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use import::{ImportError, ImportKind, ImportSummary, Importer};
pub use lineup::{LineupBook, LineupRules};
pub use notify::{LogNotifier, Notice, Notifier, RecordingNotifier, Scope};
pub use trade::TradeEngine;
pub use waiver::{ExecutedClaim, WaiverEngine, WaiverReport};
