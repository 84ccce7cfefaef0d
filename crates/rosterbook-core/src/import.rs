// Bulk CSV import of reference data: entrants, competitions and results.
//
// Rows are committed in batches. A malformed row or one that references an
// unknown entrant/competition is skipped and counted; failure to read the
// source aborts, leaving earlier batches committed.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{self, Database, Upsert};
use crate::error::{EngineError, EngineResult};
use crate::model::{Competition, CompetitionResult, Entrant, EntrantId};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which reference table a CSV file feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Entrants,
    Competitions,
    Results,
}

impl FromStr for ImportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entrants" => Ok(ImportKind::Entrants),
            "competitions" => Ok(ImportKind::Competitions),
            "results" => Ok(ImportKind::Results),
            other => Err(format!("unknown import kind {other:?}")),
        }
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImportKind::Entrants => "entrants",
            ImportKind::Competitions => "competitions",
            ImportKind::Results => "results",
        })
    }
}

/// Running totals, also handed to the progress callback after every batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl ImportSummary {
    pub fn rows(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.skipped
    }

    fn record(&mut self, outcome: Upsert) {
        match outcome {
            Upsert::Inserted => self.inserted += 1,
            Upsert::Updated => self.updated += 1,
            Upsert::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV read error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Raw CSV rows (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawEntrant {
    #[serde(alias = "team_number")]
    entrant: u32,
    name: String,
    #[serde(default)]
    in_region: bool,
    #[serde(default, alias = "rookie_year")]
    first_active_year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawCompetition {
    #[serde(alias = "event_key")]
    key: String,
    name: String,
    year: i32,
    week: u32,
    #[serde(default)]
    in_region: bool,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(alias = "team_number")]
    entrant: u32,
    #[serde(alias = "event_key")]
    competition: String,
    #[serde(default)]
    qual_points: i64,
    #[serde(default)]
    alliance_points: i64,
    #[serde(default)]
    elim_points: i64,
    #[serde(default)]
    award_points: i64,
    #[serde(default)]
    rookie_points: i64,
    #[serde(default)]
    stat_correction: i64,
    #[serde(default)]
    finished: bool,
}

/// A parsed row that knows how to store itself. `Ok(None)` means the row
/// was rejected and should be counted as skipped.
trait ImportRow: DeserializeOwned {
    fn store(self, conn: &Connection) -> EngineResult<Option<Upsert>>;
}

impl ImportRow for RawEntrant {
    fn store(self, conn: &Connection) -> EngineResult<Option<Upsert>> {
        let name = self.name.trim();
        if name.is_empty() {
            warn!("skipping entrant {}: empty name", self.entrant);
            return Ok(None);
        }
        let entrant = Entrant {
            id: EntrantId(self.entrant),
            name: name.to_string(),
            in_region: self.in_region,
            first_active_year: self.first_active_year,
        };
        db::upsert_entrant(conn, &entrant).map(Some)
    }
}

impl ImportRow for RawCompetition {
    fn store(self, conn: &Connection) -> EngineResult<Option<Upsert>> {
        let key = self.key.trim();
        if key.is_empty() {
            warn!("skipping competition with empty key");
            return Ok(None);
        }
        let competition = Competition {
            key: key.to_string(),
            name: self.name.trim().to_string(),
            year: self.year,
            week: self.week,
            in_region: self.in_region,
        };
        db::upsert_competition(conn, &competition).map(Some)
    }
}

impl ImportRow for RawResult {
    fn store(self, conn: &Connection) -> EngineResult<Option<Upsert>> {
        let entrant = EntrantId(self.entrant);
        let key = self.competition.trim();
        match db::entrant(conn, entrant) {
            Ok(_) => {}
            Err(EngineError::NotFound { .. }) => {
                warn!("skipping result for unknown entrant {entrant}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        if db::competition(conn, key)?.is_none() {
            warn!("skipping result for entrant {entrant} at unknown competition {key}");
            return Ok(None);
        }
        let result = CompetitionResult {
            entrant_id: entrant,
            competition_key: key.to_string(),
            qual_points: self.qual_points,
            alliance_points: self.alliance_points,
            elim_points: self.elim_points,
            award_points: self.award_points,
            rookie_points: self.rookie_points,
            stat_correction: self.stat_correction,
            finished: self.finished,
        };
        db::upsert_result(conn, &result).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Importer
// ---------------------------------------------------------------------------

pub struct Importer<'a> {
    db: &'a Database,
    batch_size: usize,
}

impl<'a> Importer<'a> {
    pub fn new(db: &'a Database, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1),
        }
    }

    /// Import a CSV file from disk.
    pub fn import_path(
        &self,
        kind: ImportKind,
        path: &Path,
        progress: &mut dyn FnMut(&ImportSummary),
    ) -> Result<ImportSummary, ImportError> {
        let file = std::fs::File::open(path).map_err(|e| ImportError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        info!("importing {kind} from {}", path.display());
        self.import_reader(kind, file, progress)
    }

    /// Import CSV data with a header row from any reader.
    pub fn import_reader<R: Read>(
        &self,
        kind: ImportKind,
        rdr: R,
        progress: &mut dyn FnMut(&ImportSummary),
    ) -> Result<ImportSummary, ImportError> {
        let summary = match kind {
            ImportKind::Entrants => self.run::<RawEntrant, _>(rdr, progress)?,
            ImportKind::Competitions => self.run::<RawCompetition, _>(rdr, progress)?,
            ImportKind::Results => self.run::<RawResult, _>(rdr, progress)?,
        };
        info!(
            "{kind} import finished: {} inserted, {} updated, {} unchanged, {} skipped",
            summary.inserted, summary.updated, summary.unchanged, summary.skipped
        );
        Ok(summary)
    }

    fn run<T: ImportRow, R: Read>(
        &self,
        rdr: R,
        progress: &mut dyn FnMut(&ImportSummary),
    ) -> Result<ImportSummary, ImportError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
        let mut summary = ImportSummary::default();
        let mut batch: Vec<T> = Vec::with_capacity(self.batch_size);

        for (idx, result) in reader.deserialize::<T>().enumerate() {
            match result {
                Ok(row) => batch.push(row),
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    warn!("skipping malformed row {}: {e}", idx + 1);
                    summary.skipped += 1;
                }
            }
            if batch.len() >= self.batch_size {
                self.commit(&mut batch, &mut summary)?;
                progress(&summary);
            }
        }
        if !batch.is_empty() {
            self.commit(&mut batch, &mut summary)?;
            progress(&summary);
        }
        Ok(summary)
    }

    fn commit<T: ImportRow>(
        &self,
        batch: &mut Vec<T>,
        summary: &mut ImportSummary,
    ) -> Result<(), ImportError> {
        let rows = std::mem::take(batch);
        let outcome = self.db.write(|tx| {
            let mut part = ImportSummary::default();
            for row in rows {
                match row.store(tx)? {
                    Some(outcome) => part.record(outcome),
                    None => part.skipped += 1,
                }
            }
            Ok(part)
        })?;
        debug!("committed batch of {} rows", outcome.rows());
        summary.inserted += outcome.inserted;
        summary.updated += outcome.updated;
        summary.unchanged += outcome.unchanged;
        summary.skipped += outcome.skipped;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_db;

    fn import(db: &Database, kind: ImportKind, data: &str) -> ImportSummary {
        Importer::new(db, 2)
            .import_reader(kind, data.as_bytes(), &mut |_| {})
            .unwrap()
    }

    #[test]
    fn entrants_insert_then_update() {
        let db = test_db();
        let csv_data = "\
entrant,name,in_region,first_active_year
118,Robonauts,false,1997
33,Killer Bees,true,1995
67,The HOT Team,true,";
        let summary = import(&db, ImportKind::Entrants, csv_data);
        assert_eq!(summary.inserted, 3);
        assert_eq!(db.entrant(EntrantId(67)).unwrap().first_active_year, None);
        assert!(db.entrant(EntrantId(33)).unwrap().in_region);

        let again = import(
            &db,
            ImportKind::Entrants,
            "entrant,name,in_region\n118,Robonauts,false\n33,Bees,true",
        );
        assert_eq!(again.inserted, 0);
        assert_eq!(again.updated + again.unchanged, 2);
        assert_eq!(db.entrant(EntrantId(33)).unwrap().name, "Bees");
    }

    #[test]
    fn team_number_alias_accepted() {
        let db = test_db();
        let summary = import(&db, ImportKind::Entrants, "team_number,name\n254,Cheesy Poofs");
        assert_eq!(summary.inserted, 1);
    }

    #[test]
    fn malformed_rows_skipped() {
        let db = test_db();
        let csv_data = "\
entrant,name
118,Robonauts
not-a-number,Broken
,
254,Cheesy Poofs";
        let summary = import(&db, ImportKind::Entrants, csv_data);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn results_with_unknown_references_skipped() {
        let db = test_db();
        import(&db, ImportKind::Entrants, "entrant,name\n118,Robonauts");
        import(
            &db,
            ImportKind::Competitions,
            "key,name,year,week,in_region\n2025txhou,Houston,2025,1,false",
        );
        let csv_data = "\
entrant,competition,qual_points,elim_points
118,2025txhou,12,20
999,2025txhou,4,0
118,2025nope,1,1";
        let summary = import(&db, ImportKind::Results, csv_data);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn progress_reported_per_batch() {
        let db = test_db();
        let csv_data = "entrant,name\n1,A\n2,B\n3,C\n4,D\n5,E";
        let mut seen = Vec::new();
        let summary = Importer::new(&db, 2)
            .import_reader(ImportKind::Entrants, csv_data.as_bytes(), &mut |s| {
                seen.push(s.rows())
            })
            .unwrap();
        assert_eq!(seen, vec![2, 4, 5]);
        assert_eq!(summary.inserted, 5);
    }

    #[test]
    fn missing_file_is_io_error() {
        let db = test_db();
        let err = Importer::new(&db, 10)
            .import_path(
                ImportKind::Entrants,
                Path::new("/nonexistent/entrants.csv"),
                &mut |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, ImportError::Io { .. }));
    }

    #[test]
    fn import_kind_parses() {
        assert_eq!("Results".parse::<ImportKind>().unwrap(), ImportKind::Results);
        assert!("teams".parse::<ImportKind>().is_err());
    }
}
