//! Per-stage CSV audit of generation decisions

use crate::generation::Stage;
use crate::retrieval::ChainContext;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Writes `{dir}/{YYYYmmdd_HHMMSS}_{stage}.csv` with the unit identifiers
/// and the model's `analysis_decision`.
///
/// Existing files are never overwritten: a second run of the same stage
/// within one second writes `{YYYYmmdd_HHMMSS}_{stage}_2.csv`, and so on.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
    enabled: bool,
}

fn identifier_columns(stage: Stage) -> &'static [&'static str] {
    match stage {
        Stage::Functions => &["system_element"],
        Stage::Failures => &["function"],
        Stage::ExistingMeasures | Stage::NewMeasures => &["failure_cause"],
        Stage::RiskRating => &["failure_cause", "failure_effect"],
        Stage::Answer => &[],
    }
}

const MAX_NAME_ATTEMPTS: u32 = 1000;

fn identifier(ctx: &ChainContext, column: &str) -> String {
    let value = match column {
        "system_element" => ctx.system_element.as_deref(),
        "function" => ctx.function.as_deref(),
        "failure_cause" => ctx.failure_cause.as_deref(),
        "failure_effect" => ctx.failure_effect.as_deref(),
        _ => None,
    };
    value.unwrap_or_default().to_string()
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            enabled: true,
        }
    }

    /// An audit log that never writes.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one file for a stage run. Returns its path, or `None` when
    /// disabled or the write failed (logged, never fatal).
    pub fn record<'a, I>(&self, stage: Stage, decisions: I) -> Option<PathBuf>
    where
        I: IntoIterator<Item = (&'a ChainContext, &'a str)>,
    {
        if !self.enabled {
            return None;
        }
        let stem = format!("{}_{}", Local::now().format("%Y%m%d_%H%M%S"), stage.as_str());
        match self.write(&stem, stage, decisions) {
            Ok((path, rows)) => {
                debug!(path = %path.display(), rows, "audit log written");
                Some(path)
            }
            Err(e) => {
                warn!(dir = %self.dir.display(), file = %stem, error = %e, "failed to write audit log");
                None
            }
        }
    }

    /// Create `{stem}.csv`, or the first free `{stem}_{n}.csv`.
    fn create_file(&self, stem: &str) -> io::Result<(PathBuf, File)> {
        for n in 1..=MAX_NAME_ATTEMPTS {
            let name = match n {
                1 => format!("{stem}.csv"),
                n => format!("{stem}_{n}.csv"),
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free audit file name for {stem}"),
        ))
    }

    fn write<'a, I>(
        &self,
        stem: &str,
        stage: Stage,
        decisions: I,
    ) -> Result<(PathBuf, usize), csv::Error>
    where
        I: IntoIterator<Item = (&'a ChainContext, &'a str)>,
    {
        std::fs::create_dir_all(&self.dir)?;
        let (path, file) = self.create_file(stem)?;
        let columns = identifier_columns(stage);
        let mut writer = csv::Writer::from_writer(file);

        let mut header: Vec<&str> = columns.to_vec();
        header.push("analysis_decision");
        writer.write_record(&header)?;

        let mut rows = 0;
        for (ctx, decision) in decisions {
            let mut record: Vec<String> = columns.iter().map(|c| identifier(ctx, c)).collect();
            record.push(decision.to_string());
            writer.write_record(&record)?;
            rows += 1;
        }
        writer.flush()?;
        Ok((path, rows))
    }
}
