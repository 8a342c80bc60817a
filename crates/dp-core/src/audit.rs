//! JSONL run transcripts
//!
//! One file per run, `run-{run_id}.jsonl`, written after the run finishes:
//! a `run_start` line, the plan, every transcript message, and a `run_end`
//! summary.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::Message;
use crate::plan::{DelegationPlan, Task};
use crate::workflow::{RunFailure, RunResult, RunStatus, SubtaskStatus};

/// One line of a transcript file
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum AuditRecord<'a> {
    RunStart {
        run_id: &'a str,
        task: &'a Task,
        timestamp: DateTime<Utc>,
    },
    Plan {
        plan: &'a DelegationPlan,
    },
    #[serde(rename = "message")]
    Entry {
        message: &'a Message,
    },
    RunEnd {
        status: RunStatus,
        cancelled: bool,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<&'a RunFailure>,
        timestamp: DateTime<Utc>,
    },
}

/// Writes run transcripts into a directory
#[derive(Debug, Clone)]
pub struct TranscriptLog {
    dir: PathBuf,
}

impl TranscriptLog {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path_for(&self, result: &RunResult) -> PathBuf {
        self.dir.join(format!("run-{}.jsonl", result.run_id))
    }

    /// Write the transcript of a finished run, returning the file path
    pub fn write(&self, task: &Task, result: &RunResult) -> crate::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(result);
        let mut out = BufWriter::new(File::create(&path)?);

        let mut line = |record: &AuditRecord<'_>| -> crate::Result<()> {
            serde_json::to_writer(&mut out, record)?;
            out.write_all(b"\n")?;
            Ok(())
        };

        line(&AuditRecord::RunStart {
            run_id: &result.run_id.0,
            task,
            timestamp: result.started_at,
        })?;
        if let Some(plan) = &result.plan {
            line(&AuditRecord::Plan { plan })?;
        }
        for message in &result.transcript {
            line(&AuditRecord::Entry { message })?;
        }
        line(&AuditRecord::RunEnd {
            status: result.status,
            cancelled: result.cancelled,
            succeeded: result.count(SubtaskStatus::Succeeded),
            failed: result.count(SubtaskStatus::Failed),
            skipped: result.count(SubtaskStatus::Skipped),
            failure: result.failure.as_ref(),
            timestamp: result.finished_at,
        })?;

        out.flush()?;
        Ok(path)
    }
}
