use crate::cmd::{Access, Session, fail};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::{Context, Result};
use clap::Args;
use reelstats_core::comb::CombOutcome;
use reelstats_core::ingest::{IngestEvent, IngestOutcome};
use reelstats_core::model::IdentityKey;
use reelstats_core::{ErrorCode, StoreError, now_ms};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// JSON Lines file of post/profile observations (`-` for stdin).
    pub input: PathBuf,

    /// Reconcile every touched id/handle bucket after saving.
    #[arg(long)]
    pub reconcile: bool,

    /// Skip the scheduled comb pass after ingesting.
    #[arg(long)]
    pub no_comb: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct IngestSummary {
    pub lines: usize,
    pub recorded: usize,
    pub metadata_only: usize,
    pub ignored: usize,
    /// Lines that were not valid observations.
    pub malformed: usize,
    /// Observations refused by the store (bad or virtual keys).
    pub rejected: usize,
    pub saved: usize,
    pub moved: usize,
    pub removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comb: Option<CombOutcome>,
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

pub fn run_ingest(args: &IngestArgs, output: OutputMode, data_dir: &Path) -> Result<()> {
    let reader = open_input(&args.input)?;
    let mut session = Session::open(data_dir, Access::Write, output)?;
    let store = &mut session.store;
    let now = now_ms();

    let mut summary = IngestSummary::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read line {}", index + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;

        let event: IngestEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(err) => {
                warn!(line = index + 1, error = %err, "skipping malformed observation");
                summary.malformed += 1;
                continue;
            }
        };
        let result = match &event {
            IngestEvent::Post(obs) => store.ingest_post(obs, now),
            IngestEvent::Profile(obs) => store.ingest_profile(obs, now),
        };
        match result {
            Ok(IngestOutcome::Recorded) => summary.recorded += 1,
            Ok(IngestOutcome::MetadataOnly) => summary.metadata_only += 1,
            Ok(IngestOutcome::Ignored) => summary.ignored += 1,
            Err(err @ (StoreError::InvalidKey(_) | StoreError::VirtualKeyWrite(_))) => {
                warn!(line = index + 1, error = %err, "observation rejected");
                summary.rejected += 1;
            }
            Err(err) => return Err(fail(output, err)),
        }
    }

    let touched: BTreeSet<IdentityKey> = store.dirty_keys().cloned().collect();
    summary.saved = store.save_dirty().map_err(|err| fail(output, err))?;

    if args.reconcile {
        for key in touched.iter().filter(|key| key.is_aliasable()) {
            let report = store
                .reconcile_user(key, now)
                .map_err(|err| fail(output, err))?;
            summary.moved += report.moved;
            summary.removed += report.removed;
        }
    }

    if !args.no_comb {
        match store.run_comb_if_due(now, false) {
            Ok(outcome) => summary.comb = Some(outcome),
            Err(err) if err.code() == ErrorCode::PurgeInProgress => {
                warn!(error = %err, "comb deferred");
            }
            Err(err) => return Err(fail(output, err)),
        }
    }

    info!(
        lines = summary.lines,
        recorded = summary.recorded,
        saved = summary.saved,
        "ingest complete"
    );

    render_summary(output, &summary)
}

fn render_summary(output: OutputMode, summary: &IngestSummary) -> Result<()> {
    render_mode(
        output,
        summary,
        |s, w| {
            writeln!(
                w,
                "lines={} recorded={} metadata_only={} ignored={} malformed={} rejected={} saved={}",
                s.lines, s.recorded, s.metadata_only, s.ignored, s.malformed, s.rejected, s.saved
            )
        },
        |s, w| {
            pretty_section(w, "Ingest")?;
            pretty_kv(w, "Lines", s.lines.to_string())?;
            pretty_kv(w, "Recorded", s.recorded.to_string())?;
            pretty_kv(w, "Metadata", s.metadata_only.to_string())?;
            pretty_kv(w, "Ignored", s.ignored.to_string())?;
            pretty_kv(w, "Malformed", s.malformed.to_string())?;
            pretty_kv(w, "Rejected", s.rejected.to_string())?;
            pretty_kv(w, "Saved", format!("{} bucket(s)", s.saved))?;
            if s.moved + s.removed > 0 {
                pretty_kv(w, "Reconciled", format!("{} moved, {} removed", s.moved, s.removed))?;
            }
            if let Some(CombOutcome::Ran(report)) = &s.comb {
                pretty_kv(
                    w,
                    "Comb",
                    format!("{} snapshot(s) removed", report.removed),
                )?;
            }
            Ok(())
        },
    )
}
