//! `refresh-check`: one auto-refresh tick for an external viewer.
//!
//! The scheduler state lives next to the database so consecutive
//! invocations share the skip streak.

use crate::cmd::{Access, Session, fail};
use crate::output::{OutputMode, pretty_kv, pretty_section, render};
use anyhow::{Context, Result};
use clap::Args;
use reelstats_core::refresh::{RefreshPoll, RefreshScheduler};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Scheduler state file inside the data directory.
pub const STATE_FILE: &str = "refresh-state.json";

#[derive(Args, Debug)]
pub struct RefreshArgs {
    /// Forget the stored state and start a fresh streak.
    #[arg(long)]
    pub reset: bool,
}

#[derive(Debug, Serialize)]
struct RefreshOutput {
    #[serde(flatten)]
    poll: RefreshPoll,
    updated_at: Option<i64>,
    skip_streak: u32,
}

fn state_path(data_dir: &Path) -> PathBuf {
    data_dir.join(STATE_FILE)
}

fn load_scheduler(path: &Path, max_skip_streak: u32) -> RefreshScheduler {
    let Ok(text) = fs::read_to_string(path) else {
        return RefreshScheduler::new(max_skip_streak);
    };
    match serde_json::from_str::<RefreshScheduler>(&text) {
        Ok(mut scheduler) => {
            scheduler.max_skip_streak = max_skip_streak;
            scheduler
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "discarding unreadable refresh state");
            RefreshScheduler::new(max_skip_streak)
        }
    }
}

pub fn run_refresh_check(args: &RefreshArgs, output: OutputMode, data_dir: &Path) -> Result<()> {
    let session = Session::open(data_dir, Access::Read, output)?;
    let path = state_path(&session.data_dir);
    let max_skip_streak = session.store.config().refresh.max_skip_streak;
    let mut scheduler = if args.reset {
        RefreshScheduler::new(max_skip_streak)
    } else {
        load_scheduler(&path, max_skip_streak)
    };

    let updated_at = match session.store.updated_at() {
        Ok(marker) => marker,
        Err(err) => {
            scheduler.abort();
            persist(&path, &scheduler)?;
            return Err(fail(output, err));
        }
    };
    let poll = scheduler.poll(updated_at);
    if matches!(poll, RefreshPoll::Refresh { .. }) {
        // The caller reloads right after this tick; record what it will see.
        scheduler.complete(updated_at, false);
    }
    persist(&path, &scheduler)?;
    debug!(?poll, ?updated_at, "refresh tick");

    let result = RefreshOutput {
        poll,
        updated_at,
        skip_streak: scheduler.skip_streak,
    };
    render(output, &result, |r, w| {
        pretty_section(w, "Refresh")?;
        let action = match r.poll {
            RefreshPoll::InFlight => "in flight",
            RefreshPoll::Skip { .. } => "skip",
            RefreshPoll::Refresh { .. } => "refresh",
        };
        pretty_kv(w, "Action", action)?;
        pretty_kv(
            w,
            "Updated at",
            r.updated_at.map_or_else(|| "never".to_string(), |t| t.to_string()),
        )?;
        pretty_kv(w, "Skip streak", r.skip_streak.to_string())
    })
}

fn persist(path: &Path, scheduler: &RefreshScheduler) -> Result<()> {
    let text = serde_json::to_string_pretty(scheduler)?;
    fs::write(path, text).with_context(|| format!("write {}", path.display()))
}
