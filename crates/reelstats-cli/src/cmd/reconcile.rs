use crate::cmd::{Access, Session, fail};
use crate::output::{OutputMode, pretty_kv, pretty_section, render};
use anyhow::Result;
use clap::{Args, ValueEnum};
use reelstats_core::model::IdentityKey;
use reelstats_core::now_ms;
use reelstats_core::reconcile::ReconcileReport;
use std::path::Path;

/// Which reconciliation passes to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Pass {
    /// Reclaim, move mismatches and prune, saved once.
    All,
    /// Move posts whose owner contradicts the bucket.
    Mismatched,
    /// Pull matching posts out of `unknown`.
    Reclaim,
    /// Drop metric-less posts past the grace window.
    Empty,
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Bucket to clean up.
    pub key: IdentityKey,

    #[arg(long, value_enum, default_value_t = Pass::All)]
    pub pass: Pass,
}

pub fn run_reconcile(args: &ReconcileArgs, output: OutputMode, data_dir: &Path) -> Result<()> {
    let mut session = Session::open(data_dir, Access::Write, output)?;
    let store = &mut session.store;
    let now = now_ms();

    let report: ReconcileReport = match args.pass {
        Pass::All => store.reconcile_user(&args.key, now),
        Pass::Mismatched => store.prune_mismatched_posts(&args.key, now),
        Pass::Reclaim => store.reclaim_from_unknown(&args.key, now),
        Pass::Empty => store.prune_empty_posts(&args.key, now),
    }
    .map_err(|err| fail(output, err))?;

    render(output, &report, |r, w| {
        pretty_section(w, &format!("Reconcile {}", args.key))?;
        pretty_kv(w, "Moved", r.moved.to_string())?;
        pretty_kv(w, "Removed", r.removed.to_string())?;
        if r.changed() {
            let touched: Vec<String> = r.touched.iter().map(ToString::to_string).collect();
            pretty_kv(w, "Touched", touched.join(", "))?;
        }
        Ok(())
    })
}
