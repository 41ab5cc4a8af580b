use crate::cmd::{Access, Session, fail};
use crate::output::{OutputMode, pretty_kv, pretty_section, render};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use reelstats_core::comb::CombOutcome;
use reelstats_core::now_ms;
use std::path::Path;

#[derive(Args, Debug)]
pub struct CombArgs {
    /// Run even if the last pass is within the configured interval.
    #[arg(long)]
    pub force: bool,
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms).map_or_else(|| ms.to_string(), |at| at.to_rfc3339())
}

pub fn run_comb(args: &CombArgs, output: OutputMode, data_dir: &Path) -> Result<()> {
    let mut session = Session::open(data_dir, Access::Write, output)?;
    let outcome = session
        .store
        .run_comb_if_due(now_ms(), args.force)
        .map_err(|err| fail(output, err))?;

    render(output, &outcome, |o, w| {
        pretty_section(w, "Comb")?;
        match o {
            CombOutcome::Disabled => pretty_kv(w, "Status", "disabled in config.toml"),
            CombOutcome::NotDue { next_at } => {
                pretty_kv(w, "Status", "not due")?;
                pretty_kv(w, "Next run", format_ms(*next_at))
            }
            CombOutcome::Ran(report) => {
                pretty_kv(w, "Status", "ran")?;
                pretty_kv(w, "Users", report.users.to_string())?;
                pretty_kv(w, "Posts", report.posts.to_string())?;
                pretty_kv(w, "Removed", report.removed.to_string())?;
                if !report.skipped.is_empty() {
                    let skipped: Vec<String> =
                        report.skipped.iter().map(ToString::to_string).collect();
                    pretty_kv(w, "Excepted", skipped.join(", "))?;
                }
                Ok(())
            }
        }
    })
}
