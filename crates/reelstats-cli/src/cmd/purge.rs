use crate::cmd::{Access, Session, fail};
use crate::output::{CliError, OutputMode, pretty_kv, pretty_section, render, render_error};
use anyhow::{Result, bail};
use clap::Args;
use reelstats_core::model::IdentityKey;
use reelstats_core::now_ms;
use serde::Serialize;
use std::path::Path;
use tracing::info;

#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Bucket to delete together with its cold history.
    pub key: IdentityKey,

    /// Confirm the deletion.
    #[arg(long)]
    pub yes: bool,
}

#[derive(Debug, Serialize)]
struct PurgeOutput {
    key: IdentityKey,
    posts_removed: usize,
}

pub fn run_purge(args: &PurgeArgs, output: OutputMode, data_dir: &Path) -> Result<()> {
    if !args.yes {
        render_error(
            output,
            &CliError::new(format!("refusing to purge {} without --yes", args.key)),
        )?;
        bail!("purge not confirmed");
    }

    let mut session = Session::open(data_dir, Access::Write, output)?;
    let posts_removed = session
        .store
        .purge_user(&args.key, now_ms())
        .map_err(|err| fail(output, err))?;
    info!(key = %args.key, posts_removed, "purged bucket");

    let result = PurgeOutput {
        key: args.key.clone(),
        posts_removed,
    };
    render(output, &result, |r, w| {
        pretty_section(w, "Purge")?;
        pretty_kv(w, "Key", r.key.to_string())?;
        pretty_kv(w, "Removed", format!("{} post(s)", r.posts_removed))
    })
}
