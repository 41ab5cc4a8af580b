use crate::cmd::{Access, Session};
use crate::output::{OutputMode, pretty_rule, render_mode};
use anyhow::Result;
use reelstats_core::model::UserIndexEntry;
use std::io::Write;
use std::path::Path;

/// List every stored bucket with its post count.
pub fn run_users(output: OutputMode, data_dir: &Path) -> Result<()> {
    let session = Session::open(data_dir, Access::Read, output)?;
    let index: Vec<UserIndexEntry> = session.store.users_index();

    render_mode(
        output,
        &index,
        |entries, w| {
            for entry in entries {
                writeln!(
                    w,
                    "{}\t{}\t{}",
                    entry.key,
                    entry.handle.as_deref().unwrap_or("-"),
                    entry.post_count
                )?;
            }
            Ok(())
        },
        |entries, w| {
            if entries.is_empty() {
                return writeln!(w, "No users stored yet.");
            }
            writeln!(w, "{:<32} {:<24} {:>6}", "KEY", "HANDLE", "POSTS")?;
            pretty_rule(w)?;
            for entry in entries {
                writeln!(
                    w,
                    "{:<32} {:<24} {:>6}",
                    entry.key.to_string(),
                    entry.handle.as_deref().unwrap_or("-"),
                    entry.post_count
                )?;
            }
            Ok(())
        },
    )
}
