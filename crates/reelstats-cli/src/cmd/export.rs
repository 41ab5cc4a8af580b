use crate::cmd::{Access, Session, fail};
use crate::output::{CliError, OutputMode, pretty_kv, pretty_section, render, render_error};
use anyhow::{Context, Result};
use clap::Args;
use reelstats_core::export::{ExportBundle, ImportReport};
use reelstats_core::now_ms;
use serde::Serialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Destination file (`-` for stdout).
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Bundle written by `reelstats export` (`-` for stdin).
    pub input: PathBuf,
}

#[derive(Debug, Serialize)]
struct ExportSummary {
    path: String,
    users: usize,
    posts: usize,
    snapshots: usize,
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

pub fn run_export(args: &ExportArgs, output: OutputMode, data_dir: &Path) -> Result<()> {
    let mut session = Session::open(data_dir, Access::Read, output)?;
    let bundle = session
        .store
        .export(now_ms())
        .map_err(|err| fail(output, err))?;

    if is_stdio(&args.output) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, &bundle)?;
        writeln!(out)?;
        return Ok(());
    }

    let text = serde_json::to_string_pretty(&bundle)?;
    fs::write(&args.output, text)
        .with_context(|| format!("write {}", args.output.display()))?;

    let summary = ExportSummary {
        path: args.output.display().to_string(),
        users: bundle.users.len(),
        posts: bundle.users.values().map(|user| user.posts.len()).sum(),
        snapshots: bundle
            .users
            .values()
            .flat_map(|user| user.posts.values())
            .map(|post| post.snapshots.len())
            .sum(),
    };
    info!(users = summary.users, path = %summary.path, "exported");

    render(output, &summary, |s, w| {
        pretty_section(w, "Export")?;
        pretty_kv(w, "File", &s.path)?;
        pretty_kv(w, "Users", s.users.to_string())?;
        pretty_kv(w, "Posts", s.posts.to_string())?;
        pretty_kv(w, "Snapshots", s.snapshots.to_string())
    })
}

fn read_bundle(path: &Path, output: OutputMode) -> Result<ExportBundle> {
    let text = if is_stdio(path) {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        text
    } else {
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
    };

    match serde_json::from_str(&text) {
        Ok(bundle) => Ok(bundle),
        Err(err) => {
            render_error(
                output,
                &CliError::with_details(
                    format!("{} is not an export bundle: {err}", path.display()),
                    "Pass a file produced by `reelstats export`.",
                    "E3001",
                ),
            )?;
            Err(err).context("parse export bundle")
        }
    }
}

pub fn run_import(args: &ImportArgs, output: OutputMode, data_dir: &Path) -> Result<()> {
    let bundle = read_bundle(&args.input, output)?;
    let mut session = Session::open(data_dir, Access::Write, output)?;
    let report: ImportReport = session
        .store
        .import(bundle, now_ms())
        .map_err(|err| fail(output, err))?;

    render(output, &report, |r, w| {
        pretty_section(w, "Import")?;
        pretty_kv(w, "Users", r.users.to_string())?;
        pretty_kv(w, "Posts", r.posts.to_string())?;
        if !r.skipped.is_empty() {
            let skipped: Vec<String> = r.skipped.iter().map(ToString::to_string).collect();
            pretty_kv(w, "Skipped", skipped.join(", "))?;
        }
        Ok(())
    })
}
