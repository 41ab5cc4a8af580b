use crate::cmd::{Access, Session, fail};
use crate::output::{OutputMode, pretty_kv, pretty_rule, pretty_section, render};
use anyhow::Result;
use clap::Args;
use reelstats_core::model::{IdentityKey, Snapshot, User};
use reelstats_core::{StoreError, now_ms};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Identity key (`id:<n>`, `h:<handle>`, `c:<name>`, `unknown`, `__top_today__`).
    pub key: IdentityKey,

    /// Load full cold history and merge every alias bucket.
    #[arg(long)]
    pub full: bool,
}

#[derive(Debug, Serialize)]
pub struct PostSummary {
    pub post_id: String,
    pub snapshots: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<Snapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ShowOutput {
    pub requested: IdentityKey,
    pub key: IdentityKey,
    pub alias_keys: Vec<IdentityKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers: Option<u64>,
    pub posts: Vec<PostSummary>,
    /// Complete merged history, only with `--full`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<User>,
}

impl ShowOutput {
    fn new(
        requested: IdentityKey,
        key: IdentityKey,
        alias_keys: Vec<IdentityKey>,
        user: &User,
    ) -> Self {
        let mut posts: Vec<PostSummary> = user
            .posts
            .iter()
            .map(|(post_id, post)| PostSummary {
                post_id: post_id.clone(),
                snapshots: post.snapshots.len(),
                latest: post.latest_snapshot().copied(),
                caption: post.caption.clone(),
            })
            .collect();
        posts.sort_by(|a, b| {
            let at = |p: &PostSummary| p.latest.as_ref().map_or(i64::MIN, |s| s.t);
            at(b).cmp(&at(a)).then_with(|| a.post_id.cmp(&b.post_id))
        });

        Self {
            requested,
            key,
            alias_keys,
            handle: user.handle.clone(),
            id: user.id.clone(),
            followers: user.followers.last().map(|point| point.count),
            posts,
            history: None,
        }
    }
}

fn describe(snapshot: &Snapshot) -> String {
    let mut parts = Vec::new();
    for (label, value) in [
        ("views", snapshot.views),
        ("uv", snapshot.uv),
        ("likes", snapshot.likes),
        ("comments", snapshot.comments),
        ("remixes", snapshot.remix_count),
    ] {
        if let Some(value) = value {
            parts.push(format!("{label}={value}"));
        }
    }
    if parts.is_empty() {
        "no metrics".to_string()
    } else {
        parts.join(" ")
    }
}

pub fn run_show(args: &ShowArgs, output: OutputMode, data_dir: &Path) -> Result<()> {
    let mut session = Session::open(data_dir, Access::Read, output)?;
    let now = now_ms();

    let view = if args.full {
        let merged = session
            .store
            .merged_user(&args.key, now)
            .map_err(|err| fail(output, err))?;
        if !args.key.is_virtual() && merged.user.is_empty() && merged.alias_keys.is_empty() {
            return Err(fail(output, StoreError::UserNotFound(args.key.clone())));
        }
        let mut view =
            ShowOutput::new(args.key.clone(), merged.key, merged.alias_keys, &merged.user);
        view.history = Some(merged.user);
        view
    } else {
        let Some(resolved) = session.store.resolve(&args.key, now) else {
            return Err(fail(output, StoreError::UserNotFound(args.key.clone())));
        };
        ShowOutput::new(args.key.clone(), resolved.key, Vec::new(), &resolved.user)
    };

    render(output, &view, |v, w| {
        pretty_section(w, &v.key.to_string())?;
        if v.key != v.requested {
            pretty_kv(w, "Requested", v.requested.to_string())?;
        }
        if !v.alias_keys.is_empty() {
            let aliases: Vec<String> = v.alias_keys.iter().map(ToString::to_string).collect();
            pretty_kv(w, "Aliases", aliases.join(", "))?;
        }
        pretty_kv(w, "Handle", v.handle.as_deref().unwrap_or("-"))?;
        pretty_kv(w, "Id", v.id.as_deref().unwrap_or("-"))?;
        pretty_kv(
            w,
            "Followers",
            v.followers.map_or_else(|| "-".to_string(), |n| n.to_string()),
        )?;
        pretty_kv(w, "Posts", v.posts.len().to_string())?;
        if v.posts.is_empty() {
            return Ok(());
        }
        pretty_rule(w)?;
        for post in &v.posts {
            let latest = post.latest.as_ref().map_or_else(|| "-".to_string(), describe);
            writeln!(w, "{:<24} {:>5} snap  {latest}", post.post_id, post.snapshots)?;
        }
        Ok(())
    })
}
