//! Identity resolution across alias buckets.
//!
//! The collector records a creator under whatever key it knew at capture
//! time, so one real account can own an `id:` bucket and one or more `h:`
//! buckets at once. Two buckets are aliases when they share a non-empty
//! numeric id or a case-insensitively equal handle. Alias groups are closed
//! transitively: if `id:1` shares a handle with `h:alice` and `h:alice`
//! shares an id with `id:1`, every bucket reachable that way is one group.
//!
//! Cameo buckets, `unknown`, and the virtual top-today key never alias.

use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::TopTodayConfig;
use crate::merge::Merge;
use crate::model::snapshot::normalize_timestamp;
use crate::model::{IdentityKey, MetricsTable, Post, User};

// ---------------------------------------------------------------------------
// UserIdentity
// ---------------------------------------------------------------------------

/// The identifying facts of a bucket: its numeric id and handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: Option<String>,
    /// Lower-cased handle.
    pub handle: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn fold_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

impl UserIdentity {
    /// Identity of a bucket. Facts carried by the key win over the record.
    #[must_use]
    pub fn of(key: &IdentityKey, user: Option<&User>) -> Self {
        let id = non_empty(key.id())
            .or_else(|| non_empty(user.and_then(|u| u.id.as_deref())))
            .map(ToOwned::to_owned);
        let handle = non_empty(key.handle())
            .or_else(|| non_empty(user.and_then(|u| u.handle.as_deref())))
            .map(fold_handle)
            .filter(|h| !h.is_empty());
        Self { id, handle }
    }

    /// Identity claimed by a post's owner fields.
    #[must_use]
    pub fn of_owner(post: &Post) -> Self {
        let mut identity = Self {
            id: non_empty(post.owner_id.as_deref()).map(ToOwned::to_owned),
            handle: non_empty(post.owner_handle.as_deref())
                .map(fold_handle)
                .filter(|h| !h.is_empty()),
        };
        if let Some(owner_key) = &post.owner_key {
            if identity.id.is_none() {
                identity.id = owner_key.id().map(ToOwned::to_owned);
            }
            if identity.handle.is_none() {
                identity.handle = owner_key.handle().map(fold_handle);
            }
        }
        identity
    }

    /// `true` when neither an id nor a handle is known.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.id.is_none() && self.handle.is_none()
    }

    /// `true` when both sides name the same account by id or by handle.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        let same_id = matches!((&self.id, &other.id), (Some(a), Some(b)) if a == b);
        let same_handle = matches!((&self.handle, &other.handle), (Some(a), Some(b)) if a == b);
        same_id || same_handle
    }

    /// `true` when the two identities name *different* accounts: some fact
    /// is present on both sides and none agree.
    #[must_use]
    pub fn contradicts(&self, other: &Self) -> bool {
        let comparable = (self.id.is_some() && other.id.is_some())
            || (self.handle.is_some() && other.handle.is_some());
        comparable && !self.matches(other)
    }

    /// Canonical key for this identity: id first, then handle.
    #[must_use]
    pub fn preferred_key(&self) -> Option<IdentityKey> {
        self.id
            .as_deref()
            .and_then(IdentityKey::for_id)
            .or_else(|| self.handle.as_deref().and_then(IdentityKey::for_handle))
    }
}

// ---------------------------------------------------------------------------
// Alias search
// ---------------------------------------------------------------------------

/// Keys of every other bucket referring to the same creator as `key`.
///
/// `user` is the record for `key` if the caller already has it (it may
/// differ from the table entry, e.g. for an unsaved bucket).
#[must_use]
pub fn find_alias_keys(
    table: &MetricsTable,
    key: &IdentityKey,
    user: Option<&User>,
) -> Vec<IdentityKey> {
    if !key.is_aliasable() {
        return Vec::new();
    }

    let user = user.or_else(|| table.get(key));
    let mut group = vec![UserIdentity::of(key, user)];
    if group[0].is_empty() {
        return Vec::new();
    }

    let mut found: BTreeSet<IdentityKey> = BTreeSet::new();
    loop {
        let mut grew = false;
        for (candidate, record) in &table.users {
            if candidate == key || !candidate.is_aliasable() || found.contains(candidate) {
                continue;
            }
            let identity = UserIdentity::of(candidate, Some(record));
            if group.iter().any(|member| member.matches(&identity)) {
                found.insert(candidate.clone());
                group.push(identity);
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    found.into_iter().collect()
}

/// `true` if `a` and `b` select the same creator.
#[must_use]
pub fn are_equivalent_user_keys(table: &MetricsTable, a: &IdentityKey, b: &IdentityKey) -> bool {
    if a == b {
        return true;
    }
    if !a.is_aliasable() || !b.is_aliasable() {
        return false;
    }
    let direct = UserIdentity::of(a, table.get(a)).matches(&UserIdentity::of(b, table.get(b)));
    direct || find_alias_keys(table, a, None).contains(b)
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// A resolved bucket: the key actually used and its (possibly synthetic) user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser<'a> {
    pub key: IdentityKey,
    pub user: Cow<'a, User>,
}

/// Resolve `key` to the bucket a viewer should see.
///
/// A direct bucket without posts defers to the alias with the most posts;
/// this covers data recorded before the id/handle link was known. The
/// virtual top-today key is computed from every real bucket.
#[must_use]
pub fn resolve_user_for_key<'a>(
    table: &'a MetricsTable,
    key: &IdentityKey,
    now_ms: i64,
    top_today: &TopTodayConfig,
) -> Option<ResolvedUser<'a>> {
    if key.is_virtual() {
        return Some(ResolvedUser {
            key: key.clone(),
            user: Cow::Owned(build_top_today_user(table, now_ms, top_today)),
        });
    }

    let direct = table.get(key);
    if direct.is_none_or(|user| user.posts.is_empty()) {
        let best_alias = find_alias_keys(table, key, direct)
            .into_iter()
            .filter_map(|alias| table.get(&alias).map(|user| (alias, user)))
            .filter(|(_, user)| !user.posts.is_empty())
            .max_by(|(ka, a), (kb, b)| a.posts.len().cmp(&b.posts.len()).then(kb.cmp(ka)));
        if let Some((alias, user)) = best_alias {
            return Some(ResolvedUser {
                key: alias,
                user: Cow::Borrowed(user),
            });
        }
    }

    direct.map(|user| ResolvedUser {
        key: key.clone(),
        user: Cow::Borrowed(user),
    })
}

/// Build the ephemeral top-today user.
///
/// Includes every post from a real bucket published within the window
/// ending at `now_ms` whose latest snapshot meets both engagement
/// thresholds. A post found in several buckets is merged.
#[must_use]
pub fn build_top_today_user(table: &MetricsTable, now_ms: i64, config: &TopTodayConfig) -> User {
    let window_start = now_ms.saturating_sub(config.window_ms());
    let mut synthetic = User::default();

    for (key, user) in &table.users {
        if key.is_virtual() {
            continue;
        }
        for (post_id, post) in &user.posts {
            let Some(posted_at) = post.post_time.and_then(normalize_timestamp) else {
                continue;
            };
            if posted_at < window_start || posted_at > now_ms {
                continue;
            }
            let Some(latest) = post.latest_snapshot() else {
                continue;
            };
            let engaged = latest.uv.is_some_and(|uv| uv >= config.min_unique_views)
                && latest.likes.is_some_and(|likes| likes >= config.min_likes);
            if !engaged {
                continue;
            }
            let mut candidate = post.clone();
            if candidate.owner_key.is_none() {
                candidate.owner_key = Some(key.clone());
            }
            match synthetic.posts.get_mut(post_id) {
                Some(existing) => existing.merge(candidate),
                None => {
                    synthetic.posts.insert(post_id.clone(), candidate);
                }
            }
        }
    }
    synthetic
}

/// Logical view of a creator across all alias buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedUser {
    pub key: IdentityKey,
    pub alias_keys: Vec<IdentityKey>,
    pub user: User,
}

/// Union `key`'s bucket with every alias bucket.
///
/// Shared post ids are merged snapshot-wise; follower and cameo series are
/// unioned by timestamp. Virtual keys are returned unchanged.
#[must_use]
pub fn build_merged_identity_user(
    table: &MetricsTable,
    key: &IdentityKey,
    user: Option<&User>,
) -> MergedUser {
    let base = user.or_else(|| table.get(key)).cloned().unwrap_or_default();
    if key.is_virtual() {
        return MergedUser {
            key: key.clone(),
            alias_keys: Vec::new(),
            user: base,
        };
    }

    let alias_keys = find_alias_keys(table, key, Some(&base));
    let mut merged = base;
    for alias in &alias_keys {
        if let Some(record) = table.get(alias) {
            merged.merge(record.clone());
        }
    }
    MergedUser {
        key: key.clone(),
        alias_keys,
        user: merged,
    }
}

// ---------------------------------------------------------------------------
// Selection restore
// ---------------------------------------------------------------------------

/// `true` if `key` can be shown: the virtual key always, a real key when it
/// or one of its aliases has posts.
#[must_use]
pub fn is_selectable_user_key(table: &MetricsTable, key: &IdentityKey) -> bool {
    if key.is_virtual() {
        return true;
    }
    if table.get(key).is_some_and(|user| !user.posts.is_empty()) {
        return true;
    }
    find_alias_keys(table, key, None)
        .iter()
        .any(|alias| table.get(alias).is_some_and(|user| !user.posts.is_empty()))
}

/// Outcome of restoring a previously selected identity after a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionRestore {
    /// Select this key.
    Select(IdentityKey),
    /// The key is not present yet but data is still loading; try again later.
    Defer,
    /// Nothing to restore; fall back to the default view.
    Fallback,
}

/// Decide how to restore `previous`.
///
/// An equivalent alias key with posts is accepted in place of the stored
/// key. While `hydration_pending` is set, a missing key defers instead of
/// falling back, so the selection is not lost to a partial load.
#[must_use]
pub fn restore_selection(
    table: &MetricsTable,
    previous: Option<&IdentityKey>,
    hydration_pending: bool,
) -> SelectionRestore {
    let Some(previous) = previous else {
        return SelectionRestore::Fallback;
    };
    if is_selectable_user_key(table, previous) {
        return SelectionRestore::Select(previous.clone());
    }
    let equivalent = table
        .users
        .iter()
        .filter(|(_, user)| !user.posts.is_empty())
        .map(|(key, _)| key)
        .find(|key| are_equivalent_user_keys(table, previous, key));
    if let Some(key) = equivalent {
        return SelectionRestore::Select(key.clone());
    }
    if hydration_pending {
        SelectionRestore::Defer
    } else {
        SelectionRestore::Fallback
    }
}
