//! Boot-time and on-demand hydration.
//!
//! Every target follows the same path: check freshness, fetch from the remote,
//! write the query cache, then persist a snapshot stamped with the same
//! timestamp so both tiers agree on recency. Failures end the job; nothing is
//! retried here.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use snapcache_core::model::{
    Conversation, ConversationPreviewEntry, ConversationsPage, DirectoryPage, Profile, ProfileData, SavedProfile,
};
use snapcache_core::profile::is_placeholder_id;
use snapcache_core::{
    PutOptions, PutOutcome, ProfileCache, ProfileWrite, SnapshotKind, SnapshotStore, SweepReport,
    WriteThroughOutcome, now_ms,
};

use crate::config::HydratorConfig;
use crate::gate::InteractionGate;
use crate::guard::MutationGuard;
use crate::query::{InfinitePages, QueryClient, query_keys};
use crate::queue::{Enqueued, HydrationJob, IdleQueue, JobQueue};
use crate::realtime::{EventHandler, Realtime, RealtimeEvent, Subscription, SubscriptionPattern};
use crate::remote::Remote;
use crate::HydrateError;

pub const BOOT_PRIORITY: i32 = 10;
pub const LIST_PRIORITY: i32 = 5;

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
}

impl Identity {
    pub fn new(user_id: &str, user_name: &str) -> Self {
        Self { user_id: user_id.to_string(), user_name: user_name.to_string() }
    }

    fn is_usable(&self) -> bool {
        !is_placeholder_id(&self.user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    MissingIdentity,
    MutationInFlight,
}

/// Terminal state of one hydration target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum HydrationOutcome {
    /// Cached data is within its staleness threshold; nothing fetched.
    Fresh,
    Skipped { reason: SkipReason },
    /// Fetched and written to every tier at `updated_at`.
    Persisted { updated_at: i64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewReport {
    /// Previews hydrated before returning.
    pub inline: usize,
    /// Previews handed to the idle queue.
    pub queued: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub sweep: SweepReport,
    /// Snapshot families applied to the query cache.
    pub applied: Vec<&'static str>,
}

/// Everything the scheduler talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub remote: Arc<dyn Remote>,
    pub queries: Arc<dyn QueryClient>,
    pub snapshots: Arc<SnapshotStore>,
    pub profiles: Arc<ProfileCache>,
    pub jobs: Arc<dyn JobQueue>,
    pub idle: Arc<dyn IdleQueue>,
    pub gate: Arc<dyn InteractionGate>,
    pub realtime: Arc<dyn Realtime>,
    pub guard: MutationGuard,
}

/// Who is signed in and what they are subscribed to.
#[derive(Default)]
struct Session {
    identity: Option<Identity>,
    subscriptions: Vec<Box<dyn Subscription>>,
}

struct Inner {
    config: HydratorConfig,
    deps: Collaborators,
    session: Mutex<Session>,
}

/// Hydration scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Hydrator {
    inner: Arc<Inner>,
}

fn is_recent(updated_at: i64, threshold: Duration) -> bool {
    let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
    updated_at > 0 && now_ms() - updated_at < threshold_ms
}

impl Hydrator {
    pub fn new(config: HydratorConfig, deps: Collaborators) -> Self {
        Self { inner: Arc::new(Inner { config, deps, session: Mutex::new(Session::default()) }) }
    }

    pub fn config(&self) -> &HydratorConfig {
        &self.inner.config
    }

    fn deps(&self) -> &Collaborators {
        &self.inner.deps
    }

    /// Whether `key` holds data written less than `threshold` ago and not
    /// invalidated since.
    pub async fn is_query_fresh(&self, key: &[String], threshold: Duration) -> bool {
        match self.deps().queries.get_query_state(key).await {
            Some(state) => !state.is_invalidated && is_recent(state.data_updated_at, threshold),
            None => false,
        }
    }

    pub async fn hydrate_directory_first_page(&self, community: &str) -> Result<HydrationOutcome, HydrateError> {
        let key = query_keys::directory_all();
        if self.is_query_fresh(&key, self.inner.config.boot_stale).await {
            tracing::debug!(community, "directory fresh, skipping hydration");
            return Ok(HydrationOutcome::Fresh);
        }

        let page = self.deps().remote.directory_page(community, 1).await?;
        let updated_at = now_ms();
        self.deps()
            .queries
            .set_query_data(&key, serde_json::to_value(InfinitePages::first(&page))?, updated_at)
            .await;
        self.persist(SnapshotKind::DirectoryFirstPage(community.to_string()), &page, updated_at)
            .await?;
        Ok(HydrationOutcome::Persisted { updated_at })
    }

    /// Hydrate the signed-in user's own profile through the profile cache.
    ///
    /// The profile record alone is also kept as a header snapshot. Skipped while a profile edit is in flight, including one that starts
    /// while the fetch is outstanding.
    pub async fn hydrate_profile_self(&self, identity: &Identity) -> Result<HydrationOutcome, HydrateError> {
        if !identity.is_usable() || identity.user_name.is_empty() {
            return Ok(HydrationOutcome::Skipped { reason: SkipReason::MissingIdentity });
        }
        if self.deps().guard.is_in_flight() {
            tracing::debug!(user_id = identity.user_id, "profile edit in flight, skipping hydration");
            return Ok(HydrationOutcome::Skipped { reason: SkipReason::MutationInFlight });
        }

        let key = query_keys::profile_detail(&identity.user_name);
        let threshold = self.inner.config.boot_stale;
        let cached_recently = self
            .deps()
            .profiles
            .last_snapshot_time(&identity.user_id)
            .await
            .is_some_and(|written| is_recent(written, threshold));
        if cached_recently || self.is_query_fresh(&key, threshold).await {
            tracing::debug!(user_name = identity.user_name, "profile fresh, skipping hydration");
            return Ok(HydrationOutcome::Fresh);
        }

        let data = self
            .deps()
            .remote
            .profile_bundle(&identity.user_id, &identity.user_name)
            .await?;
        if self.deps().guard.is_in_flight() {
            tracing::debug!(user_id = identity.user_id, "profile edit started during fetch, discarding");
            return Ok(HydrationOutcome::Skipped { reason: SkipReason::MutationInFlight });
        }

        let updated_at = now_ms();
        self.deps().queries.set_query_data(&key, serde_json::to_value(&data)?, updated_at).await;
        let header = data.profile.clone();
        let write = ProfileWrite {
            id: identity.user_id.clone(),
            handle: Some(identity.user_name.clone()),
            data,
            updated_at: Some(updated_at),
        };
        match self.deps().profiles.write_through(write).await {
            WriteThroughOutcome::Accepted { report, .. } => {
                if report.snapshot.is_none() && !report.superseded {
                    tracing::warn!(user_id = identity.user_id, "profile snapshot not persisted");
                }
                self.deps()
                    .queries
                    .set_query_data(
                        &query_keys::profile_header(&identity.user_name),
                        serde_json::to_value(&header)?,
                        updated_at,
                    )
                    .await;
                self.persist(SnapshotKind::ProfileHeader(identity.user_id.clone()), &header, updated_at)
                    .await?;
                Ok(HydrationOutcome::Persisted { updated_at })
            }
            WriteThroughOutcome::SkippedStale { current, .. } => {
                tracing::debug!(user_id = identity.user_id, current, "newer profile already cached");
                Ok(HydrationOutcome::Fresh)
            }
            WriteThroughOutcome::Rejected { reason } => {
                tracing::warn!(user_id = identity.user_id, ?reason, "profile write rejected");
                Ok(HydrationOutcome::Skipped { reason: SkipReason::MissingIdentity })
            }
        }
    }

    pub async fn hydrate_want_to_meet(&self, user_id: &str) -> Result<HydrationOutcome, HydrateError> {
        if is_placeholder_id(user_id) {
            return Ok(HydrationOutcome::Skipped { reason: SkipReason::MissingIdentity });
        }
        let key = query_keys::want_to_meet_list(user_id);
        if self.is_query_fresh(&key, self.inner.config.list_stale).await {
            return Ok(HydrationOutcome::Fresh);
        }

        let saved: Vec<SavedProfile> = self.deps().remote.want_to_meet(user_id).await?;
        let updated_at = now_ms();
        self.deps().queries.set_query_data(&key, serde_json::to_value(&saved)?, updated_at).await;
        self.persist(SnapshotKind::WantToMeetList(user_id.to_string()), &saved, updated_at)
            .await?;
        Ok(HydrationOutcome::Persisted { updated_at })
    }

    pub async fn hydrate_messages_first_page(&self, user_id: &str) -> Result<HydrationOutcome, HydrateError> {
        if is_placeholder_id(user_id) {
            return Ok(HydrationOutcome::Skipped { reason: SkipReason::MissingIdentity });
        }
        let key = query_keys::conversations(user_id);
        if self.is_query_fresh(&key, self.inner.config.list_stale).await {
            return Ok(HydrationOutcome::Fresh);
        }

        let page = self.deps().remote.conversations_page(user_id, 1).await?;
        let updated_at = now_ms();
        self.deps()
            .queries
            .set_query_data(&key, serde_json::to_value(InfinitePages::first(&page))?, updated_at)
            .await;
        self.persist(SnapshotKind::MessagesThreadsFirstPage(user_id.to_string()), &page, updated_at)
            .await?;
        Ok(HydrationOutcome::Persisted { updated_at })
    }

    /// Fill in missing conversation previews for the cached conversation list.
    ///
    /// The first `inline_preview_count` pending previews are hydrated before
    /// returning; the rest go to the idle queue, one task per conversation.
    pub async fn hydrate_conversation_previews(&self, user_id: &str) -> Result<PreviewReport, HydrateError> {
        let key = query_keys::conversations(user_id);
        let Some(raw) = self.deps().queries.get_query_data(&key).await else {
            return Ok(PreviewReport::default());
        };
        let pages: InfinitePages<ConversationsPage> = serde_json::from_value(raw)?;

        let mut seen = HashSet::new();
        let mut pending: Vec<ConversationPreviewEntry> = pages
            .pages
            .into_iter()
            .flat_map(|page| page.entries)
            .filter(|entry| !entry.conversation.id.is_empty() && seen.insert(entry.conversation.id.clone()))
            .filter(|entry| entry.latest_message.is_none())
            .collect();

        let config = &self.inner.config;
        let queued = pending.split_off(pending.len().min(config.inline_preview_count));
        let mut report = PreviewReport::default();

        for (index, entry) in pending.iter().enumerate() {
            if index > 0 && index % config.preview_batch_size == 0 {
                tokio::time::sleep(config.preview_pause).await;
            }
            if self.hydrate_preview(user_id, &entry.conversation).await {
                report.inline += 1;
            } else {
                report.failed += 1;
            }
        }

        for entry in queued {
            let label = format!("messaging:hydrate:{}", entry.conversation.id);
            let this = self.clone();
            let user_id = user_id.to_string();
            let task = async move {
                this.hydrate_preview(&user_id, &entry.conversation).await;
            }
            .boxed();
            if self.deps().idle.enqueue_idle(label, task).await == Enqueued::Scheduled {
                report.queued += 1;
            }
        }

        tracing::debug!(user_id, inline = report.inline, queued = report.queued, "conversation previews scheduled");
        Ok(report)
    }

    /// Wait for the interaction gate, then queue the boot hydration targets.
    pub async fn preload_initial(&self, identity: Option<&Identity>) -> Vec<(String, Enqueued)> {
        self.deps().gate.wait().await;

        let community = self.inner.config.default_community.clone();
        let this = self.clone();
        let directory = SnapshotKind::DirectoryFirstPage(community.clone());
        let mut submitted = vec![
            self.submit(directory.logical_key(), "hydrate:directory:firstPage", BOOT_PRIORITY, async move {
                this.hydrate_directory_first_page(&community).await
            })
            .await,
        ];

        let Some(identity) = identity.filter(|identity| identity.is_usable() && !identity.user_name.is_empty())
        else {
            return submitted;
        };
        let user_id = identity.user_id.clone();

        let this = self.clone();
        let own = identity.clone();
        submitted.push(
            self.submit(
                SnapshotKind::Profile(user_id.clone()).logical_key(),
                "hydrate:profile:self",
                BOOT_PRIORITY,
                async move { this.hydrate_profile_self(&own).await },
            )
            .await,
        );

        let this = self.clone();
        let uid = user_id.clone();
        submitted.push(
            self.submit(
                SnapshotKind::WantToMeetList(user_id.clone()).logical_key(),
                "hydrate:wantToMeet",
                LIST_PRIORITY,
                async move { this.hydrate_want_to_meet(&uid).await },
            )
            .await,
        );

        let this = self.clone();
        let uid = user_id.clone();
        submitted.push(
            self.submit(
                SnapshotKind::MessagesThreadsFirstPage(user_id).logical_key(),
                "hydrate:messages:firstPage",
                LIST_PRIORITY,
                async move {
                    let outcome = this.hydrate_messages_first_page(&uid).await?;
                    if matches!(outcome, HydrationOutcome::Persisted { .. }) {
                        this.hydrate_conversation_previews(&uid).await?;
                    }
                    Ok(outcome)
                },
            )
            .await,
        );

        tracing::info!(jobs = submitted.len(), "boot hydration queued");
        submitted
    }

    /// Apply persisted snapshots to the query cache before any fetch runs.
    ///
    /// Runs the one-time snapshot migration first. Each applied query is
    /// stamped with its snapshot's timestamp, so freshness checks see the
    /// snapshot's real age.
    pub async fn seed_boot_snapshots(
        &self, identity: Option<&Identity>, community: Option<&str>,
    ) -> Result<SeedReport, HydrateError> {
        let deps = self.deps();
        let sweep = deps.snapshots.migrate().await?;

        let community = community
            .filter(|community| !community.is_empty())
            .unwrap_or(&self.inner.config.default_community);
        let directory = SnapshotKind::DirectoryFirstPage(community.to_string());
        let mut kinds = vec![directory.clone()];
        let user = identity.filter(|identity| identity.is_usable());
        if let Some(user) = user {
            kinds.push(SnapshotKind::WantToMeetList(user.user_id.clone()));
            kinds.push(SnapshotKind::MessagesThreadsFirstPage(user.user_id.clone()));
            kinds.push(SnapshotKind::Profile(user.user_id.clone()));
            kinds.push(SnapshotKind::ProfileHeader(user.user_id.clone()));
        }

        let mut found = deps.snapshots.get_many(&kinds).await?;
        let mut applied = Vec::new();

        if let Some(envelope) = found.remove(&directory).and_then(|envelope| envelope.decode::<DirectoryPage>()) {
            let data = serde_json::to_value(InfinitePages::first(&envelope.data))?;
            deps.queries
                .set_query_data(&query_keys::directory_all(), data, envelope.timestamp)
                .await;
            applied.push(directory.family());
        }

        let Some(user) = user else {
            return Ok(SeedReport { sweep, applied });
        };
        let uid = &user.user_id;

        let profile = SnapshotKind::Profile(uid.clone());
        if !user.user_name.is_empty()
            && let Some(envelope) = found.remove(&profile).and_then(|envelope| envelope.decode::<ProfileData>())
        {
            if deps.guard.is_in_flight() {
                tracing::debug!(user_id = uid, "profile edit in flight, not seeding profile snapshot");
            } else {
                let key = query_keys::profile_detail(&user.user_name);
                deps.queries
                    .set_query_data(&key, serde_json::to_value(&envelope.data)?, envelope.timestamp)
                    .await;
                let newer_cached = deps
                    .profiles
                    .last_snapshot_time(uid)
                    .await
                    .is_some_and(|current| current > envelope.timestamp);
                if !newer_cached {
                    deps.profiles
                        .upsert(uid, Some(user.user_name.as_str()), envelope.data, Some(envelope.timestamp))
                        .await;
                }
                applied.push(profile.family());
            }
        }

        let header = SnapshotKind::ProfileHeader(uid.clone());
        if !user.user_name.is_empty()
            && !deps.guard.is_in_flight()
            && let Some(envelope) = found.remove(&header).and_then(|envelope| envelope.decode::<Profile>())
        {
            deps.queries
                .set_query_data(
                    &query_keys::profile_header(&user.user_name),
                    serde_json::to_value(&envelope.data)?,
                    envelope.timestamp,
                )
                .await;
            applied.push(header.family());
        }

        let want = SnapshotKind::WantToMeetList(uid.clone());
        if let Some(envelope) = found.remove(&want).and_then(|envelope| envelope.decode::<Vec<SavedProfile>>()) {
            deps.queries
                .set_query_data(
                    &query_keys::want_to_meet_list(uid),
                    serde_json::to_value(&envelope.data)?,
                    envelope.timestamp,
                )
                .await;
            applied.push(want.family());
        }

        let messages = SnapshotKind::MessagesThreadsFirstPage(uid.clone());
        if let Some(envelope) = found
            .remove(&messages)
            .and_then(|envelope| envelope.decode::<ConversationsPage>())
        {
            deps.queries
                .set_query_data(
                    &query_keys::conversations(uid),
                    serde_json::to_value(InfinitePages::first(&envelope.data))?,
                    envelope.timestamp,
                )
                .await;
            applied.push(messages.family());
        }

        tracing::info!(applied = ?applied, evicted = sweep.evicted, "boot snapshots seeded");
        Ok(SeedReport { sweep, applied })
    }

    /// Rebuild realtime subscriptions for a new identity.
    ///
    /// Existing subscriptions are torn down first; unsubscribe failures are
    /// logged and ignored. Signing out drops identity-scoped queries, signing
    /// in marks them stale. When the user changes, the previous user's cached
    /// profile is forgotten.
    pub async fn on_identity_change(&self, identity: Option<Identity>) -> Result<(), HydrateError> {
        let deps = self.deps();
        deps.gate.wait().await;

        let mut session = self.inner.session.lock().await;
        for subscription in std::mem::take(&mut session.subscriptions) {
            if let Err(e) = subscription.unsubscribe().await {
                tracing::warn!(error = %e, "realtime unsubscribe failed");
            }
        }

        let identity = identity.filter(Identity::is_usable);
        let previous = std::mem::replace(&mut session.identity, identity.clone());
        if let Some(previous) = previous.filter(|previous| {
            identity.as_ref().is_none_or(|next| next.user_id != previous.user_id)
        }) {
            self.forget_user(&previous).await;
        }

        let Some(identity) = identity else {
            deps.queries.remove_queries(&query_keys::want_to_meet_all()).await;
            deps.queries.remove_queries(&query_keys::messaging_root()).await;
            tracing::info!("signed out, identity-scoped queries removed");
            return Ok(());
        };

        let uid = identity.user_id.as_str();
        deps.queries.invalidate_queries(&query_keys::want_to_meet_list(uid)).await;
        deps.queries.invalidate_queries(&query_keys::conversations(uid)).await;

        let routes = [
            (SubscriptionPattern::new("saves", "saved_by", uid), query_keys::want_to_meet_list(uid)),
            (SubscriptionPattern::new("memberships", "user", uid), query_keys::conversations(uid)),
        ];
        for (pattern, key) in routes {
            let subscription = deps.realtime.subscribe(pattern, self.invalidating_handler(key)).await?;
            session.subscriptions.push(subscription);
        }

        tracing::info!(user_id = uid, subscriptions = session.subscriptions.len(), "realtime subscriptions ready");
        Ok(())
    }

    async fn forget_user(&self, identity: &Identity) {
        let deps = self.deps();
        if !identity.user_name.is_empty() {
            deps.queries.remove_queries(&query_keys::profile_detail(&identity.user_name)).await;
            deps.queries.remove_queries(&query_keys::profile_header(&identity.user_name)).await;
        }
        if let Err(e) = deps.profiles.forget(&identity.user_id).await {
            tracing::warn!(user_id = identity.user_id, error = %e, "cached profile cleanup failed");
        }
    }

    fn invalidating_handler(&self, key: Vec<String>) -> EventHandler {
        let queries = self.deps().queries.clone();
        Arc::new(move |event: RealtimeEvent| {
            let queries = queries.clone();
            let key = key.clone();
            async move {
                tracing::debug!(topic = event.topic, action = ?event.action, ?key, "realtime event, invalidating");
                queries.invalidate_queries(&key).await;
            }
            .boxed()
        })
    }

    async fn submit<F>(&self, key: String, label: &str, priority: i32, run: F) -> (String, Enqueued)
    where
        F: Future<Output = Result<HydrationOutcome, HydrateError>> + Send + 'static,
    {
        let job_label = label.to_string();
        let job = HydrationJob {
            key: key.clone(),
            label: label.to_string(),
            priority,
            run: async move {
                let outcome = run.await?;
                tracing::debug!(label = job_label, ?outcome, "hydration finished");
                Ok(())
            }
            .boxed(),
        };
        let enqueued = self.deps().jobs.enqueue(job).await;
        (key, enqueued)
    }

    async fn persist<T: Serialize + Sync>(
        &self, kind: SnapshotKind, data: &T, updated_at: i64,
    ) -> Result<PutOutcome, HydrateError> {
        let snapshots = &self.deps().snapshots;
        let outcome = snapshots
            .put(&snapshots.descriptor(&kind), data, PutOptions::at(updated_at))
            .await?;
        if !outcome.is_persisted() {
            tracing::warn!(kind = kind.family(), id = kind.id(), ?outcome, "snapshot not persisted");
        }
        Ok(outcome)
    }

    /// Fetch one preview and splice it into the cached conversation list.
    async fn hydrate_preview(&self, user_id: &str, conversation: &Conversation) -> bool {
        let preview = match self.deps().remote.conversation_preview(conversation, user_id).await {
            Ok(preview) => preview,
            Err(e) => {
                tracing::warn!(conversation_id = conversation.id, error = %e, "preview hydrate failed");
                return false;
            }
        };

        let key = query_keys::conversations(user_id);
        self.deps()
            .queries
            .update_query_data(
                &key,
                Box::new(move |current: &Value| {
                    let mut pages: InfinitePages<ConversationsPage> = serde_json::from_value(current.clone()).ok()?;
                    let mut replaced = false;
                    for slot in pages
                        .pages
                        .iter_mut()
                        .flat_map(|page| page.entries.iter_mut())
                        .filter(|entry| entry.conversation.id == preview.conversation.id)
                    {
                        *slot = preview.clone();
                        replaced = true;
                    }
                    if replaced { serde_json::to_value(&pages).ok() } else { None }
                }),
            )
            .await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::ReadyGate;
    use crate::query::MemoryQueryClient;
    use crate::queue::PriorityJobQueue;
    use crate::realtime::{MemoryRealtime, RealtimeAction};
    use async_trait::async_trait;
    use futures_util::future::BoxFuture;
    use serde_json::{Value, json};
    use snapcache_core::model::{Item, Message, Profile};
    use snapcache_core::snapshot::{Envelope, SnapshotConfig};
    use snapcache_core::{AppConfig, KeyValueStore, MemoryStorage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeRemote {
        directory_calls: AtomicUsize,
        profile_calls: AtomicUsize,
        want_calls: AtomicUsize,
        conversation_calls: AtomicUsize,
        previews: Mutex<Vec<String>>,
        offline: AtomicBool,
    }

    impl FakeRemote {
        fn check(&self, counter: &AtomicUsize) -> Result<(), HydrateError> {
            counter.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(HydrateError::Remote("offline".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Remote for FakeRemote {
        async fn directory_page(&self, _community: &str, page: u32) -> Result<DirectoryPage, HydrateError> {
            self.check(&self.directory_calls)?;
            Ok(DirectoryPage {
                page,
                next_page: Some(page + 1),
                total_items: 40,
                profiles: vec![Profile { id: "p1".into(), user_name: "pia".into(), ..Default::default() }],
            })
        }

        async fn profile_bundle(&self, user_id: &str, user_name: &str) -> Result<ProfileData, HydrateError> {
            self.check(&self.profile_calls)?;
            Ok(ProfileData {
                profile: Profile { id: user_id.into(), user_name: user_name.into(), ..Default::default() },
                grid_items: vec![Item { id: "i1".into(), ref_id: "r1".into(), ..Default::default() }],
                backlog_items: Vec::new(),
            })
        }

        async fn want_to_meet(&self, user_id: &str) -> Result<Vec<SavedProfile>, HydrateError> {
            self.check(&self.want_calls)?;
            Ok(vec![SavedProfile {
                id: "s1".into(),
                user: Profile { id: format!("{user_id}-friend"), ..Default::default() },
                created: String::new(),
            }])
        }

        async fn conversations_page(&self, _user_id: &str, page: u32) -> Result<ConversationsPage, HydrateError> {
            self.check(&self.conversation_calls)?;
            Ok(ConversationsPage { entries: vec![entry("c1", false)], next_page: (page < 2).then_some(page + 1) })
        }

        async fn conversation_preview(
            &self, conversation: &Conversation, _user_id: &str,
        ) -> Result<ConversationPreviewEntry, HydrateError> {
            self.previews.lock().await.push(conversation.id.clone());
            Ok(ConversationPreviewEntry {
                conversation: conversation.clone(),
                latest_message: Some(Message {
                    id: format!("m-{}", conversation.id),
                    sender: "u2".into(),
                    text: "hi".into(),
                    created: String::new(),
                }),
                unread_count: 1,
            })
        }
    }

    /// Idle queue that holds tasks until the test runs them.
    #[derive(Default)]
    struct HeldIdleQueue {
        tasks: Mutex<Vec<(String, BoxFuture<'static, ()>)>>,
    }

    impl HeldIdleQueue {
        async fn labels(&self) -> Vec<String> {
            self.tasks.lock().await.iter().map(|(label, _)| label.clone()).collect()
        }

        async fn run_all(&self) {
            let tasks = std::mem::take(&mut *self.tasks.lock().await);
            for (_, task) in tasks {
                task.await;
            }
        }
    }

    #[async_trait]
    impl IdleQueue for HeldIdleQueue {
        async fn enqueue_idle(&self, label: String, task: BoxFuture<'static, ()>) -> Enqueued {
            let mut tasks = self.tasks.lock().await;
            if tasks.iter().any(|(queued, _)| *queued == label) {
                return Enqueued::Duplicate;
            }
            tasks.push((label, task));
            Enqueued::Scheduled
        }
    }

    struct Fixture {
        hydrator: Hydrator,
        remote: Arc<FakeRemote>,
        queries: Arc<MemoryQueryClient>,
        snapshots: Arc<SnapshotStore>,
        profiles: Arc<ProfileCache>,
        jobs: PriorityJobQueue,
        idle: Arc<HeldIdleQueue>,
        realtime: MemoryRealtime,
        guard: MutationGuard,
        storage: MemoryStorage,
    }

    fn fixture() -> Fixture {
        let hub = MemoryRealtime::new();
        fixture_with(Arc::new(hub.clone()), hub)
    }

    fn fixture_with(realtime: Arc<dyn Realtime>, hub: MemoryRealtime) -> Fixture {
        let storage = MemoryStorage::new();
        let shared: Arc<dyn KeyValueStore> = Arc::new(storage.clone());
        let snapshots = Arc::new(SnapshotStore::new(shared.clone(), SnapshotConfig::default()));
        let profiles = Arc::new(ProfileCache::with_storage(shared, snapshots.clone(), &AppConfig::default()));
        let gate: Arc<dyn InteractionGate> = Arc::new(ReadyGate::new(true));
        let config = HydratorConfig::default();
        let jobs = PriorityJobQueue::new(gate.clone(), config.job_queue_capacity);
        let remote = Arc::new(FakeRemote::default());
        let queries = Arc::new(MemoryQueryClient::new());
        let idle = Arc::new(HeldIdleQueue::default());
        let guard = MutationGuard::new();

        let deps = Collaborators {
            remote: remote.clone(),
            queries: queries.clone(),
            snapshots: snapshots.clone(),
            profiles: profiles.clone(),
            jobs: Arc::new(jobs.clone()),
            idle: idle.clone(),
            gate,
            realtime,
            guard: guard.clone(),
        };
        let hydrator = Hydrator::new(config, deps);
        Fixture { hydrator, remote, queries, snapshots, profiles, jobs, idle, realtime: hub, guard, storage }
    }

    fn entry(id: &str, with_message: bool) -> ConversationPreviewEntry {
        ConversationPreviewEntry {
            conversation: Conversation { id: id.into(), ..Default::default() },
            latest_message: with_message.then(|| Message { id: "old".into(), sender: "u3".into(), ..Default::default() }),
            unread_count: 0,
        }
    }

    fn ana() -> Identity {
        Identity::new("u1", "ana")
    }

    async fn envelope<T: serde::de::DeserializeOwned>(snapshots: &SnapshotStore, kind: SnapshotKind) -> Envelope<T> {
        snapshots.get(&snapshots.descriptor(&kind)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_recent_profile_write_skips_fetch() {
        let fx = fixture();
        let data = fx.remote.profile_bundle("u1", "ana").await.unwrap();
        fx.remote.profile_calls.store(0, Ordering::SeqCst);
        fx.profiles.upsert("u1", Some("ana"), data, Some(now_ms())).await;

        let outcome = fx.hydrator.hydrate_profile_self(&ana()).await.unwrap();
        assert_eq!(outcome, HydrationOutcome::Fresh);
        assert_eq!(fx.remote.profile_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fresh_query_skips_directory_fetch() {
        let fx = fixture();
        fx.queries.set_query_data(&query_keys::directory_all(), json!({}), now_ms()).await;

        let outcome = fx.hydrator.hydrate_directory_first_page("edge").await.unwrap();
        assert_eq!(outcome, HydrationOutcome::Fresh);
        assert_eq!(fx.remote.directory_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_or_invalidated_query_is_refetched() {
        let fx = fixture();
        let key = query_keys::directory_all();
        fx.queries.set_query_data(&key, json!({}), now_ms() - 301_000).await;
        assert!(!fx.hydrator.is_query_fresh(&key, Duration::from_secs(300)).await);

        fx.queries.set_query_data(&key, json!({}), now_ms()).await;
        fx.queries.invalidate_queries(&key).await;
        assert!(!fx.hydrator.is_query_fresh(&key, Duration::from_secs(300)).await);

        fx.hydrator.hydrate_directory_first_page("edge").await.unwrap();
        assert_eq!(fx.remote.directory_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_directory_hydration_stamps_both_tiers_alike() {
        let fx = fixture();
        let outcome = fx.hydrator.hydrate_directory_first_page("edge").await.unwrap();
        let HydrationOutcome::Persisted { updated_at } = outcome else {
            panic!("expected persisted, got {outcome:?}");
        };

        let key = query_keys::directory_all();
        assert_eq!(fx.queries.get_query_state(&key).await.unwrap().data_updated_at, updated_at);
        let cached: InfinitePages<DirectoryPage> =
            serde_json::from_value(fx.queries.get_query_data(&key).await.unwrap()).unwrap();
        assert_eq!(cached.page_params, vec![1]);

        let stored: Envelope<DirectoryPage> =
            envelope(&fx.snapshots, SnapshotKind::DirectoryFirstPage("edge".into())).await;
        assert_eq!(stored.timestamp, updated_at);
        assert_eq!(stored.data, cached.pages[0]);
    }

    #[tokio::test]
    async fn test_profile_edit_in_flight_skips_hydration() {
        let fx = fixture();
        let ticket = fx.guard.begin();
        let outcome = fx.hydrator.hydrate_profile_self(&ana()).await.unwrap();
        assert_eq!(outcome, HydrationOutcome::Skipped { reason: SkipReason::MutationInFlight });
        assert_eq!(fx.remote.profile_calls.load(Ordering::SeqCst), 0);
        drop(ticket);

        let outcome = fx.hydrator.hydrate_profile_self(&ana()).await.unwrap();
        let HydrationOutcome::Persisted { updated_at } = outcome else {
            panic!("expected persisted, got {outcome:?}");
        };
        assert_eq!(fx.profiles.get_by_id("u1").await.unwrap().timestamp, updated_at);
        assert!(fx.profiles.get_by_handle("ana").await.is_some());

        let stored: Envelope<ProfileData> = envelope(&fx.snapshots, SnapshotKind::Profile("u1".into())).await;
        assert_eq!(stored.timestamp, updated_at);
        assert_eq!(stored.data.grid_items.len(), 1);

        let state = fx.queries.get_query_state(&query_keys::profile_detail("ana")).await.unwrap();
        assert_eq!(state.data_updated_at, updated_at);

        let header: Envelope<Profile> = envelope(&fx.snapshots, SnapshotKind::ProfileHeader("u1".into())).await;
        assert_eq!(header.timestamp, updated_at);
        assert_eq!(header.data.user_name, "ana");
        let cached = fx.queries.get_query_data(&query_keys::profile_header("ana")).await.unwrap();
        assert_eq!(cached["userName"], "ana");
    }

    #[tokio::test]
    async fn test_placeholder_identity_is_skipped() {
        let fx = fixture();
        let outcome = fx.hydrator.hydrate_profile_self(&Identity::new("guest", "ana")).await.unwrap();
        assert_eq!(outcome, HydrationOutcome::Skipped { reason: SkipReason::MissingIdentity });
        let outcome = fx.hydrator.hydrate_want_to_meet("").await.unwrap();
        assert_eq!(outcome, HydrationOutcome::Skipped { reason: SkipReason::MissingIdentity });
        assert_eq!(fx.remote.want_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_caches_untouched() {
        let fx = fixture();
        fx.remote.offline.store(true, Ordering::SeqCst);

        assert!(matches!(fx.hydrator.hydrate_want_to_meet("u1").await, Err(HydrateError::Remote(_))));
        assert!(matches!(fx.hydrator.hydrate_profile_self(&ana()).await, Err(HydrateError::Remote(_))));
        assert!(fx.queries.is_empty().await);
        assert!(fx.storage.is_empty().await);
        assert!(fx.profiles.get_by_id("u1").await.is_none());
    }

    #[tokio::test]
    async fn test_previews_split_between_inline_and_idle() {
        let fx = fixture();
        let pages = InfinitePages {
            pages: vec![
                ConversationsPage {
                    entries: vec![entry("c1", false), entry("c2", false), entry("c3", false), entry("c4", true)],
                    next_page: Some(2),
                },
                ConversationsPage { entries: vec![entry("c2", false), entry("c5", false), entry("c6", false)], next_page: None },
            ],
            page_params: vec![1, 2],
        };
        let key = query_keys::conversations("u1");
        fx.queries.set_query_data(&key, serde_json::to_value(&pages).unwrap(), now_ms()).await;

        let report = fx.hydrator.hydrate_conversation_previews("u1").await.unwrap();
        assert_eq!(report, PreviewReport { inline: 3, queued: 2, failed: 0 });
        assert_eq!(*fx.remote.previews.lock().await, vec!["c1", "c2", "c3"]);
        assert_eq!(fx.idle.labels().await, vec!["messaging:hydrate:c5", "messaging:hydrate:c6"]);

        let again = fx.hydrator.hydrate_conversation_previews("u1").await.unwrap();
        assert_eq!(again.inline, 0);
        assert_eq!(again.queued, 0);

        fx.idle.run_all().await;
        let cached: InfinitePages<ConversationsPage> =
            serde_json::from_value(fx.queries.get_query_data(&key).await.unwrap()).unwrap();
        let missing: Vec<&str> = cached
            .pages
            .iter()
            .flat_map(|page| &page.entries)
            .filter(|entry| entry.latest_message.is_none())
            .map(|entry| entry.conversation.id.as_str())
            .collect();
        assert!(missing.is_empty(), "still missing previews: {missing:?}");
        assert_eq!(cached.pages[0].entries[3].latest_message.as_ref().unwrap().id, "old");
    }

    #[tokio::test]
    async fn test_preview_splice_keeps_stale_list_stale() {
        let fx = fixture();
        let key = query_keys::conversations("u1");
        let pages = InfinitePages::first(ConversationsPage { entries: vec![entry("c1", false)], next_page: None });
        fx.queries
            .set_query_data(&key, serde_json::to_value(&pages).unwrap(), now_ms() - 600_000)
            .await;
        fx.hydrator.on_identity_change(Some(ana())).await.unwrap();

        let report = fx.hydrator.hydrate_conversation_previews("u1").await.unwrap();
        assert_eq!(report.inline, 1);
        assert!(fx.queries.get_query_state(&key).await.unwrap().is_invalidated);

        let outcome = fx.hydrator.hydrate_messages_first_page("u1").await.unwrap();
        assert!(matches!(outcome, HydrationOutcome::Persisted { .. }));
        assert_eq!(fx.remote.conversation_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_previews_without_cached_list_do_nothing() {
        let fx = fixture();
        let report = fx.hydrator.hydrate_conversation_previews("u1").await.unwrap();
        assert_eq!(report, PreviewReport::default());
        assert!(fx.remote.previews.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_preload_queues_boot_targets_once() {
        let fx = fixture();
        let submitted = fx.hydrator.preload_initial(Some(&ana())).await;
        let keys: Vec<&str> = submitted.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "directory:firstPage:edge-patagonia",
                "profile:self:u1",
                "wantToMeet:list:u1",
                "messages:threads:firstPage:u1"
            ]
        );
        fx.jobs.idle().await;

        assert_eq!(fx.remote.directory_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.remote.profile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.remote.want_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.remote.conversation_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*fx.remote.previews.lock().await, vec!["c1"]);
        assert_eq!(fx.jobs.stats().await.completed, 4);

        fx.hydrator.preload_initial(Some(&ana())).await;
        fx.jobs.idle().await;
        assert_eq!(fx.remote.directory_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.remote.profile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.remote.conversation_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_preload_without_identity_only_hydrates_directory() {
        let fx = fixture();
        let submitted = fx.hydrator.preload_initial(None).await;
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].1, Enqueued::Scheduled);
        fx.jobs.idle().await;
        assert_eq!(fx.remote.profile_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_seed_applies_snapshots_with_their_timestamps() {
        let fx = fixture();
        let put = |kind: SnapshotKind, data: Value, at: i64| {
            let snapshots = fx.snapshots.clone();
            async move {
                snapshots
                    .put(&snapshots.descriptor(&kind), &data, PutOptions::at(at))
                    .await
                    .unwrap();
            }
        };
        let at = now_ms() - 60_000;
        put(SnapshotKind::DirectoryFirstPage("edge-patagonia".into()), json!({"page": 1}), at).await;
        put(
            SnapshotKind::Profile("u1".into()),
            json!({"profile": {"id": "u1", "userName": "ana"}, "gridItems": []}),
            at + 1,
        )
        .await;
        put(SnapshotKind::WantToMeetList("u1".into()), json!([]), at + 2).await;
        put(SnapshotKind::MessagesThreadsFirstPage("u1".into()), json!({"entries": []}), at + 3).await;
        put(SnapshotKind::ProfileHeader("u1".into()), json!({"id": "u1", "userName": "ana"}), at + 4).await;

        let report = fx.hydrator.seed_boot_snapshots(Some(&ana()), None).await.unwrap();
        assert_eq!(report.applied, vec!["directory", "profile", "profileHeader", "wantToMeet", "messages"]);

        let stamp = |key: Vec<String>| {
            let queries = fx.queries.clone();
            async move { queries.get_query_state(&key).await.unwrap().data_updated_at }
        };
        assert_eq!(stamp(query_keys::directory_all()).await, at);
        assert_eq!(stamp(query_keys::profile_detail("ana")).await, at + 1);
        assert_eq!(stamp(query_keys::want_to_meet_list("u1")).await, at + 2);
        assert_eq!(stamp(query_keys::conversations("u1")).await, at + 3);
        assert_eq!(stamp(query_keys::profile_header("ana")).await, at + 4);
        assert_eq!(fx.profiles.last_snapshot_time("u1").await, Some(at + 1));

        let outcome = fx.hydrator.hydrate_directory_first_page("edge-patagonia").await.unwrap();
        assert_eq!(outcome, HydrationOutcome::Fresh);
        assert_eq!(fx.remote.directory_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_seed_skips_invalid_snapshots() {
        let fx = fixture();
        let expired = now_ms() - fx.snapshots.config().max_age_ms - 1;
        let directory = fx.snapshots.descriptor(&SnapshotKind::DirectoryFirstPage("edge-patagonia".into()));
        fx.snapshots.put(&directory, &json!({"page": 1}), PutOptions::at(expired)).await.unwrap();
        let want = fx.snapshots.descriptor(&SnapshotKind::WantToMeetList("u1".into()));
        fx.snapshots.put(&want, &json!({"not": "a list"}), PutOptions::default()).await.unwrap();

        let report = fx.hydrator.seed_boot_snapshots(Some(&ana()), None).await.unwrap();
        assert_eq!(report.sweep.evicted, 1);
        assert!(report.applied.is_empty());
        assert!(fx.queries.is_empty().await);
    }

    #[tokio::test]
    async fn test_realtime_follows_identity() {
        let fx = fixture();
        let want = query_keys::want_to_meet_list("u1");
        fx.queries.set_query_data(&want, json!([]), now_ms()).await;
        fx.queries.set_query_data(&query_keys::conversations("u1"), json!({}), now_ms()).await;

        fx.hydrator.on_identity_change(Some(ana())).await.unwrap();
        assert_eq!(fx.realtime.subscriber_count().await, 2);
        assert!(fx.queries.get_query_state(&want).await.unwrap().is_invalidated);

        fx.queries.set_query_data(&want, json!([]), now_ms()).await;
        let event = |saved_by: &str| RealtimeEvent {
            topic: "saves".into(),
            action: RealtimeAction::Create,
            record: json!({"saved_by": saved_by}),
        };
        assert_eq!(fx.realtime.publish(event("u2")).await, 0);
        assert!(!fx.queries.get_query_state(&want).await.unwrap().is_invalidated);
        assert_eq!(fx.realtime.publish(event("u1")).await, 1);
        assert!(fx.queries.get_query_state(&want).await.unwrap().is_invalidated);

        fx.hydrator.on_identity_change(Some(Identity::new("u2", "bo"))).await.unwrap();
        assert_eq!(fx.realtime.subscriber_count().await, 2);
        assert!(fx.realtime.patterns().await.iter().all(|pattern| pattern.value == "u2"));
        assert_eq!(fx.realtime.publish(event("u1")).await, 0);

        fx.hydrator.on_identity_change(None).await.unwrap();
        assert_eq!(fx.realtime.subscriber_count().await, 0);
        assert!(fx.queries.is_empty().await);
    }

    #[tokio::test]
    async fn test_sign_out_forgets_previous_profile() {
        let fx = fixture();
        fx.hydrator.on_identity_change(Some(ana())).await.unwrap();
        fx.hydrator.hydrate_profile_self(&ana()).await.unwrap();
        assert!(fx.profiles.get_by_id("u1").await.is_some());

        fx.hydrator.on_identity_change(Some(ana())).await.unwrap();
        assert!(fx.profiles.get_by_id("u1").await.is_some());

        fx.hydrator.on_identity_change(None).await.unwrap();
        assert!(fx.profiles.get_by_id("u1").await.is_none());
        assert!(fx.profiles.get_by_handle("ana").await.is_none());
        assert!(fx.profiles.load_from_disk("u1", None).await.is_none());
        assert!(fx.queries.get_query_data(&query_keys::profile_detail("ana")).await.is_none());

        let stored: Envelope<ProfileData> = envelope(&fx.snapshots, SnapshotKind::Profile("u1".into())).await;
        assert_eq!(stored.data.profile.user_name, "ana");
    }

    #[tokio::test]
    async fn test_switching_user_forgets_previous_profile() {
        let fx = fixture();
        fx.hydrator.on_identity_change(Some(ana())).await.unwrap();
        fx.hydrator.hydrate_profile_self(&ana()).await.unwrap();

        fx.hydrator.on_identity_change(Some(Identity::new("u2", "bo"))).await.unwrap();
        assert!(fx.profiles.get_by_id("u1").await.is_none());
        assert!(fx.profiles.last_snapshot_time("u1").await.is_none());
    }

    struct StuckSubscription;

    #[async_trait]
    impl Subscription for StuckSubscription {
        async fn unsubscribe(self: Box<Self>) -> Result<(), HydrateError> {
            Err(HydrateError::Realtime("socket closed".into()))
        }
    }

    #[derive(Default)]
    struct StuckRealtime {
        subscribes: AtomicUsize,
    }

    #[async_trait]
    impl Realtime for StuckRealtime {
        async fn subscribe(
            &self, _pattern: SubscriptionPattern, _handler: EventHandler,
        ) -> Result<Box<dyn Subscription>, HydrateError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StuckSubscription))
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_failures_are_ignored() {
        let stuck = Arc::new(StuckRealtime::default());
        let fx = fixture_with(stuck.clone(), MemoryRealtime::new());

        fx.hydrator.on_identity_change(Some(ana())).await.unwrap();
        fx.hydrator.on_identity_change(Some(Identity::new("u2", "bo"))).await.unwrap();
        fx.hydrator.on_identity_change(None).await.unwrap();
        assert_eq!(stuck.subscribes.load(Ordering::SeqCst), 4);
    }
}
