use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use {
    dbhq_common::{
        CoreEvent, Entity, EntityData, EntityKey, EntityKind, Error, Result, Snowflake,
        TelemetrySink, Version, entity::MessageData,
    },
    futures::{StreamExt, stream},
    tracing::{debug, warn},
};

use crate::fetch::EntityFetcher;

/// Concurrent fetches issued by [`StateCache::resync_all`].
const RESYNC_CONCURRENCY: usize = 8;

/// Tombstones kept per entity kind; the oldest deletions go first.
pub const MAX_TOMBSTONES_PER_KIND: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The stored version (live or tombstone) is at least as new.
    Stale { current: Version },
}

impl UpsertOutcome {
    #[must_use]
    pub fn applied(self) -> bool {
        !matches!(self, Self::Stale { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub refreshed: usize,
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug)]
enum Slot {
    Live(Arc<Entity>),
    /// Deleted at this version. Reads as a miss but still wins LWW.
    Tombstone(Version),
}

impl Slot {
    fn version(&self) -> Version {
        match self {
            Self::Live(entity) => entity.version,
            Self::Tombstone(version) => *version,
        }
    }

    fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    tick: u64,
}

/// Entries of one entity kind, with LRU order and pin counts.
#[derive(Debug, Default)]
struct KindState {
    entries: HashMap<EntityKey, Entry>,
    lru: BTreeMap<u64, EntityKey>,
    /// Tombstones in deletion order, keyed by entry tick.
    graves: BTreeMap<u64, EntityKey>,
    pins: HashMap<EntityKey, usize>,
    tick: u64,
    live: usize,
}

impl KindState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &EntityKey) {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.lru.remove(&entry.tick);
            entry.tick = tick;
            self.lru.insert(tick, *key);
        }
    }

    fn put(&mut self, key: EntityKey, slot: Slot) {
        let tick = self.next_tick();
        if slot.is_live() {
            self.live += 1;
        } else {
            self.graves.insert(tick, key);
        }
        if let Some(old) = self.entries.insert(key, Entry { slot, tick }) {
            self.forget(&old);
        }
        self.lru.insert(tick, key);
    }

    /// Index bookkeeping for an entry that left `entries`.
    fn forget(&mut self, entry: &Entry) {
        self.lru.remove(&entry.tick);
        if entry.slot.is_live() {
            self.live -= 1;
        } else {
            self.graves.remove(&entry.tick);
        }
    }

    fn take(&mut self, key: &EntityKey) -> Option<Slot> {
        let entry = self.entries.remove(key)?;
        self.forget(&entry);
        Some(entry.slot)
    }

    /// Drop the oldest tombstones beyond `cap`.
    fn trim_graves(&mut self, cap: usize) -> usize {
        let mut dropped = 0;
        while self.graves.len() > cap {
            let Some((tick, key)) = self.graves.pop_first() else {
                break;
            };
            self.lru.remove(&tick);
            self.entries.remove(&key);
            dropped += 1;
        }
        dropped
    }

    /// Drop tombstones recorded before `epoch`.
    fn prune_graves(&mut self, epoch: u64) -> usize {
        let stale: Vec<(u64, EntityKey)> = self
            .graves
            .iter()
            .filter(|(_, key)| {
                self.entries
                    .get(key)
                    .is_some_and(|e| e.slot.version().epoch < epoch)
            })
            .map(|(tick, key)| (*tick, *key))
            .collect();
        for (tick, key) in &stale {
            self.graves.remove(tick);
            self.lru.remove(tick);
            self.entries.remove(key);
        }
        stale.len()
    }

    /// Drop least recently used entries until at most `limit` remain.
    /// Pinned entries are skipped; if everything left is pinned the kind
    /// stays over its bound until a pin is released.
    fn evict(&mut self, limit: usize) -> Vec<EntityKey> {
        let mut evicted = Vec::new();
        let mut pinned = Vec::new();
        while self.entries.len() > limit {
            let Some((tick, key)) = self.lru.pop_first() else {
                break;
            };
            if self.pins.contains_key(&key) {
                pinned.push((tick, key));
                continue;
            }
            if let Some(entry) = self.entries.remove(&key) {
                self.forget(&entry);
                evicted.push(key);
            }
        }
        self.lru.extend(pinned);
        evicted
    }
}

type Shared = Arc<Mutex<KindState>>;

fn lock(shared: &Shared) -> MutexGuard<'_, KindState> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

fn index(kind: EntityKind) -> usize {
    match kind {
        EntityKind::Guild => 0,
        EntityKind::Channel => 1,
        EntityKind::Member => 2,
        EntityKind::Role => 3,
        EntityKind::Message => 4,
    }
}

/// Keeps an entity from being evicted while an action references it.
#[must_use = "the pin is released when the guard is dropped"]
pub struct PinGuard {
    shared: Shared,
    key: EntityKey,
}

impl PinGuard {
    #[must_use]
    pub fn key(&self) -> &EntityKey {
        &self.key
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.shared);
        if let Some(count) = state.pins.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                state.pins.remove(&self.key);
            }
        }
    }
}

impl std::fmt::Debug for PinGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PinGuard").field(&self.key).finish()
    }
}

/// Versioned mirror of remote entities.
///
/// Each entity kind is guarded by its own lock, held only for the duration of
/// a map operation and never across an `await`. Readers get `Arc<Entity>`
/// snapshots, so a value is either the old one or the new one, never half
/// updated.
pub struct StateCache {
    kinds: [Shared; 5],
    limit: Option<usize>,
    fetcher: Option<Arc<dyn EntityFetcher>>,
    /// Highest version applied from the event stream.
    high_water: Mutex<Version>,
    sink: Arc<dyn TelemetrySink>,
}

impl StateCache {
    /// `limit` bounds the entries kept per entity kind; `None` is unbounded.
    #[must_use]
    pub fn new(limit: Option<usize>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            kinds: std::array::from_fn(|_| Shared::default()),
            limit: limit.filter(|n| *n > 0),
            fetcher: None,
            high_water: Mutex::new(Version::ZERO),
            sink,
        }
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn EntityFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    fn shared(&self, kind: EntityKind) -> &Shared {
        &self.kinds[index(kind)]
    }

    fn state(&self, kind: EntityKind) -> MutexGuard<'_, KindState> {
        lock(self.shared(kind))
    }

    #[must_use]
    pub fn high_water(&self) -> Version {
        *self.high_water.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn raise_high_water(&self, version: Version) {
        let mut hw = self.high_water.lock().unwrap_or_else(|e| e.into_inner());
        if version > *hw {
            *hw = version;
        }
    }

    /// The cached snapshot, or `None` on a miss (including tombstones).
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<Arc<Entity>> {
        let mut state = self.state(key.kind);
        let entity = match &state.entries.get(key)?.slot {
            Slot::Live(entity) => Arc::clone(entity),
            Slot::Tombstone(_) => return None,
        };
        state.touch(key);
        Some(entity)
    }

    /// Stored version, live or tombstone.
    #[must_use]
    pub fn version(&self, key: &EntityKey) -> Option<Version> {
        self.state(key.kind)
            .entries
            .get(key)
            .map(|e| e.slot.version())
    }

    #[must_use]
    pub fn is_tombstoned(&self, key: &EntityKey) -> bool {
        self.state(key.kind)
            .entries
            .get(key)
            .is_some_and(|e| !e.slot.is_live())
    }

    /// Last-writer-wins insert. A no-op when the incoming version is not
    /// newer than what is stored, tombstones included.
    pub fn upsert(&self, entity: Entity) -> UpsertOutcome {
        let key = entity.key;
        let version = entity.version;
        let evicted = {
            let mut state = self.state(key.kind);
            let existed = match state.entries.get(&key) {
                Some(entry) if entry.slot.version() >= version => {
                    return UpsertOutcome::Stale {
                        current: entry.slot.version(),
                    };
                },
                Some(entry) => entry.slot.is_live(),
                None => false,
            };
            state.put(key, Slot::Live(Arc::new(entity)));
            let evicted = self.evict_locked(&mut state);
            (existed, evicted)
        };
        self.raise_high_water(version);
        self.report_evictions(evicted.1);

        if evicted.0 {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        }
    }

    /// Record a deletion at `version`. Returns `false` if a newer version is
    /// already stored.
    pub fn remove(&self, key: &EntityKey, version: Version) -> bool {
        let evicted = {
            let mut state = self.state(key.kind);
            if state
                .entries
                .get(key)
                .is_some_and(|e| e.slot.version() >= version)
            {
                return false;
            }
            state.put(*key, Slot::Tombstone(version));
            state.trim_graves(MAX_TOMBSTONES_PER_KIND);
            self.evict_locked(&mut state)
        };
        self.raise_high_water(version);
        self.report_evictions(evicted);
        true
    }

    /// Forget everything about `key`, tombstone included.
    pub fn invalidate(&self, key: &EntityKey) -> bool {
        self.state(key.kind).take(key).is_some()
    }

    /// Replace the entry with the authoritative remote state.
    ///
    /// The fetched snapshot is stamped with the high-water version seen when
    /// the fetch started. If an event for `key` is applied while the fetch is
    /// in flight, that event wins and the fetched data is discarded.
    pub async fn reconcile(&self, key: &EntityKey) -> Result<Option<Arc<Entity>>> {
        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or_else(|| Error::message("state cache has no entity fetcher"))?;

        let before = self.version(key);
        let stamp = self.high_water().max(before.unwrap_or_default());
        let fetched = fetcher.fetch(key).await?;

        if let Some(data) = &fetched
            && data.kind() != key.kind
        {
            return Err(Error::malformed(format!(
                "fetcher returned {} data for {key}",
                data.kind()
            )));
        }

        let (result, evicted) = {
            let mut state = self.state(key.kind);
            let current = state.entries.get(key).map(|e| e.slot.version());
            if current != before {
                debug!(key = %key, "entity changed during reconcile, keeping newer event");
                let live = match state.entries.get(key).map(|e| &e.slot) {
                    Some(Slot::Live(entity)) => Some(Arc::clone(entity)),
                    _ => None,
                };
                return Ok(live);
            }
            match fetched {
                Some(data) => {
                    let entity = Arc::new(Entity::new(*key, stamp, data));
                    state.put(*key, Slot::Live(Arc::clone(&entity)));
                    (Some(entity), self.evict_locked(&mut state))
                },
                None => {
                    state.put(*key, Slot::Tombstone(stamp));
                    state.trim_graves(MAX_TOMBSTONES_PER_KIND);
                    (None, self.evict_locked(&mut state))
                },
            }
        };
        self.report_evictions(evicted);
        debug!(key = %key, version = %stamp, found = result.is_some(), "reconciled");
        Ok(result)
    }

    /// Cached value, or a remote fetch on a miss. Tombstoned keys are not
    /// fetched.
    pub async fn fetch_through(&self, key: &EntityKey) -> Result<Option<Arc<Entity>>> {
        if let Some(entity) = self.get(key) {
            return Ok(Some(entity));
        }
        if self.is_tombstoned(key) {
            return Ok(None);
        }
        self.reconcile(key).await
    }

    /// Re-fetch every live entity. Used after a session could not be resumed
    /// and events may have been missed.
    pub async fn resync_all(&self) -> ResyncReport {
        let keys: Vec<EntityKey> = EntityKind::ALL
            .iter()
            .flat_map(|kind| self.keys(*kind))
            .collect();

        let results: Vec<_> = stream::iter(keys)
            .map(|key| async move { (key, self.reconcile(&key).await) })
            .buffer_unordered(RESYNC_CONCURRENCY)
            .collect()
            .await;

        let mut report = ResyncReport::default();
        for (key, result) in results {
            match result {
                Ok(Some(_)) => report.refreshed += 1,
                Ok(None) => report.removed += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "resync fetch failed");
                    report.failed += 1;
                },
            }
        }
        debug!(?report, "cache resync finished");
        report
    }

    /// Forget deletions recorded in sessions before `epoch`. Events from those
    /// sessions can no longer arrive once a newer session is running.
    pub fn prune_tombstones(&self, epoch: u64) -> usize {
        let pruned: usize = EntityKind::ALL
            .iter()
            .map(|kind| self.state(*kind).prune_graves(epoch))
            .sum();
        if pruned > 0 {
            debug!(epoch, pruned, "old tombstones pruned");
        }
        pruned
    }

    /// Tombstones currently held for `kind`.
    #[must_use]
    pub fn tombstones(&self, kind: EntityKind) -> usize {
        self.state(kind).graves.len()
    }

    /// Protect `key` from eviction until the guard is dropped.
    pub fn pin(&self, key: &EntityKey) -> PinGuard {
        let shared = Arc::clone(self.shared(key.kind));
        *lock(&shared).pins.entry(*key).or_insert(0) += 1;
        PinGuard { shared, key: *key }
    }

    #[must_use]
    pub fn is_pinned(&self, key: &EntityKey) -> bool {
        self.state(key.kind).pins.contains_key(key)
    }

    /// Live entries of `kind`.
    #[must_use]
    pub fn len(&self, kind: EntityKind) -> usize {
        self.state(kind).live
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }

    /// Keys of the live entries of `kind`.
    #[must_use]
    pub fn keys(&self, kind: EntityKind) -> Vec<EntityKey> {
        self.state(kind)
            .entries
            .iter()
            .filter(|(_, e)| e.slot.is_live())
            .map(|(k, _)| *k)
            .collect()
    }

    /// Live channels, roles, members and messages belonging to `guild_id`.
    /// A message belongs to the guild it names or to one of its channels.
    #[must_use]
    pub fn guild_children(&self, guild_id: Snowflake) -> Vec<EntityKey> {
        let mut children = Vec::new();
        for kind in [EntityKind::Channel, EntityKind::Role, EntityKind::Member] {
            let state = self.state(kind);
            children.extend(state.entries.iter().filter_map(|(key, entry)| {
                let Slot::Live(entity) = &entry.slot else {
                    return None;
                };
                let owner = match &entity.data {
                    EntityData::Channel(c) => c.guild_id,
                    EntityData::Role(r) => Some(r.guild_id),
                    EntityData::Member(m) => Some(m.guild_id),
                    _ => None,
                };
                (owner == Some(guild_id)).then_some(*key)
            }));
        }
        let channels: HashSet<Snowflake> = children
            .iter()
            .filter(|key| key.kind == EntityKind::Channel)
            .map(|key| key.id)
            .collect();
        children.extend(self.messages_where(|m| {
            m.guild_id == Some(guild_id) || channels.contains(&m.channel_id)
        }));
        children
    }

    /// Live messages posted in `channel_id`.
    #[must_use]
    pub fn channel_messages(&self, channel_id: Snowflake) -> Vec<EntityKey> {
        self.messages_where(|m| m.channel_id == channel_id)
    }

    fn messages_where(&self, keep: impl Fn(&MessageData) -> bool) -> Vec<EntityKey> {
        self.state(EntityKind::Message)
            .entries
            .iter()
            .filter_map(|(key, entry)| match &entry.slot {
                Slot::Live(entity) => entity
                    .as_message()
                    .is_some_and(&keep)
                    .then_some(*key),
                Slot::Tombstone(_) => None,
            })
            .collect()
    }

    fn evict_locked(&self, state: &mut KindState) -> Vec<EntityKey> {
        match self.limit {
            Some(limit) => state.evict(limit),
            None => Vec::new(),
        }
    }

    fn report_evictions(&self, evicted: Vec<EntityKey>) {
        for key in evicted {
            self.sink.emit(&CoreEvent::CacheEvicted { key });
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::MemoryFetcher,
        dbhq_common::{
            entity::{ChannelData, MemberData},
            testing::RecordingSink,
        },
    };

    fn member(guild: u64, user: u64, nick: &str) -> MemberData {
        MemberData {
            guild_id: Snowflake(guild),
            user_id: Snowflake(user),
            username: format!("user{user}"),
            nick: Some(nick.to_string()),
            roles: Vec::new(),
            bot: false,
        }
    }

    fn channel(guild: u64, name: &str) -> ChannelData {
        ChannelData {
            guild_id: Some(Snowflake(guild)),
            name: Some(name.to_string()),
            channel_type: 0,
        }
    }

    fn message(channel: u64, guild: Option<u64>) -> MessageData {
        MessageData {
            channel_id: Snowflake(channel),
            guild_id: guild.map(Snowflake),
            author_id: Snowflake(55),
            author_bot: false,
            content: "hi".into(),
        }
    }

    fn cache(limit: Option<usize>) -> (StateCache, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (StateCache::new(limit, sink.clone()), sink)
    }

    #[test]
    fn older_version_is_a_no_op() {
        let (cache, _) = cache(None);
        let key = EntityKey::member(1u64, 42u64);
        assert_eq!(
            cache.upsert(Entity::member(Version::new(1, 5), member(1, 42, "new"))),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            cache.upsert(Entity::member(Version::new(1, 4), member(1, 42, "old"))),
            UpsertOutcome::Stale {
                current: Version::new(1, 5)
            }
        );
        let stored = cache.get(&key).unwrap();
        assert_eq!(stored.as_member().unwrap().nick.as_deref(), Some("new"));
    }

    #[test]
    fn equal_version_is_a_no_op() {
        let (cache, _) = cache(None);
        cache.upsert(Entity::member(Version::new(1, 5), member(1, 42, "a")));
        assert!(!cache
            .upsert(Entity::member(Version::new(1, 5), member(1, 42, "b")))
            .applied());
    }

    #[test]
    fn tombstone_blocks_late_resurrection() {
        let (cache, _) = cache(None);
        let key = EntityKey::channel(7u64);
        cache.upsert(Entity::channel(Snowflake(7), Version::new(1, 2), channel(1, "general")));
        assert!(cache.remove(&key, Version::new(1, 6)));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_tombstoned(&key));

        let late = cache.upsert(Entity::channel(Snowflake(7), Version::new(1, 3), channel(1, "x")));
        assert!(!late.applied());
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(EntityKind::Channel), 0);
    }

    #[test]
    fn stale_remove_is_ignored() {
        let (cache, _) = cache(None);
        let key = EntityKey::member(1u64, 42u64);
        cache.upsert(Entity::member(Version::new(1, 5), member(1, 42, "joined")));
        assert!(!cache.remove(&key, Version::new(1, 4)));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn invalidate_clears_tombstone() {
        let (cache, _) = cache(None);
        let key = EntityKey::channel(7u64);
        cache.remove(&key, Version::new(1, 9));
        assert!(cache.invalidate(&key));
        assert!(cache.version(&key).is_none());
        assert!(cache
            .upsert(Entity::channel(Snowflake(7), Version::new(1, 1), channel(1, "back")))
            .applied());
    }

    #[test]
    fn new_epoch_prunes_old_tombstones() {
        let (cache, _) = cache(None);
        for id in 1..=50u64 {
            cache.upsert(Entity::channel(Snowflake(id), Version::new(1, id), channel(1, "c")));
            assert!(cache.remove(&EntityKey::channel(id), Version::new(1, 100 + id)));
        }
        assert!(cache.remove(&EntityKey::channel(99u64), Version::new(2, 3)));
        assert_eq!(cache.tombstones(EntityKind::Channel), 51);

        assert_eq!(cache.prune_tombstones(2), 50);
        assert_eq!(cache.tombstones(EntityKind::Channel), 1);
        assert!(cache.is_tombstoned(&EntityKey::channel(99u64)));
        assert!(cache.version(&EntityKey::channel(1u64)).is_none());
    }

    #[test]
    fn tombstones_are_capped_per_kind() {
        let (cache, _) = cache(None);
        let total = MAX_TOMBSTONES_PER_KIND as u64 + 5;
        for id in 1..=total {
            cache.remove(&EntityKey::message(id), Version::new(1, id));
        }
        assert_eq!(cache.tombstones(EntityKind::Message), MAX_TOMBSTONES_PER_KIND);
        assert!(!cache.is_tombstoned(&EntityKey::message(1u64)));
        assert!(cache.is_tombstoned(&EntityKey::message(total)));
        assert_eq!(cache.len(EntityKind::Message), 0);
    }

    #[test]
    fn new_epoch_beats_old_sequence() {
        let (cache, _) = cache(None);
        let key = EntityKey::member(1u64, 42u64);
        cache.upsert(Entity::member(Version::new(1, 900), member(1, 42, "old-session")));
        cache.upsert(Entity::member(Version::new(2, 1), member(1, 42, "new-session")));
        assert_eq!(cache.get(&key).unwrap().version, Version::new(2, 1));
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let (cache, sink) = cache(Some(2));
        for (i, id) in [1u64, 2, 3].iter().enumerate() {
            if i == 2 {
                // Touch 1 so that 2 is the oldest.
                cache.get(&EntityKey::channel(1u64));
            }
            cache.upsert(Entity::channel(Snowflake(*id), Version::new(1, *id), channel(9, "c")));
        }
        assert_eq!(cache.len(EntityKind::Channel), 2);
        assert!(cache.get(&EntityKey::channel(2u64)).is_none());
        assert!(cache.get(&EntityKey::channel(1u64)).is_some());
        assert_eq!(
            sink.count(|e| matches!(e, CoreEvent::CacheEvicted { .. })),
            1
        );
    }

    #[test]
    fn pinned_entries_survive_eviction() {
        let (cache, _) = cache(Some(1));
        let pinned = EntityKey::channel(1u64);
        cache.upsert(Entity::channel(Snowflake(1), Version::new(1, 1), channel(9, "a")));
        let guard = cache.pin(&pinned);

        cache.upsert(Entity::channel(Snowflake(2), Version::new(1, 2), channel(9, "b")));
        assert!(cache.get(&pinned).is_some());
        assert!(cache.get(&EntityKey::channel(2u64)).is_none());

        drop(guard);
        assert!(!cache.is_pinned(&pinned));
        cache.upsert(Entity::channel(Snowflake(3), Version::new(1, 3), channel(9, "c")));
        assert!(cache.get(&pinned).is_none());
    }

    #[test]
    fn limits_apply_per_kind() {
        let (cache, _) = cache(Some(1));
        cache.upsert(Entity::channel(Snowflake(1), Version::new(1, 1), channel(9, "a")));
        cache.upsert(Entity::member(Version::new(1, 2), member(9, 5, "m")));
        assert_eq!(cache.len(EntityKind::Channel), 1);
        assert_eq!(cache.len(EntityKind::Member), 1);
    }

    #[test]
    fn guild_children_are_found_by_owner() {
        let (cache, _) = cache(None);
        cache.upsert(Entity::channel(Snowflake(7), Version::new(1, 1), channel(1, "a")));
        cache.upsert(Entity::channel(Snowflake(8), Version::new(1, 2), channel(2, "b")));
        cache.upsert(Entity::member(Version::new(1, 3), member(1, 42, "m")));
        // No guild id on the payload; found through its channel.
        cache.upsert(Entity::message(Snowflake(100), Version::new(1, 4), message(7, None)));
        cache.upsert(Entity::message(Snowflake(101), Version::new(1, 5), message(8, Some(2))));
        let mut children = cache.guild_children(Snowflake(1));
        children.sort();
        assert_eq!(children, vec![
            EntityKey::channel(7u64),
            EntityKey::member(1u64, 42u64),
            EntityKey::message(100u64),
        ]);
        assert_eq!(cache.channel_messages(Snowflake(8)), vec![EntityKey::message(101u64)]);
    }

    #[tokio::test]
    async fn reconcile_replaces_with_remote_truth() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let key = EntityKey::member(1u64, 42u64);
        fetcher.set(key, EntityData::Member(member(1, 42, "remote")));
        let cache = StateCache::new(None, Arc::new(RecordingSink::new())).with_fetcher(fetcher);
        cache.upsert(Entity::member(Version::new(1, 5), member(1, 42, "local")));
        cache.upsert(Entity::channel(Snowflake(7), Version::new(1, 8), channel(1, "x")));

        let entity = cache.reconcile(&key).await.unwrap().unwrap();
        assert_eq!(entity.as_member().unwrap().nick.as_deref(), Some("remote"));
        assert_eq!(entity.version, Version::new(1, 8));

        // An event older than the reconcile stamp cannot undo it.
        assert!(!cache
            .upsert(Entity::member(Version::new(1, 6), member(1, 42, "late")))
            .applied());
    }

    #[tokio::test]
    async fn reconcile_of_missing_entity_leaves_tombstone() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let cache = StateCache::new(None, Arc::new(RecordingSink::new())).with_fetcher(fetcher);
        let key = EntityKey::member(1u64, 42u64);
        cache.upsert(Entity::member(Version::new(1, 5), member(1, 42, "local")));

        assert!(cache.reconcile(&key).await.unwrap().is_none());
        assert!(cache.is_tombstoned(&key));
    }

    #[tokio::test]
    async fn fetch_through_fills_a_miss_once() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let key = EntityKey::channel(7u64);
        fetcher.set(key, EntityData::Channel(channel(1, "general")));
        let cache =
            StateCache::new(None, Arc::new(RecordingSink::new())).with_fetcher(fetcher.clone());

        assert!(cache.fetch_through(&key).await.unwrap().is_some());
        assert!(cache.fetch_through(&key).await.unwrap().is_some());
        assert_eq!(fetcher.fetches(&key), 1);
    }

    #[tokio::test]
    async fn reconcile_without_fetcher_fails() {
        let (cache, _) = cache(None);
        assert!(cache.reconcile(&EntityKey::guild(1u64)).await.is_err());
    }

    #[tokio::test]
    async fn resync_all_counts_outcomes() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.set(EntityKey::channel(7u64), EntityData::Channel(channel(1, "kept")));
        fetcher.fail(EntityKey::channel(9u64));
        let cache = StateCache::new(None, Arc::new(RecordingSink::new())).with_fetcher(fetcher);
        for id in [7u64, 8, 9] {
            cache.upsert(Entity::channel(Snowflake(id), Version::new(1, id), channel(1, "c")));
        }

        let report = cache.resync_all().await;
        assert_eq!(report, ResyncReport {
            refreshed: 1,
            removed: 1,
            failed: 1,
        });
        assert!(cache.get(&EntityKey::channel(8u64)).is_none());
        assert!(cache.get(&EntityKey::channel(9u64)).is_some());
    }
}
