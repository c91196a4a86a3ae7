// Copyright 2025-2026 The Quarry Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The tablet location cache.
//!
//! Lookups try a fast path under a shared lock first; a miss acquires a
//! master-lookup permit and refreshes from the master, merging the response
//! into the cache under the exclusive lock. Concurrent misses on the same
//! key are not coalesced: merges are idempotent and the permit semaphore
//! bounds the aggregate master load.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use quarry_common::proto::{
    GetTableLocationsRequestPb, GetTableLocationsResponsePb, GetTabletLocationsRequestPb,
    GetTabletLocationsResponsePb, ReplicaTypeFilter, TabletLocationsPb, TsInfoPb,
};

use crate::config::Config;
use crate::errors::Error;
use crate::master::{
    MasterClient, MasterResponse, RetryDecision, response_error, retry_decision, warn_terminal,
};
use crate::proxy::{DefaultProxyFactory, ProxyFactory, ProxyPair};
use crate::resolve::{HostResolver, TokioHostResolver};
use crate::server::{ClientContext, RemoteTabletServer, ServerRegistry};
use crate::tablet::{Partition, RemoteTablet};
use crate::util::{key_debug, linear_backoff, sleep_or_deadline};
use crate::{LookupType, Result, TableIdent};

/// How many tablets a point lookup asks the master for. The extra tablets
/// beyond the one requested are prefetch.
const FETCH_TABLETS_PER_POINT_LOOKUP: u32 = 10;
/// How many tablets a lower-bound (scan) lookup asks the master for.
const FETCH_TABLETS_PER_RANGE_LOOKUP: u32 = 20;

fn locations_to_fetch(lookup_type: LookupType) -> u32 {
    match lookup_type {
        LookupType::Point => FETCH_TABLETS_PER_POINT_LOOKUP,
        LookupType::LowerBound => FETCH_TABLETS_PER_RANGE_LOOKUP,
    }
}

#[derive(Clone, Debug)]
enum EntryKind {
    Tablet(Arc<RemoteTablet>),
    NonCoveredRange { lower: Bytes, upper: Bytes },
}

/// One record of the range index: either a tablet or a remembered
/// non-covered range, with an expiration time.
#[derive(Clone, Debug)]
pub(crate) struct MetaCacheEntry {
    expiration: Instant,
    kind: EntryKind,
}

impl MetaCacheEntry {
    fn tablet_entry(expiration: Instant, tablet: Arc<RemoteTablet>) -> Self {
        Self {
            expiration,
            kind: EntryKind::Tablet(tablet),
        }
    }

    fn non_covered(expiration: Instant, lower: Bytes, upper: Bytes) -> Self {
        Self {
            expiration,
            kind: EntryKind::NonCoveredRange { lower, upper },
        }
    }

    pub(crate) fn is_non_covered_range(&self) -> bool {
        matches!(self.kind, EntryKind::NonCoveredRange { .. })
    }

    pub(crate) fn tablet(&self) -> Option<&Arc<RemoteTablet>> {
        match &self.kind {
            EntryKind::Tablet(t) => Some(t),
            EntryKind::NonCoveredRange { .. } => None,
        }
    }

    pub(crate) fn lower(&self) -> &Bytes {
        match &self.kind {
            EntryKind::Tablet(t) => t.partition().lower(),
            EntryKind::NonCoveredRange { lower, .. } => lower,
        }
    }

    pub(crate) fn upper(&self) -> &Bytes {
        match &self.kind {
            EntryKind::Tablet(t) => t.partition().upper(),
            EntryKind::NonCoveredRange { upper, .. } => upper,
        }
    }

    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        self.lower().as_ref() <= key && (self.upper().is_empty() || key < self.upper().as_ref())
    }

    /// Expired by TTL, or (for tablet entries) the tablet itself has been
    /// marked stale.
    pub(crate) fn is_stale_at(&self, now: Instant) -> bool {
        now >= self.expiration
            || match &self.kind {
                EntryKind::Tablet(t) => t.is_stale(),
                EntryKind::NonCoveredRange { .. } => false,
            }
    }

    fn refresh_expiration(&mut self, expiration: Instant) {
        self.expiration = expiration;
    }

    fn debug_string(&self, now: Instant) -> String {
        let ttl = self.expiration.saturating_duration_since(now).as_millis();
        let lower = key_debug(self.lower());
        let upper = if self.upper().is_empty() {
            "<end>".to_string()
        } else {
            key_debug(self.upper())
        };
        match &self.kind {
            EntryKind::Tablet(t) => format!(
                "Tablet {{ id: {}, lower_bound: ({lower}), upper_bound: ({upper}), ttl: {ttl}ms }}",
                t.tablet_id()
            ),
            EntryKind::NonCoveredRange { .. } => format!(
                "NonCoveredRange {{ lower_bound: ({lower}), upper_bound: ({upper}), ttl: {ttl}ms }}"
            ),
        }
    }
}

/// Per-table ordered index keyed by entry lower bound.
type RangeIndex = BTreeMap<Bytes, MetaCacheEntry>;

/// The entry with the greatest lower bound at or below `key`.
fn floor_entry<'a>(entries: &'a RangeIndex, key: &[u8]) -> Option<&'a MetaCacheEntry> {
    entries
        .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
        .next_back()
        .map(|(_, e)| e)
}

/// Removes entries whose key (lower bound) falls in `[lower, upper)`;
/// `None` means to the end of the key space.
fn erase_range(entries: &mut RangeIndex, lower: &[u8], upper: Option<&[u8]>) {
    let doomed: Vec<Bytes> = entries
        .range::<[u8], _>((
            Bound::Included(lower),
            upper.map_or(Bound::Unbounded, Bound::Excluded),
        ))
        .map(|(k, _)| k.clone())
        .collect();
    for k in doomed {
        entries.remove(&k);
    }
}

#[derive(Default)]
struct CacheState {
    registry: ServerRegistry,
    /// Sole strong owner of every observed tablet.
    tablets_by_id: HashMap<String, Arc<RemoteTablet>>,
    /// By-id lookup entries; always tablet entries, never non-covered.
    entry_by_tablet_id: HashMap<String, MetaCacheEntry>,
    /// Per-table range indexes.
    tablets_by_table_and_key: HashMap<String, RangeIndex>,
}

impl CacheState {
    /// Rejects a response whose replica records cannot be resolved, before
    /// any index is touched. Keeps a failed merge from tearing the cache.
    fn validate_replicas(
        tablet_locations: &[TabletLocationsPb],
        ts_infos: &[TsInfoPb],
    ) -> Result<()> {
        for tablet in tablet_locations {
            for r in &tablet.deprecated_replicas {
                if r.ts_info.is_none() {
                    return Err(Error::Corruption(
                        "invalid response from master: replica record without server info"
                            .to_string(),
                    ));
                }
            }
            for r in &tablet.interned_replicas {
                let idx = r.ts_info_idx as usize;
                if idx >= ts_infos.len() {
                    return Err(Error::Corruption(format!(
                        "invalid response from master: referenced tserver index {idx} but only {} present",
                        ts_infos.len()
                    )));
                }
            }
        }
        Ok(())
    }

    fn upsert_servers(&mut self, tablet_locations: &[TabletLocationsPb], ts_infos: &[TsInfoPb]) {
        // Inline replica records first, then the interned server table.
        for tablet in tablet_locations {
            for r in &tablet.deprecated_replicas {
                if let Some(info) = &r.ts_info {
                    self.registry.upsert(info);
                }
            }
        }
        for info in ts_infos {
            self.registry.upsert(info);
        }
    }

    /// Merges a table locations response and returns the entry selected for
    /// `partition_key`.
    fn process_table_locations(
        &mut self,
        table: &TableIdent,
        partition_key: &[u8],
        lookup_type: LookupType,
        resp: &GetTableLocationsResponsePb,
        max_returned_locations: usize,
    ) -> Result<MetaCacheEntry> {
        let expiration = Instant::now() + Duration::from_millis(u64::from(resp.ttl_millis));
        Self::validate_replicas(&resp.tablet_locations, &resp.ts_infos)?;
        self.upsert_servers(&resp.tablet_locations, &resp.ts_infos);

        let tablet_locations = &resp.tablet_locations;
        if tablet_locations.is_empty() {
            // An empty response means the table has no tablets at all: the
            // request had no upper bound, and the master returns the
            // preceding tablet when the start key falls in a non-covered
            // range. Remember the whole key space as uncovered.
            let entries = self
                .tablets_by_table_and_key
                .entry(table.id().to_string())
                .or_default();
            entries.clear();
            let entry = MetaCacheEntry::non_covered(expiration, Bytes::new(), Bytes::new());
            trace!(table = %table, entry = %entry.debug_string(Instant::now()), "caching entry");
            entries.insert(Bytes::new(), entry);
        } else {
            let first_lower = tablet_locations[0]
                .partition
                .as_ref()
                .map(|p| p.partition_key_start.clone())
                .unwrap_or_default();

            let entries = self
                .tablets_by_table_and_key
                .entry(table.id().to_string())
                .or_default();

            if partition_key < first_lower.as_ref() {
                // The requested key precedes the first returned tablet, so
                // an initial non-covered range has been discovered.
                erase_range(entries, b"", Some(first_lower.as_ref()));
                let entry =
                    MetaCacheEntry::non_covered(expiration, Bytes::new(), first_lower.clone());
                trace!(table = %table, entry = %entry.debug_string(Instant::now()), "caching entry");
                entries.insert(Bytes::new(), entry);
            }

            // Tracks the upper bound of the previously processed tablet, to
            // detect non-covered ranges between tablets.
            let mut last_upper = first_lower;
            for tablet in tablet_locations {
                let partition = tablet.partition.clone().unwrap_or_default();
                let tablet_lower = partition.partition_key_start.clone();
                let tablet_upper = partition.partition_key_end.clone();

                if last_upper < tablet_lower {
                    erase_range(entries, last_upper.as_ref(), Some(tablet_lower.as_ref()));
                    let entry = MetaCacheEntry::non_covered(
                        expiration,
                        last_upper.clone(),
                        tablet_lower.clone(),
                    );
                    trace!(table = %table, entry = %entry.debug_string(Instant::now()), "caching entry");
                    entries.insert(last_upper.clone(), entry);
                }
                last_upper = tablet_upper.clone();

                let tablet_id = tablet.tablet_id.as_str();
                if let Some(remote) = self.tablets_by_id.get(tablet_id).cloned() {
                    // A known tablet is refreshed in place so live handles
                    // keep observing the same object. Partitions never
                    // change for a given tablet id.
                    debug_assert_eq!(tablet_lower, *remote.partition().lower());
                    debug_assert_eq!(tablet_upper, *remote.partition().upper());
                    trace!(tablet = %tablet_id, "refreshing tablet");
                    remote
                        .refresh(&self.registry, tablet, &resp.ts_infos)
                        .map_err(|e| {
                            e.context(format!("failed to refresh locations for tablet {tablet_id}"))
                        })?;
                    match entries.get_mut(tablet_lower.as_ref()) {
                        Some(entry) => {
                            debug_assert!(!entry.is_non_covered_range());
                            debug_assert_eq!(tablet_upper, *entry.upper());
                            entry.refresh_expiration(expiration);
                        }
                        None => {
                            // The tablet is known but not indexed by key.
                            // This happens when the entry was removed after
                            // its range was dropped and a scan token with
                            // stale location info re-observes it; index it
                            // again, clearing anything covering its span.
                            erase_range(
                                entries,
                                tablet_lower.as_ref(),
                                (!tablet_upper.is_empty()).then_some(tablet_upper.as_ref()),
                            );
                            let entry = MetaCacheEntry::tablet_entry(expiration, remote);
                            trace!(
                                table = %table,
                                entry = %entry.debug_string(Instant::now()),
                                "caching entry"
                            );
                            entries.insert(tablet_lower, entry);
                        }
                    }
                    continue;
                }

                erase_range(
                    entries,
                    tablet_lower.as_ref(),
                    (!tablet_upper.is_empty()).then_some(tablet_upper.as_ref()),
                );
                let remote = Arc::new(RemoteTablet::new(
                    tablet_id,
                    Partition::from_pb(&partition),
                ));
                remote
                    .refresh(&self.registry, tablet, &resp.ts_infos)
                    .map_err(|e| {
                        e.context(format!("failed to refresh locations for tablet {tablet_id}"))
                    })?;
                let entry = MetaCacheEntry::tablet_entry(expiration, Arc::clone(&remote));
                trace!(table = %table, entry = %entry.debug_string(Instant::now()), "caching entry");
                self.tablets_by_id.insert(tablet_id.to_string(), remote);
                entries.insert(tablet_lower, entry);
            }

            if !last_upper.is_empty() && tablet_locations.len() < max_returned_locations {
                // Fewer tablets than requested signals exhaustion: the space
                // past the last tablet is a trailing non-covered range.
                erase_range(entries, last_upper.as_ref(), None);
                let entry =
                    MetaCacheEntry::non_covered(expiration, last_upper.clone(), Bytes::new());
                trace!(table = %table, entry = %entry.debug_string(Instant::now()), "caching entry");
                entries.insert(last_upper, entry);
            }
        }

        // Select the discovered entry for the requestor.
        let entries = self
            .tablets_by_table_and_key
            .get(table.id())
            .expect("range index was just populated");
        let mut entry = floor_entry(entries, partition_key)
            .expect("merged response leaves no floor entry for the lookup key")
            .clone();
        if lookup_type == LookupType::LowerBound
            && entry.is_non_covered_range()
            && !entry.upper().is_empty()
        {
            let upper = entry.upper().clone();
            entry = floor_entry(entries, &upper)
                .expect("non-covered entry has no adjacent tablet")
                .clone();
            debug_assert!(!entry.is_non_covered_range());
        }
        Ok(entry)
    }

    /// Merges a single-tablet locations response fetched by id.
    fn process_tablet_locations(
        &mut self,
        tablet_id: &str,
        resp: &GetTabletLocationsResponsePb,
        ttl: Duration,
    ) -> Result<Arc<RemoteTablet>> {
        let expiration = Instant::now() + ttl;
        let tablet_locations = &resp.tablet_locations;
        if tablet_locations.is_empty() {
            return Err(Error::NotFound(format!("tablet {tablet_id} not found")));
        }
        debug_assert_eq!(1, tablet_locations.len());
        let tablet = &tablet_locations[0];
        debug_assert_eq!(tablet_id, tablet.tablet_id);

        Self::validate_replicas(std::slice::from_ref(tablet), &resp.ts_infos)?;
        self.upsert_servers(std::slice::from_ref(tablet), &resp.ts_infos);

        let partition = tablet.partition.clone().unwrap_or_default();
        let remote = match self.tablets_by_id.get(tablet_id).cloned() {
            Some(remote) => {
                debug_assert_eq!(partition.partition_key_start, *remote.partition().lower());
                debug_assert_eq!(partition.partition_key_end, *remote.partition().upper());
                trace!(tablet = %tablet_id, "refreshing tablet");
                remote
                    .refresh(&self.registry, tablet, &resp.ts_infos)
                    .map_err(|e| {
                        e.context(format!("failed to refresh locations for tablet {tablet_id}"))
                    })?;
                remote
            }
            None => {
                let remote = Arc::new(RemoteTablet::new(
                    tablet_id,
                    Partition::from_pb(&partition),
                ));
                remote
                    .refresh(&self.registry, tablet, &resp.ts_infos)
                    .map_err(|e| {
                        e.context(format!("failed to refresh locations for tablet {tablet_id}"))
                    })?;
                trace!(tablet = %tablet_id, "caching tablet entry");
                self.tablets_by_id
                    .insert(tablet_id.to_string(), Arc::clone(&remote));
                remote
            }
        };

        self.entry_by_tablet_id
            .entry(tablet_id.to_string())
            .and_modify(|e| e.refresh_expiration(expiration))
            .or_insert_with(|| MetaCacheEntry::tablet_entry(expiration, Arc::clone(&remote)));
        Ok(remote)
    }
}

enum FastPath {
    Hit(Arc<RemoteTablet>),
    /// The key falls in a known non-covered range; carries the entry's
    /// rendered description.
    NotCovered(String),
    Miss,
}

/// Client-side cache of tablet locations for a tablet store.
///
/// Owns the interned server registry, every observed tablet, and the
/// per-table range indexes. All state lives behind one reader-writer lock;
/// response merging takes it exclusively, everything else shared.
pub struct MetaCache {
    state: RwLock<CacheState>,
    master: Arc<dyn MasterClient>,
    master_lookup_permits: Semaphore,
    ctx: ClientContext,
}

impl MetaCache {
    pub fn new(config: Arc<Config>, master: Arc<dyn MasterClient>) -> Arc<Self> {
        Self::with_transport(
            config,
            master,
            Arc::new(TokioHostResolver),
            Arc::new(DefaultProxyFactory),
        )
    }

    /// Builds a cache with explicit resolver and proxy-factory seams.
    pub fn with_transport(
        config: Arc<Config>,
        master: Arc<dyn MasterClient>,
        resolver: Arc<dyn HostResolver>,
        proxy_factory: Arc<dyn ProxyFactory>,
    ) -> Arc<Self> {
        let permits = config.max_concurrent_master_lookups();
        Arc::new(Self {
            state: RwLock::new(CacheState::default()),
            master,
            master_lookup_permits: Semaphore::new(permits),
            ctx: ClientContext {
                config,
                resolver,
                proxy_factory,
            },
        })
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// Looks up the tablet covering `partition_key`, consulting the master
    /// on a cache miss.
    ///
    /// A `Point` lookup on a key in a non-covered range returns `NotFound`;
    /// a `LowerBound` lookup skips ahead to the next covered tablet and only
    /// returns `NotFound` when nothing follows.
    pub async fn lookup_tablet_by_key(
        &self,
        table: &TableIdent,
        partition_key: impl Into<Bytes>,
        deadline: Instant,
        lookup_type: LookupType,
    ) -> Result<Arc<RemoteTablet>> {
        let mut partition_key = partition_key.into();
        let mut permit: Option<SemaphorePermit<'_>> = None;
        let mut attempt: u32 = 0;
        let backoff = self.ctx.config.lookup_backoff();

        loop {
            match self.fast_path_by_key(table, &mut partition_key, lookup_type) {
                FastPath::Hit(tablet) => return Ok(tablet),
                FastPath::NotCovered(desc) => {
                    return Err(Error::NotFound(format!(
                        "no tablet covering the requested range partition: {desc}"
                    )));
                }
                FastPath::Miss => {}
            }
            attempt += 1;
            let desc = format!(
                "LookupRpc {{ table: '{}', partition-key: ({}), attempt: {attempt} }}",
                table.name(),
                key_debug(&partition_key)
            );

            if permit.is_none() {
                match self.master_lookup_permits.try_acquire() {
                    Ok(p) => permit = Some(p),
                    Err(_) => {
                        // No capacity for another master lookup; hold off
                        // and re-enter (a permit may free up, or a
                        // concurrent merge may satisfy the fast path).
                        let pending = Error::TimedOut(
                            "client has too many outstanding requests to the master".to_string(),
                        );
                        sleep_or_deadline(deadline, linear_backoff(attempt, backoff), pending)
                            .await
                            .map_err(|e| e.context(format!("{desc} failed")))?;
                        continue;
                    }
                }
            }

            debug!(table = %table, key = %key_debug(&partition_key), "refreshing metadata from the master");
            let req = GetTableLocationsRequestPb {
                table_id: table.id().to_string(),
                partition_key_start: partition_key.clone(),
                // No upper bound, so the master prefetches past the key.
                partition_key_end: Bytes::new(),
                max_returned_locations: locations_to_fetch(lookup_type),
                intern_ts_infos_in_response: true,
                replica_type_filter: if self.ctx.config.include_non_voter_replicas() {
                    ReplicaTypeFilter::AnyReplica as i32
                } else {
                    ReplicaTypeFilter::VoterReplica as i32
                },
            };

            let err = match self.master.get_table_locations(req).await {
                Ok(resp) => match resp.error() {
                    Some(pb) => response_error(pb),
                    None => {
                        let entry = {
                            let mut state = self.state.write().unwrap();
                            state.process_table_locations(
                                table,
                                &partition_key,
                                lookup_type,
                                &resp,
                                locations_to_fetch(lookup_type) as usize,
                            )
                        }
                        .map_err(|e| e.context(format!("{desc} failed")))?;
                        return match entry.tablet() {
                            Some(tablet) => Ok(Arc::clone(tablet)),
                            None => Err(Error::NotFound(format!(
                                "no tablet covering the requested range partition: {}",
                                entry.debug_string(Instant::now())
                            ))),
                        };
                    }
                },
                Err(e) => e,
            };

            match retry_decision(&err) {
                RetryDecision::LeaderChange => {
                    debug!(%err, "master leadership changed, re-resolving the leader");
                    self.master.reconnect_to_leader().await;
                }
                RetryDecision::Transient => {
                    debug!(attempt, %err, "retrying master lookup");
                }
                RetryDecision::Terminal => {
                    let wrapped = err.context(format!("{desc} failed"));
                    warn_terminal(&wrapped);
                    return Err(wrapped);
                }
            }
            let pending =
                Error::TimedOut(format!("deadline exceeded after {attempt} attempts: {err}"));
            sleep_or_deadline(deadline, linear_backoff(attempt, backoff), pending)
                .await
                .map_err(|e| e.context(format!("{desc} failed")))?;
        }
    }

    /// Looks up a tablet by id, consulting the master on a cache miss.
    /// By-id entries use the configured TTL rather than a response TTL.
    pub async fn lookup_tablet_by_id(
        &self,
        tablet_id: &str,
        deadline: Instant,
    ) -> Result<Arc<RemoteTablet>> {
        let mut permit: Option<SemaphorePermit<'_>> = None;
        let mut attempt: u32 = 0;
        let backoff = self.ctx.config.lookup_backoff();

        loop {
            if let Some(tablet) = self.fast_path_by_id(tablet_id) {
                return Ok(tablet);
            }
            attempt += 1;
            let desc = format!("LookupRpcById {{ tablet: '{tablet_id}', attempt: {attempt} }}");

            if permit.is_none() {
                match self.master_lookup_permits.try_acquire() {
                    Ok(p) => permit = Some(p),
                    Err(_) => {
                        let pending = Error::TimedOut(
                            "client has too many outstanding requests to the master".to_string(),
                        );
                        sleep_or_deadline(deadline, linear_backoff(attempt, backoff), pending)
                            .await
                            .map_err(|e| e.context(format!("{desc} failed")))?;
                        continue;
                    }
                }
            }

            debug!(tablet = %tablet_id, "refreshing tablet locations from the master");
            let req = GetTabletLocationsRequestPb {
                tablet_ids: vec![tablet_id.to_string()],
                intern_ts_infos_in_response: true,
            };

            let err = match self.master.get_tablet_locations(req).await {
                Ok(resp) => match resp.error() {
                    Some(pb) => response_error(pb),
                    None => {
                        let ttl = self.ctx.config.tablet_locations_by_id_ttl();
                        let tablet = {
                            let mut state = self.state.write().unwrap();
                            state.process_tablet_locations(tablet_id, &resp, ttl)
                        }
                        .map_err(|e| e.context(format!("{desc} failed")))?;
                        return Ok(tablet);
                    }
                },
                Err(e) => e,
            };

            match retry_decision(&err) {
                RetryDecision::LeaderChange => {
                    debug!(%err, "master leadership changed, re-resolving the leader");
                    self.master.reconnect_to_leader().await;
                }
                RetryDecision::Transient => {
                    debug!(attempt, %err, "retrying master lookup");
                }
                RetryDecision::Terminal => {
                    let wrapped = err.context(format!("{desc} failed"));
                    warn_terminal(&wrapped);
                    return Err(wrapped);
                }
            }
            let pending =
                Error::TimedOut(format!("deadline exceeded after {attempt} attempts: {err}"));
            sleep_or_deadline(deadline, linear_backoff(attempt, backoff), pending)
                .await
                .map_err(|e| e.context(format!("{desc} failed")))?;
        }
    }

    /// Marks every replica hosted by `server`, across all cached tablets, as
    /// failed.
    pub fn mark_ts_failed(&self, server: &Arc<RemoteTabletServer>, status: &Error) {
        info!(server = %server, "marking tablet server as failed");
        let status = status.clone().context("TS failed");
        let state = self.state.read().unwrap();
        for tablet in state.tablets_by_id.values() {
            // Tablets without a replica on this server ignore the mark.
            tablet.mark_replica_failed(server, &status);
        }
    }

    /// Drops everything: servers, tablets, and both indexes. Outstanding
    /// handles keep their objects alive but will no longer see refreshes.
    pub fn clear_cache(&self) {
        debug!("clearing cache");
        *self.state.write().unwrap() = CacheState::default();
    }

    /// Drops the remembered non-covered ranges of one table, forcing the
    /// next lookup in those ranges back to the master.
    pub fn clear_non_covered_range_entries(&self, table_id: &str) {
        debug!(table = %table_id, "clearing non-covered range entries");
        let mut state = self.state.write().unwrap();
        if let Some(entries) = state.tablets_by_table_and_key.get_mut(table_id) {
            entries.retain(|_, e| !e.is_non_covered_range());
        }
    }

    /// Ensures `server` has a ready proxy pair, resolving and constructing
    /// it if needed.
    pub async fn init_server_proxy(&self, server: &Arc<RemoteTabletServer>) -> Result<ProxyPair> {
        server.init_proxy(&self.ctx).await
    }

    fn fast_path_by_key(
        &self,
        table: &TableIdent,
        partition_key: &mut Bytes,
        lookup_type: LookupType,
    ) -> FastPath {
        let now = Instant::now();
        let state = self.state.read().unwrap();
        let Some(entries) = state.tablets_by_table_and_key.get(table.id()) else {
            return FastPath::Miss;
        };
        loop {
            let Some(entry) = floor_entry(entries, partition_key) else {
                return FastPath::Miss;
            };
            if entry.is_stale_at(now) {
                return FastPath::Miss;
            }
            if !entry.contains(partition_key) {
                return FastPath::Miss;
            }
            match entry.tablet() {
                Some(tablet) => {
                    if !tablet.has_leader() {
                        return FastPath::Miss;
                    }
                    trace!(
                        table = %table,
                        entry = %entry.debug_string(now),
                        key = %key_debug(partition_key),
                        "fast lookup hit"
                    );
                    return FastPath::Hit(Arc::clone(tablet));
                }
                None => {
                    if lookup_type == LookupType::Point || entry.upper().is_empty() {
                        return FastPath::NotCovered(entry.debug_string(now));
                    }
                    // Skip over the gap and retry from its upper bound.
                    *partition_key = entry.upper().clone();
                }
            }
        }
    }

    fn fast_path_by_id(&self, tablet_id: &str) -> Option<Arc<RemoteTablet>> {
        let now = Instant::now();
        let state = self.state.read().unwrap();
        let entry = state.entry_by_tablet_id.get(tablet_id)?;
        if entry.is_stale_at(now) {
            return None;
        }
        let tablet = entry.tablet()?;
        if !tablet.has_leader() {
            return None;
        }
        Some(Arc::clone(tablet))
    }
}

impl std::fmt::Debug for MetaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap();
        f.debug_struct("MetaCache")
            .field("tablets", &state.tablets_by_id.len())
            .field("tables", &state.tablets_by_table_and_key.len())
            .finish_non_exhaustive()
    }
}
