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

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tracing::debug;

use crate::cache::MetaCache;
use crate::errors::Error;
use crate::server::RemoteTabletServer;
use crate::tablet::RemoteTablet;
use crate::{LookupType, Result, TableIdent};

/// Per-operation replica selection for one tablet.
///
/// Remembers which servers rejected this operation as non-leaders
/// (`followers`); that memory is scoped to the operation and cleared by any
/// metadata refresh, unlike the `failed` flag and roles, which live on the
/// tablet and outlast it.
pub struct ServerPicker {
    cache: Arc<MetaCache>,
    table: Option<TableIdent>,
    tablet: Arc<RemoteTablet>,
    followers: Mutex<HashSet<String>>,
}

impl ServerPicker {
    /// `table` gives refreshes a (table, partition-key) lookup to go
    /// through; without it, refreshes go by tablet id.
    pub fn new(
        cache: Arc<MetaCache>,
        table: Option<TableIdent>,
        tablet: Arc<RemoteTablet>,
    ) -> Self {
        Self {
            cache,
            table,
            tablet,
            followers: Mutex::new(HashSet::new()),
        }
    }

    pub fn tablet(&self) -> &Arc<RemoteTablet> {
        &self.tablet
    }

    /// Picks the server to send this operation to, with a ready proxy.
    ///
    /// The destination is chosen as follows:
    /// 1. If the tablet metadata is stale, refresh it (goto 5).
    /// 2. Select the leader, provided it is known, it has not failed, and it
    ///    is not currently marked as a follower for this operation.
    /// 3. A known leader marked as a follower is demoted in the cache so
    ///    concurrent pickers see the demotion, then dropped from
    ///    consideration.
    /// 4. With no good leader, the first live replica that has not rejected
    ///    this operation is chosen and preemptively marked as the leader, so
    ///    the selection sticks until the next refresh.
    /// 5. With no candidate left, a master lookup is forced to fetch fresh
    ///    consensus information; its result is irrelevant, only the side
    ///    effect matters.
    /// 6. A refresh clears the follower memory, then selection restarts.
    /// 7. (Caller feedback between picks: `mark_replica_not_leader`,
    ///    `mark_server_failed`, `mark_resource_not_found`.)
    /// 8. The chosen server's proxy is initialized before it is returned.
    pub async fn pick_leader(&self, deadline: Instant) -> Result<Arc<RemoteTabletServer>> {
        loop {
            let Some(server) = self.try_pick() else {
                self.refresh_metadata(deadline).await?;
                continue;
            };
            self.cache.init_server_proxy(&server).await?;
            return Ok(server);
        }
    }

    /// Selection steps 1-4; returns no candidate when a refresh is needed.
    fn try_pick(&self) -> Option<Arc<RemoteTabletServer>> {
        if self.tablet.is_stale() {
            return None;
        }

        let mut leader = self.tablet.leader();
        if let Some(l) = &leader
            && self.followers.lock().unwrap().contains(l.uuid())
        {
            debug!(tablet = %self.tablet.tablet_id(), leader = %l, "picked leader rejected us as a follower");
            // Demote it in the cache so the next round (and concurrent
            // pickers) will not select it until a full refresh, and so the
            // by-key fast path stops short-circuiting on it.
            self.tablet.mark_as_follower(l);
            leader = None;
        }

        if leader.is_none() {
            // Guess the next leader: first live replica that has not
            // rejected this operation.
            let followers = self.followers.lock().unwrap().clone();
            leader = self
                .tablet
                .live_servers()
                .into_iter()
                .find(|ts| !followers.contains(ts.uuid()));
            if let Some(l) = &leader {
                debug!(
                    tablet = %self.tablet.tablet_id(),
                    server = %l,
                    "previous leader failed, preemptively marking replica as leader"
                );
                self.tablet.mark_as_leader(l);
            }
        }

        leader
    }

    /// Step 5/6: force a master lookup for fresh consensus information and
    /// clear the follower memory.
    async fn refresh_metadata(&self, deadline: Instant) -> Result<()> {
        let result = match &self.table {
            Some(table) => self
                .cache
                .lookup_tablet_by_key(
                    table,
                    self.tablet.partition().lower().clone(),
                    deadline,
                    LookupType::Point,
                )
                .await
                .map(drop),
            None => self
                .cache
                .lookup_tablet_by_id(self.tablet.tablet_id(), deadline)
                .await
                .map(drop),
        };
        // Fresh metadata supersedes the per-operation rejections, whether or
        // not the lookup worked.
        self.followers.lock().unwrap().clear();
        result
    }

    /// Caller feedback: `server` failed an operation with `status`.
    pub fn mark_server_failed(&self, server: &Arc<RemoteTabletServer>, status: &Error) {
        self.tablet.mark_replica_failed(server, status);
    }

    /// Caller feedback: `server` rejected the operation because it is not
    /// the leader.
    pub fn mark_replica_not_leader(&self, server: &Arc<RemoteTabletServer>) {
        self.followers
            .lock()
            .unwrap()
            .insert(server.uuid().to_string());
    }

    /// Caller feedback: `server` reported the tablet gone; the cached
    /// locations can no longer be trusted.
    pub fn mark_resource_not_found(&self, _server: &Arc<RemoteTabletServer>) {
        self.tablet.mark_stale();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetaCache;
    use crate::config::Config;
    use crate::master::test_support::ScriptedMaster;
    use crate::server::test_support::{CountingFactory, StaticResolver, ts_info};
    use crate::tablet::test_support::interned_locs;
    use quarry_common::proto::{GetTableLocationsResponsePb, RaftRole, TsInfoPb};
    use std::time::Duration;

    fn infos(uuids: &[&str]) -> Vec<TsInfoPb> {
        uuids
            .iter()
            .enumerate()
            .map(|(i, u)| ts_info(u, "127.0.0.1", 7050 + i as u16))
            .collect()
    }

    fn locations(roles: &[(&str, RaftRole)], uuids: &[&str]) -> GetTableLocationsResponsePb {
        let replicas: Vec<(u32, RaftRole)> = roles
            .iter()
            .map(|(uuid, role)| {
                let idx = uuids.iter().position(|u| u == uuid).unwrap() as u32;
                (idx, *role)
            })
            .collect();
        GetTableLocationsResponsePb {
            error: None,
            tablet_locations: vec![interned_locs("t1", b"a", b"m", &replicas)],
            ttl_millis: 60_000,
            ts_infos: infos(uuids),
        }
    }

    fn table() -> TableIdent {
        TableIdent::new("table-id-1", "t")
    }

    async fn picker_with(
        master: Arc<ScriptedMaster>,
    ) -> (Arc<MetaCache>, ServerPicker) {
        let cache = MetaCache::with_transport(
            Config::builder().build(),
            master,
            Arc::new(StaticResolver("127.0.0.1:7050".parse().unwrap())),
            Arc::new(CountingFactory::default()),
        );
        let deadline = Instant::now() + Duration::from_secs(10);
        let tablet = cache
            .lookup_tablet_by_key(&table(), b"b".as_ref(), deadline, LookupType::Point)
            .await
            .unwrap();
        let picker = ServerPicker::new(Arc::clone(&cache), Some(table()), tablet);
        (cache, picker)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_pick_prefers_known_leader() {
        let master = Arc::new(ScriptedMaster::default());
        master.push_table_response(Ok(locations(
            &[
                ("s1", RaftRole::Leader),
                ("s2", RaftRole::Follower),
                ("s3", RaftRole::Follower),
            ],
            &["s1", "s2", "s3"],
        )));
        let (_cache, picker) = picker_with(Arc::clone(&master)).await;

        let picked = picker.pick_leader(deadline()).await.unwrap();
        assert_eq!("s1", picked.uuid());
        // A ready proxy pair was installed on the way out.
        assert!(picked.proxies().is_some());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_failover_walks_live_replicas_in_order() {
        let master = Arc::new(ScriptedMaster::default());
        master.push_table_response(Ok(locations(
            &[
                ("s1", RaftRole::Leader),
                ("s2", RaftRole::Follower),
                ("s3", RaftRole::Follower),
            ],
            &["s1", "s2", "s3"],
        )));
        let (_cache, picker) = picker_with(Arc::clone(&master)).await;

        let first = picker.pick_leader(deadline()).await.unwrap();
        assert_eq!("s1", first.uuid());

        // The write to s1 failed outright.
        picker.mark_server_failed(&first, &Error::NetworkError("connection refused".into()));
        assert_eq!(1, picker.tablet().failed_replica_count());

        // Fallback picks the first live replica and promotes it.
        let second = picker.pick_leader(deadline()).await.unwrap();
        assert_eq!("s2", second.uuid());
        assert_eq!("s2", picker.tablet().leader().unwrap().uuid());

        // s2 turned out to be a follower.
        picker.mark_replica_not_leader(&second);
        let third = picker.pick_leader(deadline()).await.unwrap();
        assert_eq!("s3", third.uuid());
        // The rejected pick was demoted in the shared view.
        assert_eq!("s3", picker.tablet().leader().unwrap().uuid());

        // No master refresh was needed for any of this.
        assert_eq!(1, master.table_request_count());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_staleness_forces_refresh_and_clears_followers() {
        let master = Arc::new(ScriptedMaster::default());
        master.push_table_response(Ok(locations(
            &[
                ("s2", RaftRole::Leader),
                ("s3", RaftRole::Follower),
            ],
            &["s2", "s3"],
        )));
        let (_cache, picker) = picker_with(Arc::clone(&master)).await;

        // Remember a rejection, then learn the tablet is gone from its
        // server.
        let s2 = picker.tablet().leader().unwrap();
        picker.mark_replica_not_leader(&s2);
        picker.mark_resource_not_found(&s2);
        assert!(picker.tablet().is_stale());

        // The refresh reports s2 as leader again; with the follower memory
        // cleared, s2 is pickable.
        master.push_table_response(Ok(locations(
            &[
                ("s2", RaftRole::Leader),
                ("s3", RaftRole::Follower),
                ("s4", RaftRole::Follower),
            ],
            &["s2", "s3", "s4"],
        )));
        let picked = picker.pick_leader(deadline()).await.unwrap();
        assert_eq!("s2", picked.uuid());
        assert!(!picker.tablet().is_stale());
        assert_eq!(2, master.table_request_count());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_all_replicas_rejected_forces_refresh() {
        let master = Arc::new(ScriptedMaster::default());
        master.push_table_response(Ok(locations(
            &[("s1", RaftRole::Leader), ("s2", RaftRole::Follower)],
            &["s1", "s2"],
        )));
        let (_cache, picker) = picker_with(Arc::clone(&master)).await;

        let first = picker.pick_leader(deadline()).await.unwrap();
        picker.mark_replica_not_leader(&first);
        let second = picker.pick_leader(deadline()).await.unwrap();
        assert_ne!(first.uuid(), second.uuid());
        picker.mark_replica_not_leader(&second);

        // Every replica has rejected the operation; the next pick must go
        // back to the master, and the cleared memory makes s1 pickable
        // again.
        master.push_table_response(Ok(locations(
            &[("s1", RaftRole::Leader), ("s2", RaftRole::Follower)],
            &["s1", "s2"],
        )));
        let third = picker.pick_leader(deadline()).await.unwrap();
        assert_eq!("s1", third.uuid());
        assert_eq!(2, master.table_request_count());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_refresh_by_id_without_table_context() {
        let master = Arc::new(ScriptedMaster::default());
        master.push_table_response(Ok(locations(
            &[("s1", RaftRole::Leader)],
            &["s1"],
        )));
        let (cache, picker) = picker_with(Arc::clone(&master)).await;
        let tablet = Arc::clone(picker.tablet());

        // A picker constructed without a table refreshes by tablet id.
        let by_id = ServerPicker::new(cache, None, tablet);
        by_id.tablet().mark_stale();
        master.push_tablet_response(Ok(quarry_common::proto::GetTabletLocationsResponsePb {
            error: None,
            tablet_locations: vec![interned_locs(
                "t1",
                b"a",
                b"m",
                &[(0, RaftRole::Leader)],
            )],
            ts_infos: infos(&["s1"]),
        }));

        let picked = by_id.pick_leader(deadline()).await.unwrap();
        assert_eq!("s1", picked.uuid());
        assert_eq!(1, master.tablet_requests.lock().unwrap().len());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_failed_refresh_propagates() {
        let master = Arc::new(ScriptedMaster::default());
        master.push_table_response(Ok(locations(
            &[("s1", RaftRole::Leader)],
            &["s1"],
        )));
        let (_cache, picker) = picker_with(Arc::clone(&master)).await;

        picker.tablet().mark_stale();
        master.push_table_response(Err(Error::Corruption("scripted".into())));
        let err = picker.pick_leader(deadline()).await.unwrap_err();
        assert!(err.is_corruption(), "{err:?}");
    }
}
