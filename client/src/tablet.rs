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

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tracing::{trace, warn};

use quarry_common::proto::{PartitionPb, RaftRole, TabletLocationsPb, TsInfoPb};

use crate::Result;
use crate::errors::Error;
use crate::server::{RemoteTabletServer, ServerRegistry};
use crate::util::LogThrottle;

const REPLICA_FAILED_WARN_INTERVAL: Duration = Duration::from_secs(1);

/// Role a replica plays in its tablet's consensus group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaRole {
    Unknown,
    Follower,
    Leader,
    Learner,
    NonVoter,
}

impl ReplicaRole {
    fn from_wire(raw: i32) -> Self {
        match RaftRole::try_from(raw) {
            Ok(RaftRole::Follower) => ReplicaRole::Follower,
            Ok(RaftRole::Leader) => ReplicaRole::Leader,
            Ok(RaftRole::Learner) => ReplicaRole::Learner,
            Ok(RaftRole::NonVoter) => ReplicaRole::NonVoter,
            Ok(RaftRole::UnknownRole) | Err(_) => ReplicaRole::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReplicaRole::Unknown => "UNKNOWN",
            ReplicaRole::Follower => "FOLLOWER",
            ReplicaRole::Leader => "LEADER",
            ReplicaRole::Learner => "LEARNER",
            ReplicaRole::NonVoter => "NON_VOTER",
        }
    }
}

#[derive(Clone)]
pub struct Replica {
    pub server: Arc<RemoteTabletServer>,
    pub role: ReplicaRole,
    pub failed: bool,
}

impl fmt::Debug for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.server.uuid(),
            self.role.as_str(),
            if self.failed { "FAILED" } else { "OK" }
        )
    }
}

/// Half-open partition key interval `[lower, upper)`. An empty bound is
/// unbounded on that side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    lower: Bytes,
    upper: Bytes,
}

impl Partition {
    pub fn new(lower: impl Into<Bytes>, upper: impl Into<Bytes>) -> Self {
        Self {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    pub(crate) fn from_pb(pb: &PartitionPb) -> Self {
        Self {
            lower: pb.partition_key_start.clone(),
            upper: pb.partition_key_end.clone(),
        }
    }

    pub fn lower(&self) -> &Bytes {
        &self.lower
    }

    pub fn upper(&self) -> &Bytes {
        &self.upper
    }

    pub fn is_unbounded_upper(&self) -> bool {
        self.upper.is_empty()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.lower.as_ref() <= key && (self.upper.is_empty() || key < self.upper.as_ref())
    }
}

/// Cached per-tablet state: the immutable partition bounds and the mutable
/// replica list.
///
/// A tablet is created on first observation and refreshed in place from then
/// on, so handles held outside the cache keep seeing location updates.
pub struct RemoteTablet {
    tablet_id: String,
    partition: Partition,
    replicas: Mutex<Vec<Replica>>,
    stale: AtomicBool,
    failed_warn: LogThrottle,
}

impl RemoteTablet {
    pub(crate) fn new(tablet_id: impl Into<String>, partition: Partition) -> Self {
        Self {
            tablet_id: tablet_id.into(),
            partition,
            replicas: Mutex::new(Vec::new()),
            stale: AtomicBool::new(false),
            failed_warn: LogThrottle::new(),
        }
    }

    pub fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Replaces the replica list from a location record, resolving servers
    /// through the registry. Accepts both the inline (deprecated) and the
    /// interned wire forms. Readers see either the old list or the new one,
    /// never a mix. Clears the stale flag on success.
    pub(crate) fn refresh(
        &self,
        registry: &ServerRegistry,
        locs: &TabletLocationsPb,
        ts_info_dict: &[TsInfoPb],
    ) -> Result<()> {
        let mut replicas =
            Vec::with_capacity(locs.deprecated_replicas.len() + locs.interned_replicas.len());

        for r in &locs.deprecated_replicas {
            let Some(info) = &r.ts_info else {
                return Err(Error::Corruption(
                    "invalid response from master: replica record without server info".to_string(),
                ));
            };
            replicas.push(Replica {
                server: self.registered_server(registry, &info.permanent_uuid)?,
                role: ReplicaRole::from_wire(r.role),
                failed: false,
            });
        }

        for r in &locs.interned_replicas {
            let idx = r.ts_info_idx as usize;
            let Some(info) = ts_info_dict.get(idx) else {
                return Err(Error::Corruption(format!(
                    "invalid response from master: referenced tserver index {idx} but only {} present",
                    ts_info_dict.len()
                )));
            };
            replicas.push(Replica {
                server: self.registered_server(registry, &info.permanent_uuid)?,
                role: ReplicaRole::from_wire(r.role),
                failed: false,
            });
        }

        *self.replicas.lock().unwrap() = replicas;
        self.stale.store(false, Ordering::Release);
        Ok(())
    }

    fn registered_server(
        &self,
        registry: &ServerRegistry,
        uuid: &str,
    ) -> Result<Arc<RemoteTabletServer>> {
        registry.get(uuid).ok_or_else(|| {
            Error::Corruption(format!(
                "tablet {} references tablet server {uuid} absent from the registry",
                self.tablet_id
            ))
        })
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Marks every replica hosted by `server` as failed.
    pub fn mark_replica_failed(&self, server: &Arc<RemoteTabletServer>, status: &Error) {
        let mut replicas = self.replicas.lock().unwrap();
        trace!(
            tablet = %self.tablet_id,
            replicas = %render_replicas(&replicas),
            "current remote replicas in meta cache"
        );
        let mut marked = false;
        for rep in replicas.iter_mut() {
            if Arc::ptr_eq(&rep.server, server) {
                rep.failed = true;
                marked = true;
            }
        }
        if marked && self.failed_warn.should_log(REPLICA_FAILED_WARN_INTERVAL) {
            warn!(
                tablet = %self.tablet_id,
                replica = %server,
                %status,
                "replica has failed"
            );
        }
    }

    pub fn failed_replica_count(&self) -> usize {
        self.replicas
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.failed)
            .count()
    }

    /// The first live replica in the LEADER role, if any.
    pub fn leader(&self) -> Option<Arc<RemoteTabletServer>> {
        self.replicas
            .lock()
            .unwrap()
            .iter()
            .find(|r| !r.failed && r.role == ReplicaRole::Leader)
            .map(|r| Arc::clone(&r.server))
    }

    pub fn has_leader(&self) -> bool {
        self.leader().is_some()
    }

    /// Servers of non-failed replicas, in the order the master reported
    /// them. Callers rely on this order for deterministic fallback.
    pub fn live_servers(&self) -> Vec<Arc<RemoteTabletServer>> {
        self.replicas
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.failed)
            .map(|r| Arc::clone(&r.server))
            .collect()
    }

    pub fn live_replicas(&self) -> Vec<Replica> {
        self.replicas
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.failed)
            .cloned()
            .collect()
    }

    /// Marks `server`'s replica as the leader, demoting any previous leader
    /// to follower. Idempotent.
    pub fn mark_as_leader(&self, server: &Arc<RemoteTabletServer>) {
        let mut replicas = self.replicas.lock().unwrap();
        for rep in replicas.iter_mut() {
            if Arc::ptr_eq(&rep.server, server) {
                rep.role = ReplicaRole::Leader;
            } else if rep.role == ReplicaRole::Leader {
                rep.role = ReplicaRole::Follower;
            }
        }
        trace!(tablet = %self.tablet_id, replicas = %render_replicas(&replicas), "latest replicas");
    }

    pub fn mark_as_follower(&self, server: &Arc<RemoteTabletServer>) {
        let mut replicas = self.replicas.lock().unwrap();
        for rep in replicas.iter_mut() {
            if Arc::ptr_eq(&rep.server, server) {
                rep.role = ReplicaRole::Follower;
            }
        }
        trace!(tablet = %self.tablet_id, replicas = %render_replicas(&replicas), "latest replicas");
    }

    pub fn replicas_as_string(&self) -> String {
        render_replicas(&self.replicas.lock().unwrap())
    }
}

impl fmt::Debug for RemoteTablet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTablet")
            .field("tablet_id", &self.tablet_id)
            .field("partition", &self.partition)
            .field("stale", &self.is_stale())
            .finish_non_exhaustive()
    }
}

fn render_replicas(replicas: &[Replica]) -> String {
    let mut out = String::new();
    for rep in replicas {
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(&format!("{rep:?}"));
    }
    out
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use quarry_common::proto::{DeprecatedReplicaPb, InternedReplicaPb};

    pub(crate) fn partition_pb(lower: &[u8], upper: &[u8]) -> PartitionPb {
        PartitionPb {
            partition_key_start: Bytes::copy_from_slice(lower),
            partition_key_end: Bytes::copy_from_slice(upper),
        }
    }

    pub(crate) fn interned_locs(
        tablet_id: &str,
        lower: &[u8],
        upper: &[u8],
        replicas: &[(u32, RaftRole)],
    ) -> TabletLocationsPb {
        TabletLocationsPb {
            tablet_id: tablet_id.to_string(),
            partition: Some(partition_pb(lower, upper)),
            deprecated_replicas: vec![],
            interned_replicas: replicas
                .iter()
                .map(|&(idx, role)| InternedReplicaPb {
                    ts_info_idx: idx,
                    role: role as i32,
                })
                .collect(),
        }
    }

    pub(crate) fn inline_locs(
        tablet_id: &str,
        lower: &[u8],
        upper: &[u8],
        replicas: &[(TsInfoPb, RaftRole)],
    ) -> TabletLocationsPb {
        TabletLocationsPb {
            tablet_id: tablet_id.to_string(),
            partition: Some(partition_pb(lower, upper)),
            deprecated_replicas: replicas
                .iter()
                .map(|(info, role)| DeprecatedReplicaPb {
                    ts_info: Some(info.clone()),
                    role: *role as i32,
                })
                .collect(),
            interned_replicas: vec![],
        }
    }
}
