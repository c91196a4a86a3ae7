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

//! Shared helpers for the integration tests: a scripted master standing in
//! for the real location service, and response builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use quarry_client::errors::Error;
use quarry_client::{MasterClient, Result, TableIdent};
use quarry_common::proto::{
    AppStatusPb, GetTableLocationsRequestPb, GetTableLocationsResponsePb,
    GetTabletLocationsRequestPb, GetTabletLocationsResponsePb, HostPortPb, InternedReplicaPb,
    MasterErrorPb, PartitionPb, RaftRole, TabletLocationsPb, TsInfoPb, app_status, master_error,
};

pub fn table() -> TableIdent {
    TableIdent::new("table-id-1", "t")
}

pub fn ts_info(uuid: &str, port: u16) -> TsInfoPb {
    TsInfoPb {
        permanent_uuid: uuid.to_string(),
        rpc_addresses: vec![HostPortPb {
            host: "127.0.0.1".to_string(),
            port: u32::from(port),
        }],
        location: String::new(),
        unix_domain_socket_path: None,
    }
}

pub fn ts_infos(uuids: &[&str]) -> Vec<TsInfoPb> {
    uuids
        .iter()
        .enumerate()
        .map(|(i, u)| ts_info(u, 7050 + i as u16))
        .collect()
}

pub fn tablet(
    id: &str,
    lower: &[u8],
    upper: &[u8],
    replicas: &[(u32, RaftRole)],
) -> TabletLocationsPb {
    TabletLocationsPb {
        tablet_id: id.to_string(),
        partition: Some(PartitionPb {
            partition_key_start: bytes::Bytes::copy_from_slice(lower),
            partition_key_end: bytes::Bytes::copy_from_slice(upper),
        }),
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

pub fn table_response(
    ttl_millis: u32,
    tablets: Vec<TabletLocationsPb>,
    uuids: &[&str],
) -> GetTableLocationsResponsePb {
    GetTableLocationsResponsePb {
        error: None,
        tablet_locations: tablets,
        ttl_millis,
        ts_infos: ts_infos(uuids),
    }
}

pub fn tablet_response(
    tablets: Vec<TabletLocationsPb>,
    uuids: &[&str],
) -> GetTabletLocationsResponsePb {
    GetTabletLocationsResponsePb {
        error: None,
        tablet_locations: tablets,
        ts_infos: ts_infos(uuids),
    }
}

pub fn unavailable_response() -> GetTableLocationsResponsePb {
    GetTableLocationsResponsePb {
        error: Some(MasterErrorPb {
            code: master_error::Code::UnknownError as i32,
            status: Some(AppStatusPb {
                code: app_status::ErrorCode::ServiceUnavailable as i32,
                message: "tablet locations are being rebuilt".to_string(),
            }),
        }),
        tablet_locations: vec![],
        ttl_millis: 0,
        ts_infos: vec![],
    }
}

pub fn not_the_leader_response() -> GetTableLocationsResponsePb {
    GetTableLocationsResponsePb {
        error: Some(MasterErrorPb {
            code: master_error::Code::NotTheLeader as i32,
            status: Some(AppStatusPb {
                code: app_status::ErrorCode::UnknownError as i32,
                message: "this master is a follower".to_string(),
            }),
        }),
        tablet_locations: vec![],
        ttl_millis: 0,
        ts_infos: vec![],
    }
}

/// Master whose responses are scripted up front. An optional gate makes
/// every RPC wait for an explicit release, for tests that need a lookup to
/// stay in flight.
#[derive(Debug)]
pub struct ScriptedMaster {
    table_responses: Mutex<VecDeque<Result<GetTableLocationsResponsePb>>>,
    tablet_responses: Mutex<VecDeque<Result<GetTabletLocationsResponsePb>>>,
    table_calls: AtomicUsize,
    tablet_calls: AtomicUsize,
    reconnects: AtomicUsize,
    gate: Option<Semaphore>,
}

impl ScriptedMaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            table_responses: Mutex::default(),
            tablet_responses: Mutex::default(),
            table_calls: AtomicUsize::new(0),
            tablet_calls: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
            gate: None,
        })
    }

    /// A master whose RPCs block until `release` is called once per RPC.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            table_responses: Mutex::default(),
            tablet_responses: Mutex::default(),
            table_calls: AtomicUsize::new(0),
            tablet_calls: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
            gate: Some(Semaphore::new(0)),
        })
    }

    pub fn release(&self) {
        self.gate
            .as_ref()
            .expect("release on an ungated master")
            .add_permits(1);
    }

    pub fn push_table_response(&self, r: Result<GetTableLocationsResponsePb>) {
        self.table_responses.lock().unwrap().push_back(r);
    }

    pub fn push_tablet_response(&self, r: Result<GetTabletLocationsResponsePb>) {
        self.tablet_responses.lock().unwrap().push_back(r);
    }

    pub fn table_calls(&self) -> usize {
        self.table_calls.load(Ordering::Relaxed)
    }

    pub fn tablet_calls(&self) -> usize {
        self.tablet_calls.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::Relaxed)
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
    }
}

impl MasterClient for ScriptedMaster {
    fn get_table_locations(
        &self,
        _req: GetTableLocationsRequestPb,
    ) -> BoxFuture<'_, Result<GetTableLocationsResponsePb>> {
        Box::pin(async move {
            self.table_calls.fetch_add(1, Ordering::Relaxed);
            self.pass_gate().await;
            self.table_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::NetworkError("script exhausted".to_string())))
        })
    }

    fn get_tablet_locations(
        &self,
        _req: GetTabletLocationsRequestPb,
    ) -> BoxFuture<'_, Result<GetTabletLocationsResponsePb>> {
        Box::pin(async move {
            self.tablet_calls.fetch_add(1, Ordering::Relaxed);
            self.pass_gate().await;
            self.tablet_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::NetworkError("script exhausted".to_string())))
        })
    }

    fn reconnect_to_leader(&self) -> BoxFuture<'_, ()> {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        Box::pin(std::future::ready(()))
    }
}
