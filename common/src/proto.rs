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

//! Wire-level message types for the master location services.
//!
//! These are hand-maintained prost structs rather than `build.rs` output so
//! the build has no protoc dependency. Field numbers are stable; partition
//! keys and bounds use `Bytes` throughout.

use bytes::Bytes;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HostPortPb {
    #[prost(string, tag = "1")]
    pub host: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub port: u32,
}

/// Identity and addressing information for a single tablet server.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TsInfoPb {
    #[prost(string, tag = "1")]
    pub permanent_uuid: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub rpc_addresses: ::prost::alloc::vec::Vec<HostPortPb>,
    #[prost(string, tag = "3")]
    pub location: ::prost::alloc::string::String,
    /// Set when the server also listens on a local unix domain socket.
    #[prost(string, optional, tag = "4")]
    pub unix_domain_socket_path: ::core::option::Option<::prost::alloc::string::String>,
}

/// A half-open partition key interval; an empty bound is unbounded.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartitionPb {
    #[prost(bytes = "bytes", tag = "1")]
    pub partition_key_start: Bytes,
    #[prost(bytes = "bytes", tag = "2")]
    pub partition_key_end: Bytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RaftRole {
    UnknownRole = 0,
    Follower = 1,
    Leader = 2,
    Learner = 3,
    NonVoter = 4,
}

/// Replica record carrying inline server info. Retained for compatibility
/// with masters that do not intern server info in responses.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeprecatedReplicaPb {
    #[prost(message, optional, tag = "1")]
    pub ts_info: ::core::option::Option<TsInfoPb>,
    #[prost(enumeration = "RaftRole", tag = "2")]
    pub role: i32,
}

/// Replica record referring to an entry of the response's `ts_infos` table.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InternedReplicaPb {
    #[prost(uint32, tag = "1")]
    pub ts_info_idx: u32,
    #[prost(enumeration = "RaftRole", tag = "2")]
    pub role: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TabletLocationsPb {
    #[prost(string, tag = "1")]
    pub tablet_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub partition: ::core::option::Option<PartitionPb>,
    #[prost(message, repeated, tag = "3")]
    pub deprecated_replicas: ::prost::alloc::vec::Vec<DeprecatedReplicaPb>,
    #[prost(message, repeated, tag = "4")]
    pub interned_replicas: ::prost::alloc::vec::Vec<InternedReplicaPb>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReplicaTypeFilter {
    VoterReplica = 0,
    AnyReplica = 1,
}

pub mod app_status {
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum ErrorCode {
        UnknownError = 0,
        Ok = 1,
        NotFound = 2,
        Corruption = 3,
        NetworkError = 4,
        ServiceUnavailable = 5,
        TimedOut = 6,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStatusPb {
    #[prost(enumeration = "app_status::ErrorCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

pub mod master_error {
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum Code {
        UnknownError = 0,
        NotTheLeader = 1,
        CatalogManagerNotInitialized = 2,
        TabletNotRunning = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MasterErrorPb {
    #[prost(enumeration = "master_error::Code", tag = "1")]
    pub code: i32,
    #[prost(message, optional, tag = "2")]
    pub status: ::core::option::Option<AppStatusPb>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTableLocationsRequestPb {
    #[prost(string, tag = "1")]
    pub table_id: ::prost::alloc::string::String,
    #[prost(bytes = "bytes", tag = "2")]
    pub partition_key_start: Bytes,
    /// Left empty so the master prefetches tablets past the start key.
    #[prost(bytes = "bytes", tag = "3")]
    pub partition_key_end: Bytes,
    #[prost(uint32, tag = "4")]
    pub max_returned_locations: u32,
    #[prost(bool, tag = "5")]
    pub intern_ts_infos_in_response: bool,
    #[prost(enumeration = "ReplicaTypeFilter", tag = "6")]
    pub replica_type_filter: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTableLocationsResponsePb {
    #[prost(message, optional, tag = "1")]
    pub error: ::core::option::Option<MasterErrorPb>,
    /// Tablets with a lower bound at or after the requested start key, in
    /// partition key order.
    #[prost(message, repeated, tag = "2")]
    pub tablet_locations: ::prost::alloc::vec::Vec<TabletLocationsPb>,
    #[prost(uint32, tag = "3")]
    pub ttl_millis: u32,
    /// Interned server info table referenced by `InternedReplicaPb`.
    #[prost(message, repeated, tag = "4")]
    pub ts_infos: ::prost::alloc::vec::Vec<TsInfoPb>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTabletLocationsRequestPb {
    #[prost(string, repeated, tag = "1")]
    pub tablet_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(bool, tag = "2")]
    pub intern_ts_infos_in_response: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTabletLocationsResponsePb {
    #[prost(message, optional, tag = "1")]
    pub error: ::core::option::Option<MasterErrorPb>,
    #[prost(message, repeated, tag = "2")]
    pub tablet_locations: ::prost::alloc::vec::Vec<TabletLocationsPb>,
    #[prost(message, repeated, tag = "3")]
    pub ts_infos: ::prost::alloc::vec::Vec<TsInfoPb>,
}
