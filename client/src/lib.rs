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

//! Client-side tablet location cache for a range-partitioned tablet store.
//!
//! Tables are split into tablets by an opaque, lexicographically ordered
//! partition key; each tablet is replicated with a single leader. The
//! [`MetaCache`] answers (table, partition key) and tablet-id lookups
//! locally where it can and refreshes from the master where it cannot,
//! remembering non-covered key ranges as well as tablets. A
//! [`ServerPicker`] rides on a cached tablet to choose the replica an
//! operation should target, feeding observed rejections and failures back
//! into the shared view.
//!
//! The master transport ([`MasterClient`]), host resolution
//! ([`HostResolver`]) and channel construction ([`ProxyFactory`]) are trait
//! seams supplied by the embedding application.

use std::fmt;

pub mod config;
pub mod errors;

mod cache;
mod master;
mod picker;
mod proxy;
mod resolve;
mod server;
mod tablet;
mod util;

pub use cache::MetaCache;
pub use errors::Error;
pub use master::MasterClient;
pub use picker::ServerPicker;
pub use proxy::{DefaultProxyFactory, ProxyFactory, ProxyPair, ResolvedAddr};
pub use resolve::{HostResolver, TokioHostResolver};
pub use server::RemoteTabletServer;
pub use tablet::{Partition, RemoteTablet, Replica, ReplicaRole};

pub type Result<T> = std::result::Result<T, Error>;

/// How a key lookup treats non-covered ranges: a `Point` lookup wants the
/// tablet containing exactly the key, a `LowerBound` lookup wants the first
/// tablet at or after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupType {
    Point,
    LowerBound,
}

/// Identity of a table: the stable id lookups are keyed by, plus the
/// human-facing name used in logs and errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableIdent {
    id: String,
    name: String,
}

impl TableIdent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An advertised `host:port` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
