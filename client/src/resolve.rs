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

use std::fmt::Debug;
use std::net::SocketAddr;

use futures::future::BoxFuture;

use crate::HostPort;
use crate::Result;
use crate::errors::Error;

/// Resolves an advertised host:port to socket addresses.
///
/// The cache resolves lazily, right before building a server's proxies, so
/// implementations may be as simple as the system resolver or may layer in
/// caching or split-horizon policies.
pub trait HostResolver: Send + Sync + Debug {
    /// Resolves `hp`. An empty result is an error, not an empty `Ok`.
    fn resolve(&self, hp: HostPort) -> BoxFuture<'_, Result<Vec<SocketAddr>>>;
}

/// Default resolver backed by `tokio::net::lookup_host`.
#[derive(Debug, Default)]
pub struct TokioHostResolver;

impl HostResolver for TokioHostResolver {
    fn resolve(&self, hp: HostPort) -> BoxFuture<'_, Result<Vec<SocketAddr>>> {
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((hp.host.as_str(), hp.port))
                .await
                .map_err(Error::from)?
                .collect();
            if addrs.is_empty() {
                return Err(Error::NetworkError(format!("no addresses for {hp}")));
            }
            Ok(addrs)
        })
    }
}
