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

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use quarry_common::proto::TsInfoPb;

use crate::HostPort;
use crate::Result;
use crate::config::Config;
use crate::errors::Error;
use crate::proxy::{ProxyFactory, ProxyPair, ResolvedAddr, validate_socket_path};
use crate::resolve::HostResolver;
use crate::util::{LogThrottle, is_local_host};

const SOCKET_PATH_WARN_INTERVAL: Duration = Duration::from_secs(60);

/// Plumbing shared by every proxy initialization: configuration, the host
/// resolver, and the channel factory.
pub(crate) struct ClientContext {
    pub(crate) config: Arc<Config>,
    pub(crate) resolver: Arc<dyn HostResolver>,
    pub(crate) proxy_factory: Arc<dyn ProxyFactory>,
}

#[derive(Debug, Default)]
struct ServerState {
    rpc_host_ports: Vec<HostPort>,
    location: String,
    unix_socket_path: Option<String>,
    proxies: Option<ProxyPair>,
}

/// Cached view of a single tablet server.
///
/// Identity is the permanent UUID; addressing and the lazily built proxy
/// pair live behind the per-server lock. The registry interns these, so a
/// given UUID maps to exactly one instance for the life of the cache and
/// replica lists can compare servers by pointer.
pub struct RemoteTabletServer {
    uuid: String,
    state: Mutex<ServerState>,
    socket_path_warn: LogThrottle,
}

impl RemoteTabletServer {
    pub(crate) fn new(pb: &TsInfoPb) -> Self {
        let ts = Self {
            uuid: pb.permanent_uuid.clone(),
            state: Mutex::new(ServerState::default()),
            socket_path_warn: LogThrottle::new(),
        };
        ts.update(pb);
        ts
    }

    /// Merges in freshly reported addressing info. An installed proxy pair
    /// is kept; connections follow the addresses they were built from.
    pub(crate) fn update(&self, pb: &TsInfoPb) {
        debug_assert_eq!(self.uuid, pb.permanent_uuid);
        let mut state = self.state.lock().unwrap();
        state.rpc_host_ports = pb
            .rpc_addresses
            .iter()
            .map(|hp| HostPort::new(&hp.host, hp.port as u16))
            .collect();
        state.location = pb.location.clone();
        state.unix_socket_path = pb.unix_domain_socket_path.clone();
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn location(&self) -> String {
        self.state.lock().unwrap().location.clone()
    }

    pub fn host_ports(&self) -> Vec<HostPort> {
        self.state.lock().unwrap().rpc_host_ports.clone()
    }

    /// The installed proxy pair, if `init_proxy` has completed.
    pub fn proxies(&self) -> Option<ProxyPair> {
        self.state.lock().unwrap().proxies.clone()
    }

    /// Ensures this server has a usable proxy pair and returns it.
    ///
    /// Callers may race; whoever finds a pair installed returns it without
    /// further work, and racing constructions are resolved by the last
    /// writer installing a fully formed pair.
    pub(crate) async fn init_proxy(&self, ctx: &ClientContext) -> Result<ProxyPair> {
        let (hp, socket_path) = {
            let state = self.state.lock().unwrap();
            if let Some(proxies) = &state.proxies {
                return Ok(proxies.clone());
            }
            let Some(hp) = state.rpc_host_ports.first().cloned() else {
                return Err(Error::NetworkError(format!(
                    "tablet server {} has no advertised addresses",
                    self.uuid
                )));
            };
            // If the server advertises multiple endpoints, the first one is
            // always used.
            (hp, state.unix_socket_path.clone())
        };

        if ctx.config.use_unix_domain_sockets()
            && let Some(path) = socket_path
            && is_local_host(&hp.host)
        {
            match validate_socket_path(&path) {
                Ok(()) => {
                    debug!(server = %self, socket = %path, "connecting over unix domain socket");
                    let pair = ctx
                        .proxy_factory
                        .create(&ResolvedAddr::Unix(path), &hp.host)?;
                    return Ok(self.install_proxies(pair));
                }
                Err(_) => {
                    if self.socket_path_warn.should_log(SOCKET_PATH_WARN_INTERVAL) {
                        warn!(
                            server = %self,
                            socket = %path,
                            "tablet server reported an invalid unix domain socket path"
                        );
                    }
                    // Fall through to the TCP path.
                }
            }
        }

        let addrs = ctx
            .resolver
            .resolve(hp.clone())
            .await
            .map_err(|e| e.context(format!("failed to resolve address for TS {}", self.uuid)))?;
        debug!(server = %self, addr = %addrs[0], "resolved tablet server address");
        let pair = ctx
            .proxy_factory
            .create(&ResolvedAddr::Tcp(addrs[0]), &hp.host)?;
        Ok(self.install_proxies(pair))
    }

    fn install_proxies(&self, pair: ProxyPair) -> ProxyPair {
        let mut state = self.state.lock().unwrap();
        state.proxies = Some(pair.clone());
        pair
    }
}

impl fmt::Display for RemoteTabletServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)?;
        if let Some(hp) = self.state.lock().unwrap().rpc_host_ports.first() {
            write!(f, " ({hp})")?;
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteTabletServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteTabletServer {{ {self} }}")
    }
}

/// Interns per-server metadata keyed by UUID.
///
/// The registry grows monotonically: servers are never removed while the
/// cache is alive, and clearing the cache drops the registry wholesale.
/// Outstanding `Arc` handles keep dropped servers valid for their holders.
#[derive(Debug, Default)]
pub(crate) struct ServerRegistry {
    servers: HashMap<String, Arc<RemoteTabletServer>>,
}

impl ServerRegistry {
    /// Inserts or refreshes the entry for `pb`'s UUID. Idempotent.
    pub(crate) fn upsert(&mut self, pb: &TsInfoPb) -> Arc<RemoteTabletServer> {
        if let Some(ts) = self.servers.get(&pb.permanent_uuid) {
            ts.update(pb);
            return Arc::clone(ts);
        }
        debug!(uuid = %pb.permanent_uuid, "caching new tablet server");
        let ts = Arc::new(RemoteTabletServer::new(pb));
        self.servers
            .insert(pb.permanent_uuid.clone(), Arc::clone(&ts));
        ts
    }

    pub(crate) fn get(&self, uuid: &str) -> Option<Arc<RemoteTabletServer>> {
        self.servers.get(uuid).cloned()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.servers.len()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_registry_upsert_is_idempotent() {
        let mut registry = ServerRegistry::default();
        let a = registry.upsert(&ts_info("ts-0", "host-a", 7050));
        let b = registry.upsert(&ts_info("ts-0", "host-b", 7051));
        assert_eq!(1, registry.len());
        assert!(Arc::ptr_eq(&a, &b));
        // The later upsert replaced the addressing info in place.
        assert_eq!("host-b", a.host_ports()[0].host);
    }

    #[test_log::test(tokio::test)]
    async fn test_init_proxy_constructs_once() {
        let (ctx, factory) = test_context(Config::builder().build());
        let ts = RemoteTabletServer::new(&ts_info("ts-0", "ts0.example.com", 7050));

        let first = ts.init_proxy(&ctx).await.unwrap();
        let second = ts.init_proxy(&ctx).await.unwrap();
        assert_eq!(first.hostname(), second.hostname());
        assert_eq!(1, factory.created.load(Ordering::Relaxed));
    }

    #[test_log::test(tokio::test)]
    async fn test_init_proxy_no_addresses() {
        let (ctx, _) = test_context(Config::builder().build());
        let ts = RemoteTabletServer::new(&TsInfoPb {
            permanent_uuid: "ts-0".to_string(),
            rpc_addresses: vec![],
            location: String::new(),
            unix_domain_socket_path: None,
        });
        let err = ts.init_proxy(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::NetworkError(_)), "{err:?}");
    }

    #[test_log::test(tokio::test)]
    async fn test_bad_socket_path_falls_back_to_tcp() {
        let (ctx, factory) = test_context(
            Config::builder().use_unix_domain_sockets(true).build(),
        );
        let mut info = ts_info("ts-0", "localhost", 7050);
        info.unix_domain_socket_path = Some("not-absolute.sock".to_string());
        let ts = RemoteTabletServer::new(&info);

        // Invalid path is skipped; the TCP pair still comes out.
        ts.init_proxy(&ctx).await.unwrap();
        assert_eq!(1, factory.created.load(Ordering::Relaxed));
    }

    #[test_log::test(tokio::test)]
    async fn test_remote_host_skips_unix_socket() {
        let (ctx, factory) = test_context(
            Config::builder().use_unix_domain_sockets(true).build(),
        );
        let mut info = ts_info("ts-0", "ts0.example.com", 7050);
        info.unix_domain_socket_path = Some("/var/run/ts.sock".to_string());
        let ts = RemoteTabletServer::new(&info);

        ts.init_proxy(&ctx).await.unwrap();
        assert_eq!(1, factory.created.load(Ordering::Relaxed));
    }

    #[test]
    fn test_display_includes_first_endpoint() {
        let ts = RemoteTabletServer::new(&ts_info("ts-0", "host-a", 7050));
        assert_eq!("ts-0 (host-a:7050)", ts.to_string());
    }
}
