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

use tonic::transport::{Channel, Endpoint};

use crate::Result;
use crate::errors::Error;

/// Address a proxy pair is bound to, after resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedAddr {
    Tcp(SocketAddr),
    /// Filesystem path, or `@name` for a Linux abstract socket.
    Unix(String),
}

impl std::fmt::Display for ResolvedAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedAddr::Tcp(addr) => write!(f, "{addr}"),
            ResolvedAddr::Unix(path) => write!(f, "unix:{path}"),
        }
    }
}

/// The two channels a tablet server exposes: the regular data-path service
/// and the admin service. Both share the address they were bound to; the
/// channels are lazy and only dial on first use.
#[derive(Clone, Debug)]
pub struct ProxyPair {
    channel: Channel,
    admin_channel: Channel,
    hostname: String,
}

impl ProxyPair {
    pub(crate) fn new(channel: Channel, admin_channel: Channel, hostname: String) -> Self {
        Self {
            channel,
            admin_channel,
            hostname,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn admin_channel(&self) -> &Channel {
        &self.admin_channel
    }

    /// The hostname the server advertised, for TLS name verification by
    /// callers that layer it on.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

/// Builds proxy pairs for resolved addresses. Swappable so tests can hand
/// out channels without touching the network.
pub trait ProxyFactory: Send + Sync + Debug {
    fn create(&self, addr: &ResolvedAddr, hostname: &str) -> Result<ProxyPair>;
}

/// Checks a server-advertised unix socket path: absolute filesystem paths
/// and `@`-prefixed abstract names are accepted.
pub(crate) fn validate_socket_path(path: &str) -> Result<()> {
    let valid = path.starts_with('/') || (path.starts_with('@') && path.len() > 1);
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidSocketPath(path.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct DefaultProxyFactory;

impl DefaultProxyFactory {
    fn tcp_channel(addr: &SocketAddr) -> Result<Channel> {
        let endpoint = Endpoint::from_shared(format!("http://{addr}")).map_err(Error::from)?;
        Ok(endpoint.connect_lazy())
    }

    #[cfg(unix)]
    fn unix_channel(path: &str) -> Channel {
        use hyper_util::rt::TokioIo;
        use tower::service_fn;

        let path = path.to_string();
        // The URI is required by the endpoint builder but ignored by the
        // connector.
        Endpoint::from_static("http://localhost").connect_with_connector_lazy(service_fn(
            move |_: tonic::transport::Uri| {
                let path = path.clone();
                async move {
                    let stream = connect_unix(&path).await?;
                    Ok::<_, std::io::Error>(TokioIo::new(stream))
                }
            },
        ))
    }
}

#[cfg(unix)]
async fn connect_unix(path: &str) -> std::io::Result<tokio::net::UnixStream> {
    #[cfg(target_os = "linux")]
    if let Some(name) = path.strip_prefix('@') {
        use std::os::linux::net::SocketAddrExt;
        let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
        let stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
        stream.set_nonblocking(true)?;
        return tokio::net::UnixStream::from_std(stream);
    }
    tokio::net::UnixStream::connect(path).await
}

impl ProxyFactory for DefaultProxyFactory {
    fn create(&self, addr: &ResolvedAddr, hostname: &str) -> Result<ProxyPair> {
        let (channel, admin_channel) = match addr {
            ResolvedAddr::Tcp(sockaddr) => (
                Self::tcp_channel(sockaddr)?,
                Self::tcp_channel(sockaddr)?,
            ),
            #[cfg(unix)]
            ResolvedAddr::Unix(path) => (Self::unix_channel(path), Self::unix_channel(path)),
            #[cfg(not(unix))]
            ResolvedAddr::Unix(_) => {
                return Err(Error::NetworkError(
                    "unix domain sockets are not supported on this platform".to_string(),
                ));
            }
        };
        Ok(ProxyPair::new(channel, admin_channel, hostname.to_string()))
    }
}
