//! Explicit transport registry: maps a scheme such as `"tcp"` to server and
//! client constructors.
//!
//! The registry is populated from the composition root at process start
//! (`TransportRegistry::with_defaults`), so which transports exist is visible
//! in one place instead of depending on static-initialization side effects.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::client::TcpClient;
use crate::error::{Result, TransportError};
use crate::server::TcpServer;
use crate::transport::{TransportClient, TransportServer};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Constructor for a server transport, taking the scheme-stripped spec.
pub type ServerFactory = fn(String) -> BoxFuture<Result<Box<dyn TransportServer>>>;

/// Constructor for a client transport, taking the scheme-stripped spec.
pub type ClientFactory = fn(String) -> BoxFuture<Result<Box<dyn TransportClient>>>;

/// Registry of transport implementations keyed by scheme.
#[derive(Default)]
pub struct TransportRegistry {
    servers: HashMap<&'static str, ServerFactory>,
    clients: HashMap<&'static str, ClientFactory>,
}

impl TransportRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in TCP transport registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_server("tcp", |spec| {
            Box::pin(async move {
                TcpServer::new(&spec).map(|s| Box::new(s) as Box<dyn TransportServer>)
            })
        });
        registry.register_client("tcp", |spec| {
            Box::pin(async move {
                TcpClient::new(&spec)
                    .await
                    .map(|c| Box::new(c) as Box<dyn TransportClient>)
            })
        });
        registry
    }

    pub fn register_server(&mut self, scheme: &'static str, factory: ServerFactory) {
        self.servers.insert(scheme, factory);
    }

    pub fn register_client(&mut self, scheme: &'static str, factory: ClientFactory) {
        self.clients.insert(scheme, factory);
    }

    /// Create a server from a spec like `tcp://44000`. A spec without a
    /// scheme defaults to `tcp`.
    pub async fn create_server(&self, spec: &str) -> Result<Box<dyn TransportServer>> {
        let (scheme, param) = split_spec(spec);
        let factory = self
            .servers
            .get(scheme)
            .ok_or_else(|| TransportError::UnknownScheme(scheme.to_string()))?;
        factory(param.to_string()).await
    }

    /// Create a client from a spec like `tcp://somehost:44000`. A spec
    /// without a scheme defaults to `tcp`.
    pub async fn create_client(&self, spec: &str) -> Result<Box<dyn TransportClient>> {
        let (scheme, param) = split_spec(spec);
        let factory = self
            .clients
            .get(scheme)
            .ok_or_else(|| TransportError::UnknownScheme(scheme.to_string()))?;
        factory(param.to_string()).await
    }
}

fn split_spec(spec: &str) -> (&str, &str) {
    match spec.split_once("://") {
        Some((scheme, param)) => (scheme, param),
        None => ("tcp", spec),
    }
}
