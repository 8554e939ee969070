//! One [`RequestHandler`] per namespace, created on first use.

use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use arc_swap::ArcSwap;
use tracing::debug;

use crate::{
    clock::{Clock, SystemClock},
    config::HandlerConfig,
    error::ConfigError,
    handler::RequestHandler,
    upstream::Upstream,
};

/// Hands out the [`RequestHandler`] for a namespace, creating it the first
/// time it is asked for. Handlers are never removed; they live as long as
/// the registry.
///
/// Lookups of existing handlers are lock-free. Creation is a
/// read-copy-update of the whole map, which is fine for the handful of
/// namespaces a process talks to.
pub struct Registry<U: Upstream> {
    upstream: Arc<U>,
    config: HandlerConfig,
    clock: Arc<dyn Clock>,
    handlers: ArcSwap<HashMap<String, RequestHandler<U>>>,
}

impl<U: Upstream> Debug for Registry<U> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.load();
        let mut namespaces: Vec<&String> = handlers.keys().collect();
        namespaces.sort();

        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("namespaces", &namespaces)
            .finish()
    }
}

impl<U: Upstream> Registry<U> {
    pub fn new(upstream: Arc<U>, config: HandlerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(upstream, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        upstream: Arc<U>,
        config: HandlerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            upstream,
            config,
            clock,
            handlers: ArcSwap::from_pointee(HashMap::new()),
        })
    }

    /// Load or create the handler for `namespace`. Every call with the same
    /// namespace returns a handle to the same handler.
    pub fn handler(&self, namespace: &str) -> Result<RequestHandler<U>, ConfigError> {
        if let Some(handler) = self.handlers.load().get(namespace) {
            return Ok(handler.clone());
        }

        // Built outside the update, which may run more than once under
        // contention. Creating a handler spawns nothing, so a handler that
        // loses the race is simply dropped.
        let candidate = RequestHandler::with_clock(
            namespace,
            Arc::clone(&self.upstream),
            self.config.clone(),
            Arc::clone(&self.clock),
        )?;

        let previous = self.handlers.rcu(|handlers| {
            let mut handlers: HashMap<String, RequestHandler<U>> = (**handlers).clone();
            handlers
                .entry(namespace.to_owned())
                .or_insert_with(|| candidate.clone());
            handlers
        });

        if !previous.contains_key(namespace) {
            debug!(namespace, "created request handler");
        }

        Ok(self
            .handlers
            .load()
            .get(namespace)
            .cloned()
            .unwrap_or(candidate))
    }

    /// Number of namespaces with a handler
    pub fn len(&self) -> usize {
        self.handlers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.load().is_empty()
    }
}
