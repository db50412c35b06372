use std::time::Duration;
use futures::{FutureExt, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use shared::types::{EventKind, ServiceSnapshot};
use crate::config::WatchConfig;
use crate::error::WatchError;
use super::source::{ServiceApi, WatchItem, WatchStream};

/// What the watch loop hands to the reconciler
#[derive(Debug, Clone, PartialEq)]
pub enum WatchUpdate {
    Event(EventKind, ServiceSnapshot),
    /// Complete service list after a resubscription
    Relisted(Vec<ServiceSnapshot>),
}

enum State {
    /// Open a watch from the last seen resourceVersion
    Connecting,
    Connected(WatchStream),
    /// Waiting before the next attempt
    Backoff { until: Instant, resubscribe: bool },
    /// The resourceVersion expired; start over from the current moment
    Resubscribing,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Connecting => "connecting",
            State::Connected(_) => "connected",
            State::Backoff { .. } => "backoff",
            State::Resubscribing => "resubscribing",
        }
    }
}

/// Resumable service watch with a single in-flight subscription.
///
/// Never ends on its own: staleness leads to a fresh subscription, other
/// errors to a fixed backoff and a retry from the same resourceVersion.
/// `next` is cancel-safe; dropping it loses no buffered event.
pub struct WatchSource<A> {
    api: A,
    state: State,
    resource_version: String,
    backoff: Duration,
    relist_on_reconnect: bool,
}

impl<A: ServiceApi> WatchSource<A> {
    /// Start watching after a list that returned `resource_version`
    pub fn new(api: A, config: &WatchConfig, resource_version: String) -> Self {
        Self {
            api,
            state: State::Connecting,
            resource_version,
            backoff: config.backoff(),
            relist_on_reconnect: config.relist_on_reconnect,
        }
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn resource_version(&self) -> &str {
        &self.resource_version
    }

    /// Wait for the next update. Returns `None` only once `cancel` fires.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<WatchUpdate> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            match &mut self.state {
                State::Connecting => {
                    tracing::debug!("Opening service watch at resourceVersion {:?}", self.resource_version);
                    let opened = tokio::select! {
                        _ = cancel.cancelled() => return None,
                        opened = self.api.watch(&self.resource_version) => opened,
                    };
                    self.state = match opened {
                        Ok(stream) => State::Connected(stream),
                        Err(e) => self.on_error(e),
                    };
                }

                State::Connected(stream) => {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => return None,
                        item = stream.next() => item,
                    };
                    if let Some(update) = self.absorb(item) {
                        return Some(update);
                    }
                }

                State::Backoff { until, resubscribe } => {
                    let (until, resubscribe) = (*until, *resubscribe);
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep_until(until) => {}
                    }
                    self.state = if resubscribe {
                        State::Resubscribing
                    } else {
                        State::Connecting
                    };
                }

                State::Resubscribing => {
                    if !self.relist_on_reconnect {
                        // An empty version watches from now, replaying current state as ADDED
                        self.resource_version.clear();
                        self.state = State::Connecting;
                        continue;
                    }

                    let listed = tokio::select! {
                        _ = cancel.cancelled() => return None,
                        listed = self.api.list() => listed,
                    };
                    match listed {
                        Ok(list) => {
                            tracing::info!("Relisted {} services after resubscribing", list.items.len());
                            self.resource_version = list.resource_version;
                            self.state = State::Connecting;
                            return Some(WatchUpdate::Relisted(list.items));
                        }
                        Err(e) => {
                            tracing::error!("Failed to relist services: {}", e);
                            self.state = self.backoff_state(true);
                        }
                    }
                }
            }
        }
    }

    /// An update that is already buffered on the open stream, without waiting
    pub fn next_ready(&mut self) -> Option<WatchUpdate> {
        loop {
            let State::Connected(stream) = &mut self.state else {
                return None;
            };
            let item = stream.next().now_or_never()?;
            if let Some(update) = self.absorb(item) {
                return Some(update);
            }
        }
    }

    /// Apply one stream item to the state, yielding an event if it carried one
    fn absorb(&mut self, item: Option<Result<WatchItem, WatchError>>) -> Option<WatchUpdate> {
        match item {
            Some(Ok(WatchItem::Event {
                kind,
                service,
                resource_version,
            })) => {
                if let Some(rv) = resource_version {
                    self.resource_version = rv;
                }
                Some(WatchUpdate::Event(kind, service))
            }
            Some(Ok(WatchItem::Bookmark(rv))) => {
                self.resource_version = rv;
                None
            }
            Some(Err(e)) => {
                self.state = self.on_error(e);
                None
            }
            None => {
                tracing::debug!("Watch stream ended, reopening");
                self.state = State::Connecting;
                None
            }
        }
    }

    fn on_error(&self, error: WatchError) -> State {
        match error {
            WatchError::Stale(reason) => {
                tracing::warn!("Watch expired ({}), restarting...", reason);
                State::Resubscribing
            }
            WatchError::Transient(reason) => {
                tracing::error!(
                    "Error while watching services: {}; retrying in {:?}",
                    reason,
                    self.backoff
                );
                self.backoff_state(false)
            }
        }
    }

    fn backoff_state(&self, resubscribe: bool) -> State {
        State::Backoff {
            until: Instant::now() + self.backoff,
            resubscribe,
        }
    }
}
