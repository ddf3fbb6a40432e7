//! Transport abstractions: the server and client interfaces the rest of the
//! system programs against, independent of the underlying transport kind.

use std::time::Duration;

use async_trait::async_trait;

use crate::connection::ConnectionId;
use crate::error::Result;
use crate::event::TransportEvent;

/// Accepting side of a packet transport.
///
/// Implementations are poll-driven: no internal background task exists, and
/// the owner makes progress by calling [`process_events`] at its own cadence
/// and draining the event queue via [`next_event`].
///
/// [`process_events`]: TransportServer::process_events
/// [`next_event`]: TransportServer::next_event
#[async_trait]
pub trait TransportServer: Send + Sync + std::fmt::Debug {
    /// Wait up to `timeout` for socket activity, draining readable
    /// connections and queueing the resulting events. Returns as soon as at
    /// least one packet was extracted, or once the timeout is exhausted.
    async fn process_events(&self, timeout: Duration) -> Result<()>;

    /// Frame `payload` and write it to every connection matching `target`.
    /// Pending connections are skipped unless `during_connect` is set.
    async fn send_packet(
        &self,
        payload: &[u8],
        target: &ConnectionId,
        during_connect: bool,
    ) -> Result<()>;

    /// Snapshot of the currently tracked connections. May include identities
    /// whose state has already gone negative; callers must check.
    fn connections(&self) -> Vec<ConnectionId>;

    /// Close every connection matching `target` and free its slot for reuse.
    fn close(&self, target: &ConnectionId);

    /// Out-of-band destination spec clients can use to reach this server,
    /// e.g. `tcp://44000`.
    fn connection_string(&self) -> String;

    /// Pop the oldest queued transport event.
    fn next_event(&self) -> Option<TransportEvent>;
}

/// Connecting side of a packet transport: owns exactly one connection.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Wait up to `timeout` for inbound data, queueing one `Receive` event
    /// per complete packet. Returns as soon as at least one packet was
    /// extracted, or once the timeout is exhausted.
    async fn process_events(&self, timeout: Duration) -> Result<()>;

    /// Frame `payload` and write it iff `target` matches this client's own
    /// connection.
    async fn send_packet(
        &self,
        payload: &[u8],
        target: &ConnectionId,
        during_connect: bool,
    ) -> Result<()>;

    /// Identity of this client's own connection.
    fn connection(&self) -> ConnectionId;

    /// Pop the oldest queued transport event.
    fn next_event(&self) -> Option<TransportEvent>;
}
