//! Connection identities: addressing one peer's socket and receive state.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

/// Source of process-unique transport handles. Handles are never reused, so
/// two reconnects from the same peer are always distinct identities.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct ConnectionInner {
    handle: u64,
    remote_addr: String,
    state: AtomicI32,
    wildcard: bool,
}

/// Identity of one peer connection.
///
/// Identities are matched by transport handle, never by address string. The
/// wildcard identity returned by [`ConnectionId::all`] matches every
/// connection and serves as the broadcast send target.
///
/// Clones are cheap and share the underlying record; consumers hold them for
/// matching and addressing only — state changes happen through the owning
/// server or client.
#[derive(Debug, Clone)]
pub struct ConnectionId {
    inner: Arc<ConnectionInner>,
}

impl ConnectionId {
    pub(crate) fn new(remote_addr: String) -> Self {
        ConnectionId {
            inner: Arc::new(ConnectionInner {
                handle: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
                remote_addr,
                state: AtomicI32::new(0),
                wildcard: false,
            }),
        }
    }

    /// The wildcard identity: matches every connection when used as a send
    /// or close target.
    pub fn all() -> Self {
        ConnectionId {
            inner: Arc::new(ConnectionInner {
                handle: 0,
                remote_addr: String::new(),
                state: AtomicI32::new(0),
                wildcard: true,
            }),
        }
    }

    /// True iff both identities refer to the same transport handle, or
    /// either one is the wildcard.
    pub fn matches(&self, other: &ConnectionId) -> bool {
        if self.inner.wildcard || other.inner.wildcard {
            return true;
        }
        self.inner.handle == other.inner.handle
    }

    /// Remote address captured at accept/connect time,
    /// e.g. `tcp://10.0.0.5:53211`.
    pub fn remote_addr(&self) -> &str {
        &self.inner.remote_addr
    }

    /// Raw connection state: negative = closed, zero = pending (accepted but
    /// not yet active), positive = active.
    pub fn state(&self) -> i32 {
        self.inner.state.load(Ordering::SeqCst)
    }

    /// True once the connection has seen inbound data.
    pub fn is_active(&self) -> bool {
        self.state() > 0
    }

    /// True once the connection has been closed; a closed identity is never
    /// reused.
    pub fn is_closed(&self) -> bool {
        self.state() < 0
    }

    pub(crate) fn set_state(&self, state: i32) {
        self.inner.state.store(state, Ordering::SeqCst);
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inner.wildcard {
            f.write_str("*")
        } else {
            f.write_str(&self.inner.remote_addr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_itself() {
        let id = ConnectionId::new("tcp://10.0.0.5:53211".into());
        assert!(id.matches(&id));
        assert!(id.matches(&id.clone()));
    }

    #[test]
    fn distinct_handles_never_match_even_with_equal_addresses() {
        let a = ConnectionId::new("tcp://10.0.0.5:53211".into());
        let b = ConnectionId::new("tcp://10.0.0.5:53211".into());
        assert!(!a.matches(&b));
    }

    #[test]
    fn wildcard_matches_everything() {
        let all = ConnectionId::all();
        let id = ConnectionId::new("tcp://127.0.0.1:9".into());
        assert!(all.matches(&id));
        assert!(id.matches(&all));
        assert!(all.matches(&all));
    }

    #[test]
    fn state_transitions() {
        let id = ConnectionId::new("tcp://127.0.0.1:9".into());
        assert_eq!(id.state(), 0);
        assert!(!id.is_active());
        id.set_state(1);
        assert!(id.is_active());
        id.set_state(-1);
        assert!(id.is_closed());
    }

    #[test]
    fn displays_remote_address() {
        let id = ConnectionId::new("tcp://10.0.0.5:53211".into());
        assert_eq!(id.to_string(), "tcp://10.0.0.5:53211");
        assert_eq!(ConnectionId::all().to_string(), "*");
    }
}
