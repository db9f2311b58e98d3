//! Pool-wide tunables. Defaults mirror spec §6's configuration table.

use std::time::Duration;

/// Configuration for a [`crate::pool::PeerPool`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of concurrent verified sessions the pool tries to maintain.
    pub target_num_connections: usize,
    /// Number of worker tasks spawned to reach `target_num_connections`.
    pub num_workers: usize,
    /// Window used by the Sybil mass-disconnect defense.
    pub recent_disconnect_window: Duration,
    /// Default per-request timeout (handshake, ping, getheaders).
    pub default_request_timeout: Duration,
    /// Timeout for `getaddr`, which a slow peer may legitimately take a
    /// while to answer.
    pub default_getaddr_timeout: Duration,
    /// Ping keepalive interval; in the reference design this equals the
    /// liveness monitor's poll interval.
    pub ping_interval: Duration,
    /// Health monitor cycle length.
    pub health_cycle: Duration,
    /// Address database size above which the health monitor trims the
    /// oldest-seen surplus.
    pub max_addresses: usize,
    /// Below this many non-blacklisted known addresses, the pool attempts
    /// bootstrap before relying on rating-based selection alone.
    pub bootstrap_floor: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            target_num_connections: 8,
            num_workers: 16,
            recent_disconnect_window: Duration::from_millis(1000),
            default_request_timeout: Duration::from_millis(8000),
            default_getaddr_timeout: Duration::from_millis(120_000),
            ping_interval: Duration::from_secs(30),
            health_cycle: Duration::from_secs(30 * 60),
            max_addresses: 4000,
            bootstrap_floor: 16,
        }
    }
}
