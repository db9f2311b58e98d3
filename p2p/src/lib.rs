//! Per-peer session state machine and the reputation-aware connection
//! pool. Generalizes the teacher's synchronous `p2p::protocol::bitcoin`
//! reactor (`fsm.rs`'s `Peer`/`PeerManager`/`PingManager` split) onto one
//! `tokio` task per connection, coordinated through a single pool that
//! owns peer metrics, rating, blacklisting and worker-pool connection
//! establishment.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod event;
pub mod liveness;
pub mod pool;
pub mod session;
pub mod transport;

pub use config::PoolConfig;
pub use error::{PoolError, SessionError};
pub use event::Event;
pub use pool::{PeerMetrics, PeerPool};
pub use session::{PeerSession, SessionTimeouts};
