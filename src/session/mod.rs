//! Transport sessions: the protocol seam, the default connector, and the
//! per-origin pool.

pub mod connector;
pub mod pool;
pub mod transport;

pub use connector::NetConnector;
pub use pool::{Session, SessionPool};
pub use transport::{Connect, Origin, Protocol, PushSink, ResponseHead, Transport, TransportRequest};
