//! Egress pool: the set of network exit identities requests are issued through
//!
//! - `EgressEndpoint`: identity of a direct or proxy exit
//! - `EgressPoint`: an endpoint with its health counters
//! - `EgressPool`: mutex-guarded selection, outcome reporting and quarantine

mod point;
mod pool;

pub use point::{
    parse_egress_entry, Credentials, EgressEndpoint, EgressHealth, EgressPoint, TransportKind,
};
pub use pool::{EgressLease, EgressPool, PoolStats};
