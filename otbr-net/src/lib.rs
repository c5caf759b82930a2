//! Glue between a Thread mesh stack and a local IPv6 network stack
//!
//! The crate bridges packets between the two stacks, mirrors mesh
//! addresses onto the local mesh interface, relays neighbor discovery and
//! mDNS to the physical interface and drives the border-router bring-up.

pub mod addr_sync;
pub mod border_router;
pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod infra_if;
pub mod logging;
pub mod mdns;
pub mod mesh;
pub mod netif;
pub mod notify;
pub mod pbuf;
pub mod platform;
pub mod stack;
#[cfg(any(test, feature = "test-util"))]
pub mod test_util;
pub mod thread_if;

pub use border_router::{BorderRouter, BorderRouterHandle, Stage, start};
pub use config::{BorderRouterConfig, InfraConfig, InstanceMode, PrefixWait};
pub use context::{BorderRouterContext, TaskLock};
pub use error::{BorderRouterError, NetError, SocketError};
pub use mesh::{MeshError, MeshMessage, MeshStack};
pub use platform::Platform;
