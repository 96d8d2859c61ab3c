//! Zero-configuration peer-to-peer messaging: UDP beacon discovery pairs up
//! PUB/SUB and REQ/REP endpoints over plain TCP, with no broker and no
//! static configuration beyond a shared `key`.
//!
//! ```no_run
//! use std::time::Duration;
//! use meshlink::{Endpoint, EndpointOptions, Field, Role};
//!
//! # async fn example() -> Result<(), meshlink::MeshlinkError> {
//! let publisher = Endpoint::new(Role::Pub, EndpointOptions::default());
//! publisher.start().await?;
//! publisher.send("temperature", vec![Field::BigInt(21)]).await?;
//!
//! let subscriber = Endpoint::new(Role::Sub, EndpointOptions::default());
//! subscriber
//!     .subscribe("temperature", std::sync::Arc::new(|_topic, _fields| None))
//!     .await?;
//! subscriber.start().await?;
//! tokio::time::sleep(Duration::from_secs(1)).await;
//! # Ok(())
//! # }
//! ```

pub mod discovery;
mod endpoint;
mod error;
mod options;
mod role;
mod subscription;
mod transport;

pub use discovery::{DiscoveryEvent, DiscoveryNode, DiscoveryOptions};
pub use endpoint::{Endpoint, EndpointEvent, State};
pub use error::MeshlinkError;
pub use meshlink_protocol::{Field, Message};
pub use options::EndpointOptions;
pub use role::{AxonRole, Role};
pub use subscription::Callback;

/// Install a `tracing-subscriber` formatter honoring `RUST_LOG`. Convenience
/// wrapper for binaries embedding this crate; not required if the host
/// process already installed a subscriber.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
