//! TCP transports: per-role wire behaviour over the AMP framing (spec §4.5).

pub mod pub_emitter;
pub mod rep;
pub mod req;
pub mod sub_emitter;

pub use pub_emitter::PubEmitter;
pub use rep::{RepRequest, RepTransport};
pub use req::ReqTransport;
pub use sub_emitter::SubEmitter;
