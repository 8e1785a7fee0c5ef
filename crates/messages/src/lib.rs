//! Network messages for the consensus protocols.

mod bft;
pub mod codec;
mod majority;
mod protocol;

pub use bft::{BftMessage, BftMessageKind};
pub use codec::{decode_message, encode_message, CodecError};
pub use majority::MajorityMessage;
pub use protocol::ProtocolMessage;
