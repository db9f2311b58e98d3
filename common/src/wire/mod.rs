//! Wire-protocol framing and payload codecs.

pub mod address;
pub mod framing;
pub mod message;
pub mod varint;

pub use address::{AddressError, NetworkAddress};
pub use framing::{deframe, frame, Deframed};
pub use message::{
    decode_addr, decode_getheaders, decode_headers, decode_inv, decode_ping_pong,
    encode_addr, encode_getheaders, encode_headers, encode_inv, encode_ping_pong,
    GetHeaders, Inventory, InvType, MalformedPayload, VersionMessage,
};
pub use varint::VarIntError;
