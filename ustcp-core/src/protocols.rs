//! The protocols making up a TCP host: the TCP engine itself and the address
//! and checksum helpers it shares with the transport layer.

pub mod ipv4_address;
pub mod tcp;
pub mod utility;
