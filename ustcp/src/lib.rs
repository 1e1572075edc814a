//! Command line driver for `ustcp-core`: runs a client and a server over an
//! in-memory network with configurable faults and checks what arrives.

pub mod cli;
pub mod transfer;
