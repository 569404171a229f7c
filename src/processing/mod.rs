//! Inbound message decoding

pub mod parser;

pub use parser::{MessageParser, WireMessage};
