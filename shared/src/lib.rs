//! Wire types shared between the match server and its clients.

pub mod protocol;

pub use protocol::{op_codes, MigrationFormat, PROTOCOL_VERSION};
