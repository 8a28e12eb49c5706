//! Miscellaneous common structs used throughout the library.

mod closest;
mod id;
pub mod messages;
mod peer;
mod record;
mod routing_table;

pub use closest::*;
pub use id::*;
pub use messages::{CodecError, Message, MessageType, Record};
pub use peer::*;
pub use record::*;
pub use routing_table::*;
