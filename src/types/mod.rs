//! Core data types for the RES protocol.

mod message;
mod rid;
mod value;

pub use message::ErrorPayload;
pub(crate) use message::{parse_frame, split_subject, Bundle, Inbound, RequestFrame};
pub use rid::Rid;
pub use value::Value;
pub(crate) use value::{delete_sentinel, WireValue};
