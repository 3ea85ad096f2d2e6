//! These models represent the objects passed between the conversation, the
//! markup parser and the functions the model is allowed to call.
//!
//! Claude never sees these structs directly: messages are flattened to
//! role/content pairs before they hit the wire, and tool calls only exist on
//! the wire as `<invoke>` markup inside plain text.
pub mod message;
pub mod role;
pub mod tool;
