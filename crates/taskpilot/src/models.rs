//! These models represent the objects passed around by the agent
//!
//! There are two related formats we need to interact with:
//! - openai chat completion messages/tools, sent from the agent to the LLM
//! - tool calls and results, sent from the agent to the systems providing capabilities
//!
//! We always immediately convert the wire format into these internal structs using the
//! helpers in `providers::utils`, so the internal models are not an exact match of the wire.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
