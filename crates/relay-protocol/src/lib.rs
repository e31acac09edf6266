//! Wire types shared by the gateway: the upstream line/SSE splitter and the
//! canonical chat-completion chunk frames emitted downstream.

pub mod chat;
pub mod sse;
