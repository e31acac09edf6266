mod chunk;
mod payload;

pub use chunk::{
    ChatChunkChoice, ChatChunkDelta, ChatCompletionChunk, ChatCompletionChunkObject, ChatRole,
    DONE_FRAME, FinishReason, encode_chunk,
};
pub use payload::{is_chat_path, is_moderation_path, payload_model, payload_stream};
