pub mod error;
pub mod openai;
pub mod retry;
pub mod traits;
pub mod util;

pub use error::{is_retryable_status, AiError};
pub use openai::types::{ChatRequest, ChatResponse, Role, WireMessage};
pub use openai::{parse_reply_content, OpenAi, OpenAiClient, SchemaHint};
pub use retry::RetryPolicy;
pub use traits::{ChatTransport, JsonChat, TransportResponse};
pub use util::{strip_code_blocks, take_chars, truncate_to_char_boundary};
