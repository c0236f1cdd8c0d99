pub mod backend;
pub mod openai_chat;
pub mod translate;
