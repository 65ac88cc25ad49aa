pub mod chat_log;
pub mod profile;
pub mod responder;
