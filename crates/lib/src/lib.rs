//! LINE webhook bridge: verify callbacks, pick a reply (fixed or Gemini-generated), send it back.

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod llm;
pub mod session;
pub mod signature;
