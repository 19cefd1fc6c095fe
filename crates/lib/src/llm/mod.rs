//! LLM abstraction and Gemini client.
//!
//! `TextGenerator` is the seam the dispatcher calls; `GeminiClient` implements it against the
//! Generative Language API `generateContent` endpoint.

mod gemini;

pub use gemini::{
    Content, GeminiClient, GeminiError, GenerationConfig, Part, TextGenerator,
};
