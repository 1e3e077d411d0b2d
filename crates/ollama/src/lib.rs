//! Client for the downstream model server (Ollama).
//!
//! Provides the reachability check, Modelfile rendering and the streaming
//! `POST /api/create` call whose line-delimited JSON body is relayed to
//! task observers fragment by fragment.

pub mod client;
pub mod error;
pub mod modelfile;

pub use client::{CreateProgress, CreateStream, Fragment, OllamaClient, OllamaConfig};
pub use error::OllamaError;
pub use modelfile::render_modelfile;
