//! # citerag core
//!
//! Runtime-free retrieval logic for citerag: data models, tokenization and
//! chunking, the embedding / vector store / answer generator traits, the
//! in-memory vector index, and the [`pipeline::Pipeline`] that ties them
//! together.
//!
//! This crate contains no tokio, HTTP clients, or filesystem I/O. Remote
//! backends (OpenAI, Gemini, Chroma, fastembed) live in the `citerag`
//! application crate and plug in through the traits defined here.

pub mod answer;
pub mod chunk;
pub mod embedding;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod text;
