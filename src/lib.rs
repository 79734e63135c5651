//! # citerag
//!
//! Retrieval-augmented question answering over uploaded documents, with
//! numbered citations back to the chunks each answer was drawn from.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │   Intake    │──▶│       Pipeline        │──▶│ Vector store │
//! │ PDF/DOCX/TXT│   │ clean → chunk → embed │   │ Chroma / mem │
//! └─────────────┘   └──────────┬───────────┘   └──────┬───────┘
//!                              │  query: embed → search │
//!                              ▼                        │
//!                       ┌─────────────┐◀───────────────┘
//!                       │  Generator  │ OpenAI / Gemini / fake
//!                       └──────┬──────┘
//!                    ┌─────────┴─────────┐
//!                    ▼                   ▼
//!               ┌─────────┐        ┌──────────┐
//!               │   CLI   │        │   HTTP   │
//!               └─────────┘        └──────────┘
//! ```
//!
//! The provider-independent pieces (tokenizer, chunker, traits, in-memory
//! store, prompt construction, and the [`Pipeline`]) live in
//! `citerag-core`. This crate adds configuration, the networked and local
//! backends, document intake, the HTTP service, and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`embedding`] | OpenAI, local, and fake embedding providers |
//! | [`llm`] | OpenAI and Gemini answer generators |
//! | [`vector_store`] | Chroma client and store factory |
//! | [`pipeline`] | Building a pipeline from configuration |
//! | [`extract`] | PDF/DOCX/text extraction |
//! | [`ingest`] | Batch intake with per-document outcomes |
//! | [`server`] | HTTP service |
//! | [`commands`] | CLI subcommands |

pub mod commands;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod server;
pub mod vector_store;

pub use citerag_core::models;
pub use pipeline::{build_pipeline, Pipeline};
