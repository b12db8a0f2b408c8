// ABOUTME: Library entry point for the stretch coach API
// ABOUTME: Semantic exercise retrieval with streamed AI guide generation over HTTP
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

#![deny(unsafe_code)]

//! # Stretch Coach
//!
//! A stretching-exercise recommendation service. Users describe their pain and
//! daily routine, the service retrieves the closest exercises from a curated
//! corpus by embedding similarity, and a language model turns the retrieved
//! exercises into a personalized coaching guide, streamed token by token.
//! When the model is unavailable the service degrades to a deterministic
//! template guide, so every request ends in usable advice.
//!
//! ## Architecture
//!
//! - **Corpus**: exercise records and precomputed vectors, searched with a
//!   local BERT-family embedder running on CPU
//! - **LLM**: an `OpenAI`-compatible chat backend behind a provider trait,
//!   with SSE stream decoding
//! - **Database**: `SQLite` storage for ephemeral sessions with TTL and
//!   durable accounts with merged history
//! - **Services**: guide orchestration under an admission gate, plus the
//!   idempotent session-to-account merge
//! - **Routes**: the `axum` HTTP surface
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stretch_coach::config::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     stretch_coach::server::run(config).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod corpus;
pub mod database;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod models;
pub mod routes;
pub mod server;
pub mod services;
