//! Synthetic persona browsing agent.
//!
//! A language-model-driven "persona" browses a website to accomplish a goal.
//! The core is an append-only memory stream with weighted retrieval and a
//! two-loop controller (fast: perceive/plan/act, slow: reflect/wonder); the
//! HTTP API, recorder, and persona generator are thin adapters around it.

pub mod agent;
pub mod browser;
pub mod config;
pub mod embedding;
pub mod llm_client;
pub mod memory;
pub mod parse;
pub mod persona;
pub mod recorder;
pub mod server;
pub mod session;
