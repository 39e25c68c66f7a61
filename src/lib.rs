//! VIGIL — Cost-Aware Adaptive Trading Decision Engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod trigger;
pub mod credit;
pub mod fusion;
pub mod strategy;
pub mod risk;
pub mod allocation;
pub mod analyst;
pub mod market;
pub mod supervisor;
pub mod engine;
pub mod storage;
