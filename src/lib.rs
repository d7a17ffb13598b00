// src/lib.rs

//! Climbing area aggregator library

pub mod error;
pub mod models;
pub mod parsing;
pub mod pipeline;
pub mod storage;
pub mod utils;
