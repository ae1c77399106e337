// src/protocol/mod.rs

//! Wire protocol: command encoding and response frame decoding.

pub mod command;
pub mod frame;
