// src/runtime/mod.rs

pub(crate) mod waitgroup;

pub(crate) use waitgroup::WaitGroup;
