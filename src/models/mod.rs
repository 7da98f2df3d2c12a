// src/models/mod.rs

pub mod challenge;
pub mod progress;
pub mod user;
pub mod vote;
