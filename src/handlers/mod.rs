// src/handlers/mod.rs

pub mod challenge;
pub mod membership;
pub mod progress;
pub mod vote;
pub mod winner;

mod common;
