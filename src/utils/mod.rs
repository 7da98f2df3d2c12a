// src/utils/mod.rs

pub mod auth;
