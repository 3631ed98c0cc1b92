// src/lib.rs

pub mod storage;
pub mod tus;
pub mod service;
pub mod app_state;
pub mod config;
pub mod error;
