//! Library crate for duo-dare, exposing modules for the headless player and integration tests.

pub mod config;
pub mod content;
pub mod dao;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;
