//! Room lifecycle, game session coordination and per-device synchronization.

pub mod controller;
pub mod room_service;
pub mod session_service;
pub mod subscription;
pub mod sync_service;
