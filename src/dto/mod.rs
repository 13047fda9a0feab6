//! User-facing input types and their validation.

pub mod profile;
pub mod validation;
