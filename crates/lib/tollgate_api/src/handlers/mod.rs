//! Request handlers.

pub mod me;
pub mod oauth;
pub mod tokens;
pub mod well_known;
