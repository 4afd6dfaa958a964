//! Domain model module declarations.

pub mod clone_state;
pub mod message;
pub mod question;
pub mod session;
