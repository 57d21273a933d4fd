//! External delivery channels for transition actions.

pub mod email;
pub mod webhook;
