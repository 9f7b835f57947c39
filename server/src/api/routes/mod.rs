//! API route handlers

pub mod health;
pub mod history;
pub mod notify;
