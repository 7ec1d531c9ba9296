//! Accorcia CLI Library
//!
//! Log in to the shortlink backend, keep the credential on disk and watch
//! visits arrive live over the STOMP channel.

pub mod auth_cmd;
pub mod credentials;
pub mod get_cmd;
pub mod watch_cmd;
