//! # Slauth token
//!
//! Authenticator side of U2F over USB HID: channel multiplexing, message
//! framing and the credential engine of a hardware security key.

/// Device configuration
pub mod config;
/// Millisecond countdown timers
pub mod timer;
pub mod u2f;
