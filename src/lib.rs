//! emoji-snip: capture a region of the screen (or a recording), edit it and
//! export it as a custom chat emoji under the workspace size limit.
//!
//! The pieces mirror the three contexts of the capture flow:
//! - Background service (background.rs): tab screenshots, opening pages
//! - Capture agent (capture/): region selection, screen recording
//! - Editor (editor/): crop, chroma key, GIF export, compression
//!
//! They only talk through the typed channels in messaging.rs.

pub mod background;
pub mod capture;
pub mod config;
pub mod editor;
pub mod messaging;
pub mod settings;
pub mod status;

/// Initialise `env_logger`, defaulting to `info`. Safe to call twice.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
