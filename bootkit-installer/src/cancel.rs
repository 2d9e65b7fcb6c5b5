//! Ctrl+C cancellation handling.
//!
//! The handler only flips the shared [`CancelToken`]; the executor notices it
//! before the next step or during a retry backoff.

use bootkit_core::CancelToken;
use std::sync::OnceLock;

static HANDLER_SET: OnceLock<()> = OnceLock::new();

pub fn install_ctrlc_handler(token: &CancelToken) -> anyhow::Result<()> {
    if HANDLER_SET.get().is_some() {
        return Ok(());
    }

    let token = token.clone();
    ctrlc::set_handler(move || {
        token.cancel();
        log::warn!("Cancellation requested (Ctrl+C); finishing the current step.");
    })?;

    let _ = HANDLER_SET.set(());
    Ok(())
}
