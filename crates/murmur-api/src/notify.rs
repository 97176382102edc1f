use tracing::{info, trace};

/// Outbound channel for verification codes (an SMS gateway in production).
pub trait CodeNotifier: Send + Sync {
    fn send_code(&self, phone: &str, code: &str) -> anyhow::Result<()>;
}

/// Development notifier: writes the code to the log instead of sending it.
pub struct LogNotifier;

impl CodeNotifier for LogNotifier {
    fn send_code(&self, phone: &str, code: &str) -> anyhow::Result<()> {
        info!("Verification code issued for {} (log delivery)", phone);
        trace!("Verification code for {}: {}", phone, code);
        Ok(())
    }
}
