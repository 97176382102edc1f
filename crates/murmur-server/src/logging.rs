use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset. Verification codes are logged at
/// `trace`, which this never enables.
pub const DEFAULT_FILTER: &str =
    "murmur_server=debug,murmur_api=debug,murmur_gateway=debug,murmur_db=info,tower_http=debug";

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use murmur_api::notify::{CodeNotifier, LogNotifier};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn default_filter_keeps_codes_out_of_the_log() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(DEFAULT_FILTER))
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            LogNotifier.send_code("+15550000001", "424242").unwrap();
        });

        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains("+15550000001"));
        assert!(!log.contains("424242"));
    }
}
