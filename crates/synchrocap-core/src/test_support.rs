//! Helpers shared by unit tests

use std::io;
use std::sync::{Arc, Mutex};

struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Log output at debug level produced on this thread while `f` runs
pub fn captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&buffer);
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || LogBuffer(Arc::clone(&writer)))
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.lock().unwrap().clone();
    (value, String::from_utf8_lossy(&bytes).into_owned())
}
