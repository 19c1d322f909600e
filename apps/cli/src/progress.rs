//! Console progress reporting.

use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};

use ota_core::events::{OtaEvent, OtaObserver, TracingObserver, percent};

/// Logs every event and draws a percentage line on stderr.
///
/// `Error` events are not logged here: `main` reports the final error.
pub struct ConsoleObserver {
    last_pct: AtomicU8,
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self {
            last_pct: AtomicU8::new(u8::MAX),
        }
    }
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OtaObserver for ConsoleObserver {
    fn on_event(&self, event: &OtaEvent) {
        if !matches!(event, OtaEvent::Error { .. }) {
            TracingObserver.on_event(event);
        }

        match event {
            OtaEvent::Progress { offset, total } => {
                let pct = percent(*offset, *total);
                if self.last_pct.swap(pct, Ordering::Relaxed) != pct {
                    let mut stderr = std::io::stderr();
                    let _ = write!(stderr, "\rTransferred {offset}/{total} bytes ({pct}%)");
                    let _ = stderr.flush();
                }
            }
            OtaEvent::Complete { .. } | OtaEvent::Error { .. } => {
                if self.last_pct.swap(u8::MAX, Ordering::Relaxed) != u8::MAX {
                    eprintln!();
                }
            }
            _ => {}
        }
    }
}
