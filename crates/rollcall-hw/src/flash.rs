//! Flash control: a fire-and-forget HTTP trigger behind a debounce window.
//!
//! The flash confirms a new attendance record to the person in front of the
//! camera. It is strictly best-effort: failures are logged and forgotten.

use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("flash endpoint returned HTTP {0}")]
    Status(u16),
    #[error("flash request failed: {0}")]
    Transport(String),
}

/// The physical side effect.
pub trait FlashTrigger {
    fn fire(&self) -> Result<(), FlashError>;
}

/// Flash exposed as an HTTP endpoint; 200 means it blinked.
pub struct HttpFlash {
    url: String,
    agent: ureq::Agent,
}

impl HttpFlash {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FlashTrigger for HttpFlash {
    fn fire(&self) -> Result<(), FlashError> {
        match self.agent.get(&self.url).call() {
            Ok(resp) if resp.status() == 200 => Ok(()),
            Ok(resp) => Err(FlashError::Status(resp.status())),
            Err(ureq::Error::Status(code, _)) => Err(FlashError::Status(code)),
            Err(ureq::Error::Transport(t)) => Err(FlashError::Transport(t.to_string())),
        }
    }
}

/// At most one acquisition per rolling window, decided at call time.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns true (and restarts the window) if the window has elapsed.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let ready = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.window,
        };
        if ready {
            self.last = Some(now);
        }
        ready
    }
}

/// Debounced flash. Owns its debounce state so every caller shares one window.
pub struct FlashNotifier<T: FlashTrigger> {
    trigger: T,
    debounce: Debounce,
}

impl<T: FlashTrigger> FlashNotifier<T> {
    pub fn new(trigger: T, window: Duration) -> Self {
        Self {
            trigger,
            debounce: Debounce::new(window),
        }
    }

    /// Fire the flash unless it fired less than one window ago.
    ///
    /// Returns whether a trigger was attempted. The window restarts on every
    /// attempt, successful or not.
    pub fn notify(&mut self) -> bool {
        self.notify_at(Instant::now())
    }

    pub fn notify_at(&mut self, now: Instant) -> bool {
        if !self.debounce.try_acquire(now) {
            tracing::debug!("flash suppressed by debounce");
            return false;
        }
        match self.trigger.fire() {
            Ok(()) => tracing::info!("flash triggered"),
            Err(e) => tracing::warn!(error = %e, "failed to trigger flash"),
        }
        true
    }

    pub fn trigger(&self) -> &T {
        &self.trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingFlash {
        fired: Cell<usize>,
        fail: bool,
    }

    impl FlashTrigger for CountingFlash {
        fn fire(&self) -> Result<(), FlashError> {
            self.fired.set(self.fired.get() + 1);
            if self.fail {
                Err(FlashError::Transport("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_debounce_first_call_fires() {
        let mut d = Debounce::new(DEFAULT_DEBOUNCE);
        assert!(d.try_acquire(Instant::now()));
    }

    #[test]
    fn test_debounce_window() {
        let t0 = Instant::now();
        let mut d = Debounce::new(Duration::from_secs(1));
        assert!(d.try_acquire(t0));
        assert!(!d.try_acquire(t0 + Duration::from_millis(999)));
        assert!(d.try_acquire(t0 + Duration::from_secs(1)));
        assert!(!d.try_acquire(t0 + Duration::from_millis(1500)));
    }

    #[test]
    fn test_two_notifies_within_window_fire_once() {
        let t0 = Instant::now();
        let mut notifier = FlashNotifier::new(CountingFlash::default(), DEFAULT_DEBOUNCE);
        assert!(notifier.notify_at(t0));
        assert!(!notifier.notify_at(t0 + Duration::from_millis(400)));
        assert_eq!(notifier.trigger().fired.get(), 1);

        assert!(notifier.notify_at(t0 + Duration::from_millis(1200)));
        assert_eq!(notifier.trigger().fired.get(), 2);
    }

    #[test]
    fn test_failed_trigger_still_starts_window() {
        let t0 = Instant::now();
        let flash = CountingFlash { fail: true, ..Default::default() };
        let mut notifier = FlashNotifier::new(flash, DEFAULT_DEBOUNCE);
        assert!(notifier.notify_at(t0));
        assert!(!notifier.notify_at(t0 + Duration::from_millis(10)));
        assert_eq!(notifier.trigger().fired.get(), 1);
    }

    #[test]
    fn test_http_flash_status() {
        let Ok(server) = tiny_http::Server::http("127.0.0.1:0") else {
            eprintln!("skipping test: cannot bind local port");
            return;
        };
        let Some(addr) = server.server_addr().to_ip() else { return };
        std::thread::spawn(move || {
            for status in [200u16, 500] {
                let Ok(request) = server.recv() else { return };
                let _ = request.respond(tiny_http::Response::empty(status));
            }
        });

        let flash = HttpFlash::new(&format!("http://{addr}/flash"), Duration::from_secs(2));
        assert!(flash.fire().is_ok());
        assert!(matches!(flash.fire(), Err(FlashError::Status(500))));
    }

    #[test]
    fn test_http_flash_unreachable() {
        let addr = {
            let Ok(listener) = std::net::TcpListener::bind("127.0.0.1:0") else {
                eprintln!("skipping test: cannot bind local port");
                return;
            };
            listener.local_addr().unwrap()
        };
        let flash = HttpFlash::new(&format!("http://{addr}/flash"), Duration::from_secs(2));
        assert!(matches!(flash.fire(), Err(FlashError::Transport(_))));
    }
}
