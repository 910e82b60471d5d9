//! Wi-Fi client state machine.
//!
//! Mutex-guarded single-state-machine, following the same shape as
//! `PairingManager`: one lock serializes transitions, timeouts are checked
//! against a stored deadline rather than driven by a dedicated thread per
//! transition, and listener callbacks are invoked outside the lock.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Surfaced to the requester's listener channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiEvent {
    Connected,
    Disconnected,
    WifiTimeout,
    WifiAuthentication,
    WifiBusy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Idle,
    Disconnecting,
    Connecting,
    Connected,
}

/// Timeout from `request_network` to reaching `Connected`.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Platform collaborator: actually drives the OS Wi-Fi supplicant.
/// `WifiStateMachine` only sequences calls against it and reacts to the
/// events it reports.
pub trait WifiDriver: Send + Sync {
    fn disconnect(&self);
    fn enable_network(&self, ssid: &str, passphrase: &str);
    fn bind_process_to_network(&self);
    fn unbind_process(&self);
    fn forget_network(&self, ssid: &str);
}

struct Target {
    ssid: String,
    passphrase: String,
    listener: mpsc::UnboundedSender<WifiEvent>,
}

struct Inner {
    state: WifiState,
    target: Option<Target>,
    deadline: Option<Instant>,
    timeout_task: Option<JoinHandle<()>>,
}

pub struct WifiStateMachine {
    inner: Mutex<Inner>,
    driver: Arc<dyn WifiDriver>,
}

impl WifiStateMachine {
    pub fn new(driver: Arc<dyn WifiDriver>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: WifiState::Idle,
                target: None,
                deadline: None,
                timeout_task: None,
            }),
            driver,
        })
    }

    pub fn state(&self) -> WifiState {
        self.inner.lock().expect("wifi lock poisoned").state
    }

    /// Begins connecting to `ssid`. Rejects immediately (asynchronously, on
    /// `listener`) with `WifiBusy` if not currently `Idle`.
    pub fn request_network(
        self: &Arc<Self>,
        ssid: String,
        passphrase: String,
        listener: mpsc::UnboundedSender<WifiEvent>,
    ) {
        let mut inner = self.inner.lock().expect("wifi lock poisoned");
        if inner.state != WifiState::Idle {
            let _ = listener.send(WifiEvent::WifiBusy);
            return;
        }
        inner.state = WifiState::Disconnecting;
        inner.target = Some(Target { ssid, passphrase, listener });
        inner.deadline = Some(Instant::now() + REQUEST_TIMEOUT);
        drop(inner);

        self.driver.disconnect();
        self.schedule_timeout();
    }

    fn schedule_timeout(self: &Arc<Self>) {
        let me = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(REQUEST_TIMEOUT).await;
            me.on_timeout_elapsed();
        });
        self.inner.lock().expect("wifi lock poisoned").timeout_task = Some(handle);
    }

    fn on_timeout_elapsed(&self) {
        let mut inner = self.inner.lock().expect("wifi lock poisoned");
        if inner.state == WifiState::Idle {
            return;
        }
        let target = inner.target.take();
        inner.state = WifiState::Idle;
        inner.deadline = None;
        drop(inner);
        self.driver.unbind_process();
        if let Some(target) = target {
            let _ = target.listener.send(WifiEvent::WifiTimeout);
        }
    }

    /// Reports an OS-observed disconnection event while mid-transition.
    pub fn on_disconnected(&self) {
        let mut inner = self.inner.lock().expect("wifi lock poisoned");
        if inner.state != WifiState::Disconnecting {
            return;
        }
        let Some(target) = inner.target.as_ref() else { return };
        inner.state = WifiState::Connecting;
        self.driver.enable_network(&target.ssid, &target.passphrase);
    }

    /// Reports an OS-observed connection to `ssid`. If it matches the
    /// requested SSID, binds the process network and transitions to
    /// `Connected`; otherwise re-issues disconnect.
    pub fn on_connected(&self, ssid: &str) {
        let mut inner = self.inner.lock().expect("wifi lock poisoned");
        if inner.state != WifiState::Connecting {
            return;
        }
        let Some(target) = inner.target.as_ref() else { return };
        if target.ssid != ssid {
            self.driver.disconnect();
            return;
        }
        inner.state = WifiState::Connected;
        self.cancel_timeout(&mut inner);
        self.driver.bind_process_to_network();
        if let Some(target) = inner.target.as_ref() {
            let _ = target.listener.send(WifiEvent::Connected);
        }
    }

    /// Reports a supplicant authentication failure.
    pub fn on_authentication_error(&self) {
        let mut inner = self.inner.lock().expect("wifi lock poisoned");
        if inner.state == WifiState::Idle {
            return;
        }
        let target = inner.target.take();
        inner.state = WifiState::Idle;
        self.cancel_timeout(&mut inner);
        drop(inner);
        self.driver.unbind_process();
        if let Some(target) = target {
            let _ = target.listener.send(WifiEvent::WifiAuthentication);
        }
    }

    pub fn release_network(&self, forget: bool) {
        let mut inner = self.inner.lock().expect("wifi lock poisoned");
        let target = inner.target.take();
        inner.state = WifiState::Idle;
        self.cancel_timeout(&mut inner);
        drop(inner);
        self.driver.unbind_process();
        if forget {
            if let Some(target) = &target {
                self.driver.forget_network(&target.ssid);
            }
        }
    }

    fn cancel_timeout(&self, inner: &mut Inner) {
        if let Some(handle) = inner.timeout_task.take() {
            handle.abort();
        }
        inner.deadline = None;
    }
}
