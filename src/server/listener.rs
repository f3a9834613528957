//! Request/response observers installed by server extensions

use std::sync::Arc;
use tracing::trace;
use warp::http::{Method, StatusCode};

/// Observer of HTTP traffic. Both hooks default to doing nothing.
pub trait ServerListener: Send + Sync {
    fn on_request(&self, _method: &Method, _path: &str) {}

    fn on_response(&self, _method: &Method, _path: &str, _status: StatusCode) {}
}

/// Listeners in installation order
#[derive(Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn ServerListener>>,
}

impl ListenerSet {
    pub fn new(listeners: Vec<Arc<dyn ServerListener>>) -> Self {
        Self { listeners }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify_request(&self, method: &Method, path: &str) {
        trace!(listeners = self.listeners.len(), %method, %path, "Notifying request listeners");
        for listener in &self.listeners {
            listener.on_request(method, path);
        }
    }

    pub fn notify_response(&self, method: &Method, path: &str, status: StatusCode) {
        for listener in &self.listeners {
            listener.on_response(method, path, status);
        }
    }
}
