//! In-memory Pageant for tests and non-Windows development.
//!
//! Regions are plain byte buffers; "sending the window message" calls a
//! responder closure with the request frame and writes its return value back
//! into the region, the way the real agent does.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use agent_bridge_core::protocol::declared_length;
use agent_bridge_core::protocol::frame::frame_len;

use super::{PageantIpc, SharedRegion};
use crate::domain::BridgeError;

type Responder = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// A fake Pageant that answers every request with a closure.
pub struct InMemoryPageant {
    /// `None` simulates a missing Pageant window.
    responder: Option<Responder>,
    latency: Duration,
    live: Arc<Mutex<HashSet<String>>>,
    names: Mutex<Vec<String>>,
}

impl InMemoryPageant {
    /// Creates a fake agent that replies with `responder(request_frame)`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            latency: Duration::ZERO,
            live: Arc::default(),
            names: Mutex::default(),
        }
    }

    /// Creates a fake with no agent window: every notification fails.
    pub fn without_window() -> Self {
        Self {
            responder: None,
            latency: Duration::ZERO,
            live: Arc::default(),
            names: Mutex::default(),
        }
    }

    /// Makes every notification block for `latency`, like a slow agent.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Names of every region created so far, in creation order.
    pub fn region_names(&self) -> Vec<String> {
        lock(&self.names).clone()
    }

    /// Number of regions that have not been released yet.
    pub fn live_regions(&self) -> usize {
        lock(&self.live).len()
    }
}

impl PageantIpc for InMemoryPageant {
    type Region = InMemoryRegion;

    fn create_region(&self, name: &str, size: usize) -> Result<InMemoryRegion, BridgeError> {
        if !lock(&self.live).insert(name.to_string()) {
            return Err(BridgeError::backend_unavailable(format!(
                "shared region {name} already exists"
            )));
        }
        lock(&self.names).push(name.to_string());

        Ok(InMemoryRegion {
            name: name.to_string(),
            buf: vec![0; size],
            live: Arc::clone(&self.live),
        })
    }

    fn notify_agent(&self, region: &mut InMemoryRegion) -> Result<(), BridgeError> {
        let responder = self
            .responder
            .as_ref()
            .ok_or_else(|| BridgeError::backend_unavailable("Pageant window not found"))?;

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let request_len = declared_length(&region.buf)
            .map(frame_len)
            .unwrap_or(0)
            .min(region.buf.len());
        let reply = responder(&region.buf[..request_len]);

        let n = reply.len().min(region.buf.len());
        region.buf[..n].copy_from_slice(&reply[..n]);
        Ok(())
    }
}

/// A region backed by a `Vec<u8>`.  Unregisters its name when dropped.
pub struct InMemoryRegion {
    name: String,
    buf: Vec<u8>,
    live: Arc<Mutex<HashSet<String>>>,
}

impl SharedRegion for InMemoryRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for InMemoryRegion {
    fn drop(&mut self) {
        lock(&self.live).remove(&self.name);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
