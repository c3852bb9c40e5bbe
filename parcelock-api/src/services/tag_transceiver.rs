//! Tag read/write with scoped hardware access
//!
//! Every call claims the reader, performs one blocking exchange and releases
//! it again, on the blocking thread pool. A per-device lock keeps concurrent
//! requests from driving the chip at the same time.

use crate::hardware::{normalize_payload, HardwareError, TagDriver, TagReading, TagSession, TAG_PAYLOAD_LEN};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

/// Shared handle to the tag reader
#[derive(Clone)]
pub struct TagTransceiver {
    driver: Arc<dyn TagDriver>,
    device_lock: Arc<Mutex<()>>,
}

impl TagTransceiver {
    pub fn new(driver: Arc<dyn TagDriver>) -> Self {
        Self {
            driver,
            device_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Wait for a tag and return its id and stored text
    pub async fn read(&self) -> Result<TagReading, HardwareError> {
        let started = Instant::now();
        let reading = self.exclusive(|session| session.read()).await?;
        info!(
            tag = reading.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tag read"
        );
        Ok(reading)
    }

    /// Write `text`, normalized to exactly one block, and return what was stored
    pub async fn write(&self, text: &str) -> Result<[u8; TAG_PAYLOAD_LEN], HardwareError> {
        let payload = normalize_payload(text);
        let started = Instant::now();
        self.exclusive(move |session| session.write(&payload)).await?;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tag written"
        );
        Ok(payload)
    }

    async fn exclusive<T, F>(&self, op: F) -> Result<T, HardwareError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn TagSession) -> Result<T, HardwareError> + Send + 'static,
    {
        let driver = Arc::clone(&self.driver);
        let lock = Arc::clone(&self.device_lock);

        tokio::task::spawn_blocking(move || {
            let _device = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            debug!("Reader claimed");
            let mut session = driver.open()?;
            let result = op(&mut *session);
            drop(session);
            result
        })
        .await
        .map_err(|e| HardwareError::Task(e.to_string()))?
    }
}
