//! Compartment servo sequencing

use crate::hardware::{HardwareError, ServoDriver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::info;

/// Angle that opens the compartment
pub const OPEN_ANGLE: f64 = 90.0;
/// Angle that closes it again
pub const CLOSED_ANGLE: f64 = -90.0;

/// Drives the servo through open → hold → close → hold
#[derive(Clone)]
pub struct ActuatorController {
    driver: Arc<dyn ServoDriver>,
    device_lock: Arc<Mutex<()>>,
    close_hold: Duration,
}

impl ActuatorController {
    pub fn new(driver: Arc<dyn ServoDriver>, close_hold: Duration) -> Self {
        Self {
            driver,
            device_lock: Arc::new(Mutex::new(())),
            close_hold,
        }
    }

    /// Open for `open_for`, then close and hold for the configured interval
    ///
    /// Blocks the calling request for the whole sequence. The servo is
    /// detached when the sequence ends, successfully or not.
    pub async fn actuate(&self, open_for: Duration) -> Result<(), HardwareError> {
        let driver = Arc::clone(&self.driver);
        let lock = Arc::clone(&self.device_lock);
        let close_hold = self.close_hold;

        info!(open_ms = open_for.as_millis() as u64, "Actuating compartment");

        tokio::task::spawn_blocking(move || {
            let _device = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut servo = driver.attach()?;

            servo.set_angle(OPEN_ANGLE)?;
            thread::sleep(open_for);
            servo.set_angle(CLOSED_ANGLE)?;
            thread::sleep(close_hold);

            Ok(())
        })
        .await
        .map_err(|e| HardwareError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedServoDriver;
    use std::time::Instant;

    #[tokio::test]
    async fn test_open_then_close_sequence() {
        let servo = Arc::new(SimulatedServoDriver::new());
        let actuator = ActuatorController::new(servo.clone(), Duration::from_millis(20));

        let started = Instant::now();
        actuator.actuate(Duration::from_millis(30)).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(servo.angles(), vec![OPEN_ANGLE, CLOSED_ANGLE]);
        assert_eq!(servo.attached(), 0);
    }

    #[tokio::test]
    async fn test_attach_failure_is_reported() {
        let servo = Arc::new(SimulatedServoDriver::new());
        servo.set_fault(Some("GPIO 18 busy"));
        let actuator = ActuatorController::new(servo.clone(), Duration::ZERO);

        let err = actuator.actuate(Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, HardwareError::Open { .. }));
        assert!(servo.angles().is_empty());
    }
}
