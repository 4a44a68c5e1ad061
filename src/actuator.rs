//! Ventilation actuator port.
//!
//! [`Actuator`] is the narrow write interface to the fan hardware.
//! [`ActuatorDriver`] serializes writes, always pushes the controller's
//! *current* intent, and remembers whether the last write failed so the
//! sensor loop can reconcile physical state on a later cycle.

use crate::core::FanController;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

/// Write interface to the fan hardware.
pub trait Actuator: Send + Sync {
    /// Switch the fan on or off.
    fn set_actuator(&self, on: bool) -> Result<(), ActuatorError>;
}

/// Actuator write failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorError {
    /// The underlying link is currently down
    Disconnected,
    /// The write itself failed
    Io(String),
}

impl std::fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActuatorError::Disconnected => write!(f, "Actuator link is disconnected"),
            ActuatorError::Io(e) => write!(f, "Actuator write failed: {e}"),
        }
    }
}

impl std::error::Error for ActuatorError {}

/// Drives an [`Actuator`] from controller intent.
pub struct ActuatorDriver {
    actuator: Arc<dyn Actuator>,
    /// Held across a write so concurrent flows cannot reorder hardware writes
    write_lock: AsyncMutex<()>,
    /// Last state confirmed by a successful write
    confirmed: Mutex<Option<bool>>,
    /// Whether the most recent write failed
    degraded: AtomicBool,
}

impl ActuatorDriver {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self {
            actuator,
            write_lock: AsyncMutex::new(()),
            confirmed: Mutex::new(None),
            degraded: AtomicBool::new(false),
        }
    }

    /// Write the controller's current intent to the hardware.
    ///
    /// Intent is read after the write lock is taken, so the last writer always
    /// reflects the last transition recorded by the controller.
    pub async fn push_intent(&self, controller: &FanController) -> Result<bool, ActuatorError> {
        let _guard = self.write_lock.lock().await;
        let on = controller.actuator_intent();

        let actuator = Arc::clone(&self.actuator);
        let result = tokio::task::spawn_blocking(move || actuator.set_actuator(on))
            .await
            .unwrap_or_else(|e| Err(ActuatorError::Io(format!("actuator task failed: {e}"))));

        match result {
            Ok(()) => {
                *self.confirmed.lock().unwrap_or_else(PoisonError::into_inner) = Some(on);
                self.degraded.store(false, Ordering::SeqCst);
                Ok(on)
            }
            Err(e) => {
                self.degraded.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Retry the current intent if the last write failed.
    ///
    /// Returns `None` when there was nothing to reconcile.
    pub async fn reconcile(
        &self,
        controller: &FanController,
    ) -> Option<Result<bool, ActuatorError>> {
        if !self.is_degraded() {
            return None;
        }

        if self.confirmed() == Some(controller.actuator_intent()) {
            self.degraded.store(false, Ordering::SeqCst);
            return None;
        }

        Some(self.push_intent(controller).await)
    }

    /// Whether the most recent write failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Last physical state confirmed by the hardware.
    pub fn confirmed(&self) -> Option<bool> {
        *self.confirmed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
