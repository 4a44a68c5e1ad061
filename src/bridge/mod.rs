//! Bridge runtime.
//!
//! Wires the decision core to its collaborators and runs the two flows
//! that share the [`FanController`]:
//!
//! - the sensor flow ([`SensorLoop`]), one cycle per sensor frame
//! - the command flow ([`CommandLoop`]), one step per operator command
//!
//! plus the background publisher draining the outbound queue.

pub mod command_loop;
pub mod sensor_loop;

pub use command_loop::CommandLoop;
pub use sensor_loop::{CycleReport, SensorLoop};

use crate::actuator::{Actuator, ActuatorDriver};
use crate::config::{Config, ConfigError, PublishConfig, Topics};
use crate::core::{AnomalyDetector, FanController, ReceivedCommand};
use crate::dataset::PeerDataset;
use crate::messaging::{run_publisher, MessageSink, PublishPolicy, Publisher};
use crate::sensor::SensorFrame;
use crate::shutdown::ShutdownTrigger;
use crate::stats::{SharedStats, StatsSnapshot};
use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Collaborators handed to [`Bridge::run`].
pub struct BridgeIo {
    pub frames: mpsc::Receiver<SensorFrame>,
    pub commands: mpsc::Receiver<ReceivedCommand>,
    pub dataset: Box<dyn PeerDataset>,
    pub actuator: Arc<dyn Actuator>,
    pub sink: Arc<dyn MessageSink>,
}

/// The assembled gateway.
pub struct Bridge {
    controller: Arc<FanController>,
    detector: AnomalyDetector,
    topics: Topics,
    tz: Tz,
    publish: PublishConfig,
    stats: SharedStats,
}

impl Bridge {
    /// Build a bridge from a validated configuration.
    pub fn new(config: &Config, stats: SharedStats) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            controller: Arc::new(FanController::new(config.cooldown)),
            detector: AnomalyDetector::from_config(&config.detection),
            topics: config.topics(),
            tz: config.tz()?,
            publish: config.publish.clone(),
            stats,
        })
    }

    /// The shared fan controller.
    pub fn controller(&self) -> Arc<FanController> {
        Arc::clone(&self.controller)
    }

    /// Run both flows until the sensor stream ends or shutdown is triggered.
    ///
    /// When the sensor flow finishes, shutdown is triggered for the command
    /// flow; the publisher then drains what is left in its queue.
    pub async fn run(self, io: BridgeIo, shutdown: ShutdownTrigger) -> StatsSnapshot {
        let (publisher, outbound) = Publisher::new(
            self.publish.queue_capacity,
            self.topics.clone(),
            self.tz,
            self.stats.clone(),
        );
        let actuator = Arc::new(ActuatorDriver::new(io.actuator));

        info!(
            telemetry = %self.topics.telemetry,
            commands = %self.topics.commands,
            "Bridge started"
        );

        // Bring the hardware in line with the initial intent.
        publisher.publish_fan_state(self.controller.state(), Utc::now());
        drive_actuator(&actuator, &self.controller, &self.stats).await;

        let publisher_task = tokio::spawn(run_publisher(
            io.sink,
            outbound,
            PublishPolicy::from(&self.publish),
            self.stats.clone(),
            shutdown.signal(),
        ));

        let command_task = tokio::spawn(
            CommandLoop::new(
                self.controller.clone(),
                actuator.clone(),
                publisher.clone(),
                self.stats.clone(),
            )
            .run(io.commands, shutdown.signal()),
        );

        let sensor_task = tokio::spawn(
            SensorLoop::new(
                self.controller.clone(),
                self.detector,
                io.dataset,
                actuator.clone(),
                publisher,
                self.stats.clone(),
            )
            .run(io.frames, shutdown.signal()),
        );

        if let Err(e) = sensor_task.await {
            error!(error = %e, "Sensor flow panicked");
        }
        shutdown.trigger();

        if let Err(e) = command_task.await {
            error!(error = %e, "Command flow panicked");
        }
        if let Err(e) = publisher_task.await {
            error!(error = %e, "Publisher panicked");
        }

        info!(state = ?self.controller.state(), "Bridge stopped");
        self.stats.stats()
    }
}

/// Push the controller's current intent to the actuator, recording failures.
pub(crate) async fn drive_actuator(
    actuator: &ActuatorDriver,
    controller: &FanController,
    stats: &SharedStats,
) {
    match actuator.push_intent(controller).await {
        Ok(on) => tracing::debug!(on, "Actuator updated"),
        Err(e) => {
            stats.record_actuator_failure();
            warn!(error = %e, "Actuator write failed, will retry on a later cycle");
        }
    }
}
