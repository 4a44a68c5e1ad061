//! Sensor-driven flow.
//!
//! One cycle per sensor frame: aggregate peers, decide, feed the fan
//! controller, drive the actuator and publish.

use super::drive_actuator;
use crate::actuator::ActuatorDriver;
use crate::core::{compute_baseline, AnomalyDetector, AnomalyVerdict, AutoOutcome, FanController};
use crate::dataset::PeerDataset;
use crate::messaging::Publisher;
use crate::sensor::{GasReading, SensorFrame};
use crate::shutdown::ShutdownSignal;
use crate::stats::SharedStats;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What one sensor cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    /// The frame did not decode; nothing else happened
    Dropped,
    /// No peer readings were available, so no decision was taken
    NoBaseline { reading: GasReading },
    /// A verdict was computed and fed to the controller
    Evaluated {
        verdict: AnomalyVerdict,
        outcome: AutoOutcome,
    },
}

pub struct SensorLoop {
    controller: Arc<FanController>,
    detector: AnomalyDetector,
    dataset: Box<dyn PeerDataset>,
    actuator: Arc<ActuatorDriver>,
    publisher: Publisher,
    stats: SharedStats,
}

impl SensorLoop {
    pub fn new(
        controller: Arc<FanController>,
        detector: AnomalyDetector,
        dataset: Box<dyn PeerDataset>,
        actuator: Arc<ActuatorDriver>,
        publisher: Publisher,
        stats: SharedStats,
    ) -> Self {
        Self {
            controller,
            detector,
            dataset,
            actuator,
            publisher,
            stats,
        }
    }

    /// Process frames until the stream ends or shutdown is triggered.
    pub async fn run(mut self, mut frames: mpsc::Receiver<SensorFrame>, mut shutdown: ShutdownSignal) {
        info!("Sensor flow started");

        loop {
            let frame = tokio::select! {
                _ = shutdown.wait() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => {
                        info!("Sensor stream ended");
                        break;
                    }
                },
            };

            self.process_frame(frame).await;
        }

        info!("Sensor flow stopped");
    }

    /// Run one cycle for a single frame.
    pub async fn process_frame(&mut self, frame: SensorFrame) -> CycleReport {
        let reading = match frame {
            SensorFrame::Reading(reading) => reading,
            SensorFrame::Malformed(line) => {
                self.stats.record_decode_error();
                debug!(line = %line, "Dropping malformed sensor line");
                return CycleReport::Dropped;
            }
        };
        self.stats.record_reading();

        let now = reading.observed_at;
        let baseline = compute_baseline(&self.dataset.current_values());

        let report = if baseline.is_available() {
            let verdict = self.detector.check(reading.value, &baseline, now);
            let outcome = self.controller.apply_auto(&verdict, now);
            self.on_verdict(&verdict, &outcome).await;
            CycleReport::Evaluated { verdict, outcome }
        } else {
            self.stats.record_baseline_unavailable();
            debug!(gas = reading.value, "No peer baseline, skipping anomaly check");
            CycleReport::NoBaseline { reading }
        };

        if !matches!(
            report,
            CycleReport::Evaluated {
                outcome: AutoOutcome::Switched(_),
                ..
            }
        ) {
            self.reconcile().await;
        }

        let anomalous = matches!(report, CycleReport::Evaluated { ref verdict, .. } if verdict.is_anomalous);
        self.publisher
            .publish_telemetry(&reading, anomalous, self.actuator.is_degraded());
        if let CycleReport::Evaluated { ref verdict, .. } = report {
            if verdict.is_anomalous {
                self.publisher.publish_alert(verdict);
            }
        }

        report
    }

    async fn on_verdict(&self, verdict: &AnomalyVerdict, outcome: &AutoOutcome) {
        if verdict.is_anomalous {
            self.stats.record_anomaly();
            warn!(
                gas = verdict.local_value,
                baseline_mean = verdict.baseline.mean,
                peers = verdict.baseline.sample_count,
                "Anomalous gas reading"
            );
        }

        match outcome {
            AutoOutcome::Switched(signal) => {
                self.stats.record_auto_transition();
                info!(on = signal.is_on(), "Automatic fan transition");
                self.publisher
                    .publish_fan_state(self.controller.state(), verdict.decided_at);
                drive_actuator(&self.actuator, &self.controller, &self.stats).await;
            }
            AutoOutcome::CoolingDown { remaining } => {
                debug!(
                    remaining_ms = remaining.num_milliseconds(),
                    "Transition deferred by cooldown"
                );
            }
            AutoOutcome::ManualOverride => {
                debug!(anomalous = verdict.is_anomalous, "Verdict recorded under manual override");
            }
            AutoOutcome::Steady => {}
        }
    }

    /// Retry the current intent after an earlier failed write.
    async fn reconcile(&self) {
        match self.actuator.reconcile(&self.controller).await {
            Some(Ok(on)) => info!(on, "Actuator reconciled"),
            Some(Err(e)) => {
                self.stats.record_actuator_failure();
                debug!(error = %e, "Actuator still unavailable");
            }
            None => {}
        }
    }
}
