//! Integration tests for the bridge flows

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use garage_gas_bridge::actuator::{Actuator, ActuatorDriver, ActuatorError};
use garage_gas_bridge::bridge::{Bridge, BridgeIo, CommandLoop, CycleReport, SensorLoop};
use garage_gas_bridge::config::Config;
use garage_gas_bridge::core::{
    AnomalyDetector, AutoOutcome, ControlCommand, FanController, FanState, ReceivedCommand,
};
use garage_gas_bridge::dataset::FixedDataset;
use garage_gas_bridge::messaging::{MessageSink, OutboundMessage, PublishError, Publisher};
use garage_gas_bridge::sensor::{GasReading, SensorFrame};
use garage_gas_bridge::shutdown::shutdown_channel;
use garage_gas_bridge::stats::{create_shared_stats, SharedStats};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct RecordingActuator {
    failing: AtomicBool,
    writes: Mutex<Vec<bool>>,
}

impl RecordingActuator {
    fn writes(&self) -> Vec<bool> {
        self.writes.lock().unwrap().clone()
    }
}

impl Actuator for RecordingActuator {
    fn set_actuator(&self, on: bool) -> Result<(), ActuatorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ActuatorError::Disconnected);
        }
        self.writes.lock().unwrap().push(on);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    fn payloads(&self, topic: &str) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), PublishError> {
        self.messages.lock().unwrap().push(OutboundMessage {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn reading(value: i64, secs: i64) -> SensorFrame {
    SensorFrame::Reading(GasReading::new(value, at(secs)))
}

/// A command received at `secs`, arriving in the same order as its timestamp.
fn command(command: ControlCommand, secs: i64) -> ReceivedCommand {
    arrived(command, secs, secs as u64)
}

fn arrived(command: ControlCommand, secs: i64, sequence: u64) -> ReceivedCommand {
    ReceivedCommand::new(command, at(secs), sequence)
}

fn test_config() -> Config {
    Config {
        dataset: garage_gas_bridge::config::DatasetConfig::Fixed {
            values: vec![100.0, 100.0, 100.0],
        },
        ..Config::default()
    }
}

/// Sensor and command loops wired to the same controller, without tasks.
struct Harness {
    controller: Arc<FanController>,
    actuator: Arc<RecordingActuator>,
    driver: Arc<ActuatorDriver>,
    sensor: SensorLoop,
    commands: CommandLoop,
    outbound: mpsc::Receiver<OutboundMessage>,
    stats: SharedStats,
}

impl Harness {
    fn new(peers: Vec<f64>) -> Self {
        let config = test_config();
        let stats = create_shared_stats();
        let controller = Arc::new(FanController::new(config.cooldown));
        let actuator = Arc::new(RecordingActuator::default());
        let driver = Arc::new(ActuatorDriver::new(actuator.clone()));
        let (publisher, outbound) = Publisher::new(256, config.topics(), Tz::UTC, stats.clone());

        let sensor = SensorLoop::new(
            controller.clone(),
            AnomalyDetector::from_config(&config.detection),
            Box::new(FixedDataset::new(peers)),
            driver.clone(),
            publisher.clone(),
            stats.clone(),
        );
        let commands = CommandLoop::new(controller.clone(), driver.clone(), publisher, stats.clone());

        Self {
            controller,
            actuator,
            driver,
            sensor,
            commands,
            outbound,
            stats,
        }
    }

    fn drain(&mut self, topic: &str) -> Vec<serde_json::Value> {
        let mut payloads = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            if message.topic == topic {
                payloads.push(serde_json::from_slice(&message.payload).unwrap());
            }
        }
        payloads
    }
}

#[tokio::test]
async fn test_readings_scenario_end_to_end() {
    let config = test_config();
    let topics = config.topics();
    let stats = create_shared_stats();
    let bridge = Bridge::new(&config, stats.clone()).unwrap();
    let controller = bridge.controller();

    let actuator = Arc::new(RecordingActuator::default());
    let sink = Arc::new(RecordingSink::default());
    let (frames_tx, frames_rx) = mpsc::channel(8);
    let (_commands_tx, commands_rx) = mpsc::channel(8);

    for frame in [reading(40, 0), reading(45, 1), reading(300, 2)] {
        frames_tx.send(frame).await.unwrap();
    }
    drop(frames_tx);

    let (trigger, _) = shutdown_channel();
    let io = BridgeIo {
        frames: frames_rx,
        commands: commands_rx,
        dataset: Box::new(FixedDataset::new(vec![100.0, 100.0, 100.0])),
        actuator: actuator.clone(),
        sink: sink.clone(),
    };

    let snapshot = tokio::time::timeout(Duration::from_secs(5), bridge.run(io, trigger))
        .await
        .expect("bridge should stop when the sensor stream ends");

    // Initial sync writes OFF, then exactly one ON at the third reading.
    assert_eq!(actuator.writes(), vec![false, true]);
    assert_eq!(
        controller.state(),
        FanState::Auto {
            actuator_on: true,
            last_transition_at: Some(at(2)),
        }
    );

    let telemetry = sink.payloads(&topics.telemetry);
    let anomalous: Vec<bool> = telemetry
        .iter()
        .map(|t| t["anomalous"].as_bool().unwrap())
        .collect();
    assert_eq!(anomalous, vec![false, false, true]);
    assert_eq!(telemetry[2]["gas"], 300);

    let alerts = sink.payloads(&topics.alerts);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["baseline_mean"], 100.0);

    let fan = sink.payloads(&topics.fan_state);
    assert_eq!(fan.len(), 2);
    assert_eq!(fan[1]["on"], true);
    assert_eq!(fan[1]["mode"], "auto");

    assert_eq!(snapshot.readings, 3);
    assert_eq!(snapshot.anomalies, 1);
    assert_eq!(snapshot.auto_transitions, 1);
    assert_eq!(snapshot.messages_published, 6);
    assert_eq!(snapshot.messages_dropped, 0);
}

#[tokio::test]
async fn test_malformed_frame_does_not_stop_sensor_flow() {
    let mut h = Harness::new(vec![100.0]);
    let before = h.controller.state();

    let report = h.sensor.process_frame(reading(40, 0)).await;
    assert!(matches!(
        report,
        CycleReport::Evaluated {
            outcome: AutoOutcome::Steady,
            ..
        }
    ));

    let report = h
        .sensor
        .process_frame(SensorFrame::Malformed("MQ2:??".to_string()))
        .await;
    assert_eq!(report, CycleReport::Dropped);
    assert_eq!(h.controller.state(), before);

    let report = h.sensor.process_frame(reading(300, 1)).await;
    assert!(matches!(
        report,
        CycleReport::Evaluated {
            outcome: AutoOutcome::Switched(_),
            ..
        }
    ));

    let stats = h.stats.stats();
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.readings, 2);
    assert_eq!(h.actuator.writes(), vec![true]);
}

#[tokio::test]
async fn test_manual_off_survives_anomalies_until_released() {
    let mut h = Harness::new(vec![100.0, 100.0]);

    h.sensor.process_frame(reading(300, 0)).await;
    assert!(h.controller.actuator_intent());

    h.commands
        .apply_batch(vec![command(ControlCommand::FanOff, 1)])
        .await;

    let report = h.sensor.process_frame(reading(300, 2)).await;
    assert!(matches!(
        report,
        CycleReport::Evaluated {
            outcome: AutoOutcome::ManualOverride,
            ..
        }
    ));
    assert_eq!(h.controller.state(), FanState::ManualOff);
    assert_eq!(h.actuator.writes(), vec![true, false]);

    // Releasing keeps the fan off and restarts the cooldown.
    let outcomes = h
        .commands
        .apply_batch(vec![command(ControlCommand::FanAuto, 3)])
        .await;
    assert_eq!(outcomes[0].signal, None);
    assert_eq!(h.actuator.writes(), vec![true, false]);

    h.sensor.process_frame(reading(300, 4)).await;
    assert!(!h.controller.actuator_intent());

    h.sensor.process_frame(reading(300, 8)).await;
    assert!(h.controller.actuator_intent());
    assert_eq!(h.actuator.writes(), vec![true, false, true]);
}

#[tokio::test]
async fn test_commands_apply_in_arrival_order() {
    let mut h = Harness::new(vec![100.0]);

    let outcomes = h
        .commands
        .apply_batch(vec![
            command(ControlCommand::FanAuto, 3),
            command(ControlCommand::FanOn, 1),
        ])
        .await;
    assert_eq!(outcomes.len(), 2);
    assert!(!h.controller.state().is_manual());
    assert!(h.controller.actuator_intent());

    // Replayed from before the last applied command.
    let outcomes = h
        .commands
        .apply_batch(vec![command(ControlCommand::FanOff, 2)])
        .await;
    assert!(outcomes.is_empty());
    assert_eq!(h.stats.stats().rejected_commands, 1);
    assert_eq!(h.stats.stats().manual_commands, 2);
}

#[tokio::test]
async fn test_later_command_applies_after_clock_steps_back() {
    let mut h = Harness::new(vec![100.0]);

    h.commands
        .apply_batch(vec![arrived(ControlCommand::FanOn, 10, 0)])
        .await;
    assert_eq!(h.controller.state(), FanState::ManualOn);

    let outcomes = h
        .commands
        .apply_batch(vec![arrived(ControlCommand::FanOff, 5, 1)])
        .await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(h.controller.state(), FanState::ManualOff);
    assert_eq!(h.actuator.writes(), vec![true, false]);
    assert_eq!(h.stats.stats().rejected_commands, 0);
}

#[tokio::test]
async fn test_failed_write_is_reported_and_reconciled() {
    let mut h = Harness::new(vec![100.0]);
    h.actuator.failing.store(true, Ordering::SeqCst);

    h.sensor.process_frame(reading(300, 0)).await;
    assert!(h.driver.is_degraded());
    // Intent is kept even though the hardware did not follow.
    assert!(h.controller.actuator_intent());

    h.sensor.process_frame(reading(300, 1)).await;
    assert!(h.driver.is_degraded());

    h.actuator.failing.store(false, Ordering::SeqCst);
    h.sensor.process_frame(reading(300, 2)).await;
    assert!(!h.driver.is_degraded());
    assert_eq!(h.actuator.writes(), vec![true]);

    let topic = test_config().topics().telemetry;
    let degraded: Vec<bool> = h
        .drain(&topic)
        .iter()
        .map(|t| t.get("degraded").and_then(|d| d.as_bool()).unwrap_or(false))
        .collect();
    assert_eq!(degraded, vec![true, true, false]);
    assert_eq!(h.stats.stats().actuator_failures, 2);
}

#[tokio::test]
async fn test_no_baseline_skips_decision() {
    let mut h = Harness::new(Vec::new());

    let report = h.sensor.process_frame(reading(10_000, 0)).await;
    assert!(matches!(report, CycleReport::NoBaseline { .. }));
    assert_eq!(h.controller.state(), FanState::INITIAL);
    assert_eq!(h.controller.last_verdict(), None);

    let config = test_config();
    let telemetry = h.drain(&config.topics().telemetry);
    assert_eq!(telemetry.len(), 1);
    assert_eq!(telemetry[0]["anomalous"], false);
    assert_eq!(h.stats.stats().baseline_unavailable, 1);
}

#[tokio::test]
async fn test_shutdown_unblocks_idle_flows() {
    let config = test_config();
    let bridge = Bridge::new(&config, create_shared_stats()).unwrap();

    // Keep both inbound streams open so only shutdown can stop the flows.
    let (_frames_tx, frames_rx) = mpsc::channel::<SensorFrame>(1);
    let (_commands_tx, commands_rx) = mpsc::channel::<ReceivedCommand>(1);
    let io = BridgeIo {
        frames: frames_rx,
        commands: commands_rx,
        dataset: Box::new(FixedDataset::new(vec![100.0])),
        actuator: Arc::new(RecordingActuator::default()),
        sink: Arc::new(RecordingSink::default()),
    };

    let (trigger, _) = shutdown_channel();
    let run = tokio::spawn(bridge.run(io, trigger.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.trigger();

    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("bridge should stop after shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_commands_preempt_running_sensor_flow() {
    let config = test_config();
    let bridge = Bridge::new(&config, create_shared_stats()).unwrap();
    let controller = bridge.controller();

    let (frames_tx, frames_rx) = mpsc::channel(8);
    let (commands_tx, commands_rx) = mpsc::channel(8);
    let io = BridgeIo {
        frames: frames_rx,
        commands: commands_rx,
        dataset: Box::new(FixedDataset::new(vec![100.0])),
        actuator: Arc::new(RecordingActuator::default()),
        sink: Arc::new(RecordingSink::default()),
    };

    let (trigger, _) = shutdown_channel();
    let run = tokio::spawn(bridge.run(io, trigger));

    commands_tx
        .send(command(ControlCommand::FanOn, 0))
        .await
        .unwrap();
    // Wait for the command flow to apply it.
    for _ in 0..100 {
        if controller.state() == FanState::ManualOn {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(controller.state(), FanState::ManualOn);

    for t in 1..5 {
        frames_tx.send(reading(10, t)).await.unwrap();
    }
    drop(frames_tx);

    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("bridge should stop when the sensor stream ends")
        .unwrap();

    assert_eq!(controller.state(), FanState::ManualOn);
    assert!(controller.actuator_intent());
    assert_eq!(controller.last_verdict(), Some(false));
}
