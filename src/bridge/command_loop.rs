//! Command-driven flow.

use super::drive_actuator;
use crate::actuator::ActuatorDriver;
use crate::core::{CommandSequencer, FanController, ManualOutcome, ReceivedCommand};
use crate::messaging::Publisher;
use crate::shutdown::ShutdownSignal;
use crate::stats::SharedStats;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Applies operator commands to the fan controller as they arrive.
pub struct CommandLoop {
    controller: Arc<FanController>,
    actuator: Arc<ActuatorDriver>,
    publisher: Publisher,
    stats: SharedStats,
    sequencer: CommandSequencer,
}

impl CommandLoop {
    pub fn new(
        controller: Arc<FanController>,
        actuator: Arc<ActuatorDriver>,
        publisher: Publisher,
        stats: SharedStats,
    ) -> Self {
        Self {
            controller,
            actuator,
            publisher,
            stats,
            sequencer: CommandSequencer::new(),
        }
    }

    /// Apply commands until the queue closes or shutdown is triggered.
    ///
    /// Commands already queued when one arrives are applied as one batch,
    /// ordered by receipt time.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ReceivedCommand>,
        mut shutdown: ShutdownSignal,
    ) {
        info!("Command flow started");

        loop {
            let first = tokio::select! {
                _ = shutdown.wait() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            let mut batch = vec![first];
            while let Ok(command) = commands.try_recv() {
                batch.push(command);
            }

            self.apply_batch(batch).await;
        }

        info!("Command flow stopped");
    }

    /// Order a batch and apply every fresh command in it.
    pub async fn apply_batch(&mut self, batch: Vec<ReceivedCommand>) -> Vec<ManualOutcome> {
        let (ordered, stale) = self.sequencer.order(batch);
        if stale > 0 {
            warn!(stale, "Dropping replayed commands");
            self.stats.record_rejected_commands(stale as u64);
        }

        let mut outcomes = Vec::with_capacity(ordered.len());
        for command in ordered {
            outcomes.push(self.apply(command).await);
        }
        outcomes
    }

    async fn apply(&self, command: ReceivedCommand) -> ManualOutcome {
        let outcome = self
            .controller
            .apply_manual(command.command, command.received_at);
        self.stats.record_manual_command();
        info!(
            command = %command.command,
            mode = outcome.state.mode(),
            on = outcome.state.actuator_on(),
            "Applied operator command"
        );

        self.publisher
            .publish_fan_state(outcome.state, command.received_at);
        if outcome.signal.is_some() {
            drive_actuator(&self.actuator, &self.controller, &self.stats).await;
        }

        outcome
    }
}
