//! One universe: its frame, active transitions, send scheduler and output.
//!
//! `UniverseSender` is plain synchronous state. The driver task owns it and
//! calls `handle` for commands and `tick` on every scheduler tick, so the two
//! never run concurrently.

use std::collections::BTreeMap;

use transition_curves::{ArcRequest, ArcSolver, PanTilt};

use crate::command::{ArcCommand, Command, Payload};
use crate::config::SenderConfig;
use crate::error::{SenderError, ValidationError};
use crate::frame::{ChannelFrame, CHANNEL_COUNT};
use crate::scheduler::{Scheduler, SendDecision, TickOutcome};
use crate::transition::{Progress, Transition};
use crate::transport::DmxOutput;

pub struct UniverseSender {
    config: SenderConfig,
    label: String,
    frame: ChannelFrame,
    transitions: BTreeMap<u16, Transition>,
    scheduler: Scheduler,
    output: Box<dyn DmxOutput>,
}

impl UniverseSender {
    pub fn new(config: SenderConfig, frame: ChannelFrame, output: Box<dyn DmxOutput>) -> Self {
        let scheduler = Scheduler::new(config.max_rate, config.refresh_ms);
        let label = format!("sender {}", config.label());
        log::info!(
            "[{}] ready, tick every {} ms",
            label,
            scheduler.tick_interval_ms()
        );
        Self {
            config,
            label,
            frame,
            transitions: BTreeMap::new(),
            scheduler,
            output,
        }
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn frame(&self) -> &ChannelFrame {
        &self.frame
    }

    pub fn snapshot(&self) -> [u8; CHANNEL_COUNT] {
        self.frame.snapshot()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_ticking(&self) -> bool {
        self.scheduler.is_active()
    }

    pub fn active_transitions(&self) -> usize {
        self.transitions.len()
    }

    /// Transition owning `channel`, if any.
    pub fn transition_for(&self, channel: u16) -> Option<&Transition> {
        self.transitions.values().find(|t| t.owns(channel))
    }

    /// Writes one channel without sending.
    pub fn set(&mut self, channel: u16, value: u8) -> Result<bool, ValidationError> {
        self.frame.set(channel, value)
    }

    /// Sends the frame now when idle, otherwise leaves it for the next tick.
    pub fn send_data(&mut self) {
        match self.scheduler.request_send() {
            SendDecision::TransmitNow => {
                self.frame.mark_dirty();
                self.transmit();
            }
            SendDecision::Coalesce => self.frame.mark_dirty(),
        }
    }

    /// Transmits the frame. A failed transmit leaves the frame dirty.
    fn transmit(&mut self) -> bool {
        if !self.frame.take_dirty() {
            return false;
        }
        match self.output.transmit(self.frame.as_bytes()) {
            Ok(()) => {
                log::trace!("[{}] transmit", self.label);
                true
            }
            Err(e) => {
                log::warn!("[{}] {}, retrying on next tick", self.label, e);
                self.frame.mark_dirty();
                false
            }
        }
    }

    /// Registers a transition, finalizing any transition it overlaps.
    pub fn add_transition(&mut self, transition: Transition) {
        for channel in transition.channels() {
            self.clear_transition(channel, false);
        }
        log::debug!(
            "[{}] add {} transition on channel {}",
            self.label,
            transition.kind().name(),
            transition.key()
        );
        self.transitions.insert(transition.key(), transition);
        self.scheduler.activate();
    }

    /// Stops the transition owning `channel`, snapping it to its target.
    /// Returns whether a transition was cleared.
    pub fn clear_transition(&mut self, channel: u16, send: bool) -> bool {
        let key = match self.transition_for(channel) {
            Some(t) => t.key(),
            None => return false,
        };
        if let Some(transition) = self.transitions.remove(&key) {
            transition.close_out(&mut self.frame);
            if send {
                self.send_data();
            }
        }
        true
    }

    /// Stops every transition, snapping each to its target.
    pub fn clear_transitions(&mut self, send: bool) {
        if self.transitions.is_empty() {
            return;
        }
        let transitions = std::mem::take(&mut self.transitions);
        for transition in transitions.values() {
            transition.close_out(&mut self.frame);
        }
        if send {
            self.send_data();
        }
    }

    /// Advances every transition by one step and flushes the frame.
    pub fn tick(&mut self) -> TickOutcome {
        let mut finished = Vec::new();
        for (key, transition) in self.transitions.iter_mut() {
            if transition.advance(&mut self.frame) == Progress::Finished {
                finished.push(*key);
            }
        }
        for key in &finished {
            self.transitions.remove(key);
        }

        let transmitted = self.frame.is_dirty() && self.transmit();
        let pending = transmitted || self.frame.is_dirty();
        let rearm = self.scheduler.after_tick(pending, self.transitions.len());
        TickOutcome {
            transmitted,
            rearm,
            finished: finished.len(),
        }
    }

    /// Applies one inbound payload.
    ///
    /// `start_buckets` are written first without sending; the rest of the
    /// payload is validated as a whole before anything else is applied.
    pub fn handle(&mut self, payload: &Payload) -> Result<(), SenderError> {
        let start_writes = payload.start_writes()?;
        if !start_writes.is_empty() {
            for &(channel, value) in &start_writes {
                self.clear_transition(channel, false);
                self.frame.set(channel, value)?;
            }
            self.send_data();
        }

        match payload.into_command()? {
            Command::None => {}
            Command::Frame(values) => {
                for channel in 1..=values.len() as u16 {
                    self.clear_transition(channel, false);
                }
                self.frame.set_all(&values);
                self.send_data();
            }
            Command::Write(writes) => {
                for (channel, value) in writes {
                    self.clear_transition(channel, false);
                    self.frame.set(channel, value)?;
                }
                self.send_data();
            }
            Command::Fade {
                writes,
                curve,
                timing,
            } => {
                self.scheduler.checked_steps(timing.duration_ms)?;
                for (channel, target) in writes {
                    // The snapped target goes out with the next tick.
                    self.clear_transition(channel, false);
                    let start = self.frame.get(channel);
                    let transition =
                        Transition::curve(channel, curve, start, target, &timing, &self.scheduler);
                    self.add_transition(transition);
                }
            }
            Command::Arc(arc) => self.start_arc(&arc)?,
        }
        Ok(())
    }

    /// Value a channel settles on once the transition owning it is cleared.
    fn settled_value(&self, channel: u16) -> u8 {
        self.transition_for(channel)
            .and_then(|t| {
                t.target_values()
                    .iter()
                    .find(|(c, _)| *c == channel)
                    .map(|(_, v)| *v)
            })
            .unwrap_or_else(|| self.frame.get(channel))
    }

    /// Solves the arc before touching any running transition, so an invalid
    /// pivot leaves the fixture where it is.
    fn start_arc(&mut self, arc: &ArcCommand) -> Result<(), SenderError> {
        let config = arc.config;
        let current = arc.start.unwrap_or_else(|| {
            PanTilt::new(
                f64::from(self.settled_value(config.pan_channel)),
                f64::from(self.settled_value(config.tilt_channel)),
            )
        });
        let request = ArcRequest {
            current,
            target: arc.end,
            center: arc.center,
            config,
            duration_ms: arc.timing.duration_ms as f64,
            step_count: self.scheduler.checked_steps(arc.timing.duration_ms)?,
            interval: arc.interval,
        };
        let solution = ArcSolver::solve(&request)?;
        log::debug!(
            "[{}] arc radius {:.4}, t {:.4} -> {:.4} ({} steps)",
            self.label,
            solution.params.radius,
            solution.current_t,
            solution.new_t,
            solution.steps.len()
        );
        let transition = Transition::arc(solution, &arc.timing, &self.scheduler);
        self.add_transition(transition);
        Ok(())
    }

    /// Finalizes all transitions, flushes the frame one last time and releases
    /// the output. Returns the final frame.
    pub fn shutdown(&mut self) -> [u8; CHANNEL_COUNT] {
        self.clear_transitions(false);
        self.transmit();
        self.scheduler.stop();
        self.output.close();
        log::info!("[{}] stopped", self.label);
        self.frame.snapshot()
    }
}
