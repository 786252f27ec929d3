//! Per-key transition state machine.
//!
//! A transition owns one channel (curve kinds) or a pan/tilt pair (arc kind),
//! keyed by its base channel. Its whole step table is computed up front; every
//! scheduler tick runs exactly one state handler:
//!
//! ```text
//! TRANSITION --last step--> HOLD --hold_steps--> MIRROR --> GAP --gap_steps--+
//!     ^                                                                      |
//!     +-------------------------- repeat left -------------------------------+
//! ```
//!
//! Without repetitions left, GAP finishes the transition and the sender drops it.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use transition_curves::{ArcParams, ArcSolution, ArcStep, Curve, CurveStep};

use crate::frame::ChannelFrame;
use crate::scheduler::Scheduler;

/// Timing options shared by every transition kind, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Timing {
    pub duration_ms: u64,
    pub hold_ms: u64,
    pub gap_ms: u64,
    /// 0 plays once, -1 repeats forever, n > 0 plays n times.
    pub repeat: i32,
    pub mirror: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionKind {
    Curve(Curve),
    Arc(ArcParams),
}

impl TransitionKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransitionKind::Curve(curve) => curve.name(),
            TransitionKind::Arc(_) => "arc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransitionState {
    Transition,
    Hold,
    Mirror,
    Gap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Running,
    Finished,
}

#[derive(Debug, Clone)]
enum StepTable {
    Curve(Vec<CurveStep>),
    Arc(Vec<ArcStep>),
}

impl StepTable {
    fn len(&self) -> usize {
        match self {
            StepTable::Curve(steps) => steps.len(),
            StepTable::Arc(steps) => steps.len(),
        }
    }
}

/// Channel/value pairs written together.
pub type ChannelValues = Vec<(u16, u8)>;

#[derive(Debug, Clone)]
pub struct Transition {
    key: u16,
    kind: TransitionKind,
    state: TransitionState,
    steps: StepTable,
    start: ChannelValues,
    target: ChannelValues,
    current_step: u32,
    steps_to_go: u32,
    hold_steps: u32,
    gap_steps: u32,
    repeat: i32,
    current_repetition: u32,
    mirror: bool,
    started_at: Instant,
    time_to_go: Duration,
}

impl Transition {
    /// Fade of a single channel along `curve`.
    pub fn curve(
        channel: u16,
        curve: Curve,
        start: u8,
        target: u8,
        timing: &Timing,
        scheduler: &Scheduler,
    ) -> Self {
        let step_count = scheduler.steps_for(timing.duration_ms);
        let steps = curve.compute_values(timing.duration_ms as f64, step_count, start, target);
        Self::build(
            channel,
            TransitionKind::Curve(curve),
            StepTable::Curve(steps),
            vec![(channel, start)],
            vec![(channel, target)],
            timing,
            scheduler,
        )
    }

    /// Pan/tilt movement along a solved arc, keyed by the pan channel.
    ///
    /// Start and target are the first and last played samples, so a partial
    /// playback interval mirrors and repeats within its own section.
    pub fn arc(solution: ArcSolution, timing: &Timing, scheduler: &Scheduler) -> Self {
        let params = solution.params;
        let (pan, tilt) = (params.pan_channel, params.tilt_channel);
        let endpoint = |step: Option<&ArcStep>| {
            step.map(|s| vec![(pan, s.pan), (tilt, s.tilt)])
                .unwrap_or_default()
        };
        let start = endpoint(solution.steps.first());
        let target = endpoint(solution.steps.last());
        Self::build(
            pan,
            TransitionKind::Arc(params),
            StepTable::Arc(solution.steps),
            start,
            target,
            timing,
            scheduler,
        )
    }

    fn build(
        key: u16,
        kind: TransitionKind,
        steps: StepTable,
        start: ChannelValues,
        target: ChannelValues,
        timing: &Timing,
        scheduler: &Scheduler,
    ) -> Self {
        let steps_to_go = steps.len().saturating_sub(1) as u32;
        Self {
            key,
            kind,
            state: TransitionState::Transition,
            steps,
            start,
            target,
            current_step: 0,
            steps_to_go,
            hold_steps: scheduler.steps_for(timing.hold_ms),
            gap_steps: scheduler.steps_for(timing.gap_ms),
            repeat: timing.repeat,
            current_repetition: 0,
            mirror: timing.mirror,
            started_at: Instant::now(),
            time_to_go: Duration::from_millis(timing.duration_ms),
        }
    }

    pub fn key(&self) -> u16 {
        self.key
    }

    pub fn kind(&self) -> &TransitionKind {
        &self.kind
    }

    pub fn state(&self) -> TransitionState {
        self.state
    }

    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    pub fn steps_to_go(&self) -> u32 {
        self.steps_to_go
    }

    pub fn current_repetition(&self) -> u32 {
        self.current_repetition
    }

    pub fn start_values(&self) -> &[(u16, u8)] {
        &self.start
    }

    pub fn target_values(&self) -> &[(u16, u8)] {
        &self.target
    }

    /// Channels written by this transition.
    pub fn channels(&self) -> Vec<u16> {
        match &self.kind {
            TransitionKind::Curve(_) => vec![self.key],
            TransitionKind::Arc(params) => vec![params.pan_channel, params.tilt_channel],
        }
    }

    pub fn owns(&self, channel: u16) -> bool {
        match &self.kind {
            TransitionKind::Curve(_) => self.key == channel,
            TransitionKind::Arc(params) => {
                params.pan_channel == channel || params.tilt_channel == channel
            }
        }
    }

    /// Elapsed time against the planned duration of one pass, in ms.
    pub fn drift_ms(&self) -> i64 {
        let elapsed = self.started_at.elapsed().as_millis() as i64;
        elapsed - self.time_to_go.as_millis() as i64
    }

    /// Runs one tick of the state machine.
    pub fn advance(&mut self, frame: &mut ChannelFrame) -> Progress {
        match self.state {
            TransitionState::Transition => {
                self.write_step(self.current_step, frame);
                self.current_step += 1;
                if self.current_step > self.steps_to_go {
                    self.enter(TransitionState::Hold);
                }
            }
            TransitionState::Hold => {
                if self.current_step < self.hold_steps {
                    self.current_step += 1;
                } else {
                    self.enter(TransitionState::Mirror);
                }
            }
            TransitionState::Mirror => {
                if self.mirror {
                    self.write_step(self.steps_to_go - self.current_step, frame);
                    self.current_step += 1;
                    if self.current_step > self.steps_to_go {
                        write_values(&self.start, frame);
                        self.enter(TransitionState::Gap);
                    }
                } else {
                    // Settle back to the start only when more is scheduled.
                    if self.hold_steps > 0 || self.repeat != 0 || self.gap_steps > 0 {
                        write_values(&self.start, frame);
                    }
                    self.enter(TransitionState::Gap);
                }
            }
            TransitionState::Gap => {
                if self.current_step < self.gap_steps {
                    self.current_step += 1;
                } else if self.has_repetition_left() {
                    self.current_repetition += 1;
                    write_values(&self.start, frame);
                    self.enter(TransitionState::Transition);
                } else {
                    log::debug!(
                        "[transition {}] finished after {} repetition(s), drift {} ms",
                        self.key,
                        self.current_repetition + 1,
                        self.drift_ms()
                    );
                    return Progress::Finished;
                }
            }
        }
        Progress::Running
    }

    /// Snaps the owned channels to the target, used when cleared early.
    pub fn close_out(&self, frame: &mut ChannelFrame) {
        write_values(&self.target, frame);
    }

    fn has_repetition_left(&self) -> bool {
        match self.repeat {
            0 => false,
            r if r < 0 => true,
            r => i64::from(self.current_repetition) < i64::from(r) - 1,
        }
    }

    fn enter(&mut self, state: TransitionState) {
        self.state = state;
        self.current_step = 0;
    }

    fn write_step(&self, index: u32, frame: &mut ChannelFrame) {
        let index = index as usize;
        match (&self.steps, &self.kind) {
            (StepTable::Curve(steps), _) => {
                if let Some(step) = steps.get(index) {
                    write_values(&[(self.key, step.value)], frame);
                }
            }
            (StepTable::Arc(steps), TransitionKind::Arc(params)) => {
                if let Some(step) = steps.get(index) {
                    write_values(
                        &[
                            (params.pan_channel, step.pan),
                            (params.tilt_channel, step.tilt),
                        ],
                        frame,
                    );
                }
            }
            (StepTable::Arc(_), TransitionKind::Curve(_)) => {}
        }
    }
}

fn write_values(values: &[(u16, u8)], frame: &mut ChannelFrame) {
    for &(channel, value) in values {
        if let Err(e) = frame.set(channel, value) {
            log::warn!("[transition] skipped write: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transition_curves::{ArcConfig, ArcRequest, ArcSolver, PanTilt, PlaybackInterval};

    fn scheduler() -> Scheduler {
        // 25 ms ticks
        Scheduler::new(40, 1000)
    }

    fn timing(duration_ms: u64) -> Timing {
        Timing {
            duration_ms,
            ..Timing::default()
        }
    }

    /// Advances until finished, recording the state seen at each tick.
    fn run(t: &mut Transition, frame: &mut ChannelFrame) -> (Vec<TransitionState>, Vec<u8>) {
        let mut states = Vec::new();
        let mut values = Vec::new();
        for _ in 0..10_000 {
            states.push(t.state());
            let progress = t.advance(frame);
            values.push(frame.get(t.key()));
            if progress == Progress::Finished {
                return (states, values);
            }
        }
        panic!("transition did not finish");
    }

    fn entries(states: &[TransitionState], state: TransitionState) -> usize {
        let mut count = 0;
        let mut previous = None;
        for &s in states {
            if s == state && previous != Some(state) {
                count += 1;
            }
            previous = Some(s);
        }
        count
    }

    #[test]
    fn plain_fade_ends_on_target() {
        let s = scheduler();
        let mut frame = ChannelFrame::new();
        let mut t = Transition::curve(5, Curve::Linear, 0, 100, &timing(100), &s);
        assert_eq!(t.steps_to_go(), 4);
        let (states, values) = run(&mut t, &mut frame);
        assert_eq!(&values[..5], &[0, 25, 50, 75, 100]);
        assert_eq!(frame.get(5), 100);
        assert_eq!(entries(&states, TransitionState::Hold), 1);
        assert_eq!(entries(&states, TransitionState::Gap), 1);
    }

    #[test]
    fn repeat_two_walks_the_cycle_twice_and_returns_to_start() {
        let s = scheduler();
        let mut frame = ChannelFrame::new();
        frame.set(9, 20).unwrap();
        let t_opts = Timing {
            duration_ms: 100,
            repeat: 2,
            ..Timing::default()
        };
        let mut t = Transition::curve(9, Curve::Linear, 20, 220, &t_opts, &s);
        let mut states = Vec::new();
        let mut settled_to_start = 0;
        loop {
            let before = t.state();
            states.push(before);
            let progress = t.advance(&mut frame);
            if before == TransitionState::Mirror && frame.get(9) == 20 {
                settled_to_start += 1;
            }
            if progress == Progress::Finished {
                break;
            }
        }
        for state in [
            TransitionState::Transition,
            TransitionState::Hold,
            TransitionState::Mirror,
            TransitionState::Gap,
        ] {
            assert_eq!(entries(&states, state), 2, "{state:?} in {states:?}");
        }
        assert_eq!(settled_to_start, 2);
        assert_eq!(t.current_repetition(), 1);
        assert_eq!(frame.get(9), 20);
    }

    #[test]
    fn mirror_replays_back_to_start() {
        let s = scheduler();
        let mut frame = ChannelFrame::new();
        let opts = Timing {
            duration_ms: 100,
            mirror: true,
            ..Timing::default()
        };
        let mut t = Transition::curve(1, Curve::Linear, 0, 100, &opts, &s);
        let (_, values) = run(&mut t, &mut frame);
        // up (5 ticks), hold switch, mirror down (5 ticks), gap
        assert_eq!(&values[..5], &[0, 25, 50, 75, 100]);
        assert_eq!(&values[6..11], &[100, 75, 50, 25, 0]);
        assert_eq!(frame.get(1), 0);
    }

    #[test]
    fn hold_and_gap_take_their_ticks() {
        let s = scheduler();
        let mut frame = ChannelFrame::new();
        let opts = Timing {
            duration_ms: 50,
            hold_ms: 100,
            gap_ms: 50,
            ..Timing::default()
        };
        let mut t = Transition::curve(1, Curve::Linear, 0, 10, &opts, &s);
        let (states, values) = run(&mut t, &mut frame);
        let holds = states.iter().filter(|s| **s == TransitionState::Hold).count();
        let gaps = states.iter().filter(|s| **s == TransitionState::Gap).count();
        // hold_steps = 4 plus the switching tick, gap_steps = 2 plus the final tick
        assert_eq!(holds, 5);
        assert_eq!(gaps, 3);
        // hold configured: the non-mirrored cycle settles back to start
        assert_eq!(values.last(), Some(&0));
    }

    #[test]
    fn infinite_repeat_keeps_running() {
        let s = scheduler();
        let mut frame = ChannelFrame::new();
        let opts = Timing {
            duration_ms: 50,
            repeat: -1,
            ..Timing::default()
        };
        let mut t = Transition::curve(2, Curve::Sine, 0, 255, &opts, &s);
        for _ in 0..1_000 {
            assert_eq!(t.advance(&mut frame), Progress::Running);
        }
        assert!(t.current_repetition() > 10);
    }

    #[test]
    fn close_out_snaps_to_target() {
        let s = scheduler();
        let mut frame = ChannelFrame::new();
        let mut t = Transition::curve(3, Curve::Quadratic, 0, 200, &timing(1000), &s);
        t.advance(&mut frame);
        t.advance(&mut frame);
        assert!(frame.get(3) < 200);
        t.close_out(&mut frame);
        assert_eq!(frame.get(3), 200);
    }

    #[test]
    fn arc_writes_pan_and_tilt_together() {
        let s = scheduler();
        let request = ArcRequest {
            current: PanTilt::new(10.0, 100.0),
            target: PanTilt::new(50.0, 100.0),
            center: PanTilt::new(0.0, 0.0),
            config: ArcConfig::default(),
            duration_ms: 200.0,
            step_count: s.steps_for(200),
            interval: PlaybackInterval::FULL,
        };
        let solution = ArcSolver::solve(&request).unwrap();
        let mut t = Transition::arc(solution, &timing(200), &s);
        assert_eq!(t.key(), 1);
        assert!(t.owns(3));
        assert_eq!(t.channels(), vec![1, 3]);

        let mut frame = ChannelFrame::new();
        let (_, _) = run(&mut t, &mut frame);
        assert_eq!(frame.get(1), 50);
        assert_eq!(frame.get(3), 100);
    }
}
