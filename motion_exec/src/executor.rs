//! # Trajectory executor
//!
//! Once per tick the executor evaluates every motor's cubic
//!
//! ```text
//! p(t) = c0*t + c1*t^2 + c2*t^3
//! ```
//!
//! for the instruction at the front of the buffer, and advances `t`. Coefficients are fixed-point
//! values with `fraction_bits` fractional bits, so `p(t) >> fraction_bits` is the motor's offset
//! in whole steps since the start of the segment.
//!
//! ## Segment timing
//!
//! Every instruction lasts at least the configured path length `L`. A motor whose segment is
//! shorter (`ticks < L`) repeats it, restarting from `t = 0` on top of the position reached so the
//! motion stays continuous, until `L` ticks have passed. The last repetition may stop part way
//! through. A segment at least as long as the path runs once. A motor with a zero length segment
//! holds its position. The instruction retires after its longest motor duration.
//!
//! ## Run control
//!
//! The executor only advances while `running` is set in the status register. Clearing it (STOP)
//! freezes `t` and every position so a later START resumes exactly where the motion left off.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{instr::MotorSegment, status::StatusWord};
use log::{debug, error, info, trace};
use std::sync::Arc;
use thiserror::Error;

use crate::{config::MotionConfig, shared::SharedState};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Steps through the instruction buffer one tick at a time.
#[derive(Debug)]
pub struct TrajectoryExecutor {
    config: MotionConfig,

    shared: Arc<SharedState>,

    /// The instruction currently executing, if any.
    active: Option<ActiveInstr>,

    /// Absolute position of each motor in fixed-point units.
    abs_positions: Vec<i128>,

    /// Number of ticks in which an instruction advanced.
    ticks_executed: u64,

    /// Number of instructions run to completion.
    instrs_retired: u64,
}

/// Output of a motor for one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotorOutput {
    /// False if the motor has finished its segment and is holding.
    pub active: bool,

    /// Segment time `p` was evaluated at.
    pub t: u32,

    /// Offset from the start of the current repetition, `p(t)`.
    pub position: i128,

    /// Movement made during this tick, `p(t + 1) - p(t)`.
    pub velocity: i128,

    /// Absolute position at the end of this tick, fixed-point.
    pub abs_position: i128,
}

/// Output of the executor for one tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickOutput {
    /// Ticks elapsed in the current instruction before this one.
    pub tick: u32,

    /// AUX outputs held while the instruction executes.
    pub aux: u16,

    /// Output of every motor, in motor order.
    pub motors: Vec<MotorOutput>,
}

/// Instruction loaded from the front of the buffer.
#[derive(Debug)]
struct ActiveInstr {
    aux: u16,
    motors: Vec<MotorTrack>,
    elapsed: u32,
    duration: u32,
}

/// Progress of a single motor through its segment.
#[derive(Debug)]
struct MotorTrack {
    segment: MotorSegment,

    /// Time within the current repetition.
    t: u32,

    /// Ticks run since the segment started, across all repetitions.
    elapsed: u32,

    /// Number of ticks this motor moves for.
    duration: u32,

    /// Absolute position at the start of the current repetition.
    base: i128,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Faults raised while loading an instruction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("Instruction has segments for {found} motors but {expected} are configured")]
    MotorCountMismatch { expected: usize, found: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrajectoryExecutor {
    /// The config must already be validated, [`Controller::new`](crate::Controller::new) does so.
    pub(crate) fn new(config: MotionConfig, shared: Arc<SharedState>) -> Self {
        let num_motors = config.num_motors;

        Self {
            config,
            shared,
            active: None,
            abs_positions: vec![0; num_motors],
            ticks_executed: 0,
            instrs_retired: 0,
        }
    }

    /// Run one tick.
    ///
    /// Returns the motor outputs if an instruction advanced, or `None` if the executor is idle,
    /// stopped, disabled or faulted.
    pub fn tick(&mut self) -> Option<TickOutput> {
        if self.shared.take_reset_request() {
            self.reset();
        }

        if !self.shared.status.is_set(StatusWord::RUNNING) {
            return None;
        }

        // Disabled motors hold, the instruction resumes from the same tick once enabled
        if self.shared.status.is_set(StatusWord::DISABLED) {
            return None;
        }

        if self.active.is_none() {
            match self.load_next() {
                Ok(Some(instr)) => {
                    trace!(
                        "Loaded instruction (aux {:#06x}, {} ticks)",
                        instr.aux,
                        instr.duration
                    );
                    self.active = Some(instr);
                }
                Ok(None) => {
                    debug!("Instruction buffer empty, execution stopped");
                    return None;
                }
                Err(e) => {
                    self.shared.status.set(StatusWord::EXECUTION_ERROR);
                    self.shared.status.clear(StatusWord::RUNNING);
                    error!("Execution fault: {}", e);
                    return None;
                }
            }
        }

        let active = self.active.as_mut()?;

        let motors: Vec<MotorOutput> = active.motors.iter_mut().map(MotorTrack::step).collect();
        let output = TickOutput {
            tick: active.elapsed,
            aux: active.aux,
            motors,
        };

        active.elapsed += 1;
        let finished = active.elapsed >= active.duration;

        for (i, m) in output.motors.iter().enumerate() {
            self.abs_positions[i] = m.abs_position;
            self.shared
                .publish_position(i, to_steps(m.abs_position, self.config.fraction_bits));
        }
        self.ticks_executed += 1;

        if finished {
            self.retire();
        }

        Some(output)
    }

    /// Absolute position of each motor, fixed-point.
    pub fn abs_positions(&self) -> &[i128] {
        &self.abs_positions
    }

    /// Absolute position of each motor in whole steps.
    pub fn positions_steps(&self) -> Vec<i64> {
        self.abs_positions
            .iter()
            .map(|p| to_steps(*p, self.config.fraction_bits))
            .collect()
    }

    /// True while an instruction is loaded but not yet finished.
    pub fn is_mid_instruction(&self) -> bool {
        self.active.is_some()
    }

    /// AUX outputs of the loaded instruction.
    pub fn aux(&self) -> Option<u16> {
        self.active.as_ref().map(|a| a.aux)
    }

    pub fn ticks_executed(&self) -> u64 {
        self.ticks_executed
    }

    pub fn instrs_retired(&self) -> u64 {
        self.instrs_retired
    }

    /// Build the active instruction from the front of the buffer, leaving it in place.
    ///
    /// Lowers `running` if the buffer is empty.
    fn load_next(&self) -> Result<Option<ActiveInstr>, ExecError> {
        let buffer = self.shared.lock_buffer();
        let instr = match buffer.peek_front() {
            Some(i) => i,
            None => {
                self.shared.status.clear(StatusWord::RUNNING);
                return Ok(None);
            }
        };

        if instr.num_motors() != self.config.num_motors {
            return Err(ExecError::MotorCountMismatch {
                expected: self.config.num_motors,
                found: instr.num_motors(),
            });
        }

        let motors: Vec<MotorTrack> = instr
            .segments
            .iter()
            .zip(self.abs_positions.iter())
            .map(|(seg, base)| MotorTrack::new(*seg, self.config.path_ticks, *base))
            .collect();

        // Never zero so an instruction always takes at least one tick
        let duration = motors.iter().map(|m| m.duration).max().unwrap_or(0).max(1);

        Ok(Some(ActiveInstr {
            aux: instr.aux,
            motors,
            elapsed: 0,
            duration,
        }))
    }

    /// Remove the finished instruction from the buffer.
    fn retire(&mut self) {
        self.active = None;

        let mut buffer = self.shared.lock_buffer();

        // A reset since this tick started has already emptied the buffer, whatever is at the
        // front now was written afterwards
        if self.shared.reset_pending() {
            return;
        }

        buffer.pop_front();
        self.instrs_retired += 1;
        self.shared.status.clear(StatusWord::BUFFER_FULL);

        if buffer.is_empty() {
            self.shared.status.clear(StatusWord::RUNNING);
            info!(
                "All instructions executed ({} retired, {} ticks)",
                self.instrs_retired, self.ticks_executed
            );
        }
    }

    fn reset(&mut self) {
        info!("Executor reset");

        self.active = None;
        for p in self.abs_positions.iter_mut() {
            *p = 0;
        }
        self.shared.clear_positions();
    }
}

impl MotorTrack {
    fn new(segment: MotorSegment, path_ticks: u32, base: i128) -> Self {
        Self {
            segment,
            t: 0,
            elapsed: 0,
            duration: segment_duration(&segment, path_ticks),
            base,
        }
    }

    fn step(&mut self) -> MotorOutput {
        if self.elapsed >= self.duration {
            return MotorOutput {
                active: false,
                t: self.t,
                position: eval_poly(&self.segment, self.t),
                velocity: 0,
                abs_position: self.abs_position(),
            };
        }

        let p0 = eval_poly(&self.segment, self.t);
        let p1 = eval_poly(&self.segment, self.t + 1);

        let output = MotorOutput {
            active: true,
            t: self.t,
            position: p0,
            velocity: p1 - p0,
            abs_position: self.base + p1,
        };

        self.t += 1;
        self.elapsed += 1;

        // Restart the repetition, unless this was the motor's last tick
        if self.t == self.segment.ticks && self.elapsed < self.duration {
            self.base += p1;
            self.t = 0;
        }

        output
    }

    fn abs_position(&self) -> i128 {
        self.base + eval_poly(&self.segment, self.t)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Evaluate `c0*t + c1*t^2 + c2*t^3`.
///
/// Exact for every `t` up to `MAX_SEGMENT_TICKS` and any `i32` coefficients.
pub fn eval_poly(segment: &MotorSegment, t: u32) -> i128 {
    let t = t as i128;

    ((segment.c2 as i128 * t + segment.c1 as i128) * t + segment.c0 as i128) * t
}

/// Number of ticks a motor moves for within an instruction with path length `path_ticks`.
///
/// Zero for a zero length segment, which holds.
pub fn segment_duration(segment: &MotorSegment, path_ticks: u32) -> u32 {
    if segment.ticks == 0 {
        0
    } else {
        segment.ticks.max(path_ticks)
    }
}

/// Convert a fixed-point position to whole steps, saturating.
pub fn to_steps(position: i128, fraction_bits: u32) -> i64 {
    let steps = position >> fraction_bits;

    if steps > i64::MAX as i128 {
        i64::MAX
    } else if steps < i64::MIN as i128 {
        i64::MIN
    } else {
        steps as i64
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::MAX_SEGMENT_TICKS;
    use comms_if::instr::Instruction;

    fn setup(num_motors: usize, path_ticks: u32) -> (TrajectoryExecutor, Arc<SharedState>) {
        let config = MotionConfig {
            num_motors,
            path_ticks,
            buffer_capacity: 8,
            ..Default::default()
        };
        let shared = Arc::new(SharedState::new(&config));
        (TrajectoryExecutor::new(config, shared.clone()), shared)
    }

    fn push(shared: &SharedState, aux: u16, segments: Vec<MotorSegment>) {
        shared
            .lock_buffer()
            .push(Instruction::new_move(aux, segments))
            .unwrap();
    }

    fn run_until_idle(exec: &mut TrajectoryExecutor) -> Vec<TickOutput> {
        let mut outputs = vec![];
        while let Some(out) = exec.tick() {
            outputs.push(out);
        }
        outputs
    }

    #[test]
    fn test_eval_poly() {
        let seg = MotorSegment::new(10, 3, -2, 1);
        for t in 0..10u32 {
            let ti = t as i128;
            assert_eq!(eval_poly(&seg, t), 3 * ti - 2 * ti * ti + ti * ti * ti);
        }

        // Evaluating twice gives the same answer
        assert_eq!(eval_poly(&seg, 7), eval_poly(&seg, 7));

        // Largest inputs are still exact
        let seg = MotorSegment::new(MAX_SEGMENT_TICKS, i32::MIN, i32::MIN, i32::MIN);
        let t = MAX_SEGMENT_TICKS as i128;
        let c = i32::MIN as i128;
        assert_eq!(eval_poly(&seg, MAX_SEGMENT_TICKS), c * t + c * t * t + c * t * t * t);
    }

    #[test]
    fn test_segment_duration() {
        assert_eq!(segment_duration(&MotorSegment::new(50, 1, 0, 0), 100), 100);
        assert_eq!(segment_duration(&MotorSegment::new(150, 1, 0, 0), 100), 150);
        assert_eq!(segment_duration(&MotorSegment::new(0, 1, 0, 0), 100), 0);
    }

    #[test]
    fn test_short_segment_loops() {
        let (mut exec, shared) = setup(1, 100_000);
        push(&shared, 0, vec![MotorSegment::new(50_000, 1, 0, 0)]);
        shared.status.set(StatusWord::RUNNING);

        let mut n = 0u32;
        while let Some(out) = exec.tick() {
            assert_eq!(out.motors[0].t, n % 50_000);
            assert_eq!(out.motors[0].position, (n % 50_000) as i128);
            n += 1;

            // Still the front of the buffer until the last tick
            if n < 100_000 {
                assert_eq!(shared.buffer_len(), 1);
            }
        }

        assert_eq!(n, 100_000);
        assert_eq!(shared.buffer_len(), 0);
        assert!(shared.status.read().is_nominal());
        assert_eq!(exec.abs_positions(), &[100_000]);
        assert_eq!(exec.instrs_retired(), 1);
    }

    #[test]
    fn test_partial_repetition() {
        let (mut exec, shared) = setup(1, 10);
        push(&shared, 0, vec![MotorSegment::new(4, 1, 0, 0)]);
        shared.status.set(StatusWord::RUNNING);

        let outputs = run_until_idle(&mut exec);
        let ts: Vec<u32> = outputs.iter().map(|o| o.motors[0].t).collect();
        assert_eq!(ts, vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);

        // Continuous across repetitions
        let abs: Vec<i128> = outputs.iter().map(|o| o.motors[0].abs_position).collect();
        assert_eq!(abs, (1..=10).collect::<Vec<i128>>());
        assert_eq!(shared.position(0), Some(10));
    }

    #[test]
    fn test_long_segment_runs_once() {
        let (mut exec, shared) = setup(1, 10);
        push(&shared, 0, vec![MotorSegment::new(15, 0, 1, 0)]);
        shared.status.set(StatusWord::RUNNING);

        let outputs = run_until_idle(&mut exec);
        assert_eq!(outputs.len(), 15);
        for (i, out) in outputs.iter().enumerate() {
            assert_eq!(out.motors[0].t, i as u32);
            assert!(out.motors[0].active);
        }
        assert_eq!(exec.abs_positions(), &[15 * 15]);
    }

    #[test]
    fn test_motors_finish_independently() {
        let (mut exec, shared) = setup(3, 8);
        push(
            &shared,
            0x00ff,
            vec![
                MotorSegment::new(5, 1, 0, 0),
                MotorSegment::new(12, 2, 0, 0),
                MotorSegment::new(0, 100, 100, 100),
            ],
        );
        shared.status.set(StatusWord::RUNNING);

        let outputs = run_until_idle(&mut exec);
        assert_eq!(outputs.len(), 12);
        assert!(outputs.iter().all(|o| o.aux == 0x00ff));

        // Motor 0 loops once and stops part way through, then holds
        assert!(outputs[7].motors[0].active);
        assert!(!outputs[8].motors[0].active);
        assert_eq!(outputs[11].motors[0].velocity, 0);
        assert_eq!(outputs[11].motors[0].abs_position, 8);

        assert!(outputs[11].motors[1].active);
        assert_eq!(outputs[11].motors[1].abs_position, 24);

        // A zero length segment holds for the whole instruction
        assert!(outputs.iter().all(|o| !o.motors[2].active));
        assert_eq!(exec.abs_positions(), &[8, 24, 0]);
    }

    #[test]
    fn test_velocity() {
        let (mut exec, shared) = setup(1, 5);
        push(&shared, 0, vec![MotorSegment::new(5, 0, 0, 1)]);
        shared.status.set(StatusWord::RUNNING);

        for out in run_until_idle(&mut exec) {
            let t = out.motors[0].t as i128;
            assert_eq!(out.motors[0].velocity, (t + 1).pow(3) - t.pow(3));
        }
    }

    #[test]
    fn test_positions_continue_across_instructions() {
        let (mut exec, shared) = setup(1, 4);
        push(&shared, 1, vec![MotorSegment::new(4, 2, 0, 0)]);
        push(&shared, 2, vec![MotorSegment::new(4, -1, 0, 0)]);
        shared.status.set(StatusWord::RUNNING);

        let outputs = run_until_idle(&mut exec);
        assert_eq!(outputs.len(), 8);
        assert_eq!(outputs[3].motors[0].abs_position, 8);
        assert_eq!(outputs[4].aux, 2);
        assert_eq!(outputs[4].motors[0].abs_position, 7);
        assert_eq!(outputs[7].motors[0].abs_position, 4);
        assert_eq!(exec.instrs_retired(), 2);
    }

    #[test]
    fn test_stop_and_resume() {
        let (mut exec, shared) = setup(1, 10);
        push(&shared, 0, vec![MotorSegment::new(10, 1, 0, 0)]);
        shared.status.set(StatusWord::RUNNING);

        for _ in 0..3 {
            exec.tick().unwrap();
        }

        shared.status.clear(StatusWord::RUNNING);
        assert_eq!(exec.tick(), None);
        assert_eq!(exec.tick(), None);
        assert!(exec.is_mid_instruction());
        assert_eq!(exec.abs_positions(), &[3]);

        shared.status.set(StatusWord::RUNNING);
        let out = exec.tick().unwrap();
        assert_eq!(out.tick, 3);
        assert_eq!(out.motors[0].t, 3);

        assert_eq!(run_until_idle(&mut exec).len(), 6);
        assert_eq!(exec.abs_positions(), &[10]);
    }

    #[test]
    fn test_disabled_holds() {
        let (mut exec, shared) = setup(1, 10);
        push(&shared, 0, vec![MotorSegment::new(10, 2, 0, 0)]);
        shared.status.set(StatusWord::RUNNING);

        for _ in 0..4 {
            exec.tick().unwrap();
        }

        shared.status.set(StatusWord::DISABLED);
        for _ in 0..5 {
            assert_eq!(exec.tick(), None);
        }
        assert_eq!(exec.abs_positions(), &[8]);
        assert_eq!(shared.position(0), Some(8));
        assert_eq!(exec.ticks_executed(), 4);

        // Still running, so the instruction picks up where it left off
        assert!(shared.status.read().running());
        shared.status.clear(StatusWord::DISABLED);
        assert_eq!(exec.tick().unwrap().tick, 4);
        assert_eq!(run_until_idle(&mut exec).len(), 5);
        assert_eq!(exec.abs_positions(), &[20]);
    }

    #[test]
    fn test_empty_buffer_stops() {
        let (mut exec, shared) = setup(1, 10);
        shared.status.set(StatusWord::RUNNING);

        assert_eq!(exec.tick(), None);
        assert!(!shared.status.read().running());
        assert!(!shared.status.read().execution_error());
    }

    #[test]
    fn test_motor_count_mismatch() {
        let (mut exec, shared) = setup(2, 10);
        push(&shared, 0, vec![MotorSegment::new(10, 1, 0, 0)]);
        shared.status.set(StatusWord::RUNNING);

        assert_eq!(exec.tick(), None);
        let status = shared.status.read();
        assert!(status.execution_error());
        assert!(!status.running());
        assert_eq!(shared.buffer_len(), 1);
    }

    #[test]
    fn test_buffer_full_cleared_on_retire() {
        let (mut exec, shared) = setup(1, 1);
        push(&shared, 0, vec![MotorSegment::new(1, 1, 0, 0)]);
        push(&shared, 0, vec![MotorSegment::new(1, 1, 0, 0)]);
        shared.status.set(StatusWord::RUNNING | StatusWord::BUFFER_FULL);

        exec.tick().unwrap();
        let status = shared.status.read();
        assert!(!status.buffer_full());
        assert!(status.running());
    }

    #[test]
    fn test_fraction_bits() {
        let config = MotionConfig {
            num_motors: 1,
            path_ticks: 4,
            fraction_bits: 8,
            ..Default::default()
        };
        let shared = Arc::new(SharedState::new(&config));
        let mut exec = TrajectoryExecutor::new(config, shared.clone());

        // Half a step per tick
        push(&shared, 0, vec![MotorSegment::new(4, 128, 0, 0)]);
        shared.status.set(StatusWord::RUNNING);
        run_until_idle(&mut exec);

        assert_eq!(exec.abs_positions(), &[512]);
        assert_eq!(exec.positions_steps(), vec![2]);
        assert_eq!(shared.position(0), Some(2));

        assert_eq!(to_steps(-1, 8), -1);
        assert_eq!(to_steps(i128::MAX, 0), i64::MAX);
    }

    #[test]
    fn test_reset_request() {
        let (mut exec, shared) = setup(1, 10);
        push(&shared, 0, vec![MotorSegment::new(10, 1, 0, 0)]);
        shared.status.set(StatusWord::RUNNING);
        exec.tick().unwrap();

        shared.lock_buffer().clear();
        shared.request_reset();
        shared.status.clear_all();

        assert_eq!(exec.tick(), None);
        assert!(!exec.is_mid_instruction());
        assert_eq!(exec.abs_positions(), &[0]);
        assert_eq!(shared.position(0), Some(0));
    }
}
