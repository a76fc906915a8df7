//! Tick-driven program interpreter with the device's stepping semantics.
//!
//! Each tick first burns down the delay in progress, then retires
//! instructions until a delay starts, a user event is emitted, the program
//! ends, or [`STEP_BUDGET_PER_TICK`] instructions have retired.

use crate::decoder::Instruction;
use crate::encoding::{GeneratorMask, Marker, SequenceControl, MAX_PROGRAM_LEN};
use crate::state::DriveState;

/// Instructions retired per tick before the executor yields. Bounds a
/// delay-free infinite loop to a fixed amount of work per tick.
pub const STEP_BUDGET_PER_TICK: usize = 2 * MAX_PROGRAM_LEN;

/// Externally visible side effect of one retired instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Drive-state register write.
    SetState(DriveState),
    /// Generator enable write.
    Generators(GeneratorMask),
    /// Metering on/off.
    Metering(bool),
    /// User-event marker to report to the host.
    UserEvent(Marker),
}

/// Executor run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunStatus {
    /// Nothing loaded or started.
    #[default]
    Idle,
    /// Program is executing or waiting in a delay.
    Running,
    /// Program ended, either at its last instruction or by a stop control.
    Completed {
        /// Ended by `Stopped` rather than by running off the end.
        aborted: bool,
    },
}

/// Everything one tick produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Effects in retirement order.
    pub effects: Vec<Effect>,
    /// The program ran off its end during this tick.
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Wait {
    #[default]
    None,
    Ticks(u16),
    Until(u32),
    Forever,
}

enum Step {
    Continue(Option<Effect>),
    Pause(Effect),
    Wait,
    End,
}

/// Interpreter state for one line's program.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    instructions: Vec<Instruction>,
    ip: usize,
    counters: [Option<u8>; MAX_PROGRAM_LEN],
    wait: Wait,
    elapsed: u32,
    status: RunStatus,
}

impl Executor {
    /// Creates an idle executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the loaded program without starting it.
    pub fn load(&mut self, instructions: Vec<Instruction>) {
        self.instructions = instructions;
        self.status = RunStatus::Idle;
    }

    /// Current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Index of the next instruction to retire.
    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.ip
    }

    /// True while the program is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.status, RunStatus::Running)
    }

    /// Applies a control value. Returns true when a running program was
    /// stopped, which the device reports like a normal completion.
    pub fn control(&mut self, control: SequenceControl) -> bool {
        match control {
            SequenceControl::Stopped => {
                if self.is_running() {
                    self.status = RunStatus::Completed { aborted: true };
                    self.wait = Wait::None;
                    return true;
                }
            }
            SequenceControl::Running | SequenceControl::Restart => self.restart(),
            SequenceControl::Resume => self.resume(),
            SequenceControl::Break => self.break_loop(),
            SequenceControl::BreakAndResume => {
                self.break_loop();
                self.resume();
            }
        }
        false
    }

    fn restart(&mut self) {
        self.ip = 0;
        self.counters = [None; MAX_PROGRAM_LEN];
        self.wait = Wait::None;
        self.elapsed = 0;
        self.status = if self.instructions.is_empty() {
            RunStatus::Idle
        } else {
            RunStatus::Running
        };
    }

    fn resume(&mut self) {
        if self.is_running() {
            self.wait = Wait::None;
        }
    }

    /// Leaves the innermost loop enclosing the current position: the first
    /// branch at or after `ip` that jumps back to or before `ip`.
    fn break_loop(&mut self) {
        if !self.is_running() {
            return;
        }
        let ip = self.ip;
        let exit = self.instructions[ip.min(self.instructions.len())..]
            .iter()
            .position(|instruction| {
                instruction
                    .branch_target()
                    .is_some_and(|target| usize::from(target) <= ip)
            })
            .map(|offset| ip + offset);
        match exit {
            Some(branch) => {
                self.counters[branch] = None;
                self.ip = branch + 1;
            }
            None => self.ip = self.instructions.len(),
        }
    }

    /// Advances one tick.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        if !self.is_running() {
            return report;
        }
        self.elapsed = self.elapsed.saturating_add(1);
        match self.wait {
            Wait::Forever => return report,
            Wait::Ticks(n) if n > 1 => {
                self.wait = Wait::Ticks(n - 1);
                return report;
            }
            Wait::Until(at) if self.elapsed < at => return report,
            Wait::Ticks(_) | Wait::Until(_) | Wait::None => self.wait = Wait::None,
        }

        for _ in 0..STEP_BUDGET_PER_TICK {
            match self.step() {
                Step::Continue(effect) => report.effects.extend(effect),
                Step::Pause(effect) => {
                    report.effects.push(effect);
                    break;
                }
                Step::Wait => break,
                Step::End => {
                    self.status = RunStatus::Completed { aborted: false };
                    report.completed = true;
                    break;
                }
            }
        }
        report
    }

    fn step(&mut self) -> Step {
        let Some(instruction) = self.instructions.get(self.ip).copied() else {
            return Step::End;
        };
        let at = self.ip;
        self.ip += 1;

        match instruction {
            Instruction::SetState(state) => Step::Continue(Some(Effect::SetState(state))),
            Instruction::SetGenerators(mask) => Step::Continue(Some(Effect::Generators(mask))),
            Instruction::Metering(on) => Step::Continue(Some(Effect::Metering(on))),
            Instruction::UserEvent(marker) => Step::Pause(Effect::UserEvent(marker)),
            Instruction::CidMarker => Step::Continue(None),
            Instruction::Delay { ticks: 0, .. } => {
                self.wait = Wait::Forever;
                Step::Wait
            }
            Instruction::Delay {
                ticks,
                absolute: false,
            } => {
                self.wait = Wait::Ticks(ticks);
                Step::Wait
            }
            Instruction::Delay {
                ticks,
                absolute: true,
            } => {
                if self.elapsed >= u32::from(ticks) {
                    Step::Continue(None)
                } else {
                    self.wait = Wait::Until(u32::from(ticks));
                    Step::Wait
                }
            }
            Instruction::Branch { target, count } => {
                if count == 0 {
                    self.ip = usize::from(target);
                } else {
                    let remaining = self.counters[at].unwrap_or(count);
                    if remaining > 0 {
                        self.counters[at] = Some(remaining - 1);
                        self.ip = usize::from(target);
                    } else {
                        self.counters[at] = None;
                    }
                }
                Step::Continue(None)
            }
        }
    }
}
