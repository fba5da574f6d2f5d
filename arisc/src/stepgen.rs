//! Step/dir pulse generator.
//!
//! Every channel drives a STEP pin and a DIR pin and owns a small FIFO of
//! tasks. A STEP task makes a number of pulses with the given high and low
//! times. A DIR task flips the DIR pin, waiting a setup time before the flip
//! and a hold time after it. Tasks run back to back: each one starts at the
//! deadline where the previous one ended, so there is no jitter between
//! consecutive tasks other than the main loop latency.
//!
//! Pin changes go through the deferred outputs of [`Gpio`], so
//! [`Stepgen::base_thread`] must run before [`Gpio::base_thread`] in the main
//! loop.

use core::fmt;

use crate::gpio::{Gpio, Pin, Port};
use crate::mmio::Bus;
use crate::msg::{Message, MsgSend};
use crate::timer::ns_to_ticks;

/// Number of channels.
pub const STEPGEN_CH_CNT: usize = 24;

/// Number of task slots per channel.
pub const STEPGEN_FIFO_SIZE: usize = 4;

/// Delay between queuing a task on an idle channel and its start, in ticks
/// (30 us at 300 MHz).
pub const STEPGEN_START_DELAY: u64 = 9000;

/// Steps generator error.
#[derive(Debug)]
pub enum Error {
    /// Invalid channel.
    InvalidChannel(u32),

    /// Invalid pin kind. Only 0 (step) and 1 (dir) exist.
    InvalidPinKind(u32),

    /// The task FIFO of the channel is full.
    FifoFull(usize),

    /// A STEP task must make at least one pulse.
    ZeroPulses,

    /// The message type is not handled by this module.
    UnknownMessage(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidChannel(c) => write!(f, "invalid channel: {c}"),
            Error::InvalidPinKind(kind) => {
                write!(f, "invalid pin kind: {kind}")
            }
            Error::FifoFull(c) => {
                write!(f, "task FIFO of channel {c} is full")
            }
            Error::ZeroPulses => write!(f, "step task without pulses"),
            Error::UnknownMessage(ty) => {
                write!(f, "unknown stepgen message: {ty:#x}")
            }
        }
    }
}

/// Represents a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Channel(usize);

impl Channel {
    /// Returns the channel index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl TryFrom<u32> for Channel {
    type Error = Error;

    fn try_from(c: u32) -> Result<Channel, Error> {
        if c as usize >= STEPGEN_CH_CNT {
            return Err(Error::InvalidChannel(c));
        }
        Ok(Channel(c as usize))
    }
}

/// Pin of a channel. It is also the kind of the tasks driving it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinKind {
    Step = 0,
    Dir = 1,
}

impl TryFrom<u32> for PinKind {
    type Error = Error;

    fn try_from(kind: u32) -> Result<PinKind, Error> {
        match kind {
            0 => Ok(PinKind::Step),
            1 => Ok(PinKind::Dir),
            kind => Err(Error::InvalidPinKind(kind)),
        }
    }
}

/// Steps generator message types.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MsgType {
    /// Words: channel, kind, port, pin, invert.
    PinSetup = 0x20,

    /// Words: channel, kind, pulses, low time (ns), high time (ns).
    TaskAdd,

    /// Reserved.
    TaskUpdate,

    /// Words: channel, all.
    Abort,

    /// Words: channel. Reply: position.
    PosGet,

    /// Words: channel, position.
    PosSet,

    /// Words: channel. Reply: number of queued tasks.
    TasksLeft,
}

impl MsgType {
    /// All steps generator message types.
    pub const ALL: [MsgType; 7] = [
        MsgType::PinSetup,
        MsgType::TaskAdd,
        MsgType::TaskUpdate,
        MsgType::Abort,
        MsgType::PosGet,
        MsgType::PosSet,
        MsgType::TasksLeft,
    ];
}

impl TryFrom<u8> for MsgType {
    type Error = Error;

    fn try_from(ty: u8) -> Result<MsgType, Error> {
        MsgType::ALL
            .into_iter()
            .find(|&t| t as u8 == ty)
            .ok_or(Error::UnknownMessage(ty))
    }
}

/// A queued task. A slot with zero pulses is free.
#[derive(Debug, Copy, Clone)]
struct Task {
    kind: PinKind,
    pulses: u32,
    low_ticks: u32,
    high_ticks: u32,

    /// Queuing order, used to tell which tasks an abort applies to.
    seq: u64,
}

impl Task {
    const EMPTY: Task = Task {
        kind: PinKind::Step,
        pulses: 0,
        low_ticks: 0,
        high_ticks: 0,
        seq: 0,
    };

    fn is_empty(&self) -> bool {
        self.pulses == 0
    }
}

/// GPIO pin driven by a channel.
#[derive(Debug, Copy, Clone)]
struct OutPin {
    port: Port,
    mask: u32,
    invert: bool,
}

/// Pending abort request.
#[derive(Debug, Copy, Clone)]
enum Abort {
    /// Drop the current task.
    Current,

    /// Drop every task queued before the given sequence number.
    Queued(u64),
}

/// Channel state.
#[derive(Debug, Copy, Clone)]
struct Generator {
    /// Output pins, indexed by [`PinKind`].
    pins: [Option<OutPin>; 2],

    /// Logical pin states, indexed by [`PinKind`].
    state: [bool; 2],

    /// Position in steps.
    pos: i32,

    abort: Option<Abort>,

    /// The current STEP task never ends.
    infinite: bool,

    /// Slot of the current task.
    slot: usize,

    /// Tick of the next pin change.
    deadline: u64,

    tasks: [Task; STEPGEN_FIFO_SIZE],
}

impl Generator {
    const IDLE: Generator = Generator {
        pins: [None; 2],
        state: [false; 2],
        pos: 0,
        abort: None,
        infinite: false,
        slot: 0,
        deadline: 0,
        tasks: [Task::EMPTY; STEPGEN_FIFO_SIZE],
    };

    /// Returns true if the channel has a task running.
    fn is_busy(&self) -> bool {
        !self.tasks[self.slot].is_empty()
    }

    /// Returns the slots in FIFO order, starting at the current one.
    fn slots(&self) -> impl Iterator<Item = usize> {
        let first = self.slot;
        (0..STEPGEN_FIFO_SIZE).map(move |i| (first + i) % STEPGEN_FIFO_SIZE)
    }

    fn tasks_left(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_empty()).count()
    }

    /// Drives the pin `kind` to its logical state.
    fn drive<B: Bus>(&self, kind: PinKind, gpio: &mut Gpio<B>) {
        let k = kind as usize;
        if let Some(pin) = self.pins[k] {
            if self.state[k] ^ pin.invert {
                gpio.port_set(pin.port, pin.mask);
            } else {
                gpio.port_clear(pin.port, pin.mask);
            }
        }
    }

    /// Starts the task in the current slot at `base`.
    fn start<B: Bus>(&mut self, base: u64, gpio: &mut Gpio<B>) {
        let task = self.tasks[self.slot];
        match task.kind {
            PinKind::Dir => {
                self.deadline = base + task.low_ticks as u64;
            }
            PinKind::Step => {
                self.infinite = task.pulses > i32::MAX as u32;
                self.state[PinKind::Step as usize] = true;
                self.deadline = base + task.high_ticks as u64;
                self.drive(PinKind::Step, gpio);
            }
        }
    }

    /// Moves to the next queued task. Returns false if there is none.
    fn goto_next(&mut self) -> bool {
        match self.slots().find(|&s| !self.tasks[s].is_empty()) {
            Some(slot) => {
                self.slot = slot;
                true
            }
            None => false,
        }
    }

    /// Applies a pending abort.
    fn apply_abort<B: Bus>(
        &mut self,
        abort: Abort,
        tick: u64,
        gpio: &mut Gpio<B>,
    ) {
        self.abort = None;

        match abort {
            Abort::Current => self.tasks[self.slot] = Task::EMPTY,
            Abort::Queued(seq) => {
                let keep_current = self.tasks[self.slot].seq >= seq;
                for task in self.tasks.iter_mut().filter(|t| t.seq < seq) {
                    *task = Task::EMPTY;
                }
                if keep_current {
                    return;
                }
            }
        }

        if self.goto_next() {
            self.start(tick + STEPGEN_START_DELAY, gpio);
        }
    }

    /// Advances the channel to `tick`.
    fn run<B: Bus>(&mut self, tick: u64, gpio: &mut Gpio<B>) {
        if !self.is_busy() {
            return;
        }

        let slot = self.slot;
        let task = self.tasks[slot];

        // Aborts wait for a safe point: never in the middle of a step pulse.
        if let Some(abort) = self.abort {
            let step_high = self.state[PinKind::Step as usize];
            if task.kind == PinKind::Dir || !step_high {
                self.apply_abort(abort, tick, gpio);
                return;
            }
        }

        if tick < self.deadline {
            return;
        }

        match task.kind {
            PinKind::Dir => {
                if task.pulses > 1 {
                    // Setup time elapsed, flip and hold.
                    self.tasks[slot].pulses -= 1;
                    let dir = &mut self.state[PinKind::Dir as usize];
                    *dir = !*dir;
                    self.deadline += task.high_ticks as u64;
                    self.drive(PinKind::Dir, gpio);
                } else {
                    self.tasks[slot] = Task::EMPTY;
                    if self.goto_next() {
                        self.start(self.deadline, gpio);
                    }
                }
            }
            PinKind::Step => {
                if self.state[PinKind::Step as usize] {
                    // The step is done once the pulse falls.
                    let dir = self.state[PinKind::Dir as usize];
                    self.pos = self.pos.wrapping_add(if dir { -1 } else { 1 });
                    self.state[PinKind::Step as usize] = false;
                    self.deadline += task.low_ticks as u64;
                    self.drive(PinKind::Step, gpio);
                    return;
                }

                if !self.infinite {
                    self.tasks[slot].pulses -= 1;
                }

                if !self.tasks[slot].is_empty() {
                    self.state[PinKind::Step as usize] = true;
                    self.deadline += task.high_ticks as u64;
                    self.drive(PinKind::Step, gpio);
                } else if self.goto_next() {
                    self.start(self.deadline, gpio);
                }
            }
        }
    }
}

/// Steps generator.
pub struct Stepgen {
    gens: [Generator; STEPGEN_CH_CNT],

    /// One more than the highest busy channel.
    active: usize,

    /// Sequence number of the next queued task.
    seq: u64,

    /// Tick of the last [`Stepgen::base_thread`] call.
    tick: u64,
}

impl Default for Stepgen {
    fn default() -> Stepgen {
        Stepgen::new()
    }
}

impl Stepgen {
    /// Returns a steps generator with all channels idle.
    pub const fn new() -> Stepgen {
        Stepgen {
            gens: [Generator::IDLE; STEPGEN_CH_CNT],
            active: 0,
            seq: 0,
            tick: 0,
        }
    }

    /// Updates the channel outputs. Must be called on every main loop pass,
    /// before [`Gpio::base_thread`].
    pub fn base_thread<B: Bus>(&mut self, tick: u64, gpio: &mut Gpio<B>) {
        self.tick = tick;

        for c in (0..self.active).rev() {
            self.gens[c].run(tick, gpio);
        }

        while self.active > 0 && !self.gens[self.active - 1].is_busy() {
            self.active -= 1;
        }
    }

    /// Returns one more than the highest busy channel. Channels from this
    /// one up are skipped by [`Stepgen::base_thread`].
    pub fn active(&self) -> usize {
        self.active
    }

    /// Configures a GPIO pin as the `kind` output of channel `c` and drives
    /// it low.
    pub fn pin_setup<B: Bus>(
        &mut self,
        c: Channel,
        kind: PinKind,
        port: Port,
        pin: Pin,
        invert: bool,
        gpio: &mut Gpio<B>,
    ) {
        gpio.pin_setup_for_output(port, pin);

        let gen = &mut self.gens[c.0];
        gen.state[kind as usize] = false;
        gen.pins[kind as usize] = Some(OutPin {
            port,
            mask: pin.mask(),
            invert,
        });
        gen.drive(kind, gpio);
    }

    /// Queues a task on channel `c`. A STEP task makes `pulses` pulses, or
    /// runs until aborted if `pulses` is above `i32::MAX`. A DIR task
    /// ignores `pulses` and flips the DIR pin `low_ns` after its start,
    /// then holds it for `high_ns`.
    ///
    /// A task queued on an idle channel starts [`STEPGEN_START_DELAY`] ticks
    /// after the last [`Stepgen::base_thread`] tick.
    pub fn task_add<B: Bus>(
        &mut self,
        c: Channel,
        kind: PinKind,
        pulses: u32,
        low_ns: u32,
        high_ns: u32,
        gpio: &mut Gpio<B>,
    ) -> Result<(), Error> {
        if kind == PinKind::Step && pulses == 0 {
            return Err(Error::ZeroPulses);
        }

        let gen = &mut self.gens[c.0];
        let slot = gen
            .slots()
            .find(|&s| gen.tasks[s].is_empty())
            .ok_or(Error::FifoFull(c.0))?;

        gen.tasks[slot] = Task {
            kind,
            pulses: match kind {
                PinKind::Step => pulses,
                PinKind::Dir => 2,
            },
            low_ticks: ns_to_ticks(low_ns),
            high_ticks: ns_to_ticks(high_ns),
            seq: self.seq,
        };
        self.seq += 1;

        if slot == gen.slot {
            gen.start(self.tick + STEPGEN_START_DELAY, gpio);
        }

        self.active = self.active.max(c.0 + 1);
        Ok(())
    }

    /// Requests an abort on channel `c`. With `all` set, every task queued
    /// so far is dropped. Otherwise only the current task is. The abort
    /// takes effect at the next safe point of the current task. Idle
    /// channels are not affected.
    pub fn abort(&mut self, c: Channel, all: bool) {
        let gen = &mut self.gens[c.0];
        if !gen.is_busy() {
            return;
        }

        gen.abort = Some(if all {
            Abort::Queued(self.seq)
        } else {
            Abort::Current
        });
    }

    /// Returns the position of channel `c`, in steps.
    pub fn pos_get(&self, c: Channel) -> i32 {
        self.gens[c.0].pos
    }

    /// Sets the position of channel `c`, in steps.
    pub fn pos_set(&mut self, c: Channel, pos: i32) {
        self.gens[c.0].pos = pos;
    }

    /// Returns the number of tasks queued on channel `c`, including the
    /// current one.
    pub fn tasks_left(&self, c: Channel) -> usize {
        self.gens[c.0].tasks_left()
    }

    /// Handles a steps generator message.
    pub fn msg_recv<B: Bus, S: MsgSend>(
        &mut self,
        msg: &Message,
        gpio: &mut Gpio<B>,
        tx: &mut S,
    ) -> crate::Result<()> {
        let ty = MsgType::try_from(msg.ty())?;

        match ty {
            MsgType::PinSetup => {
                let [c, kind, port, pin, invert] = msg.args::<5>()?;
                self.pin_setup(
                    Channel::try_from(c)?,
                    PinKind::try_from(kind)?,
                    Port::try_from(port)?,
                    Pin::try_from(pin)?,
                    invert != 0,
                    gpio,
                );
            }
            MsgType::TaskAdd => {
                let [c, kind, pulses, low_ns, high_ns] = msg.args::<5>()?;
                self.task_add(
                    Channel::try_from(c)?,
                    PinKind::try_from(kind)?,
                    pulses,
                    low_ns,
                    high_ns,
                    gpio,
                )?;
            }
            MsgType::TaskUpdate => {
                return Err(Error::UnknownMessage(msg.ty()).into());
            }
            MsgType::Abort => {
                let [c, all] = msg.args::<2>()?;
                self.abort(Channel::try_from(c)?, all != 0);
            }
            MsgType::PosGet => {
                let [c] = msg.args::<1>()?;
                let pos = self.pos_get(Channel::try_from(c)?);
                tx.send(msg.ty(), &[pos as u32])?;
            }
            MsgType::PosSet => {
                let [c, pos] = msg.args::<2>()?;
                self.pos_set(Channel::try_from(c)?, pos as i32);
            }
            MsgType::TasksLeft => {
                let [c] = msg.args::<1>()?;
                let left = self.tasks_left(Channel::try_from(c)?);
                tx.send(msg.ty(), &[left as u32])?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::Level;
    use crate::sim::{Outbox, RamBus};

    fn ch(c: u32) -> Channel {
        Channel::try_from(c).unwrap()
    }

    fn pin(n: u32) -> Pin {
        Pin::try_from(n).unwrap()
    }

    /// Sets up channel 0 with STEP on PA3 and DIR on PA4.
    fn setup(gpio: &mut Gpio<&RamBus>) -> Stepgen {
        let mut sg = Stepgen::new();
        sg.pin_setup(ch(0), PinKind::Step, Port::PA, pin(3), false, gpio);
        sg.pin_setup(ch(0), PinKind::Dir, Port::PA, pin(4), false, gpio);
        gpio.base_thread();
        sg
    }

    /// Runs one main loop pass at `tick`.
    fn pass(sg: &mut Stepgen, gpio: &mut Gpio<&RamBus>, tick: u64) {
        sg.base_thread(tick, gpio);
        gpio.base_thread();
    }

    fn step(gpio: &Gpio<&RamBus>) -> Level {
        gpio.pin_get(Port::PA, pin(3))
    }

    fn dir(gpio: &Gpio<&RamBus>) -> Level {
        gpio.pin_get(Port::PA, pin(4))
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(
            Channel::try_from(24),
            Err(Error::InvalidChannel(24))
        ));
        assert!(matches!(PinKind::try_from(2), Err(Error::InvalidPinKind(2))));
    }

    #[test]
    fn pin_setup_drives_inverted_level() {
        let bus = RamBus::new();
        let mut gpio = Gpio::new(&bus);
        let mut sg = Stepgen::new();

        sg.pin_setup(ch(1), PinKind::Step, Port::PL, pin(2), true, &mut gpio);
        gpio.base_thread();

        assert_eq!(gpio.pin_get(Port::PL, pin(2)), Level::High);
        assert_eq!(
            gpio.function(Port::PL, pin(2)),
            crate::gpio::Function::Output
        );
    }

    #[test]
    fn step_task_timing() {
        let bus = RamBus::new();
        let mut gpio = Gpio::new(&bus);
        let mut sg = setup(&mut gpio);

        // 1000 ns low = 300 ticks, 2000 ns high = 600 ticks.
        sg.task_add(ch(0), PinKind::Step, 2, 1000, 2000, &mut gpio).unwrap();
        gpio.base_thread();
        assert_eq!(step(&gpio), Level::High);
        assert_eq!(sg.active(), 1);

        pass(&mut sg, &mut gpio, 9599);
        assert_eq!(step(&gpio), Level::High);

        pass(&mut sg, &mut gpio, 9600);
        assert_eq!(step(&gpio), Level::Low);
        assert_eq!(sg.pos_get(ch(0)), 1);

        pass(&mut sg, &mut gpio, 9900);
        assert_eq!(step(&gpio), Level::High);
        assert_eq!(sg.pos_get(ch(0)), 1);

        pass(&mut sg, &mut gpio, 10500);
        assert_eq!(step(&gpio), Level::Low);
        assert_eq!(sg.pos_get(ch(0)), 2);
        assert_eq!(sg.tasks_left(ch(0)), 1);

        pass(&mut sg, &mut gpio, 10800);
        assert_eq!(step(&gpio), Level::Low);
        assert_eq!(sg.pos_get(ch(0)), 2);
        assert_eq!(sg.tasks_left(ch(0)), 0);
        assert_eq!(sg.active(), 0);
    }

    #[test]
    fn dir_then_step() {
        let bus = RamBus::new();
        let mut gpio = Gpio::new(&bus);
        let mut sg = setup(&mut gpio);

        sg.task_add(ch(0), PinKind::Dir, 0, 1000, 2000, &mut gpio).unwrap();
        sg.task_add(ch(0), PinKind::Step, 1, 1000, 1000, &mut gpio).unwrap();
        gpio.base_thread();
        assert_eq!(sg.tasks_left(ch(0)), 2);
        assert_eq!(step(&gpio), Level::Low);

        // Setup time.
        pass(&mut sg, &mut gpio, 9299);
        assert_eq!(dir(&gpio), Level::Low);
        pass(&mut sg, &mut gpio, 9300);
        assert_eq!(dir(&gpio), Level::High);

        // Hold time, then the step task starts right away.
        pass(&mut sg, &mut gpio, 9899);
        assert_eq!(step(&gpio), Level::Low);
        pass(&mut sg, &mut gpio, 9900);
        assert_eq!(step(&gpio), Level::High);
        assert_eq!(sg.tasks_left(ch(0)), 1);

        pass(&mut sg, &mut gpio, 10200);
        pass(&mut sg, &mut gpio, 10500);
        assert_eq!(sg.pos_get(ch(0)), -1);
        assert_eq!(sg.tasks_left(ch(0)), 0);
        assert_eq!(dir(&gpio), Level::High);
    }

    #[test]
    fn fifo_full() {
        let bus = RamBus::new();
        let mut gpio = Gpio::new(&bus);
        let mut sg = setup(&mut gpio);

        for _ in 0..STEPGEN_FIFO_SIZE {
            sg.task_add(ch(0), PinKind::Step, 1, 100, 100, &mut gpio).unwrap();
        }
        assert!(matches!(
            sg.task_add(ch(0), PinKind::Step, 1, 100, 100, &mut gpio),
            Err(Error::FifoFull(0))
        ));
        assert!(matches!(
            sg.task_add(ch(1), PinKind::Step, 0, 100, 100, &mut gpio),
            Err(Error::ZeroPulses)
        ));
    }

    #[test]
    fn abort_current_infinite_task() {
        let bus = RamBus::new();
        let mut gpio = Gpio::new(&bus);
        let mut sg = setup(&mut gpio);

        sg.task_add(ch(0), PinKind::Step, u32::MAX, 1000, 1000, &mut gpio)
            .unwrap();
        sg.task_add(ch(0), PinKind::Step, 1, 1000, 1000, &mut gpio).unwrap();

        let mut tick = 9300;
        for _ in 0..1000 {
            pass(&mut sg, &mut gpio, tick);
            tick += 300;
        }
        assert_eq!(sg.pos_get(ch(0)), 500);
        assert_eq!(sg.tasks_left(ch(0)), 2);

        // The step pin is high: the abort waits for the falling edge.
        assert_eq!(step(&gpio), Level::High);
        sg.abort(ch(0), false);
        pass(&mut sg, &mut gpio, tick);
        assert_eq!(step(&gpio), Level::Low);
        assert_eq!(sg.tasks_left(ch(0)), 2);
        assert_eq!(sg.pos_get(ch(0)), 501);

        // Abort applied, the next task starts after the start delay.
        pass(&mut sg, &mut gpio, tick + 1);
        assert_eq!(sg.tasks_left(ch(0)), 1);
        assert_eq!(step(&gpio), Level::High);
        assert_eq!(sg.pos_get(ch(0)), 501);
    }

    #[test]
    fn abort_all_keeps_later_tasks() {
        let bus = RamBus::new();
        let mut gpio = Gpio::new(&bus);
        let mut sg = setup(&mut gpio);

        sg.task_add(ch(0), PinKind::Step, 100, 1000, 1000, &mut gpio).unwrap();
        sg.task_add(ch(0), PinKind::Step, 100, 1000, 1000, &mut gpio).unwrap();
        sg.abort(ch(0), true);
        sg.task_add(ch(0), PinKind::Dir, 0, 1000, 1000, &mut gpio).unwrap();
        assert_eq!(sg.tasks_left(ch(0)), 3);

        pass(&mut sg, &mut gpio, 9300);
        assert_eq!(step(&gpio), Level::Low);
        pass(&mut sg, &mut gpio, 9301);
        assert_eq!(sg.tasks_left(ch(0)), 1);

        // The DIR task queued after the abort runs.
        pass(&mut sg, &mut gpio, 9301 + 9000 + 300);
        assert_eq!(dir(&gpio), Level::High);
        pass(&mut sg, &mut gpio, 9301 + 9000 + 600);
        assert_eq!(sg.tasks_left(ch(0)), 0);
        assert_eq!(sg.active(), 0);
    }

    /// Runs an endless STEP task, aborts it after `passes` passes and
    /// returns the rising edges seen on the STEP pin and the final position.
    fn abort_after(passes: usize) -> (i32, i32) {
        let bus = RamBus::new();
        let mut gpio = Gpio::new(&bus);
        let mut sg = setup(&mut gpio);

        sg.task_add(ch(0), PinKind::Step, u32::MAX, 1000, 1000, &mut gpio)
            .unwrap();
        gpio.base_thread();

        let mut last = step(&gpio);
        let mut rising = (last == Level::High) as i32;
        let mut tick = 9000;
        for i in 0..200 {
            if i == passes {
                sg.abort(ch(0), true);
            }
            pass(&mut sg, &mut gpio, tick);
            let level = step(&gpio);
            if level == Level::High && last == Level::Low {
                rising += 1;
            }
            last = level;
            tick += 300;
        }

        assert_eq!(sg.tasks_left(ch(0)), 0);
        (rising, sg.pos_get(ch(0)))
    }

    #[test]
    fn abort_keeps_position_in_step_with_pulses() {
        // Abort requested while the pin is high, then while it is low.
        for passes in [50, 51] {
            let (rising, pos) = abort_after(passes);
            assert_eq!(pos, rising);
            assert!(pos > 20);
        }
    }

    #[test]
    fn abort_on_idle_channel_is_ignored() {
        let bus = RamBus::new();
        let mut gpio = Gpio::new(&bus);
        let mut sg = setup(&mut gpio);

        sg.abort(ch(0), false);
        sg.task_add(ch(0), PinKind::Step, 1, 1000, 1000, &mut gpio).unwrap();
        pass(&mut sg, &mut gpio, 0);
        assert_eq!(sg.tasks_left(ch(0)), 1);
    }

    #[test]
    fn active_channels() {
        let bus = RamBus::new();
        let mut gpio = Gpio::new(&bus);
        let mut sg = Stepgen::new();

        sg.task_add(ch(2), PinKind::Step, 1, 1000, 1000, &mut gpio).unwrap();
        sg.task_add(ch(5), PinKind::Step, 2, 1000, 1000, &mut gpio).unwrap();
        assert_eq!(sg.active(), 6);

        // Channel 2 ends first; channel 5 keeps the range.
        pass(&mut sg, &mut gpio, 9300);
        pass(&mut sg, &mut gpio, 9600);
        assert_eq!(sg.tasks_left(ch(2)), 0);
        assert_eq!(sg.active(), 6);

        pass(&mut sg, &mut gpio, 9900);
        pass(&mut sg, &mut gpio, 10200);
        assert_eq!(sg.active(), 0);
        assert_eq!(sg.pos_get(ch(5)), 2);
    }

    #[test]
    fn messages() {
        let bus = RamBus::new();
        let mut gpio = Gpio::new(&bus);
        let mut sg = Stepgen::new();
        let mut tx = Outbox::new();

        let setup = Message::new(MsgType::PinSetup as u8, &[3, 0, 0, 3, 0]);
        sg.msg_recv(&setup, &mut gpio, &mut tx).unwrap();

        let add =
            Message::new(MsgType::TaskAdd as u8, &[3, 0, 10, 1000, 1000]);
        sg.msg_recv(&add, &mut gpio, &mut tx).unwrap();

        let pos = Message::new(MsgType::PosSet as u8, &[3, -5i32 as u32]);
        sg.msg_recv(&pos, &mut gpio, &mut tx).unwrap();

        let get = Message::new(MsgType::PosGet as u8, &[3]);
        sg.msg_recv(&get, &mut gpio, &mut tx).unwrap();
        let left = Message::new(MsgType::TasksLeft as u8, &[3]);
        sg.msg_recv(&left, &mut gpio, &mut tx).unwrap();

        assert_eq!(
            tx.sent,
            vec![
                (MsgType::PosGet as u8, vec![0xffff_fffb]),
                (MsgType::TasksLeft as u8, vec![1]),
            ]
        );

        let abort = Message::new(MsgType::Abort as u8, &[3, 1]);
        sg.msg_recv(&abort, &mut gpio, &mut tx).unwrap();
        pass(&mut sg, &mut gpio, 9300);
        pass(&mut sg, &mut gpio, 9301);
        assert_eq!(sg.tasks_left(ch(3)), 0);
    }

    #[test]
    fn bad_messages() {
        let bus = RamBus::new();
        let mut gpio = Gpio::new(&bus);
        let mut sg = Stepgen::new();
        let mut tx = Outbox::new();

        let update = Message::new(MsgType::TaskUpdate as u8, &[0]);
        assert!(matches!(
            sg.msg_recv(&update, &mut gpio, &mut tx),
            Err(crate::Error::Stepgen(Error::UnknownMessage(0x22)))
        ));

        let bad_ch = Message::new(MsgType::PosGet as u8, &[24]);
        assert!(matches!(
            sg.msg_recv(&bad_ch, &mut gpio, &mut tx),
            Err(crate::Error::Stepgen(Error::InvalidChannel(24)))
        ));

        let short = Message::new(MsgType::TaskAdd as u8, &[0, 0, 1]);
        assert!(matches!(
            sg.msg_recv(&short, &mut gpio, &mut tx),
            Err(crate::Error::Msg(_))
        ));
    }
}
