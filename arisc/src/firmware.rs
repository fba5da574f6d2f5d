//! Firmware main loop.
//!
//! A pass of the main loop handles at most one message from the ARM, reads
//! the tick timer, updates the steps generator and the encoder counter and
//! finally applies the resulting GPIO output changes.

use core::fmt;

use crate::ccu;
use crate::encoder::{self, Encoder};
use crate::gpio::{self, Gpio, Pin, Port};
use crate::mmio::Bus;
use crate::msg::{Message, Messenger};
use crate::msgbox::{Msgbox, MSGBOX_QUEUE_RX};
use crate::stepgen::{self, Stepgen};
use crate::timer::{self, Counter, Timer};
use crate::uart;

/// CPUS clock rate. The tick timer runs at this rate.
pub const CPUS_FREQ: u32 = timer::TIMER_FREQUENCY;

/// Board LEDs, turned on at boot.
pub const LEDS: [(Port, u32); 2] = [(Port::PA, 15), (Port::PL, 10)];

/// Boot banner.
pub const BANNER: &str =
    concat!("ARISC CNC firmware ", env!("CARGO_PKG_VERSION"));

/// Firmware module owning a message type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Module {
    Gpio,
    Stepgen,
    Encoder,
}

/// OR1K exception, identified by its vector number (vector address >> 8).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exception {
    /// Tick timer exception.
    Timer,

    /// External interrupt.
    Interrupt,

    /// Any other exception. The firmware cannot recover from these.
    Fault(u32),
}

impl From<u32> for Exception {
    fn from(vector: u32) -> Exception {
        match vector {
            0x5 => Exception::Timer,
            0x8 => Exception::Interrupt,
            v => Exception::Fault(v),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Exception::Timer => "tick timer",
            Exception::Interrupt => "interrupt",
            Exception::Fault(0x2) => "bus error",
            Exception::Fault(0x3) => "data page fault",
            Exception::Fault(0x4) => "instruction page fault",
            Exception::Fault(0x6) => "alignment",
            Exception::Fault(0x7) => "illegal instruction",
            Exception::Fault(0x9) => "data TLB miss",
            Exception::Fault(0xa) => "instruction TLB miss",
            Exception::Fault(0xb) => "range",
            Exception::Fault(0xc) => "system call",
            Exception::Fault(0xd) => "floating point",
            Exception::Fault(0xe) => "trap",
            Exception::Fault(v) => return write!(f, "exception {v:#x}"),
        };
        write!(f, "{name}")
    }
}

/// Brings up the board: R_PIO and UART0 clocks, console, CPUS clock rate,
/// message box and LEDs. Prints the boot banner.
pub fn board_init<B: Bus + Copy>(
    bus: B,
) -> crate::Result<(Gpio<B>, Msgbox<B>)> {
    let mut gpio = Gpio::new(bus);
    uart::init(&gpio)?;
    ccu::set_cpus_rate(&bus, CPUS_FREQ)?;
    let msgbox = Msgbox::new(bus);

    for (port, pin) in LEDS {
        let pin = Pin::try_from(pin)?;
        gpio.pin_setup_for_output(port, pin);
        gpio.pin_set(port, pin);
    }
    gpio.base_thread();

    crate::println!("\n{BANNER}\n");

    Ok((gpio, msgbox))
}

/// Logs a word received through the message box, if any.
pub fn msgbox_thread<B: Bus>(msgbox: &Msgbox<B>) -> Option<u32> {
    match msgbox.read(MSGBOX_QUEUE_RX) {
        Ok(Some(word)) => {
            crate::println!("got message {word}");
            Some(word)
        }
        Ok(None) => None,
        Err(err) => {
            crate::println!("msgbox: {err}");
            None
        }
    }
}

/// The firmware state.
pub struct Firmware<B: Bus, C: Counter> {
    msg: Messenger<Module>,
    gpio: Gpio<B>,
    timer: Timer<C>,
    stepgen: Stepgen,
    encoder: Encoder,
}

impl<B: Bus, C: Counter> Firmware<B, C> {
    /// Returns the firmware state, routing every GPIO, steps generator and
    /// encoder message type to its module.
    pub fn new(
        mut msg: Messenger<Module>,
        gpio: Gpio<B>,
        timer: Timer<C>,
    ) -> Firmware<B, C> {
        for ty in gpio::MsgType::ALL {
            msg.recv_callback_add(ty as u8, Module::Gpio);
        }
        for ty in stepgen::MsgType::ALL {
            if ty != stepgen::MsgType::TaskUpdate {
                msg.recv_callback_add(ty as u8, Module::Stepgen);
            }
        }
        for ty in encoder::MsgType::ALL {
            msg.recv_callback_add(ty as u8, Module::Encoder);
        }

        Firmware {
            msg,
            gpio,
            timer,
            stepgen: Stepgen::new(),
            encoder: Encoder::new(),
        }
    }

    /// Runs a main loop pass.
    pub fn base_thread(&mut self) {
        if let Some((module, msg)) = self.msg.base_thread() {
            if let Err(err) = self.dispatch(module, &msg) {
                crate::println!("message {:#x} dropped: {err}", msg.ty());
            }
        }

        let tick = self.timer.cnt_get_64();
        self.stepgen.base_thread(tick, &mut self.gpio);
        self.encoder.base_thread(&self.gpio);
        self.gpio.base_thread();
    }

    /// Hands a message to its module.
    fn dispatch(
        &mut self,
        module: Module,
        msg: &Message,
    ) -> crate::Result<()> {
        match module {
            Module::Gpio => self.gpio.msg_recv(msg, &mut self.msg),
            Module::Stepgen => {
                self.stepgen.msg_recv(msg, &mut self.gpio, &mut self.msg)
            }
            Module::Encoder => {
                self.encoder.msg_recv(msg, &self.gpio, &mut self.msg)
            }
        }
    }

    /// Returns the GPIO controller.
    pub fn gpio(&self) -> &Gpio<B> {
        &self.gpio
    }

    /// Returns the steps generator.
    pub fn stepgen(&self) -> &Stepgen {
        &self.stepgen
    }

    /// Returns the encoder counter.
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Returns the system timer.
    pub fn timer(&self) -> &Timer<C> {
        &self.timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::Level;
    use crate::sim::{self, MsgArea, Peer, RamBus, SimCounter};

    struct Rig {
        bus: &'static RamBus,
        cnt: &'static SimCounter,
        peer: Peer,
        fw: Firmware<&'static RamBus, &'static SimCounter>,
    }

    fn rig() -> Rig {
        let bus: &'static RamBus = Box::leak(Box::new(RamBus::new()));
        let cnt: &'static SimCounter = Box::leak(Box::new(SimCounter::new()));
        let area = MsgArea::leak();

        let timer = Timer::new(cnt);
        timer.start();
        let fw = Firmware::new(sim::messenger(area), Gpio::new(bus), timer);

        Rig {
            bus,
            cnt,
            peer: Peer::new(area),
            fw,
        }
    }

    impl Rig {
        /// Runs passes until the ARM receives a reply.
        fn reply(&mut self) -> Message {
            for _ in 0..2 * crate::msg::MSG_MAX_CNT {
                self.fw.base_thread();
                if let Some(msg) = self.peer.recv() {
                    return msg;
                }
            }
            panic!("no reply");
        }
    }

    #[test]
    fn exceptions() {
        assert_eq!(Exception::from(5), Exception::Timer);
        assert_eq!(Exception::from(8), Exception::Interrupt);
        assert_eq!(Exception::from(7), Exception::Fault(7));
        assert_eq!(Exception::from(7).to_string(), "illegal instruction");
        assert_eq!(Exception::from(0x1f).to_string(), "exception 0x1f");
    }

    #[test]
    fn board_bring_up() {
        let bus = RamBus::new();
        let (gpio, _msgbox) = board_init(&bus).unwrap();

        let pa15 = Pin::try_from(15).unwrap();
        let pl10 = Pin::try_from(10).unwrap();
        assert_eq!(gpio.pin_get(Port::PA, pa15), Level::High);
        assert_eq!(gpio.pin_get(Port::PL, pl10), Level::High);
        assert_eq!(gpio.function(Port::PL, pl10), gpio::Function::Output);

        // CPUS on PLL6.
        assert_eq!(bus.read(0x01f0_1400) >> 16 & 0b11, 2);
    }

    #[test]
    fn msgbox_words_are_consumed() {
        let bus = RamBus::new();
        let msgbox = Msgbox::new(&bus);
        assert_eq!(msgbox_thread(&msgbox), None);

        bus.write(0x01c1_7144, 1);
        bus.write(0x01c1_7184, 42);
        assert_eq!(msgbox_thread(&msgbox), Some(42));
    }

    #[test]
    fn gpio_requests() {
        let mut rig = rig();

        assert!(rig.peer.send(gpio::MsgType::SetupForOutput as u8, &[0, 15]));
        assert!(rig.peer.send(gpio::MsgType::PinSet as u8, &[0, 15]));
        assert!(rig.peer.send(gpio::MsgType::PinGet as u8, &[0, 15]));

        let reply = rig.reply();
        assert_eq!(reply.ty(), gpio::MsgType::PinGet as u8);
        assert_eq!(reply.words(), &[1]);
        assert_eq!(rig.bus.read(Port::PA.data_addr()), 1 << 15);
    }

    #[test]
    fn stepgen_requests() {
        let mut rig = rig();

        let setup = [0, 0, 0, 3, 0];
        assert!(rig.peer.send(stepgen::MsgType::PinSetup as u8, &setup));
        let task = [0, 0, 3, 1000, 1000];
        assert!(rig.peer.send(stepgen::MsgType::TaskAdd as u8, &task));

        for _ in 0..200 {
            rig.cnt.advance(100);
            rig.fw.base_thread();
        }
        let ch0 = stepgen::Channel::try_from(0).unwrap();
        assert_eq!(rig.fw.stepgen().tasks_left(ch0), 0);

        assert!(rig.peer.send(stepgen::MsgType::PosGet as u8, &[0]));
        let reply = rig.reply();
        assert_eq!(reply.words(), &[3]);
        assert!(rig.fw.timer().cnt_get() >= 20_000);
    }

    #[test]
    fn encoder_requests() {
        let mut rig = rig();

        let pins = encoder::MsgType::PinsSetup as u8;
        assert!(rig.peer.send(pins, &[2, 0, 3, 0]));
        assert!(rig.peer.send(pins, &[2, 1, 3, 1]));
        let setup = encoder::MsgType::Setup as u8;
        assert!(rig.peer.send(setup, &[2, 0, 1, 0, 0]));
        assert!(rig.peer.send(encoder::MsgType::Enable as u8, &[1 << 2]));
        for _ in 0..4 {
            rig.fw.base_thread();
        }
        let ch2 = encoder::Channel::try_from(2).unwrap();
        assert!(rig.fw.encoder().state_get(ch2));

        for lv in [0b10, 0b11, 0b01, 0b00, 0b10] {
            rig.bus.write(Port::PD.data_addr(), lv);
            rig.fw.base_thread();
        }

        assert!(rig.peer.send(encoder::MsgType::Counts as u8, &[1 << 2]));
        let reply = rig.reply();
        assert_eq!(reply.words(), &[0, 0, 5, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn bad_and_unhandled_requests_are_dropped() {
        let mut rig = rig();

        assert!(rig.peer.send(gpio::MsgType::PinSet as u8, &[9, 0]));
        assert!(rig.peer.send(stepgen::MsgType::TaskUpdate as u8, &[0]));
        assert!(rig.peer.send(0xff, &[]));
        assert!(rig.peer.send(gpio::MsgType::PortGet as u8, &[7]));

        let reply = rig.reply();
        assert_eq!(reply.ty(), gpio::MsgType::PortGet as u8);
        assert_eq!(rig.peer.pending(), 0);
        assert!(rig.fw.gpio().port_get(Port::PL) == 0);
    }
}
