//! Quadrature encoder counter.
//!
//! Encoder inputs are sampled once per main loop pass, so the highest edge
//! rate that can be followed is bounded by the loop period. In AB mode a
//! missed sample shows up as a jump between opposite states of the Gray
//! sequence, which is not counted since its direction is unknown.

use core::fmt;

use crate::gpio::{Gpio, Level, Pin, Port};
use crate::mmio::Bus;
use crate::msg::{Message, MsgSend};

/// Number of channels.
pub const ENCODER_CH_CNT: usize = 8;

/// Number of phases per channel.
pub const ENCODER_PH_CNT: usize = 3;

/// Next AB state in the forward direction, indexed by the current one.
///
/// ```text
/// A  _____|`````|_____|`````|__
/// B  __|`````|_____|`````|_____
/// AB 00 01 11 10 00 01 11 10 00
/// ```
const AB_NEXT: [u8; 4] = [
    0b01, // 00
    0b11, // 01
    0b00, // 10
    0b10, // 11
];

/// Encoder counter error.
#[derive(Debug)]
pub enum Error {
    /// Invalid channel.
    InvalidChannel(u32),

    /// Invalid phase.
    InvalidPhase(u32),

    /// Invalid edge selection.
    InvalidEdge(u32),

    /// The message type is not handled by this module.
    UnknownMessage(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidChannel(c) => write!(f, "invalid channel: {c}"),
            Error::InvalidPhase(ph) => write!(f, "invalid phase: {ph}"),
            Error::InvalidEdge(edge) => write!(f, "invalid edge: {edge}"),
            Error::UnknownMessage(ty) => {
                write!(f, "unknown encoder message: {ty:#x}")
            }
        }
    }
}

/// Represents a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Channel(usize);

impl TryFrom<u32> for Channel {
    type Error = Error;

    fn try_from(c: u32) -> Result<Channel, Error> {
        if c as usize >= ENCODER_CH_CNT {
            return Err(Error::InvalidChannel(c));
        }
        Ok(Channel(c as usize))
    }
}

/// Encoder phase.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    A = 0,
    B = 1,

    /// Index.
    Z = 2,
}

impl TryFrom<u32> for Phase {
    type Error = Error;

    fn try_from(ph: u32) -> Result<Phase, Error> {
        match ph {
            0 => Ok(Phase::A),
            1 => Ok(Phase::B),
            2 => Ok(Phase::Z),
            ph => Err(Error::InvalidPhase(ph)),
        }
    }
}

/// Edges of phase A counted when phase B is not used.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Edge {
    Rising = 0,
    Falling = 1,
    Both = 2,
}

impl TryFrom<u32> for Edge {
    type Error = Error;

    fn try_from(edge: u32) -> Result<Edge, Error> {
        match edge {
            0 => Ok(Edge::Rising),
            1 => Ok(Edge::Falling),
            2 => Ok(Edge::Both),
            edge => Err(Error::InvalidEdge(edge)),
        }
    }
}

/// Channel configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    /// Count in the opposite direction.
    pub inverted: bool,

    /// Use phase B. Otherwise only phase A edges are counted.
    pub using_b: bool,

    /// Use phase Z. A rising edge resets the counts.
    pub using_z: bool,

    /// Counted phase A edges when `using_b` is false.
    pub edge: Edge,
}

impl Config {
    const DEFAULT: Config = Config {
        inverted: false,
        using_b: true,
        using_z: false,
        edge: Edge::Rising,
    };
}

impl Default for Config {
    fn default() -> Config {
        Config::DEFAULT
    }
}

/// Encoder message types.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MsgType {
    /// Words: channel, phase, port, pin.
    PinsSetup = 0x30,

    /// Words: channel, inverted, using B, using Z, edge.
    Setup,

    /// Words: channel mask. Reply: counts of every channel, zero for the
    /// channels not in the mask.
    Counts,

    /// Words: channel mask. Channels in the mask are enabled, the others
    /// are disabled.
    Enable,

    /// Words: channel mask.
    Reset,
}

impl MsgType {
    /// All encoder message types.
    pub const ALL: [MsgType; 5] = [
        MsgType::PinsSetup,
        MsgType::Setup,
        MsgType::Counts,
        MsgType::Enable,
        MsgType::Reset,
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

#[derive(Debug, Copy, Clone)]
struct InPin {
    port: Port,
    pin: Pin,
}

/// Channel state.
#[derive(Debug, Copy, Clone)]
struct Decoder {
    pins: [Option<InPin>; ENCODER_PH_CNT],

    /// Last sampled levels, indexed by [`Phase`].
    state: [bool; ENCODER_PH_CNT],

    /// Last AB state.
    ab: u8,

    cfg: Config,
    enabled: bool,
    counts: i32,
}

impl Decoder {
    const OFF: Decoder = Decoder {
        pins: [None; ENCODER_PH_CNT],
        state: [false; ENCODER_PH_CNT],
        ab: 0,
        cfg: Config::DEFAULT,
        enabled: false,
        counts: 0,
    };

    /// Returns the level of phase `ph`. Unconfigured phases are low.
    fn sample<B: Bus>(&self, ph: Phase, gpio: &Gpio<B>) -> bool {
        self.pins[ph as usize]
            .map(|p| gpio.pin_get(p.port, p.pin) == Level::High)
            .unwrap_or(false)
    }

    fn latch_ab(&mut self) {
        let a = self.state[Phase::A as usize] as u8;
        let b = self.state[Phase::B as usize] as u8;
        self.ab = a << 1 | b;
    }

    fn update<B: Bus>(&mut self, gpio: &Gpio<B>) {
        if self.cfg.using_z {
            let z = self.sample(Phase::Z, gpio);
            if z && !self.state[Phase::Z as usize] {
                self.counts = 0;
            }
            self.state[Phase::Z as usize] = z;
        }

        let a = self.sample(Phase::A, gpio);
        let prev_a = self.state[Phase::A as usize];
        let mut delta = 0;

        if self.cfg.using_b {
            let b = self.sample(Phase::B, gpio);
            let ab = (a as u8) << 1 | b as u8;
            if ab != self.ab {
                if AB_NEXT[self.ab as usize] == ab {
                    delta = 1;
                } else if AB_NEXT[ab as usize] == self.ab {
                    delta = -1;
                }
                self.ab = ab;
            }
            self.state[Phase::B as usize] = b;
        } else if a != prev_a {
            let counted = match self.cfg.edge {
                Edge::Rising => a,
                Edge::Falling => !a,
                Edge::Both => true,
            };
            if counted {
                delta = 1;
            }
        }
        self.state[Phase::A as usize] = a;

        if self.cfg.inverted {
            delta = -delta;
        }
        self.counts = self.counts.wrapping_add(delta);
    }
}

/// Encoder counter.
pub struct Encoder {
    decs: [Decoder; ENCODER_CH_CNT],
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder::new()
    }
}

impl Encoder {
    /// Returns an encoder counter with all channels disabled.
    pub const fn new() -> Encoder {
        Encoder {
            decs: [Decoder::OFF; ENCODER_CH_CNT],
        }
    }

    /// Samples the inputs of the enabled channels and updates their counts.
    pub fn base_thread<B: Bus>(&mut self, gpio: &Gpio<B>) {
        for dec in self.decs.iter_mut().filter(|d| d.enabled) {
            dec.update(gpio);
        }
    }

    /// Configures a GPIO pin as the `ph` input of channel `c`.
    pub fn pin_setup<B: Bus>(
        &mut self,
        c: Channel,
        ph: Phase,
        port: Port,
        pin: Pin,
        gpio: &Gpio<B>,
    ) {
        gpio.pin_setup_for_input(port, pin);

        let dec = &mut self.decs[c.0];
        dec.pins[ph as usize] = Some(InPin { port, pin });
        dec.state[ph as usize] = gpio.pin_get(port, pin) == Level::High;
    }

    /// Configures channel `c`. The current AB state becomes the reference
    /// for the next change.
    pub fn setup(&mut self, c: Channel, cfg: Config) {
        let dec = &mut self.decs[c.0];
        dec.cfg = cfg;
        dec.latch_ab();
    }

    /// Enables or disables channel `c`.
    pub fn state_set(&mut self, c: Channel, enabled: bool) {
        self.decs[c.0].enabled = enabled;
    }

    /// Returns true if channel `c` is enabled.
    pub fn state_get(&self, c: Channel) -> bool {
        self.decs[c.0].enabled
    }

    /// Returns the counts of channel `c`.
    pub fn counts_get(&self, c: Channel) -> i32 {
        self.decs[c.0].counts
    }

    /// Resets the counts of channel `c`.
    pub fn counts_reset(&mut self, c: Channel) {
        self.decs[c.0].counts = 0;
    }

    /// Handles an encoder message.
    pub fn msg_recv<B: Bus, S: MsgSend>(
        &mut self,
        msg: &Message,
        gpio: &Gpio<B>,
        tx: &mut S,
    ) -> crate::Result<()> {
        let ty = MsgType::try_from(msg.ty())?;

        match ty {
            MsgType::PinsSetup => {
                let [c, ph, port, pin] = msg.args::<4>()?;
                self.pin_setup(
                    Channel::try_from(c)?,
                    Phase::try_from(ph)?,
                    Port::try_from(port)?,
                    Pin::try_from(pin)?,
                    gpio,
                );
            }
            MsgType::Setup => {
                let [c, inverted, using_b, using_z, edge] = msg.args::<5>()?;
                let cfg = Config {
                    inverted: inverted != 0,
                    using_b: using_b != 0,
                    using_z: using_z != 0,
                    edge: Edge::try_from(edge)?,
                };
                self.setup(Channel::try_from(c)?, cfg);
            }
            MsgType::Counts => {
                let [mask] = msg.args::<1>()?;
                let mut counts = [0u32; ENCODER_CH_CNT];
                for (c, cnt) in counts.iter_mut().enumerate() {
                    if mask & (1 << c) != 0 {
                        *cnt = self.decs[c].counts as u32;
                    }
                }
                tx.send(msg.ty(), &counts)?;
            }
            MsgType::Enable => {
                let [mask] = msg.args::<1>()?;
                for (c, dec) in self.decs.iter_mut().enumerate() {
                    dec.enabled = mask & (1 << c) != 0;
                }
            }
            MsgType::Reset => {
                let [mask] = msg.args::<1>()?;
                for (c, dec) in self.decs.iter_mut().enumerate() {
                    if mask & (1 << c) != 0 {
                        dec.counts = 0;
                    }
                }
            }
        }

        Ok(())
    }
}
