//! GPIO control.
//!
//! Pin functions and input levels are accessed immediately. Output changes
//! are deferred: [`Gpio::pin_set`], [`Gpio::port_clear`] and friends only
//! record which pins must change, and [`Gpio::base_thread`] applies all of
//! them at once at the end of a main loop pass. This keeps the step and
//! direction edges of one pass aligned and costs a single read-modify-write
//! per port.
//!
//! For more information, please see the "Port Controller" chapter of the
//! [Allwinner H3 Datasheet].
//!
//! [Allwinner H3 Datasheet]: https://linux-sunxi.org/images/4/4b/Allwinner_H3_Datasheet_V1.2.pdf

use core::fmt;

use crate::ccu::{self, Clock};
use crate::mmio::{self, Bus};
use crate::msg::{Message, MsgSend};

/// Base address of the GPIO registers (ports A to G).
pub const GPIO_BASE: usize = 0x01c2_0800;

/// Base address of the R_PIO registers (port L).
pub const GPIO_R_BASE: usize = 0x01f0_2c00;

/// Size of the register block of a port.
pub const GPIO_BANK_SIZE: usize = 0x24;

/// Offset of the data register inside a port register block.
const GPIO_DATA_OFFSET: usize = 0x10;

/// Number of GPIO ports.
pub const GPIO_PORTS_CNT: usize = 8;

/// Number of pins per GPIO port.
pub const GPIO_PINS_CNT: u32 = 32;

/// Returns the index of the configuration register that holds `pin`.
const fn cfg_index(pin: u32) -> usize {
    ((pin & 0x1f) >> 3) as usize
}

/// Returns the bit offset of `pin` inside its configuration register.
const fn cfg_offset(pin: u32) -> u32 {
    (pin & 0x7) << 2
}

/// Configuration field value of an input pin.
const CFG_INPUT: u32 = 0b000;

/// Configuration field value of an output pin.
const CFG_OUTPUT: u32 = 0b001;

/// GPIO error.
#[derive(Debug)]
pub enum Error {
    /// Invalid GPIO port.
    InvalidPort(u32),

    /// Invalid GPIO pin.
    InvalidPin(u32),

    /// Invalid Alternate Function number.
    InvalidAltFcn(u32),

    /// The message type is not handled by this module.
    UnknownMessage(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidPort(port) => write!(f, "invalid GPIO port: {port}"),
            Error::InvalidPin(pin) => write!(f, "invalid GPIO pin: {pin}"),
            Error::InvalidAltFcn(fcn) => {
                write!(f, "invalid alternate function: {fcn}")
            }
            Error::UnknownMessage(ty) => {
                write!(f, "unknown GPIO message: {ty:#x}")
            }
        }
    }
}

/// GPIO port.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Port {
    PA,
    PB,
    PC,
    PD,
    PE,
    PF,
    PG,
    PL,
}

impl Port {
    /// All ports, in index order.
    pub const ALL: [Port; GPIO_PORTS_CNT] = [
        Port::PA,
        Port::PB,
        Port::PC,
        Port::PD,
        Port::PE,
        Port::PF,
        Port::PG,
        Port::PL,
    ];

    /// Returns the index of the port (PA = 0, ..., PL = 7).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns the base address of the port register block. Port L lives in
    /// the R_PIO block.
    pub fn base(self) -> usize {
        match self {
            Port::PL => GPIO_R_BASE,
            port => GPIO_BASE + port.index() * GPIO_BANK_SIZE,
        }
    }

    /// Returns the address of the data register of the port.
    pub fn data_addr(self) -> usize {
        self.base() + GPIO_DATA_OFFSET
    }

    /// Returns the address of the configuration register holding `pin`.
    fn cfg_addr(self, pin: Pin) -> usize {
        self.base() + cfg_index(pin.0) * 4
    }
}

impl TryFrom<u32> for Port {
    type Error = Error;

    fn try_from(port: u32) -> Result<Port, Error> {
        Port::ALL
            .get(port as usize)
            .copied()
            .ok_or(Error::InvalidPort(port))
    }
}

/// GPIO pin of a port.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Pin(u32);

impl Pin {
    /// Returns the pin number.
    pub fn number(self) -> u32 {
        self.0
    }

    /// Returns the data register mask of the pin.
    pub fn mask(self) -> u32 {
        1 << self.0
    }
}

impl TryFrom<u32> for Pin {
    type Error = Error;

    fn try_from(pin: u32) -> Result<Pin, Error> {
        if pin >= GPIO_PINS_CNT {
            return Err(Error::InvalidPin(pin));
        }
        Ok(Pin(pin))
    }
}

/// Pin function.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Function {
    /// Input pin.
    Input,

    /// Output pin.
    Output,

    /// Alternate function (2 to 6). E.g. UART0 on PA4/PA5 is function 2.
    Alt(u32),

    /// Pin disabled.
    Disabled,
}

impl Function {
    /// Returns the value of the 3-bit configuration field.
    fn bits(self) -> Result<u32, Error> {
        match self {
            Function::Input => Ok(CFG_INPUT),
            Function::Output => Ok(CFG_OUTPUT),
            Function::Alt(n @ 2..=6) => Ok(n),
            Function::Alt(n) => Err(Error::InvalidAltFcn(n)),
            Function::Disabled => Ok(0b111),
        }
    }
}

impl From<u32> for Function {
    fn from(bits: u32) -> Function {
        match bits & 0b111 {
            CFG_INPUT => Function::Input,
            CFG_OUTPUT => Function::Output,
            0b111 => Function::Disabled,
            n => Function::Alt(n),
        }
    }
}

/// Pin level.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Level {
    /// Low level.
    Low,

    /// High level.
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Level {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<Level> for u32 {
    fn from(level: Level) -> u32 {
        match level {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Level::Low => write!(f, "Low"),
            Level::High => write!(f, "High"),
        }
    }
}

/// GPIO message types.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MsgType {
    /// Configure a pin as output. Words: port, pin.
    SetupForOutput = 0x10,

    /// Configure a pin as input. Words: port, pin.
    SetupForInput,

    /// Get a pin state. Words: port, pin. Reply: state.
    PinGet,

    /// Set a pin. Words: port, pin.
    PinSet,

    /// Clear a pin. Words: port, pin.
    PinClear,

    /// Get a port state. Words: port. Reply: state mask.
    PortGet,

    /// Set port pins. Words: port, mask.
    PortSet,

    /// Clear port pins. Words: port, mask.
    PortClear,

    /// Get the state of all ports. Reply: one state mask per port.
    AllGet,
}

impl MsgType {
    /// All GPIO message types.
    pub const ALL: [MsgType; 9] = [
        MsgType::SetupForOutput,
        MsgType::SetupForInput,
        MsgType::PinGet,
        MsgType::PinSet,
        MsgType::PinClear,
        MsgType::PortGet,
        MsgType::PortSet,
        MsgType::PortClear,
        MsgType::AllGet,
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

/// GPIO controller.
pub struct Gpio<B: Bus> {
    /// Register bus.
    bus: B,

    /// Pins to set on the next [`Gpio::base_thread`], per port.
    set_ctrl: [u32; GPIO_PORTS_CNT],

    /// Pins to clear on the next [`Gpio::base_thread`], per port.
    clr_ctrl: [u32; GPIO_PORTS_CNT],
}

impl<B: Bus> Gpio<B> {
    /// Enables the R_PIO clock and returns a GPIO controller with no pending
    /// output changes.
    pub fn new(bus: B) -> Gpio<B> {
        ccu::enable(&bus, Clock::RPio);

        Gpio {
            bus,
            set_ctrl: [0; GPIO_PORTS_CNT],
            clr_ctrl: [0; GPIO_PORTS_CNT],
        }
    }

    /// Returns the underlying register bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Applies the pending output changes. Must be called at the end of every
    /// main loop pass.
    pub fn base_thread(&mut self) {
        for port in Port::ALL.into_iter().rev() {
            let p = port.index();

            if self.set_ctrl[p] != 0 {
                let set = self.set_ctrl[p];
                self.bus.modify(port.data_addr(), 0, set);
                self.set_ctrl[p] = 0;
            }

            if self.clr_ctrl[p] != 0 {
                let clr = self.clr_ctrl[p];
                self.bus.modify(port.data_addr(), clr, 0);
                self.clr_ctrl[p] = 0;
            }
        }
    }

    /// Configures the operation of a GPIO pin.
    pub fn set_function(
        &self,
        port: Port,
        pin: Pin,
        fcn: Function,
    ) -> Result<(), Error> {
        self.set_cfg(port, pin, fcn.bits()?);
        Ok(())
    }

    /// Writes the 3-bit configuration field of a pin.
    fn set_cfg(&self, port: Port, pin: Pin, bits: u32) {
        let addr = port.cfg_addr(pin);
        let reg = self.bus.read(addr);
        let reg = mmio::set_bits_at(reg, 3, cfg_offset(pin.0), bits);
        self.bus.write(addr, reg);
    }

    /// Returns the current function of a GPIO pin.
    pub fn function(&self, port: Port, pin: Pin) -> Function {
        let reg = self.bus.read(port.cfg_addr(pin));
        mmio::get_bits_at(reg, 3, cfg_offset(pin.0)).into()
    }

    /// Configures a pin as output.
    pub fn pin_setup_for_output(&self, port: Port, pin: Pin) {
        self.set_cfg(port, pin, CFG_OUTPUT);
    }

    /// Configures a pin as input.
    pub fn pin_setup_for_input(&self, port: Port, pin: Pin) {
        self.set_cfg(port, pin, CFG_INPUT);
    }

    /// Returns the current level of a pin.
    pub fn pin_get(&self, port: Port, pin: Pin) -> Level {
        (self.port_get(port) & pin.mask() != 0).into()
    }

    /// Sets a pin to high on the next [`Gpio::base_thread`].
    pub fn pin_set(&mut self, port: Port, pin: Pin) {
        self.port_set(port, pin.mask())
    }

    /// Sets a pin to low on the next [`Gpio::base_thread`].
    pub fn pin_clear(&mut self, port: Port, pin: Pin) {
        self.port_clear(port, pin.mask())
    }

    /// Returns the current levels of all the pins of a port, one bit per pin.
    pub fn port_get(&self, port: Port) -> u32 {
        self.bus.read(port.data_addr())
    }

    /// Sets the pins in `mask` to high on the next [`Gpio::base_thread`].
    /// It cancels any pending clear of the same pins.
    pub fn port_set(&mut self, port: Port, mask: u32) {
        let p = port.index();
        self.set_ctrl[p] |= mask;
        self.clr_ctrl[p] &= !mask;
    }

    /// Sets the pins in `mask` to low on the next [`Gpio::base_thread`]. It
    /// cancels any pending set of the same pins.
    pub fn port_clear(&mut self, port: Port, mask: u32) {
        let p = port.index();
        self.set_ctrl[p] &= !mask;
        self.clr_ctrl[p] |= mask;
    }

    /// Handles a GPIO message.
    pub fn msg_recv<S: MsgSend>(
        &mut self,
        msg: &Message,
        tx: &mut S,
    ) -> crate::Result<()> {
        let ty = MsgType::try_from(msg.ty())?;

        match ty {
            MsgType::SetupForOutput => {
                let (port, pin) = port_pin(msg)?;
                self.pin_setup_for_output(port, pin);
            }
            MsgType::SetupForInput => {
                let (port, pin) = port_pin(msg)?;
                self.pin_setup_for_input(port, pin);
            }
            MsgType::PinGet => {
                let (port, pin) = port_pin(msg)?;
                let state: u32 = self.pin_get(port, pin).into();
                tx.send(msg.ty(), &[state])?;
            }
            MsgType::PinSet => {
                let (port, pin) = port_pin(msg)?;
                self.pin_set(port, pin);
            }
            MsgType::PinClear => {
                let (port, pin) = port_pin(msg)?;
                self.pin_clear(port, pin);
            }
            MsgType::PortGet => {
                let [port] = msg.args::<1>()?;
                let port = Port::try_from(port)?;
                tx.send(msg.ty(), &[self.port_get(port)])?;
            }
            MsgType::PortSet => {
                let [port, mask] = msg.args::<2>()?;
                self.port_set(Port::try_from(port)?, mask);
            }
            MsgType::PortClear => {
                let [port, mask] = msg.args::<2>()?;
                self.port_clear(Port::try_from(port)?, mask);
            }
            MsgType::AllGet => {
                let mut states = [0u32; GPIO_PORTS_CNT];
                for (state, port) in states.iter_mut().zip(Port::ALL) {
                    *state = self.port_get(port);
                }
                tx.send(msg.ty(), &states)?;
            }
        }

        Ok(())
    }
}

/// Parses the (port, pin) words of a message.
fn port_pin(msg: &Message) -> crate::Result<(Port, Pin)> {
    let [port, pin] = msg.args::<2>()?;
    Ok((Port::try_from(port)?, Pin::try_from(pin)?))
}
