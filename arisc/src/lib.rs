//! arisc implements the CNC firmware of the Allwinner H3 ARISC co-processor.
//!
//! The ARISC (also known as AR100) is an OpenRISC 1000 core sitting next to
//! the four ARM cores of the H3. This crate drives the real-time side of a
//! LinuxCNC setup: the ARM cores push requests into a shared SRAM block and
//! the ARISC generates step/dir pulses, counts encoder edges and updates GPIO
//! pins in a tight, interrupt-free main loop.
//!
//! The firmware is a cooperative super-loop. Every module exposes a
//! `base_thread` step that must be called once per loop pass. See
//! [`firmware::Firmware`] for the order in which they run.
//!
//! Hardware is reached through the [`mmio::Bus`] trait, so every module can
//! be exercised on the host against the doubles in the `sim` module (enabled
//! by the `sim` feature and in tests).
//!
//! The ARISC executes from SRAM A2, where the reset vector lives at `0x100`.
//! The firmware image must be linked accordingly, and the stack top must be
//! exported as `__stack_top`. The following example shows how to do this
//! using a Cargo configuration file.
//!
//! ```text
//! [target.or1k-none]
//! rustflags = [
//!     "-Clink-arg=--section-start=.entry=0x100",
//!     "-Clink-arg=--defsym=__stack_top=0x8000",
//! ]
//! ```

#![cfg_attr(not(any(test, feature = "sim")), no_std)]
#![cfg_attr(target_arch = "or1k", feature(asm_experimental_arch))]

use core::fmt;

pub mod cache;
pub mod ccu;
pub mod encoder;
pub mod firmware;
pub mod gpio;
pub mod mmio;
pub mod msg;
pub mod msgbox;
pub mod print;
#[cfg(target_arch = "or1k")]
pub mod spr;
pub mod stepgen;
pub mod timer;
pub mod uart;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

/// Arisc error.
#[derive(Debug)]
pub enum Error {
    /// GPIO error.
    Gpio(gpio::Error),

    /// Message channel error.
    Msg(msg::Error),

    /// Steps generator error.
    Stepgen(stepgen::Error),

    /// Encoder counter error.
    Encoder(encoder::Error),

    /// Clock control error.
    Ccu(ccu::Error),

    /// Message box error.
    Msgbox(msgbox::Error),
}

impl From<gpio::Error> for Error {
    fn from(err: gpio::Error) -> Error {
        Error::Gpio(err)
    }
}

impl From<msg::Error> for Error {
    fn from(err: msg::Error) -> Error {
        Error::Msg(err)
    }
}

impl From<stepgen::Error> for Error {
    fn from(err: stepgen::Error) -> Error {
        Error::Stepgen(err)
    }
}

impl From<encoder::Error> for Error {
    fn from(err: encoder::Error) -> Error {
        Error::Encoder(err)
    }
}

impl From<ccu::Error> for Error {
    fn from(err: ccu::Error) -> Error {
        Error::Ccu(err)
    }
}

impl From<msgbox::Error> for Error {
    fn from(err: msgbox::Error) -> Error {
        Error::Msgbox(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Gpio(err) => write!(f, "gpio: {err}"),
            Error::Msg(err) => write!(f, "msg: {err}"),
            Error::Stepgen(err) => write!(f, "stepgen: {err}"),
            Error::Encoder(err) => write!(f, "encoder: {err}"),
            Error::Ccu(err) => write!(f, "ccu: {err}"),
            Error::Msgbox(err) => write!(f, "msgbox: {err}"),
        }
    }
}

/// Arisc result.
pub type Result<T> = core::result::Result<T, Error>;
