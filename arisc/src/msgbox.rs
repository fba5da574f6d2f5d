//! Hardware message box.
//!
//! The message box has 8 word queues shared between two users. User 0 is the
//! ARISC and user 1 is the ARM. Queue 0 carries words from the ARISC to the
//! ARM and queue 1 the other way around.

use core::fmt;

use crate::ccu::{self, Clock};
use crate::mmio::Bus;

/// Base address of the message box.
const MSGBOX_BASE: usize = 0x01c1_7000;

/// Control register of queues 0 to 3.
const CTRL_REG0: usize = MSGBOX_BASE;

/// Makes user 0 the receiver of queue `n`.
const fn ctrl_user0_receiver(n: usize) -> u32 {
    (1 << 4) << (n * 8)
}

/// Makes user 0 the sender of queue `n`.
const fn ctrl_user0_sender(n: usize) -> u32 {
    1 << (n * 8)
}

/// FIFO status register of queue `n`.
const fn fifo_status_reg(n: usize) -> usize {
    MSGBOX_BASE + 0x100 + n * 4
}

/// The queue FIFO is full.
const FIFO_STATUS_FULL: u32 = 1 << 0;

/// Message status register of queue `n`.
const fn msg_status_reg(n: usize) -> usize {
    MSGBOX_BASE + 0x140 + n * 4
}

/// Number of messages in the queue.
const MSG_STATUS_CNT_MASK: u32 = 0x7;

/// Message register of queue `n`.
const fn msg_reg(n: usize) -> usize {
    MSGBOX_BASE + 0x180 + n * 4
}

/// Number of queues.
pub const MSGBOX_QUEUES_CNT: usize = 8;

/// Queue from the ARISC to the ARM.
pub const MSGBOX_QUEUE_TX: usize = 0;

/// Queue from the ARM to the ARISC.
pub const MSGBOX_QUEUE_RX: usize = 1;

/// Message box error.
#[derive(Debug)]
pub enum Error {
    /// Invalid queue.
    InvalidQueue(usize),

    /// The queue is full.
    Full(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidQueue(n) => write!(f, "invalid queue: {n}"),
            Error::Full(n) => write!(f, "queue {n} is full"),
        }
    }
}

fn check_queue(n: usize) -> Result<(), Error> {
    if n >= MSGBOX_QUEUES_CNT {
        return Err(Error::InvalidQueue(n));
    }
    Ok(())
}

/// Message box driver.
pub struct Msgbox<B: Bus> {
    bus: B,
}

impl<B: Bus> Msgbox<B> {
    /// Enables the message box clock and sets up the TX and RX queues.
    pub fn new(bus: B) -> Msgbox<B> {
        ccu::enable(&bus, Clock::Msgbox);
        let ctrl = ctrl_user0_sender(MSGBOX_QUEUE_TX)
            | ctrl_user0_receiver(MSGBOX_QUEUE_RX);
        bus.write(CTRL_REG0, ctrl);

        Msgbox { bus }
    }

    /// Takes a word from queue `n`, if any.
    pub fn read(&self, n: usize) -> Result<Option<u32>, Error> {
        check_queue(n)?;

        if self.bus.read(msg_status_reg(n)) & MSG_STATUS_CNT_MASK == 0 {
            return Ok(None);
        }
        Ok(Some(self.bus.read(msg_reg(n))))
    }

    /// Puts a word into queue `n`.
    pub fn write(&self, n: usize, val: u32) -> Result<(), Error> {
        check_queue(n)?;

        if self.bus.read(fifo_status_reg(n)) & FIFO_STATUS_FULL != 0 {
            return Err(Error::Full(n));
        }
        self.bus.write(msg_reg(n), val);
        Ok(())
    }
}
