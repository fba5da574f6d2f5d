//! Host-side doubles of the ARISC hardware.
//!
//! These let the drivers and the firmware loop run on a development machine.
//! They are available in tests and with the `sim` feature.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::collections::HashMap;

use crate::mmio::Bus;
use crate::msg::{
    self, Message, MsgSend, Messenger, Slot, MSG_ARISC_BLOCK_OFFSET,
    MSG_ARM_BLOCK_OFFSET, MSG_BLOCK_SIZE, MSG_MAX_CNT, MSG_WORDS,
};
use crate::timer::Counter;

/// A sparse register file. Registers never written read as zero.
#[derive(Debug, Default)]
pub struct RamBus {
    regs: RefCell<HashMap<usize, u32>>,
}

impl RamBus {
    /// Returns an empty register file.
    pub fn new() -> RamBus {
        RamBus::default()
    }
}

impl Bus for RamBus {
    fn read(&self, addr: usize) -> u32 {
        self.regs.borrow().get(&addr).copied().unwrap_or(0)
    }

    fn write(&self, addr: usize, val: u32) {
        self.regs.borrow_mut().insert(addr, val);
    }
}

/// A tick counter that only moves when told to.
#[derive(Debug, Default)]
pub struct SimCounter {
    count: Cell<u32>,
    running: Cell<bool>,
}

impl SimCounter {
    /// Returns a stopped counter at zero.
    pub fn new() -> SimCounter {
        SimCounter::default()
    }

    /// Advances the counter by `ticks`, wrapping at 32 bits, if it is
    /// running.
    pub fn advance(&self, ticks: u32) {
        if self.running.get() {
            self.count.set(self.count.get().wrapping_add(ticks));
        }
    }

    /// Returns true if the counter is running.
    pub fn running(&self) -> bool {
        self.running.get()
    }
}

impl Counter for SimCounter {
    fn start(&self) {
        self.running.set(true);
    }

    fn stop(&self) {
        self.running.set(false);
    }

    fn set_count(&self, cnt: u32) {
        self.count.set(cnt);
    }

    fn count(&self) -> u32 {
        self.count.get()
    }
}

/// A message block in host memory, standing in for the SRAM A2 one.
#[repr(C, align(64))]
pub struct MsgArea(UnsafeCell<[u8; MSG_BLOCK_SIZE]>);

impl MsgArea {
    /// Allocates a zeroed message block that lives until the process exits.
    pub fn leak() -> &'static MsgArea {
        Box::leak(Box::new(MsgArea(UnsafeCell::new([0; MSG_BLOCK_SIZE]))))
    }

    /// Returns a pointer to the start of the block.
    pub fn as_ptr(&self) -> *mut u8 {
        self.0.get() as *mut u8
    }
}

/// Returns a messenger using `area`.
pub fn messenger<H: Copy>(area: &'static MsgArea) -> Messenger<H> {
    unsafe { Messenger::new(area.as_ptr()) }
}

/// The ARM side of the message channel.
pub struct Peer {
    block: *mut u8,
    send_slot: Cell<usize>,
    recv_slot: Cell<usize>,
}

impl Peer {
    /// Returns the ARM side of the channel using `area`.
    pub fn new(area: &'static MsgArea) -> Peer {
        Peer {
            block: area.as_ptr(),
            send_slot: Cell::new(0),
            recv_slot: Cell::new(0),
        }
    }

    /// Puts a message into the first free ARM slot. Returns false if all of
    /// them are waiting to be read.
    pub fn send(&self, ty: u8, words: &[u32]) -> bool {
        let words = &words[..words.len().min(MSG_WORDS)];

        let mut m = self.send_slot.get();
        for _ in 0..MSG_MAX_CNT {
            let slot = self.slot(MSG_ARM_BLOCK_OFFSET, m);
            if !slot.unread() {
                slot.write(ty, words);
                self.send_slot.set(m);
                return true;
            }
            m = (m + 1) % MSG_MAX_CNT;
        }
        false
    }

    /// Takes the next unread message sent by the ARISC, in slot order.
    pub fn recv(&self) -> Option<Message> {
        let mut m = self.recv_slot.get();
        for _ in 0..MSG_MAX_CNT {
            let slot = self.slot(MSG_ARISC_BLOCK_OFFSET, m);
            m = (m + 1) % MSG_MAX_CNT;
            if slot.unread() {
                let msg = slot.read();
                slot.set_unread(false);
                self.recv_slot.set(m);
                return Some(msg);
            }
        }
        None
    }

    /// Returns the number of ARISC messages waiting to be read.
    pub fn pending(&self) -> usize {
        (0..MSG_MAX_CNT)
            .filter(|&m| self.slot(MSG_ARISC_BLOCK_OFFSET, m).unread())
            .count()
    }

    fn slot(&self, offset: usize, m: usize) -> Slot {
        unsafe { Slot::at(self.block, offset, m) }
    }
}

/// A message sink recording everything sent through it.
#[derive(Debug, Default)]
pub struct Outbox {
    /// Sent messages, as (type, words).
    pub sent: Vec<(u8, Vec<u32>)>,
}

impl Outbox {
    /// Returns an empty outbox.
    pub fn new() -> Outbox {
        Outbox::default()
    }
}

impl MsgSend for Outbox {
    fn send(&mut self, ty: u8, words: &[u32]) -> Result<(), msg::Error> {
        if words.len() > MSG_WORDS {
            return Err(msg::Error::TooLong(words.len() * 4));
        }
        self.sent.push((ty, words.to_vec()));
        Ok(())
    }
}
