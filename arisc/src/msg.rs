//! ARM-ARISC message channel.
//!
//! Both processors share a 4 KiB block at the top of SRAM A2, right below the
//! ARISC configuration area. The first half holds the messages sent by the
//! ARISC and the second half holds the messages sent by the ARM. Each half is
//! split into [`MSG_MAX_CNT`] slots of [`MSG_MAX_LEN`] bytes:
//!
//! ```text
//! +--------+--------+------+--------+--------------------------+
//! | unread | locked | type | length | payload (MSG_LEN bytes)  |
//! +--------+--------+------+--------+--------------------------+
//!     0        1       2       3      4                       63
//! ```
//!
//! A slot belongs to the reader while `unread` is set and to the writer
//! otherwise. The payload is a sequence of 32-bit words, which are always
//! accessed as whole words so both processors agree on their values.

use core::fmt;
use core::ptr::{read_volatile, write_volatile};

/// Size of SRAM A2.
pub const SRAM_A2_SIZE: usize = 48 * 1024;

/// SRAM A2 address as seen by the ARISC. The ARM sees it at 0x00040000.
pub const SRAM_A2_ADDR: usize = 0x0000_0000;

/// Size of the ARISC configuration area.
pub const ARISC_CONF_SIZE: usize = 2048;

/// Address of the ARISC configuration area, at the top of SRAM A2.
pub const ARISC_CONF_ADDR: usize =
    SRAM_A2_ADDR + SRAM_A2_SIZE - ARISC_CONF_SIZE;

/// Size of the message block.
pub const MSG_BLOCK_SIZE: usize = 4096;

/// Address of the message block.
pub const MSG_BLOCK_ADDR: usize = ARISC_CONF_ADDR - MSG_BLOCK_SIZE;

/// Size of the message area of each processor.
pub const MSG_CPU_BLOCK_SIZE: usize = 2048;

/// Offset of the ARISC message slots inside the message block.
pub(crate) const MSG_ARISC_BLOCK_OFFSET: usize = 0;

/// Offset of the ARM message slots inside the message block.
pub(crate) const MSG_ARM_BLOCK_OFFSET: usize = MSG_CPU_BLOCK_SIZE;

/// Number of message slots per processor.
pub const MSG_MAX_CNT: usize = 32;

/// Size of a message slot.
pub const MSG_MAX_LEN: usize = MSG_CPU_BLOCK_SIZE / MSG_MAX_CNT;

/// Maximum payload length in bytes.
pub const MSG_LEN: usize = MSG_MAX_LEN - 4;

/// Maximum payload length in words.
pub const MSG_WORDS: usize = MSG_LEN / 4;

/// Number of entries of the receive handler table, one per message type.
pub const MSG_RECV_CALLBACK_CNT: usize = 256;

const SLOT_UNREAD: usize = 0;
const SLOT_TYPE: usize = 2;
const SLOT_LENGTH: usize = 3;
const SLOT_DATA: usize = 4;

/// Message channel error.
#[derive(Debug)]
pub enum Error {
    /// All the outgoing slots are waiting to be read.
    QueueFull,

    /// The payload does not fit in a slot. Contains the requested length in
    /// bytes.
    TooLong(usize),

    /// The payload is shorter than what the message type requires.
    TooShort {
        /// Message type.
        ty: u8,

        /// Received length in bytes.
        len: usize,

        /// Required length in bytes.
        need: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::QueueFull => write!(f, "no free message slot"),
            Error::TooLong(len) => {
                write!(f, "message too long: {len} > {MSG_LEN} bytes")
            }
            Error::TooShort { ty, len, need } => {
                write!(f, "message {ty:#x} too short: {len} < {need} bytes")
            }
        }
    }
}

/// A message copied out of a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    ty: u8,
    len: usize,
    words: [u32; MSG_WORDS],
}

impl Message {
    /// Creates a message of type `ty` carrying `words`. Words that do not fit
    /// in a slot are dropped.
    pub fn new(ty: u8, words: &[u32]) -> Message {
        let n = words.len().min(MSG_WORDS);
        let mut buf = [0u32; MSG_WORDS];
        buf[..n].copy_from_slice(&words[..n]);

        Message {
            ty,
            len: n * 4,
            words: buf,
        }
    }

    /// Returns the message type.
    pub fn ty(&self) -> u8 {
        self.ty
    }

    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the message has no payload.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the payload words. A trailing partial word is included.
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len.div_ceil(4)]
    }

    /// Returns the first `N` payload words, or an error if the payload is
    /// shorter than `N` words.
    pub fn args<const N: usize>(&self) -> Result<[u32; N], Error> {
        if N > MSG_WORDS || self.len < N * 4 {
            return Err(Error::TooShort {
                ty: self.ty,
                len: self.len,
                need: N * 4,
            });
        }

        let mut args = [0u32; N];
        args.copy_from_slice(&self.words[..N]);
        Ok(args)
    }
}

/// Something able to send messages to the ARM.
pub trait MsgSend {
    /// Sends a message of type `ty` carrying `words`.
    fn send(&mut self, ty: u8, words: &[u32]) -> Result<(), Error>;
}

/// A message slot in shared memory.
#[derive(Copy, Clone)]
pub(crate) struct Slot(*mut u8);

impl Slot {
    /// Returns the slot `m` of the area at `offset` inside the message block.
    ///
    /// # Safety
    ///
    /// `block` must point to a 4-byte aligned message block of
    /// [`MSG_BLOCK_SIZE`] bytes.
    pub(crate) unsafe fn at(block: *mut u8, offset: usize, m: usize) -> Slot {
        Slot(block.add(offset + m * MSG_MAX_LEN))
    }

    pub(crate) fn unread(&self) -> bool {
        unsafe { read_volatile(self.0.add(SLOT_UNREAD)) != 0 }
    }

    pub(crate) fn set_unread(&self, unread: bool) {
        unsafe { write_volatile(self.0.add(SLOT_UNREAD), unread as u8) }
    }

    /// Copies the message out of the slot.
    pub(crate) fn read(&self) -> Message {
        unsafe {
            let ty = read_volatile(self.0.add(SLOT_TYPE));
            let len = read_volatile(self.0.add(SLOT_LENGTH)) as usize;
            let len = len.min(MSG_LEN);

            let mut words = [0u32; MSG_WORDS];
            let data = self.0.add(SLOT_DATA) as *const u32;
            let n = len.div_ceil(4);
            for (i, word) in words.iter_mut().enumerate().take(n) {
                *word = read_volatile(data.add(i));
            }

            Message { ty, len, words }
        }
    }

    /// Copies a message into the slot and hands it over to the reader.
    pub(crate) fn write(&self, ty: u8, words: &[u32]) {
        unsafe {
            let data = self.0.add(SLOT_DATA) as *mut u32;
            for (i, &word) in words.iter().enumerate() {
                write_volatile(data.add(i), word);
            }
            // Zero the word after the payload, if any.
            if words.len() < MSG_WORDS {
                write_volatile(data.add(words.len()), 0);
            }

            write_volatile(self.0.add(SLOT_TYPE), ty);
            write_volatile(self.0.add(SLOT_LENGTH), (words.len() * 4) as u8);
        }

        self.set_unread(true);
    }
}

/// ARISC side of the message channel.
///
/// Incoming messages are routed by type to a handler value of type `H`,
/// usually an enum naming the module that owns the message type.
pub struct Messenger<H> {
    /// Start of the message block.
    block: *mut u8,

    /// Next ARM slot to look at.
    recv_slot: usize,

    /// Last ARISC slot used to send a message.
    send_slot: usize,

    /// Receive handlers, indexed by message type.
    callbacks: [Option<H>; MSG_RECV_CALLBACK_CNT],
}

impl<H: Copy> Messenger<H> {
    /// Clears the message block at `block` and returns a messenger using it.
    ///
    /// # Safety
    ///
    /// `block` must point to a 4-byte aligned region of [`MSG_BLOCK_SIZE`]
    /// bytes, only shared with the ARM, and valid for as long as the
    /// messenger lives.
    pub unsafe fn new(block: *mut u8) -> Messenger<H> {
        let words = block as *mut u32;
        for i in 0..MSG_BLOCK_SIZE / 4 {
            write_volatile(words.add(i), 0);
        }

        Messenger {
            block,
            recv_slot: 0,
            send_slot: 0,
            callbacks: [None; MSG_RECV_CALLBACK_CNT],
        }
    }

    /// Registers `handler` for the messages of type `ty`, replacing the
    /// previous one.
    pub fn recv_callback_add(&mut self, ty: u8, handler: H) {
        self.callbacks[ty as usize] = Some(handler);
    }

    /// Unregisters the handler of the messages of type `ty`. Messages of
    /// this type will be discarded.
    pub fn recv_callback_remove(&mut self, ty: u8) {
        self.callbacks[ty as usize] = None;
    }

    /// Returns the handler registered for the messages of type `ty`.
    pub fn recv_callback(&self, ty: u8) -> Option<H> {
        self.callbacks[ty as usize]
    }

    /// Looks at the next ARM slot. If it holds an unread message, the
    /// message is consumed and returned together with its handler. Messages
    /// without handler are discarded.
    ///
    /// Only one slot is checked per call, so a full queue is drained in
    /// [`MSG_MAX_CNT`] calls.
    pub fn base_thread(&mut self) -> Option<(H, Message)> {
        let slot = self.slot(MSG_ARM_BLOCK_OFFSET, self.recv_slot);
        self.recv_slot = (self.recv_slot + 1) % MSG_MAX_CNT;

        if !slot.unread() {
            return None;
        }

        let msg = slot.read();
        slot.set_unread(false);

        self.callbacks[msg.ty() as usize].map(|handler| (handler, msg))
    }

    /// Returns the slot `m` of the area at `offset`.
    fn slot(&self, offset: usize, m: usize) -> Slot {
        unsafe { Slot::at(self.block, offset, m) }
    }
}

impl<H: Copy> MsgSend for Messenger<H> {
    /// Copies the message into the first ARISC slot not waiting to be read,
    /// starting from the last slot used.
    fn send(&mut self, ty: u8, words: &[u32]) -> Result<(), Error> {
        if words.len() > MSG_WORDS {
            return Err(Error::TooLong(words.len() * 4));
        }

        let mut m = self.send_slot;
        for _ in 0..MSG_MAX_CNT {
            let slot = self.slot(MSG_ARISC_BLOCK_OFFSET, m);
            if !slot.unread() {
                slot.write(ty, words);
                self.send_slot = m;
                return Ok(());
            }
            m = (m + 1) % MSG_MAX_CNT;
        }

        Err(Error::QueueFull)
    }
}
