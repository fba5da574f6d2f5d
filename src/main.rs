//! ARISC CNC firmware image.
//!
//! Built for the ARISC (`target_arch = "or1k"`) this is the firmware proper.
//! Built for any other target it runs the same main loop against the
//! simulated board in `arisc::sim`, driving it the way the ARM side would.

#![cfg_attr(
    target_arch = "or1k",
    feature(naked_functions, asm_experimental_arch),
    no_std,
    no_main
)]

#[cfg(target_arch = "or1k")]
mod board {
    use core::arch::asm;

    use arisc::cache;
    use arisc::firmware::{self, Exception, Firmware};
    use arisc::mmio::Mmio;
    use arisc::msg::{Messenger, MSG_BLOCK_ADDR};
    use arisc::println;
    use arisc::timer::{TickTimer, Timer};
    use arisc_macros::{entrypoint, exception_vectors};

    exception_vectors!(handle_exception);

    fn handle_exception(vector: u32, epcr: u32, sp: u32) {
        match Exception::from(vector) {
            exc @ (Exception::Timer | Exception::Interrupt) => {
                println!("{exc}")
            }
            exc => {
                println!("{exc} at pc={epcr:#x} sp={sp:#x}\nrestarting...\n");
                reset();
            }
        }
    }

    /// Jumps back to the entrypoint.
    fn reset() -> ! {
        unsafe { asm!("l.j _start", "l.nop", options(noreturn)) }
    }

    #[entrypoint]
    fn main() -> ! {
        cache::icache_enable();

        let (gpio, msgbox) = match firmware::board_init(Mmio) {
            Ok(board) => board,
            Err(err) => panic!("board init: {err}"),
        };

        let timer = Timer::new(TickTimer);
        timer.start();

        let msg = unsafe { Messenger::new(MSG_BLOCK_ADDR as *mut u8) };
        let mut fw = Firmware::new(msg, gpio, timer);

        loop {
            fw.base_thread();
            firmware::msgbox_thread(&msgbox);
        }
    }
}

#[cfg(not(target_arch = "or1k"))]
fn main() {
    use arisc::firmware::{self, Firmware};
    use arisc::gpio::{self, Pin, Port};
    use arisc::println;
    use arisc::sim::{self, MsgArea, Peer, RamBus, SimCounter};
    use arisc::stepgen::{self, Channel};
    use arisc::timer::Timer;

    /// Ticks per simulated main loop pass.
    const PASS_TICKS: u32 = 150;

    /// Steps of the simulated move.
    const STEPS: u32 = 10;

    let bus = RamBus::new();
    let cnt = SimCounter::new();
    let area = MsgArea::leak();
    let peer = Peer::new(area);

    let (gpio, msgbox) = match firmware::board_init(&bus) {
        Ok(board) => board,
        Err(err) => {
            println!("board init: {err}");
            return;
        }
    };

    let timer = Timer::new(&cnt);
    timer.start();
    let mut fw = Firmware::new(sim::messenger(area), gpio, timer);

    // Channel 0: STEP on PA3, DIR on PA4. Reverse, then STEPS steps.
    let requests: [(stepgen::MsgType, &[u32]); 4] = [
        (stepgen::MsgType::PinSetup, &[0, 0, 0, 3, 0]),
        (stepgen::MsgType::PinSetup, &[0, 1, 0, 4, 0]),
        (stepgen::MsgType::TaskAdd, &[0, 1, 0, 1000, 1000]),
        (stepgen::MsgType::TaskAdd, &[0, 0, STEPS, 2000, 2000]),
    ];
    for (ty, words) in requests {
        if !peer.send(ty as u8, words) {
            println!("message queue full");
            return;
        }
    }

    let step = Pin::try_from(3).ok();
    let ch0 = Channel::try_from(0).ok();
    let mut edges = 0;
    let mut last = gpio::Level::Low;

    for pass in 0.. {
        cnt.advance(PASS_TICKS);
        fw.base_thread();
        firmware::msgbox_thread(&msgbox);

        if let Some(pin) = step {
            let level = fw.gpio().pin_get(Port::PA, pin);
            if level != last {
                edges += 1;
                last = level;
            }
        }

        let idle = ch0
            .map(|c| fw.stepgen().tasks_left(c) == 0)
            .unwrap_or(true);
        if pass > requests.len() && idle {
            break;
        }
    }

    println!("{edges} STEP edges in {} ticks", fw.timer().cnt_get());

    peer.send(stepgen::MsgType::PosGet as u8, &[0]);
    loop {
        fw.base_thread();
        if let Some(reply) = peer.recv() {
            if let Some(&pos) = reply.words().first() {
                println!("channel 0 position: {}", pos as i32);
            }
            break;
        }
    }
}
