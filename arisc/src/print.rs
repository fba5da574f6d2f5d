//! UART writer and print macros.
//!
//! On the host (tests and the `sim` feature) the macros write to the
//! standard output instead.

use core::fmt;

use crate::mmio::Mmio;
use crate::uart;

/// Implements a writer on top of UART0.
pub struct UartWriter;

impl fmt::Write for UartWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                uart::send_byte(&Mmio, b'\r');
            }
            uart::send_byte(&Mmio, b);
        }

        Ok(())
    }
}

#[doc(hidden)]
#[cfg(not(any(test, feature = "sim")))]
pub fn _print(args: fmt::Arguments) {
    let _ = fmt::Write::write_fmt(&mut UartWriter, args);
}

#[doc(hidden)]
#[cfg(any(test, feature = "sim"))]
pub fn _print(args: fmt::Arguments) {
    std::print!("{args}");
}

/// Print to the UART.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::print::_print(core::format_args!($($arg)*))
    };
}

/// Print to the UART, with a newline.
#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };

    ($($arg:tt)*) => {
        $crate::print::_print(
            core::format_args!("{}\n", core::format_args!($($arg)*))
        )
    };
}
