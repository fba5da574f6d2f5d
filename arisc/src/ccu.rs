//! Clock Control Unit.
//!
//! Bus clock gates, soft resets and the CPUS (AR100) clock source. For more
//! information, please see the "CCU" and "PRCM" sections of the [Allwinner
//! H3 Datasheet].
//!
//! [Allwinner H3 Datasheet]: https://linux-sunxi.org/images/4/4b/Allwinner_H3_Datasheet_V1.2.pdf

use core::fmt;

use crate::mmio::{self, Bus};

/// Base address of the Clock Control Module.
const CCM_BASE: usize = 0x01c2_0000;

/// Base address of the R_PRCM block.
const R_PRCM_BASE: usize = 0x01f0_1400;

/// PLL_PERIPH0 (PLL6) Control Register.
const PLL6_CTRL_REG: usize = CCM_BASE + 0x028;

/// PLL6 enable.
const PLL6_CTRL_ENABLE: u32 = 1 << 31;

/// PLL6 clock output enable.
const PLL6_CTRL_CLK_OUTEN: u32 = 1 << 24;

/// APB2 Configuration Register.
const APB2_CFG_REG: usize = CCM_BASE + 0x058;

/// APB2 clock source: OSC24M.
const APB2_CLK_SRC_OSC24M: u32 = 0x1 << 24;

/// APB2 pre-divider: 1.
const APB2_CLK_RATE_N_1: u32 = 0x0 << 16;

/// APB2 divider field for a ratio of `m`.
const fn apb2_clk_rate_m(m: u32) -> u32 {
    m - 1
}

/// Bus Clock Gating Register 1.
const BUS_CLK_GATING_REG1: usize = CCM_BASE + 0x064;

/// Bus Clock Gating Register 3.
const BUS_CLK_GATING_REG3: usize = CCM_BASE + 0x06c;

/// Bus Software Reset Register 1.
const BUS_SOFT_RST_REG1: usize = CCM_BASE + 0x2c4;

/// Bus Software Reset Register 4.
const BUS_SOFT_RST_REG4: usize = CCM_BASE + 0x2d8;

/// AR100 Clock Configuration Register.
///
/// ```text
/// [17:16] Clock source (00: LOSC, 01: HOSC, 10/11: PLL6/PDIV)
/// [12:8]  Post divide
/// [5:4]   Clock divide ratio (00: 1, 01: 2, 10: 4, 11: 8)
/// ```
const AR100_CLKCFG_REG: usize = R_PRCM_BASE;

const AR100_CLKCFG_SRC_LOSC: u32 = 0;
const AR100_CLKCFG_SRC_PLL6: u32 = 2;

/// R_PRCM APB0 clock gating register.
const R_PRCM_CLK_GATING_REG: usize = R_PRCM_BASE + 0x28;

/// VDD_RTC regulator register. Field [2:0]: 0b100 is 1.1 V, 0b101 is 1.2 V
/// and 0b110 is 1.3 V.
const VDD_RTC_REG: usize = 0x01f0_0190;

const VDD_RTC_1V2: u32 = 0b101;

/// Low speed oscillator frequency.
pub const LOSC_FREQ: u32 = 32_768;

/// Highest CPUS rate that is stable with VDD_RTC at 1.1 V.
const CPUS_LOW_VOLTAGE_MAX: u32 = 432_000_000;

/// PLL6 step with M = 1: 24 MHz / (M + 1) / 2.
const PLL6_STEP: u32 = 6_000_000;

/// CCU error.
#[derive(Debug)]
pub enum Error {
    /// The CPUS clock cannot run at the requested rate.
    UnsupportedRate(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnsupportedRate(rate) => {
                write!(f, "unsupported CPUS rate: {rate} Hz")
            }
        }
    }
}

/// Gated clocks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Clock {
    Uart0,

    /// R_PIO, the GPIO block holding port L.
    RPio,

    Msgbox,
}

impl Clock {
    /// Returns the (register, bit) of the soft reset of the clock, if any.
    fn reset(self) -> Option<(usize, u32)> {
        match self {
            Clock::Uart0 => Some((BUS_SOFT_RST_REG4, 1 << 16)),
            Clock::RPio => None,
            Clock::Msgbox => Some((BUS_SOFT_RST_REG1, 1 << 21)),
        }
    }

    /// Returns the (register, bit) of the gate of the clock.
    fn gate(self) -> (usize, u32) {
        match self {
            Clock::Uart0 => (BUS_CLK_GATING_REG3, 1 << 16),
            Clock::RPio => (R_PRCM_CLK_GATING_REG, 1 << 0),
            Clock::Msgbox => (BUS_CLK_GATING_REG1, 1 << 21),
        }
    }
}

/// Releases the reset of `clk` and opens its gate.
pub fn enable<B: Bus + ?Sized>(bus: &B, clk: Clock) {
    if let Some((reg, bit)) = clk.reset() {
        bus.modify(reg, 0, bit);
    }
    let (reg, bit) = clk.gate();
    bus.modify(reg, 0, bit);
}

/// Asserts the reset of `clk` and closes its gate.
pub fn disable<B: Bus + ?Sized>(bus: &B, clk: Clock) {
    if let Some((reg, bit)) = clk.reset() {
        bus.modify(reg, bit, 0);
    }
    let (reg, bit) = clk.gate();
    bus.modify(reg, bit, 0);
}

/// PLL6 factors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Pll6 {
    n: u32,
    k: u32,
}

impl Pll6 {
    /// Returns the factors giving `rate` with M = 1 and P = 0, if any.
    fn for_rate(rate: u32) -> Option<Pll6> {
        [1, 2].into_iter().find_map(|k| {
            let step = PLL6_STEP * (k + 1);
            if rate % step != 0 {
                return None;
            }
            match rate / step {
                n @ 1..=32 => Some(Pll6 { n: n - 1, k }),
                _ => None,
            }
        })
    }
}

/// Sets the CPUS clock rate. [`LOSC_FREQ`] selects the low speed oscillator.
/// Rates above 24 MHz are taken from PLL6, which can produce multiples of
/// 12 MHz up to 384 MHz and multiples of 18 MHz up to 576 MHz.
pub fn set_cpus_rate<B: Bus + ?Sized>(
    bus: &B,
    rate: u32,
) -> Result<(), Error> {
    if rate == LOSC_FREQ {
        let reg = bus.read(AR100_CLKCFG_REG);
        let reg = mmio::set_bits_at(reg, 2, 16, AR100_CLKCFG_SRC_LOSC);
        bus.write(AR100_CLKCFG_REG, reg);
        return Ok(());
    }

    if rate <= 24_000_000 {
        return Err(Error::UnsupportedRate(rate));
    }
    let pll = Pll6::for_rate(rate).ok_or(Error::UnsupportedRate(rate))?;

    if rate > CPUS_LOW_VOLTAGE_MAX {
        let reg = bus.read(VDD_RTC_REG);
        bus.write(VDD_RTC_REG, mmio::set_bits_at(reg, 3, 0, VDD_RTC_1V2));
    }

    let mut reg = bus.read(PLL6_CTRL_REG);
    reg = mmio::set_bits_at(reg, 2, 0, 1); // M
    reg = mmio::set_bits_at(reg, 2, 4, pll.k);
    reg = mmio::set_bits_at(reg, 5, 8, pll.n);
    reg = mmio::set_bits_at(reg, 2, 16, 0); // P
    bus.write(PLL6_CTRL_REG, reg | PLL6_CTRL_ENABLE | PLL6_CTRL_CLK_OUTEN);

    let mut reg = bus.read(AR100_CLKCFG_REG);
    reg = mmio::set_bits_at(reg, 2, 16, AR100_CLKCFG_SRC_PLL6);
    reg = mmio::set_bits_at(reg, 5, 8, 1);
    reg = mmio::set_bits_at(reg, 2, 4, 0);
    bus.write(AR100_CLKCFG_REG, reg);

    Ok(())
}

/// Clocks APB2, and so UART0, from the 24 MHz oscillator.
pub fn set_uart0_source_osc24m<B: Bus + ?Sized>(bus: &B) {
    bus.write(
        APB2_CFG_REG,
        APB2_CLK_SRC_OSC24M | APB2_CLK_RATE_N_1 | apb2_clk_rate_m(1),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RamBus;

    #[test]
    fn gates() {
        let bus = RamBus::new();
        bus.write(BUS_CLK_GATING_REG3, 0x1);

        enable(&bus, Clock::Uart0);
        assert_eq!(bus.read(0x01c2_02d8), 1 << 16);
        assert_eq!(bus.read(0x01c2_006c), 1 << 16 | 0x1);

        enable(&bus, Clock::Msgbox);
        assert_eq!(bus.read(0x01c2_02c4), 1 << 21);
        assert_eq!(bus.read(0x01c2_0064), 1 << 21);

        enable(&bus, Clock::RPio);
        assert_eq!(bus.read(0x01f0_1428), 1);

        disable(&bus, Clock::Uart0);
        assert_eq!(bus.read(0x01c2_02d8), 0);
        assert_eq!(bus.read(0x01c2_006c), 0x1);
    }

    #[test]
    fn pll6_factors() {
        assert_eq!(Pll6::for_rate(300_000_000), Some(Pll6 { n: 24, k: 1 }));
        assert_eq!(Pll6::for_rate(384_000_000), Some(Pll6 { n: 31, k: 1 }));
        assert_eq!(Pll6::for_rate(396_000_000), Some(Pll6 { n: 21, k: 2 }));
        assert_eq!(Pll6::for_rate(576_000_000), Some(Pll6 { n: 31, k: 2 }));
        assert_eq!(Pll6::for_rate(301_000_000), None);
        assert_eq!(Pll6::for_rate(594_000_000), None);
    }

    #[test]
    fn cpus_rate_pll6() {
        let bus = RamBus::new();
        bus.write(AR100_CLKCFG_REG, 0x1_0030);

        set_cpus_rate(&bus, 300_000_000).unwrap();

        assert_eq!(
            bus.read(PLL6_CTRL_REG),
            1 << 31 | 1 << 24 | 24 << 8 | 1 << 4 | 1
        );
        assert_eq!(bus.read(AR100_CLKCFG_REG), 0x2_0100);
        assert_eq!(bus.read(VDD_RTC_REG), 0);
    }

    #[test]
    fn cpus_rate_raises_voltage() {
        let bus = RamBus::new();
        bus.write(VDD_RTC_REG, 0b1100);

        set_cpus_rate(&bus, 432_000_000).unwrap();
        assert_eq!(bus.read(VDD_RTC_REG), 0b1100);

        set_cpus_rate(&bus, 450_000_000).unwrap();
        assert_eq!(bus.read(VDD_RTC_REG), 0b1101);
    }

    #[test]
    fn cpus_rate_losc_and_errors() {
        let bus = RamBus::new();
        bus.write(AR100_CLKCFG_REG, 0x2_0100);

        set_cpus_rate(&bus, LOSC_FREQ).unwrap();
        assert_eq!(bus.read(AR100_CLKCFG_REG), 0x0_0100);

        assert!(matches!(
            set_cpus_rate(&bus, 12_000_000),
            Err(Error::UnsupportedRate(12_000_000))
        ));
        assert!(matches!(
            set_cpus_rate(&bus, 1_000_000_000),
            Err(Error::UnsupportedRate(_))
        ));
    }

    #[test]
    fn uart0_source() {
        let bus = RamBus::new();
        set_uart0_source_osc24m(&bus);
        assert_eq!(bus.read(APB2_CFG_REG), 1 << 24);
    }
}
