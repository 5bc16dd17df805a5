//! CMOS real-time clock reader
//!
//! Reads the MC146818-compatible RTC through ports 0x70/0x71. The fields
//! come back BCD-encoded; `time_init` converts them and feeds
//! `kernel_mktime` to seed the wall clock.

/// A broken-down RTC snapshot, fields as the CMOS delivers them (year is
/// two-digit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tm {
    pub sec: u8,
    pub min: u8,
    pub hour: u8,
    pub mday: u8,
    /// 0-based month
    pub mon: u8,
    /// Years since 1900 once normalized by the caller
    pub year: u16,
}

/// Convert one BCD byte to binary.
pub const fn bcd_to_bin(val: u8) -> u8 {
    (val & 0x0F) + (val >> 4) * 10
}

#[cfg(target_os = "none")]
pub fn read_rtc() -> Tm {
    use x86_64::instructions::port::Port;

    let mut index: Port<u8> = Port::new(0x70);
    let mut data: Port<u8> = Port::new(0x71);

    let mut read = |reg: u8| -> u8 {
        // SAFETY: standard CMOS index/data access with NMI kept disabled.
        unsafe {
            index.write(0x80 | reg);
            data.read()
        }
    };

    // Re-read until the seconds register holds still across a pass, so the
    // snapshot is not torn by an update cycle.
    loop {
        let sec = read(0x00);
        let min = read(0x02);
        let hour = read(0x04);
        let mday = read(0x07);
        let mon = read(0x08);
        let year = read(0x09);
        if sec == read(0x00) {
            let mut year = bcd_to_bin(year) as u16;
            // Two-digit year: 00..69 means 20xx.
            if year < 70 {
                year += 100;
            }
            return Tm {
                sec: bcd_to_bin(sec),
                min: bcd_to_bin(min),
                hour: bcd_to_bin(hour),
                mday: bcd_to_bin(mday),
                mon: bcd_to_bin(mon) - 1,
                year,
            };
        }
    }
}

/// Host build: a fixed epoch so boot-time code stays deterministic.
#[cfg(not(target_os = "none"))]
pub fn read_rtc() -> Tm {
    Tm {
        sec: 0,
        min: 0,
        hour: 0,
        mday: 1,
        mon: 0,
        year: 70,
    }
}
