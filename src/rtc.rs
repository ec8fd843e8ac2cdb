// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Real-time clock manager.
//!
//! Wraps the calendar, the two alarm units and the periodic wake-up timer.
//! Every operation runs under one mutex and waits for it without a time
//! limit; nothing here waits for the hardware to raise an event.
//!
//! Alarm arming state and the wake-up clock range are mirrored into
//! battery-backed registers, so they survive a reset along with the
//! calendar itself.
//!
//! Alarm and wake-up handlers run in interrupt context. Keep them short and
//! hand real work to a task, for instance through a
//! [`Semaphore`][crate::semaphore::Semaphore].

use core::cell::Cell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex as CsMutex;

use crate::error::{Error, HalError, Result};
use crate::mutex::Mutex;

/// NVIC preemption priority of the alarm and wake-up vectors.
pub const RTC_PRIORITY: u8 = 5;
/// NVIC subpriority of the alarm and wake-up vectors.
pub const RTC_SUBPRIORITY: u8 = 1;

/// Backup register recording whether alarm 1 is armed.
pub const ALARM1_ARMED_REG: usize = 0;
/// Backup register recording whether alarm 2 is armed.
pub const ALARM2_ARMED_REG: usize = 1;
/// Backup register recording the wake-up clock range.
pub const WAKEUP_CLOCK_REG: usize = 2;

/// Longest wake-up period, in seconds.
pub const WAKEUP_MAX: u32 = 0x1_FFFF;

/// One of the two alarm units.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmId {
    /// Alarm A.
    Alarm1,
    /// Alarm B.
    Alarm2,
}

impl AlarmId {
    const fn index(self) -> usize {
        self as usize
    }

    /// Backup register holding this alarm's armed flag.
    pub const fn armed_reg(self) -> usize {
        match self {
            Self::Alarm1 => ALARM1_ARMED_REG,
            Self::Alarm2 => ALARM2_ARMED_REG,
        }
    }
}

impl TryFrom<u8> for AlarmId {
    type Error = Error;

    fn try_from(n: u8) -> Result<Self> {
        match n {
            1 => Ok(Self::Alarm1),
            2 => Ok(Self::Alarm2),
            _ => Err(Error::InvalidParameter),
        }
    }
}

/// Day of the week, numbered the way the calendar registers do.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Weekday {
    Monday = 1,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    /// Register encoding, Monday = 1 through Sunday = 7.
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Decodes a register value. 0 is accepted as Sunday.
    pub const fn from_number(n: u8) -> Option<Self> {
        Some(match n {
            1 => Self::Monday,
            2 => Self::Tuesday,
            3 => Self::Wednesday,
            4 => Self::Thursday,
            5 => Self::Friday,
            6 => Self::Saturday,
            0 | 7 => Self::Sunday,
            _ => return None,
        })
    }
}

/// Daylight-saving marker stored alongside the time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dst {
    /// Not known.
    #[default]
    Unknown,
    /// Standard time.
    Off,
    /// Summer time.
    On,
}

/// A calendar date and time of day, 24-hour.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DateTime {
    /// 2000 through 2099.
    pub year: u16,
    /// 1 through 12.
    pub month: u8,
    /// 1 through the length of the month.
    pub day: u8,
    /// Day of the week. Not derived from the date; stored as given.
    pub weekday: Weekday,
    /// 0 through 23.
    pub hour: u8,
    /// 0 through 59.
    pub minute: u8,
    /// 0 through 59.
    pub second: u8,
    /// Daylight-saving marker.
    pub dst: Dst,
}

impl DateTime {
    /// Checks every field against the calendar's range.
    pub fn is_valid(&self) -> bool {
        (2000..=2099).contains(&self.year)
            && (1..=12).contains(&self.month)
            && self.day >= 1
            && self.day <= days_in_month(self.year, self.month)
            && valid_time(self.hour, self.minute, self.second)
    }
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        2 if year % 4 == 0 => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn valid_time(hour: u8, minute: u8, second: u8) -> bool {
    hour < 24 && minute < 60 && second < 60
}

/// Which day an alarm fires on. Alarms never match months or years.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmMatch {
    /// Every week on this day.
    Weekday(Weekday),
    /// Every month on this day of the month, 1 through 31.
    Date(u8),
}

/// An alarm setting.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Alarm {
    /// Day to fire on.
    pub matches: AlarmMatch,
    /// 0 through 23.
    pub hour: u8,
    /// 0 through 59.
    pub minute: u8,
    /// 0 through 59.
    pub second: u8,
}

impl Alarm {
    /// Checks every field against the alarm unit's range.
    pub fn is_valid(&self) -> bool {
        let day_ok = match self.matches {
            AlarmMatch::Weekday(_) => true,
            AlarmMatch::Date(d) => (1..=31).contains(&d),
        };
        day_ok && valid_time(self.hour, self.minute, self.second)
    }
}

/// Clock feeding the RTC.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// 32.768 kHz external crystal.
    Lse,
    /// ~32 kHz internal oscillator.
    Lsi,
}

impl ClockSource {
    /// Asynchronous and synchronous prescalers giving a 1 Hz calendar tick.
    pub const fn prescalers(self) -> (u8, u16) {
        match self {
            Self::Lse => (127, 255),
            Self::Lsi => (127, 249),
        }
    }
}

/// Wake-up counter range. Both count the 1 Hz calendar clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeupClock {
    /// Period is the counter value.
    Spre16,
    /// Period is the counter value plus `0x10000`.
    Spre17,
}

impl WakeupClock {
    /// Value recorded in [`WAKEUP_CLOCK_REG`], matching the selector field
    /// of the wake-up control register.
    pub const fn code(self) -> u32 {
        match self {
            Self::Spre16 => 0b100,
            Self::Spre17 => 0b110,
        }
    }

    /// Splits a period into a counter value and a range, clamping it to
    /// [`WAKEUP_MAX`].
    pub fn encode(period: u32) -> (u16, Self) {
        let period = period.min(WAKEUP_MAX);
        // The 17-bit range keeps only the low 16 bits in the counter.
        match u16::try_from(period) {
            Ok(p) => (p, Self::Spre16),
            Err(_) => ((period & 0xFFFF) as u16, Self::Spre17),
        }
    }

    /// Period programmed by `counter` in this range.
    pub const fn period(self, counter: u16) -> u32 {
        match self {
            Self::Spre16 => counter as u32,
            Self::Spre17 => counter as u32 | 0x1_0000,
        }
    }
}

/// Register-level operations the RTC manager needs. Calls are serialized by
/// the manager.
pub trait RtcHw: Sync {
    /// Whether the external 32.768 kHz crystal is running.
    fn lse_ready(&self) -> bool;

    /// Enables backup-domain access, selects `source`, enables the RTC and
    /// initializes it in 24-hour format with `prescalers` and the output
    /// disabled.
    fn init(&self, source: ClockSource, prescalers: (u8, u16)) -> Result<(), HalError>;

    /// Sets the priority of the alarm and wake-up vectors and unmasks them.
    fn enable_irqs(&self, priority: u8, subpriority: u8);

    /// Reads the calendar.
    fn calendar(&self) -> Result<DateTime, HalError>;

    /// Writes the calendar, date first, with subseconds cleared.
    fn set_calendar(&self, now: &DateTime) -> Result<(), HalError>;

    /// Reads back the compare setting of an alarm unit.
    fn alarm(&self, id: AlarmId) -> Result<Alarm, HalError>;

    /// Programs an alarm unit to match day, hour, minute and second, with
    /// subseconds ignored, and enables its interrupt.
    fn set_alarm(&self, id: AlarmId, alarm: &Alarm) -> Result<(), HalError>;

    /// Disables an alarm unit and its interrupt.
    fn deactivate_alarm(&self, id: AlarmId) -> Result<(), HalError>;

    /// Starts the periodic wake-up timer with its interrupt.
    fn set_wakeup(&self, counter: u16, clock: WakeupClock) -> Result<(), HalError>;

    /// Current wake-up counter reload value.
    fn wakeup_counter(&self) -> u16;

    /// Stops the wake-up timer.
    fn deactivate_wakeup(&self) -> Result<(), HalError>;

    /// Reads a battery-backed register.
    fn backup_read(&self, reg: usize) -> u32;

    /// Writes a battery-backed register.
    fn backup_write(&self, reg: usize, value: u32);
}

/// Callback run in interrupt context when an alarm or the wake-up timer
/// fires.
pub type RtcHandler = &'static (dyn Fn() + Sync);

/// The RTC manager.
///
/// ```ignore
/// static RTC: Rtc<BoardRtc> = Rtc::new(BoardRtc);
/// ```
pub struct Rtc<H> {
    hw: H,
    initialized: AtomicBool,
    lock: Mutex<()>,
    alarms: [CsMutex<Cell<Option<RtcHandler>>>; 2],
    wakeup: CsMutex<Cell<Option<RtcHandler>>>,
}

impl<H: RtcHw> Rtc<H> {
    /// Creates a manager. Nothing touches the hardware until
    /// [`init`][Rtc::init].
    pub const fn new(hw: H) -> Self {
        Self {
            hw,
            initialized: AtomicBool::new(false),
            lock: Mutex::new(()),
            alarms: [CsMutex::new(Cell::new(None)), CsMutex::new(Cell::new(None))],
            wakeup: CsMutex::new(Cell::new(None)),
        }
    }

    /// Hardware backend.
    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// Whether [`init`][Rtc::init] has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn ready(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::InvalidParameter)
        }
    }

    /// Starts the RTC from the external crystal if it runs, else from the
    /// internal oscillator, unmasks its vectors and forgets any handlers.
    ///
    /// The calendar, alarms and wake-up timer keep whatever the backup
    /// domain held.
    ///
    /// # Errors
    ///
    /// - `NotAvailable` if already initialized.
    /// - `Failure` if the hardware refuses.
    pub async fn init(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        if self.is_initialized() {
            return Err(Error::NotAvailable);
        }

        let source = if self.hw.lse_ready() { ClockSource::Lse } else { ClockSource::Lsi };
        self.hw.init(source, source.prescalers()).map_err(|e| {
            error!("rtc: init from {} failed: {}", source, e);
            Error::Failure
        })?;
        self.hw.enable_irqs(RTC_PRIORITY, RTC_SUBPRIORITY);

        critical_section::with(|cs| {
            for slot in &self.alarms {
                slot.borrow(cs).set(None);
            }
            self.wakeup.borrow(cs).set(None);
        });
        self.initialized.store(true, Ordering::Release);
        debug!("rtc: up on {}", source);
        Ok(())
    }

    /// Reads the calendar.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` before [`init`][Rtc::init].
    /// - `Failure` if the hardware refuses.
    pub async fn time_get(&self) -> Result<DateTime> {
        self.ready()?;
        let _guard = self.lock.lock().await;
        self.hw.calendar().map_err(|_| Error::Failure)
    }

    /// Sets the calendar.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` before [`init`][Rtc::init], or if a field is out
    ///   of range.
    /// - `Failure` if the hardware refuses.
    pub async fn time_set(&self, now: &DateTime) -> Result<()> {
        self.ready()?;
        if !now.is_valid() {
            return Err(Error::InvalidParameter);
        }
        let _guard = self.lock.lock().await;
        self.hw.set_calendar(now).map_err(|e| {
            warn!("rtc: calendar write failed: {}", e);
            Error::Failure
        })
    }

    /// Reads an alarm's setting, or `None` if it isn't armed.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` before [`init`][Rtc::init].
    /// - `Failure` if the hardware refuses.
    pub async fn alarm_get(&self, id: AlarmId) -> Result<Option<Alarm>> {
        self.ready()?;
        let _guard = self.lock.lock().await;
        let alarm = self.hw.alarm(id).map_err(|_| Error::Failure)?;
        let armed = self.hw.backup_read(id.armed_reg()) & 1 != 0;
        Ok(armed.then_some(alarm))
    }

    /// Arms an alarm, replacing its previous setting if any.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` before [`init`][Rtc::init], or if a field is out
    ///   of range.
    /// - `Failure` if the hardware refuses.
    pub async fn alarm_set(&self, id: AlarmId, alarm: &Alarm) -> Result<()> {
        self.ready()?;
        if !alarm.is_valid() {
            return Err(Error::InvalidParameter);
        }
        let _guard = self.lock.lock().await;
        self.hw.set_alarm(id, alarm).map_err(|e| {
            warn!("rtc: arming {} failed: {}", id, e);
            Error::Failure
        })?;
        self.hw.backup_write(id.armed_reg(), 1);
        Ok(())
    }

    /// Disarms an alarm. Its handler stays registered, so a later
    /// [`alarm_set`][Rtc::alarm_set] fires it again.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` before [`init`][Rtc::init].
    /// - `Failure` if the hardware refuses.
    pub async fn alarm_delete(&self, id: AlarmId) -> Result<()> {
        self.ready()?;
        let _guard = self.lock.lock().await;
        self.hw.deactivate_alarm(id).map_err(|_| Error::Failure)?;
        self.hw.backup_write(id.armed_reg(), 0);
        Ok(())
    }

    /// Starts the wake-up timer with a period of `period` seconds, clamped
    /// to [`WAKEUP_MAX`].
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` before [`init`][Rtc::init].
    /// - `Failure` if the hardware refuses.
    pub async fn wakeup_set(&self, period: u32) -> Result<()> {
        self.ready()?;
        let _guard = self.lock.lock().await;
        let (counter, clock) = WakeupClock::encode(period);
        self.hw.set_wakeup(counter, clock).map_err(|e| {
            warn!("rtc: wake-up timer failed: {}", e);
            Error::Failure
        })?;
        // Only a programmed counter gets its range recorded.
        self.hw.backup_write(WAKEUP_CLOCK_REG, clock.code());
        Ok(())
    }

    /// Reads back the wake-up period, in seconds.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` before [`init`][Rtc::init].
    pub async fn wakeup_get(&self) -> Result<u32> {
        self.ready()?;
        let _guard = self.lock.lock().await;
        let clock = if self.hw.backup_read(WAKEUP_CLOCK_REG) == WakeupClock::Spre17.code() {
            WakeupClock::Spre17
        } else {
            WakeupClock::Spre16
        };
        Ok(clock.period(self.hw.wakeup_counter()))
    }

    /// Stops the wake-up timer. Its handler stays registered.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` before [`init`][Rtc::init].
    /// - `Failure` if the hardware refuses.
    pub async fn wakeup_delete(&self) -> Result<()> {
        self.ready()?;
        let _guard = self.lock.lock().await;
        self.hw.deactivate_wakeup().map_err(|_| Error::Failure)
    }

    /// Registers the handler run when alarm `id` fires.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` before [`init`][Rtc::init].
    /// - `NotAvailable` if the alarm already has a handler.
    pub async fn alarm_handler_register(&self, id: AlarmId, handler: RtcHandler) -> Result<()> {
        self.ready()?;
        let _guard = self.lock.lock().await;
        critical_section::with(|cs| {
            let slot = self.alarms[id.index()].borrow(cs);
            if slot.get().is_some() {
                return Err(Error::NotAvailable);
            }
            slot.set(Some(handler));
            Ok(())
        })
    }

    /// Removes alarm `id`'s handler.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` before [`init`][Rtc::init].
    pub async fn alarm_handler_unregister(&self, id: AlarmId) -> Result<()> {
        self.ready()?;
        let _guard = self.lock.lock().await;
        critical_section::with(|cs| self.alarms[id.index()].borrow(cs).set(None));
        Ok(())
    }

    /// Registers the handler run when the wake-up timer fires, replacing
    /// any previous one.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` before [`init`][Rtc::init].
    pub async fn wakeup_handler_register(&self, handler: RtcHandler) -> Result<()> {
        self.ready()?;
        let _guard = self.lock.lock().await;
        critical_section::with(|cs| self.wakeup.borrow(cs).set(Some(handler)));
        Ok(())
    }

    /// Removes the wake-up handler.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` before [`init`][Rtc::init].
    pub async fn wakeup_handler_unregister(&self) -> Result<()> {
        self.ready()?;
        let _guard = self.lock.lock().await;
        critical_section::with(|cs| self.wakeup.borrow(cs).set(None));
        Ok(())
    }

    /// Alarm interrupt entry point. Call from the alarm vector for each
    /// alarm unit whose flag was set, after clearing it.
    pub fn on_alarm(&self, id: AlarmId) {
        if !self.is_initialized() {
            return;
        }
        let handler = critical_section::with(|cs| self.alarms[id.index()].borrow(cs).get());
        if let Some(h) = handler {
            h();
        }
    }

    /// Wake-up interrupt entry point. Call from the wake-up vector after
    /// clearing its flag.
    pub fn on_wakeup(&self) {
        if !self.is_initialized() {
            return;
        }
        let handler = critical_section::with(|cs| self.wakeup.borrow(cs).get());
        if let Some(h) = handler {
            h();
        }
    }
}

impl<H: fmt::Debug> fmt::Debug for Rtc<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rtc")
            .field("hw", &self.hw)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}
