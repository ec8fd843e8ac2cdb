// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! GPIO resource manager.
//!
//! Pins are described by [`GpioPin`] values, usually `const`s in a board
//! module. A pin becomes *claimed* the first time it is configured through
//! [`Gpio`] and stays claimed until [`Gpio::release`]. The manager keeps:
//!
//! - a claim table per port, so a physical pin can't be driven by two
//!   different logical pins at once;
//! - a reference count per port, so the port clock is on exactly while at
//!   least one of its pins is claimed;
//! - one handler per EXTI line, so edge interrupts can be dispatched.
//!
//! Claims and releases on a port are serialized by that port's mutex.
//! [`Gpio::get`], [`Gpio::set`] and [`Gpio::toggle`] don't lock: whoever
//! claimed the pin is assumed to own it.
//!
//! # Double claims
//!
//! Configuring a pin that another logical pin has claimed is a wiring error
//! in the firmware, not a runtime condition, and the configuration calls
//! panic. Use [`Gpio::is_available`] if you need to check beforehand.

use core::cell::Cell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex as CsMutex;

use crate::atomic::AtomicExt;
use crate::cheap_assert;
use crate::error::{Error, Result};
use crate::mutex::{Mutex, MutexGuard};

/// Number of GPIO ports on the largest STM32F4 packages (A through I).
pub const PORT_COUNT: usize = 9;
/// Pins per port, which is also the number of EXTI lines.
pub const PINS_PER_PORT: usize = 16;

/// NVIC preemption priority of the EXTI vectors.
pub const EXTI_PRIORITY: u8 = 5;
/// NVIC subpriority of the EXTI vectors.
pub const EXTI_SUBPRIORITY: u8 = 1;

/// A GPIO port.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Port {
    A, B, C, D, E, F, G, H, I,
}

impl Port {
    /// Every port, in order.
    pub const ALL: [Port; PORT_COUNT] = [
        Port::A, Port::B, Port::C, Port::D, Port::E,
        Port::F, Port::G, Port::H, Port::I,
    ];

    /// Zero-based position of the port (A is 0).
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Port name as it appears in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Port::A => "PORT_A",
            Port::B => "PORT_B",
            Port::C => "PORT_C",
            Port::D => "PORT_D",
            Port::E => "PORT_E",
            Port::F => "PORT_F",
            Port::G => "PORT_G",
            Port::H => "PORT_H",
            Port::I => "PORT_I",
        }
    }
}

/// A logical pin: a name for one physical (port, pin) pair.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioPin {
    /// Name the pin is claimed under.
    pub name: &'static str,
    /// Port the pin lives on.
    pub port: Port,
    /// Pin number within the port, 0 to 15.
    pub pin: u8,
}

impl GpioPin {
    /// Names a pin.
    pub const fn new(name: &'static str, port: Port, pin: u8) -> Self {
        Self { name, port, pin }
    }

    /// Checks that the pin number exists.
    pub const fn is_valid(&self) -> bool {
        (self.pin as usize) < PINS_PER_PORT
    }

    /// Bit for this pin in port-wide registers.
    pub const fn mask(&self) -> u16 {
        1 << self.pin
    }
}

/// Edge(s) that trigger an external interrupt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    /// Low to high.
    Rising,
    /// High to low.
    Falling,
    /// Either.
    Both,
}

/// Pin mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Digital input.
    Input,
    /// Push-pull output.
    OutputPushPull,
    /// Open-drain output.
    OutputOpenDrain,
    /// Alternate function, push-pull.
    AltPushPull,
    /// Alternate function, open-drain.
    AltOpenDrain,
    /// Analog; the reset state, and the lowest-power one.
    Analog,
    /// Input routed to its EXTI line.
    Interrupt(Edge),
}

/// Internal pull resistor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pull {
    /// Floating.
    #[default]
    None,
    /// Pull-up.
    Up,
    /// Pull-down.
    Down,
}

/// Output slew rate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Speed {
    Low,
    Medium,
    High,
    VeryHigh,
}

/// Everything the hardware needs to configure a pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinConfig {
    /// Mode.
    pub mode: Mode,
    /// Pull resistor.
    pub pull: Pull,
    /// Slew rate.
    pub speed: Speed,
    /// Alternate function number, meaningful in the `Alt*` modes.
    pub alt: u8,
}

/// NVIC vectors that serve the EXTI lines.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum ExtiIrq {
    Exti0,
    Exti1,
    Exti2,
    Exti3,
    Exti4,
    Exti9_5,
    Exti15_10,
}

impl ExtiIrq {
    /// Vector serving EXTI line `line`. Lines above 15 map to the last
    /// group.
    pub const fn for_line(line: u8) -> Self {
        match line {
            0 => Self::Exti0,
            1 => Self::Exti1,
            2 => Self::Exti2,
            3 => Self::Exti3,
            4 => Self::Exti4,
            5..=9 => Self::Exti9_5,
            _ => Self::Exti15_10,
        }
    }

    /// Mask of the EXTI lines this vector serves.
    pub const fn lines(self) -> u16 {
        match self {
            Self::Exti0 => 1 << 0,
            Self::Exti1 => 1 << 1,
            Self::Exti2 => 1 << 2,
            Self::Exti3 => 1 << 3,
            Self::Exti4 => 1 << 4,
            Self::Exti9_5 => 0b0000_0011_1110_0000,
            Self::Exti15_10 => 0b1111_1100_0000_0000,
        }
    }
}

/// Register-level operations the GPIO manager needs.
///
/// `mask` arguments select pins within `port`, one bit per pin.
pub trait GpioHw: Sync {
    /// Gates the clock of `port`.
    fn set_port_clock(&self, port: Port, on: bool);
    /// Applies `config` to the pins in `mask`. The port clock is on.
    fn configure(&self, port: Port, mask: u16, config: &PinConfig);
    /// Returns the pins in `mask` to their reset (analog, no pull) state.
    /// The port clock is on.
    fn reset(&self, port: Port, mask: u16);
    /// Reads the input level of the pin in `mask`.
    fn read(&self, port: Port, mask: u16) -> bool;
    /// Drives the pins in `mask`.
    fn write(&self, port: Port, mask: u16, high: bool);
    /// Inverts the output level of the pins in `mask`.
    fn toggle(&self, port: Port, mask: u16);
    /// Sets the priority of an EXTI vector and unmasks it.
    fn enable_exti_irq(&self, irq: ExtiIrq, priority: u8, subpriority: u8);
    /// Masks an EXTI vector.
    fn disable_exti_irq(&self, irq: ExtiIrq);
    /// Reads and clears the pending bits among `lines`.
    fn take_exti_pending(&self, lines: u16) -> u16;
}

/// Callback run in interrupt context when an EXTI line fires.
pub type ExtiHandler = &'static (dyn Fn() + Sync);

#[derive(Copy, Clone, Debug)]
struct Claim {
    name: &'static str,
    config: PinConfig,
}

#[derive(Debug)]
struct PortState {
    refcount: usize,
    clock_on: bool,
    claims: [Option<Claim>; PINS_PER_PORT],
}

impl PortState {
    const EMPTY: Self = Self {
        refcount: 0,
        clock_on: false,
        claims: [None; PINS_PER_PORT],
    };
}

const PORT_INIT: Mutex<PortState> = Mutex::new(PortState::EMPTY);
const LINE_INIT: CsMutex<Cell<Option<ExtiHandler>>> = CsMutex::new(Cell::new(None));

/// The GPIO manager.
///
/// Usually lives in a `static`:
///
/// ```ignore
/// static GPIO: Gpio<BoardGpio> = Gpio::new(BoardGpio);
/// ```
pub struct Gpio<H> {
    hw: H,
    initialized: AtomicBool,
    ports: [Mutex<PortState>; PORT_COUNT],
    lines: [CsMutex<Cell<Option<ExtiHandler>>>; PINS_PER_PORT],
}

impl<H: GpioHw> Gpio<H> {
    /// Creates a manager with nothing claimed.
    pub const fn new(hw: H) -> Self {
        Self {
            hw,
            initialized: AtomicBool::new(false),
            ports: [PORT_INIT; PORT_COUNT],
            lines: [LINE_INIT; PINS_PER_PORT],
        }
    }

    /// Hardware backend.
    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// Puts every port into its reset state with its clock off.
    ///
    /// Only the first call does anything.
    pub async fn init(&self) {
        if self.initialized.swap_polyfill(true, Ordering::AcqRel) {
            return;
        }
        for port in Port::ALL {
            let mut state = self.ports[port.index()].lock().await;
            self.hw.set_port_clock(port, true);
            self.hw.reset(port, 0xFFFF);
            self.hw.set_port_clock(port, false);
            *state = PortState::EMPTY;
        }
        debug!("gpio: all ports reset");
    }

    /// Configures and claims `pin`.
    ///
    /// # Panics
    ///
    /// If the pin number is out of range, or the physical pin is claimed
    /// under a different name.
    pub async fn config(&self, pin: &GpioPin, mode: Mode, pull: Pull) {
        self.config_alt(pin, mode, pull, 0).await
    }

    /// Configures and claims `pin`, selecting alternate function `alt`.
    ///
    /// Claiming a pin that is already claimed under the same name
    /// reconfigures it in place.
    ///
    /// # Panics
    ///
    /// If the pin number is out of range, or the physical pin is claimed
    /// under a different name.
    pub async fn config_alt(&self, pin: &GpioPin, mode: Mode, pull: Pull, alt: u8) {
        cheap_assert!(pin.is_valid());
        let config = PinConfig {
            mode,
            pull,
            speed: Speed::VeryHigh,
            alt,
        };
        let mut state = self.ports[pin.port.index()].lock().await;
        self.claim_locked(&mut state, pin, config);
    }

    fn claim_locked(&self, state: &mut PortState, pin: &GpioPin, config: PinConfig) {
        let slot = pin.pin as usize;
        match state.claims[slot] {
            Some(c) if c.name == pin.name => {
                self.hw.configure(pin.port, pin.mask(), &config);
                state.claims[slot] = Some(Claim { name: pin.name, config });
                trace!("gpio: {} reconfigured", pin.name);
                return;
            }
            Some(c) => {
                error!("gpio: {} already claimed by {}", pin.name, c.name);
                panic!();
            }
            None => {}
        }

        if state.refcount == 0 {
            self.hw.set_port_clock(pin.port, true);
            state.clock_on = true;
        }
        self.hw.configure(pin.port, pin.mask(), &config);
        state.refcount += 1;
        state.claims[slot] = Some(Claim { name: pin.name, config });
        debug!("gpio: {} claimed {}.{}", pin.name, pin.port.name(), pin.pin);
    }

    /// Claims `pin` as a push-pull output and drives it to `initial`.
    pub async fn config_out(&self, pin: &GpioPin, initial: bool) {
        self.config(pin, Mode::OutputPushPull, Pull::None).await;
        self.set(pin, initial);
    }

    /// Claims `pin` as an input.
    pub async fn config_in(&self, pin: &GpioPin, pull: Pull) {
        self.config(pin, Mode::Input, pull).await
    }

    /// Returns `pin` to its reset state and drops the claim.
    ///
    /// Does nothing if `pin` isn't claimed under its name.
    pub async fn release(&self, pin: &GpioPin) {
        if !pin.is_valid() {
            return;
        }
        let mut state = self.ports[pin.port.index()].lock().await;
        self.release_locked(&mut state, pin);
    }

    fn release_locked(&self, state: &mut PortState, pin: &GpioPin) -> bool {
        let slot = pin.pin as usize;
        match state.claims[slot] {
            Some(c) if c.name == pin.name => {}
            _ => return false,
        }
        state.claims[slot] = None;
        state.refcount -= 1;
        self.hw.reset(pin.port, pin.mask());
        if state.refcount == 0 {
            self.hw.set_port_clock(pin.port, false);
            state.clock_on = false;
        }
        debug!("gpio: {} released", pin.name);
        true
    }

    /// Reads the input level of `pin`.
    ///
    /// # Panics
    ///
    /// If the pin number is out of range. The same goes for
    /// [`set`][Gpio::set] and [`toggle`][Gpio::toggle].
    pub fn get(&self, pin: &GpioPin) -> bool {
        cheap_assert!(pin.is_valid());
        self.hw.read(pin.port, pin.mask())
    }

    /// Drives `pin` high or low.
    pub fn set(&self, pin: &GpioPin, high: bool) {
        cheap_assert!(pin.is_valid());
        self.hw.write(pin.port, pin.mask(), high)
    }

    /// Inverts the output level of `pin`.
    pub fn toggle(&self, pin: &GpioPin) {
        cheap_assert!(pin.is_valid());
        self.hw.toggle(pin.port, pin.mask())
    }

    /// Claims `pin` as an edge-triggered interrupt input and routes its EXTI
    /// line to `handler`.
    ///
    /// Only one pin per pin number can own an EXTI line, whatever its port.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the pin number is out of range.
    /// - `NotAvailable` if the EXTI line already has a handler.
    pub async fn config_interrupt(
        &self,
        pin: &GpioPin,
        edge: Edge,
        pull: Pull,
        handler: ExtiHandler,
    ) -> Result<()> {
        if !pin.is_valid() {
            return Err(Error::InvalidParameter);
        }
        let config = PinConfig {
            mode: Mode::Interrupt(edge),
            pull,
            speed: Speed::VeryHigh,
            alt: 0,
        };
        let mut state = self.ports[pin.port.index()].lock().await;

        // No await from here on: the line is reserved and the pin claimed
        // in the same poll, or neither happens.
        let line = pin.pin as usize;
        let reserved = critical_section::with(|cs| {
            let cell = self.lines[line].borrow(cs);
            if cell.get().is_some() {
                false
            } else {
                cell.set(Some(handler));
                true
            }
        });
        if !reserved {
            warn!("gpio: EXTI line {} already in use", pin.pin);
            return Err(Error::NotAvailable);
        }

        self.claim_locked(&mut state, pin, config);
        self.hw.enable_exti_irq(ExtiIrq::for_line(pin.pin), EXTI_PRIORITY, EXTI_SUBPRIORITY);
        Ok(())
    }

    /// Undoes [`config_interrupt`][Gpio::config_interrupt]: drops the line's
    /// handler and releases the pin. The vector is masked once none of its
    /// lines has a handler.
    ///
    /// Does nothing if `pin` isn't claimed as an interrupt under its name.
    pub async fn clear_interrupt(&self, pin: &GpioPin) {
        if !pin.is_valid() {
            return;
        }
        let mut state = self.ports[pin.port.index()].lock().await;
        match state.claims[pin.pin as usize] {
            Some(Claim { name, config: PinConfig { mode: Mode::Interrupt(_), .. } })
                if name == pin.name => {}
            _ => return,
        }

        let irq = ExtiIrq::for_line(pin.pin);
        let group_idle = critical_section::with(|cs| {
            self.lines[pin.pin as usize].borrow(cs).set(None);
            (0..PINS_PER_PORT)
                .filter(|l| irq.lines() & (1 << l) != 0)
                .all(|l| self.lines[l].borrow(cs).get().is_none())
        });
        if group_idle {
            self.hw.disable_exti_irq(irq);
        }
        self.release_locked(&mut state, pin);
    }

    /// EXTI interrupt entry point. Call from the handler of vector `irq`.
    ///
    /// Clears the pending lines of the group and runs their handlers.
    pub fn on_exti(&self, irq: ExtiIrq) {
        let pending = self.hw.take_exti_pending(irq.lines());
        for line in 0..PINS_PER_PORT {
            if pending & (1 << line) == 0 {
                continue;
            }
            let handler = critical_section::with(|cs| self.lines[line].borrow(cs).get());
            match handler {
                Some(h) => h(),
                None => trace!("gpio: spurious EXTI line {}", line),
            }
        }
    }

    /// Checks whether the physical pin behind `pin` is unclaimed.
    pub async fn is_available(&self, pin: &GpioPin) -> bool {
        if !pin.is_valid() {
            return false;
        }
        let state = self.ports[pin.port.index()].lock().await;
        state.claims[pin.pin as usize].is_none()
    }

    /// Finds a claimed pin by name.
    pub async fn ctx_get(&self, name: &str) -> Option<GpioPin> {
        for port in Port::ALL {
            let state = self.ports[port.index()].lock().await;
            let found = state.claims.iter().enumerate().find_map(|(n, c)| match c {
                Some(c) if c.name == name => Some(GpioPin::new(c.name, port, n as u8)),
                _ => None,
            });
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Current configuration of a claimed pin.
    pub async fn pin_config(&self, pin: &GpioPin) -> Option<PinConfig> {
        if !pin.is_valid() {
            return None;
        }
        let state = self.ports[pin.port.index()].lock().await;
        state.claims[pin.pin as usize].map(|c| c.config)
    }

    /// Number of claimed pins on `port`.
    pub async fn refcount(&self, port: Port) -> usize {
        self.port(port).await.refcount
    }

    /// Whether the manager has `port`'s clock on.
    pub async fn clock_on(&self, port: Port) -> bool {
        self.port(port).await.clock_on
    }

    async fn port(&self, port: Port) -> MutexGuard<'_, PortState> {
        self.ports[port.index()].lock().await
    }
}

impl<H: fmt::Debug> fmt::Debug for Gpio<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gpio")
            .field("hw", &self.hw)
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
