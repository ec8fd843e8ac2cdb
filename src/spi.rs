// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SPI controller manager.
//!
//! Each of the three SPI controllers can be shared by several devices that
//! differ only in their chip-select pin. A transaction on a controller runs
//! entirely under that controller's mutex:
//!
//! 1. take the mutex (or fail with `Timeout`, with no side effects);
//! 2. drive the device's chip-select low;
//! 3. reconfigure the controller for the device's clock, mode, width and
//!    bit order, since the controller only holds one configuration at a time;
//! 4. transfer, in the controller's [`XferMode`];
//! 5. drive chip-select high and release the mutex.
//!
//! In interrupt and DMA mode the task sleeps on the controller's completion
//! semaphore, which the application's SPI interrupt handlers signal through
//! [`Spi::on_complete`] and [`Spi::on_error`].
//!
//! To hold chip-select across several transfers, use [`Spi::cs_assert`],
//! which returns a [`Selected`] handle with raw transfer operations.
//!
//! # Cancellation
//!
//! If a transfer future is dropped while the hardware is still moving data,
//! the transfer is aborted in hardware before the buffers are released, and
//! chip-select goes high before the mutex unlocks. The same happens when a
//! transfer times out.

use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex as CsMutex;
use heapless::Vec;
use scopeguard::ScopeGuard;

use crate::error::{Error, HalError, Result};
use crate::gpio::{Gpio, GpioHw, GpioPin, Mode, Pull};
use crate::mutex::{Mutex, MutexGuard};
use crate::semaphore::Semaphore;
use crate::time::{with_timeout, Millis};
use crate::xfer::{StatusCell, TransferStatus, XferMode};

/// Number of SPI controllers managed.
pub const SPI_COUNT: usize = 3;
/// Capacity of the device table, across all controllers.
pub const MAX_SPI_DEVICES: usize = 8;

/// NVIC preemption priority of the SPI and SPI DMA vectors.
pub const SPI_PRIORITY: u8 = 5;
/// NVIC subpriority of the SPI and SPI DMA vectors.
pub const SPI_SUBPRIORITY: u8 = 1;

/// An SPI controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum SpiId {
    Spi1,
    Spi2,
    Spi3,
}

impl SpiId {
    /// Zero-based position of the controller.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Controller name as it appears in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Spi1 => "SPI1",
            Self::Spi2 => "SPI2",
            Self::Spi3 => "SPI3",
        }
    }

    /// Alternate function that routes this controller to its usual pins.
    pub const fn default_alt(self) -> u8 {
        match self {
            Self::Spi1 | Self::Spi2 => 5,
            Self::Spi3 => 6,
        }
    }
}

/// Board wiring of one controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiBusConfig {
    /// Clock pin.
    pub sclk: GpioPin,
    /// Data in, if wired.
    pub miso: Option<GpioPin>,
    /// Data out, if wired.
    pub mosi: Option<GpioPin>,
    /// Alternate function for all three pins.
    pub alt: u8,
    /// How transfers are driven.
    pub mode: XferMode,
}

impl SpiBusConfig {
    /// Wiring for `bus` with its default alternate function, in interrupt
    /// mode.
    pub const fn new(
        bus: SpiId,
        sclk: GpioPin,
        miso: Option<GpioPin>,
        mosi: Option<GpioPin>,
    ) -> Self {
        Self {
            sclk,
            miso,
            mosi,
            alt: bus.default_alt(),
            mode: XferMode::Interrupt,
        }
    }

    /// Changes the transfer mode.
    pub const fn with_mode(mut self, mode: XferMode) -> Self {
        self.mode = mode;
        self
    }

    /// Changes the alternate function.
    pub const fn with_alt(mut self, alt: u8) -> Self {
        self.alt = alt;
        self
    }
}

/// A device on a shared controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiDevice {
    /// Name the device is registered under.
    pub name: &'static str,
    /// Controller the device hangs off.
    pub bus: SpiId,
    /// Active-low chip-select, if the device has one.
    pub cs: Option<GpioPin>,
}

impl SpiDevice {
    /// Describes a device.
    pub const fn new(name: &'static str, bus: SpiId, cs: Option<GpioPin>) -> Self {
        Self { name, bus, cs }
    }
}

/// Frame size.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataWidth {
    /// 8-bit frames.
    #[default]
    Bits8,
    /// 16-bit frames. Buffers must hold an even number of bytes.
    Bits16,
}

/// Serial clock rate, derived from an 80 MHz peripheral clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum ClockSpeed {
    Mhz40,
    #[default]
    Mhz20,
    Mhz10,
    Mhz5,
    Khz2500,
    Khz1250,
    Khz625,
    Khz313,
}

impl ClockSpeed {
    /// Baud-rate prescaler producing this speed.
    pub const fn prescaler(self) -> u16 {
        match self {
            Self::Mhz40 => 2,
            Self::Mhz20 => 4,
            Self::Mhz10 => 8,
            Self::Mhz5 => 16,
            Self::Khz2500 => 32,
            Self::Khz1250 => 64,
            Self::Khz625 => 128,
            Self::Khz313 => 256,
        }
    }
}

/// Clock polarity and phase.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum SpiMode {
    #[default]
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

impl SpiMode {
    /// Clock idles high.
    pub const fn cpol(self) -> bool {
        matches!(self, Self::Mode2 | Self::Mode3)
    }

    /// Data is sampled on the second clock edge.
    pub const fn cpha(self) -> bool {
        matches!(self, Self::Mode1 | Self::Mode3)
    }
}

/// Bit shift order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum BitOrder {
    #[default]
    MsbFirst,
    LsbFirst,
}

/// Per-transaction controller configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiSettings {
    /// Frame size.
    pub width: DataWidth,
    /// Clock rate.
    pub clock: ClockSpeed,
    /// Clock polarity and phase.
    pub mode: SpiMode,
    /// Bit order.
    pub bit_order: BitOrder,
}

impl SpiSettings {
    /// Mode 0, 8-bit, MSB first, 20 MHz. Applied at bring-up.
    pub const DEFAULT: Self = Self {
        width: DataWidth::Bits8,
        clock: ClockSpeed::Mhz20,
        mode: SpiMode::Mode0,
        bit_order: BitOrder::MsbFirst,
    };
}

/// Buffers of one transfer.
#[derive(Debug)]
pub enum SpiBuffers<'a> {
    /// Transmit only; received data is discarded.
    Tx(&'a [u8]),
    /// Receive only.
    Rx(&'a mut [u8]),
    /// Full duplex. Both buffers have the same length.
    TxRx(&'a [u8], &'a mut [u8]),
}

impl<'a> SpiBuffers<'a> {
    /// Builds the buffer set for a transfer, rejecting empty transfers and
    /// full-duplex buffers of different lengths.
    pub fn new(tx: Option<&'a [u8]>, rx: Option<&'a mut [u8]>) -> Result<Self> {
        let bufs = match (tx, rx) {
            (Some(t), None) => Self::Tx(t),
            (None, Some(r)) => Self::Rx(r),
            (Some(t), Some(r)) if t.len() == r.len() => Self::TxRx(t, r),
            _ => return Err(Error::InvalidParameter),
        };
        if bufs.len() == 0 {
            return Err(Error::InvalidParameter);
        }
        Ok(bufs)
    }

    /// Number of bytes clocked.
    pub fn len(&self) -> usize {
        match self {
            Self::Tx(t) => t.len(),
            Self::Rx(r) => r.len(),
            Self::TxRx(t, _) => t.len(),
        }
    }

    /// Checks whether the transfer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether data is sent.
    pub fn has_tx(&self) -> bool {
        !matches!(self, Self::Rx(_))
    }

    /// Whether data is kept.
    pub fn has_rx(&self) -> bool {
        !matches!(self, Self::Tx(_))
    }
}

/// Register-level operations the SPI manager needs.
///
/// Calls for one controller are serialized by the manager, except
/// [`abort`][SpiHw::abort], which may also be issued while a transfer
/// started by [`start`][SpiHw::start] is in flight.
pub trait SpiHw: Sync {
    /// Enables the controller clock, sets up DMA streams if `mode` is
    /// [`XferMode::Dma`] and programs and unmasks the controller's vectors.
    fn bring_up(&self, bus: SpiId, mode: XferMode) -> Result<(), HalError>;

    /// Resets the controller and masks its vectors.
    fn shut_down(&self, bus: SpiId);

    /// Reinitializes the controller as a master with `settings`.
    fn configure(&self, bus: SpiId, settings: &SpiSettings) -> Result<(), HalError>;

    /// Starts an interrupt- or DMA-driven transfer and returns at once.
    ///
    /// The hardware may keep reading and writing the buffers until it
    /// reports completion or error to the manager, or until
    /// [`abort`][SpiHw::abort] returns. The manager keeps them borrowed
    /// until then.
    fn start(&self, bus: SpiId, mode: XferMode, bufs: SpiBuffers<'_>) -> Result<(), HalError>;

    /// Performs a whole transfer by polling, giving up after `timeout`.
    fn transfer_blocking(
        &self,
        bus: SpiId,
        bufs: SpiBuffers<'_>,
        timeout: Millis,
    ) -> Result<(), HalError>;

    /// Frames left to send and to receive in the last started transfer.
    fn remaining(&self, bus: SpiId) -> (usize, usize);

    /// Stops an in-flight transfer. Once this returns, the hardware no
    /// longer touches the transfer's buffers.
    fn abort(&self, bus: SpiId);
}

struct Bus {
    config: Option<SpiBusConfig>,
    initialized: AtomicBool,
    lock: Mutex<()>,
    done: Semaphore,
    status: StatusCell,
}

impl Bus {
    const fn new(config: Option<SpiBusConfig>) -> Self {
        Self {
            config,
            initialized: AtomicBool::new(false),
            lock: Mutex::new(()),
            done: Semaphore::new(),
            status: StatusCell::new(),
        }
    }
}

/// The SPI manager.
///
/// ```ignore
/// static SPI: Spi<'static, BoardSpi, BoardGpio> = Spi::new(BoardSpi, &GPIO, [
///     Some(SpiBusConfig::new(SpiId::Spi1, SCLK, Some(MISO), Some(MOSI))),
///     None,
///     None,
/// ]);
/// ```
pub struct Spi<'g, H, G> {
    hw: H,
    gpio: &'g Gpio<G>,
    buses: [Bus; SPI_COUNT],
    devices: CsMutex<RefCell<Vec<SpiDevice, MAX_SPI_DEVICES>>>,
}

impl<'g, H: SpiHw, G: GpioHw> Spi<'g, H, G> {
    /// Creates a manager for the controllers wired as `buses`, indexed by
    /// [`SpiId::index`]. `None` marks a controller the board doesn't use.
    pub const fn new(hw: H, gpio: &'g Gpio<G>, buses: [Option<SpiBusConfig>; SPI_COUNT]) -> Self {
        Self {
            hw,
            gpio,
            buses: [Bus::new(buses[0]), Bus::new(buses[1]), Bus::new(buses[2])],
            devices: CsMutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Hardware backend.
    pub fn hw(&self) -> &H {
        &self.hw
    }

    fn bus(&self, id: SpiId) -> Result<(&Bus, SpiBusConfig)> {
        let bus = &self.buses[id.index()];
        bus.config.map(|c| (bus, c)).ok_or(Error::InvalidParameter)
    }

    /// Registers `dev` and prepares its chip-select.
    ///
    /// The first device registered on a controller also brings the
    /// controller up: its pins are claimed, the hardware is enabled and the
    /// default [`SpiSettings`] are applied.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the device's controller isn't wired.
    /// - `NotAvailable` if a device with that name is registered, or the
    ///   device table is full.
    /// - `Failure` if the hardware refuses to come up.
    pub async fn init(&self, dev: &SpiDevice) -> Result<()> {
        let (bus, config) = self.bus(dev.bus)?;
        let _guard = bus.lock.lock().await;

        let reserved = critical_section::with(|cs| {
            let mut devices = self.devices.borrow_ref_mut(cs);
            !devices.iter().any(|d| d.name == dev.name) && devices.push(*dev).is_ok()
        });
        if !reserved {
            warn!("spi: cannot register {}", dev.name);
            return Err(Error::NotAvailable);
        }
        // Until disarmed, leaving early takes the entry back out.
        let reservation = scopeguard::guard((), |()| {
            critical_section::with(|cs| {
                self.devices.borrow_ref_mut(cs).retain(|d| d.name != dev.name)
            })
        });

        self.gpio.init().await;
        if let Some(cs) = &dev.cs {
            self.gpio.config_out(cs, true).await;
        }

        if !bus.initialized.load(Ordering::Acquire) {
            for pin in [Some(config.sclk), config.miso, config.mosi].iter().flatten() {
                self.gpio.config_alt(pin, Mode::AltPushPull, Pull::Down, config.alt).await;
            }
            bus.status.set(TransferStatus::Done);
            bus.done.drain();
            let up = self.hw.bring_up(dev.bus, config.mode)
                .and_then(|()| self.hw.configure(dev.bus, &SpiSettings::DEFAULT));
            if let Err(e) = up {
                error!("spi: {} bring-up failed: {}", dev.bus.name(), e);
                return Err(Error::Failure);
            }
            bus.initialized.store(true, Ordering::Release);
            debug!("spi: {} up in {} mode", dev.bus.name(), config.mode);
        }

        ScopeGuard::into_inner(reservation);
        debug!("spi: {} registered on {}", dev.name, dev.bus.name());
        Ok(())
    }

    /// Shuts controller `id` down: the hardware is reset, its pins and the
    /// chip-selects of its devices are released, and the devices are
    /// forgotten.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if the controller isn't wired or isn't up.
    pub async fn deinit(&self, id: SpiId) -> Result<()> {
        let (bus, config) = self.bus(id)?;
        let _guard = bus.lock.lock().await;
        if !bus.initialized.load(Ordering::Acquire) {
            return Err(Error::InvalidParameter);
        }

        self.hw.shut_down(id);
        bus.initialized.store(false, Ordering::Release);
        for pin in [Some(config.sclk), config.miso, config.mosi].iter().flatten() {
            self.gpio.release(pin).await;
        }

        let forgotten: Vec<SpiDevice, MAX_SPI_DEVICES> = critical_section::with(|cs| {
            let mut devices = self.devices.borrow_ref_mut(cs);
            let gone = devices.iter().filter(|d| d.bus == id).copied().collect();
            devices.retain(|d| d.bus != id);
            gone
        });
        for cs in forgotten.iter().filter_map(|d| d.cs) {
            self.gpio.release(&cs).await;
        }
        debug!("spi: {} down", id.name());
        Ok(())
    }

    /// Finds a registered device by name.
    pub fn inst_get(&self, name: &str) -> Option<SpiDevice> {
        critical_section::with(|cs| {
            self.devices.borrow_ref(cs).iter().find(|d| d.name == name).copied()
        })
    }

    /// Whether `dev`, chip-select and all, is what was registered under its
    /// name.
    fn is_registered(&self, dev: &SpiDevice) -> bool {
        self.inst_get(dev.name).as_ref() == Some(dev)
    }

    /// Resolves `dev`'s controller, refusing devices that were never
    /// registered.
    fn registered_bus(&self, dev: &SpiDevice) -> Result<&Bus> {
        let (bus, _) = self.bus(dev.bus)?;
        if !self.is_registered(dev) {
            warn!("spi: {} is not registered", dev.name);
            return Err(Error::InvalidParameter);
        }
        Ok(bus)
    }

    /// Runs one transaction with `dev`: sends `tx` and/or receives into
    /// `rx`. Pass `None` for the direction you don't need; with both,
    /// the buffers must have the same length.
    ///
    /// `timeout` bounds both the wait for the controller and the wait for
    /// the transfer.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for an empty or mismatched transfer, an odd
    ///   length with 16-bit frames, an unwired controller, or a device that
    ///   isn't registered as given.
    /// - `Timeout` if the controller wasn't obtained in time (nothing else
    ///   happened), or the transfer didn't complete in time (it was aborted).
    /// - `Failure` if the controller isn't up, or the hardware reported an
    ///   error or stopped short.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Weak.
    ///
    /// Dropping the future mid-transfer aborts the transfer and deselects
    /// the device. Some bytes may already have been clocked out.
    pub async fn txrx(
        &self,
        dev: &SpiDevice,
        settings: &SpiSettings,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
        timeout: Millis,
    ) -> Result<()> {
        let bufs = SpiBuffers::new(tx, rx)?;
        let bus = self.registered_bus(dev)?;
        let Some(_guard) = with_timeout(timeout, bus.lock.lock()).await else {
            warn!("spi: {} busy, {} gave up", dev.bus.name(), dev.name);
            return Err(Error::Timeout);
        };
        // Deinit may have run while we waited.
        if !self.is_registered(dev) {
            return Err(Error::InvalidParameter);
        }

        self.select(dev);
        let _cs = scopeguard::guard((), |()| self.deselect(dev));
        self.transfer(dev.bus, settings, bufs, timeout).await
    }

    /// Transmit-only [`txrx`][Spi::txrx].
    pub async fn tx(
        &self,
        dev: &SpiDevice,
        settings: &SpiSettings,
        buf: &[u8],
        timeout: Millis,
    ) -> Result<()> {
        self.txrx(dev, settings, Some(buf), None, timeout).await
    }

    /// Receive-only [`txrx`][Spi::txrx].
    pub async fn rx(
        &self,
        dev: &SpiDevice,
        settings: &SpiSettings,
        buf: &mut [u8],
        timeout: Millis,
    ) -> Result<()> {
        self.txrx(dev, settings, None, Some(buf), timeout).await
    }

    /// Takes `dev`'s controller and drives its chip-select low until the
    /// returned handle is dropped or [deasserted][Selected::deassert].
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the controller isn't wired or the device
    ///   isn't registered as given.
    /// - `Timeout` if the controller wasn't obtained in time.
    pub async fn cs_assert(&self, dev: &SpiDevice, timeout: Millis) -> Result<Selected<'_, 'g, H, G>> {
        let bus = self.registered_bus(dev)?;
        let Some(guard) = with_timeout(timeout, bus.lock.lock()).await else {
            return Err(Error::Timeout);
        };
        if !self.is_registered(dev) {
            return Err(Error::InvalidParameter);
        }
        self.select(dev);
        Ok(Selected {
            spi: self,
            dev: *dev,
            _guard: guard,
        })
    }

    fn select(&self, dev: &SpiDevice) {
        if let Some(cs) = &dev.cs {
            self.gpio.set(cs, false);
        }
    }

    fn deselect(&self, dev: &SpiDevice) {
        if let Some(cs) = &dev.cs {
            self.gpio.set(cs, true);
        }
    }

    /// Moves data on a controller whose mutex the caller holds.
    async fn transfer(
        &self,
        id: SpiId,
        settings: &SpiSettings,
        bufs: SpiBuffers<'_>,
        timeout: Millis,
    ) -> Result<()> {
        let (bus, config) = self.bus(id)?;
        if !bus.initialized.load(Ordering::Acquire) {
            return Err(Error::Failure);
        }
        if settings.width == DataWidth::Bits16 && bufs.len() % 2 != 0 {
            return Err(Error::InvalidParameter);
        }
        self.hw.configure(id, settings).map_err(|_| Error::Failure)?;

        if config.mode == XferMode::Polling {
            return self.hw.transfer_blocking(id, bufs, timeout).map_err(|e| {
                warn!("spi: {} polled transfer failed: {}", id.name(), e);
                Error::from(e)
            });
        }

        let (has_tx, has_rx) = (bufs.has_tx(), bufs.has_rx());
        bus.done.drain();
        bus.status.set(TransferStatus::Wait);
        // Until disarmed, leaving this function stops the hardware first.
        let abort = scopeguard::guard((), |()| {
            self.hw.abort(id);
            warn!("spi: {} transfer aborted", id.name());
        });

        self.hw.start(id, config.mode, bufs).map_err(Error::from)?;
        let signalled = with_timeout(timeout, bus.done.take()).await.is_some();

        let (tx_left, rx_left) = self.hw.remaining(id);
        let result = match bus.status.get() {
            TransferStatus::Error => Err(Error::Failure),
            TransferStatus::Wait => Err(Error::Timeout),
            TransferStatus::Done if has_tx && tx_left != 0 => Err(Error::Failure),
            TransferStatus::Done if has_rx && rx_left != 0 => Err(Error::Failure),
            TransferStatus::Done => Ok(()),
        };
        trace!("spi: {} signalled={} result ok={}", id.name(), signalled, result.is_ok());
        if result.is_ok() {
            ScopeGuard::into_inner(abort);
        }
        result
    }

    /// Transfer-complete entry point. Call from the controller's interrupt
    /// (or DMA) handler once the whole transfer has finished.
    pub fn on_complete(&self, id: SpiId) {
        let bus = &self.buses[id.index()];
        bus.status.set(TransferStatus::Done);
        bus.done.give();
    }

    /// Transfer-error entry point. Call from the controller's interrupt
    /// (or DMA) handler when the hardware flags an error.
    pub fn on_error(&self, id: SpiId) {
        let bus = &self.buses[id.index()];
        bus.status.set(TransferStatus::Error);
        bus.done.give();
    }

    /// Whether controller `id` has been brought up.
    pub fn is_initialized(&self, id: SpiId) -> bool {
        self.buses[id.index()].initialized.load(Ordering::Acquire)
    }
}

impl<H: fmt::Debug, G> fmt::Debug for Spi<'_, H, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spi")
            .field("hw", &self.hw)
            .finish_non_exhaustive()
    }
}

/// A device whose controller is held and whose chip-select is low.
///
/// Produced by [`Spi::cs_assert`]. Dropping it deselects the device and
/// then releases the controller.
pub struct Selected<'s, 'g, H: SpiHw, G: GpioHw> {
    spi: &'s Spi<'g, H, G>,
    dev: SpiDevice,
    _guard: MutexGuard<'s, ()>,
}

impl<H: SpiHw, G: GpioHw> Selected<'_, '_, H, G> {
    /// Transfers without touching chip-select. Arguments and errors as for
    /// [`Spi::txrx`], except that the controller is already held.
    pub async fn txrx_raw(
        &mut self,
        settings: &SpiSettings,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
        timeout: Millis,
    ) -> Result<()> {
        let bufs = SpiBuffers::new(tx, rx)?;
        self.spi.transfer(self.dev.bus, settings, bufs, timeout).await
    }

    /// Transmit-only [`txrx_raw`][Selected::txrx_raw].
    pub async fn tx_raw(&mut self, settings: &SpiSettings, buf: &[u8], timeout: Millis) -> Result<()> {
        self.txrx_raw(settings, Some(buf), None, timeout).await
    }

    /// Receive-only [`txrx_raw`][Selected::txrx_raw].
    pub async fn rx_raw(&mut self, settings: &SpiSettings, buf: &mut [u8], timeout: Millis) -> Result<()> {
        self.txrx_raw(settings, None, Some(buf), timeout).await
    }

    /// Device being talked to.
    pub fn device(&self) -> &SpiDevice {
        &self.dev
    }

    /// Drives chip-select high and releases the controller.
    pub fn deassert(self) {}
}

impl<H: SpiHw, G: GpioHw> Drop for Selected<'_, '_, H, G> {
    fn drop(&mut self) {
        self.spi.deselect(&self.dev);
    }
}

impl<H: SpiHw, G: GpioHw> fmt::Debug for Selected<'_, '_, H, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selected").field("dev", &self.dev).finish_non_exhaustive()
    }
}
