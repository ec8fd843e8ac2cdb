// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UART controller manager.
//!
//! Each controller has independent transmit and receive paths, each with
//! its own mutex, completion semaphore and status cell, so one task can be
//! writing while another waits for input.
//!
//! # Reception
//!
//! Once [`Uart::rx_buffering_start`] runs, everything the controller
//! receives lands in a per-controller [`Fifo`] of `N` bytes, whether or not
//! anybody is reading:
//!
//! - in interrupt mode, the application's UART handler passes each byte to
//!   [`Uart::on_rx_byte`];
//! - in DMA mode, a circular DMA stream writes straight into the FIFO
//!   storage, and the handlers publish its position through
//!   [`Uart::on_rx_dma`] and [`Uart::on_rx_idle`].
//!
//! When the FIFO is full the oldest byte is overwritten. A reader blocked in
//! [`Uart::rx`] is woken when the FIFO fill reaches the trigger level, or
//! when the line goes idle with anything buffered.
//!
//! # Cancellation
//!
//! Dropping a [`Uart::tx`] future while the transmit is in flight aborts it
//! in hardware before the buffer borrow ends. Dropping an [`Uart::rx`]
//! future never loses buffered data.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use scopeguard::ScopeGuard;

use crate::atomic::AtomicArithExt;
use crate::error::{Error, HalError, PartialTransfer, Result};
use crate::fifo::Fifo;
use crate::gpio::{Gpio, GpioHw, GpioPin, Mode, Pull};
use crate::mutex::Mutex;
use crate::semaphore::Semaphore;
use crate::time::{with_timeout, Millis};
use crate::xfer::{StatusCell, TransferStatus, XferMode};

/// Number of UART controllers managed.
pub const UART_COUNT: usize = 6;
/// Receive FIFO size used unless the manager is given another.
pub const DEFAULT_FIFO_SIZE: usize = 1024;
/// Line rate used unless the board asks for another.
pub const DEFAULT_BAUD: u32 = 115_200;

/// NVIC preemption priority of the UART vectors.
pub const UART_PRIORITY: u8 = 5;
/// NVIC subpriority of the UART vectors.
pub const UART_SUBPRIORITY: u8 = 1;
/// NVIC preemption priority of the UART DMA vectors.
pub const UART_DMA_PRIORITY: u8 = 5;
/// NVIC subpriority of the UART DMA vectors.
pub const UART_DMA_SUBPRIORITY: u8 = 0;

/// A UART controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum UartId {
    Usart1,
    Usart2,
    Usart3,
    Uart4,
    Uart5,
    Usart6,
}

impl UartId {
    /// Every controller, in index order.
    pub const ALL: [Self; UART_COUNT] = [
        Self::Usart1,
        Self::Usart2,
        Self::Usart3,
        Self::Uart4,
        Self::Uart5,
        Self::Usart6,
    ];

    /// Zero-based position of the controller.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Controller name as it appears in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Usart1 => "USART1",
            Self::Usart2 => "USART2",
            Self::Usart3 => "USART3",
            Self::Uart4 => "UART4",
            Self::Uart5 => "UART5",
            Self::Usart6 => "USART6",
        }
    }

    /// Alternate function that routes this controller to its pins.
    pub const fn default_alt(self) -> u8 {
        match self {
            Self::Usart1 | Self::Usart2 | Self::Usart3 => 7,
            Self::Uart4 | Self::Uart5 | Self::Usart6 => 8,
        }
    }
}

/// Board wiring and modes of one controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartConfig {
    /// Receive pin.
    pub rx: GpioPin,
    /// Transmit pin.
    pub tx: GpioPin,
    /// Clear-to-send, if hardware flow control is wired.
    pub cts: Option<GpioPin>,
    /// Request-to-send, if hardware flow control is wired.
    pub rts: Option<GpioPin>,
    /// Alternate function for all pins.
    pub alt: u8,
    /// Initial line rate.
    pub baud: u32,
    /// How received data is moved.
    pub rx_mode: XferMode,
    /// How transmitted data is moved.
    pub tx_mode: XferMode,
}

impl UartConfig {
    /// Wiring for `id` with its default alternate function, 115200 baud,
    /// interrupt-driven reception and polled transmission.
    pub const fn new(id: UartId, rx: GpioPin, tx: GpioPin) -> Self {
        Self {
            rx,
            tx,
            cts: None,
            rts: None,
            alt: id.default_alt(),
            baud: DEFAULT_BAUD,
            rx_mode: XferMode::Interrupt,
            tx_mode: XferMode::Polling,
        }
    }

    /// Adds hardware flow control pins.
    pub const fn with_flow_control(mut self, cts: GpioPin, rts: GpioPin) -> Self {
        self.cts = Some(cts);
        self.rts = Some(rts);
        self
    }

    /// Changes the initial line rate.
    pub const fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Changes the receive and transmit modes.
    pub const fn with_modes(mut self, rx_mode: XferMode, tx_mode: XferMode) -> Self {
        self.rx_mode = rx_mode;
        self.tx_mode = tx_mode;
        self
    }

    /// Changes the alternate function.
    pub const fn with_alt(mut self, alt: u8) -> Self {
        self.alt = alt;
        self
    }

    fn pins(&self) -> impl Iterator<Item = (GpioPin, Mode)> {
        [
            Some((self.tx, Mode::AltPushPull)),
            Some((self.rx, Mode::AltPushPull)),
            self.cts.map(|p| (p, Mode::AltOpenDrain)),
            self.rts.map(|p| (p, Mode::AltOpenDrain)),
        ]
        .into_iter()
        .flatten()
    }
}

/// Register-level operations the UART manager needs.
///
/// Transmit calls for one controller are serialized by the manager, and so
/// are receive calls. The abort operations may be issued while a transfer
/// they stop is in flight.
pub trait UartHw: Sync {
    /// Enables the controller (and DMA) clocks, programs and unmasks the
    /// vectors its modes need, and sets up the line as 8N1 with 8x
    /// oversampling at `baud`. Flow control is enabled when `config` wires
    /// it. In interrupt and DMA receive mode the idle-line interrupt is
    /// enabled too.
    fn bring_up(&self, id: UartId, config: &UartConfig, baud: u32) -> Result<(), HalError>;

    /// Resets the controller and masks its vectors.
    fn shut_down(&self, id: UartId);

    /// Starts an interrupt- or DMA-driven transmit of `buf` and returns at
    /// once. The hardware may keep reading `buf` until it reports
    /// completion or error, or until [`abort_tx`][UartHw::abort_tx]
    /// returns.
    fn start_tx(&self, id: UartId, mode: XferMode, buf: &[u8]) -> Result<(), HalError>;

    /// Transmits `buf` by polling, giving up after `timeout`.
    fn write_blocking(&self, id: UartId, buf: &[u8], timeout: Millis) -> Result<(), HalError>;

    /// Bytes not yet sent by the last transmit.
    fn tx_remaining(&self, id: UartId) -> usize;

    /// Stops an in-flight transmit.
    fn abort_tx(&self, id: UartId);

    /// Starts continuous reception.
    ///
    /// In interrupt mode the hardware only needs its receive and idle
    /// interrupts enabled; bytes reach the manager through
    /// [`Uart::on_rx_byte`]. In DMA mode a circular stream fills the `len`
    /// bytes at `buf` over and over.
    ///
    /// # Safety
    ///
    /// The caller guarantees that `buf..buf + len` stays valid for writes
    /// until [`abort_rx`][UartHw::abort_rx] or
    /// [`shut_down`][UartHw::shut_down] returns.
    unsafe fn start_rx(&self, id: UartId, mode: XferMode, buf: *mut u8, len: usize) -> Result<(), HalError>;

    /// Receives into `buf` by polling, giving up after `timeout`.
    fn read_blocking(&self, id: UartId, buf: &mut [u8], timeout: Millis) -> Result<(), HalError>;

    /// Bytes not yet received by the last polled receive or, while a
    /// circular DMA reception runs, the stream's remaining count.
    fn rx_remaining(&self, id: UartId) -> usize;

    /// Stops reception. Once this returns, the hardware no longer touches
    /// the buffer handed to [`start_rx`][UartHw::start_rx].
    fn abort_rx(&self, id: UartId);
}

struct Channel<const N: usize> {
    config: Option<UartConfig>,
    baud: AtomicU32,
    initialized: AtomicBool,
    tx_lock: Mutex<()>,
    rx_lock: Mutex<()>,
    tx_done: Semaphore,
    rx_ready: Semaphore,
    tx_status: StatusCell,
    rx_status: StatusCell,
    fifo: Fifo<N>,
    trigger: AtomicUsize,
    water_mark: AtomicUsize,
    buffering: AtomicBool,
}

impl<const N: usize> Channel<N> {
    const fn new(config: Option<UartConfig>) -> Self {
        let baud = match &config {
            Some(c) => c.baud,
            None => DEFAULT_BAUD,
        };
        Self {
            config,
            baud: AtomicU32::new(baud),
            initialized: AtomicBool::new(false),
            tx_lock: Mutex::new(()),
            rx_lock: Mutex::new(()),
            tx_done: Semaphore::new(),
            rx_ready: Semaphore::new(),
            tx_status: StatusCell::new(),
            rx_status: StatusCell::new(),
            fifo: Fifo::new(),
            trigger: AtomicUsize::new(N / 2),
            water_mark: AtomicUsize::new(0),
            buffering: AtomicBool::new(false),
        }
    }

    /// Puts the software side of reception back to idle.
    fn clear_rx(&self) {
        self.fifo.reset();
        self.rx_ready.drain();
        self.rx_status.set(TransferStatus::Done);
        self.water_mark.store(0, Ordering::Relaxed);
        self.buffering.store(false, Ordering::Release);
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

/// The UART manager, with a receive FIFO of `N` bytes per controller.
///
/// ```ignore
/// static UART: Uart<'static, BoardUart, BoardGpio> = Uart::new(BoardUart, &GPIO, [
///     None,
///     Some(UartConfig::new(UartId::Usart2, RX, TX)),
///     None, None, None, None,
/// ]);
/// ```
pub struct Uart<'g, H: UartHw, G: GpioHw, const N: usize = DEFAULT_FIFO_SIZE> {
    hw: H,
    gpio: &'g Gpio<G>,
    channels: [Channel<N>; UART_COUNT],
}

impl<'g, H: UartHw, G: GpioHw, const N: usize> Uart<'g, H, G, N> {
    /// Creates a manager for the controllers wired as `configs`, indexed by
    /// [`UartId::index`]. `None` marks a controller the board doesn't use.
    pub const fn new(hw: H, gpio: &'g Gpio<G>, configs: [Option<UartConfig>; UART_COUNT]) -> Self {
        Self {
            hw,
            gpio,
            channels: [
                Channel::new(configs[0]),
                Channel::new(configs[1]),
                Channel::new(configs[2]),
                Channel::new(configs[3]),
                Channel::new(configs[4]),
                Channel::new(configs[5]),
            ],
        }
    }

    /// Hardware backend.
    pub fn hw(&self) -> &H {
        &self.hw
    }

    fn channel(&self, id: UartId) -> Result<(&Channel<N>, UartConfig)> {
        let ch = &self.channels[id.index()];
        ch.config.map(|c| (ch, c)).ok_or(Error::InvalidParameter)
    }

    fn ready_channel(&self, id: UartId) -> Result<(&Channel<N>, UartConfig)> {
        let (ch, config) = self.channel(id)?;
        if !ch.is_initialized() {
            return Err(Error::Failure);
        }
        Ok((ch, config))
    }

    /// Brings controller `id` up: claims its pins, configures the line at
    /// the current baud rate and empties its receive FIFO. Reception is
    /// not started; see [`rx_buffering_start`][Uart::rx_buffering_start].
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the controller isn't wired.
    /// - `NotAvailable` if it's already up.
    /// - `Failure` if the hardware refuses to come up.
    pub async fn init(&self, id: UartId) -> Result<()> {
        let (ch, config) = self.channel(id)?;
        if ch.is_initialized() {
            return Err(Error::NotAvailable);
        }
        let _tx = ch.tx_lock.lock().await;
        let _rx = ch.rx_lock.lock().await;
        if ch.is_initialized() {
            return Err(Error::NotAvailable);
        }

        self.gpio.init().await;
        for (pin, mode) in config.pins() {
            self.gpio.config_alt(&pin, mode, Pull::Up, config.alt).await;
        }

        ch.fifo.init();
        ch.clear_rx();
        ch.trigger.store(N / 2, Ordering::Relaxed);
        ch.tx_done.drain();
        ch.tx_status.set(TransferStatus::Done);

        let baud = ch.baud.load(Ordering::Relaxed);
        if let Err(e) = self.hw.bring_up(id, &config, baud) {
            error!("uart: {} bring-up failed: {}", id.name(), e);
            return Err(Error::Failure);
        }
        ch.initialized.store(true, Ordering::Release);
        debug!("uart: {} up at {} baud", id.name(), baud);
        Ok(())
    }

    /// Stops any transfer on controller `id`, reprograms the line at the
    /// current baud rate and empties the receive FIFO. Reception must be
    /// restarted afterwards.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the controller isn't wired.
    /// - `Failure` if it isn't up, or the hardware refuses the new
    ///   configuration.
    pub async fn reset(&self, id: UartId) -> Result<()> {
        let (ch, config) = self.ready_channel(id)?;
        let _tx = ch.tx_lock.lock().await;
        let _rx = ch.rx_lock.lock().await;

        self.hw.abort_tx(id);
        self.hw.abort_rx(id);
        ch.clear_rx();
        ch.tx_done.drain();
        ch.tx_status.set(TransferStatus::Done);

        let baud = ch.baud.load(Ordering::Relaxed);
        self.hw.bring_up(id, &config, baud).map_err(|e| {
            warn!("uart: {} reset failed: {}", id.name(), e);
            Error::Failure
        })?;
        debug!("uart: {} reset at {} baud", id.name(), baud);
        Ok(())
    }

    /// Shuts controller `id` down and releases its pins.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the controller isn't wired.
    /// - `Failure` if it isn't up.
    pub async fn deinit(&self, id: UartId) -> Result<()> {
        let (ch, config) = self.ready_channel(id)?;
        let _tx = ch.tx_lock.lock().await;
        let _rx = ch.rx_lock.lock().await;

        self.hw.abort_tx(id);
        self.hw.abort_rx(id);
        self.hw.shut_down(id);
        ch.clear_rx();
        ch.initialized.store(false, Ordering::Release);
        for (pin, _) in config.pins() {
            self.gpio.release(&pin).await;
        }
        debug!("uart: {} down", id.name());
        Ok(())
    }

    /// Sends `buf` in the controller's interrupt or DMA transmit mode, and
    /// returns the number of bytes sent.
    ///
    /// `timeout` bounds both the wait for the transmit path and the wait
    /// for the transmit to finish.
    ///
    /// # Errors
    ///
    /// The error carries the number of bytes that went out anyway.
    ///
    /// - `InvalidParameter` for an empty buffer or an unwired controller.
    /// - `NotSupported` if the controller transmits by polling; use
    ///   [`tx_polling`][Uart::tx_polling].
    /// - `Timeout` if the transmit path wasn't obtained in time (0 bytes),
    ///   or the transmit didn't finish (it was aborted).
    /// - `Failure` if the controller isn't up or the hardware flagged an
    ///   error (0 bytes).
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Weak.
    ///
    /// Dropping the future mid-transmit aborts the transmit. Some bytes may
    /// already have been sent.
    pub async fn tx(&self, id: UartId, buf: &[u8], timeout: Millis) -> Result<usize, PartialTransfer> {
        let (ch, config) = self.channel(id).map_err(PartialTransfer::none)?;
        if buf.is_empty() {
            return Err(PartialTransfer::none(Error::InvalidParameter));
        }
        let Some(_guard) = with_timeout(timeout, ch.tx_lock.lock()).await else {
            warn!("uart: {} tx busy", id.name());
            return Err(PartialTransfer::none(Error::Timeout));
        };
        if !ch.is_initialized() {
            return Err(PartialTransfer::none(Error::Failure));
        }
        if config.tx_mode == XferMode::Polling {
            return Err(PartialTransfer::none(Error::NotSupported));
        }

        ch.tx_done.drain();
        ch.tx_status.set(TransferStatus::Wait);
        // Until disarmed, leaving this function stops the hardware first.
        let abort = scopeguard::guard((), |()| {
            self.hw.abort_tx(id);
            warn!("uart: {} tx aborted", id.name());
        });

        self.hw
            .start_tx(id, config.tx_mode, buf)
            .map_err(|e| PartialTransfer::none(e.into()))?;
        let _ = with_timeout(timeout, ch.tx_done.take()).await;

        let sent = buf.len() - self.hw.tx_remaining(id).min(buf.len());
        match ch.tx_status.get() {
            TransferStatus::Done => {
                ScopeGuard::into_inner(abort);
                Ok(sent)
            }
            TransferStatus::Error => Err(PartialTransfer::none(Error::Failure)),
            TransferStatus::Wait => Err(PartialTransfer { error: Error::Timeout, bytes: sent }),
        }
    }

    /// Sends `buf` by polling, whatever the controller's transmit mode, and
    /// returns the number of bytes sent. The calling task does not yield
    /// while the hardware works.
    ///
    /// # Errors
    ///
    /// As for [`tx`][Uart::tx], except `NotSupported`. A hardware timeout
    /// reports the bytes sent before it.
    pub async fn tx_polling(&self, id: UartId, buf: &[u8], timeout: Millis) -> Result<usize, PartialTransfer> {
        let (ch, _) = self.channel(id).map_err(PartialTransfer::none)?;
        if buf.is_empty() {
            return Err(PartialTransfer::none(Error::InvalidParameter));
        }
        let Some(_guard) = with_timeout(timeout, ch.tx_lock.lock()).await else {
            return Err(PartialTransfer::none(Error::Timeout));
        };
        if !ch.is_initialized() {
            return Err(PartialTransfer::none(Error::Failure));
        }

        let result = self.hw.write_blocking(id, buf, timeout);
        let sent = buf.len() - self.hw.tx_remaining(id).min(buf.len());
        self.polled_outcome(id, result, sent, || self.hw.abort_tx(id))
    }

    /// Receives exactly `buf.len()` bytes by polling, bypassing the FIFO,
    /// and returns the number received.
    ///
    /// # Errors
    ///
    /// - `Busy` while continuous reception is running.
    /// - Otherwise as for [`tx_polling`][Uart::tx_polling].
    pub async fn rx_polling(&self, id: UartId, buf: &mut [u8], timeout: Millis) -> Result<usize, PartialTransfer> {
        let (ch, _) = self.channel(id).map_err(PartialTransfer::none)?;
        if buf.is_empty() {
            return Err(PartialTransfer::none(Error::InvalidParameter));
        }
        let Some(_guard) = with_timeout(timeout, ch.rx_lock.lock()).await else {
            return Err(PartialTransfer::none(Error::Timeout));
        };
        if !ch.is_initialized() {
            return Err(PartialTransfer::none(Error::Failure));
        }
        if ch.buffering.load(Ordering::Acquire) {
            return Err(PartialTransfer::none(Error::Busy));
        }

        let len = buf.len();
        let result = self.hw.read_blocking(id, buf, timeout);
        let received = len - self.hw.rx_remaining(id).min(len);
        self.polled_outcome(id, result, received, || self.hw.abort_rx(id))
    }

    fn polled_outcome(
        &self,
        id: UartId,
        result: Result<(), HalError>,
        bytes: usize,
        abort: impl FnOnce(),
    ) -> Result<usize, PartialTransfer> {
        match result {
            Ok(()) => Ok(bytes),
            Err(e) => {
                abort();
                warn!("uart: {} polled transfer failed: {}", id.name(), e);
                let error = Error::from(e);
                let bytes = if error == Error::Timeout { bytes } else { 0 };
                Err(PartialTransfer { error, bytes })
            }
        }
    }

    /// Starts continuous reception into the FIFO, which is emptied first.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the controller isn't wired.
    /// - `Failure` if it isn't up.
    /// - `NotSupported` if it receives by polling.
    /// - `Busy` if reception is already running, or the hardware says so.
    pub async fn rx_buffering_start(&self, id: UartId) -> Result<()> {
        let (ch, config) = self.ready_channel(id)?;
        let _guard = ch.rx_lock.lock().await;
        if config.rx_mode == XferMode::Polling {
            return Err(Error::NotSupported);
        }
        if ch.buffering.load(Ordering::Acquire) {
            return Err(Error::Busy);
        }

        ch.clear_rx();
        // Safety: the FIFO lives as long as `self`, and every path that
        // forgets about reception (stop, reset, deinit, drop) aborts it first.
        unsafe { self.hw.start_rx(id, config.rx_mode, ch.fifo.storage_ptr(), N) }.map_err(|e| {
            warn!("uart: {} cannot start reception: {}", id.name(), e);
            Error::from(e)
        })?;
        ch.buffering.store(true, Ordering::Release);
        debug!("uart: {} buffering in {} mode", id.name(), config.rx_mode);
        Ok(())
    }

    /// Stops continuous reception and discards whatever was buffered.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the controller isn't wired.
    /// - `Failure` if it isn't up.
    pub async fn rx_buffering_stop(&self, id: UartId) -> Result<()> {
        let (ch, _) = self.ready_channel(id)?;
        let _guard = ch.rx_lock.lock().await;
        self.hw.abort_rx(id);
        ch.clear_rx();
        debug!("uart: {} buffering stopped", id.name());
        Ok(())
    }

    /// Moves up to `buf.len()` buffered bytes into `buf` and returns how
    /// many were moved.
    ///
    /// If the FIFO holds anything, this returns at once. Otherwise it waits
    /// until the FIFO reaches the trigger level or the line goes idle with
    /// data buffered, and then copies what's there.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for an empty buffer or an unwired controller.
    /// - `Failure` if the controller isn't up, or the hardware flagged a
    ///   receive error while nothing was buffered.
    /// - `Timeout` if nothing arrived in time.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    ///
    /// Bytes are only taken from the FIFO in the poll that resolves the
    /// future.
    pub async fn rx(&self, id: UartId, buf: &mut [u8], timeout: Millis) -> Result<usize> {
        let (ch, _) = self.channel(id)?;
        if buf.is_empty() {
            return Err(Error::InvalidParameter);
        }
        let Some(_guard) = with_timeout(timeout, ch.rx_lock.lock()).await else {
            return Err(Error::Timeout);
        };
        if !ch.is_initialized() {
            return Err(Error::Failure);
        }

        let waited = with_timeout(timeout, async {
            loop {
                if ch.fifo.count(false) > 0 {
                    return Ok(());
                }
                ch.rx_status.set(TransferStatus::Wait);
                ch.rx_ready.take().await;
                if ch.rx_status.get() == TransferStatus::Error {
                    ch.rx_status.set(TransferStatus::Done);
                    return Err(Error::Failure);
                }
                // A signal with nothing buffered is stale; go round again.
            }
        })
        .await;

        let copied = ch.fifo.copy_out(buf, false);
        match waited {
            _ if copied > 0 => Ok(copied),
            Some(Err(e)) => Err(e),
            _ => Err(Error::Timeout),
        }
    }

    /// Sets how many buffered bytes wake a waiting reader.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for an unwired controller, or a level of 0 or
    ///   more than the FIFO size.
    /// - `Busy` while reception is running, or while another task holds the
    ///   receive path.
    pub fn rx_trigger_level_set(&self, id: UartId, level: usize) -> Result<()> {
        let (ch, _) = self.channel(id)?;
        if level == 0 || level > N {
            return Err(Error::InvalidParameter);
        }
        // Buffering only starts under this lock, so it can't start between
        // the check and the store.
        let Some(_guard) = ch.rx_lock.try_lock() else {
            return Err(Error::Busy);
        };
        if ch.buffering.load(Ordering::Acquire) {
            return Err(Error::Busy);
        }
        ch.trigger.store(level, Ordering::Relaxed);
        Ok(())
    }

    /// Current trigger level.
    pub fn rx_trigger_level_get(&self, id: UartId) -> Result<usize> {
        let (ch, _) = self.channel(id)?;
        Ok(ch.trigger.load(Ordering::Relaxed))
    }

    /// Highest FIFO fill seen since reception last started.
    pub fn rx_water_mark_get(&self, id: UartId) -> Result<usize> {
        let (ch, _) = self.channel(id)?;
        Ok(ch.water_mark.load(Ordering::Relaxed))
    }

    /// Bytes currently buffered.
    pub fn rx_byte_count_get(&self, id: UartId) -> Result<usize> {
        let (ch, _) = self.channel(id)?;
        Ok(ch.fifo.count(false))
    }

    /// Size of the receive FIFO.
    pub fn rx_fifo_size_get(&self, id: UartId) -> Result<usize> {
        self.channel(id)?;
        Ok(N)
    }

    /// Changes the line rate used by the next [`init`][Uart::init] or
    /// [`reset`][Uart::reset].
    pub fn baud_rate_set(&self, id: UartId, baud: u32) -> Result<()> {
        let (ch, _) = self.channel(id)?;
        if baud == 0 {
            return Err(Error::InvalidParameter);
        }
        ch.baud.store(baud, Ordering::Relaxed);
        Ok(())
    }

    /// Line rate for the next [`init`][Uart::init] or [`reset`][Uart::reset].
    pub fn baud_rate_get(&self, id: UartId) -> Result<u32> {
        let (ch, _) = self.channel(id)?;
        Ok(ch.baud.load(Ordering::Relaxed))
    }

    /// Whether controller `id` has been brought up.
    pub fn is_initialized(&self, id: UartId) -> bool {
        self.channels[id.index()].is_initialized()
    }

    /// Whether controller `id` is receiving into its FIFO.
    pub fn is_buffering(&self, id: UartId) -> bool {
        self.channels[id.index()].buffering.load(Ordering::Acquire)
    }

    /// Received-byte entry point, for interrupt-mode reception. Call from
    /// the controller's interrupt handler with the byte just read from the
    /// data register.
    pub fn on_rx_byte(&self, id: UartId, byte: u8) {
        let ch = &self.channels[id.index()];
        let count = ch.fifo.write_overwrite(byte, true);
        if count == ch.trigger.load(Ordering::Relaxed) {
            ch.rx_status.set(TransferStatus::Done);
            ch.rx_ready.give();
        }
        ch.water_mark.fetch_max_polyfill(count, Ordering::Relaxed);
    }

    /// Idle-line entry point. Call from the controller's interrupt handler
    /// after clearing the idle flag.
    pub fn on_rx_idle(&self, id: UartId) {
        let ch = &self.channels[id.index()];
        let count = match ch.config.map(|c| c.rx_mode) {
            Some(XferMode::Dma) => self.publish_dma_position(ch, id),
            _ => ch.fifo.count(true),
        };
        if count > 0 {
            ch.rx_status.set(TransferStatus::Done);
            ch.rx_ready.give();
        }
    }

    /// Receive DMA entry point. Call from the stream's interrupt handler on
    /// both the half-transfer and transfer-complete events.
    pub fn on_rx_dma(&self, id: UartId) {
        let ch = &self.channels[id.index()];
        self.publish_dma_position(ch, id);
        ch.rx_status.set(TransferStatus::Done);
        ch.rx_ready.give();
    }

    fn publish_dma_position(&self, ch: &Channel<N>, id: UartId) -> usize {
        let remaining = self.hw.rx_remaining(id).min(N);
        let count = ch.fifo.sync_write_position(N - remaining, true);
        ch.water_mark.fetch_max_polyfill(count, Ordering::Relaxed);
        count
    }

    /// Receive-error entry point. Call from the controller's interrupt
    /// handler on overrun, framing or noise errors.
    pub fn on_rx_error(&self, id: UartId) {
        let ch = &self.channels[id.index()];
        ch.rx_status.set(TransferStatus::Error);
        ch.rx_ready.give();
    }

    /// Transmit-complete entry point. Call from the controller's interrupt
    /// (or DMA) handler once the last byte has left.
    pub fn on_tx_complete(&self, id: UartId) {
        let ch = &self.channels[id.index()];
        ch.tx_status.set(TransferStatus::Done);
        ch.tx_done.give();
    }

    /// Transmit-error entry point.
    pub fn on_tx_error(&self, id: UartId) {
        let ch = &self.channels[id.index()];
        ch.tx_status.set(TransferStatus::Error);
        ch.tx_done.give();
    }
}

impl<H: UartHw, G: GpioHw, const N: usize> Drop for Uart<'_, H, G, N> {
    fn drop(&mut self) {
        for id in UartId::ALL {
            if self.channels[id.index()].buffering.load(Ordering::Acquire) {
                self.hw.abort_rx(id);
            }
        }
    }
}

impl<H: UartHw + fmt::Debug, G: GpioHw, const N: usize> fmt::Debug for Uart<'_, H, G, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uart")
            .field("hw", &self.hw)
            .field("fifo_size", &N)
            .finish_non_exhaustive()
    }
}
