// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A pretend board shared by the integration tests.
//!
//! One [`Board`] implements all four hardware traits, so the GPIO writes
//! made on behalf of SPI chip-selects and the SPI transfers themselves land
//! in a single event log, in order.

#![allow(dead_code)]

use std::cell::Cell;
use std::sync::{Mutex, MutexGuard};

use stm32f4_periph::error::HalError;
use stm32f4_periph::exec::yield_cpu;
use stm32f4_periph::gpio::{ExtiIrq, GpioHw, GpioPin, PinConfig, Port, PORT_COUNT};
use stm32f4_periph::rtc::{Alarm, AlarmId, AlarmMatch, ClockSource, DateTime, RtcHw, WakeupClock};
use stm32f4_periph::spi::{SpiBuffers, SpiHw, SpiId, SpiSettings, SPI_COUNT};
use stm32f4_periph::time::{self, Millis};
use stm32f4_periph::uart::{UartConfig, UartHw, UartId, UART_COUNT};
use stm32f4_periph::xfer::XferMode;

pub const LED: GpioPin = GpioPin::new("LED", Port::D, 12);
pub const BUTTON: GpioPin = GpioPin::new("BUTTON", Port::A, 0);

pub const SPI1_SCLK: GpioPin = GpioPin::new("SPI1_SCLK", Port::A, 5);
pub const SPI1_MISO: GpioPin = GpioPin::new("SPI1_MISO", Port::A, 6);
pub const SPI1_MOSI: GpioPin = GpioPin::new("SPI1_MOSI", Port::A, 7);
pub const CS_FLASH: GpioPin = GpioPin::new("CS_FLASH", Port::B, 6);
pub const CS_SENSOR: GpioPin = GpioPin::new("CS_SENSOR", Port::B, 7);

pub const UART2_TX: GpioPin = GpioPin::new("UART2_TX", Port::A, 2);
pub const UART2_RX: GpioPin = GpioPin::new("UART2_RX", Port::A, 3);
pub const UART6_TX: GpioPin = GpioPin::new("UART6_TX", Port::C, 6);
pub const UART6_RX: GpioPin = GpioPin::new("UART6_RX", Port::C, 7);

/// Generous timeout for waits that are expected to succeed. The tick
/// counter is shared by every test in the binary, so short timeouts could
/// expire because of another test's clock.
pub const PLENTY: Millis = Millis(60_000);

/// Something the board saw, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    PortClock(Port, bool),
    PinWrite(Port, u16, bool),
    SpiUp(SpiId),
    SpiDown(SpiId),
    SpiConfigure(SpiId, SpiSettings),
    SpiStart(SpiId, Vec<u8>),
    SpiBlocking(SpiId, Vec<u8>),
    SpiAbort(SpiId),
    UartUp(UartId, u32),
    UartDown(UartId),
    UartStartTx(UartId, Vec<u8>),
    UartAbortTx(UartId),
    UartStartRx(UartId, XferMode),
    UartAbortRx(UartId),
}

/// Where a pretend circular DMA stream is writing.
#[derive(Copy, Clone, Debug)]
pub struct RxStream {
    pub addr: usize,
    pub len: usize,
    pub pos: usize,
}

#[derive(Debug, Default)]
pub struct BoardState {
    pub log: Vec<Event>,

    pub clocks: [bool; PORT_COUNT],
    pub levels: [u16; PORT_COUNT],
    pub configured: Vec<(Port, u16, PinConfig)>,
    pub resets: Vec<(Port, u16)>,
    pub exti_enabled: Vec<ExtiIrq>,
    pub exti_pending: u16,

    pub spi_fail_bring_up: bool,
    pub spi_stall: bool,
    pub spi_start_error: Option<HalError>,
    pub spi_remaining: [(usize, usize); SPI_COUNT],
    /// Directions of the last transfer: (transmits, receives).
    pub spi_last_kind: Option<(bool, bool)>,
    pub spi_up_modes: [Option<XferMode>; SPI_COUNT],
    pub spi_last_mode: Option<XferMode>,

    pub uart_fail_bring_up: bool,
    pub uart_baud: [Option<u32>; UART_COUNT],
    /// Bytes a transmit gets out before stalling; `None` for all of them.
    pub uart_tx_accept: Option<usize>,
    pub uart_tx_remaining: [usize; UART_COUNT],
    pub uart_sent: Vec<u8>,
    pub uart_rx: [Option<RxStream>; UART_COUNT],
    pub uart_rx_remaining: [usize; UART_COUNT],
    /// Bytes waiting on the wire for a polled receive.
    pub uart_incoming: Vec<u8>,

    pub lse: bool,
    pub rtc_fail_init: bool,
    pub rtc_fail_wakeup: bool,
    pub rtc_clock: Option<(ClockSource, (u8, u16))>,
    pub rtc_irqs: Option<(u8, u8)>,
    pub calendar: Option<DateTime>,
    pub alarms: [Option<Alarm>; 2],
    pub alarm_enabled: [bool; 2],
    pub wakeup: Option<(u16, WakeupClock)>,
    pub backup: [u32; 20],
}

#[derive(Debug, Default)]
pub struct Board {
    state: Mutex<BoardState>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap()
    }

    pub fn log(&self) -> Vec<Event> {
        self.lock().log.clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.lock().log.iter().filter(|e| pred(e)).count()
    }

    pub fn level(&self, pin: &GpioPin) -> bool {
        self.lock().levels[pin.port.index()] & pin.mask() != 0
    }

    /// Raises EXTI line `line`.
    pub fn pend_exti(&self, line: u8) {
        self.lock().exti_pending |= 1 << line;
    }

    /// Plays the DMA engine: writes `bytes` into the reception buffer and
    /// updates the stream's remaining count.
    pub fn dma_receive(&self, id: UartId, bytes: &[u8]) {
        let mut s = self.lock();
        let i = id.index();
        let mut rx = s.uart_rx[i].expect("reception not started");
        for &b in bytes {
            // Safety: the manager keeps the buffer alive while reception
            // runs, and this test is the only writer.
            unsafe { *(rx.addr as *mut u8).add(rx.pos) = b };
            rx.pos = (rx.pos + 1) % rx.len;
        }
        s.uart_rx[i] = Some(rx);
        s.uart_rx_remaining[i] = rx.len - rx.pos;
    }
}

fn spi_move(s: &mut BoardState, bus: SpiId, bufs: SpiBuffers<'_>) -> Vec<u8> {
    let len = bufs.len();
    s.spi_last_kind = Some((bufs.has_tx(), bufs.has_rx()));
    if s.spi_stall {
        s.spi_remaining[bus.index()] = (len, len);
        return match bufs {
            SpiBuffers::Tx(t) | SpiBuffers::TxRx(t, _) => t.to_vec(),
            SpiBuffers::Rx(_) => Vec::new(),
        };
    }
    s.spi_remaining[bus.index()] = (0, 0);
    match bufs {
        SpiBuffers::Tx(t) => t.to_vec(),
        SpiBuffers::Rx(r) => {
            r.fill(0x5A);
            Vec::new()
        }
        SpiBuffers::TxRx(t, r) => {
            for (o, i) in r.iter_mut().zip(t) {
                *o = !*i;
            }
            t.to_vec()
        }
    }
}

impl GpioHw for &Board {
    fn set_port_clock(&self, port: Port, on: bool) {
        let mut s = self.lock();
        s.clocks[port.index()] = on;
        s.log.push(Event::PortClock(port, on));
    }

    fn configure(&self, port: Port, mask: u16, config: &PinConfig) {
        let mut s = self.lock();
        assert!(s.clocks[port.index()], "configured {:?} with its clock off", port);
        s.configured.push((port, mask, *config));
    }

    fn reset(&self, port: Port, mask: u16) {
        self.lock().resets.push((port, mask));
    }

    fn read(&self, port: Port, mask: u16) -> bool {
        self.lock().levels[port.index()] & mask != 0
    }

    fn write(&self, port: Port, mask: u16, high: bool) {
        let mut s = self.lock();
        if high {
            s.levels[port.index()] |= mask;
        } else {
            s.levels[port.index()] &= !mask;
        }
        s.log.push(Event::PinWrite(port, mask, high));
    }

    fn toggle(&self, port: Port, mask: u16) {
        self.lock().levels[port.index()] ^= mask;
    }

    fn enable_exti_irq(&self, irq: ExtiIrq, _priority: u8, _subpriority: u8) {
        let mut s = self.lock();
        if !s.exti_enabled.contains(&irq) {
            s.exti_enabled.push(irq);
        }
    }

    fn disable_exti_irq(&self, irq: ExtiIrq) {
        self.lock().exti_enabled.retain(|i| *i != irq);
    }

    fn take_exti_pending(&self, lines: u16) -> u16 {
        let mut s = self.lock();
        let pending = s.exti_pending & lines;
        s.exti_pending &= !lines;
        pending
    }
}

impl SpiHw for &Board {
    fn bring_up(&self, bus: SpiId, mode: XferMode) -> Result<(), HalError> {
        let mut s = self.lock();
        if s.spi_fail_bring_up {
            return Err(HalError::Error);
        }
        s.spi_up_modes[bus.index()] = Some(mode);
        s.log.push(Event::SpiUp(bus));
        Ok(())
    }

    fn shut_down(&self, bus: SpiId) {
        self.lock().log.push(Event::SpiDown(bus));
    }

    fn configure(&self, bus: SpiId, settings: &SpiSettings) -> Result<(), HalError> {
        self.lock().log.push(Event::SpiConfigure(bus, *settings));
        Ok(())
    }

    fn start(&self, bus: SpiId, mode: XferMode, bufs: SpiBuffers<'_>) -> Result<(), HalError> {
        let mut s = self.lock();
        if let Some(e) = s.spi_start_error {
            return Err(e);
        }
        s.spi_last_mode = Some(mode);
        let sent = spi_move(&mut s, bus, bufs);
        s.log.push(Event::SpiStart(bus, sent));
        Ok(())
    }

    fn transfer_blocking(
        &self,
        bus: SpiId,
        bufs: SpiBuffers<'_>,
        _timeout: Millis,
    ) -> Result<(), HalError> {
        let mut s = self.lock();
        let sent = spi_move(&mut s, bus, bufs);
        s.log.push(Event::SpiBlocking(bus, sent));
        if s.spi_stall {
            Err(HalError::Timeout)
        } else {
            Ok(())
        }
    }

    fn remaining(&self, bus: SpiId) -> (usize, usize) {
        self.lock().spi_remaining[bus.index()]
    }

    fn abort(&self, bus: SpiId) {
        self.lock().log.push(Event::SpiAbort(bus));
    }
}

impl UartHw for &Board {
    fn bring_up(&self, id: UartId, _config: &UartConfig, baud: u32) -> Result<(), HalError> {
        let mut s = self.lock();
        if s.uart_fail_bring_up {
            return Err(HalError::Error);
        }
        s.uart_baud[id.index()] = Some(baud);
        s.log.push(Event::UartUp(id, baud));
        Ok(())
    }

    fn shut_down(&self, id: UartId) {
        let mut s = self.lock();
        s.uart_baud[id.index()] = None;
        s.log.push(Event::UartDown(id));
    }

    fn start_tx(&self, id: UartId, _mode: XferMode, buf: &[u8]) -> Result<(), HalError> {
        let mut s = self.lock();
        let sent = s.uart_tx_accept.unwrap_or(buf.len()).min(buf.len());
        s.uart_sent.extend_from_slice(&buf[..sent]);
        s.uart_tx_remaining[id.index()] = buf.len() - sent;
        s.log.push(Event::UartStartTx(id, buf.to_vec()));
        Ok(())
    }

    fn write_blocking(&self, id: UartId, buf: &[u8], _timeout: Millis) -> Result<(), HalError> {
        let mut s = self.lock();
        let sent = s.uart_tx_accept.unwrap_or(buf.len()).min(buf.len());
        s.uart_sent.extend_from_slice(&buf[..sent]);
        s.uart_tx_remaining[id.index()] = buf.len() - sent;
        if sent < buf.len() {
            Err(HalError::Timeout)
        } else {
            Ok(())
        }
    }

    fn tx_remaining(&self, id: UartId) -> usize {
        self.lock().uart_tx_remaining[id.index()]
    }

    fn abort_tx(&self, id: UartId) {
        self.lock().log.push(Event::UartAbortTx(id));
    }

    unsafe fn start_rx(&self, id: UartId, mode: XferMode, buf: *mut u8, len: usize) -> Result<(), HalError> {
        let mut s = self.lock();
        s.uart_rx[id.index()] = Some(RxStream { addr: buf as usize, len, pos: 0 });
        s.uart_rx_remaining[id.index()] = len;
        s.log.push(Event::UartStartRx(id, mode));
        Ok(())
    }

    fn read_blocking(&self, id: UartId, buf: &mut [u8], _timeout: Millis) -> Result<(), HalError> {
        let mut s = self.lock();
        let n = buf.len().min(s.uart_incoming.len());
        buf[..n].copy_from_slice(&s.uart_incoming[..n]);
        s.uart_incoming.drain(..n);
        s.uart_rx_remaining[id.index()] = buf.len() - n;
        if n < buf.len() {
            Err(HalError::Timeout)
        } else {
            Ok(())
        }
    }

    fn rx_remaining(&self, id: UartId) -> usize {
        self.lock().uart_rx_remaining[id.index()]
    }

    fn abort_rx(&self, id: UartId) {
        let mut s = self.lock();
        s.uart_rx[id.index()] = None;
        s.log.push(Event::UartAbortRx(id));
    }
}

fn alarm_slot(id: AlarmId) -> usize {
    match id {
        AlarmId::Alarm1 => 0,
        AlarmId::Alarm2 => 1,
    }
}

impl RtcHw for &Board {
    fn lse_ready(&self) -> bool {
        self.lock().lse
    }

    fn init(&self, source: ClockSource, prescalers: (u8, u16)) -> Result<(), HalError> {
        let mut s = self.lock();
        if s.rtc_fail_init {
            return Err(HalError::Timeout);
        }
        s.rtc_clock = Some((source, prescalers));
        Ok(())
    }

    fn enable_irqs(&self, priority: u8, subpriority: u8) {
        self.lock().rtc_irqs = Some((priority, subpriority));
    }

    fn calendar(&self) -> Result<DateTime, HalError> {
        self.lock().calendar.ok_or(HalError::Error)
    }

    fn set_calendar(&self, now: &DateTime) -> Result<(), HalError> {
        self.lock().calendar = Some(*now);
        Ok(())
    }

    fn alarm(&self, id: AlarmId) -> Result<Alarm, HalError> {
        Ok(self.lock().alarms[alarm_slot(id)].unwrap_or(Alarm {
            matches: AlarmMatch::Date(1),
            hour: 0,
            minute: 0,
            second: 0,
        }))
    }

    fn set_alarm(&self, id: AlarmId, alarm: &Alarm) -> Result<(), HalError> {
        let mut s = self.lock();
        s.alarms[alarm_slot(id)] = Some(*alarm);
        s.alarm_enabled[alarm_slot(id)] = true;
        Ok(())
    }

    fn deactivate_alarm(&self, id: AlarmId) -> Result<(), HalError> {
        self.lock().alarm_enabled[alarm_slot(id)] = false;
        Ok(())
    }

    fn set_wakeup(&self, counter: u16, clock: WakeupClock) -> Result<(), HalError> {
        let mut s = self.lock();
        if s.rtc_fail_wakeup {
            return Err(HalError::Timeout);
        }
        s.wakeup = Some((counter, clock));
        Ok(())
    }

    fn wakeup_counter(&self) -> u16 {
        self.lock().wakeup.map_or(0, |(c, _)| c)
    }

    fn deactivate_wakeup(&self) -> Result<(), HalError> {
        self.lock().wakeup = None;
        Ok(())
    }

    fn backup_read(&self, reg: usize) -> u32 {
        self.lock().backup[reg]
    }

    fn backup_write(&self, reg: usize, value: u32) {
        self.lock().backup[reg] = value;
    }
}

/// Ticks the clock, one millisecond per poll, until `done` is set.
pub async fn run_clock(done: &Cell<bool>) {
    while !done.get() {
        time::tick();
        yield_cpu().await;
    }
}

/// Number of interrupt- or DMA-driven SPI transfers started so far.
pub fn spi_starts(board: &Board) -> usize {
    board.count(|e| matches!(e, Event::SpiStart(..)))
}

/// Yields until `cond` holds.
pub async fn wait_for(cond: impl Fn() -> bool) {
    while !cond() {
        yield_cpu().await;
    }
}
