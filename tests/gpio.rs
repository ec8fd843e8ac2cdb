// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::executor::block_on;

use common::{Board, Event, BUTTON, LED};
use stm32f4_periph::error::Error;
use stm32f4_periph::gpio::{Edge, ExtiIrq, Gpio, GpioPin, Mode, Pull, Port};

const LED2: GpioPin = GpioPin::new("LED2", Port::D, 13);
const IMPOSTOR: GpioPin = GpioPin::new("IMPOSTOR", Port::D, 12);

fn counter_handler() -> (Arc<AtomicUsize>, &'static (dyn Fn() + Sync)) {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let handler: &'static (dyn Fn() + Sync) = Box::leak(Box::new(move || {
        h.fetch_add(1, Ordering::SeqCst);
    }));
    (hits, handler)
}

#[test]
fn init_resets_every_port_once() {
    let board = Board::new();
    let gpio = Gpio::new(&board);
    block_on(async {
        gpio.init().await;
        gpio.init().await;
    });
    let s = board.lock();
    assert_eq!(s.resets.len(), 9);
    assert!(s.resets.iter().all(|&(_, mask)| mask == 0xFFFF));
    assert!(s.clocks.iter().all(|on| !on));
}

#[test]
fn port_clock_follows_refcount() {
    let board = Board::new();
    let gpio = Gpio::new(&board);
    block_on(async {
        gpio.init().await;
        board.lock().log.clear();

        gpio.config_out(&LED, false).await;
        assert_eq!(gpio.refcount(Port::D).await, 1);
        assert!(gpio.clock_on(Port::D).await);

        gpio.config_out(&LED2, false).await;
        assert_eq!(gpio.refcount(Port::D).await, 2);

        gpio.release(&LED).await;
        assert_eq!(gpio.refcount(Port::D).await, 1);
        assert!(gpio.clock_on(Port::D).await);

        gpio.release(&LED2).await;
        assert_eq!(gpio.refcount(Port::D).await, 0);
        assert!(!gpio.clock_on(Port::D).await);
    });

    let clock_events: Vec<_> = board
        .log()
        .into_iter()
        .filter(|e| matches!(e, Event::PortClock(..)))
        .collect();
    assert_eq!(
        clock_events,
        [Event::PortClock(Port::D, true), Event::PortClock(Port::D, false)]
    );
}

#[test]
fn released_pin_can_be_reclaimed_in_another_mode() {
    let board = Board::new();
    let gpio = Gpio::new(&board);
    block_on(async {
        gpio.init().await;
        gpio.config_out(&LED, true).await;
        assert!(board.level(&LED));
        gpio.release(&LED).await;

        gpio.config_in(&IMPOSTOR, Pull::Up).await;
        let config = gpio.pin_config(&IMPOSTOR).await.unwrap();
        assert_eq!((config.mode, config.pull), (Mode::Input, Pull::Up));
        assert_eq!(gpio.refcount(Port::D).await, 1);
        assert_eq!(gpio.ctx_get("IMPOSTOR").await, Some(IMPOSTOR));
        assert_eq!(gpio.ctx_get("LED").await, None);
    });
}

#[test]
fn releasing_an_unclaimed_pin_does_nothing() {
    let board = Board::new();
    let gpio = Gpio::new(&board);
    block_on(async {
        gpio.init().await;
        gpio.config_out(&LED, false).await;
        let resets = board.lock().resets.len();

        gpio.release(&LED2).await;
        gpio.release(&IMPOSTOR).await;

        assert_eq!(board.lock().resets.len(), resets);
        assert_eq!(gpio.refcount(Port::D).await, 1);
        assert!(!gpio.is_available(&LED).await);
        assert!(gpio.is_available(&LED2).await);
    });
}

#[test]
fn same_name_reconfigures_in_place() {
    let board = Board::new();
    let gpio = Gpio::new(&board);
    block_on(async {
        gpio.init().await;
        gpio.config_out(&LED, false).await;
        gpio.config(&LED, Mode::OutputOpenDrain, Pull::Up).await;
        assert_eq!(gpio.refcount(Port::D).await, 1);
        let config = gpio.pin_config(&LED).await.unwrap();
        assert_eq!(config.mode, Mode::OutputOpenDrain);
    });
}

#[test]
#[should_panic]
fn double_claim_is_fatal() {
    let board = Board::new();
    let gpio = Gpio::new(&board);
    block_on(async {
        gpio.init().await;
        gpio.config_out(&LED, false).await;
        gpio.config_in(&IMPOSTOR, Pull::None).await;
    });
}

#[test]
fn output_level_operations() {
    let board = Board::new();
    let gpio = Gpio::new(&board);
    block_on(async {
        gpio.init().await;
        gpio.config_out(&LED, false).await;
    });
    assert!(!gpio.get(&LED));
    gpio.set(&LED, true);
    assert!(gpio.get(&LED));
    gpio.toggle(&LED);
    assert!(!gpio.get(&LED));
}

#[test]
fn exti_dispatch_and_teardown() {
    let board = Board::new();
    let gpio = Gpio::new(&board);
    let (hits, handler) = counter_handler();
    let (_, other) = counter_handler();
    const OTHER_LINE0: GpioPin = GpioPin::new("OTHER", Port::C, 0);

    block_on(async {
        gpio.init().await;
        gpio.config_interrupt(&BUTTON, Edge::Rising, Pull::Down, handler).await.unwrap();
        assert_eq!(board.lock().exti_enabled, [ExtiIrq::Exti0]);
        assert_eq!(
            gpio.pin_config(&BUTTON).await.unwrap().mode,
            Mode::Interrupt(Edge::Rising)
        );

        // Line 0 belongs to BUTTON, whatever the port.
        assert_eq!(
            gpio.config_interrupt(&OTHER_LINE0, Edge::Both, Pull::None, other).await,
            Err(Error::NotAvailable)
        );
        assert!(gpio.is_available(&OTHER_LINE0).await);

        board.pend_exti(0);
        gpio.on_exti(ExtiIrq::Exti0);
        gpio.on_exti(ExtiIrq::Exti0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        gpio.clear_interrupt(&BUTTON).await;
        assert!(board.lock().exti_enabled.is_empty());
        assert!(gpio.is_available(&BUTTON).await);

        board.pend_exti(0);
        gpio.on_exti(ExtiIrq::Exti0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn shared_exti_vector_stays_enabled_while_any_line_is_used() {
    const A: GpioPin = GpioPin::new("A", Port::E, 5);
    const B: GpioPin = GpioPin::new("B", Port::E, 9);
    let board = Board::new();
    let gpio = Gpio::new(&board);
    let (hits_a, ha) = counter_handler();
    let (hits_b, hb) = counter_handler();

    block_on(async {
        gpio.init().await;
        gpio.config_interrupt(&A, Edge::Falling, Pull::Up, ha).await.unwrap();
        gpio.config_interrupt(&B, Edge::Falling, Pull::Up, hb).await.unwrap();

        board.pend_exti(9);
        gpio.on_exti(ExtiIrq::Exti9_5);
        assert_eq!((hits_a.load(Ordering::SeqCst), hits_b.load(Ordering::SeqCst)), (0, 1));

        gpio.clear_interrupt(&A).await;
        assert_eq!(board.lock().exti_enabled, [ExtiIrq::Exti9_5]);
        gpio.clear_interrupt(&B).await;
        assert!(board.lock().exti_enabled.is_empty());
    });
}

#[test]
fn invalid_pin_number_is_rejected_for_interrupts() {
    let board = Board::new();
    let gpio = Gpio::new(&board);
    let (_, handler) = counter_handler();
    let bad = GpioPin::new("BAD", Port::A, 16);
    block_on(async {
        assert_eq!(
            gpio.config_interrupt(&bad, Edge::Rising, Pull::None, handler).await,
            Err(Error::InvalidParameter)
        );
    });
}
