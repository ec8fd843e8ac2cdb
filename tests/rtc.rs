// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::executor::block_on;

use common::Board;
use stm32f4_periph::error::Error;
use stm32f4_periph::rtc::{
    Alarm, AlarmId, AlarmMatch, ClockSource, DateTime, Dst, Rtc, RtcHandler, WakeupClock,
    Weekday, RTC_PRIORITY, RTC_SUBPRIORITY, WAKEUP_CLOCK_REG, WAKEUP_MAX,
};

const LEAP_DAY: DateTime = DateTime {
    year: 2024,
    month: 2,
    day: 29,
    weekday: Weekday::Thursday,
    hour: 23,
    minute: 59,
    second: 58,
    dst: Dst::Off,
};

const MORNING: Alarm = Alarm {
    matches: AlarmMatch::Weekday(Weekday::Monday),
    hour: 7,
    minute: 30,
    second: 0,
};

static ALARM_HITS: AtomicUsize = AtomicUsize::new(0);
static OTHER_HITS: AtomicUsize = AtomicUsize::new(0);
static WAKEUP_HITS: AtomicUsize = AtomicUsize::new(0);
static REPLACED_HITS: AtomicUsize = AtomicUsize::new(0);

fn count_alarm() {
    ALARM_HITS.fetch_add(1, Ordering::SeqCst);
}

fn count_other() {
    OTHER_HITS.fetch_add(1, Ordering::SeqCst);
}

fn count_replaced() {
    REPLACED_HITS.fetch_add(1, Ordering::SeqCst);
}

fn count_wakeup() {
    WAKEUP_HITS.fetch_add(1, Ordering::SeqCst);
}

const ON_ALARM: RtcHandler = &count_alarm;
const ON_OTHER: RtcHandler = &count_other;
const ON_REPLACED: RtcHandler = &count_replaced;
const ON_WAKEUP: RtcHandler = &count_wakeup;

fn ready_rtc(board: &Board) -> Rtc<&Board> {
    let rtc = Rtc::new(board);
    block_on(rtc.init()).unwrap();
    rtc
}

#[test]
fn init_prefers_the_crystal() {
    let board = Board::new();
    board.lock().lse = true;
    let rtc = ready_rtc(&board);
    assert!(rtc.is_initialized());
    let s = board.lock();
    assert_eq!(s.rtc_clock, Some((ClockSource::Lse, (127, 255))));
    assert_eq!(s.rtc_irqs, Some((RTC_PRIORITY, RTC_SUBPRIORITY)));
}

#[test]
fn init_falls_back_to_the_internal_oscillator() {
    let board = Board::new();
    let rtc = ready_rtc(&board);
    assert_eq!(board.lock().rtc_clock, Some((ClockSource::Lsi, (127, 249))));
    assert_eq!(block_on(rtc.init()), Err(Error::NotAvailable));
}

#[test]
fn failed_init_can_be_retried() {
    let board = Board::new();
    let rtc = Rtc::new(&board);
    board.lock().rtc_fail_init = true;
    assert_eq!(block_on(rtc.init()), Err(Error::Failure));
    assert!(!rtc.is_initialized());
    assert!(board.lock().rtc_irqs.is_none());

    board.lock().rtc_fail_init = false;
    block_on(rtc.init()).unwrap();
}

#[test]
fn everything_waits_for_init() {
    let board = Board::new();
    let rtc = Rtc::new(&board);
    block_on(async {
        assert_eq!(rtc.time_get().await, Err(Error::InvalidParameter));
        assert_eq!(rtc.time_set(&LEAP_DAY).await, Err(Error::InvalidParameter));
        assert_eq!(rtc.alarm_get(AlarmId::Alarm1).await, Err(Error::InvalidParameter));
        assert_eq!(
            rtc.alarm_set(AlarmId::Alarm1, &MORNING).await,
            Err(Error::InvalidParameter)
        );
        assert_eq!(rtc.alarm_delete(AlarmId::Alarm2).await, Err(Error::InvalidParameter));
        assert_eq!(rtc.wakeup_set(10).await, Err(Error::InvalidParameter));
        assert_eq!(rtc.wakeup_get().await, Err(Error::InvalidParameter));
        assert_eq!(rtc.wakeup_delete().await, Err(Error::InvalidParameter));
        assert_eq!(
            rtc.alarm_handler_register(AlarmId::Alarm1, ON_ALARM).await,
            Err(Error::InvalidParameter)
        );
        assert_eq!(rtc.wakeup_handler_register(ON_WAKEUP).await, Err(Error::InvalidParameter));
    });
    assert!(board.lock().rtc_clock.is_none());
}

#[test]
fn calendar_round_trip_and_validation() {
    let board = Board::new();
    let rtc = ready_rtc(&board);
    block_on(async {
        // Nothing was ever written; the hardware read fails.
        assert_eq!(rtc.time_get().await, Err(Error::Failure));

        rtc.time_set(&LEAP_DAY).await.unwrap();
        assert_eq!(rtc.time_get().await, Ok(LEAP_DAY));

        let bad = [
            DateTime { month: 13, ..LEAP_DAY },
            DateTime { year: 2023, ..LEAP_DAY },
            DateTime { year: 2100, ..LEAP_DAY },
            DateTime { hour: 24, ..LEAP_DAY },
            DateTime { minute: 60, ..LEAP_DAY },
            DateTime { second: 60, ..LEAP_DAY },
            DateTime { month: 4, day: 31, ..LEAP_DAY },
        ];
        for when in &bad {
            assert_eq!(rtc.time_set(when).await, Err(Error::InvalidParameter), "{:?}", when);
        }
        assert_eq!(rtc.time_get().await, Ok(LEAP_DAY));
    });
}

#[test]
fn alarms_arm_and_disarm_through_the_backup_flags() {
    let board = Board::new();
    let rtc = ready_rtc(&board);
    block_on(async {
        assert_eq!(rtc.alarm_get(AlarmId::Alarm1).await, Ok(None));

        rtc.alarm_set(AlarmId::Alarm1, &MORNING).await.unwrap();
        assert_eq!(rtc.alarm_get(AlarmId::Alarm1).await, Ok(Some(MORNING)));
        assert_eq!(rtc.alarm_get(AlarmId::Alarm2).await, Ok(None));
        assert_eq!(board.lock().backup[AlarmId::Alarm1.armed_reg()], 1);

        let monthly = Alarm { matches: AlarmMatch::Date(31), hour: 12, ..MORNING };
        rtc.alarm_set(AlarmId::Alarm2, &monthly).await.unwrap();
        assert_eq!(rtc.alarm_get(AlarmId::Alarm2).await, Ok(Some(monthly)));

        rtc.alarm_delete(AlarmId::Alarm1).await.unwrap();
        assert_eq!(rtc.alarm_get(AlarmId::Alarm1).await, Ok(None));
        assert_eq!(board.lock().backup[AlarmId::Alarm1.armed_reg()], 0);
        assert_eq!(board.lock().alarm_enabled, [false, true]);

        let bad = [
            Alarm { hour: 24, ..MORNING },
            Alarm { matches: AlarmMatch::Date(0), ..MORNING },
            Alarm { matches: AlarmMatch::Date(32), ..MORNING },
        ];
        for alarm in &bad {
            assert_eq!(rtc.alarm_set(AlarmId::Alarm1, alarm).await, Err(Error::InvalidParameter));
        }
        assert_eq!(rtc.alarm_get(AlarmId::Alarm1).await, Ok(None));
    });
}

#[test]
fn wakeup_period_uses_both_counter_ranges() {
    let board = Board::new();
    let rtc = ready_rtc(&board);
    block_on(async {
        rtc.wakeup_set(300).await.unwrap();
        assert_eq!(rtc.wakeup_get().await, Ok(300));
        assert_eq!(board.lock().wakeup, Some((300, WakeupClock::Spre16)));

        rtc.wakeup_set(0x1_0005).await.unwrap();
        assert_eq!(rtc.wakeup_get().await, Ok(0x1_0005));
        assert_eq!(board.lock().wakeup, Some((5, WakeupClock::Spre17)));
        assert_eq!(board.lock().backup[WAKEUP_CLOCK_REG], WakeupClock::Spre17.code());

        rtc.wakeup_set(u32::MAX).await.unwrap();
        assert_eq!(rtc.wakeup_get().await, Ok(WAKEUP_MAX));

        rtc.wakeup_delete().await.unwrap();
        assert!(board.lock().wakeup.is_none());
    });
}

#[test]
fn refused_wakeup_keeps_the_previous_period() {
    let board = Board::new();
    let rtc = ready_rtc(&board);
    block_on(async {
        rtc.wakeup_set(300).await.unwrap();
        board.lock().rtc_fail_wakeup = true;
        assert_eq!(rtc.wakeup_set(0x1_0005).await, Err(Error::Failure));
        assert_eq!(board.lock().backup[WAKEUP_CLOCK_REG], WakeupClock::Spre16.code());
        assert_eq!(rtc.wakeup_get().await, Ok(300));
    });
}

#[test]
fn alarm_handlers_are_exclusive_and_survive_disarming() {
    let board = Board::new();
    let rtc = ready_rtc(&board);
    let before = ALARM_HITS.load(Ordering::SeqCst);
    block_on(async {
        rtc.alarm_handler_register(AlarmId::Alarm1, ON_ALARM).await.unwrap();
        assert_eq!(
            rtc.alarm_handler_register(AlarmId::Alarm1, ON_OTHER).await,
            Err(Error::NotAvailable)
        );

        rtc.alarm_set(AlarmId::Alarm1, &MORNING).await.unwrap();
        rtc.on_alarm(AlarmId::Alarm1);
        rtc.on_alarm(AlarmId::Alarm2);
        assert_eq!(ALARM_HITS.load(Ordering::SeqCst), before + 1);

        rtc.alarm_delete(AlarmId::Alarm1).await.unwrap();
        rtc.alarm_set(AlarmId::Alarm1, &MORNING).await.unwrap();
        rtc.on_alarm(AlarmId::Alarm1);
        assert_eq!(ALARM_HITS.load(Ordering::SeqCst), before + 2);

        rtc.alarm_handler_unregister(AlarmId::Alarm1).await.unwrap();
        rtc.on_alarm(AlarmId::Alarm1);
        assert_eq!(ALARM_HITS.load(Ordering::SeqCst), before + 2);

        rtc.alarm_handler_register(AlarmId::Alarm1, ON_OTHER).await.unwrap();
    });
}

#[test]
fn wakeup_handler_is_replaced() {
    let board = Board::new();
    let rtc = ready_rtc(&board);
    block_on(async {
        rtc.wakeup_handler_register(ON_REPLACED).await.unwrap();
        rtc.wakeup_handler_register(ON_WAKEUP).await.unwrap();
        rtc.on_wakeup();
        rtc.wakeup_handler_unregister().await.unwrap();
        rtc.on_wakeup();
    });
    assert_eq!(WAKEUP_HITS.load(Ordering::SeqCst), 1);
    assert_eq!(REPLACED_HITS.load(Ordering::SeqCst), 0);
}
