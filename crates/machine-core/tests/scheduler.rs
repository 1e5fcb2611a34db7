//! Timer ordering, handle lifecycle, and the run loop.

use std::cell::RefCell;
use std::rc::Rc;

use env_logger as _;
use log as _;
use machine_core::{EmuTime, Machine, RunError, RuntimeFault, TimerId, TimerTarget};
use proptest::prelude::*;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

type Fired = Rc<RefCell<Vec<(EmuTime, u64)>>>;

fn recording_machine() -> (Machine, TimerTarget, Fired) {
    let mut machine = Machine::new();
    let fired: Fired = Rc::default();
    let log = Rc::clone(&fired);
    let callback = machine.add_timer_callback(move |machine, _, param| {
        log.borrow_mut().push((machine.now(), param));
    });
    machine.start().expect("starts");
    (machine, TimerTarget::Callback(callback), fired)
}

#[test]
fn equal_expiries_fire_in_registration_order() {
    let (mut machine, target, fired) = recording_machine();
    machine.timer_set(EmuTime::from_micros(5), target, 1);
    machine.timer_set(EmuTime::from_micros(1), target, 2);
    machine.timer_set(EmuTime::from_micros(5), target, 3);

    let outcome = machine.run_for(EmuTime::from_micros(10)).expect("runs");
    assert_eq!(outcome.timers_fired, 3);
    assert_eq!(
        *fired.borrow(),
        vec![
            (EmuTime::from_micros(1), 2),
            (EmuTime::from_micros(5), 1),
            (EmuTime::from_micros(5), 3),
        ]
    );
    assert_eq!(machine.timer_count(), 0);
}

#[test]
fn periodic_timers_rearm_without_drift() {
    let (mut machine, target, fired) = recording_machine();
    let period = EmuTime::from_nanos(333);
    let id = machine.timer_pulse(period, target, 9);

    machine.run_for(EmuTime::from_micros(1)).expect("runs");
    let times: Vec<EmuTime> = fired.borrow().iter().map(|(time, _)| *time).collect();
    assert_eq!(
        times,
        vec![
            EmuTime::from_nanos(333),
            EmuTime::from_nanos(666),
            EmuTime::from_nanos(999)
        ]
    );
    assert_eq!(machine.timer_time_left(id), EmuTime::from_nanos(332));
    assert_eq!(machine.timer_elapsed(id), EmuTime::from_nanos(1));
}

#[test]
fn disabled_and_removed_timers_stay_silent() {
    let (mut machine, target, fired) = recording_machine();
    let paused = machine.timer_alloc(target);
    machine.timer_adjust(paused, EmuTime::from_micros(2), 1, EmuTime::ZERO);
    let removed = machine.timer_alloc(target);
    machine.timer_adjust(removed, EmuTime::from_micros(3), 2, EmuTime::ZERO);

    assert!(machine.timer_enable(paused, false));
    assert!(machine.timer_remove(removed));
    assert!(!machine.timer_remove(removed));
    assert!(!machine.timer_enabled(removed));

    machine.run_for(EmuTime::from_micros(10)).expect("runs");
    assert!(fired.borrow().is_empty());
    assert_eq!(machine.timer_time_left(paused), EmuTime::NEVER);
}

#[test]
fn callbacks_see_their_own_fire_time_and_can_chain() {
    let mut machine = Machine::new();
    let fired: Fired = Rc::default();
    let log = Rc::clone(&fired);
    let callback = machine.add_timer_callback(move |machine, id: TimerId, param| {
        log.borrow_mut().push((machine.now(), param));
        if param < 3 {
            machine.timer_adjust(id, EmuTime::from_micros(2), param + 1, EmuTime::ZERO);
        }
    });
    machine.start().expect("starts");
    let chained = machine.timer_alloc(TimerTarget::Callback(callback));
    machine.timer_adjust(chained, EmuTime::from_micros(1), 1, EmuTime::ZERO);

    machine.run_for(EmuTime::from_micros(20)).expect("runs");
    assert_eq!(
        *fired.borrow(),
        vec![
            (EmuTime::from_micros(1), 1),
            (EmuTime::from_micros(3), 2),
            (EmuTime::from_micros(5), 3),
        ]
    );
}

#[test]
fn zero_delay_fires_after_the_current_callback() {
    let mut machine = Machine::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&order);
    let callback = machine.add_timer_callback(move |machine, id, param| {
        log.borrow_mut().push(param);
        if param == 0 {
            machine.timer_adjust(id, EmuTime::ZERO, 1, EmuTime::ZERO);
            log.borrow_mut().push(2);
        }
    });
    machine.start().expect("starts");
    machine.timer_set(EmuTime::from_micros(4), TimerTarget::Callback(callback), 0);

    machine.run_for(EmuTime::from_micros(5)).expect("runs");
    assert_eq!(*order.borrow(), vec![0, 2, 1]);
}

#[test]
fn removed_callbacks_defuse_pending_timers() {
    let (mut machine, target, fired) = recording_machine();
    let TimerTarget::Callback(callback) = target else {
        unreachable!("recording target is a callback");
    };
    machine.timer_set(EmuTime::from_micros(1), target, 0);
    assert!(machine.remove_timer_callback(callback));

    machine.run_for(EmuTime::from_micros(2)).expect("runs");
    assert!(fired.borrow().is_empty());
    assert_eq!(machine.diagnostics().defused_dispatches, 1);
    assert_eq!(machine.diagnostics().last_fault, Some(RuntimeFault::DefusedTimer));
}

#[test]
fn run_loop_refuses_reentry_and_unstarted_machines() {
    let mut idle = Machine::new();
    assert_eq!(idle.run_for(EmuTime::from_micros(1)), Err(RunError::NotRunning));

    let mut machine = Machine::new();
    let result = Rc::new(RefCell::new(None));
    let seen = Rc::clone(&result);
    let callback = machine.add_timer_callback(move |machine, _, _| {
        *seen.borrow_mut() = Some(machine.run_for(EmuTime::from_micros(1)));
    });
    machine.start().expect("starts");
    machine.timer_set(EmuTime::from_micros(1), TimerTarget::Callback(callback), 0);
    machine.run_for(EmuTime::from_micros(2)).expect("outer run");

    assert_eq!(*result.borrow(), Some(Err(RunError::Reentrant)));
    assert_eq!(machine.diagnostics().reentrancy_violations, 1);
    assert_eq!(machine.now(), EmuTime::from_micros(2));
}

proptest! {
    #[test]
    fn firing_order_is_time_then_registration(
        delays in proptest::collection::vec(0_u64..50, 1..40),
    ) {
        let (mut machine, target, fired) = recording_machine();
        for (param, delay) in delays.iter().enumerate() {
            let param = u64::try_from(param).expect("fits");
            machine.timer_set(EmuTime::from_micros(*delay), target, param);
        }
        machine.run_for(EmuTime::from_micros(60)).expect("runs");

        let mut expected: Vec<(EmuTime, u64)> = delays
            .iter()
            .enumerate()
            .map(|(param, delay)| {
                (EmuTime::from_micros(*delay), u64::try_from(param).expect("fits"))
            })
            .collect();
        expected.sort();
        prop_assert_eq!(fired.borrow().clone(), expected);
    }
}
