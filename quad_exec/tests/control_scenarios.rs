//! Whole loop scenarios run against the simulated actuators.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{UnitQuaternion, Vector3};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use quad_lib::{
    control_loop::{ControlLoop, TickOutcome},
    ctrl_sm::ControlState,
    data_store::DataStore,
    input_client::{InputSampler, ScriptedInput},
    leg::NUM_JOINTS,
    params::QuadExecParams,
    quad_ctrl::{Params, QuadCtrl},
    sim_mech::SimMech,
};
use util::script_interpreter::ScriptInterpreter;

// ---------------------------------------------------------------------------
// HELPERS
// ---------------------------------------------------------------------------

const DT: Duration = Duration::from_millis(5);

fn make_loop(sim: SimMech, stop: Arc<AtomicBool>) -> ControlLoop<SimMech> {
    let ds = DataStore::new(QuadCtrl::with_params(Params::default()));
    ControlLoop::new(QuadExecParams::default(), ds, sim, stop)
}

fn sim() -> SimMech {
    SimMech::new(&Params::default().legs, [0.0; NUM_JOINTS])
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[test]
fn stand_up_to_passive_balance() {
    let mut cl = make_loop(
        sim().with_fixed_step(DT),
        Arc::new(AtomicBool::new(false)),
    );
    let tilt = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.05);

    let mut entered = Vec::new();
    let mut tick = 0;

    while cl.data_store().ctrl_sm.state() != Some(ControlState::PassiveBalance) {
        tick += 1;
        assert!(tick <= 1200, "still standing up after {} ticks", tick);
        assert_eq!(cl.tick(DT).unwrap(), TickOutcome::Continue);

        if let Some(t) = cl.data_store().ctrl_sm_output.and_then(|o| o.transition) {
            entered.push((tick, t.to));

            // Tilt the body once gravity estimation has started
            if t.to == ControlState::StandUpPhase3 {
                cl.actuators_mut().set_body_attitude(tilt);
            }
        }
    }

    let states: Vec<ControlState> = entered.iter().map(|(_, s)| *s).collect();
    assert_eq!(
        states,
        vec![
            ControlState::StandUpPhase1,
            ControlState::StandUpPhase2,
            ControlState::StandUpPhase3,
            ControlState::PassiveBalance,
        ]
    );

    // 1.9 s per phase at 5 ms per tick, after the entry tick
    for (i, (t, _)) in entered.iter().enumerate().skip(1) {
        let expected = 1 + 380 * i;
        assert!(
            (*t as i64 - expected as i64).abs() <= 1,
            "transition {} at tick {}",
            i,
            t
        );
    }

    let ds = cl.data_store();
    assert!(!ds.safe);

    let body = ds.quad_ctrl.body();
    assert!(body.balance_target().angle_to(body.estimate()) < 1e-9);
    assert!((body.balance_target().angle() - 0.05).abs() < 1e-3);
}

#[test]
fn stall_is_absorbed() {
    let stop = Arc::new(AtomicBool::new(false));

    let mut sim = sim();
    sim.stall_next(Duration::from_millis(50));

    let mut cl = make_loop(sim, stop.clone());
    let handle = thread::spawn(move || cl.run());

    thread::sleep(Duration::from_millis(300));
    stop.store(true, Ordering::Relaxed);

    let stats = handle.join().unwrap().unwrap();

    assert!(stats.max_dt >= Duration::from_millis(50));
    assert!(stats.max_dt < Duration::from_millis(250));
    assert!(stats.num_overruns >= 1);
    assert!(stats.num_cycles > 10);
}

#[test]
fn scripted_quit() {
    let interp = ScriptInterpreter::from_str(
        r#"
        0.0: {"translation_vel_cmd": [0.2, 0.0, 0.0]};
        0.1: {"quit_requested": true};
        "#,
    )
    .unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let (sampler, rx) = InputSampler::spawn(
        ScriptedInput::from_interpreter(interp),
        Duration::from_millis(1),
        stop.clone(),
    )
    .unwrap();

    let mut cl = make_loop(sim(), stop).with_input(rx);
    let stats = cl.run().unwrap();
    sampler.join();

    assert!(stats.num_cycles > 0);

    // Held in place on the way out
    let last = cl.actuators().last_demands().unwrap();
    assert!(last.speed_rads.iter().all(|s| *s == 0.0));
    assert!(cl.data_store().input.quit_requested);
}
