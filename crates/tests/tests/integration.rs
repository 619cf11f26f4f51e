//! Integration tests for end-to-end co-simulation runs.
//!
//! These tests drive complete scenarios through the public runtime API:
//! Build scenario → Provision units → Run → Inspect results

use cosim_runtime::{Connection, Error, Scenario, Simulation, Strategy, UnitSet, VarType};
use cosim_tests::{CallLog, MSD_TIMING, Recorder, Scripted, TestHarness, id};
use cosim_virtual::msd::{MSD1, MSD2, msd1, msd2};
use cosim_virtual::{VirtualProvider, double_msd, double_msd_units};

fn all_strategies() -> Vec<Strategy> {
    vec![
        Strategy::Jacobi { parallel: true },
        Strategy::Jacobi { parallel: false },
        Strategy::gauss_seidel(),
        Strategy::iterative(100, 1e-4).unwrap(),
    ]
}

fn hold(_: &mut [f64]) {}

fn increment(state: &mut [f64]) {
    state[0] += 1.0;
}

fn double(state: &mut [f64]) {
    state[0] *= 2.0;
}

// out = in + 1
fn plus_one(state: &mut [f64]) {
    state[1] = state[0] + 1.0;
}

/// The reference run: coupled masses stay bounded and reach the stop time.
#[test]
fn test_double_msd_iterative_stays_bounded() {
    let mut harness = TestHarness::double_msd(1.0, 1.0);
    let results = harness.run(&Strategy::iterative(100, 1e-4).unwrap());

    assert!(*results.timestamps.last().unwrap() > 6.0);
    let x = results.signal(&id(MSD1), msd1::X).unwrap();
    assert!(*x.last().unwrap() > -1.0);
    harness.release();
}

#[test]
fn test_double_msd_jacobi_stays_bounded() {
    let mut harness = TestHarness::double_msd(1.0, 1.0);
    let results = harness.run(&Strategy::jacobi());

    assert!(*results.timestamps.last().unwrap() > 6.0);
    assert!(results.last(&id(MSD1), msd1::X).unwrap() > -1.0);
}

#[test]
fn test_double_msd_gauss_seidel_stays_bounded() {
    let mut harness = TestHarness::double_msd(1.0, 1.0);
    let results = harness.run(&Strategy::gauss_seidel());

    assert!(*results.timestamps.last().unwrap() > 6.0);
    assert!(results.last(&id(MSD1), msd1::X).unwrap() > -1.0);
}

/// 7.0 s at 0.01 s steps sampled every 0.1 s: the initial sample plus 70.
#[test]
fn test_sampling_cadence() {
    let mut harness = TestHarness::double_msd(1.0, 1.0);
    let results = harness.run(&Strategy::iterative(100, 1e-4).unwrap());

    assert_eq!(results.len(), 71);
    assert_eq!(results.timestamps[0], 0.0);
    assert!((results.timestamps[70] - 7.0).abs() < 1e-9);
    for pair in results.timestamps.windows(2) {
        assert!((pair[1] - pair[0] - 0.1).abs() < 1e-9);
    }

    // every recorded output has one value per timestamp, coupled ones included
    for (unit, vref) in [
        (MSD1, msd1::X),
        (MSD1, msd1::V),
        (MSD2, msd2::FE),
        (MSD2, msd2::X),
        (MSD2, msd2::V),
    ] {
        assert_eq!(results.signal(&id(unit), vref).unwrap().len(), 71);
    }
}

#[test]
fn test_runs_are_deterministic() {
    for strategy in all_strategies() {
        let first = TestHarness::double_msd(1.0, 1.0).run(&strategy);
        let second = TestHarness::double_msd(1.0, 1.0).run(&strategy);
        assert_eq!(first, second, "{} is not deterministic", strategy.name());
    }
}

#[test]
fn test_parallel_jacobi_matches_sequential() {
    let parallel = TestHarness::double_msd(2.0, 0.5).run(&Strategy::Jacobi { parallel: true });
    let sequential = TestHarness::double_msd(2.0, 0.5).run(&Strategy::Jacobi { parallel: false });
    assert_eq!(parallel, sequential);
}

/// With no couplings every strategy reduces to stepping each unit alone.
#[test]
fn test_strategies_agree_on_decoupled_units() {
    let run = |strategy: &Strategy| {
        let log = CallLog::new();
        let scenario = Scenario::builder()
            .units(["a", "b"])
            .output(Connection::output(VarType::Real, "a", [0u32]))
            .output(Connection::output(VarType::Real, "b", [0u32]))
            .step_size(1.0)
            .sampling_interval(1.0)
            .stop_time(4.0)
            .build()
            .unwrap();
        let mut units = UnitSet::new();
        units.insert("a", Box::new(Recorder::new("a", vec![0.0], increment, &log)));
        units.insert("b", Box::new(Recorder::new("b", vec![1.0], double, &log)));
        TestHarness::new(scenario, units).run(strategy)
    };

    let reference = run(&Strategy::jacobi());
    assert_eq!(reference.signal(&id("a"), 0u32.into()).unwrap(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
    assert_eq!(reference.signal(&id("b"), 0u32.into()).unwrap(), &[1.0, 2.0, 4.0, 8.0, 16.0]);

    for strategy in all_strategies() {
        assert_eq!(run(&strategy), reference, "{} diverged", strategy.name());
    }
}

/// A discontinuous output records a mode only when the value changes.
#[test]
fn test_mode_compression() {
    let scenario = Scenario::builder()
        .unit("s")
        .output(Connection::output(VarType::Real, "s", [0u32]).discontinuous(1e-3))
        .step_size(1.0)
        .sampling_interval(1.0)
        .stop_time(5.0)
        .build()
        .unwrap();
    let mut units = UnitSet::new();
    units.insert("s", Box::new(Scripted::new([1.0, 1.0, 1.0, 2.0, 2.0, 3.0])));

    let results = TestHarness::new(scenario, units).run(&Strategy::jacobi());
    assert_eq!(
        results.signal(&id("s"), 0u32.into()).unwrap(),
        &[1.0, 1.0, 1.0, 2.0, 2.0, 3.0]
    );
    assert_eq!(results.modes(&id("s"), 0u32.into()).unwrap(), &[1.0, 2.0, 3.0]);
}

#[test]
fn test_stop_condition_ends_run() {
    let scenario = Scenario::builder()
        .unit("s")
        .output(Connection::output(VarType::Real, "s", [0u32]))
        .stop_condition("s", 0u32)
        .step_size(1.0)
        .sampling_interval(1.0)
        .build()
        .unwrap();
    let mut units = UnitSet::new();
    units.insert("s", Box::new(Scripted::new([3.0, 2.0, 1.0, 0.0, -1.0])));

    let results = TestHarness::new(scenario, units).run(&Strategy::gauss_seidel());
    assert_eq!(results.timestamps, vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(results.signal(&id("s"), 0u32.into()).unwrap(), &[3.0, 2.0, 1.0, 0.0]);
}

/// Two units feeding each other `in + 1` never settle. Every rejected pass
/// must leave the units exactly as they were before it.
#[test]
fn test_rollback_restores_state_between_iterations() {
    let log = CallLog::new();
    let scenario = Scenario::builder()
        .units(["a", "b"])
        .connection(Connection::real("a", [1u32], "b", [0u32]))
        .connection(Connection::real("b", [1u32], "a", [0u32]))
        .step_size(1.0)
        .sampling_interval(1.0)
        .stop_time(1.0)
        .build()
        .unwrap();
    let mut units = UnitSet::new();
    units.insert("a", Box::new(Recorder::new("a", vec![0.0, 0.0], plus_one, &log)));
    units.insert("b", Box::new(Recorder::new("b", vec![0.0, 0.0], plus_one, &log)));

    let mut harness = TestHarness::new(scenario, units);
    let (_, stats) = harness.try_run(&Strategy::iterative(3, 0.0).unwrap()).unwrap();

    assert_eq!(stats.macro_steps, 1);
    assert_eq!(stats.inner_iterations, 4);
    assert_eq!(stats.unconverged_steps, 1);

    // inputs grow with each pass while the output is always back at its start value
    let entries = log.step_entries("a");
    assert_eq!(
        entries,
        vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![2.0, 0.0], vec![3.0, 0.0]]
    );
    assert_eq!(log.step_entries("b"), entries);

    // the last pass is kept
    let a = harness.units().get(&id("a")).unwrap();
    assert_eq!(a.get_real(&[0u32.into(), 1u32.into()]).unwrap(), vec![3.0, 4.0]);
}

/// Iteration stops as soon as two consecutive passes agree.
#[test]
fn test_iterative_converges_on_settled_coupling() {
    let log = CallLog::new();
    let scenario = Scenario::builder()
        .units(["a", "b"])
        .connection(Connection::real("a", [0u32], "b", [0u32]))
        .step_size(1.0)
        .sampling_interval(1.0)
        .stop_time(3.0)
        .build()
        .unwrap();
    let mut units = UnitSet::new();
    units.insert("a", Box::new(Recorder::new("a", vec![5.0], hold, &log)));
    units.insert("b", Box::new(Recorder::new("b", vec![0.0], hold, &log)));

    let mut harness = TestHarness::new(scenario, units);
    let (_, stats) = harness.try_run(&Strategy::iterative(100, 1e-4).unwrap()).unwrap();

    assert_eq!(stats.macro_steps, 3);
    assert_eq!(stats.inner_iterations, 6);
    assert_eq!(stats.unconverged_steps, 0);
}

/// Configuration errors are reported before any unit sees a call.
#[test]
fn test_validation_precedes_unit_interaction() {
    let log = CallLog::new();
    let recorders = |log: &CallLog| {
        let mut units = UnitSet::new();
        units.insert("a", Box::new(Recorder::new("a", vec![0.0], hold, log)));
        units.insert("b", Box::new(Recorder::new("b", vec![0.0], hold, log)));
        units
    };

    // output on a unit outside the scenario
    let scenario = Scenario::builder()
        .unit("a")
        .output(Connection::output(VarType::Real, "ghost", [0u32]))
        .stop_time(1.0)
        .build()
        .unwrap();
    let mut units = recorders(&log);
    let err = Simulation::new(&scenario, &mut units, &Strategy::jacobi()).unwrap_err();
    assert!(matches!(err, Error::UnknownUnit { .. }));

    // scenario unit without a handle
    let scenario = Scenario::builder().units(["a", "c"]).stop_time(1.0).build().unwrap();
    let mut units = recorders(&log);
    let err = Simulation::new(&scenario, &mut units, &Strategy::jacobi()).unwrap_err();
    assert!(matches!(err, Error::MissingHandle(_)));

    // boolean coupling under the iterative strategy
    let scenario = Scenario::builder()
        .units(["a", "b"])
        .connection(Connection::boolean("a", [0u32], "b", [0u32]))
        .stop_time(1.0)
        .build()
        .unwrap();
    let mut units = recorders(&log);
    let err = Simulation::new(&scenario, &mut units, &Strategy::iterative(10, 1e-4).unwrap()).unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));

    assert!(log.is_empty(), "units were called: {:?}", log.calls());
}

#[test]
fn test_duplicate_output_rejected() {
    let err = Scenario::builder()
        .units(["a", "b"])
        .output(Connection::real("a", [0u32, 1], "b", [0u32, 1]))
        .output(Connection::output(VarType::Real, "a", [1u32]))
        .stop_time(1.0)
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateOutput { .. }));
    assert!(err.is_configuration());
}

#[test]
fn test_scenario_without_termination_rejected() {
    let err = double_msd(
        1.0,
        1.0,
        cosim_runtime::Timing {
            stop_time: None,
            ..MSD_TIMING
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::NoTermination));
}

/// Staged unit resources disappear once the run's units are released.
#[test]
fn test_provisioned_resources_cleaned_up() {
    let root = tempfile::tempdir().unwrap();
    let scenario = double_msd(1.0, 1.0, MSD_TIMING).unwrap();
    let units = double_msd_units(&VirtualProvider::staged_in(root.path())).unwrap();
    assert!(root.path().join(MSD1).is_dir());
    assert!(root.path().join(MSD2).is_dir());

    let mut harness = TestHarness::new(scenario, units);
    let results = harness.run(&Strategy::jacobi());
    assert_eq!(results.len(), 71);
    harness.release();

    assert!(!root.path().join(MSD1).exists());
    assert!(!root.path().join(MSD2).exists());
}

/// Coupling parameters reach the unit before the first step.
#[test]
fn test_parameters_applied_at_initialization() {
    let mut harness = TestHarness::double_msd(3.0, 0.25);
    harness.run(&Strategy::jacobi());
    let msd2 = harness.units().get(&id(MSD2)).unwrap();
    assert_eq!(msd2.get_real(&[msd2::CE, msd2::CEF]).unwrap(), vec![3.0, 0.25]);
}

/// Boolean couplings carry `value > 0.5` across, written as 1.0 or 0.0.
#[test]
fn test_boolean_coupling_propagates() {
    for strategy in [
        Strategy::Jacobi { parallel: true },
        Strategy::Jacobi { parallel: false },
        Strategy::gauss_seidel(),
    ] {
        let log = CallLog::new();
        let scenario = Scenario::builder()
            .units(["a", "b"])
            .connection(Connection::boolean("a", [0u32], "b", [0u32]))
            .output(Connection::output(VarType::Real, "b", [0u32]))
            .step_size(1.0)
            .sampling_interval(1.0)
            .stop_time(2.0)
            .build()
            .unwrap();
        let mut units = UnitSet::new();
        // a: -0.5, 0.5, 1.5; only the last is above the threshold
        units.insert("a", Box::new(Recorder::new("a", vec![-0.5], increment, &log)));
        units.insert("b", Box::new(Recorder::new("b", vec![0.25], hold, &log)));

        let results = TestHarness::new(scenario, units).run(&strategy);
        assert_eq!(
            results.signal(&id("b"), 0u32.into()).unwrap(),
            &[0.0, 0.0, 1.0],
            "{} dropped the boolean coupling",
            strategy.name()
        );
    }
}

/// Releasing a run's units terminates each of them once.
#[test]
fn test_release_terminates_units() {
    let log = CallLog::new();
    let scenario = Scenario::builder()
        .units(["a", "b"])
        .step_size(1.0)
        .sampling_interval(1.0)
        .stop_time(2.0)
        .build()
        .unwrap();
    let mut units = UnitSet::new();
    units.insert("a", Box::new(Recorder::new("a", vec![0.0], increment, &log)));
    units.insert("b", Box::new(Recorder::new("b", vec![0.0], hold, &log)));

    let mut harness = TestHarness::new(scenario, units);
    harness.run(&Strategy::jacobi());
    assert!(!log.methods("a").contains(&"terminate"));

    harness.release();
    for unit in ["a", "b"] {
        let methods = log.methods(unit);
        assert_eq!(methods.last(), Some(&"terminate"));
        assert_eq!(methods.iter().filter(|m| **m == "terminate").count(), 1);
    }
}
