//! Field adaptor behaviour end to end: monitor samples in, corrected
//! decisions out.

use std::sync::Arc;

use margot_core::*;

// ─── helpers ────────────────────────────────────────────────────────────────

type Op = OperatingPoint<i32, Distribution<f64>, 2, 2>;

/// Knobs {1, 2}; metrics {3 ± 0.1, 4 ± 0.1}.
fn fixture_point() -> Op {
    OperatingPoint::new(
        [1, 2],
        [Distribution::new(3.0, 0.1).unwrap(), Distribution::new(4.0, 0.1).unwrap()],
    )
}

fn one_sigma(metric: usize, monitor: &Monitor, inertia: usize) -> OneSigmaAdaptor {
    OneSigmaAdaptor::new(
        metric,
        monitor.clone(),
        inertia,
        CorrectionMode::Multiplicative,
        Arc::new(Telemetry::new("adaptor-test")),
    )
}

// ─── fixture ────────────────────────────────────────────────────────────────

/// Observations inside one sigma keep the coefficient at 1; 4.11 against
/// 4 ± 0.1 moves it to 4 / 4.11.
#[test]
fn test_one_sigma_fixture() {
    let op = fixture_point();
    let monitor = Monitor::default();
    let mut adaptor = one_sigma(1, &monitor, 1);
    let predicted = op.field(SegmentKind::Metrics, 1).unwrap();

    for observed in [4.0, 4.09, 4.1] {
        monitor.push(observed);
        adaptor.evaluate_error(&predicted);
        assert!(
            (adaptor.error_coefficient() - 1.0).abs() < 1e-9,
            "got {} after {}",
            adaptor.error_coefficient(),
            observed
        );
    }

    monitor.push(4.11);
    adaptor.evaluate_error(&predicted);
    assert!(
        (adaptor.error_coefficient() - 0.973236).abs() < 1e-4,
        "got {}",
        adaptor.error_coefficient()
    );
}

/// A coefficient of 1 leaves every composition equal to the raw value.
#[test]
fn test_neutral_coefficient_matches_raw_evaluation() {
    let op = fixture_point();
    let monitor = Monitor::default();
    let mut ka = KnowledgeAdaptor::new();
    ka.add(Box::new(one_sigma(1, &monitor, 1))).unwrap();

    let linear = Evaluator::new(
        FieldComposer::Linear,
        [FieldSelector::knob(0).into(), FieldSelector::metric(1).into()],
    )
    .unwrap();
    monitor.push(4.0);
    ka.evaluate_error(&op);
    assert_eq!(linear.evaluate_corrected(&op, &ka.corrections()), linear.evaluate(&op));
}

#[test]
fn test_inertia_smooths_outliers() {
    let op = fixture_point();
    let monitor = Monitor::default();
    let mut adaptor = one_sigma(1, &monitor, 4);
    let predicted = op.field(SegmentKind::Metrics, 1).unwrap();

    monitor.push(8.0);
    adaptor.evaluate_error(&predicted);
    // window {1, 1, 1, 0.5}
    assert!((adaptor.error_coefficient() - 0.875).abs() < 1e-12);

    for _ in 0..3 {
        adaptor.evaluate_error(&predicted);
    }
    assert!((adaptor.error_coefficient() - 0.5).abs() < 1e-12);
    assert!(adaptor.status().contains("size = 4"));
}

// ─── through the manager ────────────────────────────────────────────────────

/// Predicted time 100 / k ms for k threads, until the machine turns out to
/// be twice as slow. A deadline that the model says k = 2 meets is then only
/// met by k = 4.
#[test]
fn test_manager_follows_observed_drift() {
    let points: Vec<OperatingPoint<u32, Distribution<f64>, 1, 1>> = (1..=4u32)
        .map(|k| OperatingPoint::new([k], [Distribution::new(100.0 / k as f64, 1.0).unwrap()]))
        .collect();
    let m: Manager<u32, Distribution<f64>, 1, 1> = Manager::builder("drift")
        .knowledge(points)
        .state(State::new(
            "deadline",
            RankCalculator::linear(RankObjective::Minimize, [FieldSelector::knob(0).into()]).unwrap(),
        ))
        .adaptor(0, 1, CorrectionMode::Multiplicative)
        .build()
        .unwrap();
    m.add_constraint(
        "deadline",
        Constraint::new(FieldSelector::metric(0), Goal::new(ComparisonFunction::LessOrEqual, 55.0), 0.0, 1, 1),
    )
    .unwrap();

    let s = m.get_best_configuration();
    assert_eq!(*s.point.knob::<0>(), 2);
    m.configuration_applied(&s.point);

    m.monitor(0).unwrap().push(100.0);
    assert!(m.update());
    let coefficient = m.adaptors().error_coefficient(0).unwrap();
    assert!((coefficient - 0.5).abs() < 1e-12, "got {}", coefficient);

    // corrected times 200, 100, 66.7, 50
    let s = m.get_best_configuration();
    assert_eq!(*s.point.knob::<0>(), 4);
    assert_eq!(s.status, SelectionStatus::Optimal);
}

#[test]
fn test_zero_observation_is_reported_not_raised() {
    let points: Vec<OperatingPoint<u32, f64, 1, 1>> = vec![OperatingPoint::new([1], [5.0])];
    let m: Manager<u32, f64, 1, 1> = Manager::builder("zero")
        .knowledge(points)
        .adaptor(0, 1, CorrectionMode::Multiplicative)
        .build()
        .unwrap();
    let s = m.get_best_configuration();
    m.configuration_applied(&s.point);
    m.monitor(0).unwrap().push(0.0);
    m.update();
    assert_eq!(m.adaptors().error_coefficient(0), Some(1.0));
    assert_eq!(m.telemetry().snapshot().undefined_corrections, 1);
}

#[test]
fn test_additive_adaptor_shifts_predictions() {
    let points: Vec<OperatingPoint<u32, f64, 1, 1>> =
        (1..=3u32).map(|k| OperatingPoint::new([k], [k as f64 * 10.0])).collect();
    let m: Manager<u32, f64, 1, 1> = Manager::builder("shift")
        .knowledge(points)
        .state(State::new(
            "s",
            RankCalculator::linear(RankObjective::Maximize, [FieldSelector::knob(0).into()]).unwrap(),
        ))
        .adaptor(0, 1, CorrectionMode::Additive)
        .build()
        .unwrap();
    m.add_constraint(
        "s",
        Constraint::new(FieldSelector::metric(0), Goal::new(ComparisonFunction::Less, 31.0), 0.0, 5, 1),
    )
    .unwrap();
    let s = m.get_best_configuration();
    assert_eq!(*s.point.knob::<0>(), 3);
    m.configuration_applied(&s.point);

    m.monitor(0).unwrap().push(35.0);
    m.update();
    // predictions shifted by +5: 15, 25, 35
    assert_eq!(*m.get_best_configuration().point.knob::<0>(), 2);
}

#[test]
fn test_observation_errors_round_trip() {
    let points: Vec<OperatingPoint<u32, f64, 1, 2>> = vec![OperatingPoint::new([1], [5.0, 1.0])];
    let m: Manager<u32, f64, 1, 2> = Manager::builder("persist")
        .knowledge(points)
        .adaptor(0, 2, CorrectionMode::Multiplicative)
        .adaptor(1, 2, CorrectionMode::Multiplicative)
        .build()
        .unwrap();
    m.adaptors().set_observation_errors(&[(0, 0.8), (1, 1.25)]);
    assert_eq!(m.adaptors().observation_errors(), vec![(0, 0.8), (1, 1.25)]);
    m.reset_adaptation();
    assert_eq!(m.adaptors().observation_errors(), vec![(0, 1.0), (1, 1.0)]);
}

/// A shift that drives a square-rooted metric negative takes that point out
/// of the race and says so.
#[test]
fn test_shift_below_zero_degrades_geometric_selection() {
    let points: Vec<OperatingPoint<i32, f64, 1, 1>> =
        vec![OperatingPoint::new([1], [10.0]), OperatingPoint::new([2], [5.0])];
    let rank = RankCalculator::geometric(
        RankObjective::Minimize,
        [FieldTerm::weighted(FieldSelector::metric(0), 0.5)],
    )
    .unwrap();
    let m = Manager::builder("sqrt")
        .knowledge(points)
        .state(State::new("s", rank))
        .adaptor(0, 1, CorrectionMode::Additive)
        .build()
        .unwrap();

    let first = m.get_best_configuration();
    assert_eq!(*first.point.knob::<0>(), 2);
    assert_eq!(first.status, SelectionStatus::Optimal);

    let one = Arc::clone(m.knowledge().get("1").unwrap());
    m.configuration_applied(&one);
    // 10 predicted, 2 observed: every prediction moves by -8, so 5 becomes -3
    m.monitor(0).unwrap().push(2.0);
    m.update();

    let s = m.get_best_configuration();
    assert_eq!(*s.point.knob::<0>(), 1);
    assert!((s.rank - 2f64.sqrt()).abs() < 1e-12, "got {}", s.rank);
    assert_eq!(s.status, SelectionStatus::Degraded(DegradedCondition::UndefinedRank { excluded: 1 }));
    assert!(!s.changed);
    assert_eq!(m.telemetry().snapshot().undefined_ranks, 1);
}
