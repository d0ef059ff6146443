//! Selection scenarios on the five point fixture.
//!
//! Knob `{k}` for k in 3..=7 with metrics `{1, k, 8 − k}`: metric 0 is flat,
//! metric 1 grows with the knob and metric 2 shrinks with it.

use margot_core::*;

// ─── helpers ────────────────────────────────────────────────────────────────

type Op = OperatingPoint<i32, f64, 1, 3>;
type Mgr = Manager<i32, f64, 1, 3>;

fn points_five() -> Vec<Op> {
    (3..=7).map(|k| OperatingPoint::new([k], [1.0, k as f64, 8.0 - k as f64])).collect()
}

fn points_seven() -> Vec<Op> {
    (1..=7).map(|k| OperatingPoint::new([k], [1.0, k as f64, 8.0 - k as f64])).collect()
}

fn linear(objective: RankObjective, selector: FieldSelector) -> RankCalculator {
    RankCalculator::linear(objective, [FieldTerm::new(selector)]).unwrap()
}

fn manager_with(points: Vec<Op>, rank: RankCalculator) -> Mgr {
    Manager::builder("fixture")
        .knowledge(points)
        .state(State::new("s", rank))
        .build()
        .unwrap()
}

fn constrain(m: &Mgr, field: FieldSelector, comparison: ComparisonFunction, target: f64, priority: u32) {
    m.add_constraint("s", Constraint::new(field, Goal::new(comparison, target), 0.0, 0, priority))
        .unwrap();
}

fn best_knob(m: &Mgr) -> i32 {
    *m.get_best_configuration().point.knob::<0>()
}

// ─── ranking ────────────────────────────────────────────────────────────────

#[test]
fn test_without_rank_takes_first_point() {
    let m = manager_with(points_five(), RankCalculator::unranked());
    assert_eq!(best_knob(&m), 3);
}

#[test]
fn test_maximize_knob() {
    let m = manager_with(points_five(), linear(RankObjective::Maximize, FieldSelector::knob(0)));
    assert_eq!(best_knob(&m), 7);
}

#[test]
fn test_minimize_knob() {
    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::knob(0)));
    assert_eq!(best_knob(&m), 3);
}

#[test]
fn test_minimize_and_maximize_metric() {
    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::metric(1)));
    assert_eq!(best_knob(&m), 3);
    let m = manager_with(points_five(), linear(RankObjective::Maximize, FieldSelector::metric(1)));
    assert_eq!(best_knob(&m), 7);
}

/// Equal ranks resolve by insertion order, not by knob value.
#[test]
fn test_flat_rank_ties_go_to_insertion_order() {
    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::metric(0)));
    assert_eq!(best_knob(&m), 3);
    let m = manager_with(points_five(), linear(RankObjective::Maximize, FieldSelector::metric(0)));
    assert_eq!(best_knob(&m), 3);
}

// ─── constraints ────────────────────────────────────────────────────────────

#[test]
fn test_useless_constraint() {
    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::knob(0)));
    constrain(&m, FieldSelector::knob(0), ComparisonFunction::Greater, -4.0, 10);
    assert_eq!(best_knob(&m), 3);
    assert_eq!(m.get_best_configuration().status, SelectionStatus::Optimal);
}

#[test]
fn test_middle_constraint() {
    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::knob(0)));
    constrain(&m, FieldSelector::knob(0), ComparisonFunction::Greater, 4.0, 10);
    assert_eq!(best_knob(&m), 5);
}

#[test]
fn test_too_strict_constraint_falls_back_to_closest() {
    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::knob(0)));
    constrain(&m, FieldSelector::knob(0), ComparisonFunction::Greater, 20.0, 10);
    let s = m.get_best_configuration();
    assert_eq!(*s.point.knob::<0>(), 7);
    assert!(s.status.is_degraded());
}

#[test]
fn test_two_constraints_useless_bottom() {
    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::knob(0)));
    constrain(&m, FieldSelector::knob(0), ComparisonFunction::Greater, -4.0, 10);
    constrain(&m, FieldSelector::metric(0), ComparisonFunction::Less, 7.0, 20);
    assert_eq!(best_knob(&m), 3);

    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::knob(0)));
    constrain(&m, FieldSelector::knob(0), ComparisonFunction::Greater, 4.0, 10);
    constrain(&m, FieldSelector::metric(0), ComparisonFunction::Less, 7.0, 20);
    assert_eq!(best_knob(&m), 5);

    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::knob(0)));
    constrain(&m, FieldSelector::knob(0), ComparisonFunction::Greater, 20.0, 10);
    constrain(&m, FieldSelector::metric(0), ComparisonFunction::Less, 7.0, 20);
    assert_eq!(best_knob(&m), 7);
}

#[test]
fn test_two_constraints_middle_bottom() {
    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::knob(0)));
    constrain(&m, FieldSelector::knob(0), ComparisonFunction::Greater, -5.0, 10);
    constrain(&m, FieldSelector::metric(2), ComparisonFunction::Less, 3.0, 20);
    assert_eq!(best_knob(&m), 6);

    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::knob(0)));
    constrain(&m, FieldSelector::knob(0), ComparisonFunction::Greater, 4.0, 10);
    constrain(&m, FieldSelector::metric(2), ComparisonFunction::Less, 3.0, 20);
    assert_eq!(best_knob(&m), 6);
}

/// Every point misses both constraints by the same amount: rank decides.
#[test]
fn test_unsatisfiable_flat_constraints_fall_back_to_rank() {
    let m = manager_with(points_five(), linear(RankObjective::Minimize, FieldSelector::knob(0)));
    constrain(&m, FieldSelector::metric(0), ComparisonFunction::Greater, 50.0, 10);
    constrain(&m, FieldSelector::metric(0), ComparisonFunction::Less, -5.0, 20);
    let s = m.get_best_configuration();
    assert_eq!(*s.point.knob::<0>(), 3);
    assert!(s.status.is_degraded());
}

#[test]
fn test_distribution_bounds_follow_confidence() {
    let points: Vec<OperatingPoint<i32, Distribution<f64>, 1, 1>> = (1..=3)
        .map(|k| OperatingPoint::new([k], [Distribution::new(k as f64 * 10.0, 2.0).unwrap()]))
        .collect();
    let m: Manager<i32, Distribution<f64>, 1, 1> = Manager::builder("b")
        .knowledge(points)
        .state(State::new("s", linear(RankObjective::Maximize, FieldSelector::knob(0))))
        .build()
        .unwrap();

    // upper bound at 3 sigma: 16, 26, 36
    m.add_constraint(
        "s",
        Constraint::new(FieldSelector::metric(0), Goal::new(ComparisonFunction::Less, 30.0), 3.0, 0, 1),
    )
    .unwrap();
    assert_eq!(*m.get_best_configuration().point.knob::<0>(), 2);
    m.set_goal_value("s", 1, 25.0).unwrap();
    assert_eq!(*m.get_best_configuration().point.knob::<0>(), 1);
}

// ─── knowledge changes ──────────────────────────────────────────────────────

#[test]
fn test_remove_points_moves_the_choice() {
    let m = manager_with(points_seven(), linear(RankObjective::Minimize, FieldSelector::knob(0)));
    assert_eq!(best_knob(&m), 1);
    m.update_knowledge(KnowledgeUpdate::Remove(vec!["1".into(), "2".into()])).unwrap();
    assert_eq!(best_knob(&m), 3);
    m.update_knowledge(KnowledgeUpdate::Merge(vec![OperatingPoint::new([2], [1.0, 2.0, 6.0])]))
        .unwrap();
    assert_eq!(best_knob(&m), 2);
}

#[test]
fn test_geometric_rank_update_is_validated() {
    let m = manager_with(
        points_five(),
        RankCalculator::geometric(RankObjective::Minimize, [FieldTerm::weighted(FieldSelector::metric(2), 0.5)])
            .unwrap(),
    );
    // metric 2 = 8 − k becomes negative for k = 9
    let err = m
        .update_knowledge(KnowledgeUpdate::Merge(vec![OperatingPoint::new([9], [1.0, 9.0, -1.0])]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidGeometricExponent { .. }));
    assert_eq!(m.knowledge().len(), 5);
    assert_eq!(m.knowledge().version(), 0);
}

#[test]
fn test_geometric_rank_is_validated_at_build() {
    let mut points = points_five();
    points.push(OperatingPoint::new([8], [1.0, 8.0, 0.0]));
    let built = Manager::builder("b")
        .knowledge(points)
        .state(State::new(
            "s",
            RankCalculator::geometric(RankObjective::Minimize, [FieldTerm::weighted(FieldSelector::metric(2), -1.0)])
                .unwrap(),
        ))
        .build();
    assert!(matches!(built, Err(ConfigError::InvalidGeometricExponent { .. })));
}

// ─── determinism ────────────────────────────────────────────────────────────

#[test]
fn test_repeated_selection_is_stable() {
    let m = manager_with(points_seven(), linear(RankObjective::Maximize, FieldSelector::metric(0)));
    constrain(&m, FieldSelector::metric(1), ComparisonFunction::GreaterOrEqual, 3.0, 10);
    let first = m.get_best_configuration();
    for _ in 0..100 {
        let again = m.get_best_configuration();
        assert_eq!(again.point.configuration_id(), first.point.configuration_id());
        assert_eq!(again.rank, first.rank);
    }
    assert_eq!(*first.point.knob::<0>(), 3);
}

// ─── debounce through the manager ───────────────────────────────────────────

#[test]
fn test_debounce_requires_consecutive_violations() {
    let monitor = Monitor::default();
    let m: Mgr = Manager::builder("b")
        .knowledge(points_five())
        .state(State::new("s", linear(RankObjective::Minimize, FieldSelector::knob(0))))
        .watch(1, monitor.clone())
        .build()
        .unwrap();
    m.add_constraint(
        "s",
        Constraint::new(FieldSelector::metric(1), Goal::new(ComparisonFunction::Less, 6.0), 0.0, 3, 10),
    )
    .unwrap();

    let s = m.get_best_configuration();
    assert_eq!(*s.point.knob::<0>(), 3);
    m.configuration_applied(&s.point);

    // two violations and a recovery: no flip
    for v in [9.0, 9.0, 3.0] {
        monitor.push(v);
        assert!(!m.update());
    }
    assert_eq!(best_knob(&m), 3);

    // three in a row: the running point is dropped
    monitor.push(9.0);
    assert!(!m.update());
    monitor.push(9.0);
    assert!(!m.update());
    monitor.push(9.0);
    assert!(m.update());
    let s = m.get_best_configuration();
    assert_eq!(*s.point.knob::<0>(), 4);
    assert!(s.changed);

    // applying another configuration starts its trackers afresh
    m.configuration_applied(&s.point);
    let state = m.state("s").unwrap();
    assert!(state.constraints().all(|c| c.status() == ConstraintStatus::Satisfied));
    assert_eq!(m.running_configuration().unwrap().configuration_id(), "4");
}
