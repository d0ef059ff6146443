//! Knowledge updates under concurrency, plus property tests on the
//! selection invariants.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use margot_core::*;
use proptest::prelude::*;

type Op = OperatingPoint<u32, f64, 1, 1>;
type Mgr = Manager<u32, f64, 1, 1>;

/// Every point of generation `tag` carries `tag` as its metric.
fn generation(tag: u32, size: u32) -> Vec<Op> {
    (0..size).map(|k| OperatingPoint::new([k], [tag as f64])).collect()
}

fn maximize_metric() -> State {
    State::new(
        "s",
        RankCalculator::linear(RankObjective::Maximize, [FieldSelector::metric(0).into()]).unwrap(),
    )
}

// ─── atomic swap ────────────────────────────────────────────────────────────

/// Readers racing a writer only ever see whole generations.
#[test]
fn test_snapshots_are_never_mixed() {
    let m: Arc<Mgr> = Arc::new(
        Manager::builder("swap")
            .knowledge(generation(0, 16))
            .state(maximize_metric())
            .build()
            .unwrap(),
    );
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let m = Arc::clone(&m);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut seen = 0u64;
                while !done.load(Ordering::Acquire) {
                    let kb = m.knowledge();
                    let tag = *kb.points()[0].metric::<0>();
                    assert!(kb.iter().all(|op| *op.metric::<0>() == tag), "mixed snapshot at v{}", kb.version());
                    assert_eq!(tag, kb.version() as f64);

                    let s = m.get_best_configuration();
                    assert_eq!(*s.point.metric::<0>(), s.knowledge_version as f64);
                    seen += 1;
                }
                seen
            })
        })
        .collect();

    for tag in 1..=200u32 {
        let version = m.update_knowledge(KnowledgeUpdate::Replace(generation(tag, 16))).unwrap();
        assert_eq!(version, tag as u64);
    }
    done.store(true, Ordering::Release);

    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(m.knowledge().version(), 200);
    assert_eq!(m.telemetry().snapshot().knowledge_updates, 200);
}

/// A selection keeps its snapshot even when the base moves underneath.
#[test]
fn test_selection_records_its_version() {
    let m: Mgr = Manager::builder("v").knowledge(generation(0, 4)).build().unwrap();
    let before = m.get_best_configuration();
    m.update_knowledge(KnowledgeUpdate::Replace(generation(1, 2))).unwrap();
    let after = m.get_best_configuration();
    assert_eq!(before.knowledge_version, 0);
    assert_eq!(after.knowledge_version, 1);
    assert_eq!(*before.point.metric::<0>(), 0.0);
}

// ─── hand-off queue ─────────────────────────────────────────────────────────

#[test]
fn test_updates_from_another_thread() {
    let m: Mgr = Manager::builder("queue")
        .knowledge(generation(0, 2))
        .state(maximize_metric())
        .build()
        .unwrap();
    let tx = m.knowledge_sender(8);

    let producer = thread::spawn(move || {
        for k in 10..13u32 {
            tx.send(KnowledgeUpdate::Merge(vec![OperatingPoint::new([k], [k as f64])])).unwrap();
        }
        // rejected by the base: would leave it empty
        tx.send(KnowledgeUpdate::Replace(vec![])).unwrap();
    });
    producer.join().unwrap();

    assert_eq!(m.apply_pending_updates(), 3);
    assert_eq!(m.knowledge().len(), 5);
    assert_eq!(m.knowledge().version(), 3);
    assert_eq!(*m.get_best_configuration().point.knob::<0>(), 12);
    assert_eq!(m.apply_pending_updates(), 0);
}

#[test]
fn test_full_queue_reports_back_pressure() {
    let m: Mgr = Manager::builder("queue").knowledge(generation(0, 1)).build().unwrap();
    let tx = m.knowledge_sender(2);
    tx.send(KnowledgeUpdate::Merge(generation(1, 1))).unwrap();
    tx.send(KnowledgeUpdate::Merge(generation(2, 1))).unwrap();
    assert_eq!(
        tx.send(KnowledgeUpdate::Merge(generation(3, 1))).unwrap_err(),
        KnowledgeError::QueueFull { capacity: 2 }
    );

    // reopening drops the old receiver
    let fresh = m.knowledge_sender(2);
    assert_eq!(tx.send(KnowledgeUpdate::Remove(vec![])).unwrap_err(), KnowledgeError::Disconnected);
    fresh.send(KnowledgeUpdate::Merge(generation(4, 1))).unwrap();
    assert_eq!(m.apply_pending_updates(), 1);
    assert_eq!(*m.knowledge().points()[0].metric::<0>(), 4.0);
}

// ─── properties ─────────────────────────────────────────────────────────────

fn point_set() -> impl Strategy<Value = Vec<(u32, f64, f64)>> {
    prop::collection::vec((0u32..50, -100.0f64..100.0, 0.0f64..100.0), 1..40)
}

fn build(points: &[(u32, f64, f64)], objective: RankObjective) -> Manager<u32, f64, 1, 2> {
    let ops = points.iter().map(|&(k, a, b)| OperatingPoint::new([k], [a, b]));
    Manager::builder("prop")
        .knowledge(ops)
        .state(State::new(
            "s",
            RankCalculator::linear(objective, [FieldSelector::metric(0).into()]).unwrap(),
        ))
        .build()
        .unwrap()
}

proptest! {
    /// With no constraint violated the choice is the rank optimum.
    #[test]
    fn prop_unconstrained_choice_is_optimal(points in point_set()) {
        let m = build(&points, RankObjective::Minimize);
        let s = m.get_best_configuration();
        prop_assert_eq!(s.status, SelectionStatus::Optimal);
        let best = m.knowledge().iter().map(|op| *op.metric::<0>()).fold(f64::INFINITY, f64::min);
        prop_assert_eq!(s.rank, best);
    }

    /// An optimal choice satisfies the constraint; a degraded one means no
    /// point does.
    #[test]
    fn prop_constraint_is_honoured(points in point_set(), limit in 0.0f64..100.0) {
        let m = build(&points, RankObjective::Maximize);
        m.add_constraint(
            "s",
            Constraint::new(FieldSelector::metric(1), Goal::new(ComparisonFunction::Less, limit), 0.0, 0, 1),
        ).unwrap();
        let s = m.get_best_configuration();
        let any_feasible = m.knowledge().iter().any(|op| *op.metric::<1>() < limit);
        match s.status {
            SelectionStatus::Optimal => prop_assert!(*s.point.metric::<1>() < limit),
            SelectionStatus::Degraded(_) => prop_assert!(!any_feasible),
        }
    }

    /// Same inputs, same answer.
    #[test]
    fn prop_selection_is_deterministic(points in point_set()) {
        let a = build(&points, RankObjective::Maximize).get_best_configuration();
        let b = build(&points, RankObjective::Maximize).get_best_configuration();
        prop_assert_eq!(a.point.configuration_id(), b.point.configuration_id());
    }
}
