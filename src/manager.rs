/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! The decision core of one application block.
//!
//! A [`Manager`] owns the shared knowledge base, the named states, the field
//! adaptors and the monitors of a block. The host control loop drives it:
//!
//! ```text
//! apply_pending_updates()     remote knowledge, if any
//! update()                    adaptors + constraint trackers read monitors
//! get_best_configuration()    filter → rank → fallback
//! configuration_applied(op)   the application switched knobs
//! ```
//!
//! Every method takes `&self`; the manager is `Send + Sync` and can be shared
//! with monitor and knowledge threads behind an `Arc`.
//!
//! # Invariants
//!
//! - Exactly one state is active, and it is always registered.
//! - Every registered state validates against the current knowledge base;
//!   a knowledge update that breaks any state is rejected.
//! - Selections never fail: degraded outcomes are logged, counted and
//!   reported in [`SelectionStatus`](crate::SelectionStatus).

use core::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hashbrown::HashMap;

use crate::adaptor::{CorrectionMode, KnowledgeAdaptor, OneSigmaAdaptor};
use crate::constraint::Constraint;
use crate::distribution::FieldValue;
use crate::error::{ConfigError, KnowledgeError};
use crate::knowledge::{KnowledgeBase, KnowledgeInbox, KnowledgeSender, KnowledgeUpdate, SharedKnowledge};
use crate::monitor::Monitor;
use crate::operating_point::{FieldReading, OperatingPoint, SegmentKind};
use crate::rank::RankCalculator;
use crate::state::{Selection, SelectionStatus, State};
use crate::telemetry::Telemetry;

/// Name of the state created when a block declares none.
pub const DEFAULT_STATE: &str = "default";

type Point<K, M, const KN: usize, const MN: usize> = Arc<OperatingPoint<K, M, KN, MN>>;

#[derive(Debug)]
struct Registry {
    states: HashMap<String, State>,
    active: String,
}

impl Registry {
    fn active(&self) -> Option<&State> {
        self.states.get(&self.active)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut State, ConfigError> {
        self.states
            .get_mut(name)
            .ok_or_else(|| ConfigError::UnknownState { name: name.to_owned() })
    }
}

// ─── Manager ────────────────────────────────────────────────────────────────

/// Autonomic manager of one application block.
#[derive(Debug)]
pub struct Manager<K, M, const KN: usize, const MN: usize> {
    telemetry: Arc<Telemetry>,
    knowledge: SharedKnowledge<K, M, KN, MN>,
    inbox: KnowledgeInbox<K, M, KN, MN>,
    registry: RwLock<Registry>,
    adaptors: KnowledgeAdaptor,
    monitors: HashMap<usize, Monitor>,
    running: RwLock<Option<Point<K, M, KN, MN>>>,
}

impl<K, M, const KN: usize, const MN: usize> Manager<K, M, KN, MN>
where
    K: FieldValue,
    M: FieldValue,
{
    /// Start building a manager for the named block.
    pub fn builder(block: impl Into<String>) -> ManagerBuilder<K, M, KN, MN> {
        ManagerBuilder::new(block)
    }

    fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn running_point(&self) -> Option<Point<K, M, KN, MN>> {
        self.running.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Telemetry handle of the block.
    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    // ── States ───────────────────────────────────────────────────────────

    /// Register a new state.
    ///
    /// Validation runs under the registry lock, so no knowledge update can
    /// slip in between the check and the insertion.
    pub fn add_state(&self, state: State) -> Result<(), ConfigError> {
        let mut registry = self.registry_mut();
        state.validate(&self.knowledge.snapshot())?;
        if registry.states.contains_key(state.name()) {
            return Err(ConfigError::DuplicateState { name: state.name().to_owned() });
        }
        registry.states.insert(state.name().to_owned(), state);
        Ok(())
    }

    /// Unregister a state. The active state cannot be removed.
    pub fn remove_state(&self, name: &str) -> Result<State, ConfigError> {
        let mut registry = self.registry_mut();
        if registry.active == name {
            return Err(ConfigError::ActiveStateRemoval { name: name.to_owned() });
        }
        registry
            .states
            .remove(name)
            .ok_or_else(|| ConfigError::UnknownState { name: name.to_owned() })
    }

    /// Switch the active state.
    pub fn set_state(&self, name: &str) -> Result<(), ConfigError> {
        let mut registry = self.registry_mut();
        if !registry.states.contains_key(name) {
            return Err(ConfigError::UnknownState { name: name.to_owned() });
        }
        if registry.active != name {
            let previous = core::mem::replace(&mut registry.active, name.to_owned());
            self.telemetry.state_switched(&previous, name);
        }
        Ok(())
    }

    /// Name of the active state.
    pub fn active_state(&self) -> String {
        self.registry().active.clone()
    }

    /// Registered state names, sorted.
    pub fn state_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry().states.keys().cloned().collect();
        names.sort();
        names
    }

    /// Copy of a registered state.
    pub fn state(&self, name: &str) -> Result<State, ConfigError> {
        self.registry()
            .states
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownState { name: name.to_owned() })
    }

    /// Add a constraint to a state.
    pub fn add_constraint(&self, state: &str, constraint: Constraint) -> Result<(), ConfigError> {
        constraint.selector().check_index(KN, MN)?;
        self.registry_mut().get_mut(state)?.add_constraint(constraint)
    }

    /// Remove the constraint at `priority` from a state.
    pub fn remove_constraint(&self, state: &str, priority: u32) -> Result<Constraint, ConfigError> {
        self.registry_mut().get_mut(state)?.remove_constraint(priority)
    }

    /// Move the target of the constraint at `priority`.
    pub fn set_goal_value(&self, state: &str, priority: u32, target: f64) -> Result<(), ConfigError> {
        self.registry_mut().get_mut(state)?.set_goal_value(priority, target)
    }

    /// Replace the rank of a state.
    pub fn set_rank(&self, state: &str, rank: RankCalculator) -> Result<(), ConfigError> {
        rank.evaluator().validate_indices(KN, MN)?;
        let mut registry = self.registry_mut();
        let target = registry.get_mut(state)?;
        rank.evaluator().validate_points(self.knowledge.snapshot().iter())?;
        target.set_rank(rank);
        Ok(())
    }

    // ── Selection ────────────────────────────────────────────────────────

    /// Best configuration for the active state.
    ///
    /// Deterministic for a given knowledge snapshot, adaptor coefficients,
    /// tracker states and running configuration.
    pub fn get_best_configuration(&self) -> Selection<K, M, KN, MN> {
        let knowledge = self.knowledge.snapshot();
        let corrections = self.adaptors.corrections();
        let running = self.running_point();
        let running_id = running.as_ref().map(|op| op.configuration_id());

        let registry = self.registry();
        let selection = match registry.active() {
            Some(state) => state.select(&knowledge, &corrections, running_id),
            None => State::new(DEFAULT_STATE, RankCalculator::unranked()).select(
                &knowledge,
                &corrections,
                running_id,
            ),
        };
        drop(registry);

        if let SelectionStatus::Degraded(condition) = &selection.status {
            self.telemetry.degraded(condition);
        }
        self.telemetry.selection(selection.point.configuration_id(), selection.rank);
        selection
    }

    /// Record the configuration the application now runs.
    ///
    /// Switching to a different configuration resets the constraint
    /// trackers, whose observations belonged to the previous one.
    pub fn configuration_applied(&self, point: &Arc<OperatingPoint<K, M, KN, MN>>) {
        let mut running = self.running.write().unwrap_or_else(PoisonError::into_inner);
        let switched = running
            .as_ref()
            .map_or(true, |r| r.configuration_id() != point.configuration_id());
        *running = Some(Arc::clone(point));
        drop(running);

        if switched {
            for state in self.registry_mut().states.values_mut() {
                state.reset_trackers();
            }
            tracing::info!(
                block = %self.telemetry.block(),
                configuration = point.configuration_id(),
                "configuration applied"
            );
        }
    }

    /// The configuration the application runs, if one was applied.
    pub fn running_configuration(&self) -> Option<Arc<OperatingPoint<K, M, KN, MN>>> {
        self.running_point()
    }

    /// Control-loop tick: adaptors compare monitors with the running
    /// prediction and constraint trackers vote on the observations.
    ///
    /// Returns `true` when any reported constraint status changed.
    pub fn update(&self) -> bool {
        let Some(running) = self.running_point() else {
            return false;
        };
        self.adaptors.evaluate_error(&running);

        let mut registry = self.registry_mut();
        let active = registry.active.clone();
        match registry.states.get_mut(&active) {
            Some(state) => {
                state.observe(|metric| self.monitors.get(&metric).and_then(Monitor::average))
            }
            None => false,
        }
    }

    /// Value of a knob of the running configuration.
    pub fn knob_value(&self, index: usize) -> Result<Option<FieldReading>, ConfigError> {
        self.running_field(SegmentKind::Knobs, index)
    }

    /// Predicted value of a metric of the running configuration.
    pub fn metric_value(&self, index: usize) -> Result<Option<FieldReading>, ConfigError> {
        self.running_field(SegmentKind::Metrics, index)
    }

    fn running_field(&self, kind: SegmentKind, index: usize) -> Result<Option<FieldReading>, ConfigError> {
        self.running_point().map(|op| op.field(kind, index)).transpose()
    }

    // ── Knowledge ────────────────────────────────────────────────────────

    /// Current knowledge snapshot.
    pub fn knowledge(&self) -> Arc<KnowledgeBase<K, M, KN, MN>> {
        self.knowledge.snapshot()
    }

    /// Atomically replace, merge into or prune the knowledge base.
    ///
    /// Returns the new version. On error the previous base stays current.
    pub fn update_knowledge(&self, update: KnowledgeUpdate<K, M, KN, MN>) -> Result<u64, ConfigError> {
        let registry = self.registry();
        let next = self.knowledge.update(update, |candidate| {
            registry.states.values().try_for_each(|s| s.validate(candidate))
        })?;
        drop(registry);
        self.telemetry.knowledge_swapped(next.version(), next.len());
        Ok(next.version())
    }

    /// Open a bounded queue for updates produced on other threads.
    ///
    /// A previously opened queue is disconnected.
    pub fn knowledge_sender(&self, capacity: usize) -> KnowledgeSender<K, M, KN, MN> {
        self.inbox.open(capacity)
    }

    /// Apply every queued update in arrival order.
    ///
    /// Rejected updates are logged and skipped. Returns how many were applied.
    pub fn apply_pending_updates(&self) -> usize {
        let mut applied = 0;
        for update in self.inbox.drain() {
            match self.update_knowledge(update) {
                Ok(_) => applied += 1,
                Err(err) => {
                    let err = KnowledgeError::from(err);
                    tracing::warn!(block = %self.telemetry.block(), error = %err, "skipping knowledge update");
                }
            }
        }
        applied
    }

    // ── Adaptors ─────────────────────────────────────────────────────────

    /// Monitor attached to a metric, for producers to push into.
    pub fn monitor(&self, metric: usize) -> Option<Monitor> {
        self.monitors.get(&metric).cloned()
    }

    /// Field adaptors of the block.
    pub fn adaptors(&self) -> &KnowledgeAdaptor {
        &self.adaptors
    }

    /// Clear every adaptor window and constraint tracker.
    pub fn reset_adaptation(&self) {
        self.adaptors.reset();
        for state in self.registry_mut().states.values_mut() {
            state.reset_trackers();
        }
    }

    // ── Reporting ────────────────────────────────────────────────────────

    /// Human-readable dump of the block.
    pub fn report(&self) -> Report<'_, K, M, KN, MN> {
        Report { manager: self }
    }
}

/// Displayable dump of a [`Manager`]; see [`Manager::report`].
pub struct Report<'a, K, M, const KN: usize, const MN: usize> {
    manager: &'a Manager<K, M, KN, MN>,
}

impl<K, M, const KN: usize, const MN: usize> fmt::Display for Report<'_, K, M, KN, MN>
where
    K: FieldValue,
    M: FieldValue,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.manager;
        let knowledge = m.knowledge.snapshot();
        writeln!(f, "block {}", m.telemetry.block())?;
        writeln!(f, "knowledge v{} ({} points)", knowledge.version(), knowledge.len())?;
        for op in knowledge.iter() {
            write!(f, "  [{}] ->", op.configuration_id())?;
            for i in 0..MN {
                if let Ok(r) = op.field(SegmentKind::Metrics, i) {
                    write!(f, " {}~{}", r.average, r.standard_deviation)?;
                }
            }
            writeln!(f)?;
        }

        let registry = m.registry();
        let mut names: Vec<&String> = registry.states.keys().collect();
        names.sort();
        for name in names {
            let marker = if *name == registry.active { "*" } else { " " };
            writeln!(f, "{marker}state {name}")?;
            if let Some(state) = registry.states.get(name) {
                writeln!(
                    f,
                    "    rank {:?} {:?} ({} terms)",
                    state.rank().objective(),
                    state.rank().evaluator().composer(),
                    state.rank().evaluator().terms().len()
                )?;
                for c in state.constraints() {
                    writeln!(
                        f,
                        "    p{} {} {}[{}] {} -> {:?}",
                        c.priority(),
                        c.goal(),
                        c.selector().segment,
                        c.selector().index,
                        c.confidence(),
                        c.status()
                    )?;
                }
            }
        }
        drop(registry);

        for line in m.adaptors.status() {
            writeln!(f, "adaptor {line}")?;
        }
        match m.running_point() {
            Some(op) => writeln!(f, "running [{}]", op.configuration_id()),
            None => writeln!(f, "running none"),
        }
    }
}

// ─── Builder ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct AdaptorSpec {
    metric: usize,
    monitor: Monitor,
    inertia: usize,
    mode: CorrectionMode,
}

/// Assembles and validates a [`Manager`].
#[derive(Debug)]
pub struct ManagerBuilder<K, M, const KN: usize, const MN: usize> {
    block: String,
    points: Vec<OperatingPoint<K, M, KN, MN>>,
    states: Vec<State>,
    active: Option<String>,
    adaptors: Vec<AdaptorSpec>,
    watched: Vec<(usize, Monitor)>,
}

impl<K, M, const KN: usize, const MN: usize> ManagerBuilder<K, M, KN, MN>
where
    K: FieldValue,
    M: FieldValue,
{
    /// Empty builder.
    pub fn new(block: impl Into<String>) -> Self {
        Self {
            block: block.into(),
            points: Vec::new(),
            states: Vec::new(),
            active: None,
            adaptors: Vec::new(),
            watched: Vec::new(),
        }
    }

    /// Add operating points.
    pub fn knowledge(mut self, points: impl IntoIterator<Item = OperatingPoint<K, M, KN, MN>>) -> Self {
        self.points.extend(points);
        self
    }

    /// Register a state. The first one becomes active unless
    /// [`ManagerBuilder::active_state`] says otherwise.
    pub fn state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    /// Name the initially active state.
    pub fn active_state(mut self, name: impl Into<String>) -> Self {
        self.active = Some(name.into());
        self
    }

    /// Attach a one-sigma adaptor to `metric`, fed by a new monitor with the
    /// default window.
    pub fn adaptor(self, metric: usize, inertia: usize, mode: CorrectionMode) -> Self {
        self.adaptor_with_monitor(metric, Monitor::default(), inertia, mode)
    }

    /// Attach a one-sigma adaptor to `metric`, fed by `monitor`.
    pub fn adaptor_with_monitor(
        mut self,
        metric: usize,
        monitor: Monitor,
        inertia: usize,
        mode: CorrectionMode,
    ) -> Self {
        self.adaptors.push(AdaptorSpec { metric, monitor, inertia, mode });
        self
    }

    /// Observe `metric` for constraint tracking without adapting it.
    pub fn watch(mut self, metric: usize, monitor: Monitor) -> Self {
        self.watched.push((metric, monitor));
        self
    }

    /// Copy for another knowledge base: same adaptors and monitor handles,
    /// the given points, and `states` with their active name in place of the
    /// declared ones when given.
    pub(crate) fn sibling(
        &self,
        states: Option<(Vec<State>, String)>,
        points: Vec<OperatingPoint<K, M, KN, MN>>,
    ) -> Self {
        let (states, active) = match states {
            Some((states, active)) => (states, Some(active)),
            None => (self.states.clone(), self.active.clone()),
        };
        Self {
            block: self.block.clone(),
            points,
            states,
            active,
            adaptors: self.adaptors.clone(),
            watched: self.watched.clone(),
        }
    }

    /// Validate everything and build the manager.
    pub fn build(self) -> Result<Manager<K, M, KN, MN>, ConfigError> {
        let telemetry = Arc::new(Telemetry::new(self.block));
        let knowledge = KnowledgeBase::new(self.points)?;

        let mut states: HashMap<String, State> = HashMap::new();
        let mut first: Option<String> = None;
        for state in self.states {
            state.validate(&knowledge)?;
            if states.contains_key(state.name()) {
                return Err(ConfigError::DuplicateState { name: state.name().to_owned() });
            }
            first.get_or_insert_with(|| state.name().to_owned());
            states.insert(state.name().to_owned(), state);
        }
        if states.is_empty() {
            states.insert(DEFAULT_STATE.to_owned(), State::new(DEFAULT_STATE, RankCalculator::unranked()));
            first = Some(DEFAULT_STATE.to_owned());
        }
        let active = match self.active.or(first) {
            Some(name) if states.contains_key(&name) => name,
            Some(name) => return Err(ConfigError::UnknownState { name }),
            None => DEFAULT_STATE.to_owned(),
        };

        let mut adaptors = KnowledgeAdaptor::new();
        let mut monitors: HashMap<usize, Monitor> = HashMap::new();
        for spec in self.adaptors {
            adaptors.add(Box::new(OneSigmaAdaptor::new(
                spec.metric,
                spec.monitor.clone(),
                spec.inertia,
                spec.mode,
                Arc::clone(&telemetry),
            )))?;
            monitors.insert(spec.metric, spec.monitor);
        }
        adaptors.validate_indices(MN)?;
        for (metric, monitor) in self.watched {
            if metric >= MN {
                return Err(ConfigError::IndexOutOfRange {
                    segment: SegmentKind::Metrics,
                    index: metric,
                    size: MN,
                });
            }
            monitors.entry(metric).or_insert(monitor);
        }

        tracing::info!(
            block = %telemetry.block(),
            points = knowledge.len(),
            states = states.len(),
            active = %active,
            adaptors = adaptors.len(),
            "manager ready"
        );

        Ok(Manager {
            telemetry,
            knowledge: SharedKnowledge::new(knowledge),
            inbox: KnowledgeInbox::new(),
            registry: RwLock::new(Registry { states, active }),
            adaptors,
            monitors,
            running: RwLock::new(None),
        })
    }
}
