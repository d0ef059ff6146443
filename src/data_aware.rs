/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Input-dependent knowledge: one manager per feature cluster.
//!
//! Some blocks behave differently depending on the data they process. A
//! [`DataAwareManager`] keeps one [`Manager`] per *feature cluster*, each with
//! the knowledge profiled on inputs like the cluster's features, and hands the
//! control loop to the cluster closest to the current input.
//!
//! ```text
//! select_feature_cluster(input)   pick the closest admissible cluster
//! get_best_configuration()        delegated to the selected cluster
//! ```
//!
//! A cluster is *admissible* for an input when every feature passes its
//! [`FeatureComparison`], comparing the cluster feature on the left. Clusters
//! are scanned in insertion order: an admissible cluster beats an
//! inadmissible one, otherwise the smaller [`FeatureDistance`] wins and ties
//! keep the earlier cluster.
//!
//! # Invariants
//!
//! - Every cluster carries the same states, constraints and ranks; state
//!   operations are applied to all of them or, on error, to none.
//! - While any cluster exists exactly one is selected, and it cannot be
//!   removed.
//! - Clusters share the monitor handles of the template builder; adaptor
//!   windows and constraint trackers are per cluster.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hashbrown::HashMap;

use crate::constraint::Constraint;
use crate::distribution::FieldValue;
use crate::error::ConfigError;
use crate::manager::{Manager, ManagerBuilder};
use crate::operating_point::OperatingPoint;
use crate::rank::RankCalculator;
use crate::state::{Selection, State};

// ─── Feature comparison ─────────────────────────────────────────────────────

/// Admissibility test of one data feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FeatureComparison {
    /// The cluster feature must not exceed the input feature.
    LessOrEqual,
    /// The cluster feature must not fall below the input feature.
    GreaterOrEqual,
    /// Any value is admissible.
    #[default]
    DontCare,
}

impl FeatureComparison {
    /// Whether a cluster feature is admissible for an input feature.
    #[inline]
    pub fn admits(self, cluster: f64, input: f64) -> bool {
        match self {
            Self::LessOrEqual => cluster <= input,
            Self::GreaterOrEqual => cluster >= input,
            Self::DontCare => true,
        }
    }
}

/// Distance used to rank clusters against an input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FeatureDistance {
    /// Squared Euclidean distance on the raw features.
    #[default]
    Euclidean,
    /// Squared Euclidean distance after rescaling every feature to `[0, 1]`
    /// over the input and the two clusters being compared.
    Normalized,
}

impl FeatureDistance {
    /// Distances of `a` and `b` from `origin`.
    pub fn measure<const FN: usize>(self, origin: &[f64; FN], a: &[f64; FN], b: &[f64; FN]) -> (f64, f64) {
        match self {
            Self::Euclidean => (squared_distance(origin, a), squared_distance(origin, b)),
            Self::Normalized => {
                let (mut o, mut a, mut b) = (*origin, *a, *b);
                for i in 0..FN {
                    let min = o[i].min(a[i]).min(b[i]);
                    let width = o[i].max(a[i]).max(b[i]) - min;
                    // a flat coordinate tells the clusters nothing apart
                    let scale = |x: f64| if width > 0.0 { (x - min) / width } else { 0.0 };
                    (o[i], a[i], b[i]) = (scale(o[i]), scale(a[i]), scale(b[i]));
                }
                (squared_distance(&o, &a), squared_distance(&o, &b))
            }
        }
    }
}

fn squared_distance<const FN: usize>(a: &[f64; FN], b: &[f64; FN]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn check_features<const FN: usize>(features: &[f64; FN]) -> Result<(), ConfigError> {
    match features.iter().position(|f| !f.is_finite()) {
        Some(index) => Err(ConfigError::InvalidFeature { index, value: features[index] }),
        None => Ok(()),
    }
}

/// Render features the way configuration ids are rendered: `"0.5,2"`.
fn cluster_key<const FN: usize>(features: &[f64; FN]) -> String {
    let mut key = String::new();
    for (i, value) in features.iter().enumerate() {
        if i > 0 {
            key.push(',');
        }
        let value = if *value == 0.0 { 0.0 } else { *value };
        key.push_str(&format!("{value}"));
    }
    key
}

// ─── Clusters ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Cluster<K, M, const KN: usize, const MN: usize, const FN: usize> {
    features: [f64; FN],
    key: String,
    manager: Arc<Manager<K, M, KN, MN>>,
}

#[derive(Debug)]
struct Clusters<K, M, const KN: usize, const MN: usize, const FN: usize> {
    entries: Vec<Cluster<K, M, KN, MN, FN>>,
    index: HashMap<String, usize>,
    active: Option<usize>,
}

impl<K, M, const KN: usize, const MN: usize, const FN: usize> Clusters<K, M, KN, MN, FN> {
    fn active(&self) -> Option<&Cluster<K, M, KN, MN, FN>> {
        self.active.and_then(|i| self.entries.get(i))
    }

    fn managers(&self) -> impl Iterator<Item = &Arc<Manager<K, M, KN, MN>>> {
        self.entries.iter().map(|c| &c.manager)
    }

    fn reindex(&mut self) {
        self.index = self.entries.iter().enumerate().map(|(i, c)| (c.key.clone(), i)).collect();
    }
}

// ─── DataAwareManager ───────────────────────────────────────────────────────

/// Feature-clustered autonomic manager of one application block.
#[derive(Debug)]
pub struct DataAwareManager<K, M, const KN: usize, const MN: usize, const FN: usize> {
    template: ManagerBuilder<K, M, KN, MN>,
    comparisons: [FeatureComparison; FN],
    distance: FeatureDistance,
    clusters: RwLock<Clusters<K, M, KN, MN, FN>>,
}

impl<K, M, const KN: usize, const MN: usize, const FN: usize> DataAwareManager<K, M, KN, MN, FN>
where
    K: FieldValue,
    M: FieldValue,
{
    /// Manager without clusters.
    ///
    /// `template` supplies the block name, the initial states and the
    /// adaptors and monitors of every cluster. Knowledge given to it is
    /// ignored; each cluster brings its own.
    pub fn new(
        template: ManagerBuilder<K, M, KN, MN>,
        comparisons: [FeatureComparison; FN],
        distance: FeatureDistance,
    ) -> Result<Self, ConfigError> {
        if FN == 0 {
            return Err(ConfigError::ArityMismatch { expected: 1, found: 0 });
        }
        Ok(Self {
            template,
            comparisons,
            distance,
            clusters: RwLock::new(Clusters { entries: Vec::new(), index: HashMap::new(), active: None }),
        })
    }

    fn clusters(&self) -> RwLockReadGuard<'_, Clusters<K, M, KN, MN, FN>> {
        self.clusters.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn clusters_mut(&self) -> RwLockWriteGuard<'_, Clusters<K, M, KN, MN, FN>> {
        self.clusters.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Comparison applied to each feature.
    pub fn comparisons(&self) -> &[FeatureComparison; FN] {
        &self.comparisons
    }

    /// Distance between features.
    pub fn distance(&self) -> FeatureDistance {
        self.distance
    }

    // ── Clusters ─────────────────────────────────────────────────────────

    /// Add a cluster profiled on inputs like `features`.
    ///
    /// The first cluster takes the template states and becomes selected.
    /// Later ones copy the states of the first cluster, with fresh trackers.
    pub fn add_feature_cluster(
        &self,
        features: [f64; FN],
        points: impl IntoIterator<Item = OperatingPoint<K, M, KN, MN>>,
    ) -> Result<(), ConfigError> {
        check_features(&features)?;
        let key = cluster_key(&features);
        let mut clusters = self.clusters_mut();
        if clusters.index.contains_key(&key) {
            return Err(ConfigError::DuplicateCluster { key });
        }

        let states = clusters.entries.first().map(|reference| {
            let reference = &reference.manager;
            let states = reference
                .state_names()
                .iter()
                .filter_map(|name| reference.state(name).ok())
                .map(|mut state| {
                    state.reset_trackers();
                    state
                })
                .collect();
            (states, reference.active_state())
        });
        let manager = self.template.sibling(states, points.into_iter().collect()).build()?;

        tracing::info!(
            block = %manager.telemetry().block(),
            cluster = %key,
            points = manager.knowledge().len(),
            "feature cluster added"
        );
        let position = clusters.entries.len();
        clusters.index.insert(key.clone(), position);
        clusters.entries.push(Cluster { features, key, manager: Arc::new(manager) });
        clusters.active.get_or_insert(position);
        Ok(())
    }

    /// Remove the cluster with exactly these features.
    pub fn remove_feature_cluster(&self, features: &[f64; FN]) -> Result<(), ConfigError> {
        let key = cluster_key(features);
        let mut clusters = self.clusters_mut();
        let Some(&position) = clusters.index.get(&key) else {
            return Err(ConfigError::UnknownCluster { key });
        };
        if clusters.active == Some(position) {
            return Err(ConfigError::ActiveClusterRemoval { key });
        }
        clusters.entries.remove(position);
        if let Some(active) = clusters.active.as_mut() {
            if *active > position {
                *active -= 1;
            }
        }
        clusters.reindex();
        tracing::info!(cluster = %key, "feature cluster removed");
        Ok(())
    }

    /// Select the cluster that best matches the current input.
    ///
    /// Returns `true` when the selection moved to another cluster. The new
    /// cluster starts with neutral adaptors and inherits the running
    /// configuration when its knowledge has it.
    pub fn select_feature_cluster(&self, input: &[f64; FN]) -> Result<bool, ConfigError> {
        check_features(input)?;
        let mut clusters = self.clusters_mut();
        if clusters.entries.is_empty() {
            return Err(ConfigError::NoFeatureCluster);
        }

        let mut best = 0;
        for candidate in 1..clusters.entries.len() {
            if self.prefers(input, &clusters.entries[best].features, &clusters.entries[candidate].features) {
                best = candidate;
            }
        }

        let previous = clusters.active.replace(best);
        if previous == Some(best) {
            return Ok(false);
        }
        let next = &clusters.entries[best];
        let running = previous
            .and_then(|p| clusters.entries.get(p))
            .and_then(|c| c.manager.running_configuration());
        next.manager.reset_adaptation();
        if let Some(running) = running {
            let knowledge = next.manager.knowledge();
            if let Some(point) = knowledge.get(running.configuration_id()) {
                next.manager.configuration_applied(point);
            }
        }
        tracing::info!(
            block = %next.manager.telemetry().block(),
            cluster = %next.key,
            "feature cluster selected"
        );
        Ok(true)
    }

    /// Whether `target` matches `input` strictly better than `best`.
    fn prefers(&self, input: &[f64; FN], best: &[f64; FN], target: &[f64; FN]) -> bool {
        let best_ok = self.admissible(best, input);
        let target_ok = self.admissible(target, input);
        if best_ok != target_ok {
            return target_ok;
        }
        let (to_best, to_target) = self.distance.measure(input, best, target);
        to_target < to_best
    }

    /// Whether a cluster is admissible for an input.
    pub fn admissible(&self, cluster: &[f64; FN], input: &[f64; FN]) -> bool {
        self.comparisons
            .iter()
            .zip(cluster.iter().zip(input))
            .all(|(c, (k, x))| c.admits(*k, *x))
    }

    /// Features of the selected cluster.
    pub fn selected_features(&self) -> Option<[f64; FN]> {
        self.clusters().active().map(|c| c.features)
    }

    /// Features of every cluster, in insertion order.
    pub fn feature_clusters(&self) -> Vec<[f64; FN]> {
        self.clusters().entries.iter().map(|c| c.features).collect()
    }

    /// Manager of the selected cluster.
    pub fn manager(&self) -> Result<Arc<Manager<K, M, KN, MN>>, ConfigError> {
        self.clusters()
            .active()
            .map(|c| Arc::clone(&c.manager))
            .ok_or(ConfigError::NoFeatureCluster)
    }

    /// Manager of the cluster with exactly these features, selected or not.
    pub fn cluster(&self, features: &[f64; FN]) -> Option<Arc<Manager<K, M, KN, MN>>> {
        let clusters = self.clusters();
        let &position = clusters.index.get(&cluster_key(features))?;
        clusters.entries.get(position).map(|c| Arc::clone(&c.manager))
    }

    // ── Control loop ─────────────────────────────────────────────────────

    /// Best configuration of the selected cluster.
    pub fn get_best_configuration(&self) -> Result<Selection<K, M, KN, MN>, ConfigError> {
        Ok(self.manager()?.get_best_configuration())
    }

    /// Record the configuration the application now runs.
    pub fn configuration_applied(&self, point: &Arc<OperatingPoint<K, M, KN, MN>>) -> Result<(), ConfigError> {
        self.manager()?.configuration_applied(point);
        Ok(())
    }

    /// Control-loop tick of the selected cluster; `false` without clusters.
    pub fn update(&self) -> bool {
        self.manager().map_or(false, |m| m.update())
    }

    // ── States, applied to every cluster ─────────────────────────────────

    fn each(&self, op: impl Fn(&Manager<K, M, KN, MN>) -> Result<(), ConfigError>) -> Result<(), ConfigError> {
        let clusters = self.clusters_mut();
        if clusters.entries.is_empty() {
            return Err(ConfigError::NoFeatureCluster);
        }
        let result = clusters.managers().try_for_each(|m| op(m.as_ref()));
        result
    }

    /// Register a state in every cluster.
    pub fn add_state(&self, state: State) -> Result<(), ConfigError> {
        let clusters = self.clusters_mut();
        if clusters.entries.is_empty() {
            return Err(ConfigError::NoFeatureCluster);
        }
        let managers: Vec<_> = clusters.managers().collect();
        for (i, m) in managers.iter().enumerate() {
            if let Err(err) = m.add_state(state.clone()) {
                for done in &managers[..i] {
                    let _ = done.remove_state(state.name());
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Unregister a state from every cluster.
    pub fn remove_state(&self, name: &str) -> Result<(), ConfigError> {
        self.each(|m| m.remove_state(name).map(drop))
    }

    /// Switch the active state of every cluster.
    pub fn set_state(&self, name: &str) -> Result<(), ConfigError> {
        self.each(|m| m.set_state(name))
    }

    /// Name of the active state.
    pub fn active_state(&self) -> Result<String, ConfigError> {
        Ok(self.manager()?.active_state())
    }

    /// Add a constraint to a state of every cluster.
    pub fn add_constraint(&self, state: &str, constraint: Constraint) -> Result<(), ConfigError> {
        self.each(|m| m.add_constraint(state, constraint.clone()))
    }

    /// Remove a constraint from a state of every cluster.
    pub fn remove_constraint(&self, state: &str, priority: u32) -> Result<(), ConfigError> {
        self.each(|m| m.remove_constraint(state, priority).map(drop))
    }

    /// Move a constraint target in every cluster.
    pub fn set_goal_value(&self, state: &str, priority: u32, target: f64) -> Result<(), ConfigError> {
        self.each(|m| m.set_goal_value(state, priority, target))
    }

    /// Replace the rank of a state in every cluster.
    pub fn set_rank(&self, state: &str, rank: RankCalculator) -> Result<(), ConfigError> {
        let clusters = self.clusters_mut();
        let managers: Vec<_> = clusters.managers().collect();
        let Some(first) = managers.first() else {
            return Err(ConfigError::NoFeatureCluster);
        };
        let previous = first.state(state)?.rank().clone();
        for (i, m) in managers.iter().enumerate() {
            if let Err(err) = m.set_rank(state, rank.clone()) {
                for done in &managers[..i] {
                    let _ = done.set_rank(state, previous.clone());
                }
                return Err(err);
            }
        }
        Ok(())
    }
}
