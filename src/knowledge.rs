//! Knowledge base: the operating point set of a block, and how it changes.
//!
//! The set is immutable once built. [`SharedKnowledge`] keeps the current set
//! as `RwLock<Arc<KnowledgeBase>>`: readers clone the `Arc` under a short read
//! lock and then work lock-free, writers build a complete replacement and swap
//! it in. A reader therefore sees either the old or the new set, never a mix.
//!
//! Updates produced on another thread travel through a bounded queue
//! ([`KnowledgeSender`]) and are applied by the control loop.
//!
//! # Invariants
//!
//! - Configuration ids are unique within a base.
//! - Merge keeps the position of a replaced point and appends new ones, so
//!   insertion order (the rank tie-break) survives updates.
//! - Every swap bumps the version by one.
//! - A base is never empty. An update that would empty it, or that fails
//!   validation, is rejected and the previous base stays current.

use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use hashbrown::HashMap;

use crate::distribution::FieldValue;
use crate::error::{ConfigError, KnowledgeError};
use crate::operating_point::OperatingPoint;

// ─── KnowledgeBase ──────────────────────────────────────────────────────────

/// Ordered, deduplicated set of operating points.
#[derive(Debug)]
pub struct KnowledgeBase<K, M, const KN: usize, const MN: usize> {
    points: Vec<Arc<OperatingPoint<K, M, KN, MN>>>,
    index: HashMap<String, usize>,
    version: u64,
}

impl<K, M, const KN: usize, const MN: usize> KnowledgeBase<K, M, KN, MN>
where
    K: FieldValue,
    M: FieldValue,
{
    /// Build a base at version 0. A repeated configuration replaces the
    /// earlier one in place.
    pub fn new(
        points: impl IntoIterator<Item = OperatingPoint<K, M, KN, MN>>,
    ) -> Result<Self, ConfigError> {
        let mut base = Self { points: Vec::new(), index: HashMap::new(), version: 0 };
        base.upsert_all(points.into_iter().map(Arc::new));
        base.non_empty()
    }

    fn non_empty(self) -> Result<Self, ConfigError> {
        if self.points.is_empty() {
            Err(ConfigError::EmptyKnowledge)
        } else {
            Ok(self)
        }
    }

    fn upsert_all(&mut self, points: impl IntoIterator<Item = Arc<OperatingPoint<K, M, KN, MN>>>) {
        for op in points {
            match self.index.get(op.configuration_id()) {
                Some(&position) => self.points[position] = op,
                None => {
                    self.index.insert(op.configuration_id().to_owned(), self.points.len());
                    self.points.push(op);
                }
            }
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .points
            .iter()
            .enumerate()
            .map(|(i, op)| (op.configuration_id().to_owned(), i))
            .collect();
    }

    /// Apply an update, producing the next version.
    pub fn apply(&self, update: KnowledgeUpdate<K, M, KN, MN>) -> Result<Self, ConfigError> {
        let mut next = match update {
            KnowledgeUpdate::Replace(points) => Self::new(points)?,
            KnowledgeUpdate::Merge(points) => {
                let mut next = self.shallow_clone();
                next.upsert_all(points.into_iter().map(Arc::new));
                next
            }
            KnowledgeUpdate::Remove(ids) => {
                let mut next = self.shallow_clone();
                next.points.retain(|op| !ids.iter().any(|id| id == op.configuration_id()));
                next.rebuild_index();
                next.non_empty()?
            }
        };
        next.version = self.version + 1;
        Ok(next)
    }

    fn shallow_clone(&self) -> Self {
        Self { points: self.points.clone(), index: self.index.clone(), version: self.version }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always `false`: a base holds at least one point.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points in insertion order.
    pub fn points(&self) -> &[Arc<OperatingPoint<K, M, KN, MN>>] {
        &self.points
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &OperatingPoint<K, M, KN, MN>> {
        self.points.iter().map(|op| op.as_ref())
    }

    /// Look a point up by configuration id.
    pub fn get(&self, configuration_id: &str) -> Option<&Arc<OperatingPoint<K, M, KN, MN>>> {
        self.index.get(configuration_id).map(|&i| &self.points[i])
    }

    /// Insertion position of a configuration.
    pub fn position(&self, configuration_id: &str) -> Option<usize> {
        self.index.get(configuration_id).copied()
    }

    /// Monotonic version, 0 for the initial base.
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// A change to the operating point set.
#[derive(Clone, Debug)]
pub enum KnowledgeUpdate<K, M, const KN: usize, const MN: usize> {
    /// Discard the current set.
    Replace(Vec<OperatingPoint<K, M, KN, MN>>),
    /// Add points; an existing configuration is replaced in place.
    Merge(Vec<OperatingPoint<K, M, KN, MN>>),
    /// Drop the given configuration ids.
    Remove(Vec<String>),
}

// ─── SharedKnowledge ────────────────────────────────────────────────────────

/// Copy-on-write holder of the current [`KnowledgeBase`].
#[derive(Debug)]
pub struct SharedKnowledge<K, M, const KN: usize, const MN: usize> {
    current: RwLock<Arc<KnowledgeBase<K, M, KN, MN>>>,
}

impl<K, M, const KN: usize, const MN: usize> SharedKnowledge<K, M, KN, MN>
where
    K: FieldValue,
    M: FieldValue,
{
    /// Wrap an initial base.
    pub fn new(base: KnowledgeBase<K, M, KN, MN>) -> Self {
        Self { current: RwLock::new(Arc::new(base)) }
    }

    /// The current base. Cheap: one `Arc` clone under a read lock.
    pub fn snapshot(&self) -> Arc<KnowledgeBase<K, M, KN, MN>> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Build the next base, validate it and swap it in.
    ///
    /// Writers are serialised by the write lock; readers keep the snapshot
    /// they already hold.
    pub fn update<F>(
        &self,
        update: KnowledgeUpdate<K, M, KN, MN>,
        validate: F,
    ) -> Result<Arc<KnowledgeBase<K, M, KN, MN>>, ConfigError>
    where
        F: FnOnce(&KnowledgeBase<K, M, KN, MN>) -> Result<(), ConfigError>,
    {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = guard.apply(update)?;
        validate(&next)?;
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        Ok(next)
    }
}

// ─── Hand-off queue ─────────────────────────────────────────────────────────

/// Producer end of the bounded knowledge update queue.
///
/// Cloneable; give one to each thread that receives remote knowledge.
#[derive(Debug)]
pub struct KnowledgeSender<K, M, const KN: usize, const MN: usize> {
    tx: SyncSender<KnowledgeUpdate<K, M, KN, MN>>,
    capacity: usize,
}

impl<K, M, const KN: usize, const MN: usize> Clone for KnowledgeSender<K, M, KN, MN> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), capacity: self.capacity }
    }
}

impl<K, M, const KN: usize, const MN: usize> KnowledgeSender<K, M, KN, MN> {
    /// Queue an update without blocking.
    pub fn send(&self, update: KnowledgeUpdate<K, M, KN, MN>) -> Result<(), KnowledgeError> {
        self.tx.try_send(update).map_err(|e| match e {
            TrySendError::Full(_) => KnowledgeError::QueueFull { capacity: self.capacity },
            TrySendError::Disconnected(_) => KnowledgeError::Disconnected,
        })
    }
}

/// Consumer end of the queue, held by the manager.
#[derive(Debug)]
pub(crate) struct KnowledgeInbox<K, M, const KN: usize, const MN: usize> {
    rx: Mutex<Option<Receiver<KnowledgeUpdate<K, M, KN, MN>>>>,
}

impl<K, M, const KN: usize, const MN: usize> KnowledgeInbox<K, M, KN, MN> {
    pub(crate) fn new() -> Self {
        Self { rx: Mutex::new(None) }
    }

    /// Open a fresh queue, replacing any previous one.
    pub(crate) fn open(&self, capacity: usize) -> KnowledgeSender<K, M, KN, MN> {
        let capacity = capacity.max(1);
        let (tx, rx) = std::sync::mpsc::sync_channel(capacity);
        *self.rx.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
        KnowledgeSender { tx, capacity }
    }

    /// Take every pending update.
    pub(crate) fn drain(&self) -> Vec<KnowledgeUpdate<K, M, KN, MN>> {
        let guard = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rx) = guard.as_ref() else {
            return Vec::new();
        };
        let mut pending = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(update) => pending.push(update),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        pending
    }
}
