//! Hyperparameters of the covariance functions.
//!
//! A covariance function reads its hyperparameter values from a [Hyperparameters] table.
//! The table is a shared handle: cloning it does not copy the values, so every
//! covariance function built from the same table (see [crate::CovarianceFunction::combine])
//! observes an update made through any of them. This is how the marginal likelihood
//! optimizer tunes a composed kernel in place.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Kind of hyperparameter, used as identity of a hyperparameter within a table
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum HyperparamKind {
    /// Length scale `l` of a stationary kernel
    LengthScale,
    /// Signal standard deviation `sigma_f`, the kernel amplitude is `sigma_f^2`
    SignalVariance,
    /// Jitter (observation noise) standard deviation `sigma_j`, added as `sigma_j^2`
    JitterVariance,
    /// Degrees of freedom of the Matern family
    DegreesOfFreedom,
}

impl HyperparamKind {
    /// All hyperparameter kinds
    pub const ALL: [HyperparamKind; 4] = [
        HyperparamKind::LengthScale,
        HyperparamKind::SignalVariance,
        HyperparamKind::JitterVariance,
        HyperparamKind::DegreesOfFreedom,
    ];

    /// Default (lower, upper) bounds used when optimizing the hyperparameter
    pub fn default_bounds(&self) -> (f64, f64) {
        match self {
            HyperparamKind::LengthScale => (0.1, 1000.),
            HyperparamKind::SignalVariance => (0.001, 1000.),
            HyperparamKind::JitterVariance => (0.001, 200.),
            HyperparamKind::DegreesOfFreedom => (0.5, 100.),
        }
    }
}

impl fmt::Display for HyperparamKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            HyperparamKind::LengthScale => "LengthScale",
            HyperparamKind::SignalVariance => "SignalVariance",
            HyperparamKind::JitterVariance => "JitterVariance",
            HyperparamKind::DegreesOfFreedom => "DegreesOfFreedom",
        };
        write!(f, "{name}")
    }
}

/// A named scalar hyperparameter value.
///
/// Equality is defined by kind only, two hyperparameters of the same kind
/// denote the same parameter whatever their values.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Hyperparameter {
    kind: HyperparamKind,
    value: f64,
}

impl Hyperparameter {
    /// Constructor
    pub fn new(kind: HyperparamKind, value: f64) -> Self {
        Hyperparameter { kind, value }
    }

    /// Length scale hyperparameter
    pub fn length_scale(value: f64) -> Self {
        Self::new(HyperparamKind::LengthScale, value)
    }

    /// Signal variance hyperparameter
    pub fn signal_variance(value: f64) -> Self {
        Self::new(HyperparamKind::SignalVariance, value)
    }

    /// Jitter variance hyperparameter
    pub fn jitter_variance(value: f64) -> Self {
        Self::new(HyperparamKind::JitterVariance, value)
    }

    /// Degrees of freedom hyperparameter
    pub fn degrees_of_freedom(value: f64) -> Self {
        Self::new(HyperparamKind::DegreesOfFreedom, value)
    }

    /// Kind of the hyperparameter
    pub fn kind(&self) -> HyperparamKind {
        self.kind
    }

    /// Value of the hyperparameter
    pub fn value(&self) -> f64 {
        self.value
    }
}

impl PartialEq for Hyperparameter {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for Hyperparameter {}

/// A shared, mutable table of hyperparameter values keyed by kind.
///
/// `Clone` shares the underlying table, use [Hyperparameters::deep_copy] to get an
/// independent one. Not thread-safe: mutations are expected to be exclusive and sequential.
#[derive(Clone, Default)]
pub struct Hyperparameters(Rc<RefCell<BTreeMap<HyperparamKind, f64>>>);

impl Hyperparameters {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table initialized with given hyperparameters, last one wins on duplicated kinds
    pub fn from_params(params: &[Hyperparameter]) -> Self {
        let table = params.iter().map(|p| (p.kind(), p.value())).collect();
        Hyperparameters(Rc::new(RefCell::new(table)))
    }

    /// Value of the hyperparameter of the given kind if present
    pub fn get(&self, kind: HyperparamKind) -> Option<f64> {
        self.0.borrow().get(&kind).copied()
    }

    /// Set (or insert) the value of the hyperparameter of the given kind.
    ///
    /// The update is visible to every covariance function sharing this table.
    pub fn set(&self, kind: HyperparamKind, value: f64) {
        self.0.borrow_mut().insert(kind, value);
    }

    /// Whether the table holds a hyperparameter of the given kind
    pub fn contains(&self, kind: HyperparamKind) -> bool {
        self.0.borrow().contains_key(&kind)
    }

    /// Hyperparameter kinds held by the table, in [HyperparamKind] order
    pub fn kinds(&self) -> Vec<HyperparamKind> {
        self.0.borrow().keys().copied().collect()
    }

    /// Snapshot of the current values
    pub fn values(&self) -> BTreeMap<HyperparamKind, f64> {
        self.0.borrow().clone()
    }

    /// Snapshot of the current values as hyperparameters
    pub fn to_vec(&self) -> Vec<Hyperparameter> {
        self.0
            .borrow()
            .iter()
            .map(|(&kind, &value)| Hyperparameter::new(kind, value))
            .collect()
    }

    /// Number of hyperparameters
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Whether both handles point to the same table
    pub fn shares_with(&self, other: &Hyperparameters) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// An independent table holding the current values
    pub fn deep_copy(&self) -> Self {
        Hyperparameters(Rc::new(RefCell::new(self.values())))
    }

    /// A new table holding the union of both tables, values of `self` win on shared kinds
    pub(crate) fn union(&self, other: &Hyperparameters) -> Self {
        let mut table = other.values();
        table.extend(self.values());
        Hyperparameters(Rc::new(RefCell::new(table)))
    }

    /// Run `f` against the current values without copying them
    pub(crate) fn with<R>(&self, f: impl FnOnce(&BTreeMap<HyperparamKind, f64>) -> R) -> R {
        f(&self.0.borrow())
    }
}

impl fmt::Debug for Hyperparameters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.0.borrow().iter()).finish()
    }
}

impl fmt::Display for Hyperparameters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let values = self
            .0
            .borrow()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "[{values}]")
    }
}

/// Lower and upper bounds of hyperparameters used by the optimizer
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct HyperparamBounds(BTreeMap<HyperparamKind, (f64, f64)>);

impl Default for HyperparamBounds {
    fn default() -> Self {
        HyperparamBounds(
            HyperparamKind::ALL
                .iter()
                .map(|k| (*k, k.default_bounds()))
                .collect(),
        )
    }
}

impl HyperparamBounds {
    /// Bounds built from lists of minimum and maximum values,
    /// a kind missing in a list keeps its default bound.
    pub fn from_lists(min_bounds: &[Hyperparameter], max_bounds: &[Hyperparameter]) -> Self {
        let mut bounds = Self::default();
        for lo in min_bounds {
            let entry = bounds.0.entry(lo.kind()).or_insert(lo.kind().default_bounds());
            entry.0 = lo.value();
        }
        for up in max_bounds {
            let entry = bounds.0.entry(up.kind()).or_insert(up.kind().default_bounds());
            entry.1 = up.value();
        }
        bounds
    }

    /// Set bounds of the given kind
    pub fn with(mut self, kind: HyperparamKind, lower: f64, upper: f64) -> Self {
        self.0.insert(kind, (lower, upper));
        self
    }

    /// (lower, upper) bounds of the given kind
    pub fn get(&self, kind: HyperparamKind) -> (f64, f64) {
        self.0
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_bounds())
    }

    /// Clamp value within bounds of the given kind
    pub fn clamp(&self, kind: HyperparamKind, value: f64) -> f64 {
        let (lo, up) = self.get(kind);
        value.max(lo).min(up)
    }

    /// Iterate over (kind, (lower, upper))
    pub fn iter(&self) -> impl Iterator<Item = (&HyperparamKind, &(f64, f64))> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hyperparameter_identity_by_kind() {
        assert_eq!(
            Hyperparameter::length_scale(1.),
            Hyperparameter::length_scale(2.)
        );
        assert_ne!(
            Hyperparameter::length_scale(1.),
            Hyperparameter::signal_variance(1.)
        );
    }

    #[test]
    fn test_shared_table() {
        let params = Hyperparameters::from_params(&[
            Hyperparameter::length_scale(2.),
            Hyperparameter::signal_variance(10.),
        ]);
        let alias = params.clone();
        let copy = params.deep_copy();
        alias.set(HyperparamKind::LengthScale, 5.);
        assert_eq!(Some(5.), params.get(HyperparamKind::LengthScale));
        assert_eq!(Some(2.), copy.get(HyperparamKind::LengthScale));
        assert!(params.shares_with(&alias));
        assert!(!params.shares_with(&copy));
        assert_eq!(None, params.get(HyperparamKind::JitterVariance));
    }

    #[test]
    fn test_union_keeps_first_values() {
        let a = Hyperparameters::from_params(&[Hyperparameter::length_scale(2.)]);
        let b = Hyperparameters::from_params(&[
            Hyperparameter::length_scale(3.),
            Hyperparameter::jitter_variance(0.1),
        ]);
        let u = a.union(&b);
        assert_eq!(
            vec![HyperparamKind::LengthScale, HyperparamKind::JitterVariance],
            u.kinds()
        );
        assert_eq!(Some(2.), u.get(HyperparamKind::LengthScale));
    }

    #[test]
    fn test_bounds() {
        let bounds = HyperparamBounds::from_lists(
            &[Hyperparameter::length_scale(0.5)],
            &[Hyperparameter::jitter_variance(1.)],
        );
        assert_eq!((0.5, 1000.), bounds.get(HyperparamKind::LengthScale));
        assert_eq!((0.001, 1.), bounds.get(HyperparamKind::JitterVariance));
        assert_eq!(0.001, bounds.clamp(HyperparamKind::SignalVariance, -3.));
        assert_eq!(1000., bounds.clamp(HyperparamKind::SignalVariance, 1e6));
    }
}
