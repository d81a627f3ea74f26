//! Algorithm selection: which backend algorithm each operator occurrence
//! runs with.

use super::{Operator, OperatorKind, SwapError, SwapResult};
use std::collections::HashMap;
use std::fmt;

/// Sentinel algorithm: keep the operator on the host framework.
///
/// Only meaningful for a partial swap. A full swap has no host to fall
/// back to and rejects it.
pub const PASSTHROUGH: &str = "passthrough";

/// Algorithm bound to kinds without an explicit policy.
pub const DEFAULT_ALGORITHM: &str = "default";

/// Signature of a `Callback` policy.
pub type SelectFn = dyn Fn(&Operator<'_>) -> String;

/// How the algorithm for each occurrence of one kind is chosen.
pub enum AlgorithmPolicy {
    /// Same algorithm for every occurrence.
    Constant(String),
    /// The k-th occurrence (in trace order) gets the k-th entry.
    Sequence(Vec<String>),
    /// Chosen by inspecting the operator.
    Callback(Box<SelectFn>),
}

impl AlgorithmPolicy {
    /// Binds every occurrence to `name`.
    pub fn constant(name: impl Into<String>) -> Self {
        AlgorithmPolicy::Constant(name.into())
    }

    /// Binds occurrences to `names` in trace order. Running out of names is an
    /// error.
    pub fn sequence<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AlgorithmPolicy::Sequence(names.into_iter().map(Into::into).collect())
    }

    /// Lets `f` pick the algorithm from the classified operator.
    pub fn callback(f: impl Fn(&Operator<'_>) -> String + 'static) -> Self {
        AlgorithmPolicy::Callback(Box::new(f))
    }
}

impl Default for AlgorithmPolicy {
    fn default() -> Self {
        AlgorithmPolicy::constant(DEFAULT_ALGORITHM)
    }
}

impl From<&str> for AlgorithmPolicy {
    fn from(name: &str) -> Self {
        AlgorithmPolicy::constant(name)
    }
}

impl From<Vec<String>> for AlgorithmPolicy {
    fn from(names: Vec<String>) -> Self {
        AlgorithmPolicy::Sequence(names)
    }
}

impl fmt::Debug for AlgorithmPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmPolicy::Constant(name) => f.debug_tuple("Constant").field(name).finish(),
            AlgorithmPolicy::Sequence(names) => f.debug_tuple("Sequence").field(names).finish(),
            AlgorithmPolicy::Callback(_) => f.write_str("Callback(<fn>)"),
        }
    }
}

/// Per-kind policies of a full swap.
#[derive(Debug, Default)]
pub struct AlgorithmPolicies {
    by_kind: HashMap<OperatorKind, AlgorithmPolicy>,
    fallback: AlgorithmPolicy,
}

impl AlgorithmPolicies {
    /// No explicit policies: every kind runs `"default"`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the policy for `kind`, replacing any earlier one.
    pub fn with(mut self, kind: OperatorKind, policy: impl Into<AlgorithmPolicy>) -> Self {
        self.insert(kind, policy.into());
        self
    }

    /// Replaces the policy used for kinds without an entry.
    pub fn with_fallback(mut self, policy: AlgorithmPolicy) -> Self {
        self.fallback = policy;
        self
    }

    /// In-place form of [`AlgorithmPolicies::with`].
    pub fn insert(&mut self, kind: OperatorKind, policy: AlgorithmPolicy) {
        self.by_kind.insert(kind, policy);
    }

    /// The policy for `kind`, or the fallback.
    pub fn get(&self, kind: OperatorKind) -> &AlgorithmPolicy {
        self.by_kind.get(&kind).unwrap_or(&self.fallback)
    }
}

impl FromIterator<(OperatorKind, AlgorithmPolicy)> for AlgorithmPolicies {
    fn from_iter<I: IntoIterator<Item = (OperatorKind, AlgorithmPolicy)>>(iter: I) -> Self {
        Self {
            by_kind: iter.into_iter().collect(),
            fallback: AlgorithmPolicy::default(),
        }
    }
}

/// How many occurrences of each kind a `Sequence` policy has consumed in
/// the current swap call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceCounter {
    counts: HashMap<OperatorKind, usize>,
}

impl OccurrenceCounter {
    /// Every kind starts at zero.
    pub fn new() -> Self {
        Self {
            counts: OperatorKind::ALL.into_iter().map(|kind| (kind, 0)).collect(),
        }
    }

    pub fn get(&self, kind: OperatorKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Returns the current count of `kind` and advances it.
    fn advance(&mut self, kind: OperatorKind) -> usize {
        let count = self.counts.entry(kind).or_insert(0);
        let current = *count;
        *count += 1;
        current
    }
}

impl Default for OccurrenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves the algorithm of one occurrence of `kind`.
///
/// Only `Sequence` touches the counter, once per call.
pub fn resolve(
    kind: OperatorKind,
    operator: &Operator<'_>,
    policy: &AlgorithmPolicy,
    counter: &mut OccurrenceCounter,
) -> SwapResult<String> {
    match policy {
        AlgorithmPolicy::Constant(name) => Ok(name.clone()),
        AlgorithmPolicy::Callback(select) => Ok(select(operator)),
        AlgorithmPolicy::Sequence(names) => {
            let index = counter.advance(kind);
            names.get(index).cloned().ok_or_else(|| {
                SwapError::InvalidConfiguration(format!(
                    "no algorithm for {} occurrence #{}: the sequence has {} entries",
                    kind,
                    index + 1,
                    names.len()
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Conv2d;

    #[test]
    fn test_constant_does_not_count() {
        let mut counter = OccurrenceCounter::new();
        let policy = AlgorithmPolicy::constant("gemm");
        for _ in 0..3 {
            assert_eq!(resolve(OperatorKind::ReLU, &Operator::ReLU, &policy, &mut counter).unwrap(), "gemm");
        }
        assert_eq!(counter.get(OperatorKind::ReLU), 0);
    }

    #[test]
    fn test_sequence_walks_and_exhausts() {
        let mut counter = OccurrenceCounter::new();
        let policy = AlgorithmPolicy::sequence(["a", "b"]);
        let kind = OperatorKind::ReLU;
        assert_eq!(resolve(kind, &Operator::ReLU, &policy, &mut counter).unwrap(), "a");
        assert_eq!(resolve(kind, &Operator::ReLU, &policy, &mut counter).unwrap(), "b");
        let err = resolve(kind, &Operator::ReLU, &policy, &mut counter).unwrap_err();
        assert!(matches!(err, SwapError::InvalidConfiguration(_)));
        assert_eq!(counter.get(kind), 3);
        // other kinds keep their own count
        assert_eq!(counter.get(OperatorKind::Conv2d), 0);
    }

    #[test]
    fn test_callback_sees_the_operator() {
        let policy = AlgorithmPolicy::callback(|op| match op {
            Operator::Conv2d(c) if c.config.kernel_size == (1, 1) => "direct".to_string(),
            _ => "kn2row".to_string(),
        });
        let mut counter = OccurrenceCounter::new();
        let pointwise = Conv2d::new(2, 2, (1, 1));
        let wide = Conv2d::new(2, 2, (3, 3));
        let kind = OperatorKind::Conv2d;
        assert_eq!(resolve(kind, &Operator::Conv2d(&pointwise), &policy, &mut counter).unwrap(), "direct");
        assert_eq!(resolve(kind, &Operator::Conv2d(&wide), &policy, &mut counter).unwrap(), "kn2row");
    }

    #[test]
    fn test_policies_fall_back_to_default() {
        let policies = AlgorithmPolicies::new().with(OperatorKind::Linear, "gemm");
        assert!(matches!(policies.get(OperatorKind::Linear), AlgorithmPolicy::Constant(n) if n == "gemm"));
        assert!(matches!(policies.get(OperatorKind::Conv2d), AlgorithmPolicy::Constant(n) if n == DEFAULT_ALGORITHM));
    }
}
