//! Sparse feature vectors and the weight snapshot used for scoring.

use std::collections::HashMap;

/// A sparse feature vector: named contributions accumulated on a derivation
/// while it is being built. Kept as an ordered list so repeated additions to
/// the same feature stay cheap; `dot` folds duplicates implicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    entries: Vec<(String, f64)>,
}

impl FeatureVector {
    pub fn new() -> FeatureVector {
        FeatureVector::default()
    }

    /// Add an indicator feature (weight 1).
    pub fn add(&mut self, name: impl Into<String>) {
        self.add_weighted(name, 1.0);
    }

    pub fn add_weighted(&mut self, name: impl Into<String>, value: f64) {
        self.entries.push((name.into(), value));
    }

    pub fn extend(&mut self, other: &FeatureVector) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Dot product against a weight snapshot. Unknown features weigh zero.
    pub fn dot(&self, weights: &Weights) -> f64 {
        self.entries.iter().map(|(name, value)| weights.get(name) * value).sum()
    }

    /// Fold this vector into a dense map, scaled by `factor`.
    pub fn increment_map(&self, factor: f64, map: &mut HashMap<String, f64>) {
        for (name, value) in &self.entries {
            *map.entry(name.clone()).or_insert(0.0) += factor * value;
        }
    }
}

/// A read-only map from feature name to scalar weight. Learning happens
/// strictly between parses; during a parse this is an immutable snapshot.
#[derive(Debug, Clone, Default)]
pub struct Weights {
    map: HashMap<String, f64>,
}

impl Weights {
    pub fn new() -> Weights {
        Weights::default()
    }

    pub fn from_iter(pairs: impl IntoIterator<Item = (String, f64)>) -> Weights {
        Weights { map: pairs.into_iter().collect() }
    }

    pub fn set(&mut self, name: impl Into<String>, weight: f64) {
        self.map.insert(name.into(), weight);
    }

    pub fn get(&self, name: &str) -> f64 {
        self.map.get(name).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_folds_duplicates_and_ignores_unknown() {
        let mut fv = FeatureVector::new();
        fv.add("rule:a");
        fv.add("rule:a");
        fv.add_weighted("depth", 3.0);
        fv.add("never-weighted");

        let mut w = Weights::new();
        w.set("rule:a", 0.5);
        w.set("depth", -1.0);

        assert_eq!(fv.dot(&w), 0.5 + 0.5 - 3.0);
    }
}
