//! [`OperatorProfiles`] – who may instruct the arm, and with which hand.
//!
//! Instructions must name their operator.  When several names appear, the
//! one occurring earliest in the text wins; equal positions prefer the
//! longer name, then table order.

use scrub_types::Handedness;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorProfile {
    /// Lower-case identifier matched against instruction text.
    pub name: String,
    pub handedness: Handedness,
}

/// Ordered, read-only operator table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorProfiles {
    profiles: Vec<OperatorProfile>,
}

impl Default for OperatorProfiles {
    /// The surgical team, including the spellings speech-to-text produces
    /// for "Sharath".
    fn default() -> Self {
        Self::new([
            ("sharath", Handedness::Right),
            ("sarath", Handedness::Right),
            ("sarad", Handedness::Right),
            ("sharad", Handedness::Right),
            ("kiran", Handedness::Left),
        ])
    }
}

impl OperatorProfiles {
    /// Build a table from `(name, handedness)` pairs.  Names are lower-cased;
    /// blank names are skipped.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Handedness)>,
        S: AsRef<str>,
    {
        let profiles = entries
            .into_iter()
            .filter_map(|(name, handedness)| {
                let name = name.as_ref().trim().to_lowercase();
                (!name.is_empty()).then_some(OperatorProfile { name, handedness })
            })
            .collect();
        Self { profiles }
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperatorProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn handedness_of(&self, name: &str) -> Option<Handedness> {
        let name = name.trim().to_lowercase();
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.handedness)
    }

    /// Case-insensitive search of `text` for a known operator.
    ///
    /// ```
    /// use scrub_kernel::OperatorProfiles;
    ///
    /// let ops = OperatorProfiles::default();
    /// let hit = ops.detect("Kiran, then Sharath: scalpel please").unwrap();
    /// assert_eq!(hit.name, "kiran");
    /// assert!(ops.detect("scalpel please").is_none());
    /// ```
    pub fn detect(&self, text: &str) -> Option<&OperatorProfile> {
        let haystack = text.to_lowercase();
        self.profiles
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| haystack.find(&p.name).map(|pos| (pos, p, idx)))
            .min_by(|(pa, a, ia), (pb, b, ib)| {
                pa.cmp(pb)
                    .then(b.name.len().cmp(&a.name.len()))
                    .then(ia.cmp(ib))
            })
            .map(|(_, p, _)| p)
    }
}
