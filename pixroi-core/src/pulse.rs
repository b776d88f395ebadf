//! Pulse (2D hit) types.
//!
//! A [`Pulse`] is one discriminated signal on one readout channel. The
//! pulses of a readout family are collected in a [`PulseSet`] together
//! with two time-ordered indices keyed by the leading and the trailing
//! edge sample.

use std::collections::BTreeMap;
use std::ops::RangeBounds;

/// Negative lobe of a bipolar pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegativeLobe {
    /// First sample below the noise baseline after the positive lobe.
    pub zero_cross_sample: usize,
    /// Sample of the negative extremum.
    pub peak_sample: usize,
    /// Value at the negative extremum.
    pub peak_value: i32,
}

/// A discriminated pulse on a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pulse {
    /// Logical channel within the readout family.
    pub channel: usize,
    /// First sample of the pulse (inclusive).
    pub first_sample: usize,
    /// Last sample of the pulse (inclusive).
    pub last_sample: usize,
    /// Sample of the positive peak.
    pub pos_peak_sample: usize,
    /// Value at the positive peak.
    pub pos_peak_value: i32,
    /// Negative lobe, present for bipolar pulses only.
    pub negative_lobe: Option<NegativeLobe>,
    /// Width of the positive lobe in samples.
    pub pos_width: usize,
    /// Width of the negative lobe in samples (0 for unipolar pulses).
    pub neg_width: usize,
    /// Sum of the samples from `first_sample` to `last_sample`.
    pub integral: i64,
    /// Samples from `first_sample` to `last_sample`.
    pub raw: Vec<i32>,
}

impl Pulse {
    /// Returns true for pulses with a negative lobe.
    #[inline]
    #[must_use]
    pub fn is_bipolar(&self) -> bool {
        self.negative_lobe.is_some()
    }

    /// Total pulse length in samples.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_sample - self.first_sample + 1
    }

    /// A pulse always spans at least one sample.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Checks the sample ordering invariants of the pulse.
    #[must_use]
    pub fn is_well_ordered(&self) -> bool {
        let positive =
            self.first_sample <= self.pos_peak_sample && self.pos_peak_sample <= self.last_sample;
        let negative = self.negative_lobe.is_none_or(|lobe| {
            self.first_sample <= lobe.zero_cross_sample
                && lobe.zero_cross_sample <= lobe.peak_sample
                && lobe.peak_sample <= self.last_sample
        });
        positive && negative && self.raw.len() == self.pos_width + self.neg_width
    }

    /// Returns true if the inclusive sample intervals of both pulses intersect.
    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.first_sample <= other.last_sample && other.first_sample <= self.last_sample
    }
}

/// Time-ordered multimap from an edge sample to pulse IDs.
///
/// Several pulses may share an edge sample; IDs under one key keep
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PulseOrder {
    entries: BTreeMap<usize, Vec<usize>>,
}

impl PulseOrder {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pulse ID under an edge sample.
    pub fn insert(&mut self, sample: usize, pulse_id: usize) {
        self.entries.entry(sample).or_default().push(pulse_id);
    }

    /// Iterates over (sample, pulse ID) in ascending sample order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.entries
            .iter()
            .flat_map(|(&sample, ids)| ids.iter().map(move |&id| (sample, id)))
    }

    /// Iterates over (sample, pulse ID) with the sample inside `range`.
    pub fn range<R>(&self, range: R) -> impl Iterator<Item = (usize, usize)> + '_
    where
        R: RangeBounds<usize>,
    {
        self.entries
            .range(range)
            .flat_map(|(&sample, ids)| ids.iter().map(move |&id| (sample, id)))
    }

    /// Total number of indexed pulses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Returns true if no pulse is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// All pulses of one readout family of one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PulseSet {
    /// Pulses in order of detection; the index is the pulse ID.
    pub pulses: Vec<Pulse>,
    /// Pulse IDs keyed by `first_sample`.
    pub lead_order: PulseOrder,
    /// Pulse IDs keyed by `last_sample`.
    pub trail_order: PulseOrder,
    /// Peaks above threshold whose edges were not resolved.
    pub n_missed: usize,
}

impl PulseSet {
    /// Creates an empty pulse set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pulse and indexes it. Returns its ID.
    pub fn push(&mut self, pulse: Pulse) -> usize {
        let id = self.pulses.len();
        self.lead_order.insert(pulse.first_sample, id);
        self.trail_order.insert(pulse.last_sample, id);
        self.pulses.push(pulse);
        id
    }

    /// Number of pulses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    /// Returns true if there are no pulses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    /// Pulse by ID.
    #[must_use]
    pub fn get(&self, id: usize) -> Option<&Pulse> {
        self.pulses.get(id)
    }

    /// Iterates over the pulses in ID order.
    pub fn iter(&self) -> std::slice::Iter<'_, Pulse> {
        self.pulses.iter()
    }

    /// Removes all pulses and resets the miss counter.
    pub fn clear(&mut self) {
        self.pulses.clear();
        self.lead_order.clear();
        self.trail_order.clear();
        self.n_missed = 0;
    }
}

impl<'a> IntoIterator for &'a PulseSet {
    type Item = &'a Pulse;
    type IntoIter = std::slice::Iter<'a, Pulse>;

    fn into_iter(self) -> Self::IntoIter {
        self.pulses.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unipolar(channel: usize, first: usize, peak: usize, last: usize) -> Pulse {
        let raw = vec![1; last - first + 1];
        Pulse {
            channel,
            first_sample: first,
            last_sample: last,
            pos_peak_sample: peak,
            pos_peak_value: 10,
            negative_lobe: None,
            pos_width: raw.len(),
            neg_width: 0,
            integral: raw.len() as i64,
            raw,
        }
    }

    #[test]
    fn test_pulse_order_duplicates() {
        let mut order = PulseOrder::new();
        order.insert(10, 0);
        order.insert(5, 1);
        order.insert(10, 2);

        let entries: Vec<_> = order.iter().collect();
        assert_eq!(entries, vec![(5, 1), (10, 0), (10, 2)]);
        assert_eq!(order.len(), 3);

        let ranged: Vec<_> = order.range(6..=10).collect();
        assert_eq!(ranged, vec![(10, 0), (10, 2)]);
    }

    #[test]
    fn test_pulse_set_push_indexes_edges() {
        let mut set = PulseSet::new();
        let a = set.push(unipolar(0, 10, 15, 20));
        let b = set.push(unipolar(1, 5, 8, 20));

        assert_eq!((a, b), (0, 1));
        assert_eq!(set.lead_order.iter().collect::<Vec<_>>(), vec![(5, 1), (10, 0)]);
        assert_eq!(set.trail_order.iter().collect::<Vec<_>>(), vec![(20, 0), (20, 1)]);

        set.clear();
        assert!(set.is_empty());
        assert!(set.trail_order.is_empty());
    }

    #[test]
    fn test_pulse_ordering_invariants() {
        let pulse = unipolar(0, 10, 15, 20);
        assert!(pulse.is_well_ordered());
        assert_eq!(pulse.len(), 11);

        let mut bipolar = pulse.clone();
        bipolar.negative_lobe = Some(NegativeLobe {
            zero_cross_sample: 17,
            peak_sample: 19,
            peak_value: -40,
        });
        bipolar.pos_width = 7;
        bipolar.neg_width = 4;
        assert!(bipolar.is_well_ordered());

        bipolar.negative_lobe = Some(NegativeLobe {
            zero_cross_sample: 19,
            peak_sample: 17,
            peak_value: -40,
        });
        assert!(!bipolar.is_well_ordered());
    }

    #[test]
    fn test_pulse_overlap() {
        let a = unipolar(0, 40, 50, 60);
        let b = unipolar(1, 35, 50, 65);
        let c = unipolar(2, 61, 62, 70);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }
}
