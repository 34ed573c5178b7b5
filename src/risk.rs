use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use crate::models::{DerivedScore, MetricDefinition, Record};

/// Scores every record under `definition`, windowed or not.
pub fn derived_scores(records: &[Record], definition: &MetricDefinition) -> Vec<DerivedScore> {
    effective_attributes(records, definition.window_size)
        .iter()
        .zip(records)
        .map(|(attributes, record)| DerivedScore {
            record_id: record.id,
            university: record.university.clone(),
            score: definition.weights.dot(attributes),
            as_of: definition.version,
        })
        .collect()
}

/// Per-record attribute vectors that a definition's weights multiply: the raw
/// sub-scores, or their rolling means when the definition carries a window.
pub fn effective_attributes(records: &[Record], window_size: Option<u32>) -> Vec<[f64; 3]> {
    match window_size {
        None => records.iter().map(Record::raw_attributes).collect(),
        Some(window) => {
            let anxiety = rolling_average(records, window, |r| r.anxiety_score as f64);
            let stress = rolling_average(records, window, |r| r.stress_score as f64);
            let depression = rolling_average(records, window, |r| r.depression_score as f64);
            anxiety
                .into_iter()
                .zip(stress)
                .zip(depression)
                .map(|((a, s), d)| [a, s, d])
                .collect()
        }
    }
}

/// Mean of `value` over the current row and up to `preceding` earlier rows of
/// the same university, rows ordered by id. Output is aligned with `records`.
pub fn rolling_average<F>(records: &[Record], preceding: u32, value: F) -> Vec<f64>
where
    F: Fn(&Record) -> f64,
{
    let mut partitions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, record) in records.iter().enumerate() {
        partitions
            .entry(record.university.as_str())
            .or_default()
            .push(idx);
    }

    let frame = preceding as usize + 1;
    let mut output = vec![0.0; records.len()];

    for mut members in partitions.into_values() {
        members.sort_by_key(|idx| records[*idx].id);
        let values: Vec<f64> = members.iter().map(|idx| value(&records[*idx])).collect();

        // The running sum is rebuilt from the frame itself every `frame` rows,
        // so rounding never accumulates across the whole partition.
        let mut sum: f64 = 0.0;
        for (pos, idx) in members.iter().enumerate() {
            let start = (pos + 1).saturating_sub(frame);
            if pos % frame == 0 {
                sum = values[start..=pos].iter().sum();
            } else {
                sum += values[pos];
                if start > 0 {
                    sum -= values[start - 1];
                }
            }
            output[*idx] = sum / (pos + 1 - start) as f64;
        }
    }

    output
}

/// Descending by score, ties broken by ascending record id.
pub fn rank_order(a: &DerivedScore, b: &DerivedScore) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.record_id.cmp(&b.record_id))
}

struct Ranked(DerivedScore);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    // Greater means ranked higher.
    fn cmp(&self, other: &Self) -> Ordering {
        rank_order(&other.0, &self.0)
    }
}

/// Bounded-heap partial sort: O(n log k).
pub fn top_k<I>(scores: I, k: usize) -> Vec<DerivedScore>
where
    I: IntoIterator<Item = DerivedScore>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(k + 1);
    for score in scores {
        heap.push(Reverse(Ranked(score)));
        if heap.len() > k {
            heap.pop();
        }
    }

    let mut values: Vec<DerivedScore> = heap.into_iter().map(|Reverse(Ranked(s))| s).collect();
    values.sort_by(rank_order);
    values
}
