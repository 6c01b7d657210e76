//! Greedy seed-based grouping.
//!
//! Each round takes the first unclaimed record as the seed, scores it against
//! every other unclaimed record on the worker pool, and claims every record
//! scoring above the threshold. Members are only compared with the seed, never
//! with each other, so grouping is star-shaped rather than transitive.

use indicatif::ProgressBar;
use rayon::ThreadPool;
use rayon::prelude::*;

use crate::scoring::SimilarityScorer;
use crate::thumbnail::ThumbnailRecord;

#[derive(Debug, Clone)]
pub struct Group {
    /// 1-based position in completion order.
    pub ordinal: usize,
    /// Seed first, then members in pool order.
    pub members: Vec<ThumbnailRecord>,
}

impl Group {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}

pub struct ClusteringEngine<'a, S: SimilarityScorer> {
    scorer: &'a S,
    threshold: f64,
    pool: &'a ThreadPool,
}

impl<'a, S: SimilarityScorer> ClusteringEngine<'a, S> {
    pub fn new(scorer: &'a S, threshold: f64, pool: &'a ThreadPool) -> Self {
        Self {
            scorer,
            threshold,
            pool,
        }
    }

    /// Partition `records` into groups. The input order is the pool order;
    /// every record ends up in exactly one group.
    pub fn cluster(&self, records: Vec<ThumbnailRecord>, bar: &ProgressBar) -> Vec<Group> {
        bar.set_length(records.len() as u64);
        let features: Vec<S::Features> = self
            .pool
            .install(|| records.par_iter().map(|r| self.scorer.prepare(r)).collect());

        let assignments = self.assign(&features, bar);

        let mut slots: Vec<Option<ThumbnailRecord>> = records.into_iter().map(Some).collect();
        assignments
            .into_iter()
            .enumerate()
            .map(|(i, indices)| Group {
                ordinal: i + 1,
                members: indices
                    .into_iter()
                    .filter_map(|idx| slots[idx].take())
                    .collect(),
            })
            .collect()
    }

    /// Group membership as indices into the arena.
    fn assign(&self, features: &[S::Features], bar: &ProgressBar) -> Vec<Vec<usize>> {
        let mut claimed = vec![false; features.len()];
        let mut cursor = 0;
        let mut groups = Vec::new();

        while let Some(seed) = (cursor..features.len()).find(|&i| !claimed[i]) {
            cursor = seed + 1;
            claimed[seed] = true;

            let candidates: Vec<usize> = (cursor..features.len()).filter(|&i| !claimed[i]).collect();
            let seed_features = &features[seed];
            let joined: Vec<usize> = self.pool.install(|| {
                candidates
                    .par_iter()
                    .copied()
                    .filter(|&i| self.scorer.compare(seed_features, &features[i]) > self.threshold)
                    .collect()
            });

            // Claims are applied only after every comparison of the round returned.
            for &i in &joined {
                claimed[i] = true;
            }
            let mut members = Vec::with_capacity(joined.len() + 1);
            members.push(seed);
            members.extend(joined);
            bar.inc(members.len() as u64);
            log::debug!("Round {} formed a group of {}", groups.len() + 1, members.len());
            groups.push(members);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::test_support::{TableScorer, fake_record};
    use std::collections::HashSet;

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap()
    }

    fn names(group: &Group) -> Vec<String> {
        group.members.iter().map(|m| m.file_name()).collect()
    }

    fn records(names: &[&str]) -> Vec<ThumbnailRecord> {
        names.iter().map(|n| fake_record(n)).collect()
    }

    #[test]
    fn test_empty_pool_yields_no_groups() {
        let scorer = TableScorer::new(&[], 0.1);
        let pool = pool();
        let engine = ClusteringEngine::new(&scorer, 0.4, &pool);
        assert!(engine.cluster(Vec::new(), &ProgressBar::hidden()).is_empty());
    }

    #[test]
    fn test_one_pair_and_three_singletons() {
        let scorer = TableScorer::new(&[("img1.jpg", "img2.jpg", 0.6)], 0.1);
        let pool = pool();
        let engine = ClusteringEngine::new(&scorer, 0.4, &pool);
        let input = records(&["img1.jpg", "img2.jpg", "img3.jpg", "img4.jpg", "img5.jpg"]);

        let groups = engine.cluster(input, &ProgressBar::hidden());

        assert_eq!(groups.len(), 4);
        assert_eq!(names(&groups[0]), vec!["img1.jpg", "img2.jpg"]);
        for (i, group) in groups.iter().enumerate() {
            assert_eq!(group.ordinal, i + 1);
        }
        assert!(groups[1..].iter().all(Group::is_singleton));
        assert_eq!(names(&groups[3]), vec!["img5.jpg"]);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let scorer = TableScorer::new(&[("a.jpg", "b.jpg", 0.4)], 0.1);
        let pool = pool();
        let engine = ClusteringEngine::new(&scorer, 0.4, &pool);
        let groups = engine.cluster(records(&["a.jpg", "b.jpg"]), &ProgressBar::hidden());
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_members_are_compared_to_seed_only() {
        // b~a and c~b, but c is not similar to the seed a.
        let scorer = TableScorer::new(&[("a.jpg", "b.jpg", 0.9), ("b.jpg", "c.jpg", 0.9)], 0.1);
        let pool = pool();
        let engine = ClusteringEngine::new(&scorer, 0.5, &pool);
        let groups = engine.cluster(records(&["a.jpg", "b.jpg", "c.jpg"]), &ProgressBar::hidden());

        assert_eq!(groups.len(), 2);
        assert_eq!(names(&groups[0]), vec!["a.jpg", "b.jpg"]);
        assert_eq!(names(&groups[1]), vec!["c.jpg"]);
    }

    #[test]
    fn test_later_seed_collects_skipped_records() {
        let scorer = TableScorer::new(&[("b.jpg", "d.jpg", 0.8), ("a.jpg", "c.jpg", 0.8)], 0.1);
        let pool = pool();
        let engine = ClusteringEngine::new(&scorer, 0.5, &pool);
        let groups = engine.cluster(
            records(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]),
            &ProgressBar::hidden(),
        );

        assert_eq!(groups.len(), 2);
        assert_eq!(names(&groups[0]), vec!["a.jpg", "c.jpg"]);
        assert_eq!(names(&groups[1]), vec!["b.jpg", "d.jpg"]);
    }

    #[test]
    fn test_groups_partition_the_pool() {
        let all: Vec<String> = (0..40).map(|i| format!("p{i:02}.jpg")).collect();
        let mut pairs = Vec::new();
        for i in 0..40 {
            for j in (i + 1)..40 {
                if (i * 7 + j * 3) % 5 == 0 {
                    pairs.push((all[i].clone(), all[j].clone(), 0.75));
                }
            }
        }
        let pair_refs: Vec<(&str, &str, f64)> = pairs
            .iter()
            .map(|(a, b, s)| (a.as_str(), b.as_str(), *s))
            .collect();
        let scorer = TableScorer::new(&pair_refs, 0.05);
        let pool = pool();
        let engine = ClusteringEngine::new(&scorer, 0.5, &pool);
        let input: Vec<&str> = all.iter().map(String::as_str).collect();

        let groups = engine.cluster(records(&input), &ProgressBar::hidden());

        let mut seen = HashSet::new();
        let mut total = 0;
        for group in &groups {
            assert!(!group.is_empty());
            for member in &group.members {
                assert!(seen.insert(member.file_name()), "duplicate {}", member.file_name());
                total += 1;
            }
        }
        assert_eq!(total, all.len());
        assert_eq!(seen, all.iter().cloned().collect::<HashSet<_>>());
    }

    #[test]
    fn test_same_input_same_groups() {
        let scorer = TableScorer::new(&[("a.jpg", "c.jpg", 0.9), ("b.jpg", "c.jpg", 0.9)], 0.1);
        let pool = pool();
        let engine = ClusteringEngine::new(&scorer, 0.5, &pool);
        let run = || {
            engine
                .cluster(records(&["a.jpg", "b.jpg", "c.jpg"]), &ProgressBar::hidden())
                .iter()
                .map(names)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
