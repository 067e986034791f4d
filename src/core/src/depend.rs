//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The encoder dependency table and its reduction.
//!
//! During compilation, every cross-encoder hazard becomes an entry of the
//! lower-triangular dependency table. Entries frequently subsume one
//! another (if encoder 2 waits for encoder 1 and encoder 1 waits for
//! encoder 0, a direct 2 → 0 edge buys nothing), so before fences are
//! emitted the table goes through an all-pairs shortest path computation
//! followed by a transitive reduction.
use zanfg_base::StageFlags;

/// One endpoint of a dependency: a command position within an encoder and
/// the pipeline stages involved on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyPoint {
    /// Frame-global command index.
    pub cmd: usize,
    pub stages: StageFlags,
}

/// A dependency of one encoder (the *dependent*) on an earlier one (the
/// *producer*): the producer signals after `signal`, the dependent waits
/// before `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub signal: DependencyPoint,
    pub wait: DependencyPoint,
}

impl Dependency {
    /// Merge two dependencies between the same encoder pair, keeping the
    /// latest signal position and the earliest wait position — the minimal
    /// pair that still covers both underlying accesses.
    fn merge(&mut self, other: &Dependency) {
        if other.signal.cmd > self.signal.cmd {
            self.signal = other.signal;
        } else if other.signal.cmd == self.signal.cmd {
            self.signal.stages |= other.signal.stages;
        }
        if other.wait.cmd < self.wait.cmd {
            self.wait = other.wait;
        } else if other.wait.cmd == self.wait.cmd {
            self.wait.stages |= other.wait.stages;
        }
    }
}

/// A reduced dependency edge, ready for fence emission.
#[derive(Debug, Clone, Copy)]
pub struct ReducedDependency {
    pub dependent: usize,
    pub producer: usize,
    pub dependency: Dependency,
}

/// Lower-triangular matrix of optional dependencies, indexed by
/// `(dependent encoder, producer encoder)` with `dependent > producer`.
#[derive(Debug)]
pub struct DependencyTable {
    num_encoders: usize,
    entries: Vec<Option<Dependency>>,
}

impl DependencyTable {
    pub fn new(num_encoders: usize) -> Self {
        Self {
            num_encoders,
            entries: vec![None; num_encoders * (num_encoders.max(1) - 1) / 2],
        }
    }

    /// Index of `(dependent, producer)` in the packed strict lower
    /// triangle. Row `i` holds `i` entries.
    fn index(dependent: usize, producer: usize) -> usize {
        debug_assert!(producer < dependent);
        dependent * (dependent - 1) / 2 + producer
    }

    pub fn num_encoders(&self) -> usize {
        self.num_encoders
    }

    pub fn get(&self, dependent: usize, producer: usize) -> Option<&Dependency> {
        self.entries[Self::index(dependent, producer)].as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|x| x.is_none())
    }

    /// Insert a dependency, merging with an existing entry for the pair.
    ///
    /// # Panics
    ///
    /// `dependent` must be a later encoder than `producer`; an encoder
    /// cannot depend on itself (intra-encoder hazards use memory barriers
    /// instead).
    pub fn add(&mut self, dependent: usize, producer: usize, dependency: Dependency) {
        assert!(
            producer < dependent,
            "a dependency must point at an earlier encoder"
        );
        let ref mut entry = self.entries[Self::index(dependent, producer)];
        match entry {
            Some(ref mut existing) => existing.merge(&dependency),
            None => *entry = Some(dependency),
        }
    }

    /// Compute the minimal edge set: Floyd–Warshall shortest paths over the
    /// strict lower triangle, then drop every direct edge for which a
    /// two-or-more-hop path exists.
    pub fn reduce(&self) -> Vec<ReducedDependency> {
        let n = self.num_encoders;
        let max_distance = n + 1;

        let mut distance = vec![max_distance; n * n];
        for dependent in 1..n {
            for producer in 0..dependent {
                if self.get(dependent, producer).is_some() {
                    distance[dependent * n + producer] = 1;
                }
            }
        }

        // Paths only ever step from a later encoder to an earlier one, so
        // relaxation stays within the strict lower triangle.
        for via in 0..n {
            for dependent in via + 1..n {
                for producer in 0..via {
                    let through =
                        distance[dependent * n + via].saturating_add(distance[via * n + producer]);
                    if through < distance[dependent * n + producer] {
                        distance[dependent * n + producer] = through;
                    }
                }
            }
        }

        let reachable = |from: usize, to: usize| distance[from * n + to] < max_distance;

        let mut reduced = Vec::new();
        for dependent in 1..n {
            for producer in 0..dependent {
                let dependency = match self.get(dependent, producer) {
                    Some(&dep) => dep,
                    None => continue,
                };
                let redundant = (producer + 1..dependent)
                    .any(|via| reachable(dependent, via) && reachable(via, producer));
                if !redundant {
                    reduced.push(ReducedDependency {
                        dependent,
                        producer,
                        dependency,
                    });
                }
            }
        }
        reduced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(signal_cmd: usize, wait_cmd: usize) -> Dependency {
        Dependency {
            signal: DependencyPoint {
                cmd: signal_cmd,
                stages: StageFlags::COMPUTE,
            },
            wait: DependencyPoint {
                cmd: wait_cmd,
                stages: StageFlags::COMPUTE,
            },
        }
    }

    #[test]
    fn merge_keeps_latest_signal_earliest_wait() {
        let mut table = DependencyTable::new(2);
        table.add(1, 0, dep(3, 10));
        table.add(1, 0, dep(5, 8));
        let merged = table.get(1, 0).unwrap();
        assert_eq!(merged.signal.cmd, 5);
        assert_eq!(merged.wait.cmd, 8);
    }

    #[test]
    fn merge_unions_stages_at_equal_positions() {
        let mut table = DependencyTable::new(2);
        table.add(
            1,
            0,
            Dependency {
                signal: DependencyPoint {
                    cmd: 3,
                    stages: StageFlags::COMPUTE,
                },
                wait: DependencyPoint {
                    cmd: 7,
                    stages: StageFlags::COMPUTE,
                },
            },
        );
        table.add(
            1,
            0,
            Dependency {
                signal: DependencyPoint {
                    cmd: 3,
                    stages: StageFlags::FRAGMENT,
                },
                wait: DependencyPoint {
                    cmd: 7,
                    stages: StageFlags::VERTEX,
                },
            },
        );
        let merged = table.get(1, 0).unwrap();
        assert_eq!(
            merged.signal.stages,
            StageFlags::COMPUTE | StageFlags::FRAGMENT
        );
        assert_eq!(merged.wait.stages, StageFlags::COMPUTE | StageFlags::VERTEX);
    }

    #[test]
    fn reduce_drops_transitive_edge() {
        // E0 → E1 → E2 plus the redundant direct E0 → E2.
        let mut table = DependencyTable::new(3);
        table.add(1, 0, dep(0, 1));
        table.add(2, 1, dep(1, 2));
        table.add(2, 0, dep(0, 2));
        let reduced = table.reduce();
        assert_eq!(reduced.len(), 2);
        assert!(reduced
            .iter()
            .any(|e| e.dependent == 1 && e.producer == 0));
        assert!(reduced
            .iter()
            .any(|e| e.dependent == 2 && e.producer == 1));
        assert!(!reduced
            .iter()
            .any(|e| e.dependent == 2 && e.producer == 0));
    }

    #[test]
    fn reduce_keeps_non_transitive_edges() {
        // A diamond: E3 depends on E1 and E2, both depend on E0. No edge is
        // redundant.
        let mut table = DependencyTable::new(4);
        table.add(1, 0, dep(0, 1));
        table.add(2, 0, dep(0, 2));
        table.add(3, 1, dep(1, 3));
        table.add(3, 2, dep(2, 3));
        assert_eq!(table.reduce().len(), 4);
    }

    #[test]
    fn reduce_handles_longer_chains() {
        // E0 → E1 → E2 → E3 with direct E0 → E3: the direct edge is covered
        // by a three-hop path.
        let mut table = DependencyTable::new(4);
        table.add(1, 0, dep(0, 1));
        table.add(2, 1, dep(1, 2));
        table.add(3, 2, dep(2, 3));
        table.add(3, 0, dep(0, 3));
        let reduced = table.reduce();
        assert_eq!(reduced.len(), 3);
        assert!(!reduced
            .iter()
            .any(|e| e.dependent == 3 && e.producer == 0));
    }

    #[test]
    fn empty_table_reduces_to_nothing() {
        assert!(DependencyTable::new(0).reduce().is_empty());
        assert!(DependencyTable::new(5).reduce().is_empty());
    }
}
