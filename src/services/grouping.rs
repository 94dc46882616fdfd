//! Transitive duplicate grouping over confirmed pairs.

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::CandidatePair;

/// Disjoint-set forest over story indices `0..len`.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    fn check(&self, index: usize) -> DomainResult<()> {
        if index >= self.parent.len() {
            return Err(DomainError::IndexOutOfRange {
                index,
                len: self.parent.len(),
            });
        }
        Ok(())
    }

    /// Representative of `index`'s set, compressing the path behind it.
    pub fn find(&mut self, index: usize) -> DomainResult<usize> {
        self.check(index)?;
        let mut root = index;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = index;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        Ok(root)
    }

    /// Join the sets of `a` and `b`; `false` when they were already joined.
    pub fn union(&mut self, a: usize, b: usize) -> DomainResult<bool> {
        let root_a = self.find(a)?;
        let root_b = self.find(b)?;
        if root_a == root_b {
            return Ok(false);
        }
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] = self.rank[root_a].saturating_add(1);
            }
        }
        Ok(true)
    }

    /// The partition as sorted index lists, ordered by smallest member.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut slot_of_root = vec![usize::MAX; self.parent.len()];
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for index in 0..self.parent.len() {
            let mut root = index;
            while self.parent[root] != root {
                root = self.parent[root];
            }
            self.parent[index] = root;
            if slot_of_root[root] == usize::MAX {
                slot_of_root[root] = groups.len();
                groups.push(Vec::new());
            }
            groups[slot_of_root[root]].push(index);
        }
        groups
    }
}

/// Partition `0..len` into transitive duplicate groups.
pub fn build_groups(pairs: &[CandidatePair], len: usize) -> DomainResult<Vec<Vec<usize>>> {
    let mut sets = DisjointSet::new(len);
    for pair in pairs {
        sets.union(pair.first, pair.second)?;
    }
    Ok(sets.groups())
}
