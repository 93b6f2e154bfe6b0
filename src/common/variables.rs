//! Variable identifiers and scopes
//!
//! Every scalar random-variable coordinate in the model carries a
//! [`VariableId`] handed out by a [`VariableAllocator`]. Ids are monotonic
//! and never recycled; the allocator keeps three disjoint pools (state,
//! measurement, association) purely for bookkeeping. A [`Scope`] is a
//! sorted, duplicate-free sequence of ids, so that sepsets fall out of a
//! linear-time merge intersection.

use std::fmt;

/// Identifier of a single scalar random-variable coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableId(pub u32);

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Sorted, duplicate-free sequence of variable ids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scope(Vec<VariableId>);

impl Scope {
    /// Build a scope from ids, sorting and deduplicating.
    pub fn new(mut ids: Vec<VariableId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Scope(ids)
    }

    /// Build a scope from ids already known to be sorted and unique.
    pub fn from_sorted(ids: Vec<VariableId>) -> Self {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        Scope(ids)
    }

    /// The empty scope.
    pub fn empty() -> Self {
        Scope(Vec::new())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn ids(&self) -> &[VariableId] {
        &self.0
    }

    pub fn contains(&self, id: VariableId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    /// Position of `id` within this scope, if present.
    pub fn position(&self, id: VariableId) -> Option<usize> {
        self.0.binary_search(&id).ok()
    }

    /// Sorted union of two scopes in O(n + m).
    pub fn union(&self, other: &Scope) -> Scope {
        let mut out = Vec::with_capacity(self.len() + other.len());
        let (mut i, mut j) = (0, 0);
        while i < self.len() && j < other.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => {
                    out.push(self.0[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    out.push(other.0[j]);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    out.push(self.0[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        out.extend_from_slice(&self.0[i..]);
        out.extend_from_slice(&other.0[j..]);
        Scope(out)
    }

    /// Sorted intersection of two scopes in O(n + m); this is the sepset
    /// between two clusters.
    pub fn intersect(&self, other: &Scope) -> Scope {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.len() && j < other.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    out.push(self.0[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        Scope(out)
    }

    /// Ids of `self` not present in `other`.
    pub fn difference(&self, other: &Scope) -> Scope {
        Scope(
            self.0
                .iter()
                .copied()
                .filter(|id| !other.contains(*id))
                .collect(),
        )
    }

    /// Positions of each id of `sub` within this scope, or `None` if
    /// `sub` is not a subset.
    pub fn positions_of(&self, sub: &Scope) -> Option<Vec<usize>> {
        sub.0.iter().map(|&id| self.position(id)).collect()
    }

    pub fn is_subset_of(&self, other: &Scope) -> bool {
        other.positions_of(self).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "}}")
    }
}

/// Which pool a variable belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariablePool {
    /// State coordinates (X).
    State,
    /// Measurement coordinates (Z).
    Measurement,
    /// Association variables (A).
    Association,
}

/// Monotonic allocator over the three variable pools.
///
/// Ids are globally unique across pools and never reused, so a block
/// allocated later always compares greater than every earlier block;
/// concatenating an old scope with a fresh block is therefore already
/// sorted.
#[derive(Debug, Clone, Default)]
pub struct VariableAllocator {
    next: u32,
    state_count: usize,
    measurement_count: usize,
    association_count: usize,
}

impl VariableAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_block(&mut self, dim: usize) -> Scope {
        let start = self.next;
        self.next += dim as u32;
        Scope::from_sorted((start..self.next).map(VariableId).collect())
    }

    /// Allocate a fresh state scope of `dim` coordinates.
    pub fn allocate_state(&mut self, dim: usize) -> Scope {
        self.state_count += dim;
        self.alloc_block(dim)
    }

    /// Allocate a fresh measurement scope of `dim` coordinates.
    pub fn allocate_measurement(&mut self, dim: usize) -> Scope {
        self.measurement_count += dim;
        self.alloc_block(dim)
    }

    /// Allocate a fresh association variable.
    pub fn allocate_association(&mut self) -> VariableId {
        self.association_count += 1;
        let id = VariableId(self.next);
        self.next += 1;
        id
    }

    /// Total ids handed out so far in the given pool.
    pub fn count(&self, pool: VariablePool) -> usize {
        match pool {
            VariablePool::State => self.state_count,
            VariablePool::Measurement => self.measurement_count,
            VariablePool::Association => self.association_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(ids: &[u32]) -> Scope {
        Scope::new(ids.iter().map(|&i| VariableId(i)).collect())
    }

    #[test]
    fn test_scope_sorts_and_dedups() {
        let s = scope(&[3, 1, 2, 1]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.ids()[0], VariableId(1));
        assert_eq!(s.ids()[2], VariableId(3));
    }

    #[test]
    fn test_union_intersect() {
        let a = scope(&[0, 1, 2, 5]);
        let b = scope(&[2, 3, 5, 7]);
        assert_eq!(a.union(&b), scope(&[0, 1, 2, 3, 5, 7]));
        assert_eq!(a.intersect(&b), scope(&[2, 5]));
        assert_eq!(a.difference(&b), scope(&[0, 1]));
    }

    #[test]
    fn test_disjoint_intersection_is_empty() {
        let a = scope(&[0, 1]);
        let b = scope(&[2, 3]);
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn test_positions_of() {
        let sup = scope(&[0, 2, 4, 6]);
        let sub = scope(&[2, 6]);
        assert_eq!(sup.positions_of(&sub), Some(vec![1, 3]));
        assert_eq!(sup.positions_of(&scope(&[5])), None);
    }

    #[test]
    fn test_allocator_monotonic_and_disjoint() {
        let mut alloc = VariableAllocator::new();
        let x = alloc.allocate_state(3);
        let z = alloc.allocate_measurement(2);
        let a = alloc.allocate_association();

        assert!(x.intersect(&z).is_empty());
        assert!(x.ids().iter().all(|&id| id < z.ids()[0]));
        assert!(z.ids().iter().all(|&id| id < a));
        assert_eq!(alloc.count(VariablePool::State), 3);
        assert_eq!(alloc.count(VariablePool::Measurement), 2);
        assert_eq!(alloc.count(VariablePool::Association), 1);
    }
}
