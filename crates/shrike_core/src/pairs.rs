//! `(row, count)` pairs and their cross-slice merge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One ranked row: a row ID and the number of columns set for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub id: u64,
    pub count: u64,
}

/// Additive merge of two pair lists: counts sum on equal row IDs, each row
/// appears once. Order-independent, so per-slice results may arrive in any
/// order.
pub fn add(a: &[Pair], b: &[Pair]) -> Vec<Pair> {
    let mut merged: BTreeMap<u64, u64> = BTreeMap::new();
    for pair in a.iter().chain(b) {
        *merged.entry(pair.id).or_insert(0) += pair.count;
    }
    merged
        .into_iter()
        .map(|(id, count)| Pair { id, count })
        .collect()
}

/// Rank order: count descending, ties broken by ascending row ID.
pub fn sort(pairs: &mut [Pair]) {
    pairs.sort_by(|a, b| b.count.cmp(&a.count).then(a.id.cmp(&b.id)));
}

/// Row IDs of a pair list, in list order.
pub fn keys(pairs: &[Pair]) -> Vec<u64> {
    pairs.iter().map(|p| p.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: u64, count: u64) -> Pair {
        Pair { id, count }
    }

    #[test]
    fn test_add_sums_on_equal_ids() {
        let a = vec![p(1, 10), p(2, 4)];
        let b = vec![p(2, 6), p(3, 1)];
        assert_eq!(add(&a, &b), vec![p(1, 10), p(2, 10), p(3, 1)]);
        assert_eq!(add(&a, &[]), a);
        assert_eq!(add(&[], &[]), vec![]);
    }

    #[test]
    fn test_add_is_commutative() {
        let a = vec![p(5, 2), p(9, 7)];
        let b = vec![p(9, 3), p(1, 1)];
        assert_eq!(add(&a, &b), add(&b, &a));
    }

    #[test]
    fn test_sort_breaks_ties_by_ascending_id() {
        let mut pairs = vec![p(7, 3), p(2, 10), p(1, 10)];
        sort(&mut pairs);
        assert_eq!(pairs, vec![p(1, 10), p(2, 10), p(7, 3)]);
    }
}
