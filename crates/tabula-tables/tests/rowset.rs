use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeSet;
use tabula_tables::{is_strictly_ascending, row_and, row_not, row_or, row_sub, row_xor};

const N: u64 = 300;

fn row_set() -> impl Strategy<Value = Vec<u64>> {
    proptest::collection::btree_set(0..N, 0..120).prop_map(|set| set.into_iter().collect())
}

proptest! {
    #[test]
    fn and_is_commutative(a in row_set(), b in row_set()) {
        prop_assert_eq!(row_and(&a, &b), row_and(&b, &a));
    }

    #[test]
    fn or_is_ascending_without_duplicates(a in row_set(), b in row_set()) {
        let or = row_or(&a, &b);
        prop_assert!(is_strictly_ascending(&or));
        prop_assert_eq!(or.len(), a.len() + b.len() - row_and(&a, &b).len());
    }

    #[test]
    fn sub_is_and_with_complement(a in row_set(), b in row_set()) {
        prop_assert_eq!(row_sub(&a, &b), row_and(&a, &row_not(&b, N)));
    }

    #[test]
    fn xor_is_union_of_differences(a in row_set(), b in row_set()) {
        prop_assert_eq!(row_xor(&a, &b), row_or(&row_sub(&a, &b), &row_sub(&b, &a)));
    }

    #[test]
    fn not_is_an_involution(a in row_set()) {
        prop_assert_eq!(row_not(&row_not(&a, N), N), a);
    }

    #[test]
    fn operations_agree_with_btree_sets(a in row_set(), b in row_set()) {
        let sa: BTreeSet<u64> = a.iter().copied().collect();
        let sb: BTreeSet<u64> = b.iter().copied().collect();
        prop_assert_eq!(row_and(&a, &b), sa.intersection(&sb).copied().collect::<Vec<_>>());
        prop_assert_eq!(row_or(&a, &b), sa.union(&sb).copied().collect::<Vec<_>>());
        prop_assert_eq!(row_sub(&a, &b), sa.difference(&sb).copied().collect::<Vec<_>>());
        prop_assert_eq!(
            row_xor(&a, &b),
            sa.symmetric_difference(&sb).copied().collect::<Vec<_>>()
        );
    }
}

#[test]
fn empty_inputs() {
    assert_eq!(row_and(&[], &[1, 2]), Vec::<u64>::new());
    assert_eq!(row_or(&[], &[1, 2]), vec![1, 2]);
    assert_eq!(row_sub(&[1, 2], &[]), vec![1, 2]);
    assert_eq!(row_not(&[], 0), Vec::<u64>::new());
    assert_eq!(row_not(&[0, 1, 2], 3), Vec::<u64>::new());
}

#[test]
fn not_ignores_rows_past_the_total() {
    assert_eq!(row_not(&[1, 7], 4), vec![0, 2, 3]);
}
