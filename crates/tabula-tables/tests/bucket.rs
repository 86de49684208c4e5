use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use tabula_tables::{Bucket, BucketLayout, IndexViolation, ItemLength};

fn layout(ncol: usize) -> Arc<BucketLayout> {
    BucketLayout::new(4096, vec![ItemLength::Fixed(8); ncol])
}

/// Bucket whose column `c` has runs starting at `starts[c]` (which must begin with 0); the
/// value of a run is its start row plus 1000 times the column.
fn build(starts: &[Vec<u64>]) -> Bucket {
    let mut bucket = Bucket::new(layout(starts.len()));
    for (column, rows) in starts.iter().enumerate() {
        for (index, &row) in rows.iter().enumerate() {
            let value = row + 1000 * column as u64;
            bucket.add_data(column, row, index, &value.to_le_bytes());
        }
    }
    bucket
}

fn value_at(bucket: &Bucket, column: usize, row: u64, nrrow: u64) -> u64 {
    let interval = bucket.get_interval(column, row, nrrow);
    let bytes: [u8; 8] = bucket.item(column, interval.run).try_into().unwrap();
    u64::from_le_bytes(bytes)
}

fn run_starts(max_row: u64) -> impl Strategy<Value = Vec<u64>> {
    proptest::collection::btree_set(1..max_row, 0..30).prop_map(|set| {
        let mut rows = vec![0];
        rows.extend(set);
        rows
    })
}

proptest! {
    #[test]
    fn split_conserves_every_row(
        starts in proptest::collection::vec(run_starts(200), 1..4),
        extra in 1u64..20,
        row_seed in any::<u64>(),
        at_end in any::<bool>(),
    ) {
        let bucket = build(&starts);
        let nrrow = starts.iter().map(|rows| *rows.last().unwrap()).max().unwrap() + extra;
        prop_assume!(nrrow > 1);
        let row = 1 + row_seed % (nrrow - 1);
        let split = bucket.split(0, row, 8, nrrow, at_end);

        prop_assert!(split.split_row > 0 && split.split_row < nrrow);
        prop_assert!(split.left.check());
        prop_assert!(split.right.check());
        for column in 0..starts.len() {
            for r in 0..nrrow {
                let expected = value_at(&bucket, column, r, nrrow);
                let actual = if r < split.split_row {
                    value_at(&split.left, column, r, split.split_row)
                } else {
                    value_at(&split.right, column, r - split.split_row, nrrow - split.split_row)
                };
                prop_assert_eq!(actual, expected, "column {} row {}", column, r);
            }
            let starts_at_split = starts[column].contains(&split.split_row);
            prop_assert_eq!(split.duplicated[column], !starts_at_split);
            let total = split.left.nused(column) + split.right.nused(column);
            prop_assert_eq!(total, bucket.nused(column) + usize::from(split.duplicated[column]));
        }
    }

    #[test]
    fn write_then_read_is_identical(starts in proptest::collection::vec(run_starts(500), 1..4)) {
        let bucket = build(&starts);
        let page = bucket.write();
        prop_assert_eq!(page.len(), 4096);
        let read = Bucket::read(bucket.layout().clone(), &page).unwrap();
        prop_assert_eq!(&read, &bucket);
        for column in 0..starts.len() {
            for run in 0..bucket.nused(column) {
                prop_assert_eq!(read.item(column, run), bucket.item(column, run));
            }
        }
    }
}

#[test]
fn interval_lookup_uses_preceding_run() {
    let bucket = build(&[vec![0, 4, 9]]);
    let interval = bucket.get_interval(0, 6, 12);
    assert_eq!((interval.start, interval.end, interval.run, interval.index), (4, 8, 1, 2));
    let last = bucket.get_interval(0, 11, 12);
    assert_eq!((last.start, last.end), (9, 11));
    let exact = bucket.get_interval(0, 9, 12);
    assert_eq!((exact.run, exact.index), (2, 2));
}

#[test]
fn add_data_at_existing_start_narrows_following_run() {
    let mut bucket = build(&[vec![0, 4]]);
    bucket.add_data(0, 4, 1, &77u64.to_le_bytes());
    assert_eq!(bucket.row_index(0), &[0, 4, 5]);
    assert_eq!(value_at(&bucket, 0, 4, 10), 77);
    assert_eq!(value_at(&bucket, 0, 5, 10), 4);
}

#[test]
fn replace_and_shift_keep_offsets_consistent() {
    let layout = BucketLayout::new(512, vec![ItemLength::Variable, ItemLength::Fixed(8)]);
    let mut bucket = Bucket::new(layout);
    let item = |payload: &[u8]| {
        let mut item = ((payload.len() + 4) as u32).to_le_bytes().to_vec();
        item.extend_from_slice(payload);
        item
    };
    bucket.add_data(0, 0, 0, &item(b"alpha"));
    bucket.add_data(1, 0, 0, &1u64.to_le_bytes());
    bucket.add_data(0, 3, 1, &item(b"be"));
    bucket.add_data(1, 5, 1, &2u64.to_le_bytes());

    bucket.replace_data(0, 0, &item(b"a much longer value"));
    assert_eq!(bucket.item(0, 0), item(b"a much longer value").as_slice());
    assert_eq!(bucket.item(0, 1), item(b"be").as_slice());
    assert_eq!(value_at(&bucket, 1, 6, 8), 2);

    let before = bucket.data_len();
    bucket.shift_left(0, 1, 1);
    assert_eq!(bucket.data_len(), before - 6);
    assert_eq!(bucket.row_index(0), &[0]);
    assert_eq!(value_at(&bucket, 1, 0, 8), 1);
    assert_eq!(value_at(&bucket, 1, 7, 8), 2);
}

#[test]
fn remove_row_drops_single_row_runs_and_merges_neighbours() {
    let mut bucket = Bucket::new(layout(1));
    bucket.add_data(0, 0, 0, &5u64.to_le_bytes());
    bucket.add_data(0, 3, 1, &6u64.to_le_bytes());
    bucket.add_data(0, 4, 2, &5u64.to_le_bytes());
    bucket.remove_row(3, 8);
    assert_eq!(bucket.row_index(0), &[0]);
    assert_eq!(value_at(&bucket, 0, 6, 7), 5);

    let mut bucket = build(&[vec![0, 2, 6]]);
    bucket.remove_row(4, 9);
    assert_eq!(bucket.row_index(0), &[0, 2, 5]);
}

#[test]
fn simple_split_for_appends() {
    let bucket = build(&[vec![0, 3], vec![0, 5]]);
    let split = bucket.simple_split(5).unwrap();
    assert_eq!(split.split_row, 5);
    assert_eq!(split.duplicated, vec![true, false]);
    assert_eq!(split.left.row_index(0), &[0, 3]);
    assert_eq!(split.left.row_index(1), &[0]);
    assert_eq!(split.right.row_index(0), &[0]);
    assert_eq!(value_at(&split.right, 0, 0, 1), 3);
    assert_eq!(value_at(&split.right, 1, 0, 1), 1005);
    assert!(bucket.simple_split(4).is_none());
}

#[test]
fn wide_row_numbers_round_trip() {
    let big = u64::from(u32::MAX) + 10;
    let bucket = build(&[vec![0, big]]);
    let page = bucket.write();
    assert_ne!(u32::from_le_bytes(page[..4].try_into().unwrap()) & 0x8000_0000, 0);
    let read = Bucket::read(bucket.layout().clone(), &page).unwrap();
    assert_eq!(read.row_index(0), &[0, big]);

    let narrow = build(&[vec![0, u64::from(u32::MAX)]]).write();
    assert_eq!(u32::from_le_bytes(narrow[..4].try_into().unwrap()) & 0x8000_0000, 0);
}

#[test]
fn check_reports_non_monotonic_index() {
    let bucket = build(&[vec![0, 5, 9]]);
    assert!(bucket.check());
    let mut page = bucket.write();
    let index = u32::from_le_bytes(page[..4].try_into().unwrap()) as usize;
    // count word, then the row numbers of column 0
    let second = index + 4 + 4;
    page[second..second + 4].copy_from_slice(&10u32.to_le_bytes());
    let corrupt = Bucket::read(bucket.layout().clone(), &page).unwrap();
    assert!(!corrupt.check());
    assert_eq!(
        corrupt.first_violation(),
        Some(IndexViolation {
            column: 0,
            index: 2,
            row: 9,
            prev_row: 10
        })
    );
}

#[test]
fn truncated_page_is_corrupt() {
    let bucket = build(&[vec![0, 5]]);
    let page = bucket.write();
    assert!(Bucket::read(bucket.layout().clone(), &page[..10]).is_err());
}

#[test]
fn display_lists_runs() {
    let bucket = build(&[vec![0, 2]]);
    let text = bucket.to_string();
    assert!(text.contains("rows: [0, 2]"));
    assert!(text.contains("offs: [0, 8]"));
}

#[test]
#[should_panic(expected = "bucket overflow")]
fn add_data_past_capacity_panics() {
    let mut bucket = Bucket::new(BucketLayout::new(40, vec![ItemLength::Fixed(8)]));
    bucket.add_data(0, 0, 0, &[0; 8]);
    bucket.add_data(0, 1, 1, &[0; 8]);
}
