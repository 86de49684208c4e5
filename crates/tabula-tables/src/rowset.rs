//! Set algebra over ascending, duplicate-free row-number vectors.
//!
//! Every function is a single merge sweep. Inputs that are not strictly ascending give
//! meaningless output; callers sort first (see [`is_strictly_ascending`]).

/// Stand-in for an exhausted input; never a valid row number.
const END: u64 = u64::MAX;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Front {
    Both,
    Left,
    Right,
}

fn merge(a: &[u64], b: &[u64], capacity: usize, keep: impl Fn(Front) -> bool) -> Vec<u64> {
    let mut out = Vec::with_capacity(capacity);
    let (mut i, mut j) = (0, 0);
    loop {
        let row1 = a.get(i).copied().unwrap_or(END);
        let row2 = b.get(j).copied().unwrap_or(END);
        if row1 == row2 {
            if row1 == END {
                break;
            }
            if keep(Front::Both) {
                out.push(row1);
            }
            i += 1;
            j += 1;
        } else if row1 < row2 {
            if keep(Front::Left) {
                out.push(row1);
            }
            i += 1;
        } else {
            if keep(Front::Right) {
                out.push(row2);
            }
            j += 1;
        }
    }
    out
}

/// Rows present in both inputs.
pub fn row_and(a: &[u64], b: &[u64]) -> Vec<u64> {
    merge(a, b, a.len().min(b.len()), |front| front == Front::Both)
}

/// Rows present in either input, once.
pub fn row_or(a: &[u64], b: &[u64]) -> Vec<u64> {
    merge(a, b, a.len() + b.len(), |_| true)
}

/// Rows of `a` that are not in `b`.
pub fn row_sub(a: &[u64], b: &[u64]) -> Vec<u64> {
    merge(a, b, a.len(), |front| front == Front::Left)
}

/// Rows present in exactly one input.
pub fn row_xor(a: &[u64], b: &[u64]) -> Vec<u64> {
    merge(a, b, a.len() + b.len(), |front| front != Front::Both)
}

/// Rows of `0..nrtot` that are not in `a`.
pub fn row_not(a: &[u64], nrtot: u64) -> Vec<u64> {
    let mut out = Vec::with_capacity((nrtot as usize).saturating_sub(a.len()));
    let mut next = 0u64;
    for &row in a {
        if row >= nrtot {
            break;
        }
        out.extend(next..row);
        next = row + 1;
    }
    out.extend(next..nrtot);
    out
}

pub fn is_strictly_ascending(rows: &[u64]) -> bool {
    rows.windows(2).all(|pair| pair[0] < pair[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_cases() {
        let a = [1, 3, 5, 7];
        let b = [3, 4, 5];
        assert_eq!(row_and(&a, &b), vec![3, 5]);
        assert_eq!(row_or(&a, &b), vec![1, 3, 4, 5, 7]);
        assert_eq!(row_sub(&a, &b), vec![1, 7]);
        assert_eq!(row_xor(&a, &b), vec![1, 4, 7]);
        assert_eq!(row_not(&a, 9), vec![0, 2, 4, 6, 8]);
        assert_eq!(row_not(&[], 3), vec![0, 1, 2]);
    }
}
