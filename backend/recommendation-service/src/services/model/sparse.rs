use serde::{Deserialize, Serialize};

/// Compressed sparse row matrix of user-row by item-column interaction
/// weights. Duplicate (row, col) entries sum their values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CsrMatrix {
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
    cols: usize,
}

impl CsrMatrix {
    pub fn from_triplets(
        rows: usize,
        cols: usize,
        mut triplets: Vec<(usize, usize, f64)>,
    ) -> Self {
        triplets.retain(|&(r, c, _)| r < rows && c < cols);
        triplets.sort_unstable_by_key(|&(r, c, _)| (r, c));

        let mut row_offsets = vec![0usize; rows + 1];
        let mut col_indices = Vec::with_capacity(triplets.len());
        let mut values: Vec<f64> = Vec::with_capacity(triplets.len());

        let mut last: Option<(usize, usize)> = None;
        for (r, c, v) in triplets {
            if last == Some((r, c)) {
                *values.last_mut().unwrap() += v;
            } else {
                row_offsets[r + 1] += 1;
                col_indices.push(c);
                values.push(v);
                last = Some((r, c));
            }
        }
        for r in 0..rows {
            row_offsets[r + 1] += row_offsets[r];
        }

        Self {
            row_offsets,
            col_indices,
            values,
            cols,
        }
    }

    pub fn rows(&self) -> usize {
        self.row_offsets.len().saturating_sub(1)
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices with a stored entry in the given row
    pub fn row_indices(&self, row: usize) -> &[usize] {
        match (self.row_offsets.get(row), self.row_offsets.get(row + 1)) {
            (Some(&start), Some(&end)) => &self.col_indices[start..end],
            _ => &[],
        }
    }

    /// (column, weight) pairs stored in the given row
    pub fn row_entries(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let (start, end) = match (self.row_offsets.get(row), self.row_offsets.get(row + 1)) {
            (Some(&start), Some(&end)) => (start, end),
            _ => (0, 0),
        };
        self.col_indices[start..end]
            .iter()
            .zip(&self.values[start..end])
            .map(|(&c, &v)| (c, v))
    }

    /// Total stored weight per column
    pub fn column_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.cols];
        for (&c, &v) in self.col_indices.iter().zip(&self.values) {
            sums[c] += v;
        }
        sums
    }
}
