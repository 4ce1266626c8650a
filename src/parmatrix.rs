//! Row-distributed sparse matrices.
use crate::comm::Communicator;
use crate::error::Error;
use eyre::eyre;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;

/// A sparse matrix distributed by contiguous blocks of rows.
///
/// Each rank stores its rows with global column indices. The values of `x` needed by a
/// matrix-vector product but owned by other ranks are fetched with a communication plan built
/// once, at construction.
#[derive(Debug, Clone)]
pub struct ParCsrMatrix {
    rank: usize,
    row_starts: Vec<usize>,
    col_starts: Vec<usize>,
    local: CsrMatrix<f64>,
    /// Column of every stored entry in the concatenation of owned and external `x` entries.
    compressed_cols: Vec<usize>,
    /// Sorted global columns owned by other ranks.
    external: Vec<usize>,
    /// Ranks sending external entries, with counts, in the order of `external`.
    halo_recv: Vec<(usize, usize)>,
    /// Ranks receiving owned entries, with the owned column offsets they need.
    halo_send: Vec<(usize, Vec<usize>)>,
}

fn owner(starts: &[usize], index: usize) -> usize {
    starts.partition_point(|&start| start <= index) - 1
}

impl ParCsrMatrix {
    /// Builds the matrix from this rank's rows in CSR format.
    ///
    /// `row_starts` and `col_starts` hold the first row and column owned by every rank, followed by
    /// the global number of rows and columns. Collective: every rank must call this.
    pub fn from_csr<C: Communicator>(
        comm: &C,
        row_starts: Vec<usize>,
        col_starts: Vec<usize>,
        offsets: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, Error> {
        let rank = comm.rank();
        let size = comm.size();
        if row_starts.len() != size + 1 || col_starts.len() != size + 1 {
            return Err(eyre!("row and column partitions must have one entry per rank plus one").into());
        }
        let num_rows = row_starts[rank + 1] - row_starts[rank];
        let global_cols = col_starts[size];
        let local = CsrMatrix::try_from_csr_data(num_rows, global_cols, offsets, col_indices, values)
            .map_err(|err| eyre!("invalid CSR data on rank {rank}: {err}"))?;

        let (c0, c1) = (col_starts[rank], col_starts[rank + 1]);
        let mut external: Vec<usize> = local
            .col_indices()
            .iter()
            .copied()
            .filter(|&c| c < c0 || c >= c1)
            .collect();
        external.sort_unstable();
        external.dedup();

        let others: Vec<usize> = (0..size).filter(|&r| r != rank).collect();
        let requests: Vec<(usize, Vec<u64>)> = others
            .iter()
            .map(|&r| {
                let needed = external
                    .iter()
                    .filter(|&&c| owner(&col_starts, c) == r)
                    .map(|&c| c as u64)
                    .collect();
                (r, needed)
            })
            .collect();
        let halo_recv = requests
            .iter()
            .filter(|(_, needed)| !needed.is_empty())
            .map(|(r, needed)| (*r, needed.len()))
            .collect();

        let incoming = comm.exchange(&requests, &others);
        let mut halo_send = Vec::new();
        for (&r, needed) in others.iter().zip(incoming) {
            if needed.is_empty() {
                continue;
            }
            let offsets = needed
                .into_iter()
                .map(|c| {
                    let c = c as usize;
                    if (c0..c1).contains(&c) {
                        Ok(c - c0)
                    } else {
                        Err(eyre!("rank {r} requested column {c}, which rank {rank} does not own"))
                    }
                })
                .collect::<eyre::Result<Vec<_>>>()?;
            halo_send.push((r, offsets));
        }

        let num_owned_cols = c1 - c0;
        let compressed_cols = local
            .col_indices()
            .iter()
            .map(|&c| {
                if (c0..c1).contains(&c) {
                    c - c0
                } else {
                    // Present by construction of `external`
                    num_owned_cols + external.binary_search(&c).unwrap_or_default()
                }
            })
            .collect();

        Ok(Self {
            rank,
            row_starts,
            col_starts,
            local,
            compressed_cols,
            external,
            halo_recv,
            halo_send,
        })
    }

    pub fn local_rows(&self) -> usize {
        self.local.nrows()
    }

    pub fn global_rows(&self) -> usize {
        self.row_starts[self.row_starts.len() - 1]
    }

    pub fn global_cols(&self) -> usize {
        self.col_starts[self.col_starts.len() - 1]
    }

    pub fn first_row(&self) -> usize {
        self.row_starts[self.rank]
    }

    pub fn row_starts(&self) -> &[usize] {
        &self.row_starts
    }

    pub fn col_starts(&self) -> &[usize] {
        &self.col_starts
    }

    /// The locally stored rows, with global column indices.
    pub fn local(&self) -> &CsrMatrix<f64> {
        &self.local
    }

    pub fn local_nnz(&self) -> usize {
        self.local.nnz()
    }

    /// Computes `y = A x` for the owned parts of `x` and `y`. Collective.
    pub fn mult<C: Communicator>(&self, comm: &C, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.col_starts[self.rank + 1] - self.col_starts[self.rank]);
        assert_eq!(y.len(), self.local_rows());

        let sends: Vec<_> = self
            .halo_send
            .iter()
            .map(|(r, offsets)| (*r, offsets.iter().map(|&i| x[i]).collect::<Vec<f64>>()))
            .collect();
        let sources: Vec<usize> = self.halo_recv.iter().map(|(r, _)| *r).collect();
        let received = comm.exchange(&sends, &sources);

        let mut extended = Vec::with_capacity(x.len() + self.external.len());
        extended.extend_from_slice(x);
        for (values, (r, count)) in received.into_iter().zip(&self.halo_recv) {
            assert_eq!(values.len(), *count, "rank {r} sent an unexpected number of values");
            extended.extend(values);
        }

        let offsets = self.local.row_offsets();
        let values = self.local.values();
        let cols = &self.compressed_cols;
        y.par_iter_mut().enumerate().for_each(|(i, yi)| {
            *yi = (offsets[i]..offsets[i + 1])
                .map(|k| values[k] * extended[cols[k]])
                .sum();
        });
    }

    /// Diagonal of the owned rows of a square matrix.
    pub fn diagonal(&self) -> DVector<f64> {
        assert_eq!(self.row_starts, self.col_starts, "diagonal requires matching row and column partitions");
        let first = self.first_row();
        DVector::from_fn(self.local_rows(), |i, _| {
            self.local
                .get_entry(i, first + i)
                .map(|entry| entry.into_value())
                .unwrap_or(0.0)
        })
    }

    /// The square block of owned rows and owned columns, with local column indices.
    pub fn diagonal_block(&self) -> CsrMatrix<f64> {
        let (c0, c1) = (self.col_starts[self.rank], self.col_starts[self.rank + 1]);
        let mut offsets = Vec::with_capacity(self.local_rows() + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        offsets.push(0);
        for row in self.local.row_iter() {
            for (&c, &v) in row.col_indices().iter().zip(row.values()) {
                if (c0..c1).contains(&c) {
                    indices.push(c - c0);
                    values.push(v);
                }
            }
            offsets.push(indices.len());
        }
        // Column indices stay sorted and within bounds, so the data is valid by construction
        CsrMatrix::try_from_csr_data(self.local_rows(), c1 - c0, offsets, indices, values)
            .unwrap_or_else(|_| CsrMatrix::zeros(self.local_rows(), c1 - c0))
    }
}
