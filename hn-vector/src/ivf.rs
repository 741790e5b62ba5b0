//! IVF-FLAT: a flat k-means coarse quantizer over inverted cells, squared
//! L2 throughout. Everything lives in memory and search never suspends.

/// Cells in the coarse quantizer.
pub const NLIST: usize = 100;
/// Cells probed per lookup.
pub const NPROBE: usize = 35;

const KMEANS_ITERATIONS: usize = 10;

#[derive(Default)]
struct Cell {
    ids: Vec<u64>,
    vectors: Vec<f32>,
}

impl Cell {
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn vector(&self, row: usize, dim: usize) -> &[f32] {
        &self.vectors[row * dim..(row + 1) * dim]
    }
}

/// An inverted-file index with a flat quantizer. Multiple points may carry
/// the same id; one story contributes one point per document part.
pub struct IvfFlat {
    dim: usize,
    nprobe: usize,
    centroids: Vec<f32>,
    cells: Vec<Cell>,
}

fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

impl IvfFlat {
    /// Train the coarse quantizer on the given row-major vectors and return
    /// an empty index ready for [`add`](Self::add). Training data smaller
    /// than `nlist` clamps the cell count.
    pub fn train(dim: usize, vectors: &[f32], nlist: usize, nprobe: usize) -> Self {
        let count = if dim == 0 { 0 } else { vectors.len() / dim };
        let nlist = nlist.min(count).max(1);

        let centroids = if count == 0 {
            Vec::new()
        } else {
            kmeans(dim, vectors, count, nlist)
        };
        let cells = (0..centroids.len() / dim.max(1)).map(|_| Cell::default()).collect();

        Self {
            dim,
            nprobe,
            centroids,
            cells,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Total points in the index.
    pub fn len(&self) -> usize {
        self.cells.iter().map(Cell::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the quantizer has no centroids, i.e. it was trained on an
    /// empty vector set.
    pub fn is_untrained(&self) -> bool {
        self.cells.is_empty()
    }

    fn nearest_cell(&self, vector: &[f32]) -> usize {
        let mut best = 0;
        let mut best_distance = f32::INFINITY;
        for (cell, centroid) in self.centroids.chunks_exact(self.dim).enumerate() {
            let distance = l2(vector, centroid);
            if distance < best_distance {
                best = cell;
                best_distance = distance;
            }
        }
        best
    }

    /// Add a point. The id is attached, not unique. An untrained quantizer
    /// has no cells to file the point under, so the add is dropped; callers
    /// retrain from the store instead.
    pub fn add(&mut self, id: u64, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dim);
        if self.cells.is_empty() {
            return;
        }
        let cell = self.nearest_cell(vector);
        self.cells[cell].ids.push(id);
        self.cells[cell].vectors.extend_from_slice(vector);
    }

    /// Remove every point carrying the given id. Returns how many went.
    pub fn remove_id(&mut self, id: u64) -> usize {
        let dim = self.dim;
        let mut removed = 0;
        for cell in &mut self.cells {
            let mut row = 0;
            while row < cell.ids.len() {
                if cell.ids[row] == id {
                    cell.ids.swap_remove(row);
                    let last = cell.vectors.len() - dim;
                    for offset in 0..dim {
                        cell.vectors.swap(row * dim + offset, last + offset);
                    }
                    cell.vectors.truncate(last);
                    removed += 1;
                } else {
                    row += 1;
                }
            }
        }
        removed
    }

    /// Nearest neighbors of the query: the `top_k` closest points across the
    /// probed cells, collapsed to unique ids keeping the first (closest)
    /// occurrence of each.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(u64, f32)> {
        if top_k == 0 || self.is_untrained() {
            return Vec::new();
        }

        // Rank cells by centroid distance and probe the closest few.
        let mut cell_order: Vec<(f32, usize)> = self
            .centroids
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(cell, centroid)| (l2(query, centroid), cell))
            .collect();
        cell_order.sort_by(|a, b| a.0.total_cmp(&b.0));
        cell_order.truncate(self.nprobe);

        let mut hits: Vec<(f32, u64)> = Vec::new();
        for &(_, cell_index) in &cell_order {
            let cell = &self.cells[cell_index];
            for row in 0..cell.len() {
                hits.push((l2(query, cell.vector(row, self.dim)), cell.ids[row]));
            }
        }

        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        hits.truncate(top_k);

        let mut seen = std::collections::HashSet::new();
        hits.into_iter()
            .filter(|(_, id)| seen.insert(*id))
            .map(|(distance, id)| (id, distance))
            .collect()
    }
}

/// Plain Lloyd's iterations with deterministic strided seeding. Empty
/// clusters keep their previous centroid.
fn kmeans(dim: usize, vectors: &[f32], count: usize, k: usize) -> Vec<f32> {
    let mut centroids = Vec::with_capacity(k * dim);
    for i in 0..k {
        let row = i * count / k;
        centroids.extend_from_slice(&vectors[row * dim..(row + 1) * dim]);
    }

    let mut assignment = vec![0usize; count];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for row in 0..count {
            let vector = &vectors[row * dim..(row + 1) * dim];
            let mut best = assignment[row];
            let mut best_distance = f32::INFINITY;
            for (cell, centroid) in centroids.chunks_exact(dim).enumerate() {
                let distance = l2(vector, centroid);
                if distance < best_distance {
                    best = cell;
                    best_distance = distance;
                }
            }
            if best != assignment[row] {
                assignment[row] = best;
                changed = true;
            }
        }

        let mut sums = vec![0f64; k * dim];
        let mut counts = vec![0usize; k];
        for row in 0..count {
            let cell = assignment[row];
            counts[cell] += 1;
            for offset in 0..dim {
                sums[cell * dim + offset] += vectors[row * dim + offset] as f64;
            }
        }
        for cell in 0..k {
            if counts[cell] == 0 {
                continue;
            }
            for offset in 0..dim {
                centroids[cell * dim + offset] =
                    (sums[cell * dim + offset] / counts[cell] as f64) as f32;
            }
        }

        if !changed {
            break;
        }
    }
    centroids
}
