//! Compressed sparse row topology with per-edge data.
//!
//! Layout:
//! - `offsets`: `Vec<usize>` of length `n + 1`
//! - `targets`: destination of every edge, grouped by source
//! - `data`: edge payloads, parallel to `targets`

/// Read-only CSR graph over local node ids.
///
/// ### Performance Characteristics
/// | Operation | Complexity |
/// |-----------|------------|
/// | `from_edges` | \(O(n + m)\) |
/// | `neighbors` | \(O(1)\) to start, then \(O(\text{degree})\) |
/// | `degree` | \(O(1)\) |
#[derive(Debug, Clone, PartialEq)]
pub struct CsrGraph<E = ()> {
    offsets: Vec<usize>,
    targets: Vec<u32>,
    data: Vec<E>,
}

impl<E> Default for CsrGraph<E> {
    fn default() -> Self {
        Self {
            offsets: vec![0],
            targets: Vec::new(),
            data: Vec::new(),
        }
    }
}

impl CsrGraph<()> {
    /// Builds an unweighted graph from an adjacency list.
    ///
    /// # Panics
    ///
    /// Panics if any edge references a node index out of bounds.
    pub fn from_adjacency(adjacency: &[Vec<u32>]) -> Self {
        let n = adjacency.len();
        let mut offsets = Vec::with_capacity(n + 1);
        offsets.push(0);
        let mut total = 0usize;
        for nbrs in adjacency {
            total += nbrs.len();
            offsets.push(total);
        }
        let mut targets = Vec::with_capacity(total);
        for (u, nbrs) in adjacency.iter().enumerate() {
            for &v in nbrs {
                assert!((v as usize) < n, "edge {u}->{v} is out of bounds for n={n}");
                targets.push(v);
            }
        }
        Self {
            offsets,
            data: vec![(); targets.len()],
            targets,
        }
    }
}

impl<E> CsrGraph<E> {
    /// Builds a graph on `n` nodes from `(src, dst, data)` triples.
    ///
    /// Edges keep their input order within each source.
    ///
    /// # Panics
    ///
    /// Panics if an endpoint is `>= n`.
    pub fn from_edges(n: usize, edges: Vec<(u32, u32, E)>) -> Self {
        let mut offsets = vec![0usize; n + 1];
        for &(u, v, _) in &edges {
            assert!(
                (u as usize) < n && (v as usize) < n,
                "edge {u}->{v} is out of bounds for n={n}"
            );
            offsets[u as usize + 1] += 1;
        }
        for i in 0..n {
            offsets[i + 1] += offsets[i];
        }

        let m = edges.len();
        let mut cursor = offsets.clone();
        let mut slots: Vec<Option<(u32, E)>> = std::iter::repeat_with(|| None).take(m).collect();
        for (u, v, e) in edges {
            let at = cursor[u as usize];
            cursor[u as usize] += 1;
            slots[at] = Some((v, e));
        }
        let (targets, data) = slots.into_iter().flatten().unzip();
        Self {
            offsets,
            targets,
            data,
        }
    }

    /// Builds a graph directly from CSR parts.
    ///
    /// # Panics
    /// - if `offsets` is empty or not monotone
    /// - if `offsets.last()` differs from the edge count
    /// - if `targets` and `data` differ in length
    pub fn from_csr_parts(offsets: Vec<usize>, targets: Vec<u32>, data: Vec<E>) -> Self {
        assert!(!offsets.is_empty(), "offsets must have length n+1");
        let n = offsets.len() - 1;
        for w in offsets.windows(2) {
            assert!(w[0] <= w[1], "offsets must be monotone");
        }
        assert_eq!(offsets[n], targets.len(), "offsets last must equal edges length");
        assert_eq!(targets.len(), data.len(), "one payload per edge");
        for &v in &targets {
            assert!((v as usize) < n, "edge to {v} out of bounds for n={n}");
        }
        Self {
            offsets,
            targets,
            data,
        }
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.targets.len()
    }

    /// Out-degree of `u`.
    #[inline]
    pub fn degree(&self, u: u32) -> usize {
        let u = u as usize;
        self.offsets[u + 1] - self.offsets[u]
    }

    /// Out-edges of `u` as `(dst, &data)`.
    #[inline]
    pub fn neighbors(&self, u: u32) -> impl Iterator<Item = (u32, &E)> + '_ {
        let range = self.offsets[u as usize]..self.offsets[u as usize + 1];
        self.targets[range.clone()].iter().copied().zip(&self.data[range])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_edges_groups_by_source() {
        let g = CsrGraph::from_edges(3, vec![(2, 0, 'a'), (0, 1, 'b'), (2, 1, 'c'), (0, 2, 'd')]);
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 4);
        assert_eq!(g.neighbors(0).collect::<Vec<_>>(), vec![(1, &'b'), (2, &'d')]);
        assert_eq!(g.degree(1), 0);
        assert_eq!(g.neighbors(2).collect::<Vec<_>>(), vec![(0, &'a'), (1, &'c')]);
    }

    #[test]
    fn adjacency_and_parts_agree() {
        let a = CsrGraph::from_adjacency(&[vec![1, 2], vec![2], vec![]]);
        let b = CsrGraph::from_csr_parts(vec![0, 2, 3, 3], vec![1, 2, 2], vec![(); 3]);
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_range_edge_panics() {
        CsrGraph::from_edges(2, vec![(0, 5, ())]);
    }
}
