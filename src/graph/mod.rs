//! Read-only graph accessor consumed by the exclusion engines.
//!
//! The engines never look at vertex or edge data, only at the shape: which
//! edges touch a vertex and the stable id of each edge, which indexes the fork
//! table. `LocalGraph` is a small adjacency-list implementation of
//! `GraphTopology`, enough for a single process' slice of a graph.
use crate::RingError;

pub type VertexId = u32;
pub type EdgeId = usize;

/// A directed edge as stored by the graph. Exclusion treats it as undirected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source: VertexId,
    pub target: VertexId,
    pub id: EdgeId,
}

impl Edge {
    pub fn new(source: VertexId, target: VertexId, id: EdgeId) -> Self {
        Self { source, target, id }
    }

    /// The endpoint that is not `vertex`.
    pub fn other(&self, vertex: VertexId) -> VertexId {
        if self.source == vertex {
            self.target
        } else {
            self.source
        }
    }
}

/// Fixed-shape view of the local graph.
pub trait GraphTopology: Send + Sync {
    fn num_vertices(&self) -> usize;
    fn num_edges(&self) -> usize;
    /// Edges whose target is `vertex`.
    fn in_edges(&self, vertex: VertexId) -> impl Iterator<Item = Edge> + '_;
    /// Edges whose source is `vertex`.
    fn out_edges(&self, vertex: VertexId) -> impl Iterator<Item = Edge> + '_;

    fn edge_id(&self, edge: &Edge) -> EdgeId {
        edge.id
    }

    fn num_in_edges(&self, vertex: VertexId) -> usize {
        self.in_edges(vertex).count()
    }

    fn num_out_edges(&self, vertex: VertexId) -> usize {
        self.out_edges(vertex).count()
    }
}

/// Adjacency lists over a dense edge array; edge ids are insertion indices.
#[derive(Debug, Clone, Default)]
pub struct LocalGraph {
    edges: Vec<Edge>,
    in_adj: Vec<Vec<EdgeId>>,
    out_adj: Vec<Vec<EdgeId>>,
}

impl LocalGraph {
    pub fn new(num_vertices: usize) -> Self {
        Self {
            edges: Vec::new(),
            in_adj: vec![Vec::new(); num_vertices],
            out_adj: vec![Vec::new(); num_vertices],
        }
    }

    /// Builds a graph from `(source, target)` pairs.
    pub fn from_edges(num_vertices: usize, pairs: &[(VertexId, VertexId)]) -> Result<Self, RingError> {
        let mut graph = Self::new(num_vertices);
        for &(source, target) in pairs {
            graph.add_edge(source, target)?;
        }
        Ok(graph)
    }

    /// Undirected ring `0 - 1 - ... - (n-1) - 0`.
    pub fn ring(num_vertices: usize) -> Result<Self, RingError> {
        let n = num_vertices as VertexId;
        let pairs: Vec<_> = (0..n).map(|v| (v, (v + 1) % n)).collect();
        Self::from_edges(num_vertices, &pairs)
    }

    pub fn add_edge(&mut self, source: VertexId, target: VertexId) -> Result<EdgeId, RingError> {
        let num_vertices = self.in_adj.len();
        for vertex in [source, target] {
            if vertex as usize >= num_vertices {
                return Err(RingError::VertexOutOfRange {
                    vertex,
                    num_vertices,
                });
            }
        }
        let id = self.edges.len();
        if source == target {
            return Err(RingError::SelfLoop { vertex: source, edge: id });
        }
        self.edges.push(Edge::new(source, target, id));
        self.out_adj[source as usize].push(id);
        self.in_adj[target as usize].push(id);
        Ok(id)
    }

    pub fn edge(&self, id: EdgeId) -> Edge {
        self.edges[id]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }
}

impl GraphTopology for LocalGraph {
    fn num_vertices(&self) -> usize {
        self.in_adj.len()
    }

    fn num_edges(&self) -> usize {
        self.edges.len()
    }

    fn in_edges(&self, vertex: VertexId) -> impl Iterator<Item = Edge> + '_ {
        self.in_adj[vertex as usize].iter().map(|&id| self.edges[id])
    }

    fn out_edges(&self, vertex: VertexId) -> impl Iterator<Item = Edge> + '_ {
        self.out_adj[vertex as usize].iter().map(|&id| self.edges[id])
    }

    fn num_in_edges(&self, vertex: VertexId) -> usize {
        self.in_adj[vertex as usize].len()
    }

    fn num_out_edges(&self, vertex: VertexId) -> usize {
        self.out_adj[vertex as usize].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_shape() {
        let graph = LocalGraph::ring(4).unwrap();
        assert_eq!(graph.num_vertices(), 4);
        assert_eq!(graph.num_edges(), 4);
        for v in 0..4 {
            assert_eq!(graph.num_in_edges(v) + graph.num_out_edges(v), 2);
        }
        let closing = graph.edge(3);
        assert_eq!((closing.source, closing.target), (3, 0));
        assert_eq!(closing.other(3), 0);
        assert_eq!(closing.other(0), 3);
    }

    #[test]
    fn test_rejects_bad_edges() {
        let mut graph = LocalGraph::new(2);
        assert_eq!(
            graph.add_edge(1, 1),
            Err(RingError::SelfLoop { vertex: 1, edge: 0 })
        );
        assert_eq!(
            graph.add_edge(0, 5),
            Err(RingError::VertexOutOfRange {
                vertex: 5,
                num_vertices: 2
            })
        );
        assert_eq!(graph.add_edge(0, 1), Ok(0));
        assert_eq!(graph.edge_id(&graph.edge(0)), 0);
    }

    #[test]
    fn test_adjacency_lists() {
        let graph = LocalGraph::from_edges(3, &[(0, 1), (2, 1), (1, 0)]).unwrap();
        let into_one: Vec<_> = graph.in_edges(1).map(|e| e.id).collect();
        let out_of_one: Vec<_> = graph.out_edges(1).map(|e| e.id).collect();
        assert_eq!(into_one, vec![0, 1]);
        assert_eq!(out_of_one, vec![2]);
    }
}
