pub mod dijkstra;

pub use dijkstra::{CostFunction, EdgeWeight, LeastHops, PathResult};
