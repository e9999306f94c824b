use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use burn::tensor::{backend::Backend, Data, Shape, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

pub const GRAPH_FILE: &str = "graph.json";

/// Static structure of the sensor network.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GraphData {
    pub adj_mx: Vec<Vec<f32>>,          // [N, N]
    pub edge_index: [Vec<usize>; 2],    // [2, M]
    pub edge_attr: Vec<Vec<f32>>,       // [M, D_e]
    pub node_attr: Vec<Vec<f32>>,       // [N, D_n]
}

impl GraphData {
    pub fn num_nodes(&self) -> usize {
        self.adj_mx.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edge_index[0].len()
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.num_nodes();
        if n == 0 {
            return Err(HarnessError::Data("graph has no nodes".into()));
        }
        if let Some(row) = self.adj_mx.iter().find(|row| row.len() != n) {
            return Err(HarnessError::shape("adjacency matrix", format!("{n} columns"), row.len()));
        }

        let [src, dst] = &self.edge_index;
        if src.len() != dst.len() {
            return Err(HarnessError::shape("edge index", src.len(), dst.len()));
        }
        if let Some(node) = src.iter().chain(dst.iter()).find(|node| **node >= n) {
            return Err(HarnessError::Data(format!(
                "edge endpoint {node} out of range for {n} nodes"
            )));
        }
        if !self.edge_attr.is_empty() && self.edge_attr.len() != self.num_edges() {
            return Err(HarnessError::shape("edge attributes", self.num_edges(), self.edge_attr.len()));
        }
        if !self.node_attr.is_empty() && self.node_attr.len() != n {
            return Err(HarnessError::shape("node attributes", n, self.node_attr.len()));
        }

        Ok(())
    }

    pub fn adjacency<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let n = self.num_nodes();
        let data = Data::new(
            self.adj_mx.iter().flatten().copied().collect(),
            Shape::new([n, n]),
        );
        let tensor: Tensor<B, 2> = Tensor::from_data(data.convert());
        tensor.to_device(device)
    }
}

/// Reads `graph.json` from the dataset root.
pub fn load_graph_data<P: AsRef<Path>>(root_path: P) -> Result<GraphData> {
    let path = root_path.as_ref().join(GRAPH_FILE);
    let file = File::open(&path).map_err(|err| {
        HarnessError::Data(format!("cannot open {}: {err}", path.display()))
    })?;
    let graph: GraphData = serde_json::from_reader(BufReader::new(file))?;
    graph.validate()?;

    Ok(graph)
}
