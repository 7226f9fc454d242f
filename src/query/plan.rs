//! Query solution nodes: the logical plan handed to the stage builder.

use serde_json::Value as Json;

use crate::query::GroupNode;
use crate::value::Value;

pub type NodeId = u32;

#[derive(Debug, Clone)]
pub enum QuerySolutionNode {
    /// In-memory document source.
    VirtualScan(VirtualScanNode),
    /// `$group` over exactly one child.
    Group(GroupNode),
}

impl QuerySolutionNode {
    pub fn node_id(&self) -> NodeId {
        match self {
            QuerySolutionNode::VirtualScan(scan) => scan.node_id,
            QuerySolutionNode::Group(group) => group.node_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QuerySolutionNode::VirtualScan(_) => "VIRTUAL_SCAN",
            QuerySolutionNode::Group(_) => "GROUP",
        }
    }
}

/// Columnar output settings for a virtual scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockScanOptions {
    /// Maximum number of documents per block.
    pub block_size: usize,
    /// A field that is constant within each block (the time-series "meta"
    /// field). Blocks are cut whenever its value changes, and the field is
    /// published as a scalar slot.
    pub meta_field: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VirtualScanNode {
    pub node_id: NodeId,
    pub docs: Vec<Value>,
    pub block_output: Option<BlockScanOptions>,
}

impl VirtualScanNode {
    pub fn new(node_id: NodeId, docs: Vec<Value>) -> Self {
        VirtualScanNode {
            node_id,
            docs,
            block_output: None,
        }
    }

    pub fn from_json(node_id: NodeId, docs: &[Json]) -> Self {
        Self::new(node_id, docs.iter().map(Value::from_json).collect())
    }

    pub fn with_blocks(mut self, block_size: usize) -> Self {
        let meta_field = self.block_output.take().and_then(|b| b.meta_field);
        self.block_output = Some(BlockScanOptions {
            block_size: block_size.max(1),
            meta_field,
        });
        self
    }

    pub fn with_meta_field(mut self, name: &str) -> Self {
        let block_size = self.block_output.as_ref().map_or(1024, |b| b.block_size);
        self.block_output = Some(BlockScanOptions {
            block_size,
            meta_field: Some(name.to_string()),
        });
        self
    }
}

impl From<VirtualScanNode> for QuerySolutionNode {
    fn from(scan: VirtualScanNode) -> Self {
        QuerySolutionNode::VirtualScan(scan)
    }
}

impl From<GroupNode> for QuerySolutionNode {
    fn from(group: GroupNode) -> Self {
        QuerySolutionNode::Group(group)
    }
}
