use std::fmt::Write;
use crate::core::types::ElementTypeId;

/// Arena slot of a node inside one `StubTree`
pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct StubNode {
    pub element_type: ElementTypeId,
    pub data: Vec<u8>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl StubNode {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Structural summary of one parsed file. Node 0 is the root.
///
/// Equality is structural: element types, data and child order compared in
/// pre-order, regardless of arena layout.
#[derive(Debug, Clone)]
pub struct StubTree {
    nodes: Vec<StubNode>,
}

impl StubTree {
    pub fn new(root_type: ElementTypeId, data: impl Into<Vec<u8>>) -> Self {
        StubTree {
            nodes: vec![StubNode {
                element_type: root_type,
                data: data.into(),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn add_child(&mut self, parent: NodeId, element_type: ElementTypeId, data: impl Into<Vec<u8>>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(StubNode {
            element_type,
            data: data.into(),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&StubNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pre-order addressing of the nodes
    pub fn spine(&self) -> Spine {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        Spine { order }
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root(), 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id];
            let _ = writeln!(out, "{}{} {:?}", "  ".repeat(depth), node.element_type, node.text());
            stack.extend(node.children.iter().rev().map(|&child| (child, depth + 1)));
        }
        out
    }
}

impl PartialEq for StubTree {
    fn eq(&self, other: &Self) -> bool {
        let (left, right) = (self.spine(), other.spine());
        left.len() == right.len()
            && left.order.iter().zip(right.order.iter()).all(|(&a, &b)| {
                let (a, b) = (&self.nodes[a], &other.nodes[b]);
                a.element_type == b.element_type
                    && a.data == b.data
                    && a.children.len() == b.children.len()
            })
    }
}

impl Eq for StubTree {}

/// Ordinal -> node mapping of one tree
#[derive(Debug, Clone)]
pub struct Spine {
    order: Vec<NodeId>,
}

impl Spine {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn node_at(&self, ordinal: usize) -> Option<NodeId> {
        self.order.get(ordinal).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, NodeId)> + '_ {
        self.order.iter().copied().enumerate()
    }
}
