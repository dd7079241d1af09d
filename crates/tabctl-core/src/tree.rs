use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ContainerId = i64;

/// Workspace sway uses to park scratchpad windows.
pub const SCRATCHPAD_WORKSPACE: &str = "__i3_scratch";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Root,
    Output,
    Workspace,
    Con,
    FloatingCon,
    Dockarea,
    #[default]
    #[serde(other)]
    Other,
}

/// One container of the tree printed by `swaymsg -t get_tree`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: ContainerId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    #[serde(default)]
    pub num: Option<i64>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub floating_nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Workspace {
    pub name: String,
    pub num: Option<i64>,
}

/// Container id to enclosing workspace, rebuilt from a fresh tree each time.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceIndex {
    by_container: HashMap<ContainerId, Workspace>,
}

impl WorkspaceIndex {
    pub fn get(&self, container: ContainerId) -> Option<&Workspace> {
        self.by_container.get(&container)
    }

    pub fn len(&self) -> usize {
        self.by_container.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_container.is_empty()
    }
}

/// Iterative depth-first, pre-order walk. A node's `nodes` come before its
/// `floating_nodes`, each list in order, so the first match this way wins.
pub struct Preorder<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        push_children(&mut self.stack, node);
        Some(node)
    }
}

fn push_children<'a>(stack: &mut Vec<&'a Node>, node: &'a Node) {
    stack.extend(node.floating_nodes.iter().rev());
    stack.extend(node.nodes.iter().rev());
}

impl Node {
    pub fn preorder(&self) -> Preorder<'_> {
        Preorder { stack: vec![self] }
    }

    /// Leaf containers holding an application window.
    pub fn is_window(&self) -> bool {
        matches!(self.node_type, NodeType::Con | NodeType::FloatingCon)
            && self.nodes.is_empty()
            && self.floating_nodes.is_empty()
    }

    pub fn find(&self, id: ContainerId) -> Option<&Node> {
        self.preorder().find(|node| node.id == id)
    }

    /// First window (pre-order) whose title contains `marker`.
    pub fn find_window_by_marker(&self, marker: &str) -> Option<&Node> {
        if marker.is_empty() {
            return None;
        }
        self.preorder().find(|node| {
            node.is_window()
                && node
                    .name
                    .as_deref()
                    .is_some_and(|name| name.contains(marker))
        })
    }

    pub fn workspace_index(&self) -> WorkspaceIndex {
        let mut by_container = HashMap::new();
        let mut stack: Vec<(&Node, Option<&Node>)> = vec![(self, None)];

        while let Some((node, enclosing)) = stack.pop() {
            let enclosing = if node.node_type == NodeType::Workspace {
                match node.name.as_deref() {
                    Some(SCRATCHPAD_WORKSPACE) => None,
                    _ => Some(node),
                }
            } else {
                enclosing
            };

            if matches!(node.node_type, NodeType::Con | NodeType::FloatingCon) {
                if let Some(workspace) = enclosing {
                    by_container.insert(
                        node.id,
                        Workspace {
                            name: workspace.name.clone().unwrap_or_default(),
                            num: workspace.num,
                        },
                    );
                }
            }

            for child in node.floating_nodes.iter().rev() {
                stack.push((child, enclosing));
            }
            for child in node.nodes.iter().rev() {
                stack.push((child, enclosing));
            }
        }

        WorkspaceIndex { by_container }
    }
}
