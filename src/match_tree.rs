//! Trie mapping abstract states to their applicable abstract operators.
//!
//! One level per pattern position, children indexed by variable value.
//! Nodes live in an arena and refer to each other by index. Operators are
//! appended at the leaf their successor values select, so a lookup returns
//! them in insertion order.

/// Sentinel for "no child".
const NONE: usize = usize::MAX;

#[derive(Debug)]
struct Node {
    /// Child node per value of the position this node tests.
    children: Vec<usize>,
    /// Abstract-operator indices stored at this leaf.
    operators: Vec<usize>,
}

#[derive(Debug)]
pub struct MatchTree {
    /// Domain size per pattern position.
    domains: Vec<usize>,
    /// Arena; node 0 is the root.
    nodes: Vec<Node>,
}

impl MatchTree {
    pub fn new(domains: Vec<usize>) -> Self {
        let root = Node {
            children: vec![NONE; domains.first().copied().unwrap_or(0)],
            operators: Vec::new(),
        };
        Self {
            domains,
            nodes: vec![root],
        }
    }

    fn add_node(&mut self, depth: usize) -> usize {
        let num_children = self.domains.get(depth).copied().unwrap_or(0);
        self.nodes.push(Node {
            children: vec![NONE; num_children],
            operators: Vec::new(),
        });
        self.nodes.len() - 1
    }

    /// Inserts an operator under its successor values (one per position).
    pub fn insert(&mut self, successor_values: &[usize], op_index: usize) {
        assert_eq!(successor_values.len(), self.domains.len());
        let mut node = 0;
        for (depth, &value) in successor_values.iter().enumerate() {
            debug_assert!(value < self.domains[depth]);
            let child = self.nodes[node].children[value];
            node = if child == NONE {
                let new = self.add_node(depth + 1);
                self.nodes[node].children[value] = new;
                new
            } else {
                child
            };
        }
        self.nodes[node].operators.push(op_index);
    }

    /// Appends to `out` the operators applicable at the given abstract
    /// state, in insertion order.
    pub fn lookup(&self, values: &[usize], out: &mut Vec<usize>) {
        debug_assert_eq!(values.len(), self.domains.len());
        let mut node = 0;
        for &value in values {
            let child = self.nodes[node].children[value];
            if child == NONE {
                return;
            }
            node = child;
        }
        out.extend_from_slice(&self.nodes[node].operators);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_lookup() {
        let tree = MatchTree::new(vec![2, 3]);
        let mut out = Vec::new();
        tree.lookup(&[1, 2], &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut tree = MatchTree::new(vec![2, 3]);
        tree.insert(&[0, 2], 7);
        tree.insert(&[1, 0], 3);
        tree.insert(&[0, 2], 5);

        let mut out = Vec::new();
        tree.lookup(&[0, 2], &mut out);
        assert_eq!(out, vec![7, 5]); // Insertion order.

        out.clear();
        tree.lookup(&[1, 0], &mut out);
        assert_eq!(out, vec![3]);

        out.clear();
        tree.lookup(&[0, 0], &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_zero_length_pattern_path() {
        // A tree over no positions stores everything at the root.
        let mut tree = MatchTree::new(vec![]);
        tree.insert(&[], 0);
        tree.insert(&[], 1);
        let mut out = Vec::new();
        tree.lookup(&[], &mut out);
        assert_eq!(out, vec![0, 1]);
    }
}
