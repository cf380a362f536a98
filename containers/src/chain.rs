use std::slice::Iter;

use crate::error::ContainerErrors;

/// Append-only list of boxed nodes.
///
/// Nodes are never removed or reordered, so the index of a node is stable for the lifetime of the
/// chain and the node itself never moves in memory when the chain grows.
#[derive(Debug)]
pub struct Chain<T> {
    nodes: Vec<Box<T>>,
    max: Option<usize>,
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Chain<T> {
    /// An unbounded chain
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            max: None,
        }
    }

    /// A chain that refuses to grow past `max` nodes
    pub fn with_max(max: usize) -> Self {
        Self {
            nodes: Vec::new(),
            max: Some(max),
        }
    }

    pub fn max(&self) -> Option<usize> {
        self.max
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.max.is_some_and(|max| self.nodes.len() >= max)
    }

    /// Append a node and return its index
    pub fn push(&mut self, node: T) -> Result<usize, ContainerErrors> {
        if let Some(max) = self.max {
            if self.nodes.len() >= max {
                return Err(ContainerErrors::ChainFull { max });
            }
        }
        self.nodes.push(Box::new(node));
        Ok(self.nodes.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.nodes.get(index).map(|node| &**node)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.nodes.get_mut(index).map(|node| &mut **node)
    }

    pub fn try_get_mut(&mut self, index: usize) -> Result<&mut T, ContainerErrors> {
        self.get_mut(index)
            .ok_or(ContainerErrors::InvalidHandle { index })
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.nodes.iter().map(|node| &**node)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.nodes.iter_mut().map(|node| &mut **node)
    }

    /// Iterate the boxes themselves, for callers that need the node addresses
    pub fn boxes(&self) -> Iter<'_, Box<T>> {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_get() {
        let mut chain = Chain::new();
        assert_eq!(chain.push(10).unwrap(), 0);
        assert_eq!(chain.push(20).unwrap(), 1);
        assert_eq!(chain.get(1), Some(&20));
        assert_eq!(chain.get(2), None);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_max_nodes() {
        let mut chain = Chain::with_max(2);
        chain.push("a").unwrap();
        chain.push("b").unwrap();
        assert!(chain.is_full());
        match chain.push("c") {
            Err(ContainerErrors::ChainFull { max: 2 }) => {}
            _ => panic!("Expected ChainFull error"),
        }
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_nodes_do_not_move() {
        let mut chain = Chain::new();
        chain.push([0u8; 64]).unwrap();
        let first: *const [u8; 64] = &**chain.boxes().next().unwrap();
        for _ in 0..100 {
            chain.push([1u8; 64]).unwrap();
        }
        let after: *const [u8; 64] = &**chain.boxes().next().unwrap();
        assert_eq!(first, after);
        assert_eq!(chain.get(0), Some(&[0u8; 64]));
    }

    #[test]
    fn test_iter_mut() {
        let mut chain = Chain::new();
        for i in 0..4 {
            chain.push(i).unwrap();
        }
        chain.iter_mut().for_each(|node| *node *= 2);
        assert_eq!(chain.iter().copied().collect::<Vec<_>>(), vec![0, 2, 4, 6]);
        assert!(chain.try_get_mut(9).is_err());
    }
}
