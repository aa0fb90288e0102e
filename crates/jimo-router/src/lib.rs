//! jimo-router: per-method segment trie
//!
//! Route tree used by jimo-core for registration and dispatch. The tree is
//! generic over the value stored at terminal nodes.
//!
//! ## Path Syntax
//! - Segments are separated by `/`; empty segments are ignored
//! - `{name}` - Named parameter (captures exactly one segment)
//! - Everything else is a literal, matched verbatim and case-sensitively
//!
//! ## Matching
//! Lookup is greedy and never backtracks. At each level an exact static
//! child wins; only when there is none does the parameter edge capture the
//! segment. Once a static child is taken, a dead end deeper down is a miss
//! even if the parameter edge at the shallower level would have led to a
//! route. Lookup is therefore O(depth).
//!
//! ## Example
//! ```
//! use jimo_router::RouteTree;
//!
//! let mut tree = RouteTree::new();
//! tree.insert("GET", "/users", 0).unwrap();
//! tree.insert("GET", "/users/{id}", 1).unwrap();
//!
//! let m = tree.find("GET", "/users/123").unwrap();
//! assert_eq!(*m.value, 1);
//! assert_eq!(m.params, vec![("id".to_string(), "123".to_string())]);
//! ```

use std::collections::HashMap;
use thiserror::Error;

mod path;

pub use path::{clean_path, join_path, param_name, segments};

/// Route match result
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a, T> {
    /// Value stored at the matched terminal node
    pub value: &'a T,
    /// Captured path parameters as (name, value) pairs, in path order
    pub params: Vec<(String, String)>,
}

impl<T> Match<'_, T> {
    /// Get params as HashMap for convenient access
    pub fn params_map(&self) -> HashMap<String, String> {
        self.params.iter().cloned().collect()
    }
}

/// Registration failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InsertError {
    /// A second, differently named parameter at a trie position that
    /// already has a parameter edge.
    #[error("conflicting parameter name in `{pattern}`: `{{{conflicting}}}` collides with existing `{{{existing}}}`")]
    ParamConflict {
        pattern: String,
        existing: String,
        conflicting: String,
    },
}

/// Trie node for path segment matching
#[derive(Debug)]
struct Node<T> {
    /// Static children (key = literal segment)
    children: HashMap<String, Node<T>>,
    /// Parameter child ({id})
    param_child: Option<Box<ParamNode<T>>>,
    /// Value if this is a terminal node
    value: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            param_child: None,
            value: None,
        }
    }
}

#[derive(Debug)]
struct ParamNode<T> {
    name: String,
    node: Node<T>,
}

/// Per-method route tree
#[derive(Debug)]
pub struct RouteTree<T> {
    /// Method -> Trie root
    trees: HashMap<String, Node<T>>,
}

impl<T> Default for RouteTree<T> {
    fn default() -> Self {
        Self {
            trees: HashMap::new(),
        }
    }
}

impl<T> RouteTree<T> {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route, returning the value it replaced.
    ///
    /// Fails without modifying the tree when a `{name}` segment disagrees
    /// with the parameter edge already established at that level.
    ///
    /// ```
    /// use jimo_router::RouteTree;
    ///
    /// let mut tree = RouteTree::new();
    /// tree.insert("GET", "/users/{id}", "show").unwrap();
    /// assert!(tree.insert("GET", "/users/{userId}/posts", "posts").is_err());
    /// ```
    pub fn insert(&mut self, method: &str, pattern: &str, value: T) -> Result<Option<T>, InsertError> {
        let segments: Vec<&str> = segments(pattern).collect();

        // A conflict can only sit on a path of pre-existing nodes, so check
        // first and never leave a half-built branch behind.
        if let Some(tree) = self.trees.get(&method.to_uppercase()) {
            Self::check_conflicts(tree, &segments, pattern)?;
        }

        let tree = self.trees.entry(method.to_uppercase()).or_default();
        Ok(Self::insert_node(tree, &segments, value))
    }

    fn check_conflicts(node: &Node<T>, segments: &[&str], pattern: &str) -> Result<(), InsertError> {
        let Some((segment, rest)) = segments.split_first() else {
            return Ok(());
        };

        match param_name(segment) {
            Some(name) => match node.param_child {
                Some(ref param) if param.name != name => Err(InsertError::ParamConflict {
                    pattern: pattern.to_string(),
                    existing: param.name.clone(),
                    conflicting: name.to_string(),
                }),
                Some(ref param) => Self::check_conflicts(&param.node, rest, pattern),
                None => Ok(()),
            },
            None => match node.children.get(*segment) {
                Some(child) => Self::check_conflicts(child, rest, pattern),
                None => Ok(()),
            },
        }
    }

    fn insert_node(node: &mut Node<T>, segments: &[&str], value: T) -> Option<T> {
        let Some((segment, rest)) = segments.split_first() else {
            return node.value.replace(value);
        };

        if let Some(name) = param_name(segment) {
            let param = node.param_child.get_or_insert_with(|| {
                Box::new(ParamNode {
                    name: name.to_string(),
                    node: Node::default(),
                })
            });
            Self::insert_node(&mut param.node, rest, value)
        } else {
            let child = node.children.entry(segment.to_string()).or_default();
            Self::insert_node(child, rest, value)
        }
    }

    /// Find the route for a request path
    ///
    /// Returns `None` when the method has no tree, a segment has neither a
    /// static child nor a parameter edge, or the walk ends on a node that
    /// carries no value.
    ///
    /// ```
    /// use jimo_router::RouteTree;
    ///
    /// let mut tree = RouteTree::new();
    /// tree.insert("GET", "/users/{id}", 0).unwrap();
    ///
    /// assert!(tree.find("GET", "/users/42").is_some());
    /// assert!(tree.find("GET", "/users").is_none());
    /// ```
    pub fn find(&self, method: &str, path: &str) -> Option<Match<'_, T>> {
        let mut node = self.trees.get(&method.to_uppercase())?;
        let mut params = Vec::new();

        for segment in segments(path) {
            // Priority 1: exact static match
            if let Some(child) = node.children.get(segment) {
                node = child;
                continue;
            }

            // Priority 2: parameter capture, no backtracking past this point
            let param = node.param_child.as_ref()?;
            params.push((param.name.clone(), segment.to_string()));
            node = &param.node;
        }

        node.value.as_ref().map(|value| Match { value, params })
    }

    /// Check if a method has any routes registered
    pub fn has_method(&self, method: &str) -> bool {
        self.trees.contains_key(&method.to_uppercase())
    }

    /// Get all registered methods
    pub fn methods(&self) -> Vec<String> {
        self.trees.keys().cloned().collect()
    }
}
