//! Parameterized trie used for routes that contain `:param` segments. The
//! static table (§4.1) is consulted first by [`crate::route::index::RouteIndex`];
//! this trie only sees patterns that could not be registered as literal keys.

use std::collections::HashMap;
use std::sync::Arc;

use crate::route::pattern::{Pattern, Segment};

/// One node per path segment. `literal_children` is tried before
/// `param_child` at lookup time so a literal segment always wins over a
/// parameter at the same depth (§4.1 tie-break rule).
#[derive(Default)]
struct TrieNode<T> {
    literal_children: HashMap<String, TrieNode<T>>,
    param_child: Option<(String, Box<TrieNode<T>>)>,
    leaf: Option<Arc<T>>,
}

impl<T> TrieNode<T> {
    fn new() -> Self {
        Self { literal_children: HashMap::new(), param_child: None, leaf: None }
    }
}

/// A trie keyed on route patterns, storing a `T` (typically a route handle)
/// at each leaf. Supports literal-beats-parameter matching and returns
/// captured parameter values alongside the match.
pub struct ParamTrie<T> {
    root: TrieNode<T>,
}

impl<T> ParamTrie<T> {
    pub fn new() -> Self {
        Self { root: TrieNode::new() }
    }

    /// Insert `pattern` into the trie. Returns `false` without modifying the
    /// trie if a leaf already exists at the destination node (route
    /// conflict — the caller maps this to `DispatchError::RouteConflict`).
    pub fn insert(&mut self, pattern: &Pattern, value: T) -> bool {
        let mut node = &mut self.root;
        for segment in &pattern.segments {
            node = match segment {
                Segment::Literal(lit) => node.literal_children.entry(lit.clone()).or_insert_with(TrieNode::new),
                Segment::Param(name) => {
                    if node.param_child.is_none() {
                        node.param_child = Some((name.clone(), Box::new(TrieNode::new())));
                    }
                    &mut node.param_child.as_mut().unwrap().1
                }
            };
        }
        if node.leaf.is_some() {
            return false;
        }
        node.leaf = Some(Arc::new(value));
        true
    }

    /// Match `match_segments` against the trie, preferring literal matches
    /// over parameter captures at every depth (backtracking when a literal
    /// branch dead-ends but a parameter branch would have matched).
    ///
    /// `match_segments` and `original_segments` must be the same length and
    /// represent the same path: `match_segments` is what literal children are
    /// compared against (lowercased by the caller under case-insensitive
    /// routing), while `original_segments` is what gets bound into captured
    /// parameter values, so a case-insensitive match still reports the
    /// parameter text the client actually sent rather than a folded copy.
    pub fn lookup(
        &self,
        match_segments: &[&str],
        original_segments: &[&str],
    ) -> Option<(Arc<T>, HashMap<String, String>)> {
        let mut params = HashMap::new();
        Self::lookup_node(&self.root, match_segments, original_segments, &mut params).map(|leaf| (leaf, params))
    }

    /// Whether some path matches this trie, ignoring captured parameter
    /// values — used to check "does a route exist under this method" for
    /// `MethodNotAllowed` without caring what would be bound.
    pub fn contains(&self, match_segments: &[&str]) -> bool {
        self.lookup(match_segments, match_segments).is_some()
    }

    fn lookup_node(
        node: &TrieNode<T>,
        match_remaining: &[&str],
        original_remaining: &[&str],
        params: &mut HashMap<String, String>,
    ) -> Option<Arc<T>> {
        let (match_head, match_tail) = match match_remaining.split_first() {
            Some(pair) => pair,
            None => return node.leaf.clone(),
        };
        let (original_head, original_tail) = original_remaining.split_first()?;

        if let Some(child) = node.literal_children.get(*match_head) {
            let mut candidate_params = params.clone();
            if let Some(leaf) = Self::lookup_node(child, match_tail, original_tail, &mut candidate_params) {
                *params = candidate_params;
                return Some(leaf);
            }
        }
        if let Some((name, child)) = &node.param_child {
            let mut candidate_params = params.clone();
            candidate_params.insert(name.clone(), original_head.to_string());
            if let Some(leaf) = Self::lookup_node(child, match_tail, original_tail, &mut candidate_params) {
                *params = candidate_params;
                return Some(leaf);
            }
        }
        None
    }
}

impl<T> Default for ParamTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(raw: &str) -> Pattern {
        Pattern::parse(raw, true, false).unwrap()
    }

    #[test]
    fn matches_single_param_segment() {
        let mut trie = ParamTrie::new();
        trie.insert(&pat("/users/:id"), "get_user");
        let (leaf, params) = trie.lookup(&["users", "42"], &["users", "42"]).unwrap();
        assert_eq!(*leaf, "get_user");
        assert_eq!(params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn literal_wins_over_param_at_same_depth() {
        let mut trie = ParamTrie::new();
        trie.insert(&pat("/users/:id"), "get_user");
        trie.insert(&pat("/users/me"), "get_self");
        let (leaf, params) = trie.lookup(&["users", "me"], &["users", "me"]).unwrap();
        assert_eq!(*leaf, "get_self");
        assert!(params.is_empty());

        let (leaf, params) = trie.lookup(&["users", "42"], &["users", "42"]).unwrap();
        assert_eq!(*leaf, "get_user");
        assert_eq!(params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn duplicate_insert_at_same_leaf_is_rejected() {
        let mut trie = ParamTrie::new();
        assert!(trie.insert(&pat("/a/:id"), "first"));
        assert!(!trie.insert(&pat("/a/:other"), "second"));
    }

    #[test]
    fn no_match_returns_none() {
        let mut trie = ParamTrie::new();
        trie.insert(&pat("/a/:id"), "x");
        assert!(trie.lookup(&["b", "1"], &["b", "1"]).is_none());
    }

    #[test]
    fn backtracks_when_literal_branch_dead_ends() {
        let mut trie = ParamTrie::new();
        trie.insert(&pat("/a/:id/edit"), "edit_by_id");
        trie.insert(&pat("/a/static/view"), "static_view");
        // "a/static/edit" cannot match the literal "static" branch (which
        // only has a "view" child) so it must fall back to the param branch.
        let (leaf, params) = trie.lookup(&["a", "static", "edit"], &["a", "static", "edit"]).unwrap();
        assert_eq!(*leaf, "edit_by_id");
        assert_eq!(params.get("id"), Some(&"static".to_string()));
    }

    #[test]
    fn param_capture_uses_original_segments_not_match_segments() {
        let mut trie = ParamTrie::new();
        trie.insert(&pat("/users/:id"), "get_user");
        // Simulates case-insensitive routing: the caller matches against a
        // lowercased copy but wants the originally-cased text bound.
        let (leaf, params) = trie.lookup(&["users", "abc"], &["users", "ABC"]).unwrap();
        assert_eq!(*leaf, "get_user");
        assert_eq!(params.get("id"), Some(&"ABC".to_string()));
    }

    #[test]
    fn contains_checks_existence_without_capturing_params() {
        let mut trie = ParamTrie::new();
        trie.insert(&pat("/users/:id"), "get_user");
        assert!(trie.contains(&["users", "42"]));
        assert!(!trie.contains(&["orders", "42"]));
    }
}
