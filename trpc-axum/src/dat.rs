//! Double-array trie over field paths.
//!
//! The router uses it to ask "is this query parameter's field path already
//! bound by the URL template or the request body?". Each field path is a
//! sequence of field names; names are mapped to dense integer codes and the
//! trie answers prefix membership in time linear in the path length.
//!
//! Layout follows the classic double array: for a state `s` and input code
//! `c`, the next state is `t = base[s] + c` and the transition is valid when
//! `check[t] == base[s]`. Code `0` is the end-of-path transition; its target
//! stores a negative `base` marking a leaf.

use std::collections::HashMap;

/// Initial array allocation.
const INITIAL_ALLOC: usize = 1024;

/// Minimum growth ratio when the arrays must expand during placement.
const MIN_GROWTH: f64 = 1.05;

/// Occupancy above which the placement search start moves forward.
const DENSE_RATIO: f64 = 0.95;

/// Errors produced while building a trie.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DatError {
    /// Sibling codes came out of order, meaning the input was not sorted.
    #[error("field paths are not sorted at index {0}")]
    Unsorted(usize),
}

/// Immutable double-array trie built from a set of field paths.
#[derive(Clone, Debug, Default)]
pub struct DoubleArrayTrie {
    base: Vec<i64>,
    check: Vec<usize>,
    dict: HashMap<String, usize>,
    paths: usize,
}

#[derive(Debug)]
struct Node {
    code: usize,
    depth: usize,
    left: usize,
    right: usize,
}

struct Builder<'a> {
    paths: &'a [Vec<String>],
    dict: &'a HashMap<String, usize>,
    base: Vec<i64>,
    check: Vec<usize>,
    used: Vec<bool>,
    size: usize,
    next_check_pos: usize,
    progress: usize,
}

impl Builder<'_> {
    fn resize(&mut self, len: usize) {
        self.base.resize(len, 0);
        self.check.resize(len, 0);
        self.used.resize(len, false);
    }

    fn alloc(&self) -> usize {
        self.base.len()
    }

    /// Split `parent`'s range into one child per distinct next code.
    fn fetch(&self, parent: &Node) -> Result<Vec<Node>, DatError> {
        let mut children: Vec<Node> = Vec::new();
        let mut prev = 0;
        for i in parent.left..parent.right {
            let path = &self.paths[i];
            if path.len() < parent.depth {
                continue;
            }
            let code = match path.get(parent.depth) {
                Some(name) => self.dict[name],
                None => 0,
            };
            if prev > code {
                return Err(DatError::Unsorted(i));
            }
            if code != prev || children.is_empty() {
                if let Some(last) = children.last_mut() {
                    last.right = i;
                }
                children.push(Node {
                    code,
                    depth: parent.depth + 1,
                    left: i,
                    right: 0,
                });
            }
            prev = code;
        }
        if let Some(last) = children.last_mut() {
            last.right = parent.right;
        }
        Ok(children)
    }

    /// Place `children` and recursively their descendants; returns their `begin`.
    fn insert(&mut self, children: &[Node]) -> Result<usize, DatError> {
        let (Some(first_child), Some(last_child)) = (children.first(), children.last()) else {
            return Ok(0);
        };

        let mut begin;
        let mut non_zero = 0usize;
        let mut first = true;
        let mut pos = (first_child.code + 1).max(self.next_check_pos) - 1;
        loop {
            pos += 1;
            if self.alloc() <= pos {
                self.resize(pos + 1);
            }
            if self.check[pos] != 0 {
                non_zero += 1;
                continue;
            } else if first {
                self.next_check_pos = pos;
                first = false;
            }

            begin = pos - first_child.code;
            let last = begin + last_child.code;
            if self.alloc() <= last {
                let ratio = MIN_GROWTH.max(self.paths.len() as f64 / (self.progress + 1) as f64);
                let grown = (self.alloc() as f64 * ratio) as usize;
                self.resize(grown.max(last + 1));
            }
            if self.used[begin] {
                continue;
            }
            if children[1..]
                .iter()
                .all(|child| self.check[begin + child.code] == 0)
            {
                break;
            }
        }

        if non_zero as f64 / (pos - self.next_check_pos + 1) as f64 >= DENSE_RATIO {
            self.next_check_pos = pos;
        }
        self.used[begin] = true;
        self.size = self.size.max(begin + last_child.code + 1);
        for child in children {
            self.check[begin + child.code] = begin;
        }

        for child in children {
            let grandchildren = self.fetch(child)?;
            let slot = begin + child.code;
            if grandchildren.is_empty() {
                self.base[slot] = -(child.left as i64) - 1;
                self.progress += 1;
            } else {
                let h = self.insert(&grandchildren)?;
                self.base[slot] = h as i64;
            }
        }
        Ok(begin)
    }
}

impl DoubleArrayTrie {
    /// Build a trie from field paths.
    ///
    /// The input is sorted and deduplicated; empty paths are ignored.
    pub fn build<S: AsRef<str>>(paths: &[Vec<S>]) -> Result<Self, DatError> {
        let mut paths: Vec<Vec<String>> = paths
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.iter().map(|s| s.as_ref().to_owned()).collect())
            .collect();
        paths.sort();
        paths.dedup();
        if paths.is_empty() {
            return Ok(Self::default());
        }

        let mut names: Vec<&String> = paths.iter().flatten().collect();
        names.sort();
        names.dedup();
        let dict: HashMap<String, usize> = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i + 1))
            .collect();

        let mut builder = Builder {
            paths: &paths,
            dict: &dict,
            base: Vec::new(),
            check: Vec::new(),
            used: Vec::new(),
            size: 0,
            next_check_pos: 0,
            progress: 0,
        };
        builder.resize(INITIAL_ALLOC);

        let root = Node {
            code: 0,
            depth: 0,
            left: 0,
            right: paths.len(),
        };
        let children = builder.fetch(&root)?;
        let begin = builder.insert(&children)?;
        builder.base[0] = begin as i64;

        let size = builder.size.max(1);
        let mut base = builder.base;
        let mut check = builder.check;
        base.truncate(size);
        check.truncate(size);

        Ok(Self {
            base,
            check,
            paths: paths.len(),
            dict,
        })
    }

    /// Number of distinct field paths in the trie.
    pub fn len(&self) -> usize {
        self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths == 0
    }

    /// Returns true if any registered path is a prefix of `path` (or equal to it).
    pub fn common_prefix_search<S: AsRef<str>>(&self, path: &[S]) -> bool {
        let Some(&root) = self.base.first() else {
            return false;
        };
        let mut b = root;
        for name in path {
            if self.is_leaf_transition(b) {
                return true;
            }
            let Some(&code) = self.dict.get(name.as_ref()) else {
                return false;
            };
            let p = b + code as i64;
            match self.transition(b, p) {
                Some(next) => b = next,
                None => return false,
            }
        }
        self.is_leaf_transition(b)
    }

    /// Whether state base `b` has an end-of-path transition.
    fn is_leaf_transition(&self, b: i64) -> bool {
        self.transition(b, b).is_some_and(|n| n < 0)
    }

    fn transition(&self, b: i64, p: i64) -> Option<i64> {
        let p = usize::try_from(p).ok()?;
        let b = usize::try_from(b).ok()?;
        (self.check.get(p) == Some(&b)).then(|| self.base[p])
    }
}
