//! Walking the bind graph: down from the root by name, and up from a
//! resource by breadth-first search.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::debug;

use bindgraph_store::BindStore;
use bindgraph_types::{Bind, BindId, ResourceId};

use crate::error::{PathError, PathResult};
use crate::names::segments;

/// One segment of a resolved path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathStep {
    /// The segment text.
    pub name: String,
    /// Collection the segment was looked up in; [`ResourceId::NONE`] once an
    /// earlier segment failed.
    pub collection: ResourceId,
    /// The bind found, if any.
    pub bind: Option<Bind>,
}

impl PathStep {
    /// The resource this segment names, or [`ResourceId::NONE`].
    pub fn resource(&self) -> ResourceId {
        self.bind
            .as_ref()
            .map_or(ResourceId::NONE, |bind| bind.resource)
    }
}

/// Outcome of a shortest-path search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShortestPath {
    /// `from` and `to` are the same resource; the path is empty.
    SamePlace,
    /// The names joining `from` to `to`, as `"/a/b"`.
    Found(String),
    /// No chain of binds leads from `from` down to `to`.
    Unreachable,
}

impl ShortestPath {
    /// The path text; `""` for [`SamePlace`](Self::SamePlace), `None` if
    /// unreachable.
    pub fn as_path(&self) -> Option<&str> {
        match self {
            Self::SamePlace => Some(""),
            Self::Found(path) => Some(path),
            Self::Unreachable => None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        !matches!(self, Self::Unreachable)
    }
}

impl fmt::Display for ShortestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SamePlace => f.write_str("/"),
            Self::Found(path) => f.write_str(path),
            Self::Unreachable => f.write_str("(no path)"),
        }
    }
}

/// Read-only view of a [`BindStore`] that turns paths into binds and
/// resources back into paths.
///
/// The resolver holds no state of its own. Results are only valid until the
/// next mutation of the binds they traversed.
pub struct PathResolver<'s, S: ?Sized> {
    store: &'s S,
    root: ResourceId,
    max_rounds: Option<usize>,
}

impl<'s, S: BindStore + ?Sized> PathResolver<'s, S> {
    /// A resolver rooted at [`ResourceId::ROOT`] with unbounded searches.
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            root: ResourceId::ROOT,
            max_rounds: None,
        }
    }

    /// Resolve absolute paths against `root` instead.
    pub fn with_root(mut self, root: ResourceId) -> Self {
        self.root = root;
        self
    }

    /// Give up on shortest-path searches after `max_rounds` breadth-first
    /// rounds.
    pub fn with_max_rounds(mut self, max_rounds: Option<usize>) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn root(&self) -> ResourceId {
        self.root
    }

    /// Resolve every segment of `path`, starting at the root.
    ///
    /// Each segment is looked up in the collection the previous one resolved
    /// to. A missing bind does not stop the walk: that segment and every later
    /// one come back with no bind, so callers must check
    /// [`PathStep::resource`] for [`ResourceId::NONE`].
    pub fn resolve_path(&self, path: &str) -> PathResult<Vec<PathStep>> {
        let mut steps = Vec::new();
        let mut current = self.root;
        for name in segments(path) {
            let bind = if current.is_none() {
                None
            } else {
                self.store.lookup_by_name(current, name)?
            };
            let next = bind.as_ref().map_or(ResourceId::NONE, |b| b.resource);
            steps.push(PathStep {
                name: name.to_string(),
                collection: current,
                bind,
            });
            current = next;
        }
        Ok(steps)
    }

    /// The resource `path` names: the root for `"/"`, [`ResourceId::NONE`]
    /// if any segment is unresolved.
    pub fn resolve_resource(&self, path: &str) -> PathResult<ResourceId> {
        Ok(self
            .resolve_path(path)?
            .last()
            .map_or(self.root, PathStep::resource))
    }

    /// The bind of the last segment of `path`, or `None` if the path is the
    /// root or any segment is unresolved.
    pub fn lookup_uri(&self, path: &str) -> PathResult<Option<Bind>> {
        Ok(self
            .resolve_path(path)?
            .pop()
            .and_then(|step| step.bind))
    }

    /// The prefix of `path` that ends at `bind`.
    ///
    /// Walks `path` from the root like [`resolve_path`](Self::resolve_path),
    /// appending `"/segment"` for each step, and stops after the step whose
    /// bind id is `bind`. If `bind` is never met the whole normalized path is
    /// returned.
    pub fn find_bind_prefix(&self, bind: BindId, path: &str) -> PathResult<String> {
        let mut prefix = String::new();
        let mut current = self.root;
        for name in segments(path) {
            prefix.push('/');
            prefix.push_str(name);

            let found = if current.is_none() {
                None
            } else {
                self.store.lookup_by_name(current, name)?
            };
            match found {
                Some(found) if found.id == bind => break,
                Some(found) => current = found.resource,
                None => current = ResourceId::NONE,
            }
        }
        Ok(prefix)
    }

    /// Shortest chain of names leading from the ancestor `from` down to `to`.
    pub fn shortest_path(&self, from: ResourceId, to: ResourceId) -> PathResult<ShortestPath> {
        self.shortest_path_excluding(from, to, &BTreeSet::new())
    }

    /// Like [`shortest_path`](Self::shortest_path), pretending the binds in
    /// `excluded` do not exist.
    ///
    /// Breadth-first search upward from `to`, one [`BindStore::parents_of`]
    /// query per round. Each resource keeps the first suffix it was reached
    /// with and is never expanded twice; within a round, edges are taken in
    /// the order the store returns them.
    pub fn shortest_path_excluding(
        &self,
        from: ResourceId,
        to: ResourceId,
        excluded: &BTreeSet<BindId>,
    ) -> PathResult<ShortestPath> {
        if from == to {
            return Ok(ShortestPath::SamePlace);
        }

        // Suffix from each discovered forefather down to `to`.
        let mut visited: HashMap<ResourceId, String> = HashMap::from([(to, String::new())]);
        let mut frontier = vec![to];
        let mut rounds = 0usize;

        while !frontier.is_empty() {
            if self.max_rounds.is_some_and(|max| rounds >= max) {
                debug!(%from, %to, rounds, "shortest-path round limit reached");
                return Err(PathError::SearchLimitExceeded { rounds });
            }
            rounds += 1;

            let edges = self.store.parents_of(&frontier, excluded)?;
            debug!(%from, %to, round = rounds, frontier = frontier.len(), edges = edges.len(), "shortest-path round");

            let mut next = Vec::new();
            for edge in edges {
                if visited.contains_key(&edge.parent) {
                    continue;
                }
                let below = visited.get(&edge.child).map_or("", String::as_str);
                let suffix = format!("/{}{}", edge.name, below);
                if edge.parent == from {
                    return Ok(ShortestPath::Found(suffix));
                }
                visited.insert(edge.parent, suffix);
                next.push(edge.parent);
            }
            frontier = next;
        }

        Ok(ShortestPath::Unreachable)
    }

    /// Whether any chain of binds outside `excluded` leads from `from` to
    /// `to`.
    pub fn is_reachable(
        &self,
        from: ResourceId,
        to: ResourceId,
        excluded: &BTreeSet<BindId>,
    ) -> PathResult<bool> {
        Ok(self
            .shortest_path_excluding(from, to, excluded)?
            .is_reachable())
    }
}
