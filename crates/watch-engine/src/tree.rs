//! Forest of recursive watches.
//!
//! Nodes live in an arena addressed by [`NodeId`]; parents are stored as ids and children as an
//! ordered id set, so tearing a subtree down is a plain traversal.

use std::{
	collections::{BTreeSet, HashMap},
	path::{Path, PathBuf},
};

use crate::{error::ContractViolation, path::fold};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

#[derive(Debug)]
struct Node {
	path: PathBuf,
	parent: Option<NodeId>,
	children: BTreeSet<NodeId>,
}

#[derive(Debug, Default)]
pub struct RecursiveWatchTree {
	nodes: HashMap<NodeId, Node>,
	by_path: HashMap<PathBuf, NodeId>,
	next_id: u64,
	case_insensitive: bool,
}

impl RecursiveWatchTree {
	#[must_use]
	pub fn new(case_insensitive: bool) -> Self {
		Self {
			case_insensitive,
			..Default::default()
		}
	}

	/// Creates a parentless node for `path`, or returns the existing one.
	pub fn insert(&mut self, path: PathBuf) -> NodeId {
		let key = fold(&path, self.case_insensitive);
		if let Some(&id) = self.by_path.get(&key) {
			return id;
		}

		let id = NodeId(self.next_id);
		self.next_id += 1;

		self.by_path.insert(key, id);
		self.nodes.insert(
			id,
			Node {
				path,
				parent: None,
				children: BTreeSet::new(),
			},
		);

		id
	}

	/// Links `child` under `parent`. Linking an already linked child again is a no-op.
	pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ContractViolation> {
		let Some(child_node) = self.nodes.get_mut(&child) else {
			return Ok(());
		};

		match child_node.parent {
			Some(existing) if existing == parent => return Ok(()),
			Some(_) => return Err(ContractViolation::ForeignParent(child_node.path.clone().into())),
			None => child_node.parent = Some(parent),
		}

		if let Some(parent_node) = self.nodes.get_mut(&parent) {
			parent_node.children.insert(child);
		}

		Ok(())
	}

	#[must_use]
	pub fn node(&self, path: &Path) -> Option<NodeId> {
		self.by_path.get(&fold(path, self.case_insensitive)).copied()
	}

	#[must_use]
	pub fn parent(&self, id: NodeId) -> Option<NodeId> {
		self.nodes.get(&id).and_then(|node| node.parent)
	}

	pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
		self.nodes
			.get(&id)
			.into_iter()
			.flat_map(|node| node.children.iter().copied())
	}

	/// Moves the subtree at `id` under `new_parent`, rewriting every path below `from` to sit
	/// below `to`. Returns the `(old, new)` path of each moved node, `id` first.
	pub fn relocate(
		&mut self,
		id: NodeId,
		new_parent: NodeId,
		from: &Path,
		to: &Path,
	) -> Vec<(PathBuf, PathBuf)> {
		let ids = self.breadth_first(id);
		if ids.contains(&new_parent)
			|| !self.nodes.contains_key(&id)
			|| !self.nodes.contains_key(&new_parent)
		{
			return vec![];
		}

		if let Some(old_parent) = self.parent(id).and_then(|parent| self.nodes.get_mut(&parent)) {
			old_parent.children.remove(&id);
		}
		if let Some(parent) = self.nodes.get_mut(&new_parent) {
			parent.children.insert(id);
		}

		let mut moved = Vec::with_capacity(ids.len());
		for node_id in ids {
			let Some(node) = self.nodes.get_mut(&node_id) else {
				continue;
			};
			if node_id == id {
				node.parent = Some(new_parent);
			}

			let Ok(rest) = node.path.strip_prefix(from) else {
				continue;
			};
			let path = if rest.as_os_str().is_empty() {
				to.to_path_buf()
			} else {
				to.join(rest)
			};
			let old = std::mem::replace(&mut node.path, path.clone());

			self.by_path.remove(&fold(&old, self.case_insensitive));
			self.by_path.insert(fold(&path, self.case_insensitive), node_id);
			moved.push((old, path));
		}

		moved
	}

	/// `id` followed by every descendant, ancestors before their children.
	fn breadth_first(&self, id: NodeId) -> Vec<NodeId> {
		let mut out = vec![id];
		let mut next = 0;
		while let Some(&current) = out.get(next) {
			out.extend(self.children(current));
			next += 1;
		}
		out
	}

	/// Removes `id` and all of its descendants (children first), then unlinks it from its parent.
	/// Returns the removed paths in teardown order.
	pub fn remove(&mut self, id: NodeId) -> Vec<PathBuf> {
		let mut removed = Vec::new();
		self.remove_post_order(id, &mut removed);

		removed
	}

	fn remove_post_order(&mut self, id: NodeId, removed: &mut Vec<PathBuf>) {
		let children = match self.nodes.get(&id) {
			Some(node) => node.children.iter().copied().collect::<Vec<_>>(),
			None => return,
		};

		for child in children {
			self.remove_post_order(child, removed);
		}

		let Some(node) = self.nodes.remove(&id) else {
			return;
		};

		if let Some(parent) = node.parent.and_then(|parent| self.nodes.get_mut(&parent)) {
			parent.children.remove(&id);
		}
		self.by_path.remove(&fold(&node.path, self.case_insensitive));
		removed.push(node.path);
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}
}
