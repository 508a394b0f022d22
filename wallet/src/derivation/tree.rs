//! Forkable graph of derivation paths: which branches of the BIP32 space a
//! wallet (or an auxiliary signing context) can reach, and from which known
//! roots each leaf is derivable.

use std::collections::BTreeMap;

use crate::derivation::bip32::Bip32Node;
use crate::derivation::{is_hardened, path_has_hardened_step};
use crate::error::WalletError;
use crate::network::NetworkConfig;

/// One step in a resolved path, tagged with the branch that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathNode {
    pub branch_id: u16,
    pub depth: u16,
    pub value: u32,
}

/// A node reference: either the (virtual) seed node above the first step, or
/// a concrete node in some branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeRef {
    Seed,
    Node { branch_id: u16, depth: u16 },
}

#[derive(Clone, Debug)]
pub struct DerivationBranch {
    id: u16,
    // anchor node in the parent branch; None only for the origin branch
    parent: Option<(u16, u16)>,
    start_depth: u16,
    values: Vec<u32>,
}

impl DerivationBranch {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn append_node(&mut self, value: u32) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn last_depth(&self) -> Option<u16> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.start_depth + self.values.len() as u16 - 1)
        }
    }
}

/// A resolved leaf: its full path and, once roots are resolved, the base58
/// node for it (absent when only a public ancestor exists below a hardened
/// step).
#[derive(Clone, Debug)]
pub struct NodeRoot {
    pub path: Vec<PathNode>,
    pub b58_root: Option<String>,
}

pub struct DerivationTree {
    seed_fingerprint: u32,
    branches: Vec<DerivationBranch>,
    roots: BTreeMap<NodeRef, String>,
}

impl DerivationTree {
    pub fn new(seed_fingerprint: u32) -> Self {
        Self {
            seed_fingerprint,
            branches: vec![DerivationBranch {
                id: 0,
                parent: None,
                start_depth: 0,
                values: Vec::new(),
            }],
            roots: BTreeMap::new(),
        }
    }

    pub fn seed_fingerprint(&self) -> u32 {
        self.seed_fingerprint
    }

    pub fn seed_node(&self) -> NodeRef {
        NodeRef::Seed
    }

    pub fn branch_mut(&mut self, id: u16) -> Result<&mut DerivationBranch, WalletError> {
        self.branches
            .get_mut(id as usize)
            .ok_or(WalletError::UnknownBranch(id))
    }

    pub fn branch(&self, id: u16) -> Result<&DerivationBranch, WalletError> {
        self.branches
            .get(id as usize)
            .ok_or(WalletError::UnknownBranch(id))
    }

    /// Forks at the current end of `branch_id`.
    pub fn fork_from_branch(&mut self, branch_id: u16) -> Result<u16, WalletError> {
        let anchor_depth = self
            .full_path(branch_id)?
            .last()
            .map(|node| node.depth)
            .ok_or(WalletError::EmptyDerivationPath)?;
        self.fork_from_node(branch_id, anchor_depth)
    }

    /// Forks at an arbitrary node of `branch_id`; the new branch inherits the
    /// path up to and including the anchor.
    pub fn fork_from_node(
        &mut self,
        branch_id: u16,
        anchor_depth: u16,
    ) -> Result<u16, WalletError> {
        // the anchor has to exist on that branch's full path
        let owner = self
            .full_path(branch_id)?
            .iter()
            .find(|node| node.depth == anchor_depth)
            .map(|node| node.branch_id)
            .ok_or(WalletError::EmptyDerivationPath)?;

        let new_id = self.branches.len() as u16;
        self.branches.push(DerivationBranch {
            id: new_id,
            parent: Some((owner, anchor_depth)),
            start_depth: anchor_depth + 1,
            values: Vec::new(),
        });
        Ok(new_id)
    }

    /// Full path of a branch: inherited prefix plus its own nodes.
    fn full_path(&self, branch_id: u16) -> Result<Vec<PathNode>, WalletError> {
        let branch = self.branch(branch_id)?;
        let mut path = match branch.parent {
            Some((parent_id, anchor_depth)) => {
                let mut prefix = self.full_path(parent_id)?;
                prefix.retain(|node| node.depth <= anchor_depth);
                prefix
            }
            None => Vec::new(),
        };
        for (offset, value) in branch.values.iter().enumerate() {
            path.push(PathNode {
                branch_id,
                depth: branch.start_depth + offset as u16,
                value: *value,
            });
        }
        Ok(path)
    }

    /// Every leaf path, ordered by branch id. A branch is a leaf unless it is
    /// empty or a non-empty fork anchors at its terminal node.
    pub fn get_paths(&self) -> Vec<Vec<PathNode>> {
        let mut paths = Vec::new();
        for branch in &self.branches {
            if branch.is_empty() {
                continue;
            }
            let last_depth = branch.last_depth().expect("non-empty branch");
            let consumed = self.branches.iter().any(|other| {
                !other.is_empty() && other.parent == Some((branch.id, last_depth))
            });
            if consumed {
                continue;
            }
            if let Ok(path) = self.full_path(branch.id) {
                paths.push(path);
            }
        }
        paths
    }

    pub fn to_path32(path: &[PathNode]) -> Vec<u32> {
        path.iter().map(|node| node.value).collect()
    }

    /// Attaches a known base58 root at `node`.
    pub fn add_b58_root(&mut self, node: NodeRef, b58: String) {
        self.roots.insert(node, b58);
    }

    /// Resolves each leaf to a base58 node derived from the nearest known
    /// ancestor root. Leaves below a hardened step of a public-only ancestor
    /// stay uninitialized.
    pub fn resolve_node_roots(&self, config: &NetworkConfig) -> Vec<NodeRoot> {
        let mut resolved = Vec::new();
        for path in self.get_paths() {
            resolved.push(NodeRoot {
                b58_root: self.resolve_single_root(&path, config),
                path,
            });
        }
        resolved
    }

    fn resolve_single_root(&self, path: &[PathNode], config: &NetworkConfig) -> Option<String> {
        // deepest known ancestor first, then the seed node
        let mut anchor: Option<(usize, &String)> = None;
        for (position, node) in path.iter().enumerate().rev() {
            let node_ref = NodeRef::Node {
                branch_id: node.branch_id,
                depth: node.depth,
            };
            if let Some(b58) = self.roots.get(&node_ref) {
                anchor = Some((position + 1, b58));
                break;
            }
        }
        let (start, b58) = match anchor {
            Some((start, b58)) => (start, b58),
            None => (0, self.roots.get(&NodeRef::Seed)?),
        };

        let node = Bip32Node::from_base58(b58, config).ok()?;
        let remaining: Vec<u32> = path[start..].iter().map(|node| node.value).collect();
        if !node.has_private_key() && path_has_hardened_step(&remaining) {
            return None;
        }
        let leaf = node.derive_path(&remaining).ok()?;
        Some(leaf.to_base58(config))
    }

    /// Builds the minimal tree covering a set of absolute paths sharing one
    /// seed: common prefixes are merged, each divergence becomes a fork.
    pub fn from_derivation_paths(
        seed_fingerprint: u32,
        paths: &[Vec<u32>],
    ) -> Result<Self, WalletError> {
        let mut tree = Self::new(seed_fingerprint);
        let mut first = true;
        for path in paths {
            if path.is_empty() {
                return Err(WalletError::EmptyDerivationPath);
            }
            if first {
                let branch = tree.branch_mut(0)?;
                for value in path {
                    branch.append_node(*value);
                }
                first = false;
                continue;
            }
            tree.merge_path(path)?;
        }
        Ok(tree)
    }

    fn merge_path(&mut self, path: &[u32]) -> Result<(), WalletError> {
        // find the existing leaf path with the longest shared prefix
        let mut best: Option<(Vec<PathNode>, usize)> = None;
        for candidate in self.get_paths() {
            let shared = candidate
                .iter()
                .zip(path.iter())
                .take_while(|(node, value)| node.value == **value)
                .count();
            if best.as_ref().map(|(_, len)| shared > *len).unwrap_or(true) {
                best = Some((candidate, shared));
            }
        }
        let (existing, shared) = best.ok_or(WalletError::EmptyDerivationPath)?;
        if shared == path.len() && shared == existing.len() {
            return Ok(()); // already present
        }
        if shared == 0 {
            return Err(WalletError::FingerprintMismatch);
        }

        let anchor = existing[shared - 1];
        let fork_id = self.fork_from_node(anchor.branch_id, anchor.depth)?;
        let branch = self.branch_mut(fork_id)?;
        for value in &path[shared..] {
            branch.append_node(*value);
        }
        Ok(())
    }
}

/// Renders a path in the conventional `m/44'/0'/0'/0/5` notation.
pub fn path_to_string(path: &[u32]) -> String {
    let mut out = String::from("m");
    for step in path {
        if is_hardened(*step) {
            out.push_str(&format!("/{}'", step & !super::HARDENED));
        } else {
            out.push_str(&format!("/{}", step));
        }
    }
    out
}
