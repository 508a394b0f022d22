pub mod bip32;
pub mod scheme;
pub mod tree;

pub use bip32::Bip32Node;
pub use scheme::DerivationScheme;
pub use tree::{DerivationBranch, DerivationTree, NodeRef, NodeRoot, PathNode};

/// Hardened-derivation marker, per the BIP32 convention.
pub const HARDENED: u32 = 0x8000_0000;

pub fn is_hardened(step: u32) -> bool {
    step & HARDENED != 0
}

/// True if any step of `path` needs private material to derive through.
pub fn path_has_hardened_step(path: &[u32]) -> bool {
    path.iter().copied().any(is_hardened)
}
