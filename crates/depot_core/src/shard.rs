//! Shard ownership: which shard address serves a repository.

use crate::repo_dir::RepoName;

/// Maps a repository to the shard address that owns it.
pub trait AddressResolver: Send + Sync {
    /// Returns the owning address, or `None` if `addrs` is empty.
    fn addr_for_repo(&self, repo: &RepoName, addrs: &[String]) -> Option<String>;
}

/// Hashes the undeleted repository name and picks an address by modulo.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashResolver;

impl AddressResolver for HashResolver {
    fn addr_for_repo(&self, repo: &RepoName, addrs: &[String]) -> Option<String> {
        if addrs.is_empty() {
            return None;
        }
        let name = repo.undeleted();
        let digest = blake3::hash(name.as_str().to_lowercase().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        let idx = (u64::from_be_bytes(prefix) % addrs.len() as u64) as usize;
        Some(addrs[idx].clone())
    }
}

/// True if `addr` refers to the host `shard_id`: equal, or `shard_id`
/// followed by a domain or port suffix.
pub fn hostname_matches(shard_id: &str, addr: &str) -> bool {
    match addr.strip_prefix(shard_id) {
        Some(rest) => rest.is_empty() || rest.starts_with('.') || rest.starts_with(':'),
        None => false,
    }
}
