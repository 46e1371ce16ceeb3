//! Stability tracking for captured terminal content

use sha2::{Digest, Sha256};

/// Per-agent record of how long captured content has stayed unchanged
#[derive(Debug, Clone, Default)]
pub struct ContentTracker {
    last_hash: Option<[u8; 32]>,
    stable_count: u32,
}

impl ContentTracker {
    /// Feed a new capture, returning the number of consecutive polls the
    /// content has been unchanged (0 when it just changed)
    pub fn observe(&mut self, content: &str) -> u32 {
        let hash: [u8; 32] = Sha256::digest(content.as_bytes()).into();
        if self.last_hash == Some(hash) {
            self.stable_count = self.stable_count.saturating_add(1);
        } else {
            self.last_hash = Some(hash);
            self.stable_count = 0;
        }
        self.stable_count
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }
}

/// The last `limit` non-blank lines of `content`, top to bottom
pub fn bottom_lines(content: &str, limit: usize) -> Vec<&str> {
    let mut lines: Vec<&str> = content
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(limit)
        .collect();
    lines.reverse();
    lines
}
