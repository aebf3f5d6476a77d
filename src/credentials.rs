use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

// Ordered set of upstream API keys. The front is tried next.
#[derive(Debug, Default, Clone)]
pub struct CredentialPool {
    keys: VecDeque<String>,
    cooldowns: HashMap<String, u64>, // key -> epoch ms it may be used again
}

impl CredentialPool {
    pub fn new<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut pool = VecDeque::new();
        for key in keys {
            if !pool.contains(&key) {
                pool.push_back(key);
            }
        }
        Self {
            keys: pool,
            cooldowns: HashMap::new(),
        }
    }

    // Parse comma-separated keys "sk-a, sk-b"
    pub fn parse(raw: &str) -> Self {
        Self::new(
            raw.split(',')
                .map(|s| s.trim()) // remove spaces
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn front(&self) -> Option<&str> {
        self.keys.front().map(String::as_str)
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.iter().cloned().collect()
    }

    /// Moves `key` to the front. No-op if it is already there or unknown.
    pub fn promote(&mut self, key: &str) {
        if let Some(idx) = self.position(key) {
            if idx > 0 {
                if let Some(k) = self.keys.remove(idx) {
                    self.keys.push_front(k);
                }
            }
        }
    }

    /// Moves `key` to the back, keeping the relative order of everything else.
    pub fn demote(&mut self, key: &str) {
        if let Some(idx) = self.position(key) {
            if let Some(k) = self.keys.remove(idx) {
                self.keys.push_back(k);
            }
        }
    }

    pub fn cool_down(&mut self, key: &str, until_ms: u64) {
        if self.position(key).is_some() {
            self.cooldowns.insert(key.to_string(), until_ms);
        }
    }

    /// Whether `key` is suspended at `now_ms`. Expired entries are dropped here.
    pub fn is_cooling(&mut self, key: &str, now_ms: u64) -> bool {
        match self.cooldowns.get(key) {
            Some(&until) if now_ms < until => true,
            Some(_) => {
                self.cooldowns.remove(key);
                false
            }
            None => false,
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }
}

/// Short stable identifier for a credential, safe to log.
pub fn fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{:x}", digest)[..12].to_string()
}
