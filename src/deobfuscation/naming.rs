//! Collision-free identifier generation.
//!
//! A [`NameRegistry`] is owned by the stage context and threaded into every stage that renames
//! things, so uniqueness is scoped to one run and [`NameRegistry::reset`] starts a new one.

use std::collections::HashSet;

use rand::{rngs::StdRng, Rng, SeedableRng};

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Default generated name length.
pub const DEFAULT_NAME_LENGTH: usize = 8;

/// Default number of draws before falling back to a numeric suffix.
pub const DEFAULT_NAME_ATTEMPTS: usize = 1000;

/// Issues unique random identifiers.
///
/// # Examples
///
/// ```rust
/// use dotmend::deobfuscation::NameRegistry;
///
/// let mut names = NameRegistry::with_seed(7);
/// let first = names.generate();
/// assert_eq!(first.len(), 8);
/// assert!(names.contains(&first));
/// assert_ne!(names.generate(), first);
/// ```
#[derive(Debug, Clone)]
pub struct NameRegistry {
    used: HashSet<String>,
    rng: StdRng,
    length: usize,
    attempts: usize,
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NameRegistry {
    /// A registry seeded from operating-system entropy.
    #[must_use]
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// A registry with a fixed seed, for reproducible runs.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        NameRegistry {
            used: HashSet::new(),
            rng,
            length: DEFAULT_NAME_LENGTH,
            attempts: DEFAULT_NAME_ATTEMPTS,
        }
    }

    /// Sets the generated name length.
    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length.max(1);
        self
    }

    /// Sets the number of draws before the numeric-suffix fallback.
    #[must_use]
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Draws a name that was not issued or reserved before and records it.
    ///
    /// After the configured number of colliding draws the last draw gets a four-digit suffix,
    /// which is retried until unique.
    pub fn generate(&mut self) -> String {
        let mut name = String::new();
        for _ in 0..self.attempts {
            name = self.draw();
            if !self.used.contains(&name) {
                self.used.insert(name.clone());
                return name;
            }
        }

        loop {
            let suffix: u16 = self.rng.gen_range(1000..10000);
            let candidate = format!("{name}{suffix}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Marks `name` as taken. Returns `false` if it already was.
    pub fn reserve(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if name.is_empty() {
            return false;
        }
        self.used.insert(name)
    }

    /// Returns `true` if `name` was issued or reserved.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// Number of names issued or reserved.
    #[must_use]
    pub fn len(&self) -> usize {
        self.used.len()
    }

    /// Returns `true` if no name was issued or reserved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Forgets every issued and reserved name.
    pub fn reset(&mut self) {
        self.used.clear();
    }

    fn draw(&mut self) -> String {
        (0..self.length)
            .map(|_| {
                let index = self.rng.gen_range(0..ALPHABET.len());
                char::from(ALPHABET[index])
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_names_are_distinct() {
        let mut names = NameRegistry::with_seed(42);
        let issued: HashSet<String> = (0..500).map(|_| names.generate()).collect();
        assert_eq!(issued.len(), 500);
        assert_eq!(names.len(), 500);
        assert!(issued
            .iter()
            .all(|name| name.len() == 8 && name.bytes().all(|b| b.is_ascii_alphabetic())));
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let mut a = NameRegistry::with_seed(9);
        let mut b = NameRegistry::with_seed(9);
        assert_eq!(a.generate(), b.generate());
        assert_eq!(a.generate(), b.generate());
    }

    #[test]
    fn test_entropy_seeded_registries_stay_unique() {
        let mut names = NameRegistry::new();
        let issued: HashSet<String> = (0..200).map(|_| names.generate()).collect();
        assert_eq!(issued.len(), 200);

        let mut other = NameRegistry::with_seed(0);
        assert_eq!(other.generate().len(), DEFAULT_NAME_LENGTH);
    }

    #[test]
    fn test_reset_allows_reissue() {
        let mut names = NameRegistry::with_seed(5);
        let first = names.generate();

        let mut replay = NameRegistry::with_seed(5);
        replay.reserve(first.clone());
        assert_ne!(replay.generate(), first);

        names.reset();
        assert!(!names.contains(&first));
        assert!(names.is_empty());
        assert!(names.reserve(first.clone()));
        assert!(!names.reserve(first));
        assert!(!names.reserve(""));
    }

    #[test]
    fn test_exhausted_space_falls_back_to_suffix() {
        let mut names = NameRegistry::with_seed(3).with_length(1).with_attempts(10);
        for letter in ALPHABET {
            names.reserve(char::from(*letter).to_string());
        }

        let fallback = names.generate();
        assert_eq!(fallback.len(), 5);
        assert!(fallback[1..].parse::<u32>().is_ok_and(|n| (1000..10000).contains(&n)));
        assert!(names.contains(&fallback));
    }
}
