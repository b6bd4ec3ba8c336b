use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use statrs::distribution::{DiscreteCDF, Poisson};

use super::alphabet::{code_space, encode, encode_fixed, ALPHABET};
use crate::config::CodeConfig;
use crate::error::{Error, Result};

/// Longest code whose space still fits in a `u64`.
const MAX_RECOMMENDED_LENGTH: usize = 11;

/// Fresh existence check used by the generator. Implementations must not cache.
#[async_trait]
pub trait CodeLookup: Send + Sync {
    async fn is_taken(&self, code: &str) -> anyhow::Result<bool>;
}

/// Strategy that produced a code, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    TimePerturbed,
    ContentHash,
    Random,
    ExtendedRandom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub code: String,
    pub tier: Tier,
}

#[derive(Debug, Clone)]
pub struct CodeGenerator {
    min_length: usize,
    random_attempts: usize,
    extended_padding: usize,
}

impl CodeGenerator {
    pub fn new(min_length: usize, random_attempts: usize, extended_padding: usize) -> Self {
        Self {
            min_length,
            random_attempts,
            extended_padding,
        }
    }

    pub fn from_config(config: &CodeConfig) -> Self {
        Self::new(
            config.min_length,
            config.random_attempts,
            config.extended_padding,
        )
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Tier-1 code for `seed`. Same seed, same code.
    pub fn primary(&self, seed: u64) -> String {
        encode(seed, self.min_length)
    }

    pub async fn generate<L>(&self, seed: u64, content: &str, lookup: &L) -> Result<GeneratedCode>
    where
        L: CodeLookup + ?Sized,
    {
        self.generate_at(seed, content, lookup, Utc::now()).await
    }

    /// Walks the tiers until a candidate is free.
    ///
    /// Only the final extended random code skips the existence check, so this
    /// fails only when the lookup itself fails.
    pub async fn generate_at<L>(
        &self,
        seed: u64,
        content: &str,
        lookup: &L,
        now: DateTime<Utc>,
    ) -> Result<GeneratedCode>
    where
        L: CodeLookup + ?Sized,
    {
        let candidates = [
            (Tier::Primary, self.primary(seed)),
            (Tier::TimePerturbed, self.time_perturbed(seed, now)),
            (Tier::ContentHash, self.content_hash(seed, content)),
        ];

        for (tier, code) in candidates {
            if !self.taken(lookup, &code).await? {
                if tier != Tier::Primary {
                    tracing::debug!(seed, ?tier, "primary code taken, used fallback tier");
                }
                return Ok(GeneratedCode { code, tier });
            }
        }

        for _ in 0..self.random_attempts {
            let code = random_code(self.min_length + 2);
            if !self.taken(lookup, &code).await? {
                tracing::debug!(seed, "deterministic tiers exhausted, used random code");
                return Ok(GeneratedCode {
                    code,
                    tier: Tier::Random,
                });
            }
        }

        let code = random_code(self.min_length + self.extended_padding);
        tracing::error!(
            seed,
            length = code.len(),
            "every checked code tier collided; issuing unchecked extended random code"
        );
        Ok(GeneratedCode {
            code,
            tier: Tier::ExtendedRandom,
        })
    }

    fn time_perturbed(&self, seed: u64, now: DateTime<Utc>) -> String {
        let minute = now.timestamp().div_euclid(60) as u64;
        let mixed = seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(minute.rotate_left(29));
        encode_fixed(mixed, self.min_length)
    }

    fn content_hash(&self, seed: u64, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hasher.update(seed.to_be_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        encode_fixed(u64::from_be_bytes(prefix), self.min_length + 1)
    }

    async fn taken<L>(&self, lookup: &L, code: &str) -> Result<bool>
    where
        L: CodeLookup + ?Sized,
    {
        lookup.is_taken(code).await.map_err(|source| Error::Storage {
            operation: "code_exists",
            target: code.to_string(),
            source,
        })
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::from_config(&CodeConfig::default())
    }
}

/// Cryptographically random code of `length` symbols (thread-local CSPRNG).
pub fn random_code(length: usize) -> String {
    std::iter::repeat_with(|| ALPHABET[rand::random_range(0..ALPHABET.len())] as char)
        .take(length)
        .collect()
}

/// Smallest code length keeping the chance of any collision among
/// `expected_volume` uniformly drawn codes at or below `max_probability`.
///
/// The number of colliding pairs is approximately Poisson with
/// `lambda = n(n-1) / 2N` for a code space of size `N`.
pub fn recommend_length(expected_volume: u64, max_probability: f64) -> Result<usize> {
    if !(max_probability > 0.0 && max_probability < 1.0) {
        return Err(Error::validation(
            "collision probability must be strictly between 0 and 1",
        ));
    }
    if expected_volume < 2 {
        return Ok(1);
    }

    let n = expected_volume as f64;
    for length in 1..=MAX_RECOMMENDED_LENGTH {
        let Some(space) = code_space(length) else {
            break;
        };
        let lambda = n * (n - 1.0) / (2.0 * space as f64);
        let collision_probability = Poisson::new(lambda)
            .map(|dist| dist.sf(0))
            .unwrap_or(1.0);
        if collision_probability <= max_probability {
            return Ok(length);
        }
    }

    Err(Error::validation(format!(
        "no code length up to {MAX_RECOMMENDED_LENGTH} keeps {expected_volume} codes under {max_probability}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Lookup backed by a set of issued codes.
    struct Issued(Mutex<HashSet<String>>);

    impl Issued {
        fn new() -> Self {
            Self(Mutex::new(HashSet::new()))
        }

        fn insert(&self, code: String) -> bool {
            self.0.lock().unwrap().insert(code)
        }
    }

    #[async_trait]
    impl CodeLookup for Issued {
        async fn is_taken(&self, code: &str) -> anyhow::Result<bool> {
            Ok(self.0.lock().unwrap().contains(code))
        }
    }

    /// Lookup that reports every candidate as taken.
    struct AllTaken;

    #[async_trait]
    impl CodeLookup for AllTaken {
        async fn is_taken(&self, _code: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    struct Broken;

    #[async_trait]
    impl CodeLookup for Broken {
        async fn is_taken(&self, _code: &str) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_primary_tier_is_deterministic() {
        let generator = CodeGenerator::default();
        let lookup = Issued::new();
        let first = generator
            .generate(4242, "https://example.com", &lookup)
            .await
            .unwrap();
        let second = generator
            .generate(4242, "https://example.com", &lookup)
            .await
            .unwrap();
        assert_eq!(first.tier, Tier::Primary);
        assert_eq!(first, second);
        assert_eq!(first.code, generator.primary(4242));
        assert_eq!(first.code.len(), 6);
    }

    #[tokio::test]
    async fn test_fallback_never_reissues_a_code() {
        let generator = CodeGenerator::default();
        let lookup = Issued::new();
        for seed in 0..200u64 {
            lookup.insert(generator.primary(seed));
        }

        for seed in 0..200u64 {
            let generated = generator
                .generate(seed, "https://example.com/page", &lookup)
                .await
                .unwrap();
            assert_ne!(generated.tier, Tier::Primary);
            assert!(
                lookup.insert(generated.code.clone()),
                "duplicate code {} for seed {seed}",
                generated.code
            );
        }
    }

    #[tokio::test]
    async fn test_tiers_are_attempted_in_order() {
        let generator = CodeGenerator::new(6, 2, 6);
        let now = Utc::now();
        let lookup = Issued::new();
        lookup.insert(generator.primary(9));

        let second = generator
            .generate_at(9, "https://a.example", &lookup, now)
            .await
            .unwrap();
        assert_eq!(second.tier, Tier::TimePerturbed);
        assert_eq!(second.code.len(), 6);
        lookup.insert(second.code);

        let third = generator
            .generate_at(9, "https://a.example", &lookup, now)
            .await
            .unwrap();
        assert_eq!(third.tier, Tier::ContentHash);
        assert_eq!(third.code.len(), 7);
    }

    #[tokio::test]
    async fn test_exhausted_tiers_issue_extended_code() {
        let generator = CodeGenerator::new(6, 3, 6);
        let generated = generator
            .generate(1, "https://example.com", &AllTaken)
            .await
            .unwrap();
        assert_eq!(generated.tier, Tier::ExtendedRandom);
        assert_eq!(generated.code.len(), 12);
        assert!(generated.code.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_a_storage_error() {
        let generator = CodeGenerator::default();
        let err = generator
            .generate(1, "https://example.com", &Broken)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage { operation: "code_exists", .. }));
    }

    #[test]
    fn test_recommend_length_grows_with_volume() {
        let small = recommend_length(1_000, 0.001).unwrap();
        let large = recommend_length(100_000_000, 0.001).unwrap();
        assert!(small < large);

        // 56^6 ~ 3.1e10, so a million random six-symbol codes almost surely collide
        assert!(recommend_length(1_000_000, 0.001).unwrap() > 6);
        assert_eq!(recommend_length(1, 0.001).unwrap(), 1);
    }

    #[test]
    fn test_recommend_length_rejects_bad_probability() {
        assert!(recommend_length(10, 0.0).is_err());
        assert!(recommend_length(10, 1.0).is_err());
        assert!(recommend_length(10, f64::NAN).is_err());
    }

    #[test]
    fn test_random_code_uses_alphabet() {
        let code = random_code(32);
        assert_eq!(code.len(), 32);
        assert!(code.bytes().all(|b| ALPHABET.contains(&b)));
    }
}
