//! Commit-reveal provably-fair dice.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// SHA-256 hash of the server seed, safe to publish before any rolls are
/// made.
pub type SeedHash = [u8; 32];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiceRoll {
    pub value: u8,
    pub server_seed_hash: SeedHash,
    pub client_seed: String,
    pub nonce: u64,
    /// First 16 hex digits of `H(server_seed || client_seed || nonce)`.
    pub proof: String,
}

/// One dice table for a single match: one server seed shared by all
/// players, a monotonic nonce, and each player's declared client seed.
pub struct FairDice {
    match_id: Uuid,
    server_seed: [u8; 32],
    server_seed_hash: SeedHash,
    nonce: u64,
}

impl FairDice {
    /// Generates a fresh 32-byte server seed and publishes its hash
    /// immediately, before any `client_seed` has been accepted.
    pub fn new(match_id: Uuid) -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        FairDice::from_seed(match_id, seed)
    }

    fn from_seed(match_id: Uuid, server_seed: [u8; 32]) -> Self {
        let server_seed_hash = hash_seed(&server_seed);
        FairDice {
            match_id,
            server_seed,
            server_seed_hash,
            nonce: 0,
        }
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn server_seed_hash(&self) -> SeedHash {
        self.server_seed_hash
    }

    /// Revealed only once the match has ended.
    pub fn reveal_server_seed(&self) -> [u8; 32] {
        self.server_seed
    }

    /// Rolls one die for `client_seed`, consuming the next nonce.
    pub fn roll(&mut self, client_seed: &str) -> DiceRoll {
        let nonce = self.nonce;
        self.nonce += 1;
        derive_roll(&self.server_seed, self.server_seed_hash, client_seed, nonce)
    }
}

fn hash_seed(server_seed: &[u8; 32]) -> SeedHash {
    let mut hasher = Sha256::new();
    hasher.update(server_seed);
    hasher.finalize().into()
}

fn derive_roll(
    server_seed: &[u8; 32],
    server_seed_hash: SeedHash,
    client_seed: &str,
    nonce: u64,
) -> DiceRoll {
    let mut hasher = Sha256::new();
    hasher.update(server_seed);
    hasher.update(client_seed.as_bytes());
    hasher.update(nonce.to_le_bytes());
    let digest = hasher.finalize();
    let hex = hex_encode(&digest);

    // first 8 hex digits as an unsigned integer, `mod 6` bias is
    // negligible (< 2^-30) and intentionally uncorrected.
    let n = u32::from_str_radix(&hex[0..8], 16).expect("hex digest slice is always valid hex");
    let value = (n % 6) as u8 + 1;

    DiceRoll {
        value,
        server_seed_hash,
        client_seed: client_seed.to_string(),
        nonce,
        proof: hex[0..16].to_string(),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String cannot fail");
    }
    s
}

/// Recomputes `value` from the revealed `server_seed` and a recorded
/// `(client_seed, nonce)` pair. Used by a post-game provably-fair
/// verifier.
pub fn verify_roll(server_seed: &[u8; 32], roll: &DiceRoll) -> bool {
    if hash_seed(server_seed) != roll.server_seed_hash {
        return false;
    }
    let recomputed = derive_roll(server_seed, roll.server_seed_hash, &roll.client_seed, roll.nonce);
    recomputed.value == roll.value && recomputed.proof == roll.proof
}
