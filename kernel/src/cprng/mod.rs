//! Global cryptographic PRNG.
//!
//! A reseedable hash-DRBG over SHA-256. Seeded once at kernel init from
//! whatever entropy the embedder gathered (boot randomness, jitter), mixed
//! with the monotonic clock; userspace can contribute more through
//! `cprng_add_entropy`. Consumers are `cprng_draw` and the per-process
//! handle-value secrets.

use helion_syscall::Status;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use spin::Once;

use crate::sync::SpinLock;

const RESEED_INTERVAL: u64 = 1 << 20;

struct Drbg {
    key: [u8; 32],
    counter: u64,
    since_reseed: u64,
}

impl Drbg {
    fn new(seed: &[u8], nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"helion-cprng-v1");
        hasher.update(seed);
        hasher.update(nonce.to_le_bytes());
        Drbg {
            key: hasher.finalize().into(),
            counter: 0,
            since_reseed: 0,
        }
    }

    fn reseed(&mut self, entropy: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(entropy);
        self.key = hasher.finalize().into();
        self.since_reseed = 0;
    }

    fn fill(&mut self, mut out: &mut [u8]) {
        while !out.is_empty() {
            let mut hasher = Sha256::new();
            hasher.update(self.key);
            hasher.update(self.counter.to_le_bytes());
            let block = hasher.finalize();
            self.counter = self.counter.wrapping_add(1);

            let n = out.len().min(block.len());
            out[..n].copy_from_slice(&block[..n]);
            out = &mut out[n..];
        }
        self.since_reseed = self.since_reseed.saturating_add(1);
        if self.since_reseed >= RESEED_INTERVAL {
            // Fold the counter back in so long-lived kernels keep moving
            // the key forward even without external entropy.
            let counter = self.counter;
            self.reseed(&counter.to_le_bytes());
        }
    }
}

static DRBG: Once<SpinLock<Drbg>> = Once::new();

/// Seed the generator. Idempotent; later callers only add entropy.
pub fn init(seed: &[u8]) {
    let mut fresh = false;
    DRBG.call_once(|| {
        fresh = true;
        SpinLock::new(Drbg::new(seed, crate::sched::now()))
    });
    if !fresh {
        add_entropy(seed);
    }
}

fn with_drbg<T>(f: impl FnOnce(&mut Drbg) -> T) -> T {
    let lock = DRBG.get().expect("cprng: not initialized");
    f(&mut lock.lock())
}

/// Fill `out` with generator output.
pub fn draw(out: &mut [u8]) {
    with_drbg(|drbg| drbg.fill(out));
}

/// Mix caller-provided entropy into the key.
pub fn add_entropy(entropy: &[u8]) {
    with_drbg(|drbg| drbg.reseed(entropy));
}

/// Draw a u32.
pub fn draw_u32() -> u32 {
    let mut buf = [0u8; 4];
    draw(&mut buf);
    u32::from_le_bytes(buf)
}

/// `rand_core` adapter over the global generator.
pub struct GlobalRng;

impl RngCore for GlobalRng {
    fn next_u32(&mut self) -> u32 {
        draw_u32()
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        draw(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        draw(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        draw(dest);
        Ok(())
    }
}

impl CryptoRng for GlobalRng {}

/// Syscall-facing draw with the per-call length cap applied by the caller.
pub fn draw_checked(out: &mut [u8], max: usize) -> Result<(), Status> {
    if out.len() > max {
        return Err(Status::InvalidArgs);
    }
    draw(out);
    Ok(())
}
