use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng};

use crate::{BraceletData, DeviceData, TelemetryRecord};

// ═══════════════════════════════════════════════════════════════
//  RNG
// ═══════════════════════════════════════════════════════════════

/// Pseudorandom source for payload synthesis. Not for cryptography.
pub struct Rng {
    inner: StdRng,
}

impl Rng {
    /// `seed == 0` берёт энтропию системы, иначе детерминированная последовательность.
    pub fn new(seed: u64) -> Self {
        let inner = if seed == 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(seed)
        };
        Self { inner }
    }

    /// Uniform integer in `[0, n)`. `n` must be non-zero.
    pub fn next_intn(&mut self, n: usize) -> usize {
        self.inner.gen_range(0..n)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Bracelet telemetry
// ═══════════════════════════════════════════════════════════════

pub const HEART_RATE_BASE: u32 = 60;
pub const HEART_RATE_SPAN: u32 = 40;

/// Генератор показаний браслета: heart_rate в `[60, 100)`.
pub struct BraceletGenerator {
    rng: Rng,
    device_id: String,
}

impl BraceletGenerator {
    pub fn new(rng: Rng, device_id: impl Into<String>) -> Self {
        Self {
            rng,
            device_id: device_id.into(),
        }
    }

    pub fn next_record(&mut self) -> TelemetryRecord {
        let heart_rate = self.rng.next_intn(HEART_RATE_SPAN as usize) as u32 + HEART_RATE_BASE;
        TelemetryRecord::new(self.device_id.clone(), DeviceData::Bracelet(BraceletData { heart_rate }))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Greetings
// ═══════════════════════════════════════════════════════════════

pub const GREETINGS: [&str; 5] = [
    "Hello, World!",
    "Greetings from Go!",
    "MQTT is awesome!",
    "Random message incoming!",
    "Go is fun!",
];

pub struct GreetingPicker {
    rng: Rng,
}

impl GreetingPicker {
    pub fn new(rng: Rng) -> Self {
        Self { rng }
    }

    pub fn next_message(&mut self) -> &'static str {
        GREETINGS[self.rng.next_intn(GREETINGS.len())]
    }
}
