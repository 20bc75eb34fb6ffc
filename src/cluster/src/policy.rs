/// When a local increment should trigger an opportunistic push.
///
/// Counts at or below `low_watermark` push every `every_low` increments so
/// fresh content converges quickly; above it, every `every_high`. A period of
/// zero disables pushing in that band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushPolicy {
    pub low_watermark: u64,
    pub every_low: u64,
    pub every_high: u64,
}

impl Default for PushPolicy {
    fn default() -> Self {
        PushPolicy {
            low_watermark: 50,
            every_low: 5,
            every_high: 100,
        }
    }
}

impl PushPolicy {
    /// Decide from the post-increment local count
    pub fn should_push(&self, count: u64) -> bool {
        if count == 0 {
            return false;
        }
        let every = if count <= self.low_watermark {
            self.every_low
        } else {
            self.every_high
        };
        every != 0 && count % every == 0
    }
}
