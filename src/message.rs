use crate::time_sync::UniqueNanos;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write;
use std::sync::Arc;

/// Hard cap on entries per batch imposed by the queue service.
pub const MAX_BATCH_SIZE: usize = 10;

/// Random suffixes are drawn from `0..ID_SUFFIX_RANGE`.
const ID_SUFFIX_RANGE: u32 = 1000;

/// One generated message. The body is the template with the id prepended, so
/// no two bodies are byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: String,
    pub body: String,
}

/// Produces uniquely identified messages from a body template.
///
/// Ids look like `ID_<unix-nanos>_<suffix>`. Timestamps are strictly
/// increasing per generator, so a single generator never repeats an id; the
/// random suffix only separates generators that land on the same nanosecond.
pub struct MessageGenerator {
    template: Arc<str>,
    buf: String,
    clock: UniqueNanos,
    rng: StdRng,
}

impl MessageGenerator {
    pub fn new(template: Arc<str>) -> Self {
        Self::with_rng(template, StdRng::from_os_rng())
    }

    pub fn with_seed(template: Arc<str>, seed: u64) -> Self {
        Self::with_rng(template, StdRng::seed_from_u64(seed))
    }

    fn with_rng(template: Arc<str>, rng: StdRng) -> Self {
        let buf = String::with_capacity(template.len() + 32);
        Self {
            template,
            buf,
            clock: UniqueNanos::new(),
            rng,
        }
    }

    pub fn generate(&mut self) -> MessageRecord {
        let ts = self.clock.tick();
        let suffix = self.rng.random_range(0..ID_SUFFIX_RANGE);

        self.buf.clear();
        // Writing into a String cannot fail.
        let _ = write!(self.buf, "ID_{ts}_{suffix}");
        let id = self.buf.clone();
        self.buf.push(' ');
        self.buf.push_str(&self.template);

        MessageRecord {
            id,
            body: self.buf.clone(),
        }
    }
}

/// An ordered group of at most [`MAX_BATCH_SIZE`] messages, sent in one call.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    messages: Vec<MessageRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl IntoIterator for Batch {
    type Item = MessageRecord;
    type IntoIter = std::vec::IntoIter<MessageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

pub struct Batcher {
    generator: MessageGenerator,
    max_batch_size: usize,
}

impl Batcher {
    /// `max_batch_size` is clamped to `[1, MAX_BATCH_SIZE]`.
    pub fn new(generator: MessageGenerator, max_batch_size: usize) -> Self {
        Self {
            generator,
            max_batch_size: max_batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Build a batch of exactly `requested` fresh messages, after clamping
    /// `requested` to `[1, max_batch_size]`.
    pub fn make_batch(&mut self, requested: usize) -> Batch {
        let size = requested.clamp(1, self.max_batch_size);
        let messages = (0..size).map(|_| self.generator.generate()).collect();
        Batch { messages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn template() -> Arc<str> {
        Arc::from("Message_Body")
    }

    #[test]
    fn body_is_id_then_template() {
        let mut g = MessageGenerator::with_seed(template(), 7);
        let m = g.generate();
        assert!(m.id.starts_with("ID_"));
        assert_eq!(m.body, format!("{} Message_Body", m.id));
        // fits the service's batch entry id rules
        assert!(m.id.len() <= 80);
        assert!(m.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn ids_unique_over_100k_calls() {
        let mut g = MessageGenerator::new(template());
        let mut seen = HashSet::with_capacity(100_000);
        for _ in 0..100_000 {
            assert!(seen.insert(g.generate().id));
        }
    }

    #[test]
    fn records_are_independent_of_scratch_buffer() {
        let mut g = MessageGenerator::with_seed(template(), 1);
        let a = g.generate();
        let b = g.generate();
        assert_ne!(a.id, b.id);
        assert!(a.body.starts_with(&a.id));
        assert!(b.body.starts_with(&b.id));
    }

    #[test]
    fn batch_size_is_clamped() {
        let mut b = Batcher::new(MessageGenerator::with_seed(template(), 3), MAX_BATCH_SIZE);
        assert_eq!(b.make_batch(0).len(), 1);
        assert_eq!(b.make_batch(4).len(), 4);
        assert_eq!(b.make_batch(10).len(), 10);
        assert_eq!(b.make_batch(55).len(), 10);

        let small = Batcher::new(MessageGenerator::with_seed(template(), 3), 3);
        assert_eq!(small.max_batch_size(), 3);
        let oversized = Batcher::new(MessageGenerator::with_seed(template(), 3), 50);
        assert_eq!(oversized.max_batch_size(), MAX_BATCH_SIZE);
    }
}
