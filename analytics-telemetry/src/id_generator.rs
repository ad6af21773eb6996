//! Id Generator

use std::cell::RefCell;
use std::fmt;

use rand::{rngs, Rng, SeedableRng};

use crate::trace_context::{SpanId, TraceId};

/// Interface for generating trace and span ids.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new `TraceId`
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new `SpanId`
    fn new_span_id(&self) -> SpanId;
}

/// Default [`IdGenerator`] implementation.
///
/// Generates trace and span ids using a random number generator.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| TraceId::from(rng.borrow_mut().random::<u128>()))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from(rng.borrow_mut().random::<u64>()))
    }
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

#[cfg(any(test, feature = "testing"))]
mod increment {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::IdGenerator;
    use crate::trace_context::{SpanId, TraceId};

    /// [`IdGenerator`] implementation that increments a counter for each new
    /// id. This helps produce predictable ids for testing.
    #[derive(Clone, Debug)]
    pub struct IncrementIdGenerator(Arc<AtomicU64>);

    impl IncrementIdGenerator {
        /// Create a new [`IncrementIdGenerator`]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Default for IncrementIdGenerator {
        fn default() -> Self {
            Self(Arc::new(AtomicU64::new(1)))
        }
    }

    impl IdGenerator for IncrementIdGenerator {
        fn new_trace_id(&self) -> TraceId {
            TraceId::from(self.0.fetch_add(1, Ordering::SeqCst) as u128)
        }

        fn new_span_id(&self) -> SpanId {
            SpanId::from(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub use increment::IncrementIdGenerator;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_valid_and_distinct() {
        let generator = RandomIdGenerator::default();
        let first = generator.new_trace_id();
        let second = generator.new_trace_id();
        assert_ne!(first, TraceId::INVALID);
        assert_ne!(first, second);

        let first = generator.new_span_id();
        let second = generator.new_span_id();
        assert_ne!(first, SpanId::INVALID);
        assert_ne!(first, second);
    }
}
