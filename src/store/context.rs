use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Validity flag for the hosting runtime.
///
/// The extension host can tear its runtime down mid-session (reload, update),
/// after which every store call from an already-loaded page would fail. The
/// embedder flips this flag when that happens; agents check it before every
/// store operation and turn the call into a logged no-op instead of an error.
/// Invalidation is permanent for the lifetime of the page.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    invalidated: Arc<AtomicBool>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        !self.invalidated.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }
}
