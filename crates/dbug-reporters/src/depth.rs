use ahash::AHashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

/// Nesting depth of running transactional events, tracked per thread.
#[derive(Default)]
pub(crate) struct ThreadDepth {
    depths: Mutex<AHashMap<ThreadId, usize>>,
}

impl ThreadDepth {
    pub(crate) fn current(&self) -> usize {
        let depths = self.depths.lock().unwrap_or_else(PoisonError::into_inner);
        depths.get(&thread::current().id()).copied().unwrap_or(0)
    }

    /// Enters one level on this thread. The returned closure leaves it again, from any thread.
    pub(crate) fn enter(self: &Arc<Self>) -> impl FnOnce() + Send + 'static {
        let thread = thread::current().id();
        *self
            .depths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(thread)
            .or_default() += 1;
        let this = Arc::clone(self);
        move || {
            let mut depths = this.depths.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(depth) = depths.get_mut(&thread) {
                *depth = depth.saturating_sub(1);
                if *depth == 0 {
                    depths.remove(&thread);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_is_per_thread() {
        let depth = Arc::new(ThreadDepth::default());
        let outer = depth.enter();
        let inner = depth.enter();
        assert_eq!(depth.current(), 2);
        let other = Arc::clone(&depth);
        assert_eq!(thread::spawn(move || other.current()).join().unwrap(), 0);
        inner();
        assert_eq!(depth.current(), 1);
        outer();
        assert_eq!(depth.current(), 0);
    }
}
