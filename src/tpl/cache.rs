use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tracing::trace;

use crate::error::HamlError;
use crate::tpl::engine::Renderer;

type Slot = Arc<Mutex<Option<Arc<Renderer>>>>;

/// Renderers keyed by template identifier. Each identifier owns a slot so
/// concurrent first uses compile once while other identifiers proceed.
#[derive(Default)]
pub struct TemplateCache {
    slots: DashMap<String, Slot>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Renderer>> {
        let slot = self.slots.get(id)?.clone();
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Returns the cached renderer, running `compile` under the slot lock when
    /// there is none. A failed compile drops its slot, so a later call retries.
    pub fn get_or_compile(
        &self,
        id: &str,
        compile: impl FnOnce() -> Result<Renderer, HamlError>,
    ) -> Result<Arc<Renderer>, HamlError> {
        let slot = self.slots.entry(id.to_string()).or_default().clone();
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(renderer) = guard.as_ref() {
            trace!(id, "template cache hit");
            return Ok(renderer.clone());
        }
        match compile() {
            Ok(renderer) => {
                let renderer = Arc::new(renderer);
                *guard = Some(renderer.clone());
                // a failed compile may have dropped this slot while we waited
                self.slots.entry(id.to_string()).or_insert_with(|| slot.clone());
                Ok(renderer)
            }
            Err(e) => {
                self.slots.remove_if(id, |_, current| Arc::ptr_eq(current, &slot));
                Err(e)
            }
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        self.slots.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        // slot locks are never taken while a map shard is held
        let slots: Vec<Slot> = self.slots.iter().map(|entry| entry.value().clone()).collect();
        slots
            .iter()
            .filter(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptimizerOptions;
    use crate::tpl::engine::compile;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn renderer(src: &str) -> Result<Renderer, HamlError> {
        compile("t", src, &OptimizerOptions::new()).map(Renderer::new)
    }

    #[test]
    fn test_same_instance_returned() {
        let cache = TemplateCache::new();
        let a = cache.get_or_compile("a", || renderer("%p")).unwrap();
        let b = cache.get_or_compile("a", || panic!("compiled twice")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert!(cache.remove("a"));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_failed_compile_retried() {
        let cache = TemplateCache::new();
        assert!(cache.get_or_compile("bad", || renderer("   x")).is_err());
        assert!(cache.get("bad").is_none());
        assert!(cache.slots.is_empty());
        assert!(cache.get_or_compile("bad", || renderer("x")).is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unknown_ids_leave_no_slots() {
        let cache = TemplateCache::new();
        for i in 0..50 {
            let id = format!("missing-{}", i);
            let err = cache.get_or_compile(&id, || Err(HamlError::TemplateNotFound(id.clone())));
            assert!(err.is_err());
        }
        assert!(cache.slots.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_single_flight() {
        let cache = Arc::new(TemplateCache::new());
        let compiles = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let compiles = compiles.clone();
                thread::spawn(move || {
                    cache
                        .get_or_compile("shared", || {
                            compiles.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(20));
                            renderer("= 1")
                        })
                        .unwrap()
                })
            })
            .collect();
        let renderers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(compiles.load(Ordering::SeqCst), 1);
        assert!(renderers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
