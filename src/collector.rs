//! Result collector: counts produced files until the expected number arrive.
//!
//! Per-slide downloads are dispatched together and complete in any order.
//! `add` appends and compares against the target inside one critical
//! section, so exactly one caller observes [`Collected::Complete`].

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Outcome of [`ResultCollector::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collected {
    /// More results are still expected.
    Pending { received: usize, expected: usize },
    /// This add completed the set. Carries every produced path in arrival order.
    Complete(Vec<PathBuf>),
    /// The set was already complete (or nothing was expected); the path was
    /// not recorded.
    Rejected,
}

#[derive(Debug, Default)]
struct CollectorState {
    expected: usize,
    produced: Vec<PathBuf>,
    complete: bool,
}

#[derive(Debug, Default)]
pub struct ResultCollector {
    state: Mutex<CollectorState>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        // A panic while holding the lock leaves the state consistent: every
        // mutation below is a single push or assignment.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start collecting a fresh set of `expected` results.
    pub fn reset(&self, expected: usize) {
        let mut state = self.lock();
        state.expected = expected;
        state.produced.clear();
        state.complete = false;
    }

    pub fn add(&self, path: PathBuf) -> Collected {
        let mut state = self.lock();
        if state.complete || state.expected == 0 {
            return Collected::Rejected;
        }
        state.produced.push(path);
        if state.produced.len() == state.expected {
            state.complete = true;
            Collected::Complete(state.produced.clone())
        } else {
            Collected::Pending {
                received: state.produced.len(),
                expected: state.expected,
            }
        }
    }

    pub fn produced(&self) -> Vec<PathBuf> {
        self.lock().produced.clone()
    }

    pub fn expected(&self) -> usize {
        self.lock().expected
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn completes_exactly_at_expected_count() {
        let c = ResultCollector::new();
        c.reset(3);
        assert_eq!(
            c.add("a.png".into()),
            Collected::Pending {
                received: 1,
                expected: 3
            }
        );
        assert!(matches!(c.add("b.png".into()), Collected::Pending { received: 2, .. }));
        assert_eq!(
            c.add("c.png".into()),
            Collected::Complete(vec!["a.png".into(), "b.png".into(), "c.png".into()])
        );
        assert!(c.is_complete());
    }

    #[test]
    fn adds_after_completion_are_rejected() {
        let c = ResultCollector::new();
        c.reset(1);
        assert!(matches!(c.add("a.png".into()), Collected::Complete(_)));
        assert_eq!(c.add("extra.png".into()), Collected::Rejected);
        assert_eq!(c.produced().len(), 1);
    }

    #[test]
    fn nothing_expected_rejects() {
        let c = ResultCollector::new();
        assert_eq!(c.add("a.png".into()), Collected::Rejected);
    }

    #[test]
    fn reset_starts_over() {
        let c = ResultCollector::new();
        c.reset(1);
        c.add("a.png".into());
        c.reset(2);
        assert!(!c.is_complete());
        assert!(c.produced().is_empty());
        assert_eq!(c.expected(), 2);
    }

    #[test]
    fn concurrent_adds_complete_once() {
        const N: usize = 64;
        let c = Arc::new(ResultCollector::new());
        c.reset(N);
        let completions = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..N)
            .map(|i| {
                let c = Arc::clone(&c);
                let completions = Arc::clone(&completions);
                std::thread::spawn(move || {
                    if let Collected::Complete(all) = c.add(format!("slide_{i}.png").into()) {
                        assert_eq!(all.len(), N);
                        completions.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(c.produced().len(), N);
    }
}
