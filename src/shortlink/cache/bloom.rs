/// Probabilistic membership filter over known short codes.
///
/// `might_exist` returning false means the code was definitely never inserted
/// into this process's filter; true means it may have been. The filter is
/// append-only for the process lifetime and is never authoritative: the
/// database remains the source of truth.
use bloomfilter::Bloom;
use std::sync::RwLock;

pub struct CodeFilter {
    filter: RwLock<Bloom<str>>,
}

impl CodeFilter {
    /// Create a filter sized for `expected_items` at `false_positive_rate`
    /// (e.g. 1_000_000 items at 0.01).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        Self {
            filter: RwLock::new(Bloom::new_for_fp_rate(expected_items, false_positive_rate)),
        }
    }

    pub fn add(&self, code: &str) {
        if let Ok(mut filter) = self.filter.write() {
            filter.set(code);
        }
    }

    /// False => definitely not inserted. True => possibly inserted.
    pub fn might_exist(&self, code: &str) -> bool {
        match self.filter.read() {
            Ok(filter) => filter.check(code),
            // A poisoned lock must not turn the filter into a gate that
            // rejects everything; fail towards the database.
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_codes_are_reported() {
        let filter = CodeFilter::new(1000, 0.01);
        filter.add("abc");
        filter.add("Xyz9");
        assert!(filter.might_exist("abc"));
        assert!(filter.might_exist("Xyz9"));
    }

    #[test]
    fn test_fresh_filter_rejects() {
        let filter = CodeFilter::new(1000, 0.01);
        assert!(!filter.might_exist("never-added"));
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let filter = CodeFilter::new(10_000, 0.01);
        for i in 0..10_000 {
            filter.add(&format!("code-{}", i));
        }
        let mut false_positives = 0;
        for i in 0..10_000 {
            if filter.might_exist(&format!("other-{}", i)) {
                false_positives += 1;
            }
        }
        // 1% target; allow generous slack to keep the test deterministic.
        assert!(false_positives < 500, "false positives: {}", false_positives);
    }

    #[test]
    fn test_concurrent_reads() {
        use std::sync::Arc;
        let filter = Arc::new(CodeFilter::new(1000, 0.01));
        filter.add("shared");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let f = Arc::clone(&filter);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        assert!(f.might_exist("shared"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
