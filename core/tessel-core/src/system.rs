///
/// Processor count
///
/// Queried once from the OS and cached. Falls back to 1 when the platform
/// cannot report its parallelism.
///

use std::sync::OnceLock;
use std::thread;

static PROCESSOR_COUNT: OnceLock<usize> = OnceLock::new();

/// Number of logical processors available to this process (at least 1)
pub fn processor_count() -> usize {
    *PROCESSOR_COUNT.get_or_init(|| {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

/// True when more than one processor is available
pub fn is_multi_core() -> bool {
    processor_count() > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_count_is_stable() {
        let first = processor_count();
        assert!(first >= 1);
        assert_eq!(first, processor_count());
        assert_eq!(is_multi_core(), first > 1);
    }
}
