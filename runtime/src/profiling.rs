//! Per-avatar timing, kept as sliding windows of recent samples.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use marionette_types::{CategoryId, ProfilingCategories, ProfilingSink};

/// Sliding window over the most recent `capacity` samples.
#[derive(Debug, Clone)]
pub struct Measurer {
    samples: VecDeque<Duration>,
    capacity: usize,
    total: Duration,
}

impl Measurer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total: Duration::ZERO,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity
            && let Some(evicted) = self.samples.pop_front()
        {
            self.total = self.total.saturating_sub(evicted);
        }
        self.samples.push_back(sample);
        self.total = self.total.saturating_add(sample);
    }

    #[must_use]
    pub fn running_average(&self) -> Option<Duration> {
        let count = u32::try_from(self.samples.len()).ok().filter(|n| *n > 0)?;
        Some(self.total / count)
    }

    #[must_use]
    pub fn latest(&self) -> Option<Duration> {
        self.samples.back().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Profiling sink holding one [`Measurer`] per category.
///
/// Samples for ids outside the registry it was built from are dropped.
#[derive(Debug)]
pub struct AvatarProfiling {
    measurers: Mutex<Vec<Measurer>>,
}

impl AvatarProfiling {
    #[must_use]
    pub fn new(categories: &ProfilingCategories) -> Self {
        let measurers = categories
            .iter()
            .map(|(_, category)| Measurer::new(category.window()))
            .collect();
        Self {
            measurers: Mutex::new(measurers),
        }
    }

    #[must_use]
    pub fn running_average(&self, category: CategoryId) -> Option<Duration> {
        self.measurers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(category.index())
            .and_then(Measurer::running_average)
    }

    #[must_use]
    pub fn samples(&self, category: CategoryId) -> usize {
        self.measurers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(category.index())
            .map_or(0, Measurer::len)
    }
}

impl ProfilingSink for AvatarProfiling {
    fn record_time(&self, category: CategoryId, elapsed: Duration) {
        if let Some(measurer) = self
            .measurers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(category.index())
        {
            measurer.record(elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_evicts_oldest_sample() {
        let mut measurer = Measurer::new(2);
        measurer.record(Duration::from_millis(10));
        measurer.record(Duration::from_millis(20));
        measurer.record(Duration::from_millis(40));
        assert_eq!(measurer.len(), 2);
        assert_eq!(measurer.running_average(), Some(Duration::from_millis(30)));
        assert_eq!(measurer.latest(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn empty_measurer_has_no_average() {
        assert_eq!(Measurer::new(5).running_average(), None);
    }

    #[test]
    fn initialization_keeps_only_latest() {
        let (categories, ids) = ProfilingCategories::standard();
        let profiling = AvatarProfiling::new(&categories);
        profiling.record_time(ids.initialization, Duration::from_millis(100));
        profiling.record_time(ids.initialization, Duration::from_millis(300));
        assert_eq!(
            profiling.running_average(ids.initialization),
            Some(Duration::from_millis(300))
        );

        profiling.record_time(ids.client_tick, Duration::from_millis(100));
        profiling.record_time(ids.client_tick, Duration::from_millis(300));
        assert_eq!(
            profiling.running_average(ids.client_tick),
            Some(Duration::from_millis(200))
        );
        assert_eq!(profiling.samples(ids.world_tick), 0);
    }
}
