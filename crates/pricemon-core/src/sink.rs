//! Persistence seam between the processor and storage.

use pricemon_data::{DeviationSample, PriceSample, Store, StoreError};

/// Accepts per-block batches. Both writes are keyed upserts, so replaying a
/// block must leave a single row per key.
pub trait PriceSink: Send + Sync {
    fn upsert_prices(&self, samples: &[PriceSample]) -> Result<usize, StoreError>;

    fn upsert_deviations(&self, deviations: &[DeviationSample]) -> Result<usize, StoreError>;
}

impl PriceSink for Store {
    fn upsert_prices(&self, samples: &[PriceSample]) -> Result<usize, StoreError> {
        Store::upsert_prices(self, samples)
    }

    fn upsert_deviations(&self, deviations: &[DeviationSample]) -> Result<usize, StoreError> {
        Store::upsert_deviations(self, deviations)
    }
}
