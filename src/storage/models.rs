//! Row types returned by the store.

/// Aggregate stats returned by the `/stats` surface: lifetime total and the
/// current day's query count.
#[derive(Debug, Clone, Copy, Default)]
pub struct Totals {
    pub total: i64,
    pub today: i64,
}
