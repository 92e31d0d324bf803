//! Monotone-search driver used by the rate control.
//!
//! The caller owns the probe: it evaluates a candidate index and reports
//! whether the result was too small, too big or out of range; the driver
//! produces the next index to test, or the final answer.

/// Caller verdict on the previously tested index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryStep {
    /// First call; nothing tested yet.
    Begin,
    TooSmall,
    TooBig,
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySearchResult {
    /// Test this index next.
    Continue(u32),
    /// Search finished; this is the best index matching the policy.
    FindClose(u32),
    /// No index in range ever satisfied the policy.
    Error,
}

#[derive(Debug, Clone)]
pub struct BinarySearch {
    id_beg: u32,
    id_end: u32,
    /// Policy bit: keep the greatest index still reported too small
    /// (otherwise the smallest index reported too big).
    find_below_matching: bool,
    best_idx: i64,
    last_index: i64,
    step: u32,
}

impl BinarySearch {
    /// `step == 0` selects the classic midpoint start; otherwise the first
    /// probe is `begin + step` and the step halves once it stops fitting.
    pub fn new(begin_index: u32, end_index: u32, find_below_matching: bool, step: u32) -> Self {
        debug_assert!(end_index >= begin_index);
        let step = if step != 0 {
            debug_assert!(begin_index <= step && step <= end_index);
            step
        } else {
            (end_index - begin_index) / 2
        };
        BinarySearch {
            id_beg: begin_index,
            id_end: end_index,
            find_below_matching,
            best_idx: -1,
            last_index: -1,
            step,
        }
    }

    pub fn next_step(&mut self, result: BinaryStep) -> BinarySearchResult {
        debug_assert!(self.id_beg <= self.id_end);

        match result {
            BinaryStep::Begin => {}
            BinaryStep::TooSmall => {
                if self.find_below_matching && self.best_idx < self.last_index {
                    self.best_idx = self.last_index;
                }
                if self.id_end as i64 >= self.last_index + 1 {
                    self.id_beg = (self.last_index + 1) as u32;
                } else if self.best_idx == -1 {
                    return BinarySearchResult::Error;
                } else {
                    return BinarySearchResult::FindClose(self.best_idx as u32);
                }
            }
            BinaryStep::TooBig | BinaryStep::OutOfRange => {
                if result == BinaryStep::TooBig
                    && !self.find_below_matching
                    && (self.best_idx == -1 || self.best_idx > self.last_index)
                {
                    self.best_idx = self.last_index;
                }
                if (self.id_beg as i64) <= self.last_index - 1 {
                    self.id_end = (self.last_index - 1) as u32;
                } else if self.best_idx == -1 {
                    return BinarySearchResult::Error;
                } else {
                    return BinarySearchResult::FindClose(self.best_idx as u32);
                }
            }
        }

        if self.step > self.id_end - self.id_beg {
            self.step = (self.id_end - self.id_beg + 1) / 2;
        }
        self.last_index = (self.step + self.id_beg) as i64;
        BinarySearchResult::Continue(self.last_index as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives a search over a monotone predicate: `fits(i)` is true for all
    /// `i >= threshold`.
    fn search_min_fitting(threshold: u32, max: u32, step: u32) -> BinarySearchResult {
        let mut search = BinarySearch::new(0, max, false, step);
        let mut verdict = BinaryStep::Begin;
        loop {
            match search.next_step(verdict) {
                BinarySearchResult::Continue(idx) => {
                    verdict = if idx >= threshold {
                        BinaryStep::TooBig
                    } else {
                        BinaryStep::TooSmall
                    };
                }
                other => return other,
            }
        }
    }

    /// `fits(i)` is true for all `i <= threshold`; find the greatest.
    fn search_max_fitting(threshold: i64, max: u32, step: u32) -> BinarySearchResult {
        let mut search = BinarySearch::new(0, max, true, step);
        let mut verdict = BinaryStep::Begin;
        loop {
            match search.next_step(verdict) {
                BinarySearchResult::Continue(idx) => {
                    verdict = if (idx as i64) <= threshold {
                        BinaryStep::TooSmall
                    } else {
                        BinaryStep::TooBig
                    };
                }
                other => return other,
            }
        }
    }

    #[test]
    fn test_find_smallest_fitting() {
        for threshold in 0..=20 {
            for step in [0u32, 6] {
                if step > 20 {
                    continue;
                }
                assert_eq!(
                    search_min_fitting(threshold, 20, step),
                    BinarySearchResult::FindClose(threshold),
                    "threshold {} step {}",
                    threshold,
                    step
                );
            }
        }
    }

    #[test]
    fn test_find_greatest_fitting() {
        for threshold in 0..=20i64 {
            assert_eq!(
                search_max_fitting(threshold, 20, 6),
                BinarySearchResult::FindClose(threshold as u32)
            );
        }
    }

    #[test]
    fn test_nothing_fits() {
        // Predicate never fits: every probe is too small, greatest-fit policy
        // never records a best index below the first failure.
        let mut search = BinarySearch::new(0, 10, false, 0);
        let mut verdict = BinaryStep::Begin;
        let result = loop {
            match search.next_step(verdict) {
                BinarySearchResult::Continue(_) => verdict = BinaryStep::TooSmall,
                other => break other,
            }
        };
        assert_eq!(result, BinarySearchResult::Error);
    }

    #[test]
    fn test_out_of_range_steps() {
        // Indices above 7 are out of range, fit threshold at 5.
        let mut search = BinarySearch::new(0, 20, false, 0);
        let mut verdict = BinaryStep::Begin;
        let result = loop {
            match search.next_step(verdict) {
                BinarySearchResult::Continue(idx) => {
                    verdict = if idx > 7 {
                        BinaryStep::OutOfRange
                    } else if idx >= 5 {
                        BinaryStep::TooBig
                    } else {
                        BinaryStep::TooSmall
                    };
                }
                other => break other,
            }
        };
        assert_eq!(result, BinarySearchResult::FindClose(5));
    }
}
