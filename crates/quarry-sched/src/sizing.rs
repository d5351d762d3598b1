//! Parallelism sizing.

use quarry_plan::{executor_number, LogicalPlan, Result};
use tracing::debug;

/// Largest `p` in `[min, max]` with `executor_number(plan, p) <= free`, or
/// `None` when even `min` does not fit. Relies on `executor_number` being
/// non-decreasing in `p`.
pub fn max_parallelism(plan: &LogicalPlan, free: usize, min: usize, max: usize) -> Result<Option<usize>> {
    let min = min.max(1);
    if max < min || executor_number(plan, min)? > free {
        return Ok(None);
    }
    let (mut lo, mut hi) = (min, max);
    // invariant: lo fits
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if executor_number(plan, mid)? <= free {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    debug!(free, parallelism = lo, "sized plan");
    Ok(Some(lo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::prelude::{DataType, Field, Metadata};
    use quarry_plan::SortItem;

    fn scan(partitions: usize) -> LogicalPlan {
        LogicalPlan::Scan {
            catalog: "c".into(),
            schema: "s".into(),
            table: "t".into(),
            metadata: Metadata::new(vec![Field::new("a", DataType::Int64)]),
            partitions,
            filters: vec![],
        }
    }

    fn sorted(partitions: usize) -> LogicalPlan {
        LogicalPlan::OrderBy {
            input: Box::new(scan(partitions)),
            items: vec![SortItem::parse("a").unwrap()],
        }
    }

    fn linear_max(plan: &LogicalPlan, free: usize, max: usize) -> Option<usize> {
        (1..=max)
            .filter(|&p| executor_number(plan, p).unwrap() <= free)
            .max()
    }

    #[test]
    fn matches_linear_scan() {
        for plan in [scan(4), sorted(3), sorted(64)] {
            for free in 0..40 {
                assert_eq!(
                    max_parallelism(&plan, free, 1, 1000).unwrap(),
                    linear_max(&plan, free, 1000),
                    "free={free} plan={}",
                    plan.name()
                );
            }
        }
    }

    #[test]
    fn infeasible_at_minimum_is_none() {
        // order by needs scan + p locals + merge = 3 executors at p=1
        assert_eq!(max_parallelism(&sorted(2), 2, 1, 1000).unwrap(), None);
        assert_eq!(max_parallelism(&sorted(2), 3, 1, 1000).unwrap(), Some(1));
    }

    #[test]
    fn bounds_are_respected() {
        assert_eq!(max_parallelism(&scan(100), 50, 1, 8).unwrap(), Some(8));
        assert_eq!(max_parallelism(&scan(100), 50, 10, 8).unwrap(), None);
    }
}
