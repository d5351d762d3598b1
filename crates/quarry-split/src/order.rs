//! Multi-key row comparison and minimum selection.
//!
//! Per key, rows rank as: absent key < present `Null` < present value, and two
//! present values compare by `Value::cmp_natural`. A descending key reverses
//! its sub-comparison. The first key that differs decides; rows equal on every
//! key are order-equivalent and callers rely on a stable sort to keep them in
//! arrival order.

use std::cmp::Ordering;

use quarry_core::prelude::{OrderType, Value};

/// Compare two key tuples under `orders`. Keys beyond a tuple's length, or
/// whose flag is false, are absent.
pub fn compare_keys(
    a: &[Value],
    a_flags: &[bool],
    b: &[Value],
    b_flags: &[bool],
    orders: &[OrderType],
) -> Ordering {
    for (k, order) in orders.iter().enumerate() {
        let ord = compare_key(key_at(a, a_flags, k), key_at(b, b_flags, k), *order);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// One key position of `compare_keys`. `None` is an absent key.
pub fn compare_key(left: Option<&Value>, right: Option<&Value>, order: OrderType) -> Ordering {
    let ord = match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp_natural(y),
    };
    match order {
        OrderType::Asc => ord,
        OrderType::Desc => ord.reverse(),
    }
}

fn key_at<'a>(keys: &'a [Value], flags: &[bool], k: usize) -> Option<&'a Value> {
    match flags.get(k) {
        Some(true) => keys.get(k),
        _ => None,
    }
}

/// One row detached from its split, as held by a merge cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
    pub keys: Vec<Value>,
    pub key_flags: Vec<bool>,
}

impl Row {
    pub fn new(values: Vec<Value>, keys: Vec<Value>, key_flags: Vec<bool>) -> Self {
        Self {
            values,
            keys,
            key_flags,
        }
    }
}

/// A set of candidate rows, some of which may already be consumed.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    pub data: Vec<Option<Row>>,
    pub orders: Vec<OrderType>,
}

impl Rows {
    pub fn new(orders: Vec<OrderType>) -> Self {
        Self {
            data: Vec::new(),
            orders,
        }
    }

    pub fn with_slots(slots: usize, orders: Vec<OrderType>) -> Self {
        Self {
            data: vec![None; slots],
            orders,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `true` when row `i` sorts strictly before row `j`. Absent slots never
    /// compare less than anything.
    pub fn less(&self, i: usize, j: usize) -> bool {
        match (self.data.get(i).and_then(Option::as_ref), self.data.get(j).and_then(Option::as_ref)) {
            (Some(a), Some(b)) => {
                compare_keys(&a.keys, &a.key_flags, &b.keys, &b.key_flags, &self.orders)
                    == Ordering::Less
            }
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Index of the smallest present row, or `None` when every slot is empty.
    /// Ties go to the lowest index.
    pub fn min(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, slot) in self.data.iter().enumerate() {
            if slot.is_none() {
                continue;
            }
            best = match best {
                Some(b) if !self.less(i, b) => Some(b),
                _ => Some(i),
            };
        }
        best
    }

    /// Replace slot `i`, returning what was there.
    pub fn set(&mut self, i: usize, row: Option<Row>) -> Option<Row> {
        std::mem::replace(&mut self.data[i], row)
    }

    pub fn take(&mut self, i: usize) -> Option<Row> {
        self.data.get_mut(i).and_then(Option::take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(k: Option<Value>) -> Row {
        let flag = k.is_some();
        Row::new(vec![], vec![k.unwrap_or(Value::Null)], vec![flag])
    }

    #[test]
    fn direction_negates_each_key_independently() {
        let a = [Value::I64(3), Value::Str("a".into())];
        let b = [Value::I64(3), Value::Str("b".into())];
        let flags = [true, true];
        assert_eq!(
            compare_keys(&a, &flags, &b, &flags, &[OrderType::Asc, OrderType::Asc]),
            Ordering::Less
        );
        assert_eq!(
            compare_keys(&a, &flags, &b, &flags, &[OrderType::Asc, OrderType::Desc]),
            Ordering::Greater
        );
        assert_eq!(
            compare_keys(&a, &flags, &a, &flags, &[OrderType::Desc, OrderType::Desc]),
            Ordering::Equal
        );
    }

    #[test]
    fn absent_null_and_value_are_distinct_ranks() {
        let absent = row(None);
        let null = row(Some(Value::Null));
        let one = row(Some(Value::I64(1)));
        let asc = [OrderType::Asc];
        let cmp = |x: &Row, y: &Row| compare_keys(&x.keys, &x.key_flags, &y.keys, &y.key_flags, &asc);

        assert_eq!(cmp(&absent, &null), Ordering::Less);
        assert_eq!(cmp(&null, &one), Ordering::Less);
        assert_eq!(cmp(&absent, &absent), Ordering::Equal);
        assert_eq!(cmp(&one, &absent), Ordering::Greater);
    }

    #[test]
    fn short_key_tuples_count_as_absent() {
        let ord = compare_keys(
            &[Value::I64(1)],
            &[true],
            &[Value::I64(1), Value::I64(0)],
            &[true, true],
            &[OrderType::Asc, OrderType::Asc],
        );
        assert_eq!(ord, Ordering::Less);
    }

    #[test]
    fn min_skips_consumed_slots() {
        let mut rows = Rows::with_slots(4, vec![OrderType::Asc]);
        assert_eq!(rows.min(), None);

        rows.set(1, Some(row(Some(Value::I64(7)))));
        rows.set(3, Some(row(Some(Value::I64(2)))));
        assert_eq!(rows.min(), Some(3));
        assert!(rows.less(3, 1));
        assert!(!rows.less(0, 1));

        rows.take(3);
        assert_eq!(rows.min(), Some(1));
    }

    #[test]
    fn min_honors_descending_and_ties() {
        let mut rows = Rows::with_slots(3, vec![OrderType::Desc]);
        rows.set(0, Some(row(Some(Value::I64(5)))));
        rows.set(1, Some(row(Some(Value::I64(9)))));
        rows.set(2, Some(row(Some(Value::I64(9)))));
        assert_eq!(rows.min(), Some(1));
    }
}
