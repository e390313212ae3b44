use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::IngestError;
use crate::types::{Order, OrderBookEntry, OrderBookSnapshot, OrderSide};

/// Ordering key of one side of the book. The smallest key has priority.
///
/// Keys are built only from fields that never change while an order rests,
/// so a checked-out order keeps its rank until it is closed.
pub trait PriorityKey: Ord + Clone {
    fn of(order: &Order) -> Self;
    fn order_id(&self) -> &str;
}

/// Higher price first, then earlier `order_time`, then order id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BidKey {
    price: Reverse<Decimal>,
    order_time: DateTime<Utc>,
    order_id: String,
}

/// Lower price first, then earlier `order_time`, then order id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AskKey {
    price: Decimal,
    order_time: DateTime<Utc>,
    order_id: String,
}

impl PriorityKey for BidKey {
    fn of(order: &Order) -> Self {
        Self {
            price: Reverse(order.price),
            order_time: order.order_time,
            order_id: order.order_id.clone(),
        }
    }

    fn order_id(&self) -> &str {
        &self.order_id
    }
}

impl PriorityKey for AskKey {
    fn of(order: &Order) -> Self {
        Self {
            price: order.price,
            order_time: order.order_time,
            order_id: order.order_id.clone(),
        }
    }

    fn order_id(&self) -> &str {
        &self.order_id
    }
}

#[derive(Debug, Clone)]
pub struct SideQueue<K: PriorityKey> {
    keys: BTreeSet<K>,
}

impl<K: PriorityKey> SideQueue<K> {
    pub fn new() -> Self {
        Self {
            keys: BTreeSet::new(),
        }
    }

    fn insert(&mut self, order: &Order) -> bool {
        self.keys.insert(K::of(order))
    }

    fn remove(&mut self, order: &Order) -> bool {
        self.keys.remove(&K::of(order))
    }

    fn first(&self) -> Option<&K> {
        self.keys.first()
    }

    fn iter(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: PriorityKey> Default for SideQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

pub type BidQueue = SideQueue<BidKey>;
pub type AskQueue = SideQueue<AskKey>;

/// Resting orders of one symbol.
///
/// `orders` is the source of truth. A popped order is checked out by a
/// settlement: it keeps its place in its queue, so views of the book still
/// rank it, but `pop_best` and `cancel` pass over it until it is either
/// restored or closed.
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    bids: BidQueue,
    asks: AskQueue,
    orders: HashMap<String, Order>,
    checked_out: HashSet<String>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BidQueue::new(),
            asks: AskQueue::new(),
            orders: HashMap::new(),
            checked_out: HashSet::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Rests a new order. Returns `false` without touching the book if the id
    /// is already known (resting or checked out) or the order is not open.
    pub fn add(&mut self, order: Order) -> bool {
        if self.orders.contains_key(&order.order_id) || !order.is_open() {
            return false;
        }
        self.enqueue(&order);
        self.orders.insert(order.order_id.clone(), order);
        true
    }

    pub fn peek_best(&self, side: OrderSide) -> Option<&Order> {
        let order_id = match side {
            OrderSide::Buy => self.bids.first().map(|k| k.order_id()),
            OrderSide::Sell => self.asks.first().map(|k| k.order_id()),
        }?;
        self.orders.get(order_id)
    }

    /// Checks out the best order of `side` that is not already checked out.
    /// The order stays ranked in its queue until `restore` or
    /// `finalize_close`.
    pub fn pop_best(&mut self, side: OrderSide) -> Option<Order> {
        let order_id = match side {
            OrderSide::Buy => self.first_available(self.bids.iter()),
            OrderSide::Sell => self.first_available(self.asks.iter()),
        }?;
        self.checked_out.insert(order_id.clone());
        self.orders.get(&order_id).cloned()
    }

    /// Returns a checked-out order to matching, at its original priority.
    /// Returns `false` if the id is unknown or not checked out.
    pub fn restore(&mut self, order_id: &str) -> bool {
        self.orders.contains_key(order_id) && self.checked_out.remove(order_id)
    }

    /// Drops a settled order from the book entirely.
    pub fn finalize_close(&mut self, order_id: &str) -> Option<Order> {
        let order = self.orders.remove(order_id)?;
        self.checked_out.remove(order_id);
        self.dequeue(&order);
        Some(order)
    }

    pub fn cancel(&mut self, order_id: &str) -> Result<Order, IngestError> {
        let order = self
            .orders
            .get(order_id)
            .ok_or_else(|| IngestError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;
        if self.checked_out.contains(order_id) {
            return Err(IngestError::OrderInFlight {
                order_id: order_id.to_string(),
            });
        }
        let order = order.clone();
        self.dequeue(&order);
        self.orders.remove(order_id);
        Ok(order)
    }

    pub fn get(&self, order_id: &str) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.orders.contains_key(order_id)
    }

    pub fn is_in_flight(&self, order_id: &str) -> bool {
        self.orders.contains_key(order_id) && self.checked_out.contains(order_id)
    }

    /// Number of orders known to the book, checked-out ones included.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn bid_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_count(&self) -> usize {
        self.asks.len()
    }

    /// Orders of `side` in priority order, checked-out ones included.
    pub fn orders_in_priority(&self, side: OrderSide) -> Vec<&Order> {
        match side {
            OrderSide::Buy => self.resolve(self.bids.iter()),
            OrderSide::Sell => self.resolve(self.asks.iter()),
        }
    }

    /// Aggregated price levels of `side`, best first.
    pub fn depth(&self, side: OrderSide, levels: usize) -> Vec<OrderBookEntry> {
        let mut result: Vec<OrderBookEntry> = Vec::new();
        for order in self.orders_in_priority(side) {
            match result.last_mut() {
                Some(level) if level.price == order.price => {
                    level.quantity += order.leaves_quantity();
                    level.order_count += 1;
                }
                _ => {
                    if result.len() == levels {
                        break;
                    }
                    result.push(OrderBookEntry {
                        price: order.price,
                        quantity: order.leaves_quantity(),
                        order_count: 1,
                    });
                }
            }
        }
        result
    }

    pub fn snapshot(&self, levels: usize) -> OrderBookSnapshot {
        let mut snapshot = OrderBookSnapshot::new(self.symbol.clone());
        snapshot.bids = self.depth(OrderSide::Buy, levels);
        snapshot.asks = self.depth(OrderSide::Sell, levels);
        snapshot
    }

    fn resolve<'a, K: PriorityKey + 'a>(&self, keys: impl Iterator<Item = &'a K>) -> Vec<&Order> {
        keys.filter_map(|k| self.orders.get(k.order_id())).collect()
    }

    fn first_available<'a, K: PriorityKey + 'a>(
        &self,
        mut keys: impl Iterator<Item = &'a K>,
    ) -> Option<String> {
        keys.find(|k| !self.checked_out.contains(k.order_id()))
            .map(|k| k.order_id().to_string())
    }

    fn enqueue(&mut self, order: &Order) {
        match order.side {
            OrderSide::Buy => self.bids.insert(order),
            OrderSide::Sell => self.asks.insert(order),
        };
    }

    fn dequeue(&mut self, order: &Order) {
        match order.side {
            OrderSide::Buy => self.bids.remove(order),
            OrderSide::Sell => self.asks.remove(order),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderStatus;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    fn create_test_order(id: &str, side: OrderSide, price: i64, secs: i64) -> Order {
        Order::new(
            id,
            "acct-1",
            "ABC",
            side,
            Decimal::from(price),
            Decimal::from(1),
            t0() + Duration::seconds(secs),
        )
    }

    fn drain(book: &mut OrderBook, side: OrderSide) -> Vec<String> {
        std::iter::from_fn(|| book.pop_best(side).map(|o| o.order_id)).collect()
    }

    #[test]
    fn test_bids_pop_by_price_desc_then_time() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("a", OrderSide::Buy, 100, 2));
        book.add(create_test_order("b", OrderSide::Buy, 101, 3));
        book.add(create_test_order("c", OrderSide::Buy, 100, 1));
        book.add(create_test_order("d", OrderSide::Buy, 99, 0));

        assert_eq!(drain(&mut book, OrderSide::Buy), vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_asks_pop_by_price_asc_then_time() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("a", OrderSide::Sell, 100, 2));
        book.add(create_test_order("b", OrderSide::Sell, 101, 0));
        book.add(create_test_order("c", OrderSide::Sell, 100, 1));
        book.add(create_test_order("d", OrderSide::Sell, 99, 3));

        assert_eq!(drain(&mut book, OrderSide::Sell), vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn test_pop_empty_side_returns_none() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("a", OrderSide::Buy, 100, 0));

        assert!(book.pop_best(OrderSide::Sell).is_none());
        assert!(book.peek_best(OrderSide::Sell).is_none());
    }

    #[test]
    fn test_peek_does_not_remove() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("a", OrderSide::Buy, 100, 0));

        assert_eq!(book.peek_best(OrderSide::Buy).unwrap().order_id, "a");
        assert_eq!(book.bid_count(), 1);
        assert!(!book.is_in_flight("a"));
    }

    #[test]
    fn test_restore_keeps_position_among_peers() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("early", OrderSide::Buy, 100, 0));
        book.add(create_test_order("late", OrderSide::Buy, 100, 5));

        let popped = book.pop_best(OrderSide::Buy).unwrap();
        assert_eq!(popped.order_id, "early");
        assert!(book.is_in_flight("early"));

        assert!(book.restore("early"));
        assert!(!book.is_in_flight("early"));
        assert_eq!(drain(&mut book, OrderSide::Buy), vec!["early", "late"]);
    }

    #[test]
    fn test_checked_out_order_stays_visible_but_is_skipped() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("best", OrderSide::Buy, 12, 0));
        book.add(create_test_order("second", OrderSide::Buy, 9, 0));
        let before = book.snapshot(10);

        assert_eq!(book.pop_best(OrderSide::Buy).unwrap().order_id, "best");

        assert_eq!(book.peek_best(OrderSide::Buy).unwrap().order_id, "best");
        assert_eq!(book.snapshot(10).bids, before.bids);
        assert_eq!(book.orders_in_priority(OrderSide::Buy).len(), 2);
        assert_eq!(book.pop_best(OrderSide::Buy).unwrap().order_id, "second");
        assert!(book.pop_best(OrderSide::Buy).is_none());

        assert!(book.restore("best"));
        assert!(book.restore("second"));
        assert_eq!(book.pop_best(OrderSide::Buy).unwrap().order_id, "best");
    }

    #[test]
    fn test_restore_twice_is_rejected() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("a", OrderSide::Sell, 100, 0));

        assert!(!book.restore("a"));
        assert!(!book.restore("missing"));
        assert_eq!(book.ask_count(), 1);
    }

    #[test]
    fn test_duplicate_add_is_rejected_and_keeps_original() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("a", OrderSide::Buy, 100, 0));
        book.add(create_test_order("b", OrderSide::Buy, 100, 1));

        let dup = create_test_order("a", OrderSide::Buy, 200, 9);
        assert!(!book.add(dup));

        assert_eq!(book.get("a").unwrap().price, Decimal::from(100));
        assert_eq!(drain(&mut book, OrderSide::Buy), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_add_rejected_while_checked_out() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("a", OrderSide::Buy, 100, 0));
        book.pop_best(OrderSide::Buy);

        assert!(!book.add(create_test_order("a", OrderSide::Buy, 100, 0)));
        assert_eq!(book.bid_count(), 1);
        assert!(book.is_in_flight("a"));
    }

    #[test]
    fn test_closed_order_is_never_queued() {
        let mut book = OrderBook::new("ABC");
        let mut order = create_test_order("a", OrderSide::Buy, 100, 0);
        order.status = OrderStatus::Closed;

        assert!(!book.add(order));
        assert!(book.is_empty());
    }

    #[test]
    fn test_cancel_resting_order() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("a", OrderSide::Sell, 100, 0));
        book.add(create_test_order("b", OrderSide::Sell, 101, 0));

        let canceled = book.cancel("a").unwrap();
        assert_eq!(canceled.order_id, "a");
        assert!(!book.contains("a"));
        assert_eq!(drain(&mut book, OrderSide::Sell), vec!["b"]);
    }

    #[test]
    fn test_cancel_unknown_and_in_flight() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("a", OrderSide::Sell, 100, 0));
        book.pop_best(OrderSide::Sell);

        assert_eq!(
            book.cancel("zzz"),
            Err(IngestError::OrderNotFound { order_id: "zzz".into() })
        );
        let err = book.cancel("a").unwrap_err();
        assert!(err.is_retryable());
        assert!(book.contains("a"));
    }

    #[test]
    fn test_finalize_close_removes_from_index() {
        let mut book = OrderBook::new("ABC");
        book.add(create_test_order("a", OrderSide::Buy, 100, 0));
        book.pop_best(OrderSide::Buy);

        assert!(book.finalize_close("a").is_some());
        assert!(!book.contains("a"));
        assert!(!book.restore("a"));
        assert!(book.finalize_close("a").is_none());
    }

    #[test]
    fn test_depth_aggregates_levels() {
        let mut book = OrderBook::new("ABC");
        for (i, price) in [100, 100, 102, 101, 103].iter().enumerate() {
            book.add(create_test_order(&format!("o{i}"), OrderSide::Buy, *price, i as i64));
        }

        let depth = book.depth(OrderSide::Buy, 3);
        assert_eq!(depth.len(), 3);
        assert_eq!(depth[0].price, Decimal::from(103));
        assert_eq!(depth[1].price, Decimal::from(102));
        assert_eq!(depth[2].price, Decimal::from(101));

        let all = book.depth(OrderSide::Buy, 10);
        assert_eq!(all[3].price, Decimal::from(100));
        assert_eq!(all[3].order_count, 2);
        assert_eq!(all[3].quantity, Decimal::from(2));
    }

    proptest! {
        #[test]
        fn prop_bids_pop_in_price_time_order(
            entries in proptest::collection::btree_set((1i64..50, 0i64..50), 1..40)
        ) {
            let mut book = OrderBook::new("ABC");
            for (i, (price, secs)) in entries.iter().enumerate() {
                book.add(create_test_order(&format!("o{i}"), OrderSide::Buy, *price, *secs));
            }

            let mut popped = Vec::new();
            while let Some(order) = book.pop_best(OrderSide::Buy) {
                popped.push((order.price, order.order_time));
            }

            let mut expected: Vec<_> = popped.clone();
            expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
            prop_assert_eq!(popped, expected);
        }

        #[test]
        fn prop_asks_pop_in_price_time_order(
            entries in proptest::collection::btree_set((1i64..50, 0i64..50), 1..40)
        ) {
            let mut book = OrderBook::new("ABC");
            for (i, (price, secs)) in entries.iter().enumerate() {
                book.add(create_test_order(&format!("o{i}"), OrderSide::Sell, *price, *secs));
            }

            let mut popped = Vec::new();
            while let Some(order) = book.pop_best(OrderSide::Sell) {
                popped.push((order.price, order.order_time));
            }

            let mut expected: Vec<_> = popped.clone();
            expected.sort();
            prop_assert_eq!(popped, expected);
        }

        #[test]
        fn prop_pop_then_restore_is_identity(
            prices in proptest::collection::vec(1i64..5, 1..20)
        ) {
            let mut book = OrderBook::new("ABC");
            for (i, price) in prices.iter().enumerate() {
                book.add(create_test_order(&format!("o{i}"), OrderSide::Sell, *price, 0));
            }
            let before: Vec<String> = book
                .orders_in_priority(OrderSide::Sell)
                .iter()
                .map(|o| o.order_id.clone())
                .collect();

            let popped = book.pop_best(OrderSide::Sell).unwrap();
            prop_assert!(book.restore(&popped.order_id));

            prop_assert_eq!(drain(&mut book, OrderSide::Sell), before);
        }
    }
}
