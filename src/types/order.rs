use serde::{Deserialize, Serialize};

/// Side of a binary bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "win" => Some(Outcome::Win),
            "loss" => Some(Outcome::Loss),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Win => "win",
            Outcome::Loss => "loss",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A binary trade. `outcome`, `exit_price`, `manipulated_exit_price` and
/// `profit_loss` are written together exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub symbol_id: i64,
    pub amount: f64,
    pub direction: Direction,
    pub entry_price: f64,
    pub manipulated_entry_price: f64,
    pub exit_price: Option<f64>,
    pub manipulated_exit_price: Option<f64>,
    /// Seconds.
    pub duration: i64,
    /// Payout snapshotted from the symbol at creation.
    pub payout_percent: f64,
    pub outcome: Option<Outcome>,
    pub profit_loss: Option<f64>,
    /// Millis.
    pub created_at: i64,
    /// Millis, `created_at + duration * 1000`.
    pub expires_at: i64,
    /// Millis, set with the outcome.
    pub resolved_at: Option<i64>,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }

    /// Open and past expiry, awaiting the settlement transition.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.is_open() && self.expires_at <= now_ms
    }

    pub fn status(&self, now_ms: i64) -> OrderStatus {
        match self.outcome {
            Some(_) => OrderStatus::Historical,
            None if self.expires_at <= now_ms => OrderStatus::Settling,
            None => OrderStatus::Open,
        }
    }
}

/// Result of comparing exit against entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementResult {
    pub outcome: Outcome,
    pub profit_loss: f64,
    /// Amount returned to the balance: principal plus profit on a win, 0 on a loss.
    pub credit: f64,
}

/// Decide an order purely from its entry/exit manipulated prices.
///
/// Equal prices are a loss; there is no push.
pub fn settle(
    direction: Direction,
    manipulated_entry: f64,
    manipulated_exit: f64,
    amount: f64,
    payout_percent: f64,
) -> SettlementResult {
    let is_win = match direction {
        Direction::Up => manipulated_exit > manipulated_entry,
        Direction::Down => manipulated_exit < manipulated_entry,
    };

    if is_win {
        let profit = amount * (payout_percent / 100.0);
        SettlementResult {
            outcome: Outcome::Win,
            profit_loss: profit,
            credit: amount + profit,
        }
    } else {
        SettlementResult {
            outcome: Outcome::Loss,
            profit_loss: -amount,
            credit: 0.0,
        }
    }
}

/// Status filter of the order query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Unresolved and not yet expired.
    Open,
    /// Expired but not yet resolved.
    Settling,
    /// Resolved.
    Historical,
}

impl OrderStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(OrderStatus::Open),
            "settling" => Some(OrderStatus::Settling),
            "historical" | "closed" => Some(OrderStatus::Historical),
            _ => None,
        }
    }
}

/// Trade placement request. Direction stays a string so that it is validated
/// in the same ordered pass as the other preconditions.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub user_id: String,
    pub symbol_id: i64,
    pub amount: f64,
    pub direction: String,
    /// Seconds.
    pub duration: i64,
}

/// What a settlement attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// This call performed the transition.
    Resolved(Order),
    /// Someone else already did; nothing changed.
    AlreadyResolved(Order),
    /// Called before `expires_at`; nothing changed.
    NotDue(Order),
}

impl Settlement {
    pub fn order(&self) -> &Order {
        match self {
            Settlement::Resolved(o) | Settlement::AlreadyResolved(o) | Settlement::NotDue(o) => o,
        }
    }
}

/// Open and recently closed trades of one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesOverview {
    pub open_trades: Vec<Order>,
    pub closed_trades: Vec<Order>,
}

/// A user's balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub user_id: String,
    pub balance: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_up_win() {
        let result = settle(Direction::Up, 100.0, 105.0, 40.0, 80.0);
        assert_eq!(result.outcome, Outcome::Win);
        assert_eq!(result.profit_loss, 32.0);
        assert_eq!(result.credit, 72.0);
    }

    #[test]
    fn test_settle_down_loss() {
        let result = settle(Direction::Down, 100.0, 105.0, 40.0, 80.0);
        assert_eq!(result.outcome, Outcome::Loss);
        assert_eq!(result.profit_loss, -40.0);
        assert_eq!(result.credit, 0.0);
    }

    #[test]
    fn test_settle_tie_is_loss() {
        for direction in [Direction::Up, Direction::Down] {
            let result = settle(direction, 100.0, 100.0, 25.0, 90.0);
            assert_eq!(result.outcome, Outcome::Loss);
            assert_eq!(result.profit_loss, -25.0);
        }
    }

    #[test]
    fn test_settle_down_win_zero_payout() {
        let result = settle(Direction::Down, 100.0, 99.99, 10.0, 0.0);
        assert_eq!(result.outcome, Outcome::Win);
        assert_eq!(result.profit_loss, 0.0);
        assert_eq!(result.credit, 10.0);
    }

    #[test]
    fn test_order_status() {
        let order = Order {
            id: "o-1".to_string(),
            user_id: "u-1".to_string(),
            symbol_id: 1,
            amount: 10.0,
            direction: Direction::Up,
            entry_price: 100.0,
            manipulated_entry_price: 101.0,
            exit_price: None,
            manipulated_exit_price: None,
            duration: 30,
            payout_percent: 80.0,
            outcome: None,
            profit_loss: None,
            created_at: 0,
            expires_at: 30_000,
            resolved_at: None,
        };
        assert_eq!(order.status(29_999), OrderStatus::Open);
        assert_eq!(order.status(30_000), OrderStatus::Settling);
        assert!(order.is_due(30_000));

        let resolved = Order {
            outcome: Some(Outcome::Loss),
            ..order
        };
        assert_eq!(resolved.status(0), OrderStatus::Historical);
        assert!(!resolved.is_due(60_000));
    }

    #[test]
    fn test_enum_serialization() {
        assert_eq!(serde_json::to_string(&Direction::Up).unwrap(), "\"up\"");
        assert_eq!(serde_json::to_string(&Outcome::Loss).unwrap(), "\"loss\"");
        assert_eq!(OrderStatus::parse("historical"), Some(OrderStatus::Historical));
        assert_eq!(OrderStatus::parse("sideways"), None);
        assert_eq!(Direction::parse("sideways"), None);
    }
}
