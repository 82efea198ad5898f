use proptest::prelude::*;
use common::{Allocation, OrderSide, Position, Resolution, Symbol, TradingMode};
use risk::{FixedStopLoss, MaxPositions, MaxPositionsConfig, StopLossConfig};
use strategy::{AccountSnapshot, Context, IndicatorGraph, IndicatorRegistry, RiskManagement};

fn context(entry_price: f64, current_price: f64, quantity: f64, side: OrderSide) -> Context {
    let mut ctx = Context::new(IndicatorRegistry::new(IndicatorGraph::default(), Resolution::Day));
    ctx.set_account(AccountSnapshot {
        equity: 10_000.0,
        positions: vec![Position {
            id: "p1".into(),
            symbol: "TESTUSDT".into(),
            side,
            entry_price,
            quantity,
            mode: TradingMode::Paper,
            opened_at: chrono::Utc::now(),
        }],
    });
    ctx.record_price(&Symbol::from("TESTUSDT"), current_price);
    ctx
}

proptest! {
    /// Stop-loss evaluation on randomized prices never fails, and a breached
    /// symbol ends up with exactly one zero target.
    #[test]
    fn stop_loss_on_extreme_prices(
        entry_price in 0.0001f64..1_000_000.0f64,
        current_price in 0.0001f64..1_000_000.0f64,
        quantity in 0.0001f64..1000.0f64,
        percent_loss in 0.001f64..0.99,
        short in any::<bool>(),
    ) {
        let side = if short { OrderSide::Sell } else { OrderSide::Buy };
        let ctx = context(entry_price, current_price, quantity, side);
        let rule = FixedStopLoss::new(StopLossConfig { percent_loss });

        let out = rule
            .filter(&ctx, vec![Allocation::target("TESTUSDT", 0.5)])
            .unwrap();

        prop_assert_eq!(out.len(), 1);
        let pnl = ctx.positions()[0].unrealized_pct(current_price).unwrap();
        if pnl <= -percent_loss {
            prop_assert_eq!(&out[0], &Allocation::target("TESTUSDT", 0.0));
        } else {
            prop_assert_eq!(&out[0], &Allocation::target("TESTUSDT", 0.5));
        }
    }

    /// New entries admitted never push the number of open symbols past the limit.
    #[test]
    fn max_positions_never_exceeded(
        max in 1usize..=5,
        symbols in prop::collection::vec("[A-F]{3}", 0..20),
    ) {
        let ctx = context(100.0, 100.0, 1.0, OrderSide::Buy);
        let allocations: Vec<Allocation> = symbols
            .iter()
            .map(|s| Allocation::target(s.as_str(), 0.1))
            .collect();

        let out = MaxPositions::new(MaxPositionsConfig { max })
            .filter(&ctx, allocations)
            .unwrap();

        let mut open: std::collections::BTreeSet<&str> = out.iter().map(|a| a.symbol().as_str()).collect();
        open.insert("TESTUSDT");
        prop_assert!(open.len() <= max.max(1));
    }
}
