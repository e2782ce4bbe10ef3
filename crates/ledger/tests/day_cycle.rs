//! One user through a full trading day: open, partial close, settlement and
//! renewal into the next day.

use chrono::NaiveDate;
use og_core::types::{
    CommissionRate, ExchangeId, Instrument, InstrumentId, MarginRate, Offset, OrderInstruction,
    OrderRef, OrderSysId, Side, TradeReport, UserId,
};
use og_ledger::{SettlementInput, SettlementInputs, User, UserStatus};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn instrument() -> Instrument {
    Instrument {
        instrument_id: InstrumentId::new("rb2405"),
        exchange_id: ExchangeId::new("SHFE"),
        volume_multiple: 10,
        price_tick: 1.0,
        min_limit_order_volume: 1,
        max_limit_order_volume: 500,
    }
}

fn margin() -> MarginRate {
    MarginRate {
        long_ratio_by_money: 0.1,
        short_ratio_by_money: 0.1,
        ..Default::default()
    }
}

fn commission() -> CommissionRate {
    CommissionRate {
        open_ratio_by_volume: 1.0,
        close_ratio_by_volume: 1.0,
        close_today_ratio_by_volume: 2.0,
        ..Default::default()
    }
}

fn order(side: Side, offset: Offset, price: f64, volume: u32) -> OrderInstruction {
    OrderInstruction {
        user_id: UserId::new("alice"),
        instrument_id: InstrumentId::new("rb2405"),
        side,
        offset,
        price,
        volume,
    }
}

fn fill(id: &str, side: Side, offset: Offset, price: f64, volume: u32, d: NaiveDate) -> TradeReport {
    TradeReport {
        trade_id: id.into(),
        order_ref: OrderRef::new("000000000001"),
        order_sys_id: OrderSysId::new("1"),
        exchange_id: ExchangeId::new("SHFE"),
        instrument_id: InstrumentId::new("rb2405"),
        side,
        offset,
        price,
        volume,
        trading_day: d,
    }
}

#[test]
fn test_open_close_settle_renew() {
    let mut user = User::new(UserId::new("alice"), day(15), 100_000.0);

    // open 5 long @ 100: margin 500, commission 5
    let rsv = user
        .ledger
        .reserve_open(&order(Side::Buy, Offset::Open, 100.0, 5), &instrument(), &margin(), &commission())
        .unwrap();
    let booked = user.ledger.consume(rsv, 5).unwrap();
    user.positions.open_lot(
        &fill("t1", Side::Buy, Offset::Open, 100.0, 5, day(15)),
        &instrument(),
        booked.margin,
    );
    assert!((user.ledger.curr_margin() - 500.0).abs() < 1e-9);
    assert!((user.ledger.balance() - 99_995.0).abs() < 1e-9);

    // close 2 today @ 103: profit 60, commission 4, margin released 200
    let allocs = user
        .positions
        .reserve_close(
            &order(Side::Sell, Offset::Close, 103.0, 2),
            &instrument(),
            &commission(),
            day(15),
        )
        .unwrap();
    assert_eq!(allocs.len(), 1);
    let closed = user.positions.consume(allocs[0].reservation, 2, 103.0).unwrap();
    user.ledger.apply_close(&closed);
    assert!((user.ledger.close_profit() - 60.0).abs() < 1e-9);
    assert!((user.ledger.balance() - (99_995.0 + 60.0 - 4.0)).abs() < 1e-9);
    assert!((user.ledger.curr_margin() - 300.0).abs() < 1e-9);

    // settle @ 105
    let mut inputs = SettlementInputs::new();
    inputs.insert(
        InstrumentId::new("rb2405"),
        SettlementInput {
            instrument: instrument(),
            margin_rate: margin(),
            settlement_price: 105.0,
        },
    );
    let report = user.settle(&inputs).unwrap();
    // 100000 + 60 close profit + 150 position profit - 9 commission
    assert!((report.balance - 100_201.0).abs() < 1e-9);
    assert!((report.margin - 315.0).abs() < 1e-9);
    assert_eq!(report.remaining_lots, 1);
    assert_eq!(user.status(), UserStatus::Settled);

    // next day the lot is carried: a CloseToday finds nothing
    user.renew(day(18)).unwrap();
    assert!(user
        .positions
        .peek_close_lots(&order(Side::Sell, Offset::CloseToday, 105.0, 1), day(18))
        .is_none());
    let allocs = user
        .positions
        .reserve_close(
            &order(Side::Sell, Offset::CloseYesterday, 106.0, 3),
            &instrument(),
            &commission(),
            day(18),
        )
        .unwrap();
    let closed = user.positions.consume(allocs[0].reservation, 3, 106.0).unwrap();
    // measured against yesterday's settlement price
    assert!((closed.close_profit_by_date - 30.0).abs() < 1e-9);
    assert!((closed.close_profit_by_trade - 180.0).abs() < 1e-9);
    assert!((closed.commission - 3.0).abs() < 1e-9);
}
