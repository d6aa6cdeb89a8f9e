// ===============================
// src/normalize.rs
// ===============================
//
// The sheet service is schema-less: the same column may arrive as `totalDebit`
// or `totaldebit`, numbers may be JSON numbers or strings, blanks are "".
// Each record is mapped once here, with a fallback chain per field
// (camelCase -> compact -> default).
//
use rust_decimal::prelude::*;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{Buyer, BuyerTotals, Particulars, Purchase, Transaction};
use crate::ledger::{apply_running_balances, coerce_optional, coerce_value, compute_debit, effective_rate};

const SERIAL: &[&str] = &["serialNumber", "sno", "sNo"];
const DATE: &[&str] = &["date"];
const PARTICULARS: &[&str] = &["particulars", "type"];
const WEIGHT: &[&str] = &["weight"];
const RATE: &[&str] = &["ratePerUnit", "inrPerKg", "inrkg"];
const AUTO_RENT: &[&str] = &["autoRent", "autorent"];
const DEBIT: &[&str] = &["debit"];
const CREDIT: &[&str] = &["credit"];

const BUYER_NAME: &[&str] = &["name", "buyerName", "buyername"];
const TOTAL_WEIGHT: &[&str] = &["totalWeight", "totalweight"];
const TOTAL_DEBIT: &[&str] = &["totalDebit", "totaldebit"];
const TOTAL_CREDIT: &[&str] = &["totalCredit", "totalcredit"];
const BALANCE: &[&str] = &["balance", "bal"];

const PURCHASER: &[&str] = &["purchaserName", "purchasername"];
const PRODUCT: &[&str] = &["productName", "productname"];
const COST: &[&str] = &["cost"];
const COLOR: &[&str] = &["productColor", "productcolor"];
const MASTER_PAGE: &[&str] = &["masterPage", "masterpage"];
const LD: &[&str] = &["ld"];
const HM: &[&str] = &["hm"];

/// First key holding something other than null / "".
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| obj.get(*k)).find(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

fn text(obj: &Map<String, Value>, keys: &[&str]) -> String {
    match field(obj, keys) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn amount(obj: &Map<String, Value>, keys: &[&str]) -> Decimal {
    field(obj, keys).map(coerce_value).unwrap_or(Decimal::ZERO)
}

fn optional_amount(obj: &Map<String, Value>, keys: &[&str]) -> Option<Decimal> {
    field(obj, keys).and_then(coerce_optional)
}

/// One transaction row. `index` is the row's position, used when the serial
/// number is missing.
pub fn transaction(index: usize, v: &Value) -> Option<Transaction> {
    let obj = v.as_object()?;
    let particulars = Particulars::parse(&text(obj, PARTICULARS)).unwrap_or_default();
    let serial_number = optional_amount(obj, SERIAL)
        .and_then(|d| d.to_u32())
        .filter(|n| *n > 0)
        .unwrap_or((index + 1) as u32);

    let mut t = Transaction {
        serial_number,
        date: text(obj, DATE),
        particulars,
        auto_rent: optional_amount(obj, AUTO_RENT),
        ..Default::default()
    };

    match particulars {
        Particulars::Sales => {
            let weight = optional_amount(obj, WEIGHT);
            let rate = effective_rate(optional_amount(obj, RATE));
            let debit = optional_amount(obj, DEBIT)
                .unwrap_or_else(|| compute_debit(weight.unwrap_or(Decimal::ZERO), Some(rate)));
            t.weight = weight;
            t.rate_per_unit = Some(rate);
            t.debit = Some(debit);
        }
        Particulars::Receipt => {
            t.credit = Some(amount(obj, CREDIT));
        }
    }
    Some(t)
}

/// Transaction list in service order, with running balances recomputed.
pub fn transactions(rows: &[Value]) -> Vec<Transaction> {
    let mut out: Vec<Transaction> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, v)| transaction(i, v))
        .collect();
    if out.len() != rows.len() {
        debug!(dropped = rows.len() - out.len(), "non-object transaction rows skipped");
    }
    apply_running_balances(&mut out);
    out
}

pub fn buyer(v: &Value) -> Option<Buyer> {
    let obj = v.as_object()?;
    let name = text(obj, BUYER_NAME);
    if name.is_empty() {
        return None;
    }
    let total_debit = amount(obj, TOTAL_DEBIT);
    let total_credit = amount(obj, TOTAL_CREDIT);
    let balance = optional_amount(obj, BALANCE).unwrap_or(total_debit - total_credit);
    Some(Buyer {
        name,
        totals: BuyerTotals {
            total_weight: amount(obj, TOTAL_WEIGHT),
            total_debit,
            total_credit,
            balance,
        },
    })
}

pub fn buyers(rows: &[Value]) -> Vec<Buyer> {
    rows.iter().filter_map(buyer).collect()
}

pub fn purchase(v: &Value) -> Option<Purchase> {
    let obj = v.as_object()?;
    Some(Purchase {
        purchaser_name: text(obj, PURCHASER),
        date: text(obj, DATE),
        product_name: text(obj, PRODUCT),
        cost: amount(obj, COST),
        product_color: text(obj, COLOR),
        master_page: text(obj, MASTER_PAGE),
        ld: text(obj, LD),
        hm: text(obj, HM),
    })
}

pub fn purchases(rows: &[Value]) -> Vec<Purchase> {
    rows.iter().filter_map(purchase).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn compact_and_camel_spellings_map_to_the_same_row() {
        let compact = json!({"sno": 1, "date": "11.01.2025", "particulars": "SALES",
                             "weight": 108.2, "inrkg": 95, "autorent": "", "debit": 10279, "bal": 10279});
        let camel = json!({"serialNumber": "1", "date": "11.01.2025", "particulars": "SALES",
                           "weight": "108.2", "inrPerKg": "95", "autoRent": "", "debit": "10279"});
        let a = transaction(0, &compact).unwrap();
        let b = transaction(0, &camel).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.rate_per_unit, Some(dec("95")));
        assert_eq!(a.auto_rent, None);
    }

    #[test]
    fn sales_debit_is_derived_when_blank() {
        let row = json!({"particulars": "SALES", "weight": "75.5", "inrPerKg": "", "debit": ""});
        let t = transaction(3, &row).unwrap();
        assert_eq!(t.serial_number, 4);
        assert_eq!(t.debit, Some(dec("7172.5")));
        assert_eq!(t.credit, None);
    }

    #[test]
    fn receipt_rows_are_credit_only() {
        let row = json!({"particulars": "receipt", "weight": "", "debit": "12", "credit": "16213"});
        let t = transaction(0, &row).unwrap();
        assert_eq!(t.particulars, Particulars::Receipt);
        assert_eq!(t.debit, None);
        assert_eq!(t.weight, None);
        assert_eq!(t.credit, Some(dec("16213")));
    }

    #[test]
    fn list_recomputes_running_balance_in_service_order() {
        let rows = vec![
            json!({"particulars": "SALES", "debit": 10279, "bal": 1}),
            json!({"particulars": "RECEIPT", "credit": 16213}),
            json!("garbage"),
            json!({"particulars": "SALES", "debit": 7162.5}),
        ];
        let txs = transactions(&rows);
        assert_eq!(txs.len(), 3);
        let bals: Vec<_> = txs.iter().map(|t| t.running_balance).collect();
        assert_eq!(bals, vec![dec("10279"), dec("-5934"), dec("1228.5")]);
    }

    #[test]
    fn buyer_totals_fallback_chain() {
        let b = buyer(&json!({"name": "Priya Sharma", "totalweight": 447.5,
                              "totalDebit": "42512.5", "totalcredit": 35000})).unwrap();
        assert_eq!(b.totals.total_weight, dec("447.5"));
        assert_eq!(b.totals.total_debit, dec("42512.5"));
        assert_eq!(b.totals.balance, dec("7512.5"));

        let b = buyer(&json!({"name": "Amit Patel", "bal": "13163"})).unwrap();
        assert_eq!(b.totals.balance, dec("13163"));
        assert!(buyer(&json!({"name": ""})).is_none());
    }

    #[test]
    fn purchase_fields() {
        let p = purchase(&json!({"purchasername": "Mohan", "productName": "Ivory", "cost": "1200.50",
                                 "productcolor": "white", "masterpage": "12", "ld": 3, "hm": "x"})).unwrap();
        assert_eq!(p.purchaser_name, "Mohan");
        assert_eq!(p.cost, dec("1200.50"));
        assert_eq!(p.product_color, "white");
        assert_eq!(p.master_page, "12");
        assert_eq!(p.ld, "3");
    }
}
