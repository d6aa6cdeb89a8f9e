// ===============================
// src/ledger.rs
// ===============================
//
// Ledger arithmetic, no I/O:
// - debit        = round2(weight * rate)   (SALES only, rate default 95)
// - running bal  = bal[i-1] + debit[i] - credit[i], scanned in caller order
// - totals       = sum weight / debit / credit, balance = last running bal
// - payment plan = due * {1, 0.5, 0.25} or the custom amount as typed
//
// Blank or non-numeric input counts as zero. Partially filled forms must keep
// producing totals, so nothing in here returns an error except draft
// submission (form validation).
//
use rust_decimal::prelude::*;
use serde_json::Value;

use crate::domain::{
    Buyer, BuyerTotals, NewTransaction, Particulars, Payment, PaymentMethod, PaymentStatus,
    PaymentType, Purchase, Transaction,
};
use crate::error::SyncError;

/// Monetary values carry 2 decimal places, half away from zero.
pub const DECIMAL_PLACES: u32 = 2;

/// INR per kg when the rate field is blank.
pub const DEFAULT_RATE_PER_KG: Decimal = Decimal::from_parts(95, 0, 0, false, 0);

/// Largest magnitude read from a field (1e15). Anything past it is garbage.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_764_472_320, 232_830, 0, false, 0);

const HALF: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
const QUARTER: Decimal = Decimal::from_parts(25, 0, 0, false, 2);

#[inline]
pub fn round2(v: Decimal) -> Decimal {
    v.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Exactly two decimals: 10279 -> "10279.00".
pub fn format_money(v: Decimal) -> String {
    let mut r = round2(v);
    r.rescale(DECIMAL_PLACES);
    r.to_string()
}

// ---- Coercion ----

/// Text field -> amount. Blank / garbage -> 0.
pub fn coerce_amount(s: &str) -> Decimal {
    parse_amount(s).unwrap_or(Decimal::ZERO)
}

/// JSON value -> amount. Numbers and numeric strings are accepted, the rest is 0.
pub fn coerce_value(v: &Value) -> Decimal {
    coerce_optional(v).unwrap_or(Decimal::ZERO)
}

/// Like `coerce_value` but keeps "no value" distinguishable from zero.
pub fn coerce_optional(v: &Value) -> Option<Decimal> {
    match v {
        // lewat string supaya 108.2 tetap 108.2 (bukan 108.2000000000000028...)
        Value::Number(n) => parse_amount(&n.to_string()),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

fn parse_amount(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
        .filter(|v| v.abs() <= MAX_AMOUNT)
}

/// Saturates at Decimal::MIN / MAX instead of panicking.
#[inline]
fn sat_add(a: Decimal, b: Decimal) -> Decimal {
    a.checked_add(b).unwrap_or(if b.is_sign_negative() { Decimal::MIN } else { Decimal::MAX })
}

/// Rate actually used for a SALES row. Blank, garbage and zero fall back to 95.
pub fn effective_rate(rate: Option<Decimal>) -> Decimal {
    match rate {
        Some(r) if !r.is_zero() => r,
        _ => DEFAULT_RATE_PER_KG,
    }
}

// ---- LedgerCalculator ----

pub fn compute_debit(weight: Decimal, rate: Option<Decimal>) -> Decimal {
    let weight = weight.max(Decimal::ZERO);
    weight
        .checked_mul(effective_rate(rate))
        .map(round2)
        .unwrap_or(Decimal::MAX)
}

/// Running balance after each row, in the order given. Never re-sorted by date.
pub fn compute_running_balances(transactions: &[Transaction]) -> Vec<Decimal> {
    let mut bal = Decimal::ZERO;
    transactions
        .iter()
        .map(|t| {
            bal = sat_add(sat_add(bal, t.debit_amount()), -t.credit_amount());
            bal
        })
        .collect()
}

/// Fills `running_balance` and any missing serial number (1-based, positional).
pub fn apply_running_balances(transactions: &mut [Transaction]) {
    let balances = compute_running_balances(transactions);
    for (i, (t, bal)) in transactions.iter_mut().zip(balances).enumerate() {
        if t.serial_number == 0 {
            t.serial_number = (i + 1) as u32;
        }
        t.running_balance = bal;
    }
}

pub fn aggregate(transactions: &[Transaction]) -> BuyerTotals {
    let mut totals = BuyerTotals::default();
    for t in transactions {
        totals.total_weight = sat_add(totals.total_weight, t.weight_amount());
        totals.total_debit = sat_add(totals.total_debit, t.debit_amount());
        totals.total_credit = sat_add(totals.total_credit, t.credit_amount());
    }
    totals.balance = compute_running_balances(transactions)
        .last()
        .copied()
        .unwrap_or(Decimal::ZERO);
    totals
}

/// Buyer snapshot whose totals come from its transaction list.
pub fn buyer_from_transactions(name: &str, transactions: &[Transaction]) -> Buyer {
    Buyer { name: name.to_string(), totals: aggregate(transactions) }
}

pub fn derive_payment_plan(due: Decimal, payment_type: PaymentType, custom_paid: Decimal) -> Decimal {
    match payment_type {
        PaymentType::Full => round2(due),
        PaymentType::Half => round2(due * HALF),
        PaymentType::Quarter => round2(due * QUARTER),
        PaymentType::Custom => custom_paid,
    }
}

pub fn payment_status(remaining: Decimal) -> PaymentStatus {
    if remaining.is_zero() {
        PaymentStatus::Paid
    } else if remaining.is_sign_positive() {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Overpaid
    }
}

// ---- Search ----

pub fn filter_buyers<'a>(buyers: &'a [Buyer], term: &str) -> Vec<&'a Buyer> {
    let needle = term.trim().to_lowercase();
    buyers
        .iter()
        .filter(|b| b.name.to_lowercase().contains(&needle))
        .collect()
}

pub fn filter_purchases<'a>(purchases: &'a [Purchase], term: &str) -> Vec<&'a Purchase> {
    let needle = term.trim().to_lowercase();
    purchases
        .iter()
        .filter(|p| {
            p.purchaser_name.to_lowercase().contains(&needle)
                || p.product_name.to_lowercase().contains(&needle)
        })
        .collect()
}

// ---- Form drafts ----

/// Transaction entry form. Fields stay as typed text; SALES debit is
/// re-derived whenever weight or rate changes.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDraft {
    pub buyer_name: String,
    pub particulars: Particulars,
    pub weight: String,
    pub rate: String,
    pub auto_rent: String,
    pub debit: String,
    pub credit: String,
}

impl Default for TransactionDraft {
    fn default() -> Self {
        Self {
            buyer_name: String::new(),
            particulars: Particulars::Sales,
            weight: String::new(),
            rate: DEFAULT_RATE_PER_KG.to_string(),
            auto_rent: String::new(),
            debit: String::new(),
            credit: String::new(),
        }
    }
}

impl TransactionDraft {
    pub fn new(buyer_name: impl Into<String>, particulars: Particulars) -> Self {
        Self { buyer_name: buyer_name.into(), particulars, ..Default::default() }
    }

    /// Switching kind clears the fields the new kind does not carry.
    pub fn set_particulars(&mut self, p: Particulars) {
        if p != self.particulars {
            match p {
                Particulars::Sales => self.credit.clear(),
                Particulars::Receipt => {
                    self.weight.clear();
                    self.debit.clear();
                    self.rate = DEFAULT_RATE_PER_KG.to_string();
                }
            }
        }
        self.particulars = p;
        self.rederive_debit();
    }

    pub fn set_weight(&mut self, v: &str) {
        self.weight = v.to_string();
        self.rederive_debit();
    }

    pub fn set_rate(&mut self, v: &str) {
        self.rate = v.to_string();
        self.rederive_debit();
    }

    pub fn set_auto_rent(&mut self, v: &str) {
        self.auto_rent = v.to_string();
    }

    pub fn set_credit(&mut self, v: &str) {
        self.credit = v.to_string();
    }

    fn rederive_debit(&mut self) {
        if self.particulars == Particulars::Sales && !self.weight.trim().is_empty() {
            let debit = compute_debit(coerce_amount(&self.weight), parse_amount(&self.rate));
            self.debit = format_money(debit);
        }
    }

    /// Command for the service. SALES keeps weight/rate/debit, RECEIPT keeps
    /// credit; auto rent goes with either.
    pub fn into_command(self, date: String) -> Result<NewTransaction, SyncError> {
        let buyer_name = self.buyer_name.trim().to_string();
        if buyer_name.is_empty() {
            return Err(SyncError::InvalidCommand("buyer name is required".into()));
        }
        let auto_rent = parse_amount(&self.auto_rent);
        match self.particulars {
            Particulars::Sales => {
                let weight = coerce_amount(&self.weight);
                if weight <= Decimal::ZERO {
                    return Err(SyncError::InvalidCommand("SALES needs a positive weight".into()));
                }
                let rate = effective_rate(parse_amount(&self.rate));
                Ok(NewTransaction {
                    buyer_name,
                    date,
                    particulars: Particulars::Sales,
                    weight: Some(weight),
                    rate_per_unit: Some(rate),
                    auto_rent,
                    debit: Some(compute_debit(weight, Some(rate))),
                    credit: None,
                })
            }
            Particulars::Receipt => {
                let credit = round2(coerce_amount(&self.credit));
                if credit <= Decimal::ZERO {
                    return Err(SyncError::InvalidCommand("RECEIPT needs a positive credit".into()));
                }
                Ok(NewTransaction {
                    buyer_name,
                    date,
                    particulars: Particulars::Receipt,
                    weight: None,
                    rate_per_unit: None,
                    auto_rent,
                    debit: None,
                    credit: Some(credit),
                })
            }
        }
    }
}

/// Payment handling form. `paid` follows `due` for full/half/quarter and is
/// left alone for custom.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentDraft {
    pub buyer: String,
    pub payment_type: PaymentType,
    pub due: String,
    pub paid: String,
    pub method: PaymentMethod,
    pub notes: String,
}

impl PaymentDraft {
    pub fn new(payment_type: PaymentType) -> Self {
        Self { payment_type, ..Default::default() }
    }

    /// Picking a buyer fills `due` from their outstanding balance.
    pub fn select_buyer(&mut self, name: impl Into<String>, outstanding: Decimal) {
        self.buyer = name.into();
        self.due = format_money(outstanding);
        if self.payment_type != PaymentType::Custom {
            self.rederive_paid(self.payment_type);
        }
    }

    pub fn set_payment_type(&mut self, t: PaymentType) {
        self.payment_type = t;
        if !self.due.trim().is_empty() {
            self.rederive_paid(t);
        }
    }

    pub fn set_due_amount(&mut self, v: &str) {
        self.due = v.to_string();
        if self.payment_type != PaymentType::Custom {
            self.rederive_paid(self.payment_type);
        }
    }

    /// Free entry, custom only. Returns false when the edit was ignored.
    pub fn set_custom_paid(&mut self, v: &str) -> bool {
        if self.payment_type != PaymentType::Custom {
            return false;
        }
        self.paid = v.to_string();
        true
    }

    pub fn set_method(&mut self, m: PaymentMethod) {
        self.method = m;
    }

    pub fn set_notes(&mut self, notes: &str) {
        self.notes = notes.to_string();
    }

    fn rederive_paid(&mut self, t: PaymentType) {
        let due = coerce_amount(&self.due);
        let paid = derive_payment_plan(due, t, coerce_amount(&self.paid));
        self.paid = format_money(paid);
    }

    pub fn finalize(&self, date: String) -> Result<Payment, SyncError> {
        let buyer = self.buyer.trim().to_string();
        if buyer.is_empty() {
            return Err(SyncError::InvalidCommand("buyer name is required".into()));
        }
        let due = round2(coerce_amount(&self.due));
        let paid = round2(coerce_amount(&self.paid));
        if paid <= Decimal::ZERO {
            return Err(SyncError::InvalidCommand("paid amount must be positive".into()));
        }
        let remaining = due - paid;
        Ok(Payment {
            buyer,
            date,
            payment_type: self.payment_type,
            due_amount: due,
            paid_amount: paid,
            remaining_amount: remaining,
            method: self.method,
            notes: self.notes.trim().to_string(),
            status: payment_status(remaining),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn sale(debit: &str) -> Transaction {
        Transaction { particulars: Particulars::Sales, debit: Some(dec(debit)), ..Default::default() }
    }

    fn receipt(credit: &str) -> Transaction {
        Transaction { particulars: Particulars::Receipt, credit: Some(dec(credit)), ..Default::default() }
    }

    #[test]
    fn debit_is_weight_times_rate() {
        assert_eq!(compute_debit(dec("108.2"), Some(dec("95"))), dec("10279.00"));
        assert_eq!(format_money(compute_debit(dec("108.2"), Some(dec("95")))), "10279.00");
    }

    #[test]
    fn debit_rate_defaults_to_95() {
        assert_eq!(compute_debit(dec("75.5"), None), dec("7172.5"));
        assert_eq!(compute_debit(dec("75.5"), Some(Decimal::ZERO)), dec("7172.5"));
        assert_eq!(compute_debit(dec("-3"), None), Decimal::ZERO);
    }

    #[test]
    fn running_balance_keeps_insertion_order() {
        let txs = vec![sale("10279"), receipt("16213"), sale("7162.5"), receipt("28000")];
        let bals = compute_running_balances(&txs);
        assert_eq!(bals, vec![dec("10279"), dec("-5934"), dec("1228.5"), dec("-26771.5")]);
        // idempotent
        assert_eq!(compute_running_balances(&txs), bals);
    }

    #[test]
    fn swapping_adjacent_rows_changes_later_balances() {
        let a = vec![sale("100"), receipt("40"), sale("10")];
        let b = vec![receipt("40"), sale("100"), sale("10")];
        let ba = compute_running_balances(&a);
        let bb = compute_running_balances(&b);
        assert_ne!(ba[0], bb[0]);
        // same multiset, same end
        assert_eq!(ba[2], bb[2]);

        let even = vec![sale("50"), receipt("50")];
        let even_swapped = vec![receipt("50"), sale("50")];
        assert_eq!(
            compute_running_balances(&even).last(),
            compute_running_balances(&even_swapped).last()
        );
    }

    #[test]
    fn aggregate_balance_matches_last_running_balance() {
        let mut txs = vec![sale("10279"), receipt("16213"), sale("7162.5"), receipt("28000")];
        txs[0].weight = Some(dec("108.2"));
        txs[2].weight = Some(dec("75.4"));
        let totals = aggregate(&txs);
        assert_eq!(totals.total_weight, dec("183.6"));
        assert_eq!(totals.total_debit, dec("17441.5"));
        assert_eq!(totals.total_credit, dec("44213"));
        assert_eq!(totals.balance, *compute_running_balances(&txs).last().unwrap());
        assert_eq!(totals.balance, totals.total_debit - totals.total_credit);
        assert_eq!(aggregate(&[]), BuyerTotals::default());
    }

    #[test]
    fn apply_fills_serials_and_balances() {
        let mut txs = vec![sale("10"), receipt("4")];
        txs[1].serial_number = 7;
        apply_running_balances(&mut txs);
        assert_eq!(txs[0].serial_number, 1);
        assert_eq!(txs[1].serial_number, 7);
        assert_eq!(txs[1].running_balance, dec("6"));
    }

    #[test]
    fn coercion_treats_garbage_as_zero() {
        assert_eq!(coerce_amount(""), Decimal::ZERO);
        assert_eq!(coerce_amount("abc"), Decimal::ZERO);
        assert_eq!(coerce_amount(" 12.5 "), dec("12.5"));
        assert_eq!(coerce_value(&serde_json::json!(108.2)), dec("108.2"));
        assert_eq!(coerce_value(&serde_json::json!("95")), dec("95"));
        assert_eq!(coerce_value(&serde_json::json!(null)), Decimal::ZERO);
        assert_eq!(coerce_optional(&serde_json::json!("")), None);
    }

    #[test]
    fn payment_plan_fractions() {
        let due = dec("11952.5");
        assert_eq!(derive_payment_plan(due, PaymentType::Full, Decimal::ZERO), dec("11952.50"));
        assert_eq!(derive_payment_plan(due, PaymentType::Half, Decimal::ZERO), dec("5976.25"));
        assert_eq!(derive_payment_plan(due, PaymentType::Quarter, Decimal::ZERO), dec("2988.13"));
        assert_eq!(derive_payment_plan(due, PaymentType::Custom, dec("700")), dec("700"));
    }

    #[test]
    fn totals_saturate_instead_of_overflowing() {
        let near_max = Transaction {
            particulars: Particulars::Sales,
            debit: Some(Decimal::MAX),
            ..Default::default()
        };
        let txs = vec![near_max.clone(), near_max, receipt("1")];
        let bals = compute_running_balances(&txs);
        assert_eq!(bals, vec![Decimal::MAX, Decimal::MAX, Decimal::MAX - Decimal::ONE]);

        let totals = aggregate(&txs);
        assert_eq!(totals.total_debit, Decimal::MAX);
        assert_eq!(totals.total_credit, dec("1"));
        assert_eq!(compute_debit(Decimal::MAX, Some(dec("2"))), Decimal::MAX);
    }

    #[test]
    fn amounts_past_the_cap_read_as_garbage() {
        assert_eq!(MAX_AMOUNT, Decimal::from(1_000_000_000_000_000i64));
        assert_eq!(coerce_amount("1000000000000000"), MAX_AMOUNT);
        assert_eq!(coerce_amount("1000000000000000.01"), Decimal::ZERO);
        assert_eq!(coerce_amount("-79228162514264337593543950335"), Decimal::ZERO);
        assert_eq!(coerce_optional(&Value::from("1e20")), None);
    }

    #[test]
    fn selecting_a_buyer_keeps_a_custom_amount() {
        let mut d = PaymentDraft::new(PaymentType::Custom);
        d.select_buyer("Anita Sharma", dec("3000"));
        assert_eq!(d.due, "3000.00");
        assert_eq!(d.paid, "");

        assert!(d.set_custom_paid("1250.5"));
        d.select_buyer("Rajesh Kumar", dec("11952.5"));
        assert_eq!(d.paid, "1250.5");
    }

    #[test]
    fn payment_draft_custom_survives_due_edits() {
        let mut d = PaymentDraft::new(PaymentType::Custom);
        d.select_buyer("Rajesh Kumar", dec("11952.5"));
        assert!(d.set_custom_paid("5000"));
        d.set_due_amount("20000");
        assert_eq!(d.paid, "5000");

        d.set_payment_type(PaymentType::Half);
        assert_eq!(d.paid, "10000.00");
        d.set_due_amount("11952.5");
        assert_eq!(d.paid, "5976.25");
        assert!(!d.set_custom_paid("1"));
    }

    #[test]
    fn payment_status_from_remaining() {
        let mut d = PaymentDraft::new(PaymentType::Full);
        d.select_buyer("Amit Patel", dec("13163"));
        let p = d.finalize("01/03/2025".into()).unwrap();
        assert_eq!(p.remaining_amount, Decimal::ZERO);
        assert_eq!(p.status, PaymentStatus::Paid);

        d.set_payment_type(PaymentType::Quarter);
        assert_eq!(d.finalize("x".into()).unwrap().status, PaymentStatus::Partial);

        d.set_payment_type(PaymentType::Custom);
        d.set_custom_paid("20000");
        let p = d.finalize("x".into()).unwrap();
        assert_eq!(p.status, PaymentStatus::Overpaid);
        assert_eq!(p.remaining_amount, dec("-6837"));
    }

    #[test]
    fn sales_draft_rederives_debit() {
        let mut d = TransactionDraft::new("Priya Sharma", Particulars::Sales);
        d.set_weight("167.5");
        assert_eq!(d.debit, "15912.50");
        d.set_rate("100");
        assert_eq!(d.debit, "16750.00");
        d.set_rate("");
        assert_eq!(d.debit, "15912.50");

        let cmd = d.into_command("24/01/2025".into()).unwrap();
        assert_eq!(cmd.debit, Some(dec("15912.5")));
        assert_eq!(cmd.rate_per_unit, Some(dec("95")));
        assert!(cmd.credit.is_none());
    }

    #[test]
    fn receipt_draft_drops_sales_fields() {
        let mut d = TransactionDraft::new("Priya Sharma", Particulars::Sales);
        d.set_weight("10");
        d.set_particulars(Particulars::Receipt);
        assert!(d.weight.is_empty() && d.debit.is_empty());
        d.set_credit("20000");
        d.set_auto_rent("150");
        let cmd = d.into_command("15/02/2025".into()).unwrap();
        assert_eq!(cmd.particulars, Particulars::Receipt);
        assert!(cmd.weight.is_none() && cmd.debit.is_none() && cmd.rate_per_unit.is_none());
        assert_eq!(cmd.auto_rent, Some(dec("150")));
    }

    #[test]
    fn draft_validation() {
        let d = TransactionDraft::new("  ", Particulars::Sales);
        assert!(matches!(d.into_command(String::new()), Err(SyncError::InvalidCommand(_))));
        let d = TransactionDraft::new("Ravi Verma", Particulars::Receipt);
        assert!(d.into_command(String::new()).is_err());
    }

    #[test]
    fn search_is_case_insensitive() {
        let buyers = vec![
            Buyer { name: "Rajesh Kumar".into(), ..Default::default() },
            Buyer { name: "Priya Sharma".into(), ..Default::default() },
        ];
        assert_eq!(filter_buyers(&buyers, "KUM").len(), 1);
        assert_eq!(filter_buyers(&buyers, "").len(), 2);

        let purchases = vec![Purchase {
            purchaser_name: "Mohan".into(),
            product_name: "Ivory Sheet".into(),
            ..Default::default()
        }];
        assert_eq!(filter_purchases(&purchases, "ivory").len(), 1);
        assert_eq!(filter_purchases(&purchases, "moh").len(), 1);
        assert!(filter_purchases(&purchases, "zzz").is_empty());
    }
}
