// ===============================
// src/domain.rs
// ===============================
//
// Canonical records. Everything that crosses the service boundary is mapped
// into these types once (see normalize.rs); nothing downstream looks at the
// service's own field spellings.
//
use chrono::{Local, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transaction kind: SALES carries a debit, RECEIPT carries a credit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Particulars {
    #[default]
    Sales,
    Receipt,
}

impl Particulars {
    pub fn as_str(&self) -> &'static str {
        match self {
            Particulars::Sales => "SALES",
            Particulars::Receipt => "RECEIPT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SALES" | "SALE" => Some(Particulars::Sales),
            "RECEIPT" | "RECEIPTS" => Some(Particulars::Receipt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuyerTotals {
    pub total_weight: Decimal,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub balance: Decimal,
}

/// Buyer snapshot for one fetch cycle. `totals` are derived, never edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Buyer {
    pub name: String,
    pub totals: BuyerTotals,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// 1-based, per buyer, order-significant
    pub serial_number: u32,
    pub date: String,
    pub particulars: Particulars,
    pub weight: Option<Decimal>,
    pub rate_per_unit: Option<Decimal>,
    pub auto_rent: Option<Decimal>,
    pub debit: Option<Decimal>,
    pub credit: Option<Decimal>,
    pub running_balance: Decimal,
}

impl Transaction {
    pub fn debit_amount(&self) -> Decimal {
        self.debit.unwrap_or(Decimal::ZERO)
    }

    pub fn credit_amount(&self) -> Decimal {
        self.credit.unwrap_or(Decimal::ZERO)
    }

    pub fn weight_amount(&self) -> Decimal {
        self.weight.unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub purchaser_name: String,
    pub date: String,
    pub product_name: String,
    pub cost: Decimal,
    pub product_color: String,
    pub master_page: String,
    pub ld: String,
    pub hm: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentType {
    #[default]
    Full,
    Half,
    Quarter,
    Custom,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Full => "full",
            PaymentType::Half => "half",
            PaymentType::Quarter => "quarter",
            PaymentType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Some(PaymentType::Full),
            "half" | "50" | "50%" => Some(PaymentType::Half),
            "quarter" | "25" | "25%" => Some(PaymentType::Quarter),
            "custom" => Some(PaymentType::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[default]
    Cash,
    BankTransfer,
    Cheque,
    Upi,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Card => "card",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "bank_transfer" | "bank" | "transfer" => Some(PaymentMethod::BankTransfer),
            "cheque" | "check" => Some(PaymentMethod::Cheque),
            "upi" => Some(PaymentMethod::Upi),
            "card" => Some(PaymentMethod::Card),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Paid,
    Partial,
    Overpaid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Partial => "Partial",
            PaymentStatus::Overpaid => "Overpaid",
        }
    }
}

/// A payment as recorded locally. The service only ever sees the RECEIPT
/// transaction it turns into; remaining/status live here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub buyer: String,
    pub date: String,
    pub payment_type: PaymentType,
    pub due_amount: Decimal,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub method: PaymentMethod,
    pub notes: String,
    pub status: PaymentStatus,
}

impl Payment {
    /// The RECEIPT row this payment becomes: credit = paid amount, same date.
    pub fn to_receipt(&self) -> NewTransaction {
        let mut cmd = NewTransaction::receipt(self.buyer.clone(), self.paid_amount);
        cmd.date = self.date.clone();
        cmd
    }
}

// ---- Write commands ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub buyer_name: String,
    pub date: String,
    pub particulars: Particulars,
    pub weight: Option<Decimal>,
    pub rate_per_unit: Option<Decimal>,
    pub auto_rent: Option<Decimal>,
    pub debit: Option<Decimal>,
    pub credit: Option<Decimal>,
}

impl NewTransaction {
    /// RECEIPT for `credit`, dated today.
    pub fn receipt(buyer_name: impl Into<String>, credit: Decimal) -> Self {
        Self {
            buyer_name: buyer_name.into(),
            date: ledger_date_today(),
            particulars: Particulars::Receipt,
            weight: None,
            rate_per_unit: None,
            auto_rent: None,
            debit: None,
            credit: Some(credit),
        }
    }

    /// Provisional row used for the optimistic append. Running balance is
    /// filled in by the calculator afterwards.
    pub fn to_transaction(&self, serial_number: u32) -> Transaction {
        Transaction {
            serial_number,
            date: self.date.clone(),
            particulars: self.particulars,
            weight: self.weight,
            rate_per_unit: self.rate_per_unit,
            auto_rent: self.auto_rent,
            debit: self.debit,
            credit: self.credit,
            running_balance: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPurchase {
    pub purchaser_name: String,
    pub date: String,
    pub product_name: String,
    pub cost: Decimal,
    pub product_color: String,
    pub master_page: String,
    pub ld: String,
    pub hm: String,
}

impl NewPurchase {
    pub fn to_purchase(&self) -> Purchase {
        Purchase {
            purchaser_name: self.purchaser_name.clone(),
            date: self.date.clone(),
            product_name: self.product_name.clone(),
            cost: self.cost,
            product_color: self.product_color.clone(),
            master_page: self.master_page.clone(),
            ld: self.ld.clone(),
            hm: self.hm.clone(),
        }
    }
}

// ---- Dates ----
// Ledger dates are day-first strings (dd/mm/yyyy) and are never re-sorted.

pub fn ledger_date(d: NaiveDate) -> String {
    d.format("%d/%m/%Y").to_string()
}

pub fn ledger_date_today() -> String {
    ledger_date(Local::now().date_naive())
}

// ---- Journal ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LedgerEvent {
    Read { action: String, buyer: Option<String>, rows: usize },
    Write { req_id: u64, action: String, buyer: Option<String> },
    Payment(Payment),
    Failure { action: String, buyer: Option<String>, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ts_ms: i64,
    pub event: LedgerEvent,
}

impl JournalEntry {
    pub fn now(event: LedgerEvent) -> Self {
        Self { ts_ms: chrono::Utc::now().timestamp_millis(), event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn particulars_parse_is_case_insensitive() {
        assert_eq!(Particulars::parse("sales"), Some(Particulars::Sales));
        assert_eq!(Particulars::parse(" Receipt "), Some(Particulars::Receipt));
        assert_eq!(Particulars::parse("refund"), None);
    }

    #[test]
    fn ledger_date_is_day_first() {
        let d = NaiveDate::from_ymd_opt(2025, 1, 11).unwrap();
        assert_eq!(ledger_date(d), "11/01/2025");
    }

    #[test]
    fn receipt_command_is_credit_only() {
        let cmd = NewTransaction::receipt("Rajesh Kumar", Decimal::from(16213));
        assert_eq!(cmd.particulars, Particulars::Receipt);
        assert_eq!(cmd.credit, Some(Decimal::from(16213)));
        assert!(cmd.debit.is_none() && cmd.weight.is_none());
        let row = cmd.to_transaction(2);
        assert_eq!(row.serial_number, 2);
        assert_eq!(row.credit_amount(), Decimal::from(16213));
        assert_eq!(row.debit_amount(), Decimal::ZERO);
    }

    #[test]
    fn payment_receipt_carries_paid_amount_and_date() {
        let p = Payment {
            buyer: "Anita Sharma".into(),
            date: "02/02/2025".into(),
            payment_type: PaymentType::Half,
            due_amount: Decimal::from(3000),
            paid_amount: Decimal::from(1500),
            remaining_amount: Decimal::from(1500),
            method: PaymentMethod::Upi,
            notes: "first half".into(),
            status: PaymentStatus::Partial,
        };
        let cmd = p.to_receipt();
        assert_eq!(cmd.buyer_name, "Anita Sharma");
        assert_eq!(cmd.date, "02/02/2025");
        assert_eq!(cmd.particulars, Particulars::Receipt);
        assert_eq!(cmd.credit, Some(Decimal::from(1500)));
        assert!(cmd.debit.is_none() && cmd.weight.is_none() && cmd.rate_per_unit.is_none());
    }
}
