// ===============================
// src/client.rs
// ===============================
//
// RemoteLedgerClient: every read/write against the sheet service.
//
// Policy per call:
// 1) try the primary channel
// 2) on a transport failure (network, HTTP status, unparseable body) try the
//    other channel once; no backoff, no further retries
// 3) classify the payload:
//      reads  : array -> Loaded / Empty, {error} -> Service (terminal)
//      writes : {success:true} -> ack, {success:false|error} -> Service,
//               anything else -> EmptyAck
//
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::ClientSettings;
use crate::domain::{Buyer, NewPurchase, NewTransaction, Payment, Purchase, Transaction};
use crate::error::{ConfigError, Result, SyncError, TransportFailure};
use crate::ledger::format_money;
use crate::metrics::{FALLBACKS, LAT_REQUEST, REQUESTS, WRITES};
use crate::normalize;
use crate::transport::{Channel, SheetTransport};

/// Lifecycle of one logical request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum RequestState {
    #[default]
    Idle,
    Pending,
    Succeeded,
    Failed,
}

/// A read that reached the service and was understood.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome<T> {
    Loaded(Vec<T>),
    /// Well-formed but no rows. Not an error.
    Empty,
}

impl<T> ReadOutcome<T> {
    fn from_rows(rows: Vec<T>) -> Self {
        if rows.is_empty() {
            ReadOutcome::Empty
        } else {
            ReadOutcome::Loaded(rows)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ReadOutcome::Loaded(v) => v.len(),
            ReadOutcome::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            ReadOutcome::Loaded(v) => v,
            ReadOutcome::Empty => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub req_id: u64,
    pub channel: Channel,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buyers,
    Transactions,
    Purchases,
    AddTransaction,
    AddPurchase,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buyers => "buyers",
            Action::Transactions => "transactions",
            Action::Purchases => "purchases",
            Action::AddTransaction => "addTransaction",
            Action::AddPurchase => "addPurchase",
        }
    }
}

pub struct RemoteLedgerClient {
    transport: SheetTransport,
    primary: Channel,
    next_req: AtomicU64,
}

impl RemoteLedgerClient {
    pub fn new(settings: &ClientSettings) -> std::result::Result<Self, ConfigError> {
        let transport = SheetTransport::new(
            settings.endpoint.clone(),
            settings.timeout,
            &settings.callback_prefix,
        )?;
        Ok(Self { transport, primary: settings.primary, next_req: AtomicU64::new(1) })
    }

    pub fn primary(&self) -> Channel {
        self.primary
    }

    pub fn transport(&self) -> &SheetTransport {
        &self.transport
    }

    // ---- Reads ----

    pub async fn list_buyers(&self) -> Result<ReadOutcome<Buyer>> {
        let rows = self.read_rows(Action::Buyers, Vec::new()).await?;
        Ok(ReadOutcome::from_rows(normalize::buyers(&rows)))
    }

    pub async fn list_transactions(&self, buyer_name: &str) -> Result<ReadOutcome<Transaction>> {
        let params = vec![("buyerName".to_string(), buyer_name.to_string())];
        let rows = self.read_rows(Action::Transactions, params).await?;
        Ok(ReadOutcome::from_rows(normalize::transactions(&rows)))
    }

    pub async fn list_purchases(&self) -> Result<ReadOutcome<Purchase>> {
        let rows = self.read_rows(Action::Purchases, Vec::new()).await?;
        Ok(ReadOutcome::from_rows(normalize::purchases(&rows)))
    }

    // ---- Writes ----

    pub async fn add_transaction(&self, cmd: &NewTransaction) -> Result<WriteAck> {
        self.write(Action::AddTransaction, transaction_params(cmd)).await
    }

    pub async fn add_purchase(&self, cmd: &NewPurchase) -> Result<WriteAck> {
        self.write(Action::AddPurchase, purchase_params(cmd)).await
    }

    /// A payment goes out as its RECEIPT (`Payment::to_receipt`). Remaining
    /// amount and status are computed locally and never expected back.
    pub async fn record_payment(&self, payment: &Payment, receipt: &NewTransaction) -> Result<WriteAck> {
        let mut params = transaction_params(receipt);
        params.push(("paymentType".to_string(), payment.payment_type.as_str().to_string()));
        params.push(("paymentMethod".to_string(), payment.method.as_str().to_string()));
        params.push(("notes".to_string(), payment.notes.clone()));
        self.write(Action::AddTransaction, params).await
    }

    // ---- Internals ----

    async fn read_rows(&self, action: Action, params: Vec<(String, String)>) -> Result<Vec<Value>> {
        let (req_id, channel, payload) = self.call(action, params).await?;
        let rows = classify_rows(payload).map_err(|e| {
            error!(req_id, action = action.as_str(), %channel, %e, "read rejected");
            e
        })?;
        info!(req_id, action = action.as_str(), %channel, rows = rows.len(), "read ok");
        Ok(rows)
    }

    async fn write(&self, action: Action, params: Vec<(String, String)>) -> Result<WriteAck> {
        let res = match self.call(action, params).await {
            Ok((req_id, channel, payload)) => {
                classify_ack(action, payload).map(|message| WriteAck { req_id, channel, message })
            }
            Err(e) => Err(e),
        };
        match &res {
            Ok(ack) => {
                WRITES.with_label_values(&[action.as_str(), "ok"]).inc();
                info!(req_id = ack.req_id, action = action.as_str(), channel = %ack.channel, "write acknowledged");
            }
            Err(e) => {
                WRITES.with_label_values(&[action.as_str(), "failed"]).inc();
                error!(action = action.as_str(), %e, "write failed");
            }
        }
        res
    }

    /// Primary, then fallback. Returns the payload and the channel that
    /// delivered it.
    async fn call(
        &self,
        action: Action,
        mut params: Vec<(String, String)>,
    ) -> Result<(u64, Channel, Value)> {
        let req_id = self.next_req.fetch_add(1, Ordering::Relaxed);
        params.insert(0, ("action".to_string(), action.as_str().to_string()));

        let mut failures: Vec<TransportFailure> = Vec::with_capacity(2);
        for channel in [self.primary, self.primary.other()] {
            if !failures.is_empty() {
                FALLBACKS.with_label_values(&[action.as_str()]).inc();
                debug!(req_id, action = action.as_str(), %channel, "trying fallback channel");
            }
            let started = Instant::now();
            let res = self.transport.fetch(channel, req_id, &params).await;
            LAT_REQUEST.observe(started.elapsed().as_secs_f64() * 1000.0);
            match res {
                Ok(payload) => {
                    REQUESTS.with_label_values(&[action.as_str(), channel.as_str(), "ok"]).inc();
                    return Ok((req_id, channel, payload));
                }
                Err(reason) => {
                    REQUESTS.with_label_values(&[action.as_str(), channel.as_str(), "error"]).inc();
                    warn!(req_id, action = action.as_str(), %channel, %reason, "transport failed");
                    failures.push(TransportFailure { channel, reason });
                }
            }
        }
        error!(req_id, action = action.as_str(), "all channels failed");
        Err(SyncError::Transport(failures))
    }
}

/// Non-empty `error` field, if the payload carries one.
fn error_message(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

fn classify_rows(payload: Value) -> Result<Vec<Value>> {
    match payload {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        Value::Object(obj) => {
            if let Some(msg) = error_message(&obj) {
                return Err(SyncError::Service(msg));
            }
            match obj.get("data") {
                Some(Value::Array(rows)) => Ok(rows.clone()),
                _ if obj.is_empty() => Ok(Vec::new()),
                _ => Err(SyncError::Decode("expected a list of records".into())),
            }
        }
        other => Err(SyncError::Decode(format!("expected a list of records, got {other}"))),
    }
}

fn classify_ack(action: Action, payload: Value) -> Result<Option<String>> {
    let obj = match payload {
        Value::Object(obj) if !obj.is_empty() => obj,
        _ => return Err(SyncError::EmptyAck(action.as_str().to_string())),
    };
    let success = obj.get("success").and_then(Value::as_bool);
    if success == Some(true) {
        let message = obj.get("message").and_then(Value::as_str).map(str::to_string);
        return Ok(message);
    }
    if let Some(msg) = error_message(&obj) {
        return Err(SyncError::Service(msg));
    }
    match success {
        Some(false) => Err(SyncError::Service(format!("{} was rejected", action.as_str()))),
        _ => Err(SyncError::EmptyAck(action.as_str().to_string())),
    }
}

fn opt_text(v: Option<rust_decimal::Decimal>) -> String {
    v.map(|d| d.normalize().to_string()).unwrap_or_default()
}

fn opt_money(v: Option<rust_decimal::Decimal>) -> String {
    v.map(format_money).unwrap_or_default()
}

/// Query parameters for addTransaction. Blank fields are sent as "".
pub fn transaction_params(cmd: &NewTransaction) -> Vec<(String, String)> {
    vec![
        ("buyerName".to_string(), cmd.buyer_name.clone()),
        ("date".to_string(), cmd.date.clone()),
        ("particulars".to_string(), cmd.particulars.as_str().to_string()),
        ("weight".to_string(), opt_text(cmd.weight)),
        ("inrPerKg".to_string(), opt_text(cmd.rate_per_unit)),
        ("autoRent".to_string(), opt_money(cmd.auto_rent)),
        ("debit".to_string(), opt_money(cmd.debit)),
        ("credit".to_string(), opt_money(cmd.credit)),
    ]
}

pub fn purchase_params(cmd: &NewPurchase) -> Vec<(String, String)> {
    vec![
        ("purchaserName".to_string(), cmd.purchaser_name.clone()),
        ("date".to_string(), cmd.date.clone()),
        ("productName".to_string(), cmd.product_name.clone()),
        ("cost".to_string(), format_money(cmd.cost)),
        ("productColor".to_string(), cmd.product_color.clone()),
        ("masterPage".to_string(), cmd.master_page.clone()),
        ("ld".to_string(), cmd.ld.clone()),
        ("hm".to_string(), cmd.hm.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Particulars;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn rows_classification() {
        assert_eq!(classify_rows(json!([{"name": "a"}])).unwrap().len(), 1);
        assert!(classify_rows(json!([])).unwrap().is_empty());
        assert!(classify_rows(json!(null)).unwrap().is_empty());
        assert!(matches!(
            classify_rows(json!({"error": "Sheet not found"})),
            Err(SyncError::Service(m)) if m == "Sheet not found"
        ));
        assert!(matches!(classify_rows(json!("hello")), Err(SyncError::Decode(_))));
    }

    #[test]
    fn ack_classification() {
        assert_eq!(
            classify_ack(Action::AddPurchase, json!({"success": true, "message": "ok"})).unwrap(),
            Some("ok".to_string())
        );
        assert!(matches!(
            classify_ack(Action::AddPurchase, json!({"success": false, "error": "locked"})),
            Err(SyncError::Service(m)) if m == "locked"
        ));
        assert!(matches!(
            classify_ack(Action::AddPurchase, json!({"success": false})),
            Err(SyncError::Service(_))
        ));
        assert!(matches!(classify_ack(Action::AddTransaction, json!({})), Err(SyncError::EmptyAck(_))));
        assert!(matches!(classify_ack(Action::AddTransaction, json!(null)), Err(SyncError::EmptyAck(_))));
        assert!(matches!(classify_ack(Action::AddTransaction, json!([])), Err(SyncError::EmptyAck(_))));
    }

    #[test]
    fn sales_params_leave_credit_blank() {
        let cmd = NewTransaction {
            buyer_name: "Rajesh Kumar".into(),
            date: "11/01/2025".into(),
            particulars: Particulars::Sales,
            weight: Some(Decimal::from_str("108.20").unwrap()),
            rate_per_unit: Some(Decimal::from(95)),
            auto_rent: None,
            debit: Some(Decimal::from(10279)),
            credit: None,
        };
        let params = transaction_params(&cmd);
        let get = |k: &str| params.iter().find(|(n, _)| n == k).map(|(_, v)| v.as_str());
        assert_eq!(get("particulars"), Some("SALES"));
        assert_eq!(get("weight"), Some("108.2"));
        assert_eq!(get("inrPerKg"), Some("95"));
        assert_eq!(get("debit"), Some("10279.00"));
        assert_eq!(get("credit"), Some(""));
        assert_eq!(get("autoRent"), Some(""));
    }
}
