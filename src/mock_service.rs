// ===============================
// src/mock_service.rs
// ===============================
//
// In-memory sheet service for local runs and tests.
//
// GET /exec?action=...&callback=<name>
//   buyers | transactions&buyerName= | purchases        -> JSON array
//   addTransaction | addPurchase (fields as query)       -> {success,message}
// With `callback` the body is `name(<json>);`, otherwise plain JSON.
//
// Rows go out with the compact column names (sno, inrkg, bal, totaldebit...)
// and numbers as JSON numbers, like the real sheet does.
//
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap as HashMap;
use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use rust_decimal::prelude::*;
use serde_json::{json, Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::domain::{Particulars, Purchase, Transaction};
use crate::ledger::{aggregate, apply_running_balances};
use crate::normalize;
use crate::transport::Channel;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Injected misbehaviour.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// 503 on requests carrying `callback=`
    pub reject_callback: bool,
    /// 503 on plain requests
    pub reject_direct: bool,
    /// `{error: ..}` for reads, `{success:false, error: ..}` for writes
    pub service_error: Option<String>,
    /// writes answer `{}` and change nothing
    pub empty_ack: bool,
    /// held before every response
    pub delay: Option<Duration>,
}

#[derive(Default)]
struct SheetData {
    buyer_order: Vec<String>,
    ledgers: HashMap<String, Vec<Transaction>>,
    purchases: Vec<Purchase>,
}

#[derive(Default)]
pub struct MockSheet {
    data: Mutex<SheetData>,
    faults: Mutex<Faults>,
    callback_hits: AtomicU64,
    direct_hits: AtomicU64,
}

impl MockSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two buyers and one purchase.
    pub fn seeded() -> Self {
        let sheet = Self::new();
        {
            let mut d = sheet.data();
            let rajesh = vec![
                seed_sale(1, "11/01/2025", "108.2", "95"),
                seed_receipt(2, "15/01/2025", "16213"),
            ];
            let anita = vec![
                seed_sale(1, "03/02/2025", "50", "100"),
                seed_receipt(2, "10/02/2025", "2000"),
            ];
            d.insert_ledger("Rajesh Kumar", rajesh);
            d.insert_ledger("Anita Sharma", anita);
            d.purchases.push(Purchase {
                purchaser_name: "Mehta Traders".into(),
                date: "05/01/2025".into(),
                product_name: "Cotton Bale".into(),
                cost: Decimal::new(4500000, 2),
                product_color: "White".into(),
                master_page: "12".into(),
                ld: "LD-7".into(),
                hm: "HM-2".into(),
            });
        }
        sheet
    }

    fn data(&self) -> MutexGuard<'_, SheetData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock().unwrap_or_else(|e| e.into_inner()) = faults;
    }

    fn faults(&self) -> Faults {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn hits(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Callback => self.callback_hits.load(Ordering::Relaxed),
            Channel::Direct => self.direct_hits.load(Ordering::Relaxed),
        }
    }

    pub fn transaction_count(&self, buyer: &str) -> usize {
        self.data().ledgers.get(buyer).map(Vec::len).unwrap_or(0)
    }

    pub fn purchase_count(&self) -> usize {
        self.data().purchases.len()
    }

    /// Answer one query, ignoring transport faults.
    pub fn handle_query(&self, params: &HashMap<String, String>) -> Value {
        let faults = self.faults();
        let action = params.get("action").map(String::as_str).unwrap_or("");
        let is_write = matches!(action, "addTransaction" | "addPurchase");

        if let Some(msg) = &faults.service_error {
            return if is_write {
                json!({ "success": false, "error": msg })
            } else {
                json!({ "error": msg })
            };
        }
        if is_write && faults.empty_ack {
            return json!({});
        }

        match action {
            "buyers" => self.data().buyers_json(),
            "transactions" => match params.get("buyerName").map(|s| s.trim()) {
                Some(name) if !name.is_empty() => self.data().transactions_json(name),
                _ => json!({ "error": "buyerName is required" }),
            },
            "purchases" => Value::Array(self.data().purchases.iter().map(purchase_json).collect()),
            "addTransaction" => self.data().add_transaction(params),
            "addPurchase" => self.data().add_purchase(params),
            other => json!({ "error": format!("Unknown action: {other}") }),
        }
    }
}

impl SheetData {
    fn insert_ledger(&mut self, name: &str, mut rows: Vec<Transaction>) {
        apply_running_balances(&mut rows);
        if !self.ledgers.contains_key(name) {
            self.buyer_order.push(name.to_string());
        }
        self.ledgers.insert(name.to_string(), rows);
    }

    fn buyers_json(&self) -> Value {
        let rows = self
            .buyer_order
            .iter()
            .filter_map(|name| {
                let t = aggregate(self.ledgers.get(name)?);
                Some(json!({
                    "name": name,
                    "totalweight": num(t.total_weight),
                    "totaldebit": num(t.total_debit),
                    "totalcredit": num(t.total_credit),
                    "bal": num(t.balance),
                }))
            })
            .collect();
        Value::Array(rows)
    }

    fn transactions_json(&self, name: &str) -> Value {
        let rows = self
            .ledgers
            .get(name)
            .map(|txs| txs.iter().map(transaction_json).collect())
            .unwrap_or_default();
        Value::Array(rows)
    }

    fn add_transaction(&mut self, params: &HashMap<String, String>) -> Value {
        let name = params.get("buyerName").map(|s| s.trim()).unwrap_or("");
        if name.is_empty() {
            return json!({ "success": false, "error": "buyerName is required" });
        }
        let kind = params.get("particulars").map(String::as_str).unwrap_or("");
        if Particulars::parse(kind).is_none() {
            return json!({ "success": false, "error": format!("Unknown particulars: {kind}") });
        }
        let next = self.ledgers.get(name).map(Vec::len).unwrap_or(0);
        let Some(row) = normalize::transaction(next, &params_object(params)) else {
            return json!({ "success": false, "error": "bad transaction" });
        };
        if !self.ledgers.contains_key(name) {
            self.buyer_order.push(name.to_string());
        }
        let rows = self.ledgers.entry(name.to_string()).or_default();
        rows.push(row);
        apply_running_balances(rows);
        debug!(buyer = %name, rows = rows.len(), "mock: transaction appended");
        json!({ "success": true, "message": "Transaction added" })
    }

    fn add_purchase(&mut self, params: &HashMap<String, String>) -> Value {
        let Some(p) = normalize::purchase(&params_object(params)) else {
            return json!({ "success": false, "error": "bad purchase" });
        };
        if p.purchaser_name.is_empty() {
            return json!({ "success": false, "error": "purchaserName is required" });
        }
        self.purchases.push(p);
        json!({ "success": true, "message": "Purchase added" })
    }
}

fn seed_sale(sno: u32, date: &str, weight: &str, rate: &str) -> Transaction {
    let weight = Decimal::from_str(weight).unwrap_or_default();
    let rate = Decimal::from_str(rate).unwrap_or_default();
    Transaction {
        serial_number: sno,
        date: date.to_string(),
        particulars: Particulars::Sales,
        weight: Some(weight),
        rate_per_unit: Some(rate),
        debit: Some(crate::ledger::compute_debit(weight, Some(rate))),
        ..Default::default()
    }
}

fn seed_receipt(sno: u32, date: &str, credit: &str) -> Transaction {
    Transaction {
        serial_number: sno,
        date: date.to_string(),
        particulars: Particulars::Receipt,
        credit: Decimal::from_str(credit).ok(),
        ..Default::default()
    }
}

fn num(d: Decimal) -> Value {
    json!(d.to_f64().unwrap_or(0.0))
}

fn opt_num(d: Option<Decimal>) -> Value {
    d.map(num).unwrap_or_else(|| json!(""))
}

fn transaction_json(t: &Transaction) -> Value {
    json!({
        "sno": t.serial_number,
        "date": t.date,
        "particulars": t.particulars.as_str(),
        "weight": opt_num(t.weight),
        "inrkg": opt_num(t.rate_per_unit),
        "autorent": opt_num(t.auto_rent),
        "debit": opt_num(t.debit),
        "credit": opt_num(t.credit),
        "bal": num(t.running_balance),
    })
}

fn purchase_json(p: &Purchase) -> Value {
    json!({
        "purchaserName": p.purchaser_name,
        "date": p.date,
        "productName": p.product_name,
        "cost": num(p.cost),
        "productColor": p.product_color,
        "masterPage": p.master_page,
        "ld": p.ld,
        "hm": p.hm,
    })
}

fn params_object(params: &HashMap<String, String>) -> Value {
    let obj: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(obj)
}

fn plain(status: StatusCode, body: &str) -> Response<Body> {
    let mut rsp = Response::new(Body::from(body.to_string()));
    *rsp.status_mut() = status;
    rsp
}

async fn respond(sheet: Arc<MockSheet>, req: Request<Body>) -> Response<Body> {
    let params: HashMap<String, String> = req
        .uri()
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let callback = params.get("callback").cloned();
    let faults = sheet.faults();

    if let Some(d) = faults.delay {
        tokio::time::sleep(d).await;
    }

    let channel = if callback.is_some() { Channel::Callback } else { Channel::Direct };
    match channel {
        Channel::Callback => sheet.callback_hits.fetch_add(1, Ordering::Relaxed),
        Channel::Direct => sheet.direct_hits.fetch_add(1, Ordering::Relaxed),
    };
    let rejected = match channel {
        Channel::Callback => faults.reject_callback,
        Channel::Direct => faults.reject_direct,
    };
    if rejected {
        return plain(StatusCode::SERVICE_UNAVAILABLE, "channel unavailable");
    }

    let payload = sheet.handle_query(&params);
    let (body, content_type) = match callback {
        Some(cb) => (format!("{cb}({payload});"), "application/javascript"),
        None => (payload.to_string(), "application/json"),
    };
    let mut rsp = Response::new(Body::from(body));
    if let Ok(v) = content_type.parse() {
        rsp.headers_mut().insert(CONTENT_TYPE, v);
    }
    rsp
}

/// Running mock; dropping it without `shutdown` leaves the task running.
pub struct MockHandle {
    pub addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MockHandle {
    pub fn endpoint(&self) -> String {
        format!("http://{}/exec", self.addr)
    }

    /// Stop accepting and wait (bounded) for open connections to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if tokio::time::timeout(SHUTDOWN_GRACE, self.task).await.is_err() {
            debug!("mock: connections still open after grace period");
        }
    }
}

/// Serve `sheet` on `addr` (port 0 = ephemeral).
pub fn spawn(sheet: Arc<MockSheet>, addr: SocketAddr) -> Result<MockHandle, hyper::Error> {
    let make = make_service_fn(move |_conn| {
        let sheet = sheet.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let sheet = sheet.clone();
                async move { Ok::<_, Infallible>(respond(sheet, req).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make);
    let addr = server.local_addr();
    let (tx, rx) = oneshot::channel::<()>();
    let graceful = server.with_graceful_shutdown(async {
        let _ = rx.await;
    });
    let task = tokio::spawn(async move {
        if let Err(e) = graceful.await {
            error!(?e, "mock: server error");
        }
    });
    info!(%addr, "mock sheet listening on /exec");
    Ok(MockHandle { addr, shutdown: tx, task })
}
