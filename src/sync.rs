// ===============================
// src/sync.rs
// ===============================
//
// LedgerSync: the local, disposable view of the sheet.
//
// Write path (transaction / purchase / payment):
//   submit -> (ack) optimistic append -> refetch canonical list(s) -> return
// A write returns only after its refetch. A failed write leaves every replica
// as it was and records the error; nothing is retried here.
//
// The state lock is never held across an await.
//
use std::sync::{Mutex, MutexGuard};

use ahash::AHashMap as HashMap;
use futures_util::future::join;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::{ReadOutcome, RemoteLedgerClient, RequestState, WriteAck};
use crate::domain::{
    Buyer, BuyerTotals, JournalEntry, LedgerEvent, NewPurchase, NewTransaction, Payment, Purchase,
    Transaction, ledger_date_today,
};
use crate::error::{Result, SyncError};
use crate::ledger::{aggregate, apply_running_balances, PaymentDraft};
use crate::metrics::{REFETCHES, STALE_DISCARDED};
use crate::replica::Replica;

/// One buyer's ledger as displayed: rows with running balances + totals.
#[derive(Debug, Clone, PartialEq)]
pub struct BuyerLedger {
    pub buyer: String,
    pub transactions: Vec<Transaction>,
    pub totals: BuyerTotals,
    pub state: RequestState,
    pub error: Option<String>,
}

#[derive(Default)]
struct SyncState {
    buyers: Replica<Buyer>,
    transactions: HashMap<String, Replica<Transaction>>,
    purchases: Replica<Purchase>,
    payments: Vec<Payment>,
}

pub struct LedgerSync {
    client: RemoteLedgerClient,
    state: Mutex<SyncState>,
    journal: Option<mpsc::Sender<JournalEntry>>,
}

impl LedgerSync {
    pub fn new(client: RemoteLedgerClient) -> Self {
        Self { client, state: Mutex::new(SyncState::default()), journal: None }
    }

    pub fn with_journal(mut self, tx: mpsc::Sender<JournalEntry>) -> Self {
        self.journal = Some(tx);
        self
    }

    pub fn client(&self) -> &RemoteLedgerClient {
        &self.client
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: LedgerEvent) {
        if let Some(tx) = &self.journal {
            // journal penuh -> drop, jangan blok alur utama
            let _ = tx.try_send(JournalEntry::now(event));
        }
    }

    fn record_read<T>(&self, action: &str, buyer: Option<&str>, res: &Result<ReadOutcome<T>>) {
        let event = match res {
            Ok(outcome) => LedgerEvent::Read {
                action: action.to_string(),
                buyer: buyer.map(str::to_string),
                rows: outcome.len(),
            },
            Err(e) => LedgerEvent::Failure {
                action: action.to_string(),
                buyer: buyer.map(str::to_string),
                reason: e.to_string(),
            },
        };
        self.record(event);
    }

    // ---- Reads ----

    pub async fn refresh_buyers(&self) -> Result<()> {
        let ticket = self.lock().buyers.begin();
        let res = self.client.list_buyers().await;
        self.record_read("buyers", None, &res);

        let mut st = self.lock();
        let applied = match &res {
            Ok(outcome) => st.buyers.apply(ticket, outcome.clone()),
            Err(e) => st.buyers.apply_error(ticket, e),
        };
        if !applied {
            STALE_DISCARDED.with_label_values(&["buyers"]).inc();
            return res.map(|_| ());
        }
        // totals of buyers whose ledger is open come from their rows
        let SyncState { buyers, transactions, .. } = &mut *st;
        for b in buyers.items_mut().iter_mut() {
            if let Some(r) = transactions.get(&b.name) {
                if r.has_loaded() {
                    b.totals = aggregate(r.items());
                }
            }
        }
        res.map(|_| ())
    }

    /// Fetch (or refetch) one buyer's transactions.
    pub async fn open_buyer(&self, name: &str) -> Result<()> {
        let ticket = self.lock().transactions.entry(name.to_string()).or_default().begin();
        let res = self.client.list_transactions(name).await;
        self.record_read("transactions", Some(name), &res);

        let mut st = self.lock();
        let Some(replica) = st.transactions.get_mut(name) else {
            return res.map(|_| ());
        };
        let applied = match &res {
            Ok(outcome) => replica.apply(ticket, outcome.clone()),
            Err(e) => replica.apply_error(ticket, e),
        };
        if !applied {
            STALE_DISCARDED.with_label_values(&["transactions"]).inc();
            info!(buyer = %name, "late transactions response dropped");
            return res.map(|_| ());
        }
        apply_running_balances(replica.items_mut());
        let totals = aggregate(replica.items());
        if let Some(b) = st.buyers.items_mut().iter_mut().find(|b| b.name == name) {
            b.totals = totals;
        }
        res.map(|_| ())
    }

    /// The buyer's view went away; a response still in flight is dropped.
    pub fn close_buyer(&self, name: &str) {
        if let Some(r) = self.lock().transactions.get_mut(name) {
            r.dispose();
        }
    }

    pub async fn refresh_purchases(&self) -> Result<()> {
        let ticket = self.lock().purchases.begin();
        let res = self.client.list_purchases().await;
        self.record_read("purchases", None, &res);

        let mut st = self.lock();
        let applied = match &res {
            Ok(outcome) => st.purchases.apply(ticket, outcome.clone()),
            Err(e) => st.purchases.apply_error(ticket, e),
        };
        if !applied {
            STALE_DISCARDED.with_label_values(&["purchases"]).inc();
        }
        res.map(|_| ())
    }

    // ---- Snapshots ----

    pub fn buyers(&self) -> Replica<Buyer> {
        self.lock().buyers.clone()
    }

    pub fn purchases(&self) -> Replica<Purchase> {
        self.lock().purchases.clone()
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.lock().payments.clone()
    }

    /// Ledger for `name`, derived fresh from the replica.
    pub fn ledger(&self, name: &str) -> Option<BuyerLedger> {
        let st = self.lock();
        let r = st.transactions.get(name)?;
        let mut transactions = r.items().to_vec();
        apply_running_balances(&mut transactions);
        let totals = aggregate(&transactions);
        Some(BuyerLedger {
            buyer: name.to_string(),
            transactions,
            totals,
            state: r.state(),
            error: r.error().map(str::to_string),
        })
    }

    /// What the buyer still owes: from their open ledger if loaded, else the
    /// buyer list snapshot.
    pub fn outstanding(&self, name: &str) -> Decimal {
        let st = self.lock();
        if let Some(r) = st.transactions.get(name) {
            if r.has_loaded() {
                return aggregate(r.items()).balance;
            }
        }
        st.buyers
            .items()
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.totals.balance)
            .unwrap_or(Decimal::ZERO)
    }

    // ---- Writes ----

    pub async fn add_transaction(&self, cmd: NewTransaction) -> Result<WriteAck> {
        let buyer = cmd.buyer_name.clone();
        let ack = match self.client.add_transaction(&cmd).await {
            Ok(ack) => ack,
            Err(e) => return Err(self.write_failed("addTransaction", &buyer, e)),
        };
        self.append_transaction(&cmd);
        self.record(LedgerEvent::Write {
            req_id: ack.req_id,
            action: "addTransaction".into(),
            buyer: Some(buyer.clone()),
        });
        self.refetch_buyer(&buyer).await;
        Ok(ack)
    }

    pub async fn add_purchase(&self, cmd: NewPurchase) -> Result<WriteAck> {
        let ack = match self.client.add_purchase(&cmd).await {
            Ok(ack) => ack,
            Err(e) => {
                self.lock().purchases.set_error(&e);
                self.record(LedgerEvent::Failure {
                    action: "addPurchase".into(),
                    buyer: None,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        self.lock().purchases.append_provisional(cmd.to_purchase());
        self.record(LedgerEvent::Write { req_id: ack.req_id, action: "addPurchase".into(), buyer: None });

        REFETCHES.with_label_values(&["purchases"]).inc();
        if let Err(e) = self.refresh_purchases().await {
            warn!(%e, "refetch purchases after write failed");
        }
        Ok(ack)
    }

    /// Finalize the draft locally, submit it as a RECEIPT, keep it in the
    /// local payment history once acknowledged.
    pub async fn record_payment(&self, draft: &PaymentDraft) -> Result<Payment> {
        let payment = draft.finalize(ledger_date_today())?;
        let receipt = payment.to_receipt();
        if let Err(e) = self.client.record_payment(&payment, &receipt).await {
            return Err(self.write_failed("recordPayment", &payment.buyer, e));
        }
        self.append_transaction(&receipt);
        self.lock().payments.push(payment.clone());
        info!(
            buyer = %payment.buyer,
            paid = %payment.paid_amount,
            remaining = %payment.remaining_amount,
            status = payment.status.as_str(),
            "payment recorded"
        );
        self.record(LedgerEvent::Payment(payment.clone()));
        self.refetch_buyer(&payment.buyer).await;
        Ok(payment)
    }

    fn write_failed(&self, action: &str, buyer: &str, e: SyncError) -> SyncError {
        if let Some(r) = self.lock().transactions.get_mut(buyer) {
            r.set_error(&e);
        }
        self.record(LedgerEvent::Failure {
            action: action.to_string(),
            buyer: Some(buyer.to_string()),
            reason: e.to_string(),
        });
        e
    }

    fn append_transaction(&self, cmd: &NewTransaction) {
        let mut st = self.lock();
        let replica = st.transactions.entry(cmd.buyer_name.clone()).or_default();
        let serial = replica.items().len() as u32 + 1;
        replica.append_provisional(cmd.to_transaction(serial));
        apply_running_balances(replica.items_mut());
    }

    /// Canonical transaction list + buyer list after a write.
    async fn refetch_buyer(&self, buyer: &str) {
        REFETCHES.with_label_values(&["transactions"]).inc();
        REFETCHES.with_label_values(&["buyers"]).inc();
        let (txs, buyers) = join(self.open_buyer(buyer), self.refresh_buyers()).await;
        if let Err(e) = txs {
            warn!(%buyer, %e, "refetch transactions after write failed");
        }
        if let Err(e) = buyers {
            warn!(%e, "refetch buyers after write failed");
        }
    }
}
