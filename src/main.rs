// ===============================
// src/main.rs
// ===============================
/*
 # sheet lokal (mock) lalu pakai CLI terhadapnya
 ledger-sync mock-serve --port 8787
 LEDGER_ENDPOINT=http://127.0.0.1:8787/exec ledger-sync buyers
 ledger-sync ledger "Rajesh Kumar"
 ledger-sync sale "Rajesh Kumar" --weight 108.2
 ledger-sync pay "Rajesh Kumar" --type half --method upi

 # fallback ke direct saja
 ledger-sync --primary direct purchases --search cotton

 METRICS_PORT=9898 -> curl -s localhost:9898/metrics | grep '^sheet_'
*/
/*
=============================================================================
Project : ledger_sync — buyer ledger & purchase records over a sheet service
Module  : main.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Reads buyers, per-buyer ledgers and purchases from a spreadsheet
          web service (callback channel with direct fallback), records sales,
          receipts, payments and purchases, keeps running balances locally,
          exposes Prometheus metrics and journals every call as JSONL.
=============================================================================
*/
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ledger_sync::client::RemoteLedgerClient;
use ledger_sync::config;
use ledger_sync::domain::{
    ledger_date, ledger_date_today, JournalEntry, NewPurchase, Particulars, PaymentMethod,
    PaymentType,
};
use ledger_sync::error::ConfigError;
use ledger_sync::ledger::{
    coerce_amount, filter_buyers, filter_purchases, format_money, round2, PaymentDraft,
    TransactionDraft,
};
use ledger_sync::metrics;
use ledger_sync::mock_service::{self, MockSheet};
use ledger_sync::recorder;
use ledger_sync::sync::{BuyerLedger, LedgerSync};
use ledger_sync::transport::Channel;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PrimaryArg {
    Callback,
    Direct,
}

impl From<PrimaryArg> for Channel {
    fn from(p: PrimaryArg) -> Self {
        match p {
            PrimaryArg::Callback => Channel::Callback,
            PrimaryArg::Direct => Channel::Direct,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ledger-sync", version, about = "Buyer ledgers & purchases over a sheet service")]
struct Cli {
    /// Sheet endpoint (overrides LEDGER_ENDPOINT)
    #[arg(long)]
    endpoint: Option<String>,

    /// Channel tried first (overrides LEDGER_PRIMARY)
    #[arg(long, value_enum)]
    primary: Option<PrimaryArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Buyer list with totals
    Buyers {
        #[arg(long)]
        search: Option<String>,
    },
    /// One buyer's ledger with running balances
    Ledger { buyer: String },
    /// Purchase records
    Purchases {
        #[arg(long)]
        search: Option<String>,
    },
    /// Record a SALES row (debit = weight x rate)
    Sale {
        buyer: String,
        #[arg(long)]
        weight: String,
        #[arg(long)]
        rate: Option<String>,
        #[arg(long)]
        auto_rent: Option<String>,
    },
    /// Record a RECEIPT row
    Receipt {
        buyer: String,
        #[arg(long)]
        credit: String,
        #[arg(long)]
        auto_rent: Option<String>,
    },
    /// Record a payment against the buyer's outstanding balance
    Pay {
        buyer: String,
        #[arg(long = "type", default_value = "full")]
        payment_type: String,
        /// Paid amount, custom only
        #[arg(long)]
        amount: Option<String>,
        #[arg(long, default_value = "cash")]
        method: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Record a purchase
    Purchase {
        #[arg(long)]
        purchaser: String,
        #[arg(long)]
        product: String,
        #[arg(long)]
        cost: String,
        /// YYYY-MM-DD, default today
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value = "")]
        color: String,
        #[arg(long, default_value = "")]
        master_page: String,
        #[arg(long, default_value = "")]
        ld: String,
        #[arg(long, default_value = "")]
        hm: String,
    },
    /// Serve the in-memory sheet (seeded) for local use
    MockServe {
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(%e, "ledger-sync failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    // ---- Config ----
    let mut args = config::load();
    if let Some(ep) = cli.endpoint {
        args.endpoint = ep;
    }
    if let Some(p) = cli.primary {
        args.primary = p.into();
    }

    // ---- Metrics ----
    metrics::init();
    if let Some(port) = args.metrics_port {
        metrics::serve_metrics(port).await;
    }

    let command = match cli.command {
        Command::MockServe { port } => return mock_serve(port).await,
        other => other,
    };

    let settings = args.client_settings()?;
    metrics::CONFIG_PRIMARY.with_label_values(&[settings.primary.as_str()]).set(1);
    info!(
        endpoint = %settings.endpoint,
        primary = %settings.primary,
        timeout = ?settings.timeout,
        "startup config"
    );
    let client = RemoteLedgerClient::new(&settings)?;

    // ---- Journal (optional) ----
    let mut sync = LedgerSync::new(client);
    let mut journal = None;
    if let Some(path) = args.record_file.clone() {
        let (tx, rx) = mpsc::channel::<JournalEntry>(1024);
        journal = Some(tokio::spawn(recorder::run(rx, path)));
        sync = sync.with_journal(tx);
    }

    let res = execute(&sync, command).await;

    // sender ikut LedgerSync; drop dulu supaya recorder flush & berhenti
    drop(sync);
    if let Some(task) = journal {
        let _ = task.await;
    }
    res
}

async fn execute(sync: &LedgerSync, command: Command) -> Result<(), BoxError> {
    match command {
        Command::Buyers { search } => {
            sync.refresh_buyers().await?;
            let view = sync.buyers();
            let term = search.unwrap_or_default();
            let shown = filter_buyers(view.items(), &term);
            if shown.is_empty() {
                println!("no buyers");
                return Ok(());
            }
            println!("{:<24} {:>10} {:>12} {:>12} {:>12}", "BUYER", "WEIGHT", "DEBIT", "CREDIT", "BALANCE");
            for b in shown {
                let t = &b.totals;
                println!(
                    "{:<24} {:>10} {:>12} {:>12} {:>12}",
                    b.name,
                    t.total_weight.normalize().to_string(),
                    format_money(t.total_debit),
                    format_money(t.total_credit),
                    format_money(t.balance)
                );
            }
        }
        Command::Ledger { buyer } => {
            sync.open_buyer(&buyer).await?;
            if let Some(ledger) = sync.ledger(&buyer) {
                print_ledger(&ledger);
            }
        }
        Command::Purchases { search } => {
            sync.refresh_purchases().await?;
            let view = sync.purchases();
            let term = search.unwrap_or_default();
            let shown = filter_purchases(view.items(), &term);
            if shown.is_empty() {
                println!("no purchases");
                return Ok(());
            }
            for p in shown {
                println!(
                    "{:<12} {:<20} {:<20} {:>12} {:<10} {:<6} {:<6} {:<6}",
                    p.date,
                    p.purchaser_name,
                    p.product_name,
                    format_money(p.cost),
                    p.product_color,
                    p.master_page,
                    p.ld,
                    p.hm
                );
            }
        }
        Command::Sale { buyer, weight, rate, auto_rent } => {
            let mut draft = TransactionDraft::new(buyer.clone(), Particulars::Sales);
            if let Some(r) = rate {
                draft.set_rate(&r);
            }
            draft.set_weight(&weight);
            draft.set_auto_rent(auto_rent.as_deref().unwrap_or(""));
            let cmd = draft.into_command(ledger_date_today())?;
            let ack = sync.add_transaction(cmd).await?;
            info!(req_id = ack.req_id, channel = %ack.channel, "sale recorded");
            if let Some(ledger) = sync.ledger(&buyer) {
                print_ledger(&ledger);
            }
        }
        Command::Receipt { buyer, credit, auto_rent } => {
            let mut draft = TransactionDraft::new(buyer.clone(), Particulars::Receipt);
            draft.set_credit(&credit);
            draft.set_auto_rent(auto_rent.as_deref().unwrap_or(""));
            let cmd = draft.into_command(ledger_date_today())?;
            let ack = sync.add_transaction(cmd).await?;
            info!(req_id = ack.req_id, channel = %ack.channel, "receipt recorded");
            if let Some(ledger) = sync.ledger(&buyer) {
                print_ledger(&ledger);
            }
        }
        Command::Pay { buyer, payment_type, amount, method, notes } => {
            let payment_type = PaymentType::parse(&payment_type)
                .ok_or(ConfigError::Value { key: "--type", value: payment_type })?;
            let method = PaymentMethod::parse(&method)
                .ok_or(ConfigError::Value { key: "--method", value: method })?;

            // due = outstanding dari ledger terbaru
            sync.open_buyer(&buyer).await?;
            let mut draft = PaymentDraft::new(payment_type);
            draft.select_buyer(buyer.clone(), sync.outstanding(&buyer));
            if let Some(a) = amount {
                if !draft.set_custom_paid(&a) {
                    return Err(ConfigError::Value { key: "--amount", value: a }.into());
                }
            }
            draft.set_method(method);
            draft.set_notes(&notes);

            let p = sync.record_payment(&draft).await?;
            println!(
                "{} {} paid {} of {} via {} -> remaining {} ({})",
                p.date,
                p.buyer,
                format_money(p.paid_amount),
                format_money(p.due_amount),
                p.method.as_str(),
                format_money(p.remaining_amount),
                p.status.as_str()
            );
        }
        Command::Purchase { purchaser, product, cost, date, color, master_page, ld, hm } => {
            let date = match date {
                Some(d) => {
                    let parsed = NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
                        .map_err(|_| ConfigError::Value { key: "--date", value: d.clone() })?;
                    ledger_date(parsed)
                }
                None => ledger_date_today(),
            };
            let cmd = NewPurchase {
                purchaser_name: purchaser.trim().to_string(),
                date,
                product_name: product.trim().to_string(),
                cost: round2(coerce_amount(&cost)),
                product_color: color,
                master_page,
                ld,
                hm,
            };
            let ack = sync.add_purchase(cmd).await?;
            info!(req_id = ack.req_id, channel = %ack.channel, "purchase recorded");
        }
        Command::MockServe { port } => mock_serve(port).await?,
    }
    Ok(())
}

fn print_ledger(ledger: &BuyerLedger) {
    println!("{}", ledger.buyer);
    if let Some(e) = &ledger.error {
        println!("  ! {e}");
    }
    if ledger.transactions.is_empty() {
        println!("  no transactions");
        return;
    }
    let opt = |d: Option<rust_decimal::Decimal>| d.map(format_money).unwrap_or_default();
    println!(
        "{:>5} {:<11} {:<11} {:>9} {:>7} {:>10} {:>12} {:>12} {:>12}",
        "S.NO", "DATE", "PARTICULARS", "WEIGHT", "INR/kg", "AUTO RENT", "DEBIT", "CREDIT", "BAL"
    );
    for t in &ledger.transactions {
        println!(
            "{:>5} {:<11} {:<11} {:>9} {:>7} {:>10} {:>12} {:>12} {:>12}",
            t.serial_number,
            t.date,
            t.particulars.as_str(),
            t.weight.map(|w| w.normalize().to_string()).unwrap_or_default(),
            t.rate_per_unit.map(|r| r.normalize().to_string()).unwrap_or_default(),
            opt(t.auto_rent),
            opt(t.debit),
            opt(t.credit),
            format_money(t.running_balance)
        );
    }
    let t = &ledger.totals;
    println!(
        "{:>5} {:<11} {:<11} {:>9} {:>7} {:>10} {:>12} {:>12} {:>12}",
        "",
        "",
        "TOTAL",
        t.total_weight.normalize().to_string(),
        "",
        "",
        format_money(t.total_debit),
        format_money(t.total_credit),
        format_money(t.balance)
    );
}

async fn mock_serve(port: u16) -> Result<(), BoxError> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let handle = mock_service::spawn(Arc::new(MockSheet::seeded()), addr)?;
    info!(endpoint = %handle.endpoint(), "mock sheet ready, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;
    Ok(())
}
