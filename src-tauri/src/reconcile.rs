//! Daily audit: reconcile one local day of sales against money logs and
//! expenses.
//!
//! A sale is verified when a received log carries the same transaction code
//! (case-insensitive) and the same amount. Whatever the logs confirm beyond
//! the verified sales is the day's missing money; received logs nobody
//! recorded a sale for are "unclaimed". Outgoing logs are checked against
//! expenses paid by M-Pesa or bank the same way.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::data_helpers::{amounts_match, round_money};
use crate::db::DbState;
use crate::expenses::{self, Expense};
use crate::mpesa::{self, MoneyLog};
use crate::payments::{self, Payment};
use crate::settings;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// A received log has the same code and amount.
    VerifiedMatch,
    /// A received log has the same code but a different amount.
    AmountMismatch,
    /// Recorded as M-Pesa but no log carries the code.
    CodeNotFound,
    /// Nothing to check it against.
    UnverifiedCash,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MethodTotals {
    pub mpesa: f64,
    pub bank: f64,
    pub cash: f64,
    pub other: f64,
}

impl MethodTotals {
    fn add(&mut self, method: &str, amount: f64) {
        match method {
            "mpesa" => self.mpesa += amount,
            "bank" => self.bank += amount,
            "cash" => self.cash += amount,
            _ => self.other += amount,
        }
    }

    fn total(&self) -> f64 {
        self.mpesa + self.bank + self.cash + self.other
    }

    fn rounded(self) -> Self {
        Self {
            mpesa: round_money(self.mpesa),
            bank: round_money(self.bank),
            cash: round_money(self.cash),
            other: round_money(self.other),
        }
    }
}

/// Confirmed vs verified money for one digital channel.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelVariance {
    pub channel: String,
    pub confirmed: f64,
    pub verified: f64,
    /// `confirmed - verified`; positive means money arrived that no verified
    /// sale accounts for.
    pub variance: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CashPosition {
    pub cash_sales: f64,
    pub cash_expenses: f64,
    pub expected_cash: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DigitalExpenses {
    pub recorded: f64,
    pub sent_logs: f64,
    /// `sent_logs - recorded`.
    pub variance: f64,
    /// Outgoing logs with no matching expense.
    pub unrecorded: Vec<LogSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
    pub transaction_code: String,
    pub amount: f64,
    pub channel: String,
    pub counterparty: Option<String>,
    pub received_at: String,
}

impl From<&MoneyLog> for LogSummary {
    fn from(log: &MoneyLog) -> Self {
        Self {
            transaction_code: log.transaction_code.clone(),
            amount: log.amount,
            channel: log.channel.clone(),
            counterparty: log.counterparty.clone(),
            received_at: log.received_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaleAudit {
    pub payment_id: String,
    pub attendant_name: String,
    pub channel_label: String,
    pub transaction_code: Option<String>,
    pub app_amount: f64,
    pub bank_amount: Option<f64>,
    pub status: SaleStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditCounts {
    pub payments: usize,
    pub logs: usize,
    pub expenses: usize,
    pub verified: usize,
    pub mismatched: usize,
    pub code_not_found: usize,
    pub unclaimed: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyAudit {
    pub date: String,
    pub recorded_sales: MethodTotals,
    pub total_sales: f64,
    pub total_confirmed: f64,
    pub total_verified: f64,
    /// Money the logs confirm that no verified sale accounts for.
    pub total_missing: f64,
    pub channels: Vec<ChannelVariance>,
    pub cash: CashPosition,
    pub digital_expenses: DigitalExpenses,
    pub unclaimed: Vec<LogSummary>,
    pub sales: Vec<SaleAudit>,
    pub counts: AuditCounts,
}

fn code_of(payment: &Payment) -> Option<&str> {
    payment.transaction_code.as_deref()
}

/// Reconcile one day's records. Pure: callers load the three streams.
pub fn audit(
    date: &str,
    payments: &[Payment],
    logs: &[MoneyLog],
    expenses: &[Expense],
) -> DailyAudit {
    let received: Vec<&MoneyLog> = logs.iter().filter(|l| l.is_received()).collect();
    let sent: Vec<&MoneyLog> = logs.iter().filter(|l| !l.is_received()).collect();

    let received_by_code: HashMap<String, &MoneyLog> = received
        .iter()
        .map(|l| (l.transaction_code.to_uppercase(), *l))
        .collect();

    // Recorded sales and per-sale status.
    let mut recorded_sales = MethodTotals::default();
    let mut verified_by_channel: HashMap<&str, f64> = HashMap::new();
    let mut sales = Vec::with_capacity(payments.len());
    let mut claimed_codes: HashMap<String, Vec<f64>> = HashMap::new();

    for payment in payments {
        recorded_sales.add(&payment.payment_method, payment.amount);

        let code = code_of(payment).map(str::to_uppercase);
        if let Some(ref c) = code {
            claimed_codes.entry(c.clone()).or_default().push(payment.amount);
        }
        let log = code.as_ref().and_then(|c| received_by_code.get(c)).copied();

        let status = match log {
            Some(l) if amounts_match(l.amount, payment.amount) => {
                *verified_by_channel.entry(l.channel.as_str()).or_insert(0.0) += payment.amount;
                SaleStatus::VerifiedMatch
            }
            Some(_) => SaleStatus::AmountMismatch,
            None if payment.is_mpesa() => SaleStatus::CodeNotFound,
            None => SaleStatus::UnverifiedCash,
        };

        sales.push(SaleAudit {
            payment_id: payment.id.clone(),
            attendant_name: payment
                .attendant_name
                .clone()
                .unwrap_or_else(|| "Unknown Staff".to_string()),
            channel_label: match log {
                Some(l) if l.channel == "bank" => "BANK".to_string(),
                Some(_) => "M-PESA".to_string(),
                None => payment.payment_method.to_uppercase(),
            },
            transaction_code: payment.transaction_code.clone(),
            app_amount: payment.amount,
            bank_amount: log.map(|l| l.amount),
            status,
            created_at: payment.created_at.clone(),
        });
    }

    // Confirmed money by channel.
    let mut confirmed_by_channel: HashMap<&str, f64> = HashMap::new();
    for log in &received {
        *confirmed_by_channel.entry(log.channel.as_str()).or_insert(0.0) += log.amount;
    }

    let channels: Vec<ChannelVariance> = ["mpesa", "bank"]
        .iter()
        .map(|ch| {
            let confirmed = confirmed_by_channel.get(ch).copied().unwrap_or(0.0);
            let verified = verified_by_channel.get(ch).copied().unwrap_or(0.0);
            ChannelVariance {
                channel: ch.to_string(),
                confirmed: round_money(confirmed),
                verified: round_money(verified),
                variance: round_money(confirmed - verified),
            }
        })
        .collect();

    let total_confirmed: f64 = channels.iter().map(|c| c.confirmed).sum();
    let total_verified: f64 = channels.iter().map(|c| c.verified).sum();

    // Received logs with no sale of the same code and amount.
    let unclaimed: Vec<LogSummary> = received
        .iter()
        .filter(|log| {
            !claimed_codes
                .get(&log.transaction_code.to_uppercase())
                .is_some_and(|amounts| amounts.iter().any(|a| amounts_match(*a, log.amount)))
        })
        .map(|log| LogSummary::from(*log))
        .collect();

    // Cash drawer and digital expenses.
    let cash_expenses: f64 = expenses
        .iter()
        .filter(|e| !e.is_digital())
        .map(|e| e.amount)
        .sum();
    let digital: Vec<&Expense> = expenses.iter().filter(|e| e.is_digital()).collect();
    let digital_total: f64 = digital.iter().map(|e| e.amount).sum();
    let sent_total: f64 = sent.iter().map(|l| l.amount).sum();
    let unrecorded = unrecorded_outflows(&sent, &digital);

    let counts = AuditCounts {
        payments: payments.len(),
        logs: logs.len(),
        expenses: expenses.len(),
        verified: count_status(&sales, SaleStatus::VerifiedMatch),
        mismatched: count_status(&sales, SaleStatus::AmountMismatch),
        code_not_found: count_status(&sales, SaleStatus::CodeNotFound),
        unclaimed: unclaimed.len(),
    };

    DailyAudit {
        date: date.to_string(),
        total_sales: round_money(recorded_sales.total()),
        recorded_sales: recorded_sales.clone().rounded(),
        total_confirmed: round_money(total_confirmed),
        total_verified: round_money(total_verified),
        total_missing: round_money(total_confirmed - total_verified),
        channels,
        cash: CashPosition {
            cash_sales: round_money(recorded_sales.cash),
            cash_expenses: round_money(cash_expenses),
            expected_cash: round_money(recorded_sales.cash - cash_expenses),
        },
        digital_expenses: DigitalExpenses {
            recorded: round_money(digital_total),
            sent_logs: round_money(sent_total),
            variance: round_money(sent_total - digital_total),
            unrecorded,
        },
        unclaimed,
        sales,
        counts,
    }
}

fn count_status(sales: &[SaleAudit], status: SaleStatus) -> usize {
    sales.iter().filter(|s| s.status == status).count()
}

/// Pair each outgoing log with one digital expense, by code first and then
/// by equal amount; return the logs left over.
fn unrecorded_outflows(sent: &[&MoneyLog], digital: &[&Expense]) -> Vec<LogSummary> {
    let mut used = vec![false; digital.len()];
    let mut leftover = Vec::new();

    for log in sent {
        let code = log.transaction_code.to_uppercase();
        let by_code = digital.iter().enumerate().position(|(i, e)| {
            !used[i]
                && e.transaction_code
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(&code))
        });
        let by_amount = || {
            digital.iter().enumerate().position(|(i, e)| {
                !used[i] && e.transaction_code.is_none() && amounts_match(e.amount, log.amount)
            })
        };
        match by_code.or_else(by_amount) {
            Some(i) => used[i] = true,
            None => leftover.push(LogSummary::from(*log)),
        }
    }
    leftover
}

/// Load the day's payments, logs and expenses and audit them.
pub fn daily_audit(db: &DbState, business_id: &str, date: Option<&str>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let window = settings::resolve_day(&conn, date)?;

    let payments = payments::payments_for_day(&conn, business_id, &window)?;
    let logs = mpesa::logs_for_day(&conn, business_id, &window)?;
    let expenses = expenses::expenses_for_day(&conn, business_id, &window)?;
    drop(conn);

    let report = audit(&window.date.to_string(), &payments, &logs, &expenses);
    info!(
        date = %report.date,
        payments = report.counts.payments,
        logs = report.counts.logs,
        unclaimed = report.counts.unclaimed,
        missing = report.total_missing,
        "Daily audit computed"
    );
    serde_json::to_value(report).map_err(|e| e.to_string())
}
