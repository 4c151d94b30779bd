//! Operation gateway
//!
//! Front door for already-authenticated callers. The session layer resolves
//! who the caller is and hands over a [`CallerContext`]; the gateway parses the
//! raw request fields, calls the ledger, and turns the result into an
//! [`Outcome`] carrying a flash message.
//!
//! The gateway only parses. Whether an amount is acceptable is decided by the
//! ledger, so an alternate caller cannot bypass the checks.

use crate::{
    error::{Compensation, Error, ErrorKind},
    ledger::Ledger,
    store::AccountStore,
    types::{AccountId, OperationKind},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Authenticated caller identity, supplied per call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    account_id: AccountId,
}

impl CallerContext {
    /// Caller whose identity the session layer has verified
    pub fn authenticated(account_id: AccountId) -> Self {
        Self { account_id }
    }

    /// Caller's account
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }
}

/// Raw request as submitted by the caller; amounts are unparsed text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationRequest {
    /// Create the caller's ledger account
    OpenAccount,
    /// Add funds to the caller's account
    Deposit {
        /// Amount text
        amount: String,
    },
    /// Remove funds from the caller's account
    Withdraw {
        /// Amount text
        amount: String,
    },
    /// Send funds to another account
    Transfer {
        /// Recipient identifier
        recipient: String,
        /// Amount text
        amount: String,
    },
    /// Read the caller's balance
    Balance,
}

impl OperationRequest {
    /// Operation this request maps to
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationRequest::OpenAccount => OperationKind::OpenAccount,
            OperationRequest::Deposit { .. } => OperationKind::Deposit,
            OperationRequest::Withdraw { .. } => OperationKind::Withdraw,
            OperationRequest::Transfer { .. } => OperationKind::Transfer,
            OperationRequest::Balance => OperationKind::GetBalance,
        }
    }
}

/// Flash message category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashCategory {
    /// Operation applied
    Success,
    /// Caller error or failed operation
    Danger,
    /// Transient condition; retrying may help
    Warning,
    /// Informational
    Info,
}

/// Caller-facing result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the operation committed
    pub success: bool,

    /// Flash category
    pub category: FlashCategory,

    /// User-visible message
    pub message: String,

    /// Caller's balance after a successful operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,

    /// Failure kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,

    /// Operation ID for committed transfers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<Uuid>,
}

impl Outcome {
    fn success(category: FlashCategory, message: String, balance: Decimal) -> Self {
        Self {
            success: true,
            category,
            message,
            balance: Some(balance),
            error: None,
            operation_id: None,
        }
    }

    fn failure(kind: ErrorKind, category: FlashCategory, message: impl Into<String>) -> Self {
        Self {
            success: false,
            category,
            message: message.into(),
            balance: None,
            error: Some(kind),
            operation_id: None,
        }
    }
}

/// Translates caller requests into ledger calls
#[derive(Debug, Clone)]
pub struct Gateway<S: AccountStore> {
    ledger: Ledger<S>,
}

fn parse_amount(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

fn label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Deposit => "Deposit",
        OperationKind::Withdraw => "Withdraw",
        OperationKind::Transfer => "Transfer",
        OperationKind::OpenAccount | OperationKind::GetBalance => "Operation",
    }
}

impl<S: AccountStore> Gateway<S> {
    /// Create gateway over `ledger`
    pub fn new(ledger: Ledger<S>) -> Self {
        Self { ledger }
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    /// Execute `request` on behalf of `caller`
    pub async fn handle(&self, caller: &CallerContext, request: OperationRequest) -> Outcome {
        let account = caller.account_id();
        let kind = request.kind();

        tracing::debug!(caller = %account, operation = %kind, "Gateway request");

        match request {
            OperationRequest::OpenAccount => match self.ledger.open_account(account).await {
                Ok(opened) => Outcome::success(
                    FlashCategory::Success,
                    "Account opened successfully.".to_string(),
                    opened.balance,
                ),
                Err(e) => self.failure(kind, &e, None, None),
            },

            OperationRequest::Balance => match self.ledger.balance(account).await {
                Ok(balance) => Outcome::success(
                    FlashCategory::Info,
                    format!("Your balance is ${}.", balance),
                    balance,
                ),
                Err(e) => self.failure(kind, &e, None, None),
            },

            OperationRequest::Deposit { amount } => {
                let Some(amount) = parse_amount(&amount) else {
                    return Self::unparsable_amount(kind);
                };
                match self.ledger.deposit(account, amount).await {
                    Ok(balance) => Outcome::success(
                        FlashCategory::Success,
                        format!("Deposited ${}. New balance: ${}", amount, balance),
                        balance,
                    ),
                    Err(e) => self.failure(kind, &e, Some(amount), None),
                }
            }

            OperationRequest::Withdraw { amount } => {
                let Some(amount) = parse_amount(&amount) else {
                    return Self::unparsable_amount(kind);
                };
                match self.ledger.withdraw(account, amount).await {
                    Ok(balance) => Outcome::success(
                        FlashCategory::Success,
                        format!("Successfully withdrew ${}.", amount),
                        balance,
                    ),
                    Err(e) => self.failure(kind, &e, Some(amount), None),
                }
            }

            OperationRequest::Transfer { recipient, amount } => {
                let Some(recipient) = AccountId::parse(&recipient) else {
                    return Outcome::failure(
                        ErrorKind::InvalidTransfer,
                        FlashCategory::Danger,
                        "Please enter a valid recipient.",
                    );
                };
                let Some(amount) = parse_amount(&amount) else {
                    return Self::unparsable_amount(kind);
                };
                match self.ledger.transfer(account, &recipient, amount).await {
                    Ok(receipt) => {
                        let mut outcome = Outcome::success(
                            FlashCategory::Success,
                            format!("Successfully transferred ${} to {}.", amount, recipient),
                            receipt.from_balance,
                        );
                        outcome.operation_id = Some(receipt.operation_id);
                        outcome
                    }
                    Err(e) => self.failure(kind, &e, Some(amount), Some(&recipient)),
                }
            }
        }
    }

    fn unparsable_amount(kind: OperationKind) -> Outcome {
        Outcome::failure(
            ErrorKind::InvalidAmount,
            FlashCategory::Danger,
            format!("{} amount must be a number.", label(kind)),
        )
    }

    fn failure(
        &self,
        kind: OperationKind,
        err: &Error,
        amount: Option<Decimal>,
        recipient: Option<&AccountId>,
    ) -> Outcome {
        let error_kind = err.kind();
        let (category, message) = match err {
            Error::InvalidAmount(_) => {
                let message = match amount {
                    Some(a) if a > Decimal::ZERO => {
                        format!("{} amount has too many decimal places.", label(kind))
                    }
                    _ => format!("{} amount must be greater than zero.", label(kind)),
                };
                (FlashCategory::Danger, message)
            }
            Error::BalanceOverflow(_) => (
                FlashCategory::Danger,
                format!("{} would exceed the maximum balance.", label(kind)),
            ),
            Error::InvalidTransfer(_) => (
                FlashCategory::Danger,
                "You cannot transfer money to yourself.".to_string(),
            ),
            Error::AccountNotFound(missing) if Some(missing) == recipient => {
                (FlashCategory::Danger, "Recipient not found.".to_string())
            }
            Error::AccountNotFound(_) => (
                FlashCategory::Danger,
                "Account not found. Please sign up first.".to_string(),
            ),
            Error::AccountExists(_) => (
                FlashCategory::Warning,
                "Email already registered. Please log in.".to_string(),
            ),
            Error::InsufficientFunds { .. } => {
                (FlashCategory::Danger, "Insufficient balance.".to_string())
            }
            Error::VersionConflict { .. } | Error::ConcurrencyExhausted { .. } => (
                FlashCategory::Warning,
                "Your account is busy right now. Please try again.".to_string(),
            ),
            Error::TransferFailed {
                to,
                compensation: Compensation::Reversed,
                ..
            } => (
                FlashCategory::Danger,
                format!(
                    "Transfer to {} could not be completed. No money was moved.",
                    to
                ),
            ),
            Error::TransferFailed {
                to,
                compensation: Compensation::Unreconciled,
                ..
            } => (
                FlashCategory::Danger,
                format!(
                    "Transfer to {} could not be completed and is under review. Please contact support.",
                    to
                ),
            ),
            Error::StoreUnavailable(_) | Error::Io(_) => (
                FlashCategory::Warning,
                "Service temporarily unavailable. Please try again later.".to_string(),
            ),
            Error::Serialization(_) | Error::Config(_) | Error::Internal(_) => (
                FlashCategory::Danger,
                "Something went wrong. Please try again.".to_string(),
            ),
        };

        if err.requires_reconciliation() {
            tracing::error!(operation = %kind, error = %err, "Gateway reporting unreconciled transfer");
        } else {
            tracing::debug!(operation = %kind, error = %err, "Gateway reporting failure");
        }

        Outcome::failure(error_kind, category, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::MemoryStore, Config};

    async fn gateway_with(accounts: &[&str]) -> Gateway<MemoryStore> {
        let ledger = Ledger::new(MemoryStore::new(), &Config::default()).unwrap();
        for name in accounts {
            ledger.open_account(&AccountId::new(*name)).await.unwrap();
        }
        Gateway::new(ledger)
    }

    fn caller(name: &str) -> CallerContext {
        CallerContext::authenticated(AccountId::new(name))
    }

    fn deposit(amount: &str) -> OperationRequest {
        OperationRequest::Deposit {
            amount: amount.to_string(),
        }
    }

    #[tokio::test]
    async fn test_deposit_messages() {
        let gateway = gateway_with(&["alice@example.com"]).await;
        let alice = caller("alice@example.com");

        let outcome = gateway.handle(&alice, deposit("50")).await;
        assert!(outcome.success);
        assert_eq!(outcome.category, FlashCategory::Success);
        assert_eq!(outcome.message, "Deposited $50. New balance: $50");
        assert_eq!(outcome.balance, Some(Decimal::from(50)));

        let outcome = gateway.handle(&alice, deposit("-3")).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error, Some(ErrorKind::InvalidAmount));
        assert_eq!(outcome.message, "Deposit amount must be greater than zero.");

        let outcome = gateway.handle(&alice, deposit("ten")).await;
        assert_eq!(outcome.error, Some(ErrorKind::InvalidAmount));
        assert_eq!(outcome.message, "Deposit amount must be a number.");

        let outcome = gateway.handle(&alice, deposit("1.005")).await;
        assert_eq!(outcome.message, "Deposit amount has too many decimal places.");
    }

    #[tokio::test]
    async fn test_deposit_overflow_message() {
        let gateway = gateway_with(&["alice@example.com"]).await;
        let alice = caller("alice@example.com");
        let max = Decimal::MAX.to_string();

        let outcome = gateway.handle(&alice, deposit(&max)).await;
        assert!(outcome.success);

        let outcome = gateway.handle(&alice, deposit(&max)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error, Some(ErrorKind::InvalidAmount));
        assert_eq!(outcome.message, "Deposit would exceed the maximum balance.");
        assert_eq!(
            gateway.ledger().balance(&AccountId::new("alice@example.com")).await.unwrap(),
            Decimal::MAX
        );
    }

    #[tokio::test]
    async fn test_withdraw_insufficient() {
        let gateway = gateway_with(&["alice@example.com"]).await;
        let alice = caller("alice@example.com");
        gateway.handle(&alice, deposit("100")).await;

        let outcome = gateway
            .handle(
                &alice,
                OperationRequest::Withdraw {
                    amount: "150".to_string(),
                },
            )
            .await;
        assert_eq!(outcome.error, Some(ErrorKind::InsufficientFunds));
        assert_eq!(outcome.message, "Insufficient balance.");

        let outcome = gateway
            .handle(
                &alice,
                OperationRequest::Withdraw {
                    amount: "40".to_string(),
                },
            )
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "Successfully withdrew $40.");
        assert_eq!(outcome.balance, Some(Decimal::from(60)));
    }

    #[tokio::test]
    async fn test_transfer_outcomes() {
        let gateway = gateway_with(&["alice@example.com", "bob@example.com"]).await;
        let alice = caller("alice@example.com");
        gateway.handle(&alice, deposit("100")).await;

        let transfer = |recipient: &str, amount: &str| OperationRequest::Transfer {
            recipient: recipient.to_string(),
            amount: amount.to_string(),
        };

        let outcome = gateway
            .handle(&alice, transfer("carol@example.com", "10"))
            .await;
        assert_eq!(outcome.error, Some(ErrorKind::AccountNotFound));
        assert_eq!(outcome.message, "Recipient not found.");

        let outcome = gateway
            .handle(&alice, transfer("alice@example.com", "10"))
            .await;
        assert_eq!(outcome.error, Some(ErrorKind::InvalidTransfer));

        let outcome = gateway.handle(&alice, transfer("   ", "10")).await;
        assert_eq!(outcome.error, Some(ErrorKind::InvalidTransfer));
        assert_eq!(outcome.message, "Please enter a valid recipient.");

        let outcome = gateway
            .handle(&alice, transfer(" bob@example.com ", "25.50"))
            .await;
        assert!(outcome.success);
        assert_eq!(
            outcome.message,
            "Successfully transferred $25.50 to bob@example.com."
        );
        assert_eq!(outcome.balance, Some(Decimal::new(7450, 2)));
        assert!(outcome.operation_id.is_some());

        let bob = caller("bob@example.com");
        let outcome = gateway.handle(&bob, OperationRequest::Balance).await;
        assert_eq!(outcome.balance, Some(Decimal::new(2550, 2)));
        assert_eq!(outcome.category, FlashCategory::Info);
    }

    #[tokio::test]
    async fn test_open_account_and_unknown_caller() {
        let gateway = gateway_with(&[]).await;
        let dave = caller("dave@example.com");

        let outcome = gateway.handle(&dave, deposit("5")).await;
        assert_eq!(outcome.error, Some(ErrorKind::AccountNotFound));

        let outcome = gateway.handle(&dave, OperationRequest::OpenAccount).await;
        assert!(outcome.success);
        assert_eq!(outcome.balance, Some(Decimal::ZERO));

        let outcome = gateway.handle(&dave, OperationRequest::OpenAccount).await;
        assert_eq!(outcome.error, Some(ErrorKind::AccountExists));
        assert_eq!(outcome.category, FlashCategory::Warning);
    }

    #[test]
    fn test_request_json_shape() {
        let request: OperationRequest = serde_json::from_str(
            r#"{"op":"transfer","recipient":"bob@example.com","amount":"12.00"}"#,
        )
        .unwrap();
        assert_eq!(request.kind(), OperationKind::Transfer);

        let request: OperationRequest = serde_json::from_str(r#"{"op":"balance"}"#).unwrap();
        assert_eq!(request, OperationRequest::Balance);
    }
}
