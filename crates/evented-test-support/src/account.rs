//! `Account` — a small fixture aggregate exercising snapshots, schema
//! upgrades and the removal hook.
//!
//! Deposits were first stored in whole currency units (`DepositedV1`,
//! schema 1) and later in cents (`Deposited`, schema 2). Snapshots went
//! through the same change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use evented_core::aggregate::{Aggregate, AggregateRoot, Unhandled};
use evented_core::clock::{Clock, SystemClock};
use evented_core::error::DomainError;
use evented_core::event::{DomainEvent, EventMetadata};
use evented_core::identity::Version;
use evented_core::snapshot::Snapshot;
use evented_core::upgrade::Upgrade;

/// What happened to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountEventKind {
    /// The account was opened.
    Opened {
        /// Account holder.
        owner: String,
    },
    /// Legacy deposit in whole units.
    DepositedV1 {
        /// Amount in whole currency units.
        units: i64,
    },
    /// Money was deposited.
    Deposited {
        /// Amount in cents.
        cents: i64,
    },
    /// Money was withdrawn.
    Withdrawn {
        /// Amount in cents.
        cents: i64,
    },
    /// The account was closed.
    Closed,
}

/// An account event with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountEvent {
    /// Event metadata.
    pub metadata: EventMetadata<Uuid>,
    /// Event data.
    pub kind: AccountEventKind,
}

impl AccountEvent {
    /// Creates an unpublished event.
    #[must_use]
    pub fn new(kind: AccountEventKind, correlation_id: Uuid, occurred_at: DateTime<Utc>) -> Self {
        Self {
            metadata: EventMetadata::new(Uuid::nil(), correlation_id, occurred_at),
            kind,
        }
    }

    /// Creates an event as it would be read back from a store.
    #[must_use]
    pub fn stored(account_id: Uuid, version: u64, kind: AccountEventKind) -> Self {
        let mut event = Self::new(kind, Uuid::nil(), DateTime::UNIX_EPOCH);
        event.metadata.aggregate_id = account_id;
        event.metadata.version = Version::new(version);
        event
    }
}

impl Upgrade for AccountEvent {
    const LATEST_SCHEMA: u32 = 2;

    fn schema_version(&self) -> u32 {
        match self.kind {
            AccountEventKind::DepositedV1 { .. } => 1,
            _ => 2,
        }
    }

    fn upgrade_step(self) -> Self {
        match self.kind {
            AccountEventKind::DepositedV1 { units } => Self {
                metadata: self.metadata,
                kind: AccountEventKind::Deposited { cents: units * 100 },
            },
            _ => self,
        }
    }
}

impl DomainEvent for AccountEvent {
    type Key = Uuid;

    fn event_type(&self) -> &'static str {
        match self.kind {
            AccountEventKind::Opened { .. } => "account.opened",
            AccountEventKind::DepositedV1 { .. } | AccountEventKind::Deposited { .. } => {
                "account.deposited"
            }
            AccountEventKind::Withdrawn { .. } => "account.withdrawn",
            AccountEventKind::Closed => "account.closed",
        }
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(&self.kind).unwrap_or_default()
    }

    fn metadata(&self) -> &EventMetadata<Uuid> {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut EventMetadata<Uuid> {
        &mut self.metadata
    }
}

/// Full-state capture of an [`Account`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum AccountSnapshot {
    /// Schema 1: balance in whole units, no closed flag.
    V1 {
        /// Account id.
        id: Uuid,
        /// Captured version.
        version: Version,
        /// Account holder.
        owner: String,
        /// Balance in whole units.
        balance_units: i64,
    },
    /// Schema 2: balance in cents.
    V2 {
        /// Account id.
        id: Uuid,
        /// Captured version.
        version: Version,
        /// Account holder.
        owner: String,
        /// Balance in cents.
        balance_cents: i64,
        /// Whether the account is still open.
        open: bool,
    },
}

impl Upgrade for AccountSnapshot {
    const LATEST_SCHEMA: u32 = 2;

    fn schema_version(&self) -> u32 {
        match self {
            Self::V1 { .. } => 1,
            Self::V2 { .. } => 2,
        }
    }

    fn upgrade_step(self) -> Self {
        match self {
            Self::V1 {
                id,
                version,
                owner,
                balance_units,
            } => Self::V2 {
                id,
                version,
                owner,
                balance_cents: balance_units * 100,
                open: true,
            },
            v2 @ Self::V2 { .. } => v2,
        }
    }
}

impl Snapshot<Account> for AccountSnapshot {
    fn aggregate_id(&self) -> &Uuid {
        match self {
            Self::V1 { id, .. } | Self::V2 { id, .. } => id,
        }
    }

    fn version(&self) -> Version {
        match self {
            Self::V1 { version, .. } | Self::V2 { version, .. } => *version,
        }
    }

    fn restore(self) -> Result<Account, DomainError> {
        match self {
            Self::V2 {
                id,
                version,
                owner,
                balance_cents,
                open,
            } => Ok(Account {
                root: AggregateRoot::restored(id, version),
                owner,
                balance_cents,
                open,
                correlation_id: Uuid::nil(),
            }),
            Self::V1 { id, .. } => Err(DomainError::InvalidArgument(format!(
                "snapshot of account {id} must be upgraded before restoring"
            ))),
        }
    }
}

/// A bank account that can be opened, credited, debited and closed.
#[derive(Debug)]
pub struct Account {
    root: AggregateRoot<AccountEvent>,
    owner: String,
    balance_cents: i64,
    open: bool,
    correlation_id: Uuid,
}

impl Account {
    /// Opens a new account and publishes `Opened`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `owner` is blank.
    pub fn open(
        id: Uuid,
        owner: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        if owner.trim().is_empty() {
            return Err(DomainError::Validation("owner must not be blank".into()));
        }
        let mut account = Self {
            root: AggregateRoot::new(id),
            owner: String::new(),
            balance_cents: 0,
            open: false,
            correlation_id,
        };
        account.publish(AccountEvent::new(
            AccountEventKind::Opened {
                owner: owner.to_owned(),
            },
            correlation_id,
            clock.now(),
        ))?;
        Ok(account)
    }

    /// Deposits `cents`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a non-positive amount or a
    /// closed account.
    pub fn deposit(
        &mut self,
        cents: i64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        if cents <= 0 {
            return Err(DomainError::Validation("deposit must be positive".into()));
        }
        self.publish(AccountEvent::new(
            AccountEventKind::Deposited { cents },
            correlation_id,
            clock.now(),
        ))
    }

    /// Withdraws `cents`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a non-positive amount, a closed
    /// account or insufficient funds.
    pub fn withdraw(
        &mut self,
        cents: i64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        if cents <= 0 {
            return Err(DomainError::Validation("withdrawal must be positive".into()));
        }
        if cents > self.balance_cents {
            return Err(DomainError::Validation(format!(
                "insufficient funds: balance {} < {cents}",
                self.balance_cents
            )));
        }
        self.publish(AccountEvent::new(
            AccountEventKind::Withdrawn { cents },
            correlation_id,
            clock.now(),
        ))
    }

    /// Closes the account.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the account is already closed.
    pub fn close(&mut self, correlation_id: Uuid, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_open()?;
        self.publish(AccountEvent::new(
            AccountEventKind::Closed,
            correlation_id,
            clock.now(),
        ))
    }

    /// Returns the account holder.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the balance in cents.
    #[must_use]
    pub fn balance_cents(&self) -> i64 {
        self.balance_cents
    }

    /// Returns true until the account is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.open {
            Ok(())
        } else {
            Err(DomainError::Validation(format!("account {} is closed", self.id())))
        }
    }
}

impl Aggregate for Account {
    type Key = Uuid;
    type Event = AccountEvent;
    type Snapshot = AccountSnapshot;

    const KIND: &'static str = "account";

    fn root(&self) -> &AggregateRoot<AccountEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot<AccountEvent> {
        &mut self.root
    }

    fn apply(&mut self, event: &AccountEvent) -> Result<(), Unhandled> {
        match &event.kind {
            AccountEventKind::Opened { owner } => {
                owner.clone_into(&mut self.owner);
                self.open = true;
            }
            AccountEventKind::Deposited { cents } => self.balance_cents += cents,
            AccountEventKind::Withdrawn { cents } => self.balance_cents -= cents,
            AccountEventKind::Closed => self.open = false,
            AccountEventKind::DepositedV1 { .. } => return Err(Unhandled),
        }
        self.correlation_id = event.metadata.correlation_id;
        Ok(())
    }

    fn create_from(event: &AccountEvent) -> Option<Self> {
        match &event.kind {
            AccountEventKind::Opened { owner } => Some(Self {
                root: AggregateRoot::from_created(event),
                owner: owner.clone(),
                balance_cents: 0,
                open: true,
                correlation_id: event.metadata.correlation_id,
            }),
            _ => None,
        }
    }

    fn take_snapshot(&self) -> Result<AccountSnapshot, DomainError> {
        Ok(AccountSnapshot::V2 {
            id: *self.id(),
            version: self.version(),
            owner: self.owner.clone(),
            balance_cents: self.balance_cents,
            open: self.open,
        })
    }

    /// Closes an open account so the removal is visible in its history.
    fn on_removed(&mut self) -> Result<(), DomainError> {
        if self.open {
            let correlation_id = self.correlation_id;
            self.close(correlation_id, &SystemClock)?;
        }
        Ok(())
    }
}
