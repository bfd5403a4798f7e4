//! Savings engine
//!
//! Deposits, withdrawals and interest credits. Each one updates the
//! account, the member's cached totals and the transaction log in a single
//! unit of work.

use crate::{
    error::{Error, Result},
    model::{GroupMember, SavingsAccount, Transaction, TransactionType},
    money::Money,
    storage::{Reader, UniqueKey, UnitOfWork},
    types::{ActorId, GroupId, MemberId, Reference},
    Ledger,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Account state after a mutation, plus the logged transaction
#[derive(Debug, Clone, PartialEq)]
pub struct SavingsReceipt {
    /// Account after the operation
    pub account: SavingsAccount,
    /// Logged transaction
    pub transaction: Transaction,
}

/// Read projection of a savings account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsSummary {
    /// Member
    pub member_id: MemberId,
    /// Balance
    pub current_balance: Money,
    /// Lifetime deposits
    pub total_deposits: Money,
    /// Lifetime withdrawals
    pub total_withdrawals: Money,
    /// Lifetime interest
    pub interest_earned: Money,
    /// Most recent deposit
    pub last_deposit_date: Option<NaiveDate>,
    /// Most recent withdrawal
    pub last_withdrawal_date: Option<NaiveDate>,
    /// Transactions referencing the account
    pub transaction_count: usize,
}

#[derive(Clone, Copy)]
enum Movement {
    Deposit,
    Withdrawal,
    Interest,
}

impl Movement {
    fn name(&self) -> &'static str {
        match self {
            Movement::Deposit => "deposit",
            Movement::Withdrawal => "withdrawal",
            Movement::Interest => "interest",
        }
    }

    fn kind(&self) -> TransactionType {
        match self {
            Movement::Deposit => TransactionType::Deposit,
            Movement::Withdrawal => TransactionType::Withdrawal,
            Movement::Interest => TransactionType::Interest,
        }
    }

    fn default_description(&self) -> &'static str {
        match self {
            Movement::Deposit => "Savings deposit",
            Movement::Withdrawal => "Savings withdrawal",
            Movement::Interest => "Interest earned",
        }
    }
}

/// Savings operations
#[derive(Debug, Clone, Copy)]
pub struct SavingsEngine<'a> {
    ledger: &'a Ledger,
}

impl<'a> SavingsEngine<'a> {
    pub(crate) fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Account of a member, created on first access
    pub fn account(&self, member_id: MemberId) -> Result<SavingsAccount> {
        if let Some(account) = self.find_account(member_id)? {
            return Ok(account);
        }
        let mut uow = self.ledger.storage().begin();
        let member: GroupMember = uow.fetch(member_id.as_uuid())?;
        let account = open_account(&mut uow, &member, self.ledger.now())?;
        uow.commit()?;
        Ok(account)
    }

    /// Account of a member, if one exists
    pub fn find_account(&self, member_id: MemberId) -> Result<Option<SavingsAccount>> {
        let member: GroupMember = self.ledger.storage().fetch(member_id.as_uuid())?;
        find_account(self.ledger.storage(), &member)
    }

    /// Credit a deposit
    pub fn deposit(
        &self,
        member_id: MemberId,
        amount: Money,
        description: Option<&str>,
        created_by: Option<ActorId>,
    ) -> Result<SavingsReceipt> {
        self.apply(Movement::Deposit, member_id, amount, description, created_by)
    }

    /// Debit a withdrawal; `InsufficientBalance` if it would go negative
    pub fn withdraw(
        &self,
        member_id: MemberId,
        amount: Money,
        description: Option<&str>,
        created_by: Option<ActorId>,
    ) -> Result<SavingsReceipt> {
        self.apply(Movement::Withdrawal, member_id, amount, description, created_by)
    }

    /// Credit interest; zero is accepted and still logged
    pub fn add_interest(
        &self,
        member_id: MemberId,
        amount: Money,
        created_by: Option<ActorId>,
    ) -> Result<SavingsReceipt> {
        self.apply(Movement::Interest, member_id, amount, None, created_by)
    }

    fn apply(
        &self,
        movement: Movement,
        member_id: MemberId,
        amount: Money,
        description: Option<&str>,
        created_by: Option<ActorId>,
    ) -> Result<SavingsReceipt> {
        let result = self.apply_in_unit(movement, member_id, amount, description, created_by);
        let metrics = self.ledger.metrics();
        match &result {
            Ok(receipt) => {
                metrics.record_savings(movement.name(), true);
                tracing::info!(
                    member_id = %member_id,
                    operation = movement.name(),
                    amount = %amount,
                    balance = %receipt.account.current_balance,
                    "Savings updated"
                );
            }
            Err(err) if err.is_domain() => {
                metrics.record_savings(movement.name(), false);
                tracing::warn!(
                    member_id = %member_id,
                    operation = movement.name(),
                    amount = %amount,
                    error = %err,
                    "Savings operation rejected"
                );
            }
            Err(_) => {}
        }
        result
    }

    fn apply_in_unit(
        &self,
        movement: Movement,
        member_id: MemberId,
        amount: Money,
        description: Option<&str>,
        created_by: Option<ActorId>,
    ) -> Result<SavingsReceipt> {
        super::require_within_max(movement.name(), amount)?;
        let now = self.ledger.now();
        let mut uow = self.ledger.storage().begin();
        let mut member = super::load_current_member(&uow, member_id, movement.name())?;
        let mut account = match find_account(&uow, &member)? {
            Some(account) => account,
            None => open_account(&mut uow, &member, now)?,
        };

        let balance_after = match movement {
            Movement::Deposit => {
                let balance = account.apply_deposit(amount, now)?;
                member.totals.current_savings = member.totals.current_savings.checked_add(amount)?;
                member.totals.total_contributed =
                    member.totals.total_contributed.checked_add(amount)?;
                balance
            }
            Movement::Withdrawal => {
                let balance = account.apply_withdrawal(amount, now)?;
                member.totals.current_savings = member.totals.current_savings.checked_sub(amount)?;
                member.totals.total_withdrawn = member.totals.total_withdrawn.checked_add(amount)?;
                balance
            }
            Movement::Interest => {
                let balance = account.apply_interest(amount, now)?;
                member.totals.current_savings = member.totals.current_savings.checked_add(amount)?;
                balance
            }
        };
        member.updated_at = now;

        uow.put(&account)?;
        uow.put(&member)?;

        let txn = Transaction::record(
            member.group_id,
            member_id,
            movement.kind(),
            amount,
            balance_after,
            description.unwrap_or_else(|| movement.default_description()),
            Reference::Savings(account.id),
            created_by,
            now,
        );
        super::post_transaction(&mut uow, &txn)?;
        uow.commit()?;

        Ok(SavingsReceipt {
            account,
            transaction: txn,
        })
    }

    /// Balances and activity of one member
    pub fn summary(&self, member_id: MemberId) -> Result<SavingsSummary> {
        let account = self.account(member_id)?;
        let transaction_count = self
            .ledger
            .reference_transactions(Reference::Savings(account.id))?
            .len();
        Ok(SavingsSummary {
            member_id,
            current_balance: account.current_balance,
            total_deposits: account.total_deposits,
            total_withdrawals: account.total_withdrawals,
            interest_earned: account.interest_earned,
            last_deposit_date: account.last_deposit_date,
            last_withdrawal_date: account.last_withdrawal_date,
            transaction_count,
        })
    }

    /// Σ balances across the group's accounts
    pub fn group_total_savings(&self, group_id: GroupId) -> Result<Money> {
        let members = self.ledger.members().group_members(group_id)?;
        let mut total = Money::ZERO;
        for member in &members {
            if let Some(account) = find_account(self.ledger.storage(), member)? {
                total += account.current_balance;
            }
        }
        Ok(total)
    }

    /// Savings movements of a member dated within `[from, to]`, oldest first
    pub fn history(
        &self,
        member_id: MemberId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        if to < from {
            return Err(Error::InvalidInput(format!(
                "history range ends ({}) before it starts ({})",
                to, from
            )));
        }
        Ok(self
            .ledger
            .member_transactions(member_id)?
            .into_iter()
            .filter(|t| t.kind.affects_savings() && t.within(from, to))
            .collect())
    }
}

fn find_account<R: Reader>(reader: &R, member: &GroupMember) -> Result<Option<SavingsAccount>> {
    let key = UniqueKey::SavingsAccount {
        group: member.group_id.as_uuid(),
        member: member.id.as_uuid(),
    };
    match reader.find_unique(&key)? {
        Some(id) => Ok(Some(reader.fetch(id)?)),
        None => Ok(None),
    }
}

fn open_account(
    uow: &mut UnitOfWork<'_>,
    member: &GroupMember,
    now: DateTime<Utc>,
) -> Result<SavingsAccount> {
    if let Some(existing) = find_account(uow, member)? {
        return Ok(existing);
    }
    let account = SavingsAccount::open(member.group_id, member.id, now);
    uow.claim_unique(
        &UniqueKey::SavingsAccount {
            group: member.group_id.as_uuid(),
            member: member.id.as_uuid(),
        },
        account.id.as_uuid(),
    )?;
    uow.put(&account)?;
    tracing::debug!(member_id = %member.id, account_id = %account.id, "Savings account opened");
    Ok(account)
}
