//! Ledger Service
//!
//! Orchestrates balance mutations. Every mutating operation follows the same
//! shape:
//!
//! 1. validate the request without touching storage
//! 2. open a transaction and lock the involved accounts in ascending
//!    `UserId` order, taking a prepaid code's lock before its account's
//! 3. mutate accounts and append charges inside the transaction
//! 4. commit, then run post-commit side effects (order settlement,
//!    notification) whose failures are logged and never undo the charge

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use core_kernel::{HealthCheckResult, Money, PortError, UserId};

use crate::account::{Account, AccountFilter, NewAccount, DEFAULT_LEVEL};
use crate::bonus::BonusCalculator;
use crate::charge::{Charge, ChargeFilter, ChargePage, ChargeType, NewCharge, Pagination};
use crate::config::LedgerConfig;
use crate::context::RequestContext;
use crate::error::LedgerError;
use crate::estimator::{BalanceEstimator, PerDayEstimate, NO_PROJECTION};
use crate::invitee::Invitee;
use crate::ports::{
    ChargeNotification, ExternalBalanceProvider, LedgerBackend, LedgerTransaction, Notifier, OrderSource,
};
use crate::precharge::{NewPreCharges, PreCharge, PreChargeFilter, PreChargePage};
use crate::referral::ReferralRewardEngine;

const TRANSFER_SOURCE: &str = "transfer";
const COUPON_SOURCE: &str = "coupon";
/// Fresh codes tried per issued code before giving up on collisions
const CODE_ATTEMPTS: usize = 5;

/// A request to mutate one account's balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub user_id: UserId,
    /// Positive credits, negative debits
    pub value: Money,
    pub charge_type: ChargeType,
    pub come_from: String,
    pub trading_number: Option<String>,
    pub charge_time: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
}

impl ChargeRequest {
    pub fn new(user_id: impl Into<UserId>, value: Money, charge_type: ChargeType) -> Self {
        Self {
            user_id: user_id.into(),
            value,
            charge_type,
            come_from: "system".to_string(),
            trading_number: None,
            charge_time: None,
            remarks: None,
        }
    }

    /// A tenant top-up
    pub fn top_up(user_id: impl Into<UserId>, value: Money) -> Self {
        Self::new(user_id, value, ChargeType::Money)
    }

    pub fn come_from(mut self, come_from: impl Into<String>) -> Self {
        self.come_from = come_from.into();
        self
    }

    pub fn trading_number(mut self, trading_number: impl Into<String>) -> Self {
        self.trading_number = Some(trading_number.into());
        self
    }

    pub fn at(mut self, charge_time: DateTime<Utc>) -> Self {
        self.charge_time = Some(charge_time);
        self
    }

    pub fn remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    fn into_new_charge(self, operator: &UserId) -> NewCharge {
        NewCharge {
            charge_id: None,
            user_id: self.user_id,
            operator: operator.clone(),
            value: self.value,
            charge_type: self.charge_type,
            come_from: self.come_from,
            trading_number: self.trading_number,
            charge_time: self.charge_time,
            remarks: self.remarks,
        }
    }
}

/// Result of [`LedgerService::apply_charge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeOutcome {
    pub charge: Charge,
    pub is_first_charge: bool,
    /// Top-up bonus credited to the same account
    pub bonus: Option<Charge>,
    /// Referral reward credited to the inviter
    pub reward: Option<Charge>,
    /// Account balance after commit
    pub balance: Money,
    /// Inviter balance after commit, set when a reward was paid
    pub inviter_balance: Option<Money>,
}

/// A balance movement between two accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: UserId,
    pub to: UserId,
    pub value: Money,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub debit: Charge,
    pub credit: Charge,
}

/// Result of [`LedgerService::use_precharge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreChargeRedemption {
    pub precharge: PreCharge,
    pub charge: Charge,
    /// Account balance after commit
    pub balance: Money,
}

/// Where a displayed balance came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSource {
    Local,
    External,
}

/// An account as shown to readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub account: Account,
    pub display_balance: Money,
    pub balance_source: BalanceSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPage {
    pub accounts: Vec<Account>,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteePage {
    pub invitees: Vec<Invitee>,
    pub total_count: u64,
}

pub struct LedgerService {
    backend: Arc<dyn LedgerBackend>,
    orders: Arc<dyn OrderSource>,
    notifier: Arc<dyn Notifier>,
    external_balance: Option<Arc<dyn ExternalBalanceProvider>>,
    config: LedgerConfig,
    bonus: BonusCalculator,
    referral: ReferralRewardEngine,
    estimator: BalanceEstimator,
}

impl LedgerService {
    pub fn new(
        config: LedgerConfig,
        backend: Arc<dyn LedgerBackend>,
        orders: Arc<dyn OrderSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            bonus: BonusCalculator::from_config(&config),
            referral: ReferralRewardEngine::from_config(&config),
            estimator: BalanceEstimator::from_config(&config),
            backend,
            orders,
            notifier,
            external_balance: None,
            config,
        }
    }

    /// Sources display balances from `provider` when
    /// `external_balance_enabled` is set
    pub fn with_external_balance(mut self, provider: Arc<dyn ExternalBalanceProvider>) -> Self {
        self.external_balance = Some(provider);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub async fn health(&self) -> HealthCheckResult {
        self.backend.health_check().await
    }

    /// Applies a signed charge to an account
    ///
    /// Records the charge, credits any top-up bonus, and pays the inviter's
    /// referral reward on the account's first top-up, all in one
    /// transaction. Fails with `InvalidChargeValue` before touching storage
    /// when `|value|` exceeds the caller's limit.
    #[instrument(
        skip(self, ctx, request),
        fields(user_id = %request.user_id, value = %request.value, charge_type = %request.charge_type)
    )]
    pub async fn apply_charge(
        &self,
        ctx: &RequestContext,
        request: ChargeRequest,
    ) -> Result<ChargeOutcome, LedgerError> {
        self.check_charge_value(ctx, &request.user_id, request.value)?;

        // The inviter must be known before locking so both rows are taken in order
        let inviter = if self.referral.is_enabled() {
            self.backend
                .get_read_only(&request.user_id)
                .await
                .map_err(LedgerError::for_account(&request.user_id, "load account"))?
                .inviter
        } else {
            None
        };

        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(LedgerError::persistence("begin transaction"))?;
        let result = self.apply_locked(tx.as_mut(), ctx, request, inviter.as_ref()).await;
        let outcome = finish(tx, result).await?;

        info!(
            charge_id = %outcome.charge.charge_id,
            balance = %outcome.balance,
            is_first_charge = outcome.is_first_charge,
            "charge applied"
        );

        let credited = outcome.charge.value + outcome.bonus.as_ref().map_or(Money::ZERO, |b| b.value);
        if credited.is_positive() {
            self.settle_orders(&outcome.charge.user_id).await;
        }
        self.notify(&outcome);

        Ok(outcome)
    }

    async fn apply_locked(
        &self,
        tx: &mut dyn LedgerTransaction,
        ctx: &RequestContext,
        request: ChargeRequest,
        inviter: Option<&UserId>,
    ) -> Result<ChargeOutcome, LedgerError> {
        let user_id = request.user_id.clone();

        let mut lock_order: Vec<&UserId> = std::iter::once(&user_id).chain(inviter).collect();
        lock_order.sort();
        lock_order.dedup();

        let mut inviter_live = false;
        for id in lock_order {
            match tx.get_for_update(id).await {
                Ok(_) => inviter_live |= Some(id) == inviter && *id != user_id,
                Err(e) if e.is_not_found() && Some(id) == inviter && *id != user_id => {
                    warn!(inviter = %id, "inviter account missing, referral reward skipped");
                }
                Err(e) => return Err(LedgerError::for_account(id, "lock account")(e)),
            }
        }

        let mut account = tx
            .get_for_update(&user_id)
            .await
            .map_err(LedgerError::for_account(&user_id, "lock account"))?;
        if self.referral.is_enabled() && account.inviter.as_ref() != inviter {
            return Err(LedgerError::Persistence {
                context: "lock account".to_string(),
                source: PortError::conflict(format!("inviter of {user_id} changed while locking")),
            });
        }

        let include_debits = self.config.debit_counts_as_first_charge;
        let is_first_charge = request.charge_type.counts_as_top_up(request.value, include_debits)
            && !tx
                .has_top_up(&user_id, include_debits)
                .await
                .map_err(LedgerError::persistence("first charge lookup"))?;

        let now = Utc::now();
        let charge = post(tx, &mut account, request.into_new_charge(&ctx.operator), now).await?;

        let bonus_value = self.bonus.bonus(charge.value, &charge.charge_type);
        let bonus = if bonus_value.is_positive() {
            let mut credit = NewCharge::new(user_id.clone(), bonus_value, ChargeType::Bonus)
                .operator(ctx.operator.clone())
                .come_from(charge.come_from.clone());
            credit.remarks = charge.remarks.clone();
            debug!(bonus = %bonus_value, "crediting top-up bonus");
            Some(post(tx, &mut account, credit, now).await?)
        } else {
            None
        };

        let reward = if is_first_charge && inviter_live {
            self.pay_referral(tx, ctx, &account, &charge, now).await?
        } else {
            None
        };
        let (reward, inviter_balance) = reward.unzip();

        Ok(ChargeOutcome {
            balance: account.balance,
            charge,
            is_first_charge,
            bonus,
            reward,
            inviter_balance,
        })
    }

    async fn pay_referral(
        &self,
        tx: &mut dyn LedgerTransaction,
        ctx: &RequestContext,
        account: &Account,
        charge: &Charge,
        now: DateTime<Utc>,
    ) -> Result<Option<(Charge, Money)>, LedgerError> {
        let relation = tx
            .get_invitee_for_update(&account.user_id)
            .await
            .map_err(LedgerError::persistence("load referral"))?;
        let Some(reward) = self.referral.maybe_reward(account, charge, true, relation.as_ref()) else {
            return Ok(None);
        };

        let mut inviter = tx
            .get_for_update(&reward.inviter)
            .await
            .map_err(LedgerError::for_account(&reward.inviter, "lock inviter"))?;
        let credit = NewCharge::new(reward.inviter.clone(), reward.value, ChargeType::Bonus)
            .operator(ctx.operator.clone())
            .remarks(reward.remarks.clone());
        let credit = post(tx, &mut inviter, credit, now).await?;

        let mut relation =
            relation.unwrap_or_else(|| Invitee::new(reward.inviter.clone(), reward.invitee.clone(), now));
        relation.mark_rewarded(reward.value, now);
        tx.save_invitee(&relation)
            .await
            .map_err(LedgerError::persistence("save referral"))?;

        info!(inviter = %reward.inviter, invitee = %reward.invitee, value = %reward.value, "referral reward credited");
        Ok(Some((credit, inviter.balance)))
    }

    /// One page of charge history with totals over the whole filtered set
    #[instrument(skip(self))]
    pub async fn list_charges(&self, filter: &ChargeFilter, page: &Pagination) -> Result<ChargePage, LedgerError> {
        page.validate()?;
        let (charges, totals) = tokio::try_join!(
            self.backend.query(filter, page),
            self.backend.aggregate_total(filter),
        )
        .map_err(LedgerError::persistence("list charges"))?;

        Ok(ChargePage {
            charges,
            total_count: totals.count,
            total_value: totals.total_value,
        })
    }

    /// Whole days until the account goes negative, or a sentinel
    ///
    /// See [`BalanceEstimator::days_to_owe`] for the sentinel values.
    #[instrument(skip(self))]
    pub async fn estimate_days_to_owe(&self, user_id: &UserId) -> Result<i64, LedgerError> {
        if !self.config.estimator_enabled {
            return Ok(NO_PROJECTION);
        }
        let account = self
            .backend
            .get_read_only(user_id)
            .await
            .map_err(LedgerError::for_account(user_id, "load account"))?;
        let orders = self
            .orders
            .active_hourly_orders(user_id)
            .await
            .map_err(LedgerError::persistence("load orders"))?;
        Ok(self.estimator.days_to_owe(account.balance, &orders))
    }

    /// Daily spend and remaining whole days at the current burn rate
    #[instrument(skip(self))]
    pub async fn estimate_per_day(&self, user_id: &UserId) -> Result<PerDayEstimate, LedgerError> {
        let account = self
            .backend
            .get_read_only(user_id)
            .await
            .map_err(LedgerError::for_account(user_id, "load account"))?;
        let orders = self
            .orders
            .active_hourly_orders(user_id)
            .await
            .map_err(LedgerError::persistence("load orders"))?;
        Ok(self.estimator.per_day(account.balance, &orders)?)
    }

    /// Opens an account, recording the referral relation if an inviter is named
    #[instrument(skip(self, ctx, request), fields(user_id = %request.user_id))]
    pub async fn create_account(&self, ctx: &RequestContext, request: NewAccount) -> Result<Account, LedgerError> {
        let now = Utc::now();
        let account = Account::open(
            request.user_id.clone(),
            request.level.unwrap_or(DEFAULT_LEVEL),
            request.inviter,
            now,
        )?;

        if let Some(inviter) = &account.inviter {
            if *inviter == account.user_id {
                return Err(LedgerError::InvalidArgument("an account cannot invite itself".into()));
            }
            self.backend
                .get_read_only(inviter)
                .await
                .map_err(LedgerError::for_account(inviter, "load inviter"))?;
        }

        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(LedgerError::persistence("begin transaction"))?;
        let result = async {
            tx.insert_account(&account).await.map_err(|e| match e {
                PortError::Conflict { .. } => LedgerError::AccountExists(account.user_id.clone()),
                other => LedgerError::persistence("insert account")(other),
            })?;
            if let Some(inviter) = &account.inviter {
                let relation = Invitee::new(inviter.clone(), account.user_id.clone(), now);
                tx.save_invitee(&relation)
                    .await
                    .map_err(LedgerError::persistence("save referral"))?;
            }
            Ok::<(), LedgerError>(())
        }
        .await;
        finish(tx, result).await?;

        info!(operator = %ctx.operator, level = account.level, inviter = ?account.inviter, "account created");
        Ok(account)
    }

    /// Reads an account, sourcing the display balance externally when enabled
    ///
    /// Fails with `ExternalService` if the provider is unreachable.
    #[instrument(skip(self, ctx))]
    pub async fn get_account(&self, ctx: &RequestContext, user_id: &UserId) -> Result<AccountView, LedgerError> {
        let account = self
            .backend
            .get_read_only(user_id)
            .await
            .map_err(LedgerError::for_account(user_id, "load account"))?;

        match self.external_provider() {
            Some(provider) => {
                let balance = provider
                    .balance(user_id, &ctx.metadata())
                    .await
                    .map_err(LedgerError::ExternalService)?;
                Ok(AccountView {
                    account,
                    display_balance: balance,
                    balance_source: BalanceSource::External,
                })
            }
            None => Ok(local_view(account)),
        }
    }

    /// Like [`get_account`](Self::get_account) but falls back to the local
    /// balance when the external provider fails
    pub async fn get_account_or_local(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
    ) -> Result<AccountView, LedgerError> {
        match self.get_account(ctx, user_id).await {
            Err(LedgerError::ExternalService(e)) => {
                warn!(%user_id, error = %e, "external balance unavailable, showing local balance");
                let account = self
                    .backend
                    .get_read_only(user_id)
                    .await
                    .map_err(LedgerError::for_account(user_id, "load account"))?;
                Ok(local_view(account))
            }
            other => other,
        }
    }

    #[instrument(skip(self))]
    pub async fn list_accounts(&self, filter: &AccountFilter, page: &Pagination) -> Result<AccountPage, LedgerError> {
        page.validate()?;
        let (accounts, total_count) = self
            .backend
            .list_accounts(filter, page)
            .await
            .map_err(LedgerError::persistence("list accounts"))?;
        Ok(AccountPage { accounts, total_count })
    }

    #[instrument(skip(self))]
    pub async fn list_invitees(&self, inviter: &UserId, page: &Pagination) -> Result<InviteePage, LedgerError> {
        page.validate()?;
        let (invitees, total_count) = self
            .backend
            .list_invitees(inviter, page)
            .await
            .map_err(LedgerError::persistence("list invitees"))?;
        Ok(InviteePage { invitees, total_count })
    }

    #[instrument(skip(self, ctx))]
    pub async fn change_level(&self, ctx: &RequestContext, user_id: &UserId, level: i32) -> Result<Account, LedgerError> {
        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(LedgerError::persistence("begin transaction"))?;
        let result = async {
            let mut account = tx
                .get_for_update(user_id)
                .await
                .map_err(LedgerError::for_account(user_id, "lock account"))?;
            account.set_level(level, Utc::now())?;
            tx.save_account(&account)
                .await
                .map_err(LedgerError::persistence("save account"))?;
            Ok::<Account, LedgerError>(account)
        }
        .await;
        let account = finish(tx, result).await?;

        info!(operator = %ctx.operator, level, "account level changed");
        Ok(account)
    }

    /// Soft-deletes an account; its charge history stays queryable
    #[instrument(skip(self, ctx))]
    pub async fn delete_account(&self, ctx: &RequestContext, user_id: &UserId) -> Result<(), LedgerError> {
        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(LedgerError::persistence("begin transaction"))?;
        let result = async {
            let mut account = tx
                .get_for_update(user_id)
                .await
                .map_err(LedgerError::for_account(user_id, "lock account"))?;
            account.soft_delete(Utc::now());
            tx.save_account(&account)
                .await
                .map_err(LedgerError::persistence("save account"))
        }
        .await;
        finish(tx, result).await?;

        info!(operator = %ctx.operator, "account deleted");
        Ok(())
    }

    /// Moves balance between two accounts as a pair of transfer charges
    ///
    /// Transfers never earn bonuses or referral rewards.
    #[instrument(skip(self, ctx, request), fields(from = %request.from, to = %request.to, value = %request.value))]
    pub async fn transfer(&self, ctx: &RequestContext, request: TransferRequest) -> Result<TransferOutcome, LedgerError> {
        if request.from == request.to {
            return Err(LedgerError::InvalidArgument("cannot transfer to the same account".into()));
        }
        if !request.value.is_positive() {
            return Err(LedgerError::InvalidTransferValue {
                user_id: request.from.clone(),
                value: request.value,
            });
        }
        self.check_charge_value(ctx, &request.from, request.value)?;

        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(LedgerError::persistence("begin transaction"))?;
        let result = self.transfer_locked(tx.as_mut(), ctx, &request).await;
        let outcome = finish(tx, result).await?;

        info!(debit = %outcome.debit.charge_id, credit = %outcome.credit.charge_id, "transfer applied");
        self.settle_orders(&request.to).await;
        Ok(outcome)
    }

    async fn transfer_locked(
        &self,
        tx: &mut dyn LedgerTransaction,
        ctx: &RequestContext,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, LedgerError> {
        let (first, second) = if request.from < request.to {
            (&request.from, &request.to)
        } else {
            (&request.to, &request.from)
        };
        for id in [first, second] {
            tx.get_for_update(id)
                .await
                .map_err(LedgerError::for_account(id, "lock account"))?;
        }

        let mut source = tx
            .get_for_update(&request.from)
            .await
            .map_err(LedgerError::for_account(&request.from, "lock account"))?;
        if !source.balance.is_positive() {
            return Err(LedgerError::NoBalanceToTransfer {
                user_id: source.user_id,
                balance: source.balance,
            });
        }
        if request.value > source.balance {
            return Err(LedgerError::InvalidTransferValue {
                user_id: source.user_id,
                value: request.value,
            });
        }
        let mut target = tx
            .get_for_update(&request.to)
            .await
            .map_err(LedgerError::for_account(&request.to, "lock account"))?;

        let now = Utc::now();
        let mut debit = NewCharge::new(request.from.clone(), -request.value, ChargeType::Transfer)
            .operator(ctx.operator.clone())
            .come_from(TRANSFER_SOURCE);
        let mut credit = NewCharge::new(request.to.clone(), request.value, ChargeType::Transfer)
            .operator(ctx.operator.clone())
            .come_from(TRANSFER_SOURCE);
        debit.remarks = request.remarks.clone();
        credit.remarks = request.remarks.clone();

        let debit = post(tx, &mut source, debit, now).await?;
        let credit = post(tx, &mut target, credit, now).await?;
        Ok(TransferOutcome { debit, credit })
    }

    /// Issues a batch of prepaid codes in one transaction
    ///
    /// The code price is bounded by the caller's charge limit.
    #[instrument(skip(self, ctx, request), fields(number = request.number, price = %request.price))]
    pub async fn create_precharges(
        &self,
        ctx: &RequestContext,
        request: NewPreCharges,
    ) -> Result<Vec<PreCharge>, LedgerError> {
        let now = Utc::now();
        request.validate(now)?;
        self.check_charge_value(ctx, &ctx.operator, request.price)?;

        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(LedgerError::persistence("begin transaction"))?;
        let result = async {
            let mut issued = Vec::with_capacity(request.number as usize);
            for _ in 0..request.number {
                issued.push(issue_code(tx.as_mut(), &request, &ctx.operator, now).await?);
            }
            Ok::<Vec<PreCharge>, LedgerError>(issued)
        }
        .await;
        let issued = finish(tx, result).await?;

        info!(operator = %ctx.operator, issued = issued.len(), "prepaid codes issued");
        Ok(issued)
    }

    #[instrument(skip(self))]
    pub async fn get_precharge(&self, code: &str) -> Result<PreCharge, LedgerError> {
        self.backend
            .get_precharge(code)
            .await
            .map_err(LedgerError::for_precharge(code, "load prepaid code"))
    }

    /// Live codes, newest first
    #[instrument(skip(self))]
    pub async fn list_precharges(
        &self,
        filter: &PreChargeFilter,
        page: &Pagination,
    ) -> Result<PreChargePage, LedgerError> {
        page.validate()?;
        let (precharges, total_count) = self
            .backend
            .list_precharges(filter, page)
            .await
            .map_err(LedgerError::persistence("list prepaid codes"))?;
        Ok(PreChargePage { precharges, total_count })
    }

    /// Marks a code handed out to a customer
    #[instrument(skip(self, ctx, remarks))]
    pub async fn dispatch_precharge(
        &self,
        ctx: &RequestContext,
        code: &str,
        remarks: Option<String>,
    ) -> Result<PreCharge, LedgerError> {
        let precharge = self
            .update_precharge(code, |precharge| precharge.dispatch(remarks))
            .await?;
        info!(operator = %ctx.operator, "prepaid code dispatched");
        Ok(precharge)
    }

    /// Soft-deletes a code so it can no longer be listed or redeemed
    #[instrument(skip(self, ctx))]
    pub async fn delete_precharge(&self, ctx: &RequestContext, code: &str) -> Result<(), LedgerError> {
        self.update_precharge(code, |precharge| {
            precharge.soft_delete(Utc::now());
            Ok(())
        })
        .await?;
        info!(operator = %ctx.operator, "prepaid code deleted");
        Ok(())
    }

    async fn update_precharge(
        &self,
        code: &str,
        change: impl FnOnce(&mut PreCharge) -> Result<(), LedgerError> + Send,
    ) -> Result<PreCharge, LedgerError> {
        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(LedgerError::persistence("begin transaction"))?;
        let result = async {
            let mut precharge = lock_precharge(tx.as_mut(), code).await?;
            change(&mut precharge)?;
            tx.save_precharge(&precharge)
                .await
                .map_err(LedgerError::persistence("save prepaid code"))?;
            Ok::<PreCharge, LedgerError>(precharge)
        }
        .await;
        finish(tx, result).await
    }

    /// Redeems a code into `user_id`'s balance as a coupon charge
    ///
    /// A code is redeemable once, until its expiry. Coupon credits earn no
    /// bonus and never count as the account's first top-up.
    #[instrument(skip(self, ctx))]
    pub async fn use_precharge(
        &self,
        ctx: &RequestContext,
        code: &str,
        user_id: &UserId,
    ) -> Result<PreChargeRedemption, LedgerError> {
        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(LedgerError::persistence("begin transaction"))?;
        let result = self.redeem_locked(tx.as_mut(), ctx, code, user_id).await;
        let redemption = finish(tx, result).await?;

        info!(
            charge_id = %redemption.charge.charge_id,
            balance = %redemption.balance,
            "prepaid code redeemed"
        );
        self.settle_orders(user_id).await;
        Ok(redemption)
    }

    async fn redeem_locked(
        &self,
        tx: &mut dyn LedgerTransaction,
        ctx: &RequestContext,
        code: &str,
        user_id: &UserId,
    ) -> Result<PreChargeRedemption, LedgerError> {
        let mut precharge = lock_precharge(tx, code).await?;
        let now = Utc::now();
        precharge.redeem(user_id.clone(), now)?;

        let mut account = tx
            .get_for_update(user_id)
            .await
            .map_err(LedgerError::for_account(user_id, "lock account"))?;
        let credit = NewCharge::new(user_id.clone(), precharge.price, ChargeType::Coupon)
            .operator(ctx.operator.clone())
            .come_from(COUPON_SOURCE)
            .remarks(COUPON_SOURCE);
        let charge = post(tx, &mut account, credit, now).await?;
        tx.save_precharge(&precharge)
            .await
            .map_err(LedgerError::persistence("save prepaid code"))?;

        Ok(PreChargeRedemption {
            precharge,
            charge,
            balance: account.balance,
        })
    }

    /// Reserves `amount` of the account's balance
    ///
    /// No charge is recorded; the funds stay part of the account's total.
    #[instrument(skip(self, ctx))]
    pub async fn freeze_balance(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        amount: Money,
    ) -> Result<Account, LedgerError> {
        let account = self
            .update_frozen(user_id, amount, |account, now| account.freeze(amount, now))
            .await?;
        info!(operator = %ctx.operator, frozen_balance = %account.frozen_balance, "balance frozen");
        Ok(account)
    }

    /// Returns `amount` of the frozen balance to the spendable balance
    #[instrument(skip(self, ctx))]
    pub async fn unfreeze_balance(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        amount: Money,
    ) -> Result<Account, LedgerError> {
        let account = self
            .update_frozen(user_id, amount, |account, now| account.unfreeze(amount, now))
            .await?;
        info!(operator = %ctx.operator, frozen_balance = %account.frozen_balance, "balance unfrozen");
        self.settle_orders(user_id).await;
        Ok(account)
    }

    async fn update_frozen(
        &self,
        user_id: &UserId,
        amount: Money,
        change: impl FnOnce(&mut Account, DateTime<Utc>) -> Result<(), LedgerError> + Send,
    ) -> Result<Account, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidArgument(format!(
                "amount must be positive, got {amount}"
            )));
        }
        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(LedgerError::persistence("begin transaction"))?;
        let result = async {
            let mut account = tx
                .get_for_update(user_id)
                .await
                .map_err(LedgerError::for_account(user_id, "lock account"))?;
            change(&mut account, Utc::now())?;
            tx.save_account(&account)
                .await
                .map_err(LedgerError::persistence("save account"))?;
            Ok::<Account, LedgerError>(account)
        }
        .await;
        finish(tx, result).await
    }

    fn check_charge_value(&self, ctx: &RequestContext, user_id: &UserId, value: Money) -> Result<(), LedgerError> {
        let limit = self.config.charge_value_limit(&ctx.roles);
        if value.abs() > limit {
            warn!(%user_id, %value, %limit, operator = %ctx.operator, "charge value exceeds limit");
            return Err(LedgerError::InvalidChargeValue {
                user_id: user_id.clone(),
                value,
            });
        }
        Ok(())
    }

    fn external_provider(&self) -> Option<&Arc<dyn ExternalBalanceProvider>> {
        self.external_balance
            .as_ref()
            .filter(|_| self.config.external_balance_enabled)
    }

    async fn settle_orders(&self, user_id: &UserId) {
        match self.orders.settle_owed_orders(user_id).await {
            Ok(0) => {}
            Ok(settled) => info!(%user_id, settled, "owed orders settled"),
            Err(e) => warn!(%user_id, error = %e, "failed to settle owed orders"),
        }
    }

    fn notify(&self, outcome: &ChargeOutcome) {
        if !self.config.notify_account_charged {
            return;
        }
        let bonus = outcome.bonus.as_ref().map_or(Money::ZERO, |b| b.value);
        let mut notifications = vec![ChargeNotification::for_charge(
            &outcome.charge,
            bonus,
            outcome.balance,
            outcome.is_first_charge,
        )];
        if let (Some(reward), Some(balance)) = (&outcome.reward, outcome.inviter_balance) {
            notifications.push(ChargeNotification::for_charge(reward, Money::ZERO, balance, false));
        }

        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            for notification in notifications {
                let charge_id = notification.charge_id;
                if let Err(e) = notifier.account_charged(notification).await {
                    warn!(%charge_id, error = %e, "charge notification failed");
                }
            }
        });
    }
}

fn local_view(account: Account) -> AccountView {
    AccountView {
        display_balance: account.balance,
        balance_source: BalanceSource::Local,
        account,
    }
}

/// Applies a charge to a locked account and records it
async fn post(
    tx: &mut dyn LedgerTransaction,
    account: &mut Account,
    charge: NewCharge,
    now: DateTime<Utc>,
) -> Result<Charge, LedgerError> {
    account.apply(charge.value, &charge.charge_type, now)?;
    tx.save_account(account)
        .await
        .map_err(LedgerError::persistence("save account"))?;
    tx.append_charge(charge)
        .await
        .map_err(LedgerError::persistence("append charge"))
}

async fn lock_precharge(tx: &mut dyn LedgerTransaction, code: &str) -> Result<PreCharge, LedgerError> {
    tx.get_precharge_for_update(code)
        .await
        .map_err(LedgerError::for_precharge(code, "lock prepaid code"))?
        .ok_or_else(|| LedgerError::PreChargeNotFound(code.to_string()))
}

/// Inserts one code, drawing a fresh one on collision
async fn issue_code(
    tx: &mut dyn LedgerTransaction,
    request: &NewPreCharges,
    operator: &UserId,
    now: DateTime<Utc>,
) -> Result<PreCharge, LedgerError> {
    let mut attempt = 1;
    loop {
        let precharge = PreCharge::issue(PreCharge::generate_code(), request, operator.clone(), now);
        match tx.insert_precharge(&precharge).await {
            Ok(()) => return Ok(precharge),
            Err(PortError::Conflict { .. }) if attempt < CODE_ATTEMPTS => {
                debug!(code = %precharge.code, attempt, "prepaid code collision, drawing another");
                attempt += 1;
            }
            Err(e) => return Err(LedgerError::persistence("insert prepaid code")(e)),
        }
    }
}

/// Commits on success, rolls back on failure
async fn finish<T>(tx: Box<dyn LedgerTransaction>, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(LedgerError::persistence("commit"))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}
