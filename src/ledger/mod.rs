use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::access::AccessControl;

mod address;
pub(crate) mod codec;

pub use address::{Address, AddressParseError, ADDRESS_LEN};

/// Raw token units; `10^decimals` of them make one displayed token.
pub type Amount = u128;

pub const DEFAULT_SYMBOL: &str = "MEXC";
pub const DEFAULT_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("caller {caller} is not the ledger admin")]
    Unauthorized { caller: Address },
    #[error("peer-to-peer transfers are disabled")]
    TransfersDisabled,
    #[error("account {account} is blacklisted")]
    Blacklisted { account: Address },
    #[error("insufficient funds in account {account}: has {available}, needs {requested}")]
    InsufficientBalance {
        account: Address,
        available: Amount,
        requested: Amount,
    },
    #[error("amount must be greater than zero")]
    InvalidAmount,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("account {account} is not blacklisted")]
    NotBlacklisted { account: Address },
    #[error("{caller} cannot move funds owned by {owner}: allowances are not supported")]
    DelegationUnsupported { caller: Address, owner: Address },
    #[error("total supply {total_supply} does not match the sum of balances {balances}")]
    InvariantViolation {
        total_supply: Amount,
        balances: Amount,
    },
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}

impl LedgerError {
    /// Stable identifier for harness output.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Unauthorized { .. } => "unauthorized",
            LedgerError::TransfersDisabled => "transfers_disabled",
            LedgerError::Blacklisted { .. } => "blacklisted",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::InvalidAmount => "invalid_amount",
            LedgerError::Overflow => "overflow",
            LedgerError::NotBlacklisted { .. } => "not_blacklisted",
            LedgerError::DelegationUnsupported { .. } => "delegation_unsupported",
            LedgerError::InvariantViolation { .. } => "invariant_violation",
            LedgerError::CorruptSnapshot(_) => "corrupt_snapshot",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            decimals: DEFAULT_DECIMALS,
        }
    }
}

/// Read view of a single holder.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Account {
    pub balance: Amount,
    pub blacklisted: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Mint {
        to: Address,
        #[serde(with = "codec::amount_str")]
        amount: Amount,
    },
    Transfer {
        from: Address,
        to: Address,
        #[serde(with = "codec::amount_str")]
        amount: Amount,
    },
    Burn {
        from: Address,
        #[serde(with = "codec::amount_str")]
        amount: Amount,
    },
    Confiscate {
        target: Address,
        #[serde(with = "codec::amount_str")]
        seized: Amount,
        beneficiary: Address,
    },
    Blacklisted {
        target: Address,
    },
    TransfersToggled {
        enabled: bool,
    },
}

/// Outcome of a committed call: the height it landed at and what it emitted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub height: u64,
    pub events: Vec<LedgerEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub token: TokenMetadata,
    pub admin: Address,
    pub transfer_disabled: bool,
    pub total_supply: Amount,
    pub balances: BTreeMap<Address, Amount>,
    pub blacklist: BTreeSet<Address>,
    pub events: Vec<LedgerEvent>,
    #[serde(with = "codec::hex_bytes")]
    pub state_root: [u8; 32],
}

/// The token ledger. Every mutator validates all of its preconditions before
/// writing, so a failed call leaves the state untouched.
#[derive(Clone, Debug)]
pub struct LedgerState {
    token: TokenMetadata,
    access: AccessControl,
    balances: BTreeMap<Address, Amount>,
    total_supply: Amount,
    meta: SnapshotMetadata,
    events: Vec<LedgerEvent>,
}

impl LedgerState {
    pub fn new(admin: Address) -> Self {
        Self::genesis(admin, TokenMetadata::default())
    }

    pub fn genesis(admin: Address, token: TokenMetadata) -> Self {
        info!(%admin, symbol = %token.symbol, decimals = token.decimals, "ledger genesis");
        Self {
            token,
            access: AccessControl::new(admin),
            balances: BTreeMap::new(),
            total_supply: 0,
            meta: SnapshotMetadata::default(),
            events: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.token.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.token.decimals
    }

    pub fn token(&self) -> &TokenMetadata {
        &self.token
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn admin(&self) -> Address {
        self.access.admin()
    }

    pub fn is_admin(&self, caller: &Address) -> bool {
        self.access.is_admin(caller)
    }

    pub fn transfer_disabled(&self) -> bool {
        self.access.transfer_disabled()
    }

    pub fn is_blacklisted(&self, account: &Address) -> bool {
        self.access.is_blacklisted(account)
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn account(&self, account: &Address) -> Account {
        Account {
            balance: self.balance_of(account),
            blacklisted: self.is_blacklisted(account),
        }
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn height(&self) -> u64 {
        self.meta.height
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Accounts that ever held a balance, in address order.
    pub fn balances(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }

    pub fn mint(
        &mut self,
        caller: &Address,
        target: &Address,
        amount: Amount,
    ) -> Result<Receipt, LedgerError> {
        self.access.require_admin(caller)?;
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let balance = self
            .balance_of(target)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;

        self.total_supply = supply;
        self.balances.insert(*target, balance);
        Ok(self.commit(vec![LedgerEvent::Mint {
            to: *target,
            amount,
        }]))
    }

    /// Move `amount` from the caller's own account to `to`.
    pub fn transfer(
        &mut self,
        caller: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<Receipt, LedgerError> {
        self.access.check_transfer(caller, to)?;
        self.move_balance(caller, to, amount)?;
        Ok(self.commit(vec![LedgerEvent::Transfer {
            from: *caller,
            to: *to,
            amount,
        }]))
    }

    /// Delegated entry point. The transfer gate is evaluated first so a
    /// disabled or sanctioned transfer is rejected the same way as through
    /// [`Self::transfer`]; spending someone else's funds is never allowed.
    pub fn transfer_from(
        &mut self,
        caller: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<Receipt, LedgerError> {
        self.access.check_transfer(from, to)?;
        if caller != from {
            return Err(LedgerError::DelegationUnsupported {
                caller: *caller,
                owner: *from,
            });
        }
        self.transfer(caller, to, amount)
    }

    /// Destroy part of the caller's own balance.
    pub fn burn(&mut self, caller: &Address, amount: Amount) -> Result<Receipt, LedgerError> {
        if self.access.is_blacklisted(caller) {
            return Err(LedgerError::Blacklisted { account: *caller });
        }
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let remaining = self.debited_balance(caller, amount)?;
        let supply = self
            .total_supply
            .checked_sub(amount)
            .ok_or(LedgerError::Overflow)?;

        self.balances.insert(*caller, remaining);
        self.total_supply = supply;
        Ok(self.commit(vec![LedgerEvent::Burn {
            from: *caller,
            amount,
        }]))
    }

    pub fn allow_transfers(&mut self, caller: &Address) -> Result<Receipt, LedgerError> {
        self.set_transfers_enabled(caller, true)
    }

    pub fn disable_transfers(&mut self, caller: &Address) -> Result<Receipt, LedgerError> {
        self.set_transfers_enabled(caller, false)
    }

    pub fn set_transfers_enabled(
        &mut self,
        caller: &Address,
        enabled: bool,
    ) -> Result<Receipt, LedgerError> {
        let changed = self.access.set_transfers_enabled(caller, enabled)?;
        let events = if changed {
            vec![LedgerEvent::TransfersToggled { enabled }]
        } else {
            vec![]
        };
        Ok(self.commit(events))
    }

    /// Sanction `target`. The balance stays where it is until confiscated.
    pub fn black_list_address(
        &mut self,
        caller: &Address,
        target: &Address,
    ) -> Result<Receipt, LedgerError> {
        let added = self.access.blacklist(caller, target)?;
        let events = if added {
            vec![LedgerEvent::Blacklisted { target: *target }]
        } else {
            vec![]
        };
        Ok(self.commit(events))
    }

    /// Sweep a blacklisted account's whole balance into the admin's account.
    /// Total supply is unchanged.
    pub fn confiscate(
        &mut self,
        caller: &Address,
        target: &Address,
    ) -> Result<Receipt, LedgerError> {
        self.access.require_admin(caller)?;
        if !self.access.is_blacklisted(target) {
            return Err(LedgerError::NotBlacklisted { account: *target });
        }
        let admin = self.access.admin();
        let seized = self.balance_of(target);
        if seized > 0 && *target != admin {
            let credited = self
                .balance_of(&admin)
                .checked_add(seized)
                .ok_or(LedgerError::Overflow)?;
            self.balances.insert(*target, 0);
            self.balances.insert(admin, credited);
        }
        Ok(self.commit(vec![LedgerEvent::Confiscate {
            target: *target,
            seized,
            beneficiary: admin,
        }]))
    }

    /// Recompute `sum(balances)` and compare it with the tracked supply.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        let mut sum: Amount = 0;
        let mut overflowed = false;
        for balance in self.balances.values() {
            match sum.checked_add(*balance) {
                Some(next) => sum = next,
                None => {
                    overflowed = true;
                    sum = Amount::MAX;
                    break;
                }
            }
        }
        if overflowed || sum != self.total_supply {
            return Err(LedgerError::InvariantViolation {
                total_supply: self.total_supply,
                balances: sum,
            });
        }
        Ok(())
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_state_root(
            &self.token,
            &self.access,
            self.total_supply,
            &self.balances,
        )
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            token: self.token.clone(),
            admin: self.access.admin(),
            transfer_disabled: self.access.transfer_disabled(),
            total_supply: self.total_supply,
            balances: self.balances.clone(),
            blacklist: self.access.blacklisted().copied().collect(),
            events: self.events.clone(),
            state_root: self.state_root(),
        }
    }

    /// Rebuild a ledger from a snapshot, refusing one whose supply or state
    /// root does not check out.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let state = Self {
            token: snapshot.token,
            access: AccessControl::from_parts(
                snapshot.admin,
                snapshot.transfer_disabled,
                snapshot.blacklist,
            ),
            balances: snapshot.balances,
            total_supply: snapshot.total_supply,
            meta: snapshot.meta,
            events: snapshot.events,
        };
        state
            .check_invariants()
            .map_err(|err| LedgerError::CorruptSnapshot(err.to_string()))?;
        if state.state_root() != snapshot.state_root {
            return Err(LedgerError::CorruptSnapshot(
                "state root does not match contents".into(),
            ));
        }
        info!(height = state.meta.height, "ledger restored from snapshot");
        Ok(state)
    }

    fn debited_balance(&self, account: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        let available = self.balance_of(account);
        available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                account: *account,
                available,
                requested: amount,
            })
    }

    fn move_balance(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let debited = self.debited_balance(from, amount)?;
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.balances.insert(*from, debited);
        self.balances.insert(*to, credited);
        Ok(())
    }

    fn commit(&mut self, events: Vec<LedgerEvent>) -> Receipt {
        self.meta.height += 1;
        self.events.extend(events.iter().cloned());
        debug!(
            height = self.meta.height,
            events = events.len(),
            total_supply = %self.total_supply,
            "ledger call committed"
        );
        Receipt {
            height: self.meta.height,
            events,
        }
    }
}

fn compute_state_root(
    token: &TokenMetadata,
    access: &AccessControl,
    total_supply: Amount,
    balances: &BTreeMap<Address, Amount>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();

    let mut header = Sha256::new();
    header.update(b"header");
    header.update(token.symbol.as_bytes());
    header.update([token.decimals]);
    header.update(access.admin().as_bytes());
    header.update([access.transfer_disabled() as u8]);
    header.update(total_supply.to_le_bytes());
    leaves.push(header.finalize().into());

    // blacklisted accounts with no balance still carry state
    let accounts: BTreeSet<&Address> = balances.keys().chain(access.blacklisted()).collect();
    for account in accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balances.get(account).copied().unwrap_or(0).to_le_bytes());
        hasher.update([access.is_blacklisted(account) as u8]);
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"mexc-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
