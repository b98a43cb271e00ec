use std::collections::BTreeSet;

use crate::ledger::{Address, LedgerError};

/// Administrative gate evaluated before every mutating ledger call.
///
/// Holds the genesis admin, the global transfer switch and the blacklist.
/// Nothing here touches balances; [`crate::ledger::LedgerState`] asks for a
/// decision and then does the accounting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessControl {
    admin: Address,
    transfer_disabled: bool,
    blacklist: BTreeSet<Address>,
}

impl AccessControl {
    /// Genesis gate: transfers start disabled and nobody is blacklisted.
    pub fn new(admin: Address) -> Self {
        Self {
            admin,
            transfer_disabled: true,
            blacklist: BTreeSet::new(),
        }
    }

    pub(crate) fn from_parts(
        admin: Address,
        transfer_disabled: bool,
        blacklist: BTreeSet<Address>,
    ) -> Self {
        Self {
            admin,
            transfer_disabled,
            blacklist,
        }
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    pub fn is_admin(&self, caller: &Address) -> bool {
        *caller == self.admin
    }

    pub fn require_admin(&self, caller: &Address) -> Result<(), LedgerError> {
        if self.is_admin(caller) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized { caller: *caller })
        }
    }

    pub fn transfer_disabled(&self) -> bool {
        self.transfer_disabled
    }

    /// Flip the global switch. Setting the current value again is a no-op
    /// success.
    pub fn set_transfers_enabled(
        &mut self,
        caller: &Address,
        enabled: bool,
    ) -> Result<bool, LedgerError> {
        self.require_admin(caller)?;
        let changed = self.transfer_disabled == enabled;
        self.transfer_disabled = !enabled;
        Ok(changed)
    }

    /// Sanction `target`. Returns whether the flag actually changed; there is
    /// no way back to clear.
    pub fn blacklist(&mut self, caller: &Address, target: &Address) -> Result<bool, LedgerError> {
        self.require_admin(caller)?;
        Ok(self.blacklist.insert(*target))
    }

    pub fn is_blacklisted(&self, account: &Address) -> bool {
        self.blacklist.contains(account)
    }

    pub fn blacklisted(&self) -> impl Iterator<Item = &Address> {
        self.blacklist.iter()
    }

    pub fn is_transfer_allowed(&self, from: &Address, to: &Address) -> bool {
        self.check_transfer(from, to).is_ok()
    }

    /// Same decision as [`Self::is_transfer_allowed`], reporting the cause.
    /// The global switch is checked before either party.
    pub fn check_transfer(&self, from: &Address, to: &Address) -> Result<(), LedgerError> {
        if self.transfer_disabled {
            return Err(LedgerError::TransfersDisabled);
        }
        for party in [from, to] {
            if self.is_blacklisted(party) {
                return Err(LedgerError::Blacklisted { account: *party });
            }
        }
        Ok(())
    }
}
