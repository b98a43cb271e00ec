use std::{collections::BTreeSet, sync::Arc};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::ledger::{
    codec, Address, Amount, LedgerError, LedgerSnapshot, LedgerState, Receipt,
};

/// Mutating surface of the ledger, one variant per entry point.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Mint {
        target: Address,
        #[serde(with = "codec::amount_str")]
        amount: Amount,
    },
    Transfer {
        to: Address,
        #[serde(with = "codec::amount_str")]
        amount: Amount,
    },
    TransferFrom {
        from: Address,
        to: Address,
        #[serde(with = "codec::amount_str")]
        amount: Amount,
    },
    Burn {
        #[serde(with = "codec::amount_str")]
        amount: Amount,
    },
    AllowTransfers,
    DisableTransfers,
    BlackListAddress {
        target: Address,
    },
    Confiscate {
        target: Address,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Mint { .. } => "mint",
            Operation::Transfer { .. } => "transfer",
            Operation::TransferFrom { .. } => "transfer_from",
            Operation::Burn { .. } => "burn",
            Operation::AllowTransfers => "allow_transfers",
            Operation::DisableTransfers => "disable_transfers",
            Operation::BlackListAddress { .. } => "black_list_address",
            Operation::Confiscate { .. } => "confiscate",
        }
    }

    fn commitment(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.name().as_bytes());
        match self {
            Operation::Mint { target, amount } => {
                buf.extend_from_slice(target.as_bytes());
                buf.extend_from_slice(&amount.to_le_bytes());
            }
            Operation::Transfer { to, amount } => {
                buf.extend_from_slice(to.as_bytes());
                buf.extend_from_slice(&amount.to_le_bytes());
            }
            Operation::TransferFrom { from, to, amount } => {
                buf.extend_from_slice(from.as_bytes());
                buf.extend_from_slice(to.as_bytes());
                buf.extend_from_slice(&amount.to_le_bytes());
            }
            Operation::Burn { amount } => buf.extend_from_slice(&amount.to_le_bytes()),
            Operation::AllowTransfers | Operation::DisableTransfers => {}
            Operation::BlackListAddress { target } | Operation::Confiscate { target } => {
                buf.extend_from_slice(target.as_bytes());
            }
        }
        buf
    }
}

/// An operation together with the identity invoking it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Call {
    pub caller: Address,
    pub nonce: u64,
    pub operation: Operation,
}

impl Call {
    /// Build a call with a random nonce so identical operations sign to
    /// different digests.
    pub fn new(caller: Address, operation: Operation) -> Self {
        Self {
            caller,
            nonce: rand::random(),
            operation,
        }
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"mexc-call");
        hasher.update(self.caller.as_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(self.operation.commitment());
        hasher.finalize().into()
    }

    /// Run the operation against `ledger` on behalf of `self.caller`.
    pub fn apply(&self, ledger: &mut LedgerState) -> Result<Receipt, LedgerError> {
        let caller = &self.caller;
        match &self.operation {
            Operation::Mint { target, amount } => ledger.mint(caller, target, *amount),
            Operation::Transfer { to, amount } => ledger.transfer(caller, to, *amount),
            Operation::TransferFrom { from, to, amount } => {
                ledger.transfer_from(caller, from, to, *amount)
            }
            Operation::Burn { amount } => ledger.burn(caller, *amount),
            Operation::AllowTransfers => ledger.allow_transfers(caller),
            Operation::DisableTransfers => ledger.disable_transfers(caller),
            Operation::BlackListAddress { target } => ledger.black_list_address(caller, target),
            Operation::Confiscate { target } => ledger.confiscate(caller, target),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedCall {
    pub call: Call,
    #[serde(with = "codec::hex_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "codec::hex_bytes")]
    pub signature: Vec<u8>,
}

impl SignedCall {
    pub fn sign(call: Call, key: &SigningKey) -> Self {
        let signature = key.sign(&call.digest());
        Self {
            call,
            public_key: key.verifying_key().to_bytes().to_vec(),
            signature: signature.to_bytes().to_vec(),
        }
    }

    /// Check the signature and that the signing key owns `call.caller`.
    pub fn verify(&self) -> Result<(), CallError> {
        let key_bytes: [u8; 32] = self
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| CallError::MalformedKey)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| CallError::MalformedKey)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| CallError::MalformedSignature)?;
        key.verify_strict(&self.call.digest(), &signature)
            .map_err(|_| CallError::InvalidSignature)?;
        let signer = Address::from_verifying_key(&key);
        if signer != self.call.caller {
            return Err(CallError::CallerMismatch {
                claimed: self.call.caller,
                signer,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("malformed public key")]
    MalformedKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not match call")]
    InvalidSignature,
    #[error("call claims caller {claimed} but was signed by {signer}")]
    CallerMismatch { claimed: Address, signer: Address },
    #[error("call was already applied")]
    DuplicateCall,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

struct Inner {
    state: LedgerState,
    applied: BTreeSet<[u8; 32]>,
}

/// Cloneable handle that serializes every mutation behind one write lock.
/// Queries share the read lock and never see a half-applied call.
#[derive(Clone)]
pub struct SharedLedger {
    inner: Arc<RwLock<Inner>>,
}

impl SharedLedger {
    pub fn new(state: LedgerState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state,
                applied: BTreeSet::new(),
            })),
        }
    }

    /// Verify and apply a signed call. A digest is accepted once.
    pub fn submit(&self, signed: &SignedCall) -> Result<Receipt, CallError> {
        signed.verify()?;
        let digest = signed.call.digest();
        let mut inner = self.inner.write();
        if inner.applied.contains(&digest) {
            return Err(CallError::DuplicateCall);
        }
        let receipt = Self::apply_locked(&mut inner.state, &signed.call)?;
        inner.applied.insert(digest);
        Ok(receipt)
    }

    /// Apply a call whose caller the harness has already authenticated.
    pub fn execute(&self, call: &Call) -> Result<Receipt, LedgerError> {
        let mut inner = self.inner.write();
        Self::apply_locked(&mut inner.state, call)
    }

    pub fn read<R>(&self, f: impl FnOnce(&LedgerState) -> R) -> R {
        f(&self.inner.read().state)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.read(LedgerState::snapshot)
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.read(|state| state.balance_of(account))
    }

    pub fn total_supply(&self) -> Amount {
        self.read(LedgerState::total_supply)
    }

    pub fn transfer_disabled(&self) -> bool {
        self.read(LedgerState::transfer_disabled)
    }

    fn apply_locked(state: &mut LedgerState, call: &Call) -> Result<Receipt, LedgerError> {
        match call.apply(state) {
            Ok(receipt) => {
                debug!(
                    caller = %call.caller,
                    op = call.operation.name(),
                    height = receipt.height,
                    "call applied"
                );
                Ok(receipt)
            }
            Err(err) => {
                warn!(
                    caller = %call.caller,
                    op = call.operation.name(),
                    kind = err.kind(),
                    "call rejected: {err}"
                );
                Err(err)
            }
        }
    }
}
