use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, rngs::StdRng, Rng, SeedableRng};

use mexc_ledger::{
    Address, Amount, Call, CallError, LedgerError, LedgerSnapshot, LedgerState, Operation,
    SharedLedger, SignedCall,
};

const ETHER: Amount = 1_000_000_000_000_000_000;

struct Wallet {
    key: SigningKey,
    address: Address,
}

impl Wallet {
    fn generate() -> Self {
        let key = SigningKey::generate(&mut OsRng);
        let address = Address::from_verifying_key(&key.verifying_key());
        Self { key, address }
    }

    fn call(&self, ledger: &SharedLedger, operation: Operation) -> Result<u64, CallError> {
        let signed = SignedCall::sign(Call::new(self.address, operation), &self.key);
        ledger.submit(&signed).map(|receipt| receipt.height)
    }
}

struct Fixture {
    ledger: SharedLedger,
    owner: Wallet,
    acc1: Wallet,
    acc2: Wallet,
    acc3: Wallet,
}

impl Fixture {
    fn new() -> Self {
        let owner = Wallet::generate();
        Self {
            ledger: SharedLedger::new(LedgerState::new(owner.address)),
            owner,
            acc1: Wallet::generate(),
            acc2: Wallet::generate(),
            acc3: Wallet::generate(),
        }
    }

    fn mint(&self, target: &Wallet, amount: Amount) {
        self.owner
            .call(
                &self.ledger,
                Operation::Mint {
                    target: target.address,
                    amount,
                },
            )
            .unwrap();
    }

    fn assert_consistent(&self) {
        self.ledger
            .read(|state| state.check_invariants())
            .unwrap();
    }
}

fn expect_ledger_error(result: Result<u64, CallError>) -> LedgerError {
    match result.unwrap_err() {
        CallError::Ledger(err) => err,
        other => panic!("expected ledger error, got {other:?}"),
    }
}

#[test]
fn token_metadata() {
    let fixture = Fixture::new();
    fixture.ledger.read(|state| {
        assert_eq!(state.symbol(), "MEXC");
        assert_eq!(state.decimals(), 18);
    });
}

#[test]
fn genesis_blocks_transfers() {
    let f = Fixture::new();
    assert!(f.ledger.transfer_disabled());
    f.mint(&f.acc1, 4_000 * ETHER);

    let err = expect_ledger_error(f.acc1.call(
        &f.ledger,
        Operation::Transfer {
            to: f.acc2.address,
            amount: ETHER,
        },
    ));
    assert_eq!(err, LedgerError::TransfersDisabled);

    let err = expect_ledger_error(f.acc1.call(
        &f.ledger,
        Operation::TransferFrom {
            from: f.acc1.address,
            to: f.acc2.address,
            amount: ETHER,
        },
    ));
    assert_eq!(err, LedgerError::TransfersDisabled);
    assert_eq!(f.ledger.balance_of(&f.acc2.address), 0);
}

#[test]
fn admin_mints_4000() {
    let f = Fixture::new();
    f.mint(&f.acc1, 4_000 * ETHER);
    assert_eq!(f.ledger.balance_of(&f.acc1.address), 4_000 * ETHER);
    assert_eq!(f.ledger.total_supply(), 4_000 * ETHER);
    f.assert_consistent();
}

#[test]
fn allow_transfers_then_transfer() {
    let f = Fixture::new();
    f.mint(&f.acc1, 4_000 * ETHER);
    f.owner.call(&f.ledger, Operation::AllowTransfers).unwrap();
    assert!(!f.ledger.transfer_disabled());

    f.owner.call(&f.ledger, Operation::AllowTransfers).unwrap();
    assert!(!f.ledger.transfer_disabled());

    f.mint(&f.acc1, 20 * ETHER);
    f.acc1
        .call(
            &f.ledger,
            Operation::Transfer {
                to: f.acc2.address,
                amount: ETHER,
            },
        )
        .unwrap();
    assert_eq!(f.ledger.balance_of(&f.acc2.address), ETHER);
    assert_eq!(f.ledger.balance_of(&f.acc1.address), 4_019 * ETHER);
    assert_eq!(f.ledger.total_supply(), 4_020 * ETHER);
    f.assert_consistent();
}

#[test]
fn non_admin_cannot_allow_transfers() {
    let f = Fixture::new();
    let err = expect_ledger_error(f.acc1.call(&f.ledger, Operation::AllowTransfers));
    assert_eq!(
        err,
        LedgerError::Unauthorized {
            caller: f.acc1.address
        }
    );
    assert!(f.ledger.transfer_disabled());
}

#[test]
fn blacklist_then_confiscate() {
    let f = Fixture::new();
    f.owner.call(&f.ledger, Operation::AllowTransfers).unwrap();

    f.mint(&f.acc3, 2 * ETHER);
    f.owner
        .call(
            &f.ledger,
            Operation::BlackListAddress {
                target: f.acc3.address,
            },
        )
        .unwrap();

    let err = expect_ledger_error(f.acc3.call(
        &f.ledger,
        Operation::Transfer {
            to: f.acc2.address,
            amount: ETHER,
        },
    ));
    assert_eq!(
        err,
        LedgerError::Blacklisted {
            account: f.acc3.address
        }
    );
    assert_eq!(f.ledger.balance_of(&f.acc3.address), 2 * ETHER);

    let owner_before = f.ledger.balance_of(&f.owner.address);
    f.mint(&f.acc3, 2 * ETHER);
    assert_eq!(f.ledger.balance_of(&f.acc3.address), 4 * ETHER);
    let supply_before = f.ledger.total_supply();

    f.owner
        .call(
            &f.ledger,
            Operation::Confiscate {
                target: f.acc3.address,
            },
        )
        .unwrap();
    assert_eq!(f.ledger.balance_of(&f.acc3.address), 0);
    assert_eq!(
        f.ledger.balance_of(&f.owner.address),
        owner_before + 4 * ETHER
    );
    assert_eq!(f.ledger.total_supply(), supply_before);
    f.assert_consistent();
}

#[test]
fn confiscating_compliant_account_fails() {
    let f = Fixture::new();
    f.mint(&f.acc1, 10 * ETHER);
    let err = expect_ledger_error(f.owner.call(
        &f.ledger,
        Operation::Confiscate {
            target: f.acc1.address,
        },
    ));
    assert_eq!(
        err,
        LedgerError::NotBlacklisted {
            account: f.acc1.address
        }
    );
    assert_eq!(f.ledger.balance_of(&f.acc1.address), 10 * ETHER);
    assert_eq!(f.ledger.balance_of(&f.owner.address), 0);
}

#[test]
fn transfer_to_blacklisted_account_fails() {
    let f = Fixture::new();
    f.owner.call(&f.ledger, Operation::AllowTransfers).unwrap();
    f.mint(&f.acc1, 3 * ETHER);
    for _ in 0..2 {
        f.owner
            .call(
                &f.ledger,
                Operation::BlackListAddress {
                    target: f.acc2.address,
                },
            )
            .unwrap();
    }
    let err = expect_ledger_error(f.acc1.call(
        &f.ledger,
        Operation::Transfer {
            to: f.acc2.address,
            amount: ETHER,
        },
    ));
    assert_eq!(
        err,
        LedgerError::Blacklisted {
            account: f.acc2.address
        }
    );
    assert_eq!(f.ledger.balance_of(&f.acc1.address), 3 * ETHER);
}

#[test]
fn mint_then_transfer_everything() {
    let f = Fixture::new();
    f.owner.call(&f.ledger, Operation::AllowTransfers).unwrap();
    let x = 123 * ETHER + 7;
    f.mint(&f.acc1, x);
    f.acc1
        .call(
            &f.ledger,
            Operation::Transfer {
                to: f.acc2.address,
                amount: x,
            },
        )
        .unwrap();
    assert_eq!(f.ledger.balance_of(&f.acc1.address), 0);
    assert_eq!(f.ledger.balance_of(&f.acc2.address), x);
    assert_eq!(f.ledger.total_supply(), x);
}

#[test]
fn persisted_state_reloads_after_sanctions() {
    let f = Fixture::new();
    f.owner.call(&f.ledger, Operation::AllowTransfers).unwrap();
    f.mint(&f.acc1, 4_000 * ETHER);
    f.acc1
        .call(
            &f.ledger,
            Operation::Transfer {
                to: f.acc3.address,
                amount: 250 * ETHER,
            },
        )
        .unwrap();
    f.owner
        .call(
            &f.ledger,
            Operation::BlackListAddress {
                target: f.acc3.address,
            },
        )
        .unwrap();
    f.owner
        .call(
            &f.ledger,
            Operation::Confiscate {
                target: f.acc3.address,
            },
        )
        .unwrap();

    let saved = serde_json::to_vec_pretty(&f.ledger.snapshot()).unwrap();
    let snapshot: LedgerSnapshot = serde_json::from_slice(&saved).unwrap();
    let reloaded = SharedLedger::new(LedgerState::from_snapshot(snapshot).unwrap());
    assert_eq!(
        reloaded.read(LedgerState::state_root),
        f.ledger.read(LedgerState::state_root)
    );
    assert_eq!(reloaded.total_supply(), 4_000 * ETHER);
    assert_eq!(reloaded.balance_of(&f.owner.address), 250 * ETHER);

    // the reloaded ledger keeps accepting calls
    f.acc1
        .call(
            &reloaded,
            Operation::Transfer {
                to: f.acc2.address,
                amount: ETHER,
            },
        )
        .unwrap();
    let err = expect_ledger_error(f.acc2.call(
        &reloaded,
        Operation::Transfer {
            to: f.acc3.address,
            amount: ETHER,
        },
    ));
    assert_eq!(
        err,
        LedgerError::Blacklisted {
            account: f.acc3.address
        }
    );
    reloaded.read(|state| state.check_invariants()).unwrap();
}

#[test]
fn random_operations_preserve_invariants() {
    let mut rng = StdRng::seed_from_u64(0x4d45_5843);
    let admin = Address::from_bytes([0xad; 20]);
    let holders: Vec<Address> = (0..6u8).map(|i| Address::from_bytes([i; 20])).collect();
    let ledger = SharedLedger::new(LedgerState::new(admin));
    let pick = |rng: &mut StdRng| -> Address {
        if rng.gen_bool(0.1) {
            admin
        } else {
            holders[rng.gen_range(0..holders.len())]
        }
    };

    for _ in 0..2_000 {
        let caller = pick(&mut rng);
        let operation = match rng.gen_range(0..9) {
            0 | 1 => Operation::Mint {
                target: pick(&mut rng),
                amount: rng.gen_range(0..1_000),
            },
            2..=4 => Operation::Transfer {
                to: pick(&mut rng),
                amount: rng.gen_range(0..500),
            },
            5 => Operation::Burn {
                amount: rng.gen_range(0..100),
            },
            6 => {
                if rng.gen_bool(0.7) {
                    Operation::AllowTransfers
                } else {
                    Operation::DisableTransfers
                }
            }
            7 => Operation::BlackListAddress {
                target: pick(&mut rng),
            },
            _ => Operation::Confiscate {
                target: pick(&mut rng),
            },
        };
        let caller = if rng.gen_bool(0.5) { admin } else { caller };
        let blacklisted_before = ledger.read(|state| {
            holders
                .iter()
                .filter(|h| state.is_blacklisted(h))
                .map(|h| (*h, state.balance_of(h)))
                .collect::<Vec<_>>()
        });
        let before = ledger.snapshot();
        let is_confiscation = matches!(operation, Operation::Confiscate { .. });

        let result = ledger.execute(&Call::new(caller, operation));

        ledger.read(|state| {
            state.check_invariants().unwrap();
            if result.is_err() {
                assert_eq!(state.snapshot(), before);
            }
            if !is_confiscation {
                for (holder, balance) in &blacklisted_before {
                    assert!(state.balance_of(holder) >= *balance);
                }
            }
        });
    }
}
