//! Tests of the maintenance ledger: assigning a service's revenue, and paying it out without
//! overdrawing the service's revenue pool.

mod common;

use ed25519_dalek::SigningKey;
use log::LevelFilter;

use common::{fixtures::*, logging::setup_logger, mem_db::MemDB};
use ledger_council::{
    ledger::{
        maintain::MaintainRules, pluggables::LedgerGet, variables, LedgerEngine, MaintainLedger,
        OperationResult,
    },
    types::{
        block::Block,
        data_types::{
            AccountId, Amount, ChainAddress, IssuerIndex, KeyIndex, Revision, UniqueIdentifier,
        },
        operations::{ChainKeyFlags, Operation, OperationBody},
    },
};

struct MaintainFixture {
    db: MemDB,
    chain: ChainAddress,
    revenue_key: SigningKey,
    keys: Vec<SigningKey>,
    accounts: Vec<AccountId>,
}

// Maintenance chain 1 with 100 in its revenue pool, and two accounts.
fn maintain_fixture() -> MaintainFixture {
    setup_logger(LevelFilter::Warn);
    let db = MemDB::new();
    let keys = keypairs(2);
    let accounts: Vec<AccountId> = keys
        .iter()
        .enumerate()
        .map(|(i, key)| add_account(&db, i as u64 + 1, key, 0))
        .collect();

    let chain = maintain_chain(1);
    let revenue_key = keypair();
    add_chain(
        &db,
        chain.id,
        accounts[0],
        registration(
            "arcade",
            chain_keys(
                std::slice::from_ref(&revenue_key),
                ChainKeyFlags::MAINTAIN_VOTE | ChainKeyFlags::REVENUE,
            ),
            vec![],
        ),
    );
    db.put(variables::revenue_pool(chain.id), &(100 as Amount));
    db.add_genesis(chain);
    MaintainFixture {
        db,
        chain,
        revenue_key,
        keys,
        accounts,
    }
}

fn assign(fixture: &MaintainFixture, receiver: usize, amount: Amount, unique_id: u64) -> Operation {
    Operation::new(
        &fixture.revenue_key,
        header(
            fixture.chain,
            fixture.accounts[0],
            Some(KeyIndex::new(0)),
            unique_id,
        ),
        OperationBody::AssignRevenue {
            receiver: fixture.accounts[receiver],
            amount,
        },
    )
}

fn request(fixture: &MaintainFixture, who: usize, amount: Amount, unique_id: u64) -> Operation {
    Operation::new(
        &fixture.keys[who],
        header(fixture.chain, fixture.accounts[who], None, unique_id),
        OperationBody::RevenueRequest { amount },
    )
}

fn operation_ids(block: &Block) -> Vec<UniqueIdentifier> {
    block.operations().map(Operation::unique_id).collect()
}

// Assign 80 to each account, and finalize the block.
fn assigned(fixture: &MaintainFixture, engine: &mut MaintainLedger<MemDB>) -> Block {
    assert_eq!(engine.consume(&assign(fixture, 0, 80, 1)), OperationResult::Ok);
    assert_eq!(engine.consume(&assign(fixture, 1, 80, 2)), OperationResult::Ok);
    let block = engine
        .build(&Block::genesis(fixture.chain), IssuerIndex::new(0), Revision::init())
        .unwrap();
    finalize(&fixture.db, engine, &block);
    block
}

#[test]
fn only_revenue_keys_assign_revenue() {
    let fixture = maintain_fixture();
    let mut engine = MaintainLedger::new(fixture.chain, fixture.db.clone(), MaintainRules);

    let forged = Operation::new(
        &fixture.keys[0],
        header(fixture.chain, fixture.accounts[0], Some(KeyIndex::new(0)), 1),
        OperationBody::AssignRevenue {
            receiver: fixture.accounts[0],
            amount: 10,
        },
    );
    assert_eq!(engine.consume(&forged), OperationResult::InvalidSignature);

    let no_key = Operation::new(
        &fixture.revenue_key,
        header(fixture.chain, fixture.accounts[0], Some(KeyIndex::new(5)), 2),
        OperationBody::AssignRevenue {
            receiver: fixture.accounts[0],
            amount: 10,
        },
    );
    assert_eq!(engine.consume(&no_key), OperationResult::KeyNotFound);
    assert_eq!(engine.consume(&assign(&fixture, 0, 0, 3)), OperationResult::InvalidAmount);
}

#[test]
fn requests_are_bounded_by_entitlement() {
    let fixture = maintain_fixture();
    let mut engine = MaintainLedger::new(fixture.chain, fixture.db.clone(), MaintainRules);
    assigned(&fixture, &mut engine);

    let revenue_account = fixture
        .db
        .revenue_account(fixture.chain.id, fixture.accounts[0])
        .unwrap()
        .unwrap();
    assert_eq!(revenue_account.entitlement, 80);
    assert_eq!(revenue_account.paid, 0);

    assert_eq!(
        engine.consume(&request(&fixture, 0, 90, 10)),
        OperationResult::RevenueExceeded
    );
    assert_eq!(engine.consume(&request(&fixture, 0, 50, 11)), OperationResult::Ok);
    assert_eq!(
        engine.consume(&request(&fixture, 0, 40, 12)),
        OperationResult::RevenueExceeded
    );
}

#[test]
fn requests_that_would_overdraw_the_pool_are_left_out() {
    let fixture = maintain_fixture();
    let mut engine = MaintainLedger::new(fixture.chain, fixture.db.clone(), MaintainRules);
    let first = assigned(&fixture, &mut engine);

    // Both fit their entitlement, but not the pool together.
    assert_eq!(engine.consume(&request(&fixture, 0, 60, 10)), OperationResult::Ok);
    assert_eq!(engine.consume(&request(&fixture, 1, 60, 11)), OperationResult::Ok);
    let second = engine
        .build(&first, IssuerIndex::new(0), Revision::init())
        .unwrap();
    assert_eq!(operation_ids(&second), vec![UniqueIdentifier::new(10)]);
    finalize(&fixture.db, &mut engine, &second);
    assert_eq!(fixture.db.payout_total(fixture.chain.id).unwrap(), 60);

    // What remains of the pool can still be paid out.
    assert_eq!(engine.consume(&request(&fixture, 1, 40, 12)), OperationResult::Ok);
    let third = engine
        .build(&second, IssuerIndex::new(0), Revision::init())
        .unwrap();
    assert_eq!(operation_ids(&third), vec![UniqueIdentifier::new(12)]);

    // Every member builds the same block out of the same requests.
    let mut other = MaintainLedger::new(fixture.chain, fixture.db.clone(), MaintainRules);
    assert!(other.check_block(&second, &third).is_empty());
}
