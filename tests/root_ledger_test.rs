//! Tests of the root ledger: admission of the root operation bodies, block building, block checking,
//! and imports of finalized service blocks.

mod common;

use std::time::Duration;

use ed25519_dalek::{Signer, SigningKey};
use log::LevelFilter;
use rand::seq::SliceRandom;

use common::{fixtures::*, logging::setup_logger, mem_db::MemDB};
use ledger_council::{
    council::finalization::{FinalizationHook, OutboundMessage, ParentLedgerCarrier},
    ledger::{
        pluggables::LedgerGet, root::RootRules, service::ServiceRules, variables, LedgerEngine,
        OperationResult, RootLedger, ServiceLedger, INVALID_BLOCK_OPERATION, OPERATION_TTL,
    },
    networking::Message,
    types::{
        block::{AccountBalance, Block, BlockPayload},
        data_types::{
            AccountId, ChainAddress, ChainID, IssuerIndex, KeyIndex, Revision, SequenceId,
            SignatureBytes, Timestamp, UniqueIdentifier,
        },
        operations::{
            ChainBlockImport, ChainKeyFlags, Operation, OperationBody, OperationHeader,
            PurchaseInfo, PurchaseType,
        },
        signatures::{BlockSignatures, SignatureSet},
    },
};

struct RootFixture {
    db: MemDB,
    keys: Vec<SigningKey>,
    accounts: Vec<AccountId>,
}

// Three accounts holding 100, 50 and 0.
fn root_fixture() -> RootFixture {
    setup_logger(LevelFilter::Warn);
    let db = MemDB::new();
    db.add_genesis(ChainAddress::root());
    let keys = keypairs(3);
    let accounts = keys
        .iter()
        .zip([100, 50, 0])
        .enumerate()
        .map(|(i, (key, balance))| add_account(&db, i as u64 + 1, key, balance))
        .collect();
    RootFixture { db, keys, accounts }
}

fn root_ledger(db: &MemDB) -> RootLedger<MemDB> {
    RootLedger::new(ChainAddress::root(), db.clone(), RootRules)
}

fn build(engine: &mut RootLedger<MemDB>) -> Option<Block> {
    engine.build(
        &Block::genesis(ChainAddress::root()),
        IssuerIndex::new(0),
        Revision::init(),
    )
}

fn balance(db: &MemDB, account: AccountId) -> u64 {
    db.account(account).unwrap().unwrap().balance
}

#[test]
fn empty_pool_builds_no_block() {
    let fixture = root_fixture();
    let mut engine = root_ledger(&fixture.db);
    assert_eq!(build(&mut engine), None);
}

#[test]
fn transfer_block_closes_with_account_deltas() {
    let fixture = root_fixture();
    let (alice, bob) = (fixture.accounts[0], fixture.accounts[1]);
    let mut engine = root_ledger(&fixture.db);

    let operation = transfer(&fixture.keys[0], alice, bob, 30, 7);
    assert_eq!(engine.consume(&operation), OperationResult::Ok);

    let genesis = Block::genesis(ChainAddress::root());
    let block = build(&mut engine).unwrap();
    assert!(block.extends(&genesis));
    assert!(block.is_well_formed());
    assert_eq!(block.items.len(), 2);
    assert_eq!(block.items[0].sequence_id, SequenceId::new(1));
    assert_eq!(block.items[1].sequence_id, SequenceId::new(2));
    assert_eq!(block.last_sequence_id, SequenceId::new(2));
    assert_eq!(block.items[0].payload, BlockPayload::Operation(operation));
    assert_eq!(
        block.items[1].payload,
        BlockPayload::AccountDeltas(vec![
            AccountBalance {
                account: alice,
                balance: 70
            },
            AccountBalance {
                account: bob,
                balance: 80
            },
        ])
    );

    finalize(&fixture.db, &mut engine, &block);
    assert_eq!(balance(&fixture.db, alice), 70);
    assert_eq!(balance(&fixture.db, bob), 80);

    // Sequence ids continue from the previous block.
    let operation = transfer(&fixture.keys[1], bob, alice, 5, 8);
    assert_eq!(engine.consume(&operation), OperationResult::Ok);
    let next = engine
        .build(&block, IssuerIndex::new(0), Revision::init())
        .unwrap();
    assert!(next.extends(&block));
    assert_eq!(next.items[0].sequence_id, SequenceId::new(3));
}

#[test]
fn blocks_do_not_depend_on_arrival_order() {
    let fixture = root_fixture();
    let (alice, bob, carol) = (fixture.accounts[0], fixture.accounts[1], fixture.accounts[2]);
    let mut operations = vec![
        transfer(&fixture.keys[0], alice, carol, 10, 3),
        transfer(&fixture.keys[1], bob, carol, 20, 1),
        transfer(&fixture.keys[0], alice, bob, 30, 9),
        transfer(&fixture.keys[1], bob, alice, 5, 4),
    ];

    let mut first = root_ledger(&fixture.db);
    for operation in &operations {
        assert_eq!(first.consume(operation), OperationResult::Ok);
    }
    operations.shuffle(&mut rand::thread_rng());
    let mut second = root_ledger(&fixture.db);
    for operation in &operations {
        assert_eq!(second.consume(operation), OperationResult::Ok);
    }

    let first = build(&mut first).unwrap();
    let second = build(&mut second).unwrap();
    assert_eq!(first, second);

    let ids: Vec<UniqueIdentifier> = first.operations().map(Operation::unique_id).collect();
    assert_eq!(ids, [1, 3, 4, 9].map(UniqueIdentifier::new).to_vec());
}

#[test]
fn built_blocks_pass_their_own_check() {
    let fixture = root_fixture();
    let (alice, bob) = (fixture.accounts[0], fixture.accounts[1]);
    let mut proposer = root_ledger(&fixture.db);
    proposer.consume(&transfer(&fixture.keys[0], alice, bob, 40, 1));
    proposer.consume(&transfer(&fixture.keys[1], bob, alice, 10, 2));
    let block = build(&mut proposer).unwrap();

    let genesis = Block::genesis(ChainAddress::root());
    let mut checker = root_ledger(&fixture.db);
    assert!(checker.check_block(&genesis, &block).is_empty());
    // Checking leaves nothing behind in the checker's pool.
    assert_eq!(build(&mut checker), None);
}

#[test]
fn check_block_blames_inadmissible_operations() {
    let fixture = root_fixture();
    let (alice, bob) = (fixture.accounts[0], fixture.accounts[1]);
    let genesis = Block::genesis(ChainAddress::root());

    let overdraft = transfer(&fixture.keys[0], alice, bob, 500, 11);
    let forged = Block::new(
        &genesis,
        IssuerIndex::new(1),
        Revision::init(),
        overdraft.header.timestamp,
        vec![BlockPayload::Operation(overdraft)],
    );
    let mut checker = root_ledger(&fixture.db);
    let invalid = checker.check_block(&genesis, &forged);
    assert!(invalid.contains(&UniqueIdentifier::new(11)));

    // A block that does not extend the previous block is invalid as a whole.
    let mut proposer = root_ledger(&fixture.db);
    proposer.consume(&transfer(&fixture.keys[0], alice, bob, 10, 12));
    let block = build(&mut proposer).unwrap();
    let invalid = checker.check_block(&block, &block);
    assert!(invalid.contains(&INVALID_BLOCK_OPERATION));
}

#[test]
fn insufficient_balance_is_retryable_and_excluded() {
    let fixture = root_fixture();
    let (alice, carol) = (fixture.accounts[0], fixture.accounts[2]);
    let mut engine = root_ledger(&fixture.db);

    let result = engine.consume(&transfer(&fixture.keys[2], carol, alice, 1, 1));
    assert_eq!(result, OperationResult::InsufficientBalance);
    assert!(result.is_retryable());
    assert_eq!(build(&mut engine), None);

    // Balance moved earlier in the same block is spendable.
    assert_eq!(
        engine.consume(&transfer(&fixture.keys[0], alice, carol, 15, 2)),
        OperationResult::Ok
    );
    assert_eq!(
        engine.consume(&transfer(&fixture.keys[2], carol, alice, 10, 3)),
        OperationResult::Ok
    );
    let block = build(&mut engine).unwrap();
    assert_eq!(block.operation_count(), 2);
}

#[test]
fn rejected_operations() {
    let fixture = root_fixture();
    let (alice, bob) = (fixture.accounts[0], fixture.accounts[1]);
    let mut engine = root_ledger(&fixture.db);

    // Signed by the wrong key.
    assert_eq!(
        engine.consume(&transfer(&fixture.keys[1], alice, bob, 1, 1)),
        OperationResult::InvalidSignature
    );
    assert_eq!(
        engine.consume(&transfer(&fixture.keys[0], alice, alice, 1, 2)),
        OperationResult::SelfTransfer
    );
    assert_eq!(
        engine.consume(&transfer(&fixture.keys[0], alice, bob, 0, 3)),
        OperationResult::InvalidAmount
    );
    assert_eq!(
        engine.consume(&transfer(&fixture.keys[0], alice, AccountId::new(99), 1, 4)),
        OperationResult::AccountNotFound
    );

    let mut stale = header(ChainAddress::root(), alice, None, 5);
    stale.timestamp = Timestamp::now().saturating_sub(Duration::from_secs(60 * 60));
    let stale = Operation::new(
        &fixture.keys[0],
        stale,
        OperationBody::Transfer {
            receiver: bob,
            amount: 1,
            reason: String::new(),
        },
    );
    assert_eq!(engine.consume(&stale), OperationResult::Expired);

    let elsewhere = Operation::new(
        &fixture.keys[0],
        header(service_chain(1), alice, None, 6),
        OperationBody::Transfer {
            receiver: bob,
            amount: 1,
            reason: String::new(),
        },
    );
    assert_eq!(engine.consume(&elsewhere), OperationResult::WrongChain);

    // Join is not a root operation.
    let join = Operation::new(
        &fixture.keys[0],
        header(ChainAddress::root(), alice, None, 7),
        OperationBody::Join {
            key_index: KeyIndex::new(0),
            public_key: keypair().verifying_key().to_bytes(),
        },
    );
    assert_eq!(engine.consume(&join), OperationResult::InvalidOperation);

    assert_eq!(build(&mut engine), None);
}

#[test]
fn operations_are_processed_at_most_once() {
    let fixture = root_fixture();
    let (alice, bob) = (fixture.accounts[0], fixture.accounts[1]);
    let mut engine = root_ledger(&fixture.db);

    let operation = transfer(&fixture.keys[0], alice, bob, 10, 1);
    assert_eq!(engine.consume(&operation), OperationResult::Ok);
    assert_eq!(engine.consume(&operation), OperationResult::AlreadyProcessed);

    let block = build(&mut engine).unwrap();
    finalize(&fixture.db, &mut engine, &block);
    engine.reset();
    assert_eq!(engine.consume(&operation), OperationResult::AlreadyProcessed);
    assert_eq!(balance(&fixture.db, alice), 90);
}

#[test]
fn accounts_and_chains_are_registered() {
    let fixture = root_fixture();
    let alice = fixture.accounts[0];
    let mut engine = root_ledger(&fixture.db);

    let newcomer = keypair();
    assert_eq!(
        engine.consume(&register_account(&newcomer, 1)),
        OperationResult::Ok
    );
    assert_eq!(
        engine.consume(&register_account(&newcomer, 2)),
        OperationResult::AlreadyProcessed
    );

    let council = keypairs(2);
    let service = registration(
        "weather-service",
        chain_keys(&council, ChainKeyFlags::SERVICE_VOTE | ChainKeyFlags::CHAIN_BLOCK),
        vec![],
    );
    let register_chain = Operation::new(
        &fixture.keys[0],
        header(ChainAddress::root(), alice, None, 3),
        OperationBody::RegisterChain(service.clone()),
    );
    assert_eq!(engine.consume(&register_chain), OperationResult::Ok);

    let mut unnamed = service.clone();
    unnamed.name = String::new();
    let bad_chain = Operation::new(
        &fixture.keys[0],
        header(ChainAddress::root(), alice, None, 4),
        OperationBody::RegisterChain(unnamed),
    );
    assert_eq!(engine.consume(&bad_chain), OperationResult::InvalidChainName);

    let block = build(&mut engine).unwrap();
    assert_eq!(block.operation_count(), 2);
    finalize(&fixture.db, &mut engine, &block);

    let registered = fixture
        .db
        .account_by_key(&newcomer.verifying_key().to_bytes())
        .unwrap()
        .unwrap();
    assert_eq!(registered, AccountId::new(4));
    assert_eq!(balance(&fixture.db, registered), 0);

    let chain_info = fixture.db.chain_info(ChainID::new(1)).unwrap().unwrap();
    assert_eq!(chain_info.owner, alice);
    assert_eq!(chain_info.name, "weather-service");

    // Updates may not drop chain keys, and only the owner may make them.
    let mut shrunk = service.clone();
    shrunk.chain_keys.pop();
    let update = Operation::new(
        &fixture.keys[0],
        header(ChainAddress::root(), alice, None, 5),
        OperationBody::UpdateChain {
            chain_id: ChainID::new(1),
            registration: shrunk,
        },
    );
    assert_eq!(engine.consume(&update), OperationResult::IncompatibleUpdate);

    let update = Operation::new(
        &fixture.keys[1],
        header(ChainAddress::root(), fixture.accounts[1], None, 6),
        OperationBody::UpdateChain {
            chain_id: ChainID::new(1),
            registration: service,
        },
    );
    assert_eq!(engine.consume(&update), OperationResult::InvalidAccount);
}

#[test]
fn service_blocks_are_imported_with_a_quorum_of_signatures() {
    let fixture = root_fixture();
    let alice = fixture.accounts[0];
    let chain = service_chain(1);
    let council = keypairs(3);
    add_chain(
        &fixture.db,
        chain.id,
        alice,
        registration(
            "weather-service",
            chain_keys(&council, ChainKeyFlags::SERVICE_VOTE | ChainKeyFlags::CHAIN_BLOCK),
            vec![],
        ),
    );
    fixture.db.add_genesis(chain);

    // A service block in which alice joins the service.
    let service_key = keypair();
    let join = Operation::new(
        &fixture.keys[0],
        header(chain, alice, None, 1),
        OperationBody::Join {
            key_index: KeyIndex::new(0),
            public_key: service_key.verifying_key().to_bytes(),
        },
    );
    let mut service = ServiceLedger::new(chain, fixture.db.clone(), ServiceRules::new());
    assert_eq!(service.consume(&join), OperationResult::Ok);
    let service_block = service
        .build(&Block::genesis(chain), IssuerIndex::new(0), Revision::init())
        .unwrap();

    let signatures = |signers: &[SigningKey]| {
        let mut set = SignatureSet::new();
        for (index, key) in signers.iter().enumerate() {
            let signature = key.sign(&service_block.attestation_bytes()).to_bytes();
            set.insert(IssuerIndex::new(index as u16), SignatureBytes::new(signature));
        }
        set
    };
    let import = |proposal_signatures: SignatureSet, unique_id: u64| {
        Operation::new(
            &council[0],
            header(ChainAddress::root(), alice, Some(KeyIndex::new(0)), unique_id),
            OperationBody::ImportChainBlock(Box::new(ChainBlockImport {
                block: service_block.clone(),
                proposal_signatures,
            })),
        )
    };

    let mut engine = root_ledger(&fixture.db);
    assert_eq!(
        engine.consume(&import(signatures(&council[..1]), 1)),
        OperationResult::InsufficientSignatures
    );
    assert_eq!(
        engine.consume(&import(signatures(&council[..2]), 2)),
        OperationResult::Ok
    );
    assert_eq!(
        engine.consume(&import(signatures(&council), 3)),
        OperationResult::AlreadyProcessed
    );

    // The carrier that a council member's finalization hook sends to the root ledger is an equivalent
    // import.
    let mut hook = ParentLedgerCarrier::new(council[1].clone(), KeyIndex::new(1), alice);
    let finalized = BlockSignatures {
        block: SignatureSet::new(),
        proposal: signatures(&council[..2]),
    };
    let carrier = match hook.on_finalized(&service_block, &finalized).as_slice() {
        [OutboundMessage::Parent(Message::Operation(carrier))] => carrier.clone(),
        _ => panic!("expected a single carrier operation for the root ledger"),
    };
    assert_eq!(carrier.chain(), ChainAddress::root());
    assert_eq!(root_ledger(&fixture.db).consume(&carrier), OperationResult::Ok);

    let block = build(&mut engine).unwrap();
    finalize(&fixture.db, &mut engine, &block);
    assert_eq!(
        fixture
            .db
            .imported_service_key(chain.id, alice, KeyIndex::new(0))
            .unwrap(),
        Some(service_key.verifying_key().to_bytes())
    );
    assert_eq!(fixture.db.imported_height(chain).unwrap(), service_block.height);
}

#[test]
fn finalized_operations_apply_however_late_the_block_is_stored() {
    let fixture = root_fixture();
    let (alice, bob) = (fixture.accounts[0], fixture.accounts[1]);
    let stamped = Timestamp::now().saturating_sub(OPERATION_TTL + Duration::from_secs(120));
    let operation = Operation::new(
        &fixture.keys[0],
        OperationHeader {
            chain: ChainAddress::root(),
            account: alice,
            key_index: None,
            timestamp: stamped,
            unique_id: UniqueIdentifier::new(1),
        },
        OperationBody::Transfer {
            receiver: bob,
            amount: 25,
            reason: String::new(),
        },
    );

    let mut engine = root_ledger(&fixture.db);
    assert_eq!(engine.consume(&operation), OperationResult::Expired);

    // Finalized while it was fresh, stored only now.
    let block = Block::new(
        &Block::genesis(ChainAddress::root()),
        IssuerIndex::new(0),
        Revision::init(),
        stamped,
        vec![BlockPayload::Operation(operation)],
    );
    let updates = engine.ledger_updates(&block);
    assert!(!updates.is_empty());
    assert!(updates.get_insert(&variables::account(alice)).is_some());

    finalize(&fixture.db, &mut engine, &block);
    assert_eq!(balance(&fixture.db, alice), 75);
    assert_eq!(balance(&fixture.db, bob), 75);
}

// Service chain 1 owned by alice, run by `council`, selling item (1, 1) for 10.
fn add_service_chain(fixture: &RootFixture, council: &[SigningKey]) -> ChainAddress {
    let chain = service_chain(1);
    add_chain(
        &fixture.db,
        chain.id,
        fixture.accounts[0],
        registration(
            "weather-service",
            chain_keys(council, ChainKeyFlags::SERVICE_VOTE | ChainKeyFlags::CHAIN_BLOCK),
            vec![PurchaseInfo {
                item_id: 1,
                group_id: 1,
                purchase_type: PurchaseType::Repeatable,
                price: 10,
                description: String::new(),
            }],
        ),
    );
    fixture.db.add_genesis(chain);
    chain
}

// An import of the service block holding `operations`, proposal-signed by every member of `council`.
fn import_of(
    fixture: &RootFixture,
    council: &[SigningKey],
    chain: ChainAddress,
    operations: Vec<Operation>,
    unique_id: u64,
) -> Operation {
    let block = Block::new(
        &Block::genesis(chain),
        IssuerIndex::new(0),
        Revision::init(),
        Timestamp::now(),
        operations.into_iter().map(BlockPayload::Operation).collect(),
    );
    let mut proposal_signatures = SignatureSet::new();
    for (index, key) in council.iter().enumerate() {
        let signature = key.sign(&block.attestation_bytes()).to_bytes();
        proposal_signatures.insert(IssuerIndex::new(index as u16), SignatureBytes::new(signature));
    }
    Operation::new(
        &council[0],
        header(ChainAddress::root(), fixture.accounts[0], Some(KeyIndex::new(0)), unique_id),
        OperationBody::ImportChainBlock(Box::new(ChainBlockImport {
            block,
            proposal_signatures,
        })),
    )
}

#[test]
fn imported_joins_follow_the_service_key_order() {
    let fixture = root_fixture();
    let alice = fixture.accounts[0];
    let council = keypairs(3);
    let chain = add_service_chain(&fixture, &council);
    let (first_key, second_key) = (keypair(), keypair());
    let join = |key_index: u16, service_key: &SigningKey, unique_id: u64| {
        Operation::new(
            &fixture.keys[0],
            header(chain, alice, None, unique_id),
            OperationBody::Join {
                key_index: KeyIndex::new(key_index),
                public_key: service_key.verifying_key().to_bytes(),
            },
        )
    };

    let mut engine = root_ledger(&fixture.db);
    let rejected = [
        (vec![join(1, &first_key, 1)], OperationResult::InvalidKeyIndex),
        (
            vec![join(0, &first_key, 1), join(0, &second_key, 2)],
            OperationResult::AlreadyJoined,
        ),
        (
            vec![join(0, &first_key, 1), join(1, &first_key, 2)],
            OperationResult::AlreadyJoined,
        ),
        (
            vec![join(0, &first_key, 1), join(2, &second_key, 2)],
            OperationResult::InvalidKeyIndex,
        ),
    ];
    for (unique_id, (operations, result)) in rejected.into_iter().enumerate() {
        let import = import_of(&fixture, &council, chain, operations, unique_id as u64 + 10);
        assert_eq!(engine.consume(&import), result);
    }
    assert_eq!(
        fixture
            .db
            .imported_service_key(chain.id, alice, KeyIndex::new(0))
            .unwrap(),
        None
    );

    let import = import_of(
        &fixture,
        &council,
        chain,
        vec![join(0, &first_key, 1), join(1, &second_key, 2)],
        20,
    );
    assert_eq!(engine.consume(&import), OperationResult::Ok);
    let block = build(&mut engine).unwrap();
    finalize(&fixture.db, &mut engine, &block);
    for (index, key) in [&first_key, &second_key].into_iter().enumerate() {
        assert_eq!(
            fixture
                .db
                .imported_service_key(chain.id, alice, KeyIndex::new(index as u16))
                .unwrap(),
            Some(key.verifying_key().to_bytes())
        );
    }
}

#[test]
fn imported_purchases_are_debited_and_counted() {
    let fixture = root_fixture();
    let alice = fixture.accounts[0];
    let council = keypairs(3);
    let chain = add_service_chain(&fixture, &council);
    let service_key = keypair();

    let join = Operation::new(
        &fixture.keys[0],
        header(chain, alice, None, 1),
        OperationBody::Join {
            key_index: KeyIndex::new(0),
            public_key: service_key.verifying_key().to_bytes(),
        },
    );
    let purchase = |unique_id: u64| {
        Operation::new(
            &service_key,
            header(chain, alice, Some(KeyIndex::new(0)), unique_id),
            OperationBody::Purchase {
                item_id: 1,
                group_id: 1,
                price: 10,
            },
        )
    };

    let mut engine = root_ledger(&fixture.db);
    let import = import_of(
        &fixture,
        &council,
        chain,
        vec![join, purchase(2), purchase(3)],
        1,
    );
    assert_eq!(engine.consume(&import), OperationResult::Ok);
    let block = build(&mut engine).unwrap();
    finalize(&fixture.db, &mut engine, &block);

    assert_eq!(balance(&fixture.db, alice), 80);
    assert_eq!(fixture.db.revenue_pool(chain.id).unwrap(), 20);
    assert_eq!(fixture.db.imported_purchases(chain.id, alice).unwrap(), 20);
    assert_eq!(fixture.db.imported_height(chain).unwrap().int(), 1);
}
