//! Keys, seeded ledger state, and operation builders shared by the integration tests.

use ed25519_dalek::SigningKey;
use ledger_council::{
    ledger::{
        entities::{Account, ChainInfo},
        pluggables::{ChainStorage, StoreResult},
        variables, LedgerEngine,
    },
    types::{
        block::Block,
        data_types::{
            AccountId, Amount, ChainAddress, ChainID, ChainIndex, ChainKind, KeyIndex, Timestamp,
            UniqueIdentifier,
        },
        operations::{
            ChainKey, ChainKeyFlags, ChainRegistration, Operation, OperationBody, OperationHeader,
            PurchaseInfo,
        },
        signatures::BlockSignatures,
    },
};
use rand_core::OsRng;

use super::mem_db::MemDB;

pub(crate) fn keypair() -> SigningKey {
    let mut csprg = OsRng {};
    SigningKey::generate(&mut csprg)
}

pub(crate) fn keypairs(n: usize) -> Vec<SigningKey> {
    (0..n).map(|_| keypair()).collect()
}

pub(crate) fn service_chain(id: u32) -> ChainAddress {
    ChainAddress::new(ChainKind::Service, ChainID::new(id), ChainIndex::new(0))
}

pub(crate) fn data_chain(id: u32) -> ChainAddress {
    ChainAddress::new(ChainKind::Data, ChainID::new(id), ChainIndex::new(0))
}

pub(crate) fn maintain_chain(id: u32) -> ChainAddress {
    ChainAddress::new(ChainKind::Maintain, ChainID::new(id), ChainIndex::new(0))
}

/// Write a root account directly into `db`, and move the next account id past it.
pub(crate) fn add_account(db: &MemDB, id: u64, signing_key: &SigningKey, balance: Amount) -> AccountId {
    let account = Account {
        id: AccountId::new(id),
        public_key: signing_key.verifying_key().to_bytes(),
        balance,
    };
    db.put(variables::account(account.id), &account);
    db.put(variables::account_by_key(&account.public_key), &account.id);
    db.put(variables::NEXT_ACCOUNT_ID.to_vec(), &AccountId::new(id + 1));
    account.id
}

/// Chain keys at indices 0, 1, ... for `keys`, all carrying `flags`.
pub(crate) fn chain_keys(keys: &[SigningKey], flags: ChainKeyFlags) -> Vec<ChainKey> {
    keys.iter()
        .enumerate()
        .map(|(index, key)| ChainKey {
            index: KeyIndex::new(index as u16),
            public_key: key.verifying_key().to_bytes(),
            flags,
            chain_index: ChainIndex::new(0),
            revoked: false,
        })
        .collect()
}

pub(crate) fn registration(
    name: &str,
    chain_keys: Vec<ChainKey>,
    purchases: Vec<PurchaseInfo>,
) -> ChainRegistration {
    ChainRegistration {
        name: name.to_string(),
        website: "https://example.org".to_string(),
        endpoints: vec!["https://api.example.org/v1".to_string()],
        chain_keys,
        purchases,
    }
}

/// Write a chain registration directly into `db`, and move the next chain id past it.
pub(crate) fn add_chain(
    db: &MemDB,
    chain_id: ChainID,
    owner: AccountId,
    registration: ChainRegistration,
) -> ChainInfo {
    let chain_info = ChainInfo::new(chain_id, owner, registration);
    db.put(variables::chain(chain_id), &chain_info);
    db.put(
        variables::NEXT_CHAIN_ID.to_vec(),
        &ChainID::new(chain_id.int() + 1),
    );
    chain_info
}

pub(crate) fn header(
    chain: ChainAddress,
    account: AccountId,
    key_index: Option<KeyIndex>,
    unique_id: u64,
) -> OperationHeader {
    OperationHeader {
        chain,
        account,
        key_index,
        timestamp: Timestamp::now(),
        unique_id: UniqueIdentifier::new(unique_id),
    }
}

pub(crate) fn transfer(
    signing_key: &SigningKey,
    sender: AccountId,
    receiver: AccountId,
    amount: Amount,
    unique_id: u64,
) -> Operation {
    Operation::new(
        signing_key,
        header(ChainAddress::root(), sender, None, unique_id),
        OperationBody::Transfer {
            receiver,
            amount,
            reason: String::new(),
        },
    )
}

pub(crate) fn register_account(signing_key: &SigningKey, unique_id: u64) -> Operation {
    Operation::new(
        signing_key,
        header(ChainAddress::root(), AccountId::new(0), None, unique_id),
        OperationBody::RegisterAccount {
            public_key: signing_key.verifying_key().to_bytes(),
        },
    )
}

/// Store `block` as finalized, with the entity updates `engine` derives for it.
pub(crate) fn finalize<E: LedgerEngine>(db: &MemDB, engine: &mut E, block: &Block) {
    let updates = engine.ledger_updates(block);
    let mut db = db.clone();
    assert_eq!(
        db.store(block, &BlockSignatures::default(), &updates),
        StoreResult::Ok
    );
    engine.clear_cache();
}
