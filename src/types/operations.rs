/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signed operations submitted by clients, and the chain registration types they carry.
//!
//! Which key must sign an operation depends on its body:
//!
//! |Body|Chain kind|Signed by|
//! |---|---|---|
//! |`RegisterAccount`|Root|the key being registered|
//! |`RegisterChain`, `UpdateChain`, `Transfer`|Root|the account key|
//! |`ImportChainBlock`|Root|a chain key with the [`CHAIN_BLOCK`](ChainKeyFlags::CHAIN_BLOCK) flag|
//! |`Join`, `RevenueRequest`|Service, Maintain|the account key|
//! |`Purchase`, `FeatureRequest`, `Data`|Service, Data|the service key at `header.key_index`|
//! |`AssignRevenue`|Maintain|a chain key with the [`REVENUE`](ChainKeyFlags::REVENUE) flag|

use std::io::{self, Read, Write};
use std::ops::BitOr;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::Block,
    crypto_primitives::{Signer, SigningKey},
    data_types::*,
    signatures::SignatureSet,
    signed_messages::SignedMessage,
};

/// Fields shared by every operation.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OperationHeader {
    /// The ledger this operation is addressed to.
    pub chain: ChainAddress,

    /// The acting account. Ignored by `RegisterAccount`, which creates its own.
    pub account: AccountId,

    /// Index of the service key or chain key that signed the operation, for the bodies that are
    /// signed by one.
    pub key_index: Option<KeyIndex>,

    pub timestamp: Timestamp,

    pub unique_id: UniqueIdentifier,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum OperationBody {
    RegisterAccount {
        public_key: VerifyingKeyBytes,
    },
    RegisterChain(ChainRegistration),
    UpdateChain {
        chain_id: ChainID,
        registration: ChainRegistration,
    },
    Transfer {
        receiver: AccountId,
        amount: Amount,
        reason: String,
    },
    ImportChainBlock(Box<ChainBlockImport>),
    Join {
        key_index: KeyIndex,
        public_key: VerifyingKeyBytes,
    },
    Purchase {
        item_id: u32,
        group_id: u32,
        price: Amount,
    },
    FeatureRequest {
        feature_id: u32,
        payload: Vec<u8>,
    },
    Data {
        payload: Vec<u8>,
    },
    AssignRevenue {
        receiver: AccountId,
        amount: Amount,
    },
    RevenueRequest {
        amount: Amount,
    },
}

impl OperationBody {
    /// Name of the body variant, for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            OperationBody::RegisterAccount { .. } => "RegisterAccount",
            OperationBody::RegisterChain(_) => "RegisterChain",
            OperationBody::UpdateChain { .. } => "UpdateChain",
            OperationBody::Transfer { .. } => "Transfer",
            OperationBody::ImportChainBlock(_) => "ImportChainBlock",
            OperationBody::Join { .. } => "Join",
            OperationBody::Purchase { .. } => "Purchase",
            OperationBody::FeatureRequest { .. } => "FeatureRequest",
            OperationBody::Data { .. } => "Data",
            OperationBody::AssignRevenue { .. } => "AssignRevenue",
            OperationBody::RevenueRequest { .. } => "RevenueRequest",
        }
    }
}

/// A finalized block of a service or maintenance chain, carried to the root ledger together with the
/// proposal signatures that finalized it.
///
/// Serialized by hand: `Block` contains operations, which may contain a `ChainBlockImport`, and the
/// derived impls would require each other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainBlockImport {
    pub block: Block,
    pub proposal_signatures: SignatureSet,
}

impl BorshSerialize for ChainBlockImport {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.block.serialize(writer)?;
        self.proposal_signatures.serialize(writer)
    }
}

impl BorshDeserialize for ChainBlockImport {
    fn deserialize_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(ChainBlockImport {
            block: Block::deserialize_reader(reader)?,
            proposal_signatures: SignatureSet::deserialize_reader(reader)?,
        })
    }
}

/// An externally-submitted signed request.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Operation {
    pub header: OperationHeader,
    pub body: OperationBody,
    pub signature: SignatureBytes,
}

impl Operation {
    /// Create an operation and sign it with `signing_key`.
    pub fn new(signing_key: &SigningKey, header: OperationHeader, body: OperationBody) -> Operation {
        let message = signing_bytes(&header, &body);
        let signature = SignatureBytes::new(signing_key.sign(&message).to_bytes());
        Operation {
            header,
            body,
            signature,
        }
    }

    pub fn unique_id(&self) -> UniqueIdentifier {
        self.header.unique_id
    }

    pub fn chain(&self) -> ChainAddress {
        self.header.chain
    }
}

impl SignedMessage for Operation {
    fn message_bytes(&self) -> Vec<u8> {
        signing_bytes(&self.header, &self.body)
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

fn signing_bytes(header: &OperationHeader, body: &OperationBody) -> Vec<u8> {
    let mut bytes = header.try_to_vec().unwrap();
    bytes.extend(body.try_to_vec().unwrap());
    bytes
}

/// Capability flags of a chain key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct ChainKeyFlags(u8);

impl ChainKeyFlags {
    pub const NONE: ChainKeyFlags = ChainKeyFlags(0);
    pub const SERVICE_VOTE: ChainKeyFlags = ChainKeyFlags(1);
    pub const DATA_VOTE: ChainKeyFlags = ChainKeyFlags(2);
    pub const MAINTAIN_VOTE: ChainKeyFlags = ChainKeyFlags(4);
    pub const ROOT_VOTE: ChainKeyFlags = ChainKeyFlags(8);
    /// May sign the carrier operations that import finalized blocks into the root ledger.
    pub const CHAIN_BLOCK: ChainKeyFlags = ChainKeyFlags(16);
    /// May assign revenue on the maintenance chain.
    pub const REVENUE: ChainKeyFlags = ChainKeyFlags(32);

    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: ChainKeyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// The flag that makes a key a voting member of chains of `kind`.
    pub const fn vote_flag(kind: ChainKind) -> ChainKeyFlags {
        match kind {
            ChainKind::Root => Self::ROOT_VOTE,
            ChainKind::Service => Self::SERVICE_VOTE,
            ChainKind::Data => Self::DATA_VOTE,
            ChainKind::Maintain => Self::MAINTAIN_VOTE,
        }
    }
}

impl BitOr for ChainKeyFlags {
    type Output = ChainKeyFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ChainKeyFlags(self.0 | rhs.0)
    }
}

/// One key registered for a chain.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainKey {
    pub index: KeyIndex,
    pub public_key: VerifyingKeyBytes,
    pub flags: ChainKeyFlags,
    /// For data-vote keys, the data chain the key votes on.
    pub chain_index: ChainIndex,
    pub revoked: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum PurchaseType {
    /// May be bought any number of times.
    Repeatable,
    /// Each item of the group may be bought once.
    OncePerItem,
    /// Only one item of the group may ever be bought.
    OncePerGroup,
}

/// One entry of a chain's purchase catalog.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PurchaseInfo {
    pub item_id: u32,
    pub group_id: u32,
    pub purchase_type: PurchaseType,
    pub price: Amount,
    pub description: String,
}

/// The metadata a chain is registered or updated with.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainRegistration {
    pub name: String,
    pub website: String,
    pub endpoints: Vec<String>,
    pub chain_keys: Vec<ChainKey>,
    pub purchases: Vec<PurchaseInfo>,
}
