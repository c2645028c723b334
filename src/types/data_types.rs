/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store numbers or bytes, and do not have any major "active" behavior.
//!
//! These types follow the newtype pattern. Every one of them is `BorshSerialize` and
//! `BorshDeserialize`, since all of them end up inside blocks, operations, or council messages.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, AddAssign, Sub},
    time::{Duration, SystemTime},
};

use borsh::{BorshDeserialize, BorshSerialize};

/// The four kinds of ledger that a node can advance.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub enum ChainKind {
    /// The network-root ledger, which holds accounts, chain registrations and balances.
    Root,

    /// A per-service ledger, which holds joins, purchases and feature requests.
    Service,

    /// A per-service data ledger. A service may run several of these, told apart by [`ChainIndex`].
    Data,

    /// A per-service maintenance ledger, which holds revenue assignments and payout requests.
    Maintain,
}

/// Number that identifies a registered chain. The root ledger always has `ChainID` 0.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct ChainID(u32);

impl ChainID {
    pub const ROOT: ChainID = ChainID(0);

    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for ChainID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Index that tells apart the data ledgers of one service. Always 0 for the other chain kinds.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct ChainIndex(u32);

impl ChainIndex {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

/// Fully qualified identity of one ledger: its kind, the id of the chain registration it belongs to,
/// and its index.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct ChainAddress {
    pub kind: ChainKind,
    pub id: ChainID,
    pub index: ChainIndex,
}

impl ChainAddress {
    pub const fn new(kind: ChainKind, id: ChainID, index: ChainIndex) -> Self {
        Self { kind, id, index }
    }

    /// The address of the network-root ledger.
    pub const fn root() -> Self {
        Self::new(ChainKind::Root, ChainID::ROOT, ChainIndex::new(0))
    }
}

impl Display for ChainAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}/{}", self.kind, self.id.0, self.index.0)
    }
}

/// Height of a block within its chain. Genesis blocks have height 0.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct BlockHeight(u64);

impl BlockHeight {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;

    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight(self.0.add(rhs))
    }
}

impl AddAssign<u64> for BlockHeight {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = u64;

    fn sub(self, rhs: BlockHeight) -> Self::Output {
        self.0 - rhs.0
    }
}

/// Agreement round number for one block height. Starts at 0 and increases on escalation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Revision(u32);

impl Revision {
    /// The last revision of a height. Escalation stops here.
    pub const MAX: Revision = Revision(u32::MAX);

    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn init() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    /// Absolute difference between two revisions.
    pub fn distance(&self, other: Revision) -> u32 {
        self.0.abs_diff(other.0)
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u32> for Revision {
    type Output = Revision;

    fn add(self, rhs: u32) -> Self::Output {
        Revision(self.0.saturating_add(rhs))
    }
}

/// Small integer that identifies one registered key of a chain. A chain's voting members are known
/// to each other by the index of their chain key.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct IssuerIndex(u16);

impl IssuerIndex {
    pub const fn new(int: u16) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u16 {
        self.0
    }
}

impl Display for IssuerIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Index of a key inside a chain registration or inside a service account. Chain keys double as
/// [`IssuerIndex`]es.
pub type KeyIndex = IssuerIndex;

/// Position of an item in the total order of a chain's history. Assigned only when an operation is
/// placed into a block.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct SequenceId(u64);

impl SequenceId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Add<u64> for SequenceId {
    type Output = SequenceId;

    fn add(self, rhs: u64) -> Self::Output {
        SequenceId(self.0.add(rhs))
    }
}

/// Number that identifies an account on the root ledger. Assigned sequentially at registration.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct AccountId(u64);

impl AccountId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> AccountId {
        AccountId(self.0 + 1)
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Client-chosen identifier of an operation. Stays the same when the operation is retransmitted, so
/// it serves as the dedup key, and it defines the order of operations inside a block.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct UniqueIdentifier(u64);

impl UniqueIdentifier {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for UniqueIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Milliseconds since the Unix Epoch.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn millis(&self) -> u64 {
        self.0
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Add `duration` to this timestamp, saturating at `u64::MAX` milliseconds.
    pub fn saturating_add(&self, duration: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration.as_millis() as u64))
    }

    /// Subtract `duration` from this timestamp, saturating at the Unix Epoch.
    pub fn saturating_sub(&self, duration: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(duration.as_millis() as u64))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(value: SystemTime) -> Self {
        let millis = value
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }
}

/// Amount of the root ledger's currency, in its smallest unit.
pub type Amount = u64;

/// A SHA256 hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ed25519 signature represented in bytes.
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({:02x?}..)", &self.0[..4])
    }
}

/// Ed25519 verifying key represented in bytes.
///
/// Entities and operations store keys in this form because [`ed25519_dalek::VerifyingKey`] does not
/// implement the Borsh traits. Conversion into a `VerifyingKey` is fallible, and is done at the point
/// where a signature is checked.
pub type VerifyingKeyBytes = [u8; 32];
