// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! The wire-level data model shared by the polling and streaming transports:
//! [`Kind`], [`ItemDescriptor`], [`Collection`], and the [`ChangeSet`] produced
//! by [`crate::ProtocolCodec`] from a decoded event stream.

use serde_json::Value;
use std::sync::Arc;

/// Identifies a class of stored entity (`flag`, `segment`, ...). Cheap to
/// clone: backed by an `Arc<str>` so a [`Collection`]'s kind can be shared
/// across every item it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Kind(Arc<str>);

impl Kind {
    /// Construct a new kind from its wire name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Kind(name.into())
    }

    /// The wire name of this kind.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Kind {
    fn from(value: &str) -> Self {
        Kind::new(value)
    }
}

/// The `flag` kind, present in every deployment of this protocol.
pub fn flag_kind() -> Kind {
    Kind::new("flag")
}

/// The `segment` kind, present in every deployment of this protocol.
pub fn segment_kind() -> Kind {
    Kind::new("segment")
}

/// A versioned item: either live data at a given version, or a tombstone
/// (`object: None`) recording that the item was deleted at that version.
/// Version is expected to be monotonically non-decreasing for a given
/// `(kind, key)` pair; see the store's `ApplyDelta` for the enforcement point.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDescriptor {
    /// The version this item (or tombstone) was observed at. Always `> 0`
    /// once stored.
    pub version: i64,
    /// The item's payload, or `None` for a tombstone.
    pub object: Option<Value>,
}

impl ItemDescriptor {
    /// Build a tombstone descriptor at the given version.
    pub fn tombstone(version: i64) -> Self {
        ItemDescriptor {
            version,
            object: None,
        }
    }

    /// Build a live descriptor carrying `object` at the given version.
    pub fn present(version: i64, object: Value) -> Self {
        ItemDescriptor {
            version,
            object: Some(object),
        }
    }

    /// Whether this descriptor is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.object.is_none()
    }
}

/// A single key's worth of item inside a [`Collection`].
#[derive(Debug, Clone)]
pub struct CollectionItem {
    /// The item's key within its kind.
    pub key: Arc<str>,
    /// The item's descriptor.
    pub item: ItemDescriptor,
}

/// The wire/transfer representation for both a basis and a delta: one kind,
/// and the ordered items observed for it in this transfer.
#[derive(Debug, Clone)]
pub struct Collection {
    /// The kind all items in this collection belong to.
    pub kind: Kind,
    /// The items carried for this kind, in the order the server sent them.
    pub items: Vec<CollectionItem>,
}

/// The server's declared purpose for a [`ChangeSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// A complete authoritative snapshot: the receiver should treat the
    /// resulting [`ChangeSet`] as a Basis (full replace).
    TransferFull,
    /// An incremental update: the receiver should treat the resulting
    /// [`ChangeSet`] as a Delta (conditional per-item apply).
    TransferChanges,
    /// No change: nothing to apply.
    None,
}

impl Intent {
    /// Parse the wire `intentCode` string.
    pub fn from_wire(code: &str) -> Option<Intent> {
        match code {
            "xfer-full" => Some(Intent::TransferFull),
            "xfer-changes" => Some(Intent::TransferChanges),
            "none" => Some(Intent::None),
            _ => None,
        }
    }

    /// Whether this intent produces a Basis (full replace) rather than a
    /// Delta (incremental apply) when applied to the store.
    pub fn is_basis(&self) -> bool {
        matches!(self, Intent::TransferFull)
    }
}

/// An opaque server-provided cursor identifying the stream position at the
/// end of a [`ChangeSet`]. Forwarded as-is to the next poll request or kept
/// for diagnostics on the streaming path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector(pub Option<Value>);

/// A complete, ready-to-apply unit produced by [`crate::ProtocolCodec`]:
/// the server's declared intent plus the collections of items accumulated for
/// it, terminated by a `payload-transferred` selector.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// The server's declared intent for this change set.
    pub intent: Intent,
    /// The per-kind collections of upserts/tombstones accumulated for this
    /// change set. Empty for `Intent::None`.
    pub collections: Vec<Collection>,
    /// The cursor supplied by the terminating `payload-transferred` event.
    pub selector: Selector,
}

impl ChangeSet {
    /// The empty, no-op change set produced by `server-intent{code: "none"}`.
    pub fn none() -> Self {
        ChangeSet {
            intent: Intent::None,
            collections: Vec::new(),
            selector: Selector::default(),
        }
    }
}
