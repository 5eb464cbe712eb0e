//! Hierarchical item registry.
//!
//! Items live in an arena addressed by generation-checked indices. Parent and
//! child links are index lists, so removing a subtree invalidates its indices
//! instead of leaving dangling references behind.
//!
//! # Naming
//!
//! A root item is named `{prefix}{order}` (e.g. `cx0`), a child
//! `{parent}.{prefix}{order}` (e.g. `cx0.e1`, `cx0.e1.ch3`). When the item did
//! not fix its order, the lowest index not used by a sibling with the same
//! prefix is taken. Names and aliases share one namespace.
//!
//! # Locking
//!
//! The [`Tree`] itself is a plain data structure. [`Core`] mutates it only
//! with the administrative lock held, obtained through flush-and-lock so that
//! no queued notification for an affected item is still pending.

use crate::core::{Core, RegistryEvent};
use crate::error::{BinderError, BinderResult};
use crate::item::{BindState, ItemId, ItemKind, ItemRef, ServiceClass};
use crate::limits::{
    ENUM_PAGE, ENUM_SENTINEL, MAX_DEPTH, MAX_ITEM_ID, MAX_NAME_LEN, MINOR_UNASSIGNED,
};
use crate::protocol::Protocol;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Arena
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeIndex {
    slot: usize,
    generation: u32,
}

#[derive(Debug)]
struct Node {
    item: ItemRef,
    prefix: String,
    parent: Option<NodeIndex>,
    children: Vec<NodeIndex>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// The item tree.
#[derive(Debug)]
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_id: HashMap<ItemId, NodeIndex>,
    roots: Vec<NodeIndex>,
    next_id: u32,
    evolution: u64,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Creates an empty tree. The first id issued is `1`.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            roots: Vec::new(),
            next_id: 1,
            evolution: 0,
        }
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Change counter, bumped by every insert and removal.
    pub fn evolution(&self) -> u64 {
        self.evolution
    }

    fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.slots
            .get(index.slot)
            .filter(|slot| slot.generation == index.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, index: NodeIndex) -> Option<&mut Node> {
        self.slots
            .get_mut(index.slot)
            .filter(|slot| slot.generation == index.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn index_of(&self, id: ItemId) -> BinderResult<NodeIndex> {
        self.by_id
            .get(&id)
            .copied()
            .ok_or_else(|| BinderError::NotFound(format!("item {id}")))
    }

    /// Live item by id.
    pub fn get(&self, id: ItemId) -> Option<ItemRef> {
        let index = self.by_id.get(&id)?;
        self.node(*index).map(|node| node.item.clone())
    }

    fn depth(&self, mut index: NodeIndex) -> usize {
        let mut depth = 1;
        while let Some(parent) = self.node(index).and_then(|n| n.parent) {
            depth += 1;
            index = parent;
        }
        depth
    }

    fn siblings(&self, parent: Option<NodeIndex>) -> &[NodeIndex] {
        match parent {
            Some(parent) => self.node(parent).map_or(&[], |n| n.children.as_slice()),
            None => &self.roots,
        }
    }

    fn name_taken(&self, candidate: &str) -> bool {
        self.preorder().any(|node| {
            let meta = node.item.meta.read();
            meta.name == candidate || meta.alias.as_deref() == Some(candidate)
        })
    }

    fn allocate_id(&mut self) -> BinderResult<ItemId> {
        for _ in 0..=self.by_id.len() {
            let candidate = ItemId::new(self.next_id);
            self.next_id = if self.next_id >= MAX_ITEM_ID { 1 } else { self.next_id + 1 };
            if !self.by_id.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(BinderError::ResourceExhausted("item id space".into()))
    }

    /// Links `item` under `parent` (or as a root when `parent` is
    /// [`ItemId::NONE`]) and returns its fresh id. Nothing is changed on
    /// failure.
    pub fn insert(
        &mut self,
        parent: ItemId,
        prefix: &str,
        alias: Option<&str>,
        item: &ItemRef,
        order_total: u32,
    ) -> BinderResult<ItemId> {
        if item.registered.load(Ordering::Acquire) || item.kind() == ItemKind::Removed {
            return Err(BinderError::AlreadyExists(format!(
                "item handle {} already registered",
                item.id()
            )));
        }
        if prefix.is_empty() || prefix.contains('.') {
            return Err(BinderError::InvalidArgument(format!("bad name prefix '{prefix}'")));
        }

        let parent_index = if parent.is_none() {
            if item.provider.lock().is_none() {
                return Err(BinderError::InvalidArgument(
                    "root item without a provider".into(),
                ));
            }
            None
        } else {
            let index = self.index_of(parent)?;
            if self.depth(index) + 1 > MAX_DEPTH {
                return Err(BinderError::InvalidArgument(format!(
                    "depth under item {parent} exceeds {MAX_DEPTH}"
                )));
            }
            Some(index)
        };
        let parent_node = parent_index.and_then(|index| self.node(index));
        if parent_node.is_some_and(|n| n.item.removing.load(Ordering::Acquire)) {
            return Err(BinderError::Busy(format!("item {parent} is being removed")));
        }

        let (fixed, requested) = {
            let meta = item.meta.read();
            (meta.fixed_order, meta.order)
        };
        let used: HashSet<u32> = self
            .siblings(parent_index)
            .iter()
            .filter_map(|index| self.node(*index))
            .filter(|node| node.prefix == prefix)
            .map(|node| node.item.order())
            .collect();
        let order = if fixed {
            requested
        } else {
            (0..).find(|n| !used.contains(n)).unwrap_or(u32::MAX)
        };
        if order_total != 0 && order >= order_total {
            return Err(if fixed {
                BinderError::InvalidArgument(format!("order {order} >= {order_total}"))
            } else {
                BinderError::ResourceExhausted(format!("all {order_total} '{prefix}' slots used"))
            });
        }

        let name = match parent_node {
            Some(node) => format!("{}.{prefix}{order}", node.item.name()),
            None => format!("{prefix}{order}"),
        };
        if name.len() > MAX_NAME_LEN {
            return Err(BinderError::InvalidArgument(format!(
                "name '{name}' longer than {MAX_NAME_LEN}"
            )));
        }
        if self.name_taken(&name) {
            return Err(BinderError::AlreadyExists(format!("name '{name}'")));
        }
        if let Some(alias) = alias {
            if alias.is_empty() || alias.contains('.') || alias.len() > MAX_NAME_LEN {
                return Err(BinderError::InvalidArgument(format!("bad alias '{alias}'")));
            }
            if alias == name || self.name_taken(alias) {
                return Err(BinderError::AlreadyExists(format!("alias '{alias}'")));
            }
        }
        let needs_provider = item.provider.lock().is_none();
        let inherited = match parent_node {
            Some(node) if needs_provider => node.item.provider.lock().clone(),
            _ => None,
        };

        // Validation done; everything below must not fail.
        let id = self.allocate_id()?;
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let index = NodeIndex {
            slot,
            generation: self.slots[slot].generation,
        };
        self.slots[slot].node = Some(Node {
            item: item.clone(),
            prefix: prefix.to_string(),
            parent: parent_index,
            children: Vec::new(),
        });
        match parent_index.and_then(|p| self.node_mut(p)) {
            Some(parent) => parent.children.insert(0, index),
            None => self.roots.insert(0, index),
        }
        self.by_id.insert(id, index);

        {
            let mut meta = item.meta.write();
            meta.name = name;
            meta.alias = alias.map(str::to_string);
            meta.order = order;
            meta.parent = parent;
        }
        if inherited.is_some() {
            *item.provider.lock() = inherited;
        }
        item.set_id(id);
        item.registered.store(true, Ordering::Release);
        self.evolution += 1;
        Ok(id)
    }

    /// Items of the subtree rooted at `id`, descendants before ancestors.
    pub fn subtree_postorder(&self, id: ItemId) -> BinderResult<Vec<ItemRef>> {
        let root = self.index_of(id)?;
        let mut out = Vec::new();
        self.collect_postorder(root, &mut out);
        Ok(out)
    }

    fn collect_postorder(&self, index: NodeIndex, out: &mut Vec<ItemRef>) {
        if let Some(node) = self.node(index) {
            for child in &node.children {
                self.collect_postorder(*child, out);
            }
            out.push(node.item.clone());
        }
    }

    /// Unlinks the subtree rooted at `id` and returns its items post-order,
    /// each already marked [`ItemKind::Removed`].
    pub fn unlink(&mut self, id: ItemId) -> BinderResult<Vec<ItemRef>> {
        let root = self.index_of(id)?;
        let parent = self.node(root).and_then(|n| n.parent);
        match parent.and_then(|p| self.node_mut(p)) {
            Some(parent) => parent.children.retain(|c| *c != root),
            None => self.roots.retain(|c| *c != root),
        }

        let mut indices = Vec::new();
        self.collect_indices_postorder(root, &mut indices);
        let mut removed = Vec::with_capacity(indices.len());
        for index in indices {
            let slot = &mut self.slots[index.slot];
            if let Some(node) = slot.node.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index.slot);
                self.by_id.remove(&node.item.id());
                node.item.meta.write().kind = ItemKind::Removed;
                node.item.registered.store(false, Ordering::Release);
                removed.push(node.item);
            }
        }
        self.evolution += 1;
        Ok(removed)
    }

    fn collect_indices_postorder(&self, index: NodeIndex, out: &mut Vec<NodeIndex>) {
        if let Some(node) = self.node(index) {
            for child in &node.children {
                self.collect_indices_postorder(*child, out);
            }
            out.push(index);
        }
    }

    fn preorder(&self) -> impl Iterator<Item = &Node> + '_ {
        let mut stack: Vec<NodeIndex> = self.roots.iter().rev().copied().collect();
        std::iter::from_fn(move || {
            while let Some(index) = stack.pop() {
                if let Some(node) = self.node(index) {
                    stack.extend(node.children.iter().rev().copied());
                    return Some(node);
                }
            }
            None
        })
    }

    /// All live items in depth-first pre-order.
    pub fn items(&self) -> Vec<ItemRef> {
        self.preorder().map(|node| node.item.clone()).collect()
    }

    /// Direct children of `id`, newest first.
    pub fn children(&self, id: ItemId) -> BinderResult<Vec<ItemRef>> {
        let index = self.index_of(id)?;
        Ok(self
            .siblings(Some(index))
            .iter()
            .filter_map(|c| self.node(*c))
            .map(|n| n.item.clone())
            .collect())
    }

    /// Resolves an exact name, an alias or a unique dotted suffix.
    pub fn resolve(&self, query: &str) -> BinderResult<ItemRef> {
        if query.is_empty() {
            return Err(BinderError::InvalidArgument("empty item name".into()));
        }
        let mut by_alias = None;
        let mut by_suffix = Vec::new();
        let dotted = format!(".{query}");
        for node in self.preorder() {
            let meta = node.item.meta.read();
            if meta.name == query {
                return Ok(node.item.clone());
            }
            if meta.alias.as_deref() == Some(query) {
                by_alias = Some(node.item.clone());
            } else if meta.name.ends_with(&dotted) {
                by_suffix.push(node.item.clone());
            }
        }
        if let Some(item) = by_alias {
            return Ok(item);
        }
        match by_suffix.len() {
            1 => Ok(by_suffix.swap_remove(0)),
            0 => Err(BinderError::NotFound(format!("item '{query}'"))),
            n => Err(BinderError::NotFound(format!(
                "item '{query}' is ambiguous ({n} matches)"
            ))),
        }
    }

    /// One page of pre-order ids starting at logical offset `from`.
    pub fn page(&self, from: usize) -> (Vec<ItemId>, usize) {
        let ids: Vec<ItemId> = self
            .preorder()
            .skip(from)
            .take(ENUM_PAGE)
            .map(|node| node.item.id())
            .collect();
        (ids, self.len())
    }
}

// =============================================================================
// Control-surface views
// =============================================================================

/// Result of one `enumerate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumPage {
    /// Item ids, padded with `0`.
    pub ids: [i32; ENUM_PAGE],
    /// Number of live items.
    pub total: i32,
    /// Registry change counter.
    pub evolution: i32,
}

impl EnumPage {
    /// The non-sentinel ids.
    pub fn live_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.ids
            .iter()
            .take_while(|id| **id != ENUM_SENTINEL)
            .filter_map(|id| ItemId::from_i32(*id).ok())
    }
}

// =============================================================================
// Core operations
// =============================================================================

impl Core {
    /// Registers `item` under `parent` and returns its id.
    ///
    /// `order_total`, when non-zero, bounds the sibling order index.
    pub fn add_node(
        &self,
        parent: ItemId,
        prefix: &str,
        alias: Option<&str>,
        item: &ItemRef,
        order_total: u32,
    ) -> BinderResult<ItemId> {
        let _guard = self.engine().flush_and_lock();
        let id = self
            .inner
            .tree
            .lock()
            .insert(parent, prefix, alias, item, order_total)?;
        if item.debug_level() == 0 {
            item.meta.write().debug_level = self.config().default_debug_level;
        }
        let name = item.name();
        info!(id = %id, item = %name, kind = %item.kind(), "item registered");
        self.emit(RegistryEvent::ItemAdded { id, name });
        Ok(id)
    }

    /// Removes the subtree rooted at `id`.
    ///
    /// Bound protocols are detached first, descendants before ancestors. If
    /// any detach fails, the already detached protocols are re-attached and
    /// the tree is left exactly as it was.
    pub fn remove_node(&self, id: ItemId) -> BinderResult<()> {
        let mut guard = self.engine().flush_and_lock();
        let subtree = self.inner.tree.lock().subtree_postorder(id)?;

        if let Some(busy) = subtree
            .iter()
            .find(|i| i.bind_state().in_transition() || i.removing.load(Ordering::Acquire))
        {
            return Err(BinderError::Busy(format!("item {} in transition", busy.id())));
        }
        if let Some(open) = subtree.iter().find(|i| i.open_count() > 0) {
            return Err(BinderError::Busy(format!("item {} has open device files", open.id())));
        }
        for item in &subtree {
            item.removing.store(true, Ordering::Release);
        }

        let mut detached: Vec<(ItemRef, Arc<Protocol>)> = Vec::new();
        for item in &subtree {
            let Some(protocol) = item.protocol() else {
                continue;
            };
            let (next, result) = self.detach_locked(item, guard);
            guard = next;
            if let Err(err) = result {
                warn!(id = %item.id(), error = %err, "removal aborted by refused detach");
                for (restored, protocol) in detached.into_iter().rev() {
                    let (next, result) = self.attach_locked(&restored, protocol.clone(), guard);
                    guard = next;
                    if let Err(again) = result {
                        restored.binding.write().state = BindState::Faulted;
                        error!(
                            id = %restored.id(),
                            protocol = %protocol.name(),
                            error = %again,
                            "re-attach after aborted removal failed; item faulted"
                        );
                    }
                }
                for item in &subtree {
                    item.removing.store(false, Ordering::Release);
                }
                return Err(err);
            }
            detached.push((item.clone(), protocol));
        }

        let removed = self.inner.tree.lock().unlink(id)?;
        {
            let mut minors = self.inner.minors.lock();
            for item in &removed {
                if minors.release(item.id()).is_some() {
                    item.meta.write().minor = MINOR_UNASSIGNED;
                }
            }
        }
        for item in &removed {
            self.emit(RegistryEvent::ItemRemoved {
                id: item.id(),
                name: item.name(),
            });
        }
        drop(guard);

        for item in &removed {
            if item.torn_down.swap(true, Ordering::AcqRel) {
                continue;
            }
            item.link_down();
            item.provider.lock().take();
            debug!(id = %item.id(), item = %item.name(), "item torn down");
        }
        info!(id = %id, count = removed.len(), "subtree removed");
        Ok(())
    }

    /// Live item by id.
    pub fn item(&self, id: ItemId) -> BinderResult<ItemRef> {
        let _guard = self.engine().lock();
        self.inner
            .tree
            .lock()
            .get(id)
            .ok_or_else(|| BinderError::NotFound(format!("item {id}")))
    }

    /// Resolves an exact name, an alias or a unique dotted suffix.
    pub fn lookup(&self, query: &str) -> BinderResult<ItemRef> {
        let _guard = self.engine().lock();
        self.inner.tree.lock().resolve(query)
    }

    /// All live items in depth-first pre-order.
    pub fn items(&self) -> Vec<ItemRef> {
        let _guard = self.engine().lock();
        self.inner.tree.lock().items()
    }

    /// Direct children of `id`, newest first.
    pub fn children(&self, id: ItemId) -> BinderResult<Vec<ItemRef>> {
        let _guard = self.engine().lock();
        self.inner.tree.lock().children(id)
    }

    /// One page of live ids in pre-order, starting at offset `from`.
    pub fn enumerate(&self, from: i32) -> BinderResult<EnumPage> {
        let from = usize::try_from(from)
            .map_err(|_| BinderError::InvalidArgument(format!("negative offset {from}")))?;
        let _guard = self.engine().lock();
        let tree = self.inner.tree.lock();
        let (page, total) = tree.page(from);
        let mut ids = [ENUM_SENTINEL; ENUM_PAGE];
        for (slot, id) in ids.iter_mut().zip(page) {
            *slot = id.as_i32();
        }
        Ok(EnumPage {
            ids,
            total: i32::try_from(total).unwrap_or(i32::MAX),
            evolution: (tree.evolution() & u64::from(i32::MAX as u32)) as i32,
        })
    }

    /// Registry change counter.
    pub fn evolution(&self) -> u64 {
        let _guard = self.engine().lock();
        self.inner.tree.lock().evolution()
    }

    /// Assigns a device minor to a live item.
    pub fn minor_get(&self, item: &ItemRef, service: ServiceClass) -> BinderResult<i32> {
        let _guard = self.engine().flush_and_lock();
        if !item.is_live() {
            return Err(BinderError::NotFound(format!("item {}", item.id())));
        }
        if service == ServiceClass::None {
            return Err(BinderError::InvalidArgument("service class none".into()));
        }
        let minor = self.inner.minors.lock().allocate(item.id())?;
        {
            let mut meta = item.meta.write();
            meta.minor = minor;
            meta.service = service;
        }
        debug!(id = %item.id(), minor, service = %service, "minor assigned");
        Ok(minor)
    }

    /// Frees the item's minor, if it holds one.
    pub fn minor_put(&self, item: &ItemRef) {
        let _guard = self.engine().flush_and_lock();
        if let Some(minor) = self.inner.minors.lock().release(item.id()) {
            item.meta.write().minor = MINOR_UNASSIGNED;
            debug!(id = %item.id(), minor, "minor released");
        }
    }

    pub(crate) fn item_by_minor(&self, minor: i32) -> BinderResult<ItemRef> {
        let _guard = self.engine().lock();
        let id = self
            .inner
            .minors
            .lock()
            .item_at(minor)
            .ok_or_else(|| BinderError::NotFound(format!("minor {minor}")))?;
        self.inner
            .tree
            .lock()
            .get(id)
            .ok_or_else(|| BinderError::NotFound(format!("minor {minor}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;
    use crate::provider::Provider;

    fn root(provider: &Provider) -> ItemRef {
        Item::builder(ItemKind::Adapter)
            .provider(provider.acquire())
            .build()
    }

    fn channel() -> ItemRef {
        Item::builder(ItemKind::Channel).build()
    }

    #[test]
    fn test_names_and_ids() {
        let provider = Provider::new("test");
        let mut tree = Tree::new();
        let adapter = root(&provider);
        let a = tree.insert(ItemId::NONE, "cx", None, &adapter, 0).unwrap();
        let c0 = channel();
        let c1 = channel();
        let id0 = tree.insert(a, "ch", Some("c0"), &c0, 0).unwrap();
        let id1 = tree.insert(a, "ch", None, &c1, 0).unwrap();

        assert_eq!(a, ItemId::new(1));
        assert_eq!(id0, ItemId::new(2));
        assert_eq!(id1, ItemId::new(3));
        assert_eq!(adapter.name(), "cx0");
        assert_eq!(c0.name(), "cx0.ch0");
        assert_eq!(c1.name(), "cx0.ch1");
        assert_eq!(c0.parent(), a);
        // Children inherit the provider.
        assert_eq!(provider.users(), 3);
    }

    #[test]
    fn test_root_requires_provider() {
        let mut tree = Tree::new();
        let err = tree.insert(ItemId::NONE, "cx", None, &channel(), 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
        assert!(tree.is_empty());
        assert_eq!(tree.evolution(), 0);
    }

    #[test]
    fn test_duplicate_handle_rejected() {
        let provider = Provider::new("test");
        let mut tree = Tree::new();
        let adapter = root(&provider);
        tree.insert(ItemId::NONE, "cx", None, &adapter, 0).unwrap();
        let err = tree.insert(ItemId::NONE, "cx", None, &adapter, 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_alias_collisions() {
        let provider = Provider::new("test");
        let mut tree = Tree::new();
        let a = tree
            .insert(ItemId::NONE, "cx", None, &root(&provider), 0)
            .unwrap();
        tree.insert(a, "ch", Some("c0"), &channel(), 0).unwrap();

        let err = tree.insert(a, "ch", Some("c0"), &channel(), 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExists);
        // An alias may not shadow an existing name either.
        let err = tree.insert(a, "ch", Some("cx0"), &channel(), 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExists);
        let err = tree.insert(a, "ch", Some("c.0"), &channel(), 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_fixed_order_collision() {
        let provider = Provider::new("test");
        let mut tree = Tree::new();
        let a = tree
            .insert(ItemId::NONE, "cx", None, &root(&provider), 0)
            .unwrap();
        let fixed = || Item::builder(ItemKind::Channel).order(5).build();
        tree.insert(a, "ch", None, &fixed(), 0).unwrap();
        let err = tree.insert(a, "ch", None, &fixed(), 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_order_total_bounds_auto_order() {
        let provider = Provider::new("test");
        let mut tree = Tree::new();
        let a = tree
            .insert(ItemId::NONE, "cx", None, &root(&provider), 0)
            .unwrap();
        tree.insert(a, "ch", None, &channel(), 2).unwrap();
        tree.insert(a, "ch", None, &channel(), 2).unwrap();
        let err = tree.insert(a, "ch", None, &channel(), 2).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ResourceExhausted);
    }

    #[test]
    fn test_depth_bound() {
        let provider = Provider::new("test");
        let mut tree = Tree::new();
        let mut parent = tree
            .insert(ItemId::NONE, "cx", None, &root(&provider), 0)
            .unwrap();
        for _ in 1..MAX_DEPTH {
            parent = tree.insert(parent, "n", None, &channel(), 0).unwrap();
        }
        let err = tree.insert(parent, "n", None, &channel(), 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_name_length_bound() {
        let provider = Provider::new("test");
        let mut tree = Tree::new();
        let long = "x".repeat(MAX_NAME_LEN);
        let err = tree
            .insert(ItemId::NONE, &long, None, &root(&provider), 0)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_preorder_newest_child_first() {
        let provider = Provider::new("test");
        let mut tree = Tree::new();
        let a = tree
            .insert(ItemId::NONE, "cx", None, &root(&provider), 0)
            .unwrap();
        let e = tree.insert(a, "e", None, &channel(), 0).unwrap();
        let ch = tree.insert(e, "ch", None, &channel(), 0).unwrap();
        let s = tree.insert(a, "s", None, &channel(), 0).unwrap();

        let (ids, total) = tree.page(0);
        assert_eq!(ids, vec![a, s, e, ch]);
        assert_eq!(total, 4);
        let (tail, _) = tree.page(3);
        assert_eq!(tail, vec![ch]);
    }

    #[test]
    fn test_resolve_suffix() {
        let provider = Provider::new("test");
        let mut tree = Tree::new();
        let a = tree
            .insert(ItemId::NONE, "cx", None, &root(&provider), 0)
            .unwrap();
        let b = tree
            .insert(ItemId::NONE, "cx", None, &root(&provider), 0)
            .unwrap();
        let ca = tree.insert(a, "ch", None, &channel(), 0).unwrap();
        tree.insert(b, "ch", None, &channel(), 0).unwrap();
        let e = tree.insert(b, "e", None, &channel(), 0).unwrap();

        assert_eq!(tree.resolve("cx0.ch0").unwrap().id(), ca);
        assert_eq!(tree.resolve("e0").unwrap().id(), e);
        // Both adapters own a "ch0".
        let err = tree.resolve("ch0").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert!(tree.resolve("nothing").is_err());
    }

    #[test]
    fn test_unlink_invalidates_subtree() {
        let provider = Provider::new("test");
        let mut tree = Tree::new();
        let a = tree
            .insert(ItemId::NONE, "cx", None, &root(&provider), 0)
            .unwrap();
        let e = tree.insert(a, "e", None, &channel(), 0).unwrap();
        let ch = tree.insert(e, "ch", None, &channel(), 0).unwrap();
        let before = tree.evolution();

        let removed = tree.unlink(e).unwrap();
        let ids: Vec<ItemId> = removed.iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec![ch, e]);
        assert!(removed.iter().all(|i| i.kind() == ItemKind::Removed));
        assert!(tree.get(ch).is_none());
        assert_eq!(tree.len(), 1);
        assert!(tree.evolution() > before);

        // Freed slot is reused with a new generation; the name is free again.
        let again = tree.insert(a, "e", None, &channel(), 0).unwrap();
        assert_ne!(again, e);
        assert_eq!(tree.get(again).unwrap().name(), "cx0.e0");
    }
}
