//! Five-slot edit operators for orderable lists.
//!
//! A [`ListOp`] either replaces a list outright (`explicit` mode) or edits it
//! with five ordered, duplicate-free item vectors: `added`, `prepended`,
//! `appended`, `deleted`, and `ordered`. Every orderable list in the data
//! model (references, payloads, inherits, specializes, connections, targets,
//! sublayers, variant sets) is authored as one of these.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::{
    error,
    path::ScenePath,
    token::Token,
    types::{Payload, Reference, UnregisteredValue},
};

/// Identifies one of the six item vectors of a [`ListOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumIter, Serialize, Deserialize)]
pub enum ListOpSlot {
    Explicit,
    Added,
    Prepended,
    Appended,
    Deleted,
    Ordered,
}

/// Callback invoked for each item before application; returning `None` drops
/// the item, returning a different value substitutes it.
pub type ApplyCallback<'a, T> = &'a dyn Fn(ListOpSlot, &T) -> Option<T>;

/// A list edit operator; see the module docs.
///
/// When `is_explicit` is true only the explicit vector is meaningful; the
/// others are empty. Switching between modes clears every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListOp<T> {
    is_explicit: bool,
    explicit: Vec<T>,
    added: Vec<T>,
    prepended: Vec<T>,
    appended: Vec<T>,
    deleted: Vec<T>,
    ordered: Vec<T>,
}

impl<T> Default for ListOp<T> {
    fn default() -> Self {
        Self {
            is_explicit: false,
            explicit: Vec::new(),
            added: Vec::new(),
            prepended: Vec::new(),
            appended: Vec::new(),
            deleted: Vec::new(),
            ordered: Vec::new(),
        }
    }
}

/// Removes duplicate items, keeping the first occurrence (or the last when
/// `keep_last`). Returns true if the vector was already duplicate-free.
fn make_unique<T: PartialEq + Clone>(items: &mut Vec<T>, keep_last: bool) -> bool {
    if items.len() <= 1 {
        return true;
    }
    let mut unique: Vec<T> = Vec::with_capacity(items.len());
    if keep_last {
        for item in items.iter().rev() {
            if !unique.contains(item) {
                unique.push(item.clone());
            }
        }
        unique.reverse();
    } else {
        for item in items.iter() {
            if !unique.contains(item) {
                unique.push(item.clone());
            }
        }
    }
    if unique.len() == items.len() {
        return true;
    }
    *items = unique;
    false
}

impl<T: Clone + PartialEq> ListOp<T> {
    /// Creates an explicit list-op holding exactly `items`.
    #[must_use]
    pub fn create_explicit(items: Vec<T>) -> Self {
        let mut op = Self::default();
        op.set_items(ListOpSlot::Explicit, items);
        op
    }

    /// Creates a non-explicit list-op from the three commonly authored
    /// vectors.
    #[must_use]
    pub fn create(prepended: Vec<T>, appended: Vec<T>, deleted: Vec<T>) -> Self {
        let mut op = Self::default();
        op.set_items(ListOpSlot::Prepended, prepended);
        op.set_items(ListOpSlot::Appended, appended);
        op.set_items(ListOpSlot::Deleted, deleted);
        op
    }

    /// True in explicit mode.
    #[must_use]
    pub fn is_explicit(&self) -> bool {
        self.is_explicit
    }

    /// True if no slot holds any item. An empty non-explicit op is an
    /// identity edit; an empty explicit op clears the list.
    #[must_use]
    pub fn has_keys(&self) -> bool {
        !(self.explicit.is_empty()
            && self.added.is_empty()
            && self.prepended.is_empty()
            && self.appended.is_empty()
            && self.deleted.is_empty()
            && self.ordered.is_empty())
    }

    /// True if `item` appears in any slot.
    #[must_use]
    pub fn has_item(&self, item: &T) -> bool {
        if self.is_explicit {
            return self.explicit.contains(item);
        }
        self.added.contains(item)
            || self.prepended.contains(item)
            || self.appended.contains(item)
            || self.deleted.contains(item)
            || self.ordered.contains(item)
    }

    /// The items of one slot.
    #[must_use]
    pub fn items(&self, slot: ListOpSlot) -> &[T] {
        match slot {
            ListOpSlot::Explicit => &self.explicit,
            ListOpSlot::Added => &self.added,
            ListOpSlot::Prepended => &self.prepended,
            ListOpSlot::Appended => &self.appended,
            ListOpSlot::Deleted => &self.deleted,
            ListOpSlot::Ordered => &self.ordered,
        }
    }

    /// Sets the items of one slot, switching mode if the slot demands it.
    /// Returns false if duplicates had to be removed (they are removed
    /// either way; `appended` keeps the last occurrence, others the first).
    pub fn set_items(&mut self, slot: ListOpSlot, items: Vec<T>) -> bool {
        self.set_explicit_mode(slot == ListOpSlot::Explicit);
        let keep_last = slot == ListOpSlot::Appended;
        let (vector, dedup) = match slot {
            ListOpSlot::Explicit => (&mut self.explicit, true),
            ListOpSlot::Added => (&mut self.added, false),
            ListOpSlot::Prepended => (&mut self.prepended, true),
            ListOpSlot::Appended => (&mut self.appended, true),
            ListOpSlot::Deleted => (&mut self.deleted, true),
            ListOpSlot::Ordered => (&mut self.ordered, false),
        };
        *vector = items;
        if dedup {
            let was_unique = make_unique(vector, keep_last);
            if !was_unique {
                error::post_coding_error("duplicate items in list op");
            }
            was_unique
        } else {
            true
        }
    }

    fn set_explicit_mode(&mut self, explicit: bool) {
        if explicit != self.is_explicit {
            self.is_explicit = explicit;
            self.explicit.clear();
            self.added.clear();
            self.prepended.clear();
            self.appended.clear();
            self.deleted.clear();
            self.ordered.clear();
        }
    }

    /// Resets to a non-explicit, empty op.
    pub fn clear(&mut self) {
        self.is_explicit = true;
        self.set_explicit_mode(false);
    }

    /// Resets to an explicit, empty op (which clears a list on apply).
    pub fn clear_and_make_explicit(&mut self) {
        self.is_explicit = false;
        self.set_explicit_mode(true);
    }

    /// Applies this op to `vec` in place. The optional callback translates
    /// or drops individual items before they take effect.
    pub fn apply(&self, vec: &mut Vec<T>, callback: Option<ApplyCallback<'_, T>>) {
        let map_item = |slot: ListOpSlot, item: &T| -> Option<T> {
            match callback {
                Some(cb) => cb(slot, item),
                None => Some(item.clone()),
            }
        };

        if self.is_explicit {
            let mut result = Vec::with_capacity(self.explicit.len());
            for item in &self.explicit {
                if let Some(mapped) = map_item(ListOpSlot::Explicit, item) {
                    if !result.contains(&mapped) {
                        result.push(mapped);
                    }
                }
            }
            *vec = result;
            return;
        }

        if callback.is_none() && !self.has_keys() {
            return;
        }

        // Deletes.
        for item in &self.deleted {
            if let Some(mapped) = map_item(ListOpSlot::Deleted, item) {
                vec.retain(|x| *x != mapped);
            }
        }
        // Adds: append only when absent.
        for item in &self.added {
            if let Some(mapped) = map_item(ListOpSlot::Added, item) {
                if !vec.contains(&mapped) {
                    vec.push(mapped);
                }
            }
        }
        // Prepends: reverse order so the slot's order survives at the front;
        // items already present move to the front.
        for item in self.prepended.iter().rev() {
            if let Some(mapped) = map_item(ListOpSlot::Prepended, item) {
                if let Some(pos) = vec.iter().position(|x| *x == mapped) {
                    let existing = vec.remove(pos);
                    vec.insert(0, existing);
                } else {
                    vec.insert(0, mapped);
                }
            }
        }
        // Appends: items already present move to the back.
        for item in &self.appended {
            if let Some(mapped) = map_item(ListOpSlot::Appended, item) {
                if let Some(pos) = vec.iter().position(|x| *x == mapped) {
                    let existing = vec.remove(pos);
                    vec.push(existing);
                } else {
                    vec.push(mapped);
                }
            }
        }
        // Reorder.
        let mut order = Vec::with_capacity(self.ordered.len());
        for item in &self.ordered {
            if let Some(mapped) = map_item(ListOpSlot::Ordered, item) {
                if !order.contains(&mapped) {
                    order.push(mapped);
                }
            }
        }
        reorder_in_place(vec, &order);
    }

    /// Applies this op to an empty list and returns the result.
    #[must_use]
    pub fn applied_items(&self) -> Vec<T> {
        let mut items = Vec::new();
        self.apply(&mut items, None);
        items
    }

    /// Composes this op over `inner`, returning an op equivalent to applying
    /// `inner` first and then `self` — when such a single op exists.
    ///
    /// An explicit outer op wins outright. An outer op holding only deletes,
    /// prepends, and appends merges into an inner op of the same shape (or
    /// collapses an explicit inner op by direct application). Anything
    /// involving `added` or `ordered` is not representable in general: the
    /// combined edit can depend on the input list, so `None` comes back.
    #[must_use]
    pub fn compose(&self, inner: &Self) -> Option<Self> {
        if self.is_explicit {
            return Some(self.clone());
        }
        if self.added.is_empty() && self.ordered.is_empty() {
            if inner.is_explicit {
                let mut items = inner.explicit.clone();
                self.apply(&mut items, None);
                let mut result = Self::default();
                result.set_items(ListOpSlot::Explicit, items);
                return Some(result);
            }
            if inner.added.is_empty() && inner.ordered.is_empty() {
                let mut deleted = inner.deleted.clone();
                let mut prepended = inner.prepended.clone();
                let mut appended = inner.appended.clone();

                for item in &self.deleted {
                    prepended.retain(|x| x != item);
                    appended.retain(|x| x != item);
                    if !deleted.contains(item) {
                        deleted.push(item.clone());
                    }
                }
                for item in &self.prepended {
                    deleted.retain(|x| x != item);
                    prepended.retain(|x| x != item);
                    appended.retain(|x| x != item);
                }
                prepended.splice(0..0, self.prepended.iter().cloned());
                for item in &self.appended {
                    deleted.retain(|x| x != item);
                    prepended.retain(|x| x != item);
                    appended.retain(|x| x != item);
                }
                appended.extend(self.appended.iter().cloned());

                let mut result = Self::default();
                result.set_items(ListOpSlot::Deleted, deleted);
                result.set_items(ListOpSlot::Prepended, prepended);
                result.set_items(ListOpSlot::Appended, appended);
                return Some(result);
            }
        }
        None
    }

    /// Maps every item of every slot through `f`; `None` drops the item, and
    /// results that collide with an earlier kept item are dropped too.
    /// Returns true if anything changed.
    pub fn modify<F>(&mut self, mut f: F) -> bool
    where
        F: FnMut(&T) -> Option<T>,
    {
        let mut modified = false;
        for vector in [
            &mut self.explicit,
            &mut self.added,
            &mut self.prepended,
            &mut self.appended,
            &mut self.deleted,
            &mut self.ordered,
        ] {
            let mut result: Vec<T> = Vec::with_capacity(vector.len());
            for item in vector.iter() {
                match f(item) {
                    Some(mapped) => {
                        if result.contains(&mapped) {
                            modified = true;
                        } else {
                            if mapped != *item {
                                modified = true;
                            }
                            result.push(mapped);
                        }
                    }
                    None => modified = true,
                }
            }
            *vector = result;
        }
        modified
    }

    /// Replaces `n` items of one slot starting at `index` with `new_items`.
    ///
    /// Inserting into a slot of the other mode switches modes; replace and
    /// remove requests against the other mode are silently ignored (returns
    /// false), preserving long-standing list-editor behavior.
    pub fn replace(&mut self, slot: ListOpSlot, index: usize, n: usize, new_items: &[T]) -> bool {
        let needs_mode_switch = self.is_explicit != (slot == ListOpSlot::Explicit);
        if needs_mode_switch && (n > 0 || new_items.is_empty()) {
            return false;
        }
        let mut items = self.items(slot).to_vec();
        if index > items.len() || index + n > items.len() {
            error::post_coding_error(format!(
                "invalid replace range [{index}, {}) for slot of size {}",
                index + n,
                items.len()
            ));
            return false;
        }
        items.splice(index..index + n, new_items.iter().cloned());
        self.set_items(slot, items);
        true
    }
}

/// Reorders `vec` so the members of `order` appear in that relative order.
/// Elements not named keep their relative positions; order entries absent
/// from `vec` are ignored.
fn reorder_in_place<T: Clone + PartialEq>(vec: &mut Vec<T>, order: &[T]) {
    if order.is_empty() || vec.is_empty() {
        return;
    }
    let mut scratch: Vec<T> = std::mem::take(vec);
    let mut out: Vec<T> = Vec::with_capacity(scratch.len());
    // For each order entry found in the list, move it and the non-order run
    // following it into the output as one contiguous sequence.
    for item in order {
        if let Some(start) = scratch.iter().position(|x| x == item) {
            let mut end = start + 1;
            while end < scratch.len() && !order.contains(&scratch[end]) {
                end += 1;
            }
            out.extend(scratch.drain(start..end));
        }
    }
    // Whatever remains is neither ordered nor after anything ordered, so it
    // belongs at the front in its current order.
    scratch.append(&mut out);
    *vec = scratch;
}

/// Applies a relative ordering to a plain vector, outside any list-op.
pub fn apply_list_ordering<T: Clone + PartialEq>(vec: &mut Vec<T>, order: &[T]) {
    reorder_in_place(vec, order);
}

impl<T: fmt::Display> fmt::Display for ListOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut write_items = |f: &mut fmt::Formatter<'_>,
                               label: &str,
                               items: &[T],
                               force: bool|
         -> fmt::Result {
            if !force && items.is_empty() {
                return Ok(());
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{label} Items: [")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, "]")
        };
        write!(f, "ListOp(")?;
        if self.is_explicit {
            write_items(f, "Explicit", &self.explicit, true)?;
        } else {
            write_items(f, "Deleted", &self.deleted, false)?;
            write_items(f, "Added", &self.added, false)?;
            write_items(f, "Prepended", &self.prepended, false)?;
            write_items(f, "Appended", &self.appended, false)?;
            write_items(f, "Ordered", &self.ordered, false)?;
        }
        write!(f, ")")
    }
}

pub type IntListOp = ListOp<i32>;
pub type UIntListOp = ListOp<u32>;
pub type Int64ListOp = ListOp<i64>;
pub type UInt64ListOp = ListOp<u64>;
pub type StringListOp = ListOp<String>;
pub type TokenListOp = ListOp<Token>;
pub type PathListOp = ListOp<ScenePath>;
pub type ReferenceListOp = ListOp<Reference>;
pub type PayloadListOp = ListOp<Payload>;
pub type UnregisteredValueListOp = ListOp<UnregisteredValue>;

#[cfg(test)]
mod tests {
    use super::*;

    fn op_of(
        added: &[i32],
        prepended: &[i32],
        appended: &[i32],
        deleted: &[i32],
        ordered: &[i32],
    ) -> ListOp<i32> {
        let mut op = ListOp::default();
        op.set_items(ListOpSlot::Added, added.to_vec());
        op.set_items(ListOpSlot::Prepended, prepended.to_vec());
        op.set_items(ListOpSlot::Appended, appended.to_vec());
        op.set_items(ListOpSlot::Deleted, deleted.to_vec());
        op.set_items(ListOpSlot::Ordered, ordered.to_vec());
        op
    }

    #[test]
    fn full_application() {
        // added=[A], prepended=[B], appended=[C], deleted=[D], ordered=[C,B,A]
        // over input [D, A, X] yields [C, B, A, X].
        let (a, b, c, d, x) = (1, 2, 3, 4, 5);
        let op = op_of(&[a], &[b], &[c], &[d], &[c, b, a]);
        let mut vec = vec![d, a, x];
        op.apply(&mut vec, None);
        assert_eq!(vec, vec![c, b, a, x]);
    }

    #[test]
    fn explicit_replaces_and_dedups() {
        let op = ListOp::create_explicit(vec![3, 1, 2]);
        let mut vec = vec![9, 9, 9];
        op.apply(&mut vec, None);
        assert_eq!(vec, vec![3, 1, 2]);
        assert!(op.is_explicit());
    }

    #[test]
    fn prepend_and_append_move_existing() {
        let mut op = ListOp::default();
        op.set_items(ListOpSlot::Prepended, vec![3]);
        op.set_items(ListOpSlot::Appended, vec![1]);
        let mut vec = vec![1, 2, 3];
        op.apply(&mut vec, None);
        assert_eq!(vec, vec![3, 2, 1], "existing items move rather than duplicate");
    }

    #[test]
    fn mode_switch_clears_everything() {
        let mut op = op_of(&[1], &[2], &[3], &[4], &[]);
        op.set_items(ListOpSlot::Explicit, vec![9]);
        assert!(op.is_explicit());
        assert_eq!(op.items(ListOpSlot::Prepended), &[] as &[i32]);
        op.clear();
        assert!(!op.is_explicit());
        assert!(!op.has_keys());
        op.clear_and_make_explicit();
        assert!(op.is_explicit());
        assert!(!op.has_keys());
    }

    #[test]
    fn duplicate_items_are_removed_and_reported() {
        let collector = crate::error::DiagnosticCollector::new();
        let mut op = ListOp::default();
        assert!(!op.set_items(ListOpSlot::Prepended, vec![1, 2, 1]));
        assert_eq!(op.items(ListOpSlot::Prepended), &[1, 2]);
        // Appends keep the last occurrence.
        assert!(!op.set_items(ListOpSlot::Appended, vec![1, 2, 1]));
        assert_eq!(op.items(ListOpSlot::Appended), &[2, 1]);
        assert_eq!(collector.take().len(), 2);
    }

    #[test]
    fn apply_callback_translates_and_drops() {
        let op = op_of(&[], &[10, 20], &[], &[], &[]);
        let mut vec = vec![1];
        op.apply(
            &mut vec,
            Some(&|_slot, item: &i32| if *item == 10 { None } else { Some(item + 1) }),
        );
        assert_eq!(vec, vec![21, 1]);
    }

    #[test]
    fn compose_matches_sequential_application_for_pda_ops() {
        let outer = ListOp::create(vec![1], vec![2], vec![3]);
        let inner = ListOp::create(vec![4, 3], vec![5], vec![6]);
        let composed = outer.compose(&inner).expect("representable composition");
        for input in [vec![], vec![3, 6, 9], vec![2, 4], vec![9, 8, 7, 1]] {
            let mut sequential = input.clone();
            inner.apply(&mut sequential, None);
            outer.apply(&mut sequential, None);
            let mut at_once = input.clone();
            composed.apply(&mut at_once, None);
            assert_eq!(at_once, sequential, "composition must equal sequential application");
        }
    }

    #[test]
    fn compose_over_explicit_inner() {
        let outer = ListOp::create(vec![9], vec![], vec![1]);
        let inner = ListOp::create_explicit(vec![1, 2, 3]);
        let composed = outer.compose(&inner).unwrap();
        assert!(composed.is_explicit());
        assert_eq!(composed.items(ListOpSlot::Explicit), &[9, 2, 3]);
    }

    #[test]
    fn compose_unrepresentable_cases_return_none() {
        let mut with_ordered = ListOp::default();
        with_ordered.set_items(ListOpSlot::Ordered, vec![2, 0]);
        assert!(with_ordered.compose(&ListOp::create(vec![], vec![1], vec![])).is_none());

        let mut with_added = ListOp::default();
        with_added.set_items(ListOpSlot::Added, vec![0]);
        assert!(with_added.compose(&ListOp::default()).is_none());

        let outer = ListOp::create(vec![1], vec![], vec![]);
        let mut inner_added = ListOp::default();
        inner_added.set_items(ListOpSlot::Added, vec![2]);
        assert!(outer.compose(&inner_added).is_none());
    }

    #[test]
    fn modify_drops_and_dedups() {
        let mut op = op_of(&[], &[1, 2, 3], &[], &[], &[]);
        let changed = op.modify(|item| match *item {
            1 => None,
            2 => Some(30),
            3 => Some(30),
            other => Some(other),
        });
        assert!(changed);
        assert_eq!(op.items(ListOpSlot::Prepended), &[30]);
        let unchanged = op.modify(|item| Some(*item));
        assert!(!unchanged);
    }

    #[test]
    fn replace_respects_mode_rules() {
        let mut op = ListOp::create_explicit(vec![1, 2, 3]);
        // Replacing in a non-explicit slot of an explicit op is ignored.
        assert!(!op.replace(ListOpSlot::Prepended, 0, 1, &[9]));
        // Pure insertion switches modes.
        assert!(op.replace(ListOpSlot::Prepended, 0, 0, &[9]));
        assert!(!op.is_explicit());
        assert_eq!(op.items(ListOpSlot::Prepended), &[9]);
        // Range checks.
        let collector = crate::error::DiagnosticCollector::new();
        assert!(!op.replace(ListOpSlot::Prepended, 2, 0, &[1]));
        assert_eq!(collector.take().len(), 1);
        assert!(op.replace(ListOpSlot::Prepended, 0, 1, &[7, 8]));
        assert_eq!(op.items(ListOpSlot::Prepended), &[7, 8]);
    }

    #[test]
    fn ordering_free_function() {
        let mut vec = vec![4, 3, 2, 1];
        apply_list_ordering(&mut vec, &[1, 2]);
        assert_eq!(vec, vec![4, 3, 1, 2]);
        apply_list_ordering(&mut vec, &[]);
        assert_eq!(vec, vec![4, 3, 1, 2]);
    }

    #[test]
    fn display_forms() {
        let mut op = ListOp::default();
        op.set_items(ListOpSlot::Deleted, vec![4]);
        op.set_items(ListOpSlot::Prepended, vec![1, 2]);
        assert_eq!(op.to_string(), "ListOp(Deleted Items: [4], Prepended Items: [1, 2])");
        let explicit: ListOp<i32> = ListOp::create_explicit(vec![]);
        assert_eq!(explicit.to_string(), "ListOp(Explicit Items: [])");
    }
}
