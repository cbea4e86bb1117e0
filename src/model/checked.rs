//! Tri-state checked engine: composite computation, downward cascade,
//! upward write-if-differs propagation and startup validation.

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::model::tree::TreeModel;
use crate::model::{TreeEvent, FOREST_ROOT_ID};
use crate::object::{CheckedState, Id};

/// Combine child states into the parent's. Any mixed child, or checked and
/// unchecked siblings together, yield mixed. Children without a checkbox
/// do not participate; if none participate there is no composite.
pub fn composite_state(
    states: impl IntoIterator<Item = Option<CheckedState>>,
) -> Option<CheckedState> {
    let mut seen_checked = false;
    let mut seen_unchecked = false;
    for state in states.into_iter().flatten() {
        match state {
            CheckedState::Mixed => return Some(CheckedState::Mixed),
            CheckedState::Checked => seen_checked = true,
            CheckedState::Unchecked => seen_unchecked = true,
        }
        if seen_checked && seen_unchecked {
            return Some(CheckedState::Mixed);
        }
    }
    match (seen_checked, seen_unchecked) {
        (true, false) => Some(CheckedState::Checked),
        (false, true) => Some(CheckedState::Unchecked),
        (true, true) => Some(CheckedState::Mixed),
        (false, false) => None,
    }
}

impl TreeModel {
    /// Checked state of an object. With `checked_all` a missing state is
    /// materialized with the configured default on first read. The root's
    /// checkbox is hidden unless `checked_root` is set.
    pub fn get_checked(&mut self, id: &str) -> Option<CheckedState> {
        if !self.cfg.checked_root && self.root_id.as_deref() == Some(id) {
            return None;
        }
        let object = self.get(id)?;
        if let Some(state) = object.checked(&self.cfg.checked_attr) {
            return Some(state);
        }
        if self.cfg.checked_all {
            let default = self.cfg.checked_state;
            self.set_checked_internal(id, default);
            return self.get(id).and_then(|o| o.checked(&self.cfg.checked_attr));
        }
        None
    }

    /// Set an object's checked state. In strict mode the state cascades to
    /// every descendant and propagates back up through the ancestors.
    pub fn set_checked(&mut self, id: &str, state: CheckedState) -> Result<()> {
        if self.get(id).is_none() {
            return Err(StoreError::NotFound(id.to_owned()));
        }
        if self.cfg.checked_strict {
            self.cascade_checked(id, state);
        } else {
            self.set_checked_internal(id, state);
        }
        self.pump();
        Ok(())
    }

    /// Parent first, then the children: by the time a child's change event
    /// propagates upward the parent already holds the final state, so the
    /// upward pass converges immediately.
    fn cascade_checked(&mut self, id: &str, state: CheckedState) {
        self.set_checked_internal(id, state);
        for child in self.children(id) {
            self.cascade_checked(&child, state);
        }
    }

    /// Write a state if the object carries (or should carry) a checkbox.
    /// Normalization may substitute the requested state; a substituted
    /// write is forced through even when the stored value already matches,
    /// so observers refresh.
    pub(crate) fn set_checked_internal(&mut self, id: &str, state: CheckedState) -> bool {
        let normalized = self.normalize_state(id, state);
        let force = normalized != state;
        let current = self.get(id).and_then(|o| o.checked(&self.cfg.checked_attr));
        if current.is_none() && !self.cfg.checked_all {
            return false;
        }
        if current != Some(normalized) {
            let attr = self.cfg.checked_attr.clone();
            if self.set_value_raw(id, &attr, normalized.to_value()).is_err() {
                return false;
            }
            true
        } else if force {
            self.notify(&TreeEvent::Change {
                id: id.to_owned(),
                property: self.cfg.checked_attr.clone(),
            });
            false
        } else {
            false
        }
    }

    /// Mixed is only meaningful on objects that can have children, and only
    /// when the model allows a third state at all.
    fn normalize_state(&mut self, id: &str, state: CheckedState) -> CheckedState {
        if state != CheckedState::Mixed {
            return state;
        }
        if !self.cfg.multi_state {
            return CheckedState::Checked;
        }
        if self.cfg.normalize && !self.may_have_children(id) {
            return CheckedState::Checked;
        }
        CheckedState::Mixed
    }

    /// Recompute the ancestors' composite state after a child changed.
    /// Converged parents stop the climb; `force` pushes through one level
    /// regardless (used when a child list itself changed).
    pub(crate) fn update_checked_parent(&mut self, child_id: &str, force: bool) {
        if !self.cfg.checked_strict {
            return;
        }
        let child_state = self.get_checked(child_id);
        let parents = self.parents_of(child_id);
        for parent in parents {
            let parent_state = self.get_checked(&parent);
            if !force && child_state == parent_state {
                continue;
            }
            let children = self.children(&parent);
            let mut states = Vec::with_capacity(children.len());
            for child in &children {
                states.push(self.get_checked(child));
            }
            if let Some(composite) = composite_state(states) {
                self.set_checked_internal(&parent, composite);
            }
        }
    }

    /// Parents participating in checked propagation; top-level objects in
    /// forest mode roll up into the synthetic root.
    fn parents_of(&mut self, id: &str) -> Vec<Id> {
        if self.is_forest_root(id) {
            return Vec::new();
        }
        let object = match self.get(id) {
            Some(object) => object,
            None => return Vec::new(),
        };
        let parents = object.parent_ids(self.store.parent_property());
        if parents.is_empty() && self.cfg.forest && self.cfg.query.matches(&object) {
            return vec![FOREST_ROOT_ID.to_owned()];
        }
        parents
    }

    /// Walk the whole tree once, repairing parent states that disagree with
    /// their children and collapsing stray mixed leaves. Signals
    /// completion exactly once, even across the recursive descent.
    pub fn validate(&mut self) {
        if !self.cfg.checked_strict {
            return;
        }
        if self.validated {
            self.notify(&TreeEvent::DataValidated);
            return;
        }
        let root = match self.root_id.clone() {
            Some(root) => root,
            None => return,
        };
        debug!(root = %root, "validating checked states");
        self.validate_children(&root);
        self.pump();
    }

    fn validate_children(&mut self, parent: &str) {
        self.validating += 1;
        let children = self.children(parent);
        let mut states = Vec::with_capacity(children.len());
        for child in &children {
            if self.may_have_children(child) {
                self.validate_children(child);
            } else if self.cfg.normalize {
                let raw = self.get(child).and_then(|o| o.checked(&self.cfg.checked_attr));
                if raw == Some(CheckedState::Mixed) {
                    self.set_checked_internal(child, CheckedState::Checked);
                }
            }
            states.push(self.get_checked(child));
        }
        if let (Some(current), Some(expected)) =
            (self.get_checked(parent), composite_state(states))
        {
            if current != expected {
                self.set_checked_internal(parent, expected);
            }
        }
        self.validating -= 1;
        if self.validating == 0 {
            self.validated = true;
            self.notify(&TreeEvent::DataValidated);
        }
    }
}
