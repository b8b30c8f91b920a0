//! Runs a hook right away when everything it requires has been seen, and
//! otherwise parks a buffered copy of its input until the last requirement
//! shows up.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

use crate::Error;

/// A callback gated on a set of keys.
///
/// `Normal` is what the hook receives when it can run immediately, `Buffered`
/// what it receives when it ran late from a parked copy.
pub(crate) trait Hook<K> {
    type Normal<'a>;
    type Buffered;

    fn requirements(&self) -> &[K];

    fn normal_path(&mut self, value: Self::Normal<'_>) -> Result<(), Error>;

    fn abnormal_path(&mut self, value: Self::Buffered) -> Result<(), Error>;
}

struct Slot<K, H: Hook<K>> {
    hook: H,
    /// Requirements not seen yet. Empty means satisfied, for good.
    missing: HashSet<K>,
    pending: VecDeque<H::Buffered>,
}

pub(crate) struct ConditionJudger<K, H: Hook<K>> {
    hooks: HashMap<K, Slot<K, H>>,
    /// Required key -> hooks still waiting for it, in registration order.
    dependents: HashMap<K, Vec<K>>,
}

impl<K, H> ConditionJudger<K, H>
where
    K: Eq + Hash + Clone + fmt::Display,
    H: Hook<K>,
{
    pub(crate) fn new<I>(hooks: I) -> Self
    where
        I: IntoIterator<Item = (K, H)>,
    {
        let mut slots = HashMap::new();
        let mut dependents: HashMap<K, Vec<K>> = HashMap::new();

        for (key, hook) in hooks {
            let missing: HashSet<K> = hook.requirements().iter().cloned().collect();
            for required in &missing {
                dependents
                    .entry(required.clone())
                    .or_default()
                    .push(key.clone());
            }

            slots.insert(
                key,
                Slot {
                    hook,
                    missing,
                    pending: VecDeque::new(),
                },
            );
        }

        ConditionJudger {
            hooks: slots,
            dependents,
        }
    }

    pub(crate) fn is_registered<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.hooks.contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn is_satisfied<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.hooks.get(key).map_or(false, |s| s.missing.is_empty())
    }

    /// A value for `key` arrived. Returns `true` if the hook ran on it
    /// directly, `false` if `preprocess` turned it into a parked call.
    pub(crate) fn hook_event<'a, Q, F>(
        &mut self,
        key: &Q,
        value: H::Normal<'a>,
        preprocess: F,
    ) -> Result<bool, Error>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Display + ?Sized,
        F: FnOnce(H::Normal<'a>) -> Result<H::Buffered, Error>,
    {
        let slot = self
            .hooks
            .get_mut(key)
            .ok_or_else(|| Error::NoHooksForKey(key.to_string()))?;

        if slot.missing.is_empty() {
            slot.hook.normal_path(value)?;
            return Ok(true);
        }

        let buffered = preprocess(value)?;
        slot.pending.push_back(buffered);
        log::debug!(
            "Deferred hook {} ({} calls pending, {} requirements missing)",
            key,
            slot.pending.len(),
            slot.missing.len()
        );

        Ok(false)
    }

    /// `key` was seen. Every hook whose last missing requirement this was gets
    /// satisfied and runs its parked calls in arrival order. A failing call
    /// does not stop the remaining ones; all errors are returned together.
    pub(crate) fn key_event<Q>(&mut self, key: &Q) -> Result<(), Error>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let waiting = match self.dependents.remove(key) {
            Some(waiting) => waiting,
            None => return Ok(()),
        };

        let mut errs = Vec::new();
        for name in waiting {
            let slot = match self.hooks.get_mut::<K>(&name) {
                Some(slot) => slot,
                None => continue,
            };

            if !slot.missing.remove(key) || !slot.missing.is_empty() {
                continue;
            }

            log::debug!(
                "Hook {} satisfied, running {} deferred calls",
                name,
                slot.pending.len()
            );

            while let Some(value) = slot.pending.pop_front() {
                if let Err(e) = slot.hook.abnormal_path(value) {
                    errs.push(e);
                }
            }
        }

        match Error::from_many(errs) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
