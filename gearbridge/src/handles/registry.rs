// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, trace};

use crate::handles::{Handle, HandleError, HandleObject, HandleType, Teardown};
use crate::host::Identity;

struct Entry {
    kind: HandleType,
    owner: Identity,
    object: Arc<dyn Any + Send + Sync>,
    teardown: Arc<dyn Teardown>,
}

struct Slot {
    generation: u16,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<usize>,
    live: usize,
}

/// Maps handles to native objects.
///
/// The registry owns one strong reference per live handle. Destroying a
/// handle drops that reference and runs the teardown of the object; threads
/// that cloned the `Arc` earlier keep a valid object.
#[derive(Default)]
pub struct HandleRegistry {
    inner: RwLock<Slots>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create<T>(&self, object: Arc<T>, owner: Identity) -> Result<Handle, HandleError>
    where
        T: HandleObject + Teardown,
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let slots = &mut *guard;
        let index = match slots.free.pop() {
            Some(index) => index,
            None => {
                if slots.slots.len() >= Handle::MAX_SLOTS {
                    return Err(HandleError::Exhausted);
                }
                slots.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                slots.slots.len() - 1
            }
        };

        let slot = &mut slots.slots[index];
        slot.generation = if slot.generation >= Handle::MAX_GENERATION {
            1
        } else {
            slot.generation + 1
        };
        let teardown: Arc<dyn Teardown> = object.clone();
        slot.entry = Some(Entry {
            kind: T::TYPE,
            owner,
            object,
            teardown,
        });
        slots.live += 1;

        let handle = Handle::new(index, slot.generation);
        trace!("created {} handle {:?}", T::TYPE, handle);
        Ok(handle)
    }

    /// Looks up a handle. `caller` is the identity of the plugin asking;
    /// `None` is the bridge itself and skips the owner check.
    pub fn read<T: HandleObject>(
        &self,
        handle: Handle,
        caller: Option<Identity>,
    ) -> Result<Arc<T>, HandleError> {
        let not_found = HandleError::NotFound {
            handle,
            expected: T::TYPE,
        };
        let slots = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let index = handle.index().ok_or(not_found.clone())?;
        let slot = slots.slots.get(index).ok_or(not_found.clone())?;
        if slot.generation != handle.generation() {
            return Err(not_found);
        }
        let entry = slot.entry.as_ref().ok_or(not_found.clone())?;
        if entry.kind != T::TYPE {
            return Err(not_found);
        }
        if let Some(caller) = caller {
            if caller != entry.owner {
                return Err(HandleError::AccessDenied(handle));
            }
        }
        entry.object.clone().downcast::<T>().map_err(|_| not_found)
    }

    /// Type of a live handle.
    pub fn kind(&self, handle: Handle) -> Option<HandleType> {
        let slots = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.slots.get(handle.index()?)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.entry.as_ref().map(|entry| entry.kind)
    }

    /// Removes a handle and runs the teardown of its object. Of several
    /// concurrent calls for the same handle, exactly one succeeds.
    pub fn destroy(&self, handle: Handle, caller: Option<Identity>) -> Result<(), HandleError> {
        let entry = {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let slots = &mut *guard;
            let index = handle.index().ok_or(HandleError::Unknown(handle))?;
            let slot = slots
                .slots
                .get_mut(index)
                .filter(|slot| slot.generation == handle.generation())
                .ok_or(HandleError::Unknown(handle))?;
            match (caller, slot.entry.as_ref()) {
                (_, None) => return Err(HandleError::Unknown(handle)),
                (Some(caller), Some(entry)) if caller != entry.owner => {
                    return Err(HandleError::AccessDenied(handle))
                }
                _ => {}
            }
            let entry = slot.entry.take();
            slots.free.push(index);
            slots.live -= 1;
            entry
        };

        // teardown runs outside the lock, it may call back into the registry
        if let Some(entry) = entry {
            debug!("destroying {} handle {:?}", entry.kind, handle);
            entry.teardown.on_handle_destroy();
        }
        Ok(())
    }

    /// Destroys every live handle.
    pub fn destroy_all(&self) -> usize {
        let entries: Vec<Entry> = {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let slots = &mut *guard;
            let mut entries = Vec::with_capacity(slots.live);
            for (index, slot) in slots.slots.iter_mut().enumerate() {
                if let Some(entry) = slot.entry.take() {
                    entries.push(entry);
                    slots.free.push(index);
                }
            }
            slots.live = 0;
            entries
        };
        for entry in &entries {
            entry.teardown.on_handle_destroy();
        }
        entries.len()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
