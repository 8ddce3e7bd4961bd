//! Values pinned in the Lua registry
//!
//! A [`RegistryRef`] keeps one VM object alive through a `luaL_ref` slot for
//! as long as any clone of it exists on the host side. Conversion uses it
//! for values that have no host form and no live stack slot: functions and
//! foreign userdata nested in a converted table, table keys compared by
//! identity, and tables reached again through a cycle.

use std::cell::Cell;
use std::fmt;
use std::os::raw::c_int;
use std::rc::Rc;

use mlua_sys as ffi;

use crate::convert::FromLua;
use crate::stack::{LuaType, Pushable};
use crate::state::LuaState;

/// Shared handle to a value held in the registry
#[derive(Clone)]
pub struct RegistryRef(Rc<Slot>);

struct Slot {
    main: LuaState,
    id: c_int,
    kind: LuaType,
    address: usize,
    // Cleared when the instance closes; the slot is then gone with it
    alive: Rc<Cell<bool>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if !self.alive.get() {
            return;
        }
        let l = self.main.as_ptr();
        unsafe {
            if ffi::lua_checkstack(l, 2) != 0 {
                ffi::luaL_unref(l, ffi::LUA_REGISTRYINDEX, self.id);
            }
        }
    }
}

impl RegistryRef {
    /// Type of the pinned value
    pub fn type_of(&self) -> LuaType {
        self.0.kind
    }

    /// Address of the pinned object inside the VM
    pub fn address(&self) -> usize {
        self.0.address
    }

    /// True if both pin the same object of the same instance
    pub fn same_object(&self, other: &RegistryRef) -> bool {
        self.0.main == other.0.main && self.0.address == other.0.address
    }
}

impl PartialEq for RegistryRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other)
    }
}

impl fmt::Debug for RegistryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegistryRef({}: {:#x})", self.0.kind, self.0.address)
    }
}

impl LuaState {
    /// Pin the value at `index` in the registry.
    ///
    /// nil cannot be pinned; the result then pushes nil.
    pub fn anchor(self, index: c_int) -> RegistryRef {
        let index = self.abs_index(index);
        let kind = self.type_of(index);
        let address = self.topointer(index);
        let alive = Rc::clone(&self.side_state().alive);
        self.push_copy(index);
        let id = unsafe { ffi::luaL_ref(self.as_ptr(), ffi::LUA_REGISTRYINDEX) };
        RegistryRef(Rc::new(Slot {
            main: self.main_state(),
            id,
            kind,
            address,
            alive,
        }))
    }

    /// Push the value pinned by `anchor`.
    ///
    /// Pushes nil when the anchor belongs to another instance.
    pub fn push_registry_ref(self, anchor: &RegistryRef) {
        if anchor.0.main != self.main_state() || !anchor.0.alive.get() {
            tracing::warn!(r#type = %anchor.0.kind, "registry reference from another instance, pushing nil");
            self.push_nil();
            return;
        }
        unsafe {
            ffi::lua_rawgeti(self.as_ptr(), ffi::LUA_REGISTRYINDEX, anchor.0.id as ffi::lua_Integer);
        }
    }
}

impl Pushable for RegistryRef {
    fn push(&self, state: LuaState) {
        state.push_registry_ref(self);
    }
}

/// Any value except nil pins
impl FromLua for RegistryRef {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        (!state.is_none_or_nil(index)).then(|| state.anchor(index))
    }
}
