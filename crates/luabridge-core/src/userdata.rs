//! Opaque object binding
//!
//! A host value handed to Lua lives in a full userdata ("cell") whose
//! payload is an [`Opaque`]: a shared `Rc<dyn Any>` plus the name of the
//! concrete type. The cell owns one strong count; the `__gc` hook installed
//! in every bridge metatable releases it.

use std::any::Any;
use std::fmt;
use std::mem;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;

use mlua_sys as ffi;

use crate::metatable::TypeKey;
use crate::state::LuaState;

/// A host value held by a cell
#[derive(Clone)]
pub struct Opaque {
    value: Rc<dyn Any>,
    type_name: &'static str,
}

impl Opaque {
    /// Wrap `value` in a fresh `Rc`
    pub fn new<T: Any>(value: T) -> Self {
        Self::from_rc(Rc::new(value))
    }

    /// Share an existing `Rc`
    pub fn from_rc<T: Any>(value: Rc<T>) -> Self {
        Self {
            value,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Name of the held value's type
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type identity used to pick the cell's metatable
    pub fn type_key(&self) -> TypeKey {
        TypeKey::from_parts(Any::type_id(&*self.value), self.type_name)
    }

    /// True if the held value is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Shared handle to the held value, if it is a `T`
    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.value).downcast::<T>().ok()
    }

    /// Borrow the held value, if it is a `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// True if both hold the same allocation
    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }

    /// Strong count of the held value, cells included
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.value)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque<{}>({:p})", self.type_name, Rc::as_ptr(&self.value))
    }
}

// First word of every cell payload
const CELL_TAG: u64 = 0x6c62_6365_6c6c_2e31;

// The value is an Option so a manual `__gc` call from a script cannot
// release it twice.
#[repr(C)]
struct Payload {
    tag: u64,
    opaque: Option<Opaque>,
}

/// `__gc` for bridge cells
pub(crate) unsafe extern "C-unwind" fn reclaim_cell(l: *mut ffi::lua_State) -> c_int {
    let state = LuaState::from_raw(l);
    let Some(cell) = state.payload(1) else {
        return 0;
    };
    if let Some(opaque) = (*cell).opaque.take() {
        let type_name = opaque.type_name();
        // A panicking destructor must not unwind into the collector
        if panic::catch_unwind(AssertUnwindSafe(move || drop(opaque))).is_err() {
            tracing::error!(r#type = type_name, "destructor panicked while reclaiming cell");
        }
    }
    0
}

impl LuaState {
    /// Push a cell holding `value` (bound by value)
    pub fn push_userdata<T: Any>(self, value: T) {
        self.push_opaque(Opaque::new(value));
    }

    /// Push a cell sharing `value` (bound by reference; the cell holds one
    /// extra strong count until it is collected)
    pub fn push_userdata_shared<T: Any>(self, value: Rc<T>) {
        self.push_opaque(Opaque::from_rc(value));
    }

    /// Push a new cell holding `opaque`, with the metatable for its type
    pub fn push_opaque(self, opaque: Opaque) {
        let key = opaque.type_key();
        let l = self.as_ptr();
        unsafe {
            let cell = ffi::lua_newuserdatauv(l, mem::size_of::<Payload>(), 0).cast::<Payload>();
            ptr::write(
                cell,
                Payload {
                    tag: CELL_TAG,
                    opaque: Some(opaque),
                },
            );
        }
        self.push_metatable_for(key);
        unsafe {
            ffi::lua_setmetatable(l, -2);
        }
    }

    /// Host value held by the bridge cell at `index`
    pub fn to_opaque(self, index: c_int) -> Option<Opaque> {
        let cell = self.payload(index)?;
        unsafe { (*cell).opaque.clone() }
    }

    // Payload of the bridge cell at `index`. A foreign userdata carrying a
    // bridge metatable fails the size or tag check.
    fn payload(self, index: c_int) -> Option<*mut Payload> {
        if !self.is_bridge_cell(index) || self.raw_len(index) != mem::size_of::<Payload>() {
            return None;
        }
        unsafe {
            let cell = ffi::lua_touserdata(self.as_ptr(), index).cast::<Payload>();
            if cell.is_null() || ptr::addr_of!((*cell).tag).read() != CELL_TAG {
                return None;
            }
            Some(cell)
        }
    }

    /// Shared handle to the `T` held by the cell at `index`.
    ///
    /// Absent when the slot is not a bridge cell, when the cell was already
    /// reclaimed, or when it holds another type.
    pub fn to_userdata<T: Any>(self, index: c_int) -> Option<Rc<T>> {
        self.to_opaque(index)?.downcast::<T>()
    }
}
