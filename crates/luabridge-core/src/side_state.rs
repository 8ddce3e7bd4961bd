//! Per-instance side state
//!
//! Each Lua instance carries one `SideState`, stored as a userdata in that
//! instance's registry under a private light-userdata key. It is created on
//! first access and finalized by `lua_close` like any other cell, so two
//! instances never see each other's settings or metatable names.

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::os::raw::c_int;
use std::mem;
use std::ptr;
use std::rc::Rc;

use mlua_sys as ffi;

use crate::encoding::StringEncoding;
use crate::metatable::MetatableRegistry;
use crate::state::LuaState;

static SIDE_STATE_KEY: u8 = 0;

/// Auxiliary state attached to one Lua instance
pub(crate) struct SideState {
    pub(crate) default_encoding: Cell<StringEncoding>,
    pub(crate) metatables: RefCell<MetatableRegistry>,
    /// Shared with every registry reference; false once the instance closes
    pub(crate) alive: Rc<Cell<bool>>,
}

impl SideState {
    fn new() -> Self {
        Self {
            default_encoding: Cell::new(StringEncoding::default()),
            metatables: RefCell::new(MetatableRegistry::new()),
            alive: Rc::new(Cell::new(true)),
        }
    }
}

impl Drop for SideState {
    fn drop(&mut self) {
        self.alive.set(false);
    }
}

fn side_state_key() -> *const c_void {
    ptr::addr_of!(SIDE_STATE_KEY).cast()
}

unsafe extern "C-unwind" fn drop_side_state(l: *mut ffi::lua_State) -> c_int {
    // Only the registered instance is finalized; anything else carrying
    // this metatable is ignored
    let cell = ffi::lua_touserdata(l, 1).cast::<SideState>();
    if cell.is_null() || ffi::lua_rawlen(l, 1) as usize != mem::size_of::<SideState>() {
        return 0;
    }
    ffi::lua_rawgetp(l, ffi::LUA_REGISTRYINDEX, side_state_key());
    let registered = ffi::lua_touserdata(l, -1).cast::<SideState>() == cell;
    ffi::lua_pop(l, 1);
    if registered {
        ptr::drop_in_place(cell);
        ffi::lua_pushnil(l);
        ffi::lua_rawsetp(l, ffi::LUA_REGISTRYINDEX, side_state_key());
    }
    0
}

impl LuaState {
    /// Side state of this instance, created on first use.
    ///
    /// The reference is valid until the instance is closed. Callers must
    /// keep `RefCell` borrows short and never hold one across a call into
    /// Lua.
    pub(crate) fn side_state<'a>(self) -> &'a SideState {
        let l = self.as_ptr();
        unsafe {
            if ffi::lua_rawgetp(l, ffi::LUA_REGISTRYINDEX, side_state_key()) == ffi::LUA_TUSERDATA {
                let existing = ffi::lua_touserdata(l, -1).cast::<SideState>();
                ffi::lua_pop(l, 1);
                return &*existing;
            }
            ffi::lua_pop(l, 1);

            let cell = ffi::lua_newuserdatauv(l, mem::size_of::<SideState>(), 0).cast::<SideState>();
            ptr::write(cell, SideState::new());
            if ffi::luaL_newmetatable(l, c"luabridge.state".as_ptr()) != 0 {
                ffi::lua_pushcfunction(l, drop_side_state);
                ffi::lua_setfield(l, -2, c"__gc".as_ptr());
            }
            ffi::lua_setmetatable(l, -2);
            ffi::lua_rawsetp(l, ffi::LUA_REGISTRYINDEX, side_state_key());
            tracing::trace!("side state created");
            &*cell
        }
    }

    /// Encoding used by reads and pushes that do not name one
    pub fn default_string_encoding(self) -> StringEncoding {
        self.side_state().default_encoding.get()
    }

    /// Change the default encoding for this instance
    pub fn set_default_string_encoding(self, encoding: StringEncoding) {
        self.side_state().default_encoding.set(encoding);
    }
}
