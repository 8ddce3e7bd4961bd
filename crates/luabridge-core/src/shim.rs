//! C-ABI helpers run inside protected calls.
//!
//! Operations that can invoke metamethods (and therefore raise) are never
//! performed directly from host frames. Instead the host pushes one of these
//! functions with its operands and runs it under `lua_pcall`, so a raised
//! error lands in the protected-call status instead of unwinding through
//! host code.

use std::ffi::CStr;
use std::os::raw::c_int;
use std::ptr;

use mlua_sys as ffi;

use crate::error::LuaResult;
use crate::state::LuaState;

/// `(table, key) -> table[key]`
pub(crate) unsafe extern "C-unwind" fn gettable(l: *mut ffi::lua_State) -> c_int {
    ffi::lua_gettable(l, 1);
    1
}

/// `(table, key, value) -> ()`
pub(crate) unsafe extern "C-unwind" fn settable(l: *mut ffi::lua_State) -> c_int {
    ffi::lua_settable(l, 1);
    0
}

/// `(a, b, op) -> a <op> b`
pub(crate) unsafe extern "C-unwind" fn compare(l: *mut ffi::lua_State) -> c_int {
    let op = ffi::lua_tointeger(l, 3) as c_int;
    let result = ffi::lua_compare(l, 1, 2, op);
    ffi::lua_pushboolean(l, result);
    1
}

/// `(value) -> tostring(value)`, honouring `__tostring` and `__name`
pub(crate) unsafe extern "C-unwind" fn tostring(l: *mut ffi::lua_State) -> c_int {
    ffi::luaL_tolstring(l, 1, ptr::null_mut());
    1
}

/// `(name, openf, global) -> ()`
pub(crate) unsafe extern "C-unwind" fn requiref(l: *mut ffi::lua_State) -> c_int {
    let name = ffi::lua_tolstring(l, 1, ptr::null_mut());
    let global = ffi::lua_toboolean(l, 3);
    if let Some(open) = ffi::lua_tocfunction(l, 2) {
        ffi::luaL_requiref(l, name, open, global);
    }
    0
}

/// Message handler that appends a traceback of the failing frames
pub(crate) unsafe extern "C-unwind" fn traceback(l: *mut ffi::lua_State) -> c_int {
    let message = if ffi::lua_type(l, 1) == ffi::LUA_TSTRING {
        ffi::lua_tolstring(l, 1, ptr::null_mut())
    } else {
        ffi::luaL_tolstring(l, 1, ptr::null_mut())
    };
    ffi::luaL_traceback(l, l, message, 1);
    1
}

/// Open one standard library group through `luaL_requiref` under a
/// protected call.
pub(crate) fn require_library(
    state: LuaState,
    module: &CStr,
    open: ffi::lua_CFunction,
) -> LuaResult<()> {
    unsafe {
        let l = state.as_ptr();
        ffi::lua_pushcfunction(l, requiref);
        ffi::lua_pushstring(l, module.as_ptr());
        ffi::lua_pushcfunction(l, open);
        ffi::lua_pushboolean(l, 1);
    }
    state.pcall(3, 0, false)
}
