//! Protected calls
//!
//! Every call into Lua code goes through `lua_pcall`. A failure status is
//! turned into a [`LuaError`] with the error value rendered as text, and the
//! stack is left balanced on both paths.

use std::os::raw::c_int;

use mlua_sys as ffi;

use crate::convert::FromLua;
use crate::error::{LuaError, LuaResult};
use crate::shim;
use crate::stack::LuaType;
use crate::state::LuaState;
use crate::value::LuaValue;

impl LuaState {
    /// Call the function below `nargs` arguments at the top of the stack.
    ///
    /// On success the function and arguments are replaced by `nresults`
    /// results (all of them with `LUA_MULTRET`). On failure they are
    /// removed and nothing is pushed. With `traceback`, the error message
    /// carries the VM's stack traceback.
    pub fn pcall(self, nargs: c_int, nresults: c_int, traceback: bool) -> LuaResult<()> {
        let l = self.as_ptr();
        let function = self.top() - nargs;
        let handler = if traceback {
            unsafe { ffi::lua_pushcfunction(l, shim::traceback) };
            self.insert(function);
            function
        } else {
            0
        };

        let status = unsafe { ffi::lua_pcall(l, nargs, nresults, handler) };

        if traceback {
            self.remove(handler);
        }
        if status == ffi::LUA_OK {
            Ok(())
        } else {
            Err(self.pop_error(status))
        }
    }

    /// Pop the error value left by a failed call or load and build the
    /// matching error
    pub(crate) fn pop_error(self, status: c_int) -> LuaError {
        let message = self.error_message(-1);
        self.pop(1);
        tracing::trace!(status, message = %message, "lua call failed");
        LuaError::from_status(status, message)
    }

    fn error_message(self, index: c_int) -> String {
        if let Some(text) = self.with_bytes(index, |bytes| String::from_utf8_lossy(bytes).into_owned()) {
            return text;
        }
        let index = self.abs_index(index);
        let l = self.as_ptr();
        let has_tostring = unsafe {
            if ffi::luaL_getmetafield(l, index, c"__tostring".as_ptr()) != ffi::LUA_TNIL {
                ffi::lua_pop(l, 1);
                true
            } else {
                false
            }
        };
        if has_tostring || self.type_of(index) == LuaType::Number {
            // Not routed through `to_string_meta`: a failing `__tostring`
            // must not recurse into another error conversion
            unsafe {
                ffi::lua_pushcfunction(l, shim::tostring);
                ffi::lua_pushvalue(l, index);
                let status = ffi::lua_pcall(l, 1, 1, 0);
                let text = if status == ffi::LUA_OK {
                    self.with_bytes(-1, |bytes| String::from_utf8_lossy(bytes).into_owned())
                } else {
                    None
                };
                ffi::lua_pop(l, 1);
                if let Some(text) = text {
                    return text;
                }
            }
        }
        format!("(error object is a {} value)", self.type_name(index))
    }

    /// Call the function at the top of the stack with `args`, discarding
    /// any results
    pub fn pcall_with(self, args: &[LuaValue], traceback: bool) -> LuaResult<()> {
        let nargs = self.push_arguments(args)?;
        self.pcall(nargs, 0, traceback)
    }

    /// Call the function at the top of the stack with `args` and read its
    /// first result as a `T` (absent when it does not convert)
    pub fn pcall_returning<T: FromLua>(
        self,
        args: &[LuaValue],
        traceback: bool,
    ) -> LuaResult<Option<T>> {
        let nargs = self.push_arguments(args)?;
        self.pcall(nargs, 1, traceback)?;
        let result = self.to_value::<T>(-1);
        self.pop(1);
        Ok(result)
    }

    fn push_arguments(self, args: &[LuaValue]) -> LuaResult<c_int> {
        let nargs = c_int::try_from(args.len()).unwrap_or(c_int::MAX);
        if nargs == c_int::MAX || !self.check_stack(nargs + 1) {
            self.pop(1);
            return Err(LuaError::Memory("stack overflow pushing call arguments".to_string()));
        }
        for arg in args {
            self.push_value(arg);
        }
        Ok(nargs)
    }
}
