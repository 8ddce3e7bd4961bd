//! Instance lifecycle: the owning [`Lua`] handle and the [`LuaState`] view

use std::ffi::CString;
use std::ops::Deref;
use std::os::raw::c_int;
use std::ptr::NonNull;

use mlua_sys as ffi;

use crate::error::{LuaError, LuaResult};
use crate::options::{GcMode, LuaOptions};
use crate::shim;

/// Non-owning view of a Lua state.
///
/// This is what host callbacks receive and what every stack operation is
/// defined on. It is `Copy` and has no destructor, so a VM error raised
/// while one is live never skips host cleanup.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LuaState {
    raw: NonNull<ffi::lua_State>,
}

impl LuaState {
    /// Wrap a raw state pointer.
    ///
    /// # Safety
    /// `raw` must be a valid, non-null Lua state that outlives every use of
    /// the returned view, and must only be used from the thread currently
    /// driving that state.
    pub unsafe fn from_raw(raw: *mut ffi::lua_State) -> Self {
        debug_assert!(!raw.is_null(), "null lua_State");
        Self {
            raw: NonNull::new_unchecked(raw),
        }
    }

    /// Raw state pointer, for calling the C API directly
    #[inline]
    pub fn as_ptr(self) -> *mut ffi::lua_State {
        self.raw.as_ptr()
    }

    /// View of the instance's main thread
    pub fn main_state(self) -> LuaState {
        let l = self.as_ptr();
        unsafe {
            ffi::lua_rawgeti(l, ffi::LUA_REGISTRYINDEX, ffi::LUA_RIDX_MAINTHREAD as ffi::lua_Integer);
            let main = ffi::lua_tothread(l, -1);
            ffi::lua_pop(l, 1);
            if main.is_null() {
                self
            } else {
                LuaState::from_raw(main)
            }
        }
    }

    // ========================================================================
    // Collector control
    // ========================================================================

    /// Stop the collector
    pub fn gc_stop(self) {
        unsafe {
            ffi::lua_gc(self.as_ptr(), ffi::LUA_GCSTOP, 0);
        }
    }

    /// Restart a stopped collector
    pub fn gc_restart(self) {
        unsafe {
            ffi::lua_gc(self.as_ptr(), ffi::LUA_GCRESTART, 0);
        }
    }

    /// Run a full collection cycle
    pub fn gc_collect(self) {
        unsafe {
            ffi::lua_gc(self.as_ptr(), ffi::LUA_GCCOLLECT, 0);
        }
    }

    /// Perform an incremental step; returns true if a cycle finished
    pub fn gc_step(self, kbytes: c_int) -> bool {
        unsafe { ffi::lua_gc(self.as_ptr(), ffi::LUA_GCSTEP, kbytes) != 0 }
    }

    /// Check whether the collector is running
    pub fn gc_is_running(self) -> bool {
        unsafe { ffi::lua_gc(self.as_ptr(), ffi::LUA_GCISRUNNING, 0) != 0 }
    }

    /// Bytes currently allocated by the VM
    pub fn gc_bytes(self) -> usize {
        unsafe {
            let kbytes = ffi::lua_gc(self.as_ptr(), ffi::LUA_GCCOUNT, 0) as usize;
            let remainder = ffi::lua_gc(self.as_ptr(), ffi::LUA_GCCOUNTB, 0) as usize;
            kbytes * 1024 + remainder
        }
    }

    /// Switch collector mode, returning the previous one (with default
    /// parameters, since the VM does not report them)
    pub fn set_gc_mode(self, mode: GcMode) -> GcMode {
        let previous = unsafe {
            match mode {
                GcMode::Incremental {
                    pause,
                    step_multiplier,
                    step_size,
                } => ffi::lua_gc(
                    self.as_ptr(),
                    ffi::LUA_GCINC,
                    pause as c_int,
                    step_multiplier as c_int,
                    step_size as c_int,
                ),
                GcMode::Generational {
                    minor_multiplier,
                    major_multiplier,
                } => ffi::lua_gc(
                    self.as_ptr(),
                    ffi::LUA_GCGEN,
                    minor_multiplier as c_int,
                    major_multiplier as c_int,
                ),
            }
        };
        if previous == ffi::LUA_GCGEN {
            GcMode::generational()
        } else {
            GcMode::incremental()
        }
    }

    // ========================================================================
    // Chunks
    // ========================================================================

    /// Compile `source` and push the resulting function.
    ///
    /// On failure nothing is pushed and the compiler's message is returned
    /// as [`LuaError::Syntax`].
    pub fn load_string(self, source: &str, chunk_name: &str) -> LuaResult<()> {
        let name = CString::new(chunk_name.replace('\0', "?"))
            .map_err(|e| LuaError::Callback(e.to_string()))?;
        let status = unsafe {
            ffi::luaL_loadbufferx(
                self.as_ptr(),
                source.as_ptr().cast(),
                source.len(),
                name.as_ptr(),
                std::ptr::null(),
            )
        };
        if status == ffi::LUA_OK {
            Ok(())
        } else {
            Err(self.pop_error(status))
        }
    }

    /// Compile and run `source`, discarding its results
    pub fn do_string(self, source: &str) -> LuaResult<()> {
        self.load_string(source, source)?;
        self.pcall(0, 0, false)
    }
}

impl std::fmt::Debug for LuaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LuaState({:p})", self.raw.as_ptr())
    }
}

/// An owned Lua instance.
///
/// Dropping the handle closes the state, which finalizes every cell the VM
/// still holds. Dereferences to [`LuaState`] for all stack operations.
pub struct Lua {
    state: LuaState,
}

// Instances share nothing, so one may move to another thread. A single
// instance is still driven from one thread at a time (no Sync).
unsafe impl Send for Lua {}

impl Lua {
    /// Create a new instance
    pub fn new(options: LuaOptions) -> LuaResult<Self> {
        let raw = unsafe { ffi::luaL_newstate() };
        if raw.is_null() {
            return Err(LuaError::Memory("cannot create Lua state".to_string()));
        }
        let lua = Lua {
            state: unsafe { LuaState::from_raw(raw) },
        };

        for lib in options.libraries.entries() {
            shim::require_library(lua.state, lib.module, lib.open)?;
        }
        lua.state.set_default_string_encoding(options.default_encoding);
        if let Some(mode) = options.gc_mode {
            lua.state.set_gc_mode(mode);
        }
        tracing::debug!(libraries = ?options.libraries, encoding = %options.default_encoding, "lua state created");
        Ok(lua)
    }

    /// View of this instance
    #[inline]
    pub fn state(&self) -> LuaState {
        self.state
    }

    /// Close the instance, finalizing every remaining cell
    pub fn close(self) {
        drop(self);
    }
}

impl Deref for Lua {
    type Target = LuaState;

    fn deref(&self) -> &LuaState {
        &self.state
    }
}

impl Drop for Lua {
    fn drop(&mut self) {
        unsafe { ffi::lua_close(self.state.as_ptr()) };
        tracing::trace!("lua state closed");
    }
}

impl std::fmt::Debug for Lua {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lua").field("state", &self.state).finish()
    }
}
