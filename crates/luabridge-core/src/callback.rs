//! Host functions callable from Lua
//!
//! A [`Callback`] is pushed as a C closure over the shared trampoline, with
//! the callback itself stored in a bridge cell as upvalue 1. Failures cross
//! back into the VM as data: the closure returns a [`LuaResult`], panics are
//! caught, and only the trampoline's outermost frame raises the Lua error.

use std::any::Any;
use std::fmt;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use mlua_sys as ffi;

use crate::convert::FromLua;
use crate::error::{LuaError, LuaResult};
use crate::state::LuaState;

/// Signature of host callbacks: read arguments from the stack, push
/// results, return how many were pushed
pub type CallbackFn = dyn Fn(LuaState) -> LuaResult<c_int>;

/// A shared host callback
#[derive(Clone)]
pub struct Callback(Rc<CallbackFn>);

impl Callback {
    /// Wrap a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(LuaState) -> LuaResult<c_int> + 'static,
    {
        Callback(Rc::new(f))
    }

    /// Invoke directly, outside the VM's call machinery
    pub fn call(&self, state: LuaState) -> LuaResult<c_int> {
        (self.0)(state)
    }

    /// True if both wrap the same closure
    pub fn ptr_eq(&self, other: &Callback) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Rc::as_ptr(&self.0).cast::<()>())
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

pub(crate) unsafe extern "C-unwind" fn trampoline(l: *mut ffi::lua_State) -> c_int {
    let state = LuaState::from_raw(l);
    convert_error_to_lua(state, |state| {
        let callback = state
            .to_userdata::<Callback>(ffi::lua_upvalueindex(1))
            .ok_or_else(|| LuaError::Callback("callback cell was reclaimed".to_string()))?;
        callback.call(state)
    })
}

/// Run host logic on behalf of a C function and translate its failure into
/// a Lua error.
///
/// On success returns the result count for the C function to return. On
/// failure (an `Err` or a panic) the message is pushed and `lua_error` is
/// raised from this frame, which by then holds no values with destructors.
pub fn convert_error_to_lua<F>(state: LuaState, f: F) -> c_int
where
    F: FnOnce(LuaState) -> LuaResult<c_int>,
{
    match run_and_push_error(state, f) {
        Some(results) => results,
        None => unsafe { ffi::lua_error(state.as_ptr()) },
    }
}

// Every host value created while running `f` is dropped before this returns.
#[inline(never)]
fn run_and_push_error<F>(state: LuaState, f: F) -> Option<c_int>
where
    F: FnOnce(LuaState) -> LuaResult<c_int>,
{
    let message = match panic::catch_unwind(AssertUnwindSafe(|| f(state))) {
        Ok(Ok(results)) => return Some(results),
        Ok(Err(error)) => error.message(),
        Err(payload) => LuaError::Panic(panic_message(payload.as_ref())).to_string(),
    };
    // Only the message stays on the frame that raises
    state.set_top(0);
    state.push_bytes(message.as_bytes());
    None
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl LuaState {
    /// Push `callback` as a Lua function
    pub fn push_callback(self, callback: Callback) {
        self.push_userdata(callback);
        unsafe {
            ffi::lua_pushcclosure(self.as_ptr(), trampoline, 1);
        }
    }

    /// Push a closure as a Lua function
    pub fn push_function<F>(self, f: F)
    where
        F: Fn(LuaState) -> LuaResult<c_int> + 'static,
    {
        self.push_callback(Callback::new(f));
    }

    /// Expose a closure as the global function `name`
    pub fn register_function<F>(self, name: &str, f: F)
    where
        F: Fn(LuaState) -> LuaResult<c_int> + 'static,
    {
        self.push_function(f);
        self.set_global(name);
    }

    /// Callback held by the function at `index`, if it is a bridge
    /// trampoline
    pub(crate) fn to_callback(self, index: c_int) -> Option<Callback> {
        let l = self.as_ptr();
        let index = self.abs_index(index);
        unsafe {
            let function = ffi::lua_tocfunction(l, index)?;
            if function as *const () != trampoline as *const () {
                return None;
            }
            if ffi::lua_getupvalue(l, index, 1).is_null() {
                return None;
            }
        }
        let callback = self.to_userdata::<Callback>(-1);
        self.pop(1);
        callback.map(|callback| (*callback).clone())
    }

    /// Number of arguments passed to the running callback
    pub fn argument_count(self) -> c_int {
        self.top()
    }

    /// Read callback argument `position` (1-based) as a `T`
    pub fn check_argument<T: FromLua>(self, position: c_int) -> LuaResult<T> {
        T::from_lua(self, position).ok_or_else(|| LuaError::Argument {
            position,
            message: format!(
                "{} expected, got {}",
                T::expected_type(),
                self.type_name(position)
            ),
        })
    }
}
