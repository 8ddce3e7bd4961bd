//! Error types for crossings between host code and the Lua VM

use std::os::raw::c_int;

use mlua_sys as ffi;

/// Result type for calls that cross into the VM
pub type LuaResult<T> = Result<T, LuaError>;

/// Failures reported by the bridge.
///
/// Conversion failures are not errors: `to_value`, `to_userdata` and friends
/// return `None` and leave the decision to the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LuaError {
    /// Lua code raised an error (`error(...)`, runtime fault, or a failure
    /// relayed from a host callback)
    #[error("{0}")]
    Runtime(String),

    /// A chunk failed to compile
    #[error("{0}")]
    Syntax(String),

    /// The VM ran out of memory
    #[error("{0}")]
    Memory(String),

    /// The message handler itself failed while handling an error
    #[error("{0}")]
    ErrorHandler(String),

    /// A callback argument could not be converted
    #[error("bad argument #{position} ({message})")]
    Argument {
        /// 1-based argument position
        position: c_int,
        /// What went wrong
        message: String,
    },

    /// A host callback panicked
    #[error("Callback panicked: {0}")]
    Panic(String),

    /// A host callback failed
    #[error("{0}")]
    Callback(String),
}

impl LuaError {
    /// Build the error matching a non-OK status returned by `lua_pcall` or
    /// `luaL_loadbufferx`.
    pub(crate) fn from_status(status: c_int, message: String) -> Self {
        match status {
            ffi::LUA_ERRSYNTAX => LuaError::Syntax(message),
            ffi::LUA_ERRMEM => LuaError::Memory(message),
            ffi::LUA_ERRERR => LuaError::ErrorHandler(message),
            _ => LuaError::Runtime(message),
        }
    }

    /// The descriptive text carried by this error
    pub fn message(&self) -> String {
        match self {
            LuaError::Runtime(m)
            | LuaError::Syntax(m)
            | LuaError::Memory(m)
            | LuaError::ErrorHandler(m)
            | LuaError::Callback(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

impl From<String> for LuaError {
    fn from(s: String) -> Self {
        LuaError::Callback(s)
    }
}

impl From<&str> for LuaError {
    fn from(s: &str) -> Self {
        LuaError::Callback(s.to_string())
    }
}
