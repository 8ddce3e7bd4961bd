//! Luabridge - value bridging and object binding for an embedded Lua VM
//!
//! This crate sits on the raw Lua 5.4 C API and provides:
//!
//! - typed stack reads and pushes, with explicit string encodings
//! - lazy `ipairs`/`pairs` iteration over tables
//! - generic conversion between stack slots and [`LuaValue`], plus typed
//!   reads through [`FromLua`]
//! - opaque binding of host values as userdata, released by the collector
//! - per-instance metatable registration keyed by host type identity
//! - protected calls, and host callbacks whose failures become Lua errors
//!
//! # Example
//!
//! ```ignore
//! use luabridge::{Lua, LuaOptions, LuaValue};
//!
//! let lua = Lua::new(LuaOptions::default())?;
//! lua.register_function("double", |state| {
//!     let n: i64 = state.check_argument(1)?;
//!     state.push_integer(n * 2);
//!     Ok(1)
//! });
//! lua.load_string("return double(21)", "=example")?;
//! let answer = lua.pcall_returning::<i64>(&[], false)?;
//! assert_eq!(answer, Some(42));
//! ```
//!
//! # Stack discipline
//!
//! [`Lua`] owns an instance and closes it on drop; [`LuaState`] is the
//! `Copy` view every operation is defined on, and what callbacks receive.
//! Operations that may run Lua code (metamethods included) do so inside a
//! protected call, so a Lua error never unwinds through host frames.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod call;
mod callback;
mod convert;
mod encoding;
mod error;
mod iter;
mod metatable;
mod options;
mod registry_ref;
mod shim;
mod side_state;
mod stack;
mod state;
mod userdata;
mod value;

pub use callback::{convert_error_to_lua, Callback, CallbackFn};
pub use convert::{FromLua, MAX_CONVERSION_DEPTH};
pub use encoding::StringEncoding;
pub use error::{LuaError, LuaResult};
pub use iter::{IPairs, Pairs};
pub use metatable::{
    MetaFunction, MetaMethod, TypeKey, DEFAULT_METATABLE_NAME, TYPE_METATABLE_PREFIX,
};
pub use options::{GcMode, Libraries, LuaOptions};
pub use registry_ref::RegistryRef;
pub use stack::{CompareOp, LuaType, Pushable, StackRef};
pub use state::{Lua, LuaState};
pub use userdata::Opaque;
pub use value::{LuaKey, LuaValue, OpaqueKey, ThreadRef};

/// Raw Lua C API, for callers that need operations not wrapped here
pub use mlua_sys as ffi;
