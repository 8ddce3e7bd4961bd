//! Stack accessor primitives
//!
//! Typed reads and pushes for scalars, strings and raw bytes, plus the raw
//! table helpers everything else is built on. Reads never modify the value
//! in the slot (numbers are never converted to strings in place) and every
//! read leaves the stack height unchanged.

use std::ffi::CString;
use std::fmt;
use std::os::raw::c_int;

use mlua_sys as ffi;

use crate::encoding::StringEncoding;
use crate::error::LuaResult;
use crate::shim;
use crate::state::LuaState;

/// Type tag of a stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaType {
    /// Index past the top of the stack
    None,
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// Raw pointer value
    LightUserdata,
    /// Integer or float
    Number,
    /// Byte string
    String,
    /// Table
    Table,
    /// Lua or C function
    Function,
    /// Full userdata
    Userdata,
    /// Coroutine
    Thread,
}

impl LuaType {
    pub(crate) fn from_raw(tag: c_int) -> Self {
        match tag {
            ffi::LUA_TNIL => LuaType::Nil,
            ffi::LUA_TBOOLEAN => LuaType::Boolean,
            ffi::LUA_TLIGHTUSERDATA => LuaType::LightUserdata,
            ffi::LUA_TNUMBER => LuaType::Number,
            ffi::LUA_TSTRING => LuaType::String,
            ffi::LUA_TTABLE => LuaType::Table,
            ffi::LUA_TFUNCTION => LuaType::Function,
            ffi::LUA_TUSERDATA => LuaType::Userdata,
            ffi::LUA_TTHREAD => LuaType::Thread,
            _ => LuaType::None,
        }
    }

    /// Name as reported by Lua's `type()`
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata | LuaType::Userdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }
}

impl fmt::Display for LuaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Comparison run by [`LuaState::compare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`, honouring `__eq`
    Eq,
    /// `<`, honouring `__lt`
    Lt,
    /// `<=`, honouring `__le`
    Le,
}

impl CompareOp {
    fn to_raw(self) -> c_int {
        match self {
            CompareOp::Eq => ffi::LUA_OPEQ,
            CompareOp::Lt => ffi::LUA_OPLT,
            CompareOp::Le => ffi::LUA_OPLE,
        }
    }
}

/// A slot holding a value the caller chose not to convert yet.
///
/// Always an absolute index, so it stays valid while values are pushed
/// above it. It is only meaningful while that slot is still on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackRef {
    /// Absolute stack index
    pub index: c_int,
}

/// Explicit push contract for host types with a fixed VM representation
pub trait Pushable {
    /// Push exactly one value representing `self`
    fn push(&self, state: LuaState);
}

impl LuaState {
    // ========================================================================
    // Stack maintenance
    // ========================================================================

    /// Index of the top slot (equal to the number of slots)
    #[inline]
    pub fn top(self) -> c_int {
        unsafe { ffi::lua_gettop(self.as_ptr()) }
    }

    /// Set the stack top, filling with nil or discarding as needed
    #[inline]
    pub fn set_top(self, index: c_int) {
        unsafe { ffi::lua_settop(self.as_ptr(), index) }
    }

    /// Pop `n` values
    #[inline]
    pub fn pop(self, n: c_int) {
        unsafe { ffi::lua_pop(self.as_ptr(), n) }
    }

    /// Convert a relative index into an absolute one
    #[inline]
    pub fn abs_index(self, index: c_int) -> c_int {
        unsafe { ffi::lua_absindex(self.as_ptr(), index) }
    }

    /// Push a copy of the value at `index`
    #[inline]
    pub fn push_copy(self, index: c_int) {
        unsafe { ffi::lua_pushvalue(self.as_ptr(), index) }
    }

    /// Move the top value into `index`, shifting values above it up
    #[inline]
    pub fn insert(self, index: c_int) {
        unsafe { ffi::lua_rotate(self.as_ptr(), index, 1) }
    }

    /// Remove the value at `index`, shifting values above it down
    #[inline]
    pub fn remove(self, index: c_int) {
        unsafe {
            ffi::lua_rotate(self.as_ptr(), index, -1);
            ffi::lua_pop(self.as_ptr(), 1);
        }
    }

    /// Make sure `extra` more slots are available
    pub fn check_stack(self, extra: c_int) -> bool {
        unsafe { ffi::lua_checkstack(self.as_ptr(), extra) != 0 }
    }

    /// Reference to the slot at `index`
    pub fn stack_ref(self, index: c_int) -> StackRef {
        StackRef {
            index: self.abs_index(index),
        }
    }

    // ========================================================================
    // Type inspection
    // ========================================================================

    /// Type of the value at `index`
    #[inline]
    pub fn type_of(self, index: c_int) -> LuaType {
        LuaType::from_raw(unsafe { ffi::lua_type(self.as_ptr(), index) })
    }

    /// True for nil and for indices past the top
    #[inline]
    pub fn is_none_or_nil(self, index: c_int) -> bool {
        matches!(self.type_of(index), LuaType::None | LuaType::Nil)
    }

    /// True if the number at `index` has an integer representation
    pub fn is_integer(self, index: c_int) -> bool {
        unsafe { ffi::lua_isinteger(self.as_ptr(), index) != 0 }
    }

    // ========================================================================
    // Scalar reads
    // ========================================================================

    /// Lua truthiness of the value at `index` (only nil and false are false)
    pub fn to_boolean(self, index: c_int) -> bool {
        unsafe { ffi::lua_toboolean(self.as_ptr(), index) != 0 }
    }

    /// Integer value of a number slot; floats are accepted only when their
    /// value is exactly integral. Strings are not coerced.
    pub fn to_integer(self, index: c_int) -> Option<i64> {
        if self.type_of(index) != LuaType::Number {
            return None;
        }
        let mut isnum: c_int = 0;
        let value = unsafe { ffi::lua_tointegerx(self.as_ptr(), index, &mut isnum) };
        (isnum != 0).then_some(value)
    }

    /// Float value of a number slot. Strings are not coerced.
    pub fn to_number(self, index: c_int) -> Option<f64> {
        if self.type_of(index) != LuaType::Number {
            return None;
        }
        let mut isnum: c_int = 0;
        let value = unsafe { ffi::lua_tonumberx(self.as_ptr(), index, &mut isnum) };
        (isnum != 0).then_some(value)
    }

    /// Raw bytes of a string slot
    pub fn to_bytes(self, index: c_int) -> Option<Vec<u8>> {
        self.with_bytes(index, <[u8]>::to_vec)
    }

    /// Decode a string slot with `encoding`
    pub fn to_string_encoded(self, index: c_int, encoding: StringEncoding) -> Option<String> {
        self.with_bytes(index, |bytes| encoding.decode(bytes)).flatten()
    }

    /// Decode a string slot with the instance's default encoding
    pub fn to_string(self, index: c_int) -> Option<String> {
        self.to_string_encoded(index, self.default_string_encoding())
    }

    /// Borrow the bytes of a string slot for the duration of `f`
    pub(crate) fn with_bytes<R>(self, index: c_int, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        if self.type_of(index) != LuaType::String {
            return None;
        }
        unsafe {
            let mut len: usize = 0;
            let data = ffi::lua_tolstring(self.as_ptr(), index, &mut len);
            if data.is_null() {
                return None;
            }
            // The string stays alive while its slot is on the stack
            Some(f(std::slice::from_raw_parts(data.cast::<u8>(), len)))
        }
    }

    /// Light userdata pointer at `index`
    pub fn to_light_userdata(self, index: c_int) -> Option<*mut std::ffi::c_void> {
        if self.type_of(index) != LuaType::LightUserdata {
            return None;
        }
        Some(unsafe { ffi::lua_touserdata(self.as_ptr(), index) })
    }

    /// Text form of any value, running `__tostring` if present.
    ///
    /// Runs under a protected call, so a failing `__tostring` surfaces as
    /// an error instead of unwinding.
    pub fn to_string_meta(self, index: c_int) -> LuaResult<String> {
        let index = self.abs_index(index);
        unsafe {
            ffi::lua_pushcfunction(self.as_ptr(), shim::tostring);
        }
        self.push_copy(index);
        self.pcall(1, 1, false)?;
        let text = self
            .with_bytes(-1, |bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();
        self.pop(1);
        Ok(text)
    }

    // ========================================================================
    // Field reads by string key (raw, balanced)
    // ========================================================================

    /// Integer field `key` of the table at `index`
    pub fn to_integer_field(self, index: c_int, key: &str) -> Option<i64> {
        self.with_raw_field(index, key, |state| state.to_integer(-1))
            .flatten()
    }

    /// Float field `key` of the table at `index`
    pub fn to_number_field(self, index: c_int, key: &str) -> Option<f64> {
        self.with_raw_field(index, key, |state| state.to_number(-1))
            .flatten()
    }

    /// Text field `key` of the table at `index`
    pub fn to_string_field(self, index: c_int, key: &str) -> Option<String> {
        self.with_raw_field(index, key, |state| state.to_string(-1))
            .flatten()
    }

    /// Boolean field `key` of the table at `index`; absent unless the field
    /// holds an actual boolean
    pub fn to_boolean_field(self, index: c_int, key: &str) -> Option<bool> {
        self.with_raw_field(index, key, |state| {
            (state.type_of(-1) == LuaType::Boolean).then(|| state.to_boolean(-1))
        })
        .flatten()
    }

    fn with_raw_field<R>(self, index: c_int, key: &str, f: impl FnOnce(LuaState) -> R) -> Option<R> {
        if self.type_of(index) != LuaType::Table {
            return None;
        }
        let index = self.abs_index(index);
        self.push_str_raw(key.as_bytes());
        self.raw_get(index);
        let result = f(self);
        self.pop(1);
        Some(result)
    }

    // ========================================================================
    // Pushes
    // ========================================================================

    /// Push nil
    #[inline]
    pub fn push_nil(self) {
        unsafe { ffi::lua_pushnil(self.as_ptr()) }
    }

    /// Push a boolean
    #[inline]
    pub fn push_boolean(self, value: bool) {
        unsafe { ffi::lua_pushboolean(self.as_ptr(), value as c_int) }
    }

    /// Push an integer
    #[inline]
    pub fn push_integer(self, value: i64) {
        unsafe { ffi::lua_pushinteger(self.as_ptr(), value) }
    }

    /// Push a float
    #[inline]
    pub fn push_number(self, value: f64) {
        unsafe { ffi::lua_pushnumber(self.as_ptr(), value) }
    }

    /// Push text in the instance's default encoding
    pub fn push_string(self, text: &str) {
        self.push_string_encoded(text, self.default_string_encoding());
    }

    /// Push text in `encoding`
    pub fn push_string_encoded(self, text: &str, encoding: StringEncoding) {
        match encoding {
            StringEncoding::Utf8 => self.push_str_raw(text.as_bytes()),
            other => self.push_str_raw(&other.encode(text)),
        }
    }

    /// Push bytes as a Lua string without any encoding step
    pub fn push_bytes(self, bytes: &[u8]) {
        self.push_str_raw(bytes);
    }

    #[inline]
    fn push_str_raw(self, bytes: &[u8]) {
        unsafe {
            ffi::lua_pushlstring(self.as_ptr(), bytes.as_ptr().cast(), bytes.len());
        }
    }

    /// Push a raw pointer as light userdata
    pub fn push_light_userdata(self, ptr: *mut std::ffi::c_void) {
        unsafe { ffi::lua_pushlightuserdata(self.as_ptr(), ptr) }
    }

    /// Push a C function
    pub fn push_cfunction(self, func: ffi::lua_CFunction) {
        unsafe { ffi::lua_pushcfunction(self.as_ptr(), func) }
    }

    /// Push the globals table
    pub fn push_globals(self) {
        unsafe {
            ffi::lua_rawgeti(self.as_ptr(), ffi::LUA_REGISTRYINDEX, ffi::LUA_RIDX_GLOBALS);
        }
    }

    /// Push any [`Pushable`] value
    pub fn push<P: Pushable + ?Sized>(self, value: &P) {
        value.push(self);
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Push a new empty table with preallocated space
    pub fn new_table(self, array_len: c_int, hash_len: c_int) {
        unsafe { ffi::lua_createtable(self.as_ptr(), array_len, hash_len) }
    }

    /// `t[k]` without metamethods, where `t` is at `index` and `k` on top.
    /// Replaces the key with the value and returns its type.
    pub fn raw_get(self, index: c_int) -> LuaType {
        LuaType::from_raw(unsafe { ffi::lua_rawget(self.as_ptr(), index) })
    }

    /// `t[k] = v` without metamethods, with `k` and `v` on top (popped)
    pub fn raw_set(self, index: c_int) {
        unsafe { ffi::lua_rawset(self.as_ptr(), index) }
    }

    /// Push `t[n]` without metamethods and return its type
    pub fn raw_get_index(self, index: c_int, n: i64) -> LuaType {
        LuaType::from_raw(unsafe { ffi::lua_rawgeti(self.as_ptr(), index, n) })
    }

    /// `t[n] = v` without metamethods, with `v` on top (popped)
    pub fn raw_set_index(self, index: c_int, n: i64) {
        unsafe { ffi::lua_rawseti(self.as_ptr(), index, n) }
    }

    /// Raw length (`#` without `__len`)
    pub fn raw_len(self, index: c_int) -> usize {
        unsafe { ffi::lua_rawlen(self.as_ptr(), index) as usize }
    }

    /// `t[k]` with metamethods, where `t` is at `index` and `k` on top.
    /// The key is replaced by the value on success and popped on failure.
    pub fn get(self, index: c_int) -> LuaResult<LuaType> {
        let index = self.abs_index(index);
        unsafe {
            ffi::lua_pushcfunction(self.as_ptr(), shim::gettable);
        }
        self.insert(-2);
        self.push_copy(index);
        self.insert(-2);
        self.pcall(2, 1, false)?;
        Ok(self.type_of(-1))
    }

    /// Push `t[name]` with metamethods, where `t` is at `index`
    pub fn get_field(self, index: c_int, name: &str) -> LuaResult<LuaType> {
        let index = self.abs_index(index);
        self.push_str_raw(name.as_bytes());
        self.get(index)
    }

    /// `t[k] = v` with metamethods, `k` and `v` on top (popped either way)
    pub fn set(self, index: c_int) -> LuaResult<()> {
        let index = self.abs_index(index);
        unsafe {
            ffi::lua_pushcfunction(self.as_ptr(), shim::settable);
        }
        self.insert(-3);
        self.push_copy(index);
        self.insert(-3);
        self.pcall(3, 0, false)
    }

    /// Compare the values at `a` and `b`, running metamethods under a
    /// protected call. The stack is unchanged on both paths.
    pub fn compare(self, a: c_int, b: c_int, op: CompareOp) -> LuaResult<bool> {
        let (a, b) = (self.abs_index(a), self.abs_index(b));
        unsafe {
            ffi::lua_pushcfunction(self.as_ptr(), shim::compare);
        }
        self.push_copy(a);
        self.push_copy(b);
        self.push_integer(op.to_raw() as i64);
        self.pcall(3, 1, false)?;
        let result = self.to_boolean(-1);
        self.pop(1);
        Ok(result)
    }

    /// Push the global `name` (raw read of the globals table)
    pub fn get_global(self, name: &str) -> LuaType {
        self.push_globals();
        self.push_str_raw(name.as_bytes());
        let ty = self.raw_get(-2);
        self.remove(-2);
        ty
    }

    /// Pop the top value into global `name` (raw write of the globals table)
    pub fn set_global(self, name: &str) {
        self.push_globals();
        self.push_str_raw(name.as_bytes());
        self.push_copy(-3);
        self.raw_set(-3);
        self.pop(2);
    }

    /// Push the dispatch table registered under `name`, returning its type
    /// (nil, with nil pushed, when none is registered)
    pub(crate) fn push_registered_table(self, name: &str) -> LuaType {
        match CString::new(name) {
            Ok(name) => LuaType::from_raw(unsafe {
                ffi::lua_getfield(self.as_ptr(), ffi::LUA_REGISTRYINDEX, name.as_ptr())
            }),
            // No registered name contains a NUL byte
            Err(_) => {
                self.push_nil();
                LuaType::Nil
            }
        }
    }

    /// Type name of the value at `index`, preferring a metatable `__name`
    pub fn type_name(self, index: c_int) -> String {
        let ty = self.type_of(index);
        if ty == LuaType::Userdata || ty == LuaType::Table {
            unsafe {
                if ffi::lua_getmetatable(self.as_ptr(), index) != 0 {
                    let name = if ffi::lua_getfield(self.as_ptr(), -1, c"__name".as_ptr())
                        == ffi::LUA_TSTRING
                    {
                        self.to_bytes(-1).map(|b| String::from_utf8_lossy(&b).into_owned())
                    } else {
                        None
                    };
                    self.pop(2);
                    if let Some(name) = name {
                        return name;
                    }
                }
            }
        }
        ty.name().to_string()
    }

    pub(crate) fn topointer(self, index: c_int) -> usize {
        unsafe { ffi::lua_topointer(self.as_ptr(), index) as usize }
    }
}

// ============================================================================
// Pushable implementations
// ============================================================================

impl Pushable for bool {
    fn push(&self, state: LuaState) {
        state.push_boolean(*self);
    }
}

macro_rules! impl_pushable_integer {
    ($($t:ty),*) => {
        $(
            impl Pushable for $t {
                fn push(&self, state: LuaState) {
                    state.push_integer(*self as i64);
                }
            }
        )*
    };
}

impl_pushable_integer!(i8, i16, i32, i64, u8, u16, u32, isize);

impl Pushable for u64 {
    fn push(&self, state: LuaState) {
        match i64::try_from(*self) {
            Ok(i) => state.push_integer(i),
            Err(_) => state.push_number(*self as f64),
        }
    }
}

impl Pushable for usize {
    fn push(&self, state: LuaState) {
        (*self as u64).push(state);
    }
}

impl Pushable for f32 {
    fn push(&self, state: LuaState) {
        state.push_number(*self as f64);
    }
}

impl Pushable for f64 {
    fn push(&self, state: LuaState) {
        state.push_number(*self);
    }
}

impl Pushable for str {
    fn push(&self, state: LuaState) {
        state.push_string(self);
    }
}

impl Pushable for String {
    fn push(&self, state: LuaState) {
        state.push_string(self);
    }
}

impl Pushable for [u8] {
    fn push(&self, state: LuaState) {
        state.push_bytes(self);
    }
}

impl Pushable for Vec<u8> {
    fn push(&self, state: LuaState) {
        state.push_bytes(self);
    }
}

impl<T: Pushable> Pushable for Option<T> {
    fn push(&self, state: LuaState) {
        match self {
            Some(value) => value.push(state),
            None => state.push_nil(),
        }
    }
}

impl<T: Pushable + ?Sized> Pushable for &T {
    fn push(&self, state: LuaState) {
        (**self).push(state);
    }
}

impl Pushable for StackRef {
    fn push(&self, state: LuaState) {
        state.push_copy(self.index);
    }
}
