//! Host-side representation of Lua values
//!
//! [`LuaValue`] is what [`to_any`](crate::LuaState::to_any) produces and
//! [`push_value`](crate::LuaState::push_value) consumes. Strings and tables
//! are either resolved into host data (`String`/`Bytes`, `Array`/`Map`) or
//! left on the stack as placeholders (`StringRef`, `TableRef`, `Ref`) that
//! stay valid while their slot is live. Values found inside a converted
//! table that have no host form are pinned in the registry instead
//! (`Anchored`), so they stay valid for as long as the host holds them.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};

use mlua_sys as ffi;

use crate::callback::Callback;
use crate::registry_ref::RegistryRef;
use crate::stack::{Pushable, StackRef};
use crate::state::LuaState;
use crate::userdata::Opaque;

/// A converted Lua value
#[derive(Clone, Default)]
pub enum LuaValue {
    /// nil (also produced for slots past the top)
    #[default]
    Nil,
    /// boolean
    Boolean(bool),
    /// Number with an exact integer value
    Integer(i64),
    /// Any other number
    Number(f64),
    /// String that decoded under the requested encoding
    String(String),
    /// String that did not decode, or raw bytes to push
    Bytes(Vec<u8>),
    /// Table whose keys are exactly `1..=n`
    Array(Vec<LuaValue>),
    /// Any other table
    Map(HashMap<LuaKey, LuaValue>),
    /// Light userdata pointer
    LightUserdata(*mut c_void),
    /// C function without upvalues
    CFunction(ffi::lua_CFunction),
    /// Host callback pushed through this bridge
    Callback(Callback),
    /// Coroutine
    Thread(ThreadRef),
    /// Host value held by a bridge cell
    Userdata(Opaque),
    /// Unresolved string
    StringRef(StackRef),
    /// Unresolved table
    TableRef(StackRef),
    /// Lua function, C closure or foreign userdata
    Ref(StackRef),
    /// Function or foreign userdata nested in a converted table, or a table
    /// reached again through a cycle
    Anchored(RegistryRef),
}

impl LuaValue {
    /// True for `Nil`
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// Name of the variant's Lua type
    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Boolean(_) => "boolean",
            LuaValue::Integer(_) | LuaValue::Number(_) => "number",
            LuaValue::String(_) | LuaValue::Bytes(_) | LuaValue::StringRef(_) => "string",
            LuaValue::Array(_) | LuaValue::Map(_) | LuaValue::TableRef(_) => "table",
            LuaValue::LightUserdata(_) => "userdata",
            LuaValue::CFunction(_) | LuaValue::Callback(_) => "function",
            LuaValue::Thread(_) => "thread",
            LuaValue::Userdata(_) => "userdata",
            LuaValue::Ref(_) => "reference",
            LuaValue::Anchored(anchor) => anchor.type_of().name(),
        }
    }

    /// Integer value, also for integral floats
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(i) => Some(*i),
            LuaValue::Number(n) => float_to_integer(*n),
            _ => None,
        }
    }

    /// Float value of either number variant
    pub fn as_number(&self) -> Option<f64> {
        match self {
            LuaValue::Integer(i) => Some(*i as f64),
            LuaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Text of a decoded string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean value
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            LuaValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Elements of an array
    pub fn as_array(&self) -> Option<&[LuaValue]> {
        match self {
            LuaValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Entries of a map
    pub fn as_map(&self) -> Option<&HashMap<LuaKey, LuaValue>> {
        match self {
            LuaValue::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

/// `f` as an `i64` if it is whole and in range
pub(crate) fn float_to_integer(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, hence the strict bound
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        use LuaValue::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (Integer(a), Number(b)) | (Number(b), Integer(a)) => (*a as f64) == *b,
            (String(a), String(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (LightUserdata(a), LightUserdata(b)) => a == b,
            (CFunction(a), CFunction(b)) => *a as *const () == *b as *const (),
            (Callback(a), Callback(b)) => a == b,
            (Thread(a), Thread(b)) => a == b,
            (Userdata(a), Userdata(b)) => a.ptr_eq(b),
            (StringRef(a), StringRef(b)) | (TableRef(a), TableRef(b)) | (Ref(a), Ref(b)) => {
                a == b
            }
            (Anchored(a), Anchored(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "Nil"),
            LuaValue::Boolean(b) => write!(f, "Boolean({})", b),
            LuaValue::Integer(i) => write!(f, "Integer({})", i),
            LuaValue::Number(n) => write!(f, "Number({})", n),
            LuaValue::String(s) => write!(f, "String({:?})", s),
            LuaValue::Bytes(b) => write!(f, "Bytes({:?})", b),
            LuaValue::Array(items) => f.debug_tuple("Array").field(items).finish(),
            LuaValue::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            LuaValue::LightUserdata(p) => write!(f, "LightUserdata({:p})", p),
            LuaValue::CFunction(func) => write!(f, "CFunction({:p})", *func as *const ()),
            LuaValue::Callback(cb) => write!(f, "{:?}", cb),
            LuaValue::Thread(t) => write!(f, "{:?}", t),
            LuaValue::Userdata(o) => write!(f, "Userdata({:?})", o),
            LuaValue::StringRef(r) => write!(f, "StringRef({})", r.index),
            LuaValue::TableRef(r) => write!(f, "TableRef({})", r.index),
            LuaValue::Ref(r) => write!(f, "Ref({})", r.index),
            LuaValue::Anchored(anchor) => write!(f, "Anchored({:?})", anchor),
        }
    }
}

impl fmt::Display for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "nil"),
            LuaValue::Boolean(b) => write!(f, "{}", b),
            LuaValue::Integer(i) => write!(f, "{}", i),
            LuaValue::Number(n) => write!(f, "{}", n),
            LuaValue::String(s) => write!(f, "\"{}\"", s),
            LuaValue::Bytes(b) => write!(f, "\"{}\"", b.escape_ascii()),
            LuaValue::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            LuaValue::Map(entries) => {
                // Sorted so output is stable across runs
                let mut rendered: Vec<(String, &LuaValue)> =
                    entries.iter().map(|(k, v)| (k.to_string(), v)).collect();
                rendered.sort_by(|a, b| a.0.cmp(&b.0));
                write!(f, "{{")?;
                for (i, (k, v)) in rendered.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            LuaValue::LightUserdata(p) => write!(f, "lightuserdata: {:p}", p),
            LuaValue::CFunction(func) => write!(f, "function: {:p}", *func as *const ()),
            LuaValue::Callback(cb) => write!(f, "{:?}", cb),
            LuaValue::Thread(t) => write!(f, "{:?}", t),
            LuaValue::Userdata(o) => write!(f, "{}: {:?}", o.type_name(), o),
            LuaValue::StringRef(r) | LuaValue::TableRef(r) | LuaValue::Ref(r) => {
                write!(f, "<{} at slot {}>", self.type_name(), r.index)
            }
            LuaValue::Anchored(anchor) => write!(f, "{}: {:#x}", anchor.type_of(), anchor.address()),
        }
    }
}

macro_rules! impl_from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for LuaValue {
                fn from(value: $t) -> Self {
                    LuaValue::Integer(value as i64)
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for LuaValue {
    fn from(value: bool) -> Self {
        LuaValue::Boolean(value)
    }
}

impl From<f64> for LuaValue {
    fn from(value: f64) -> Self {
        LuaValue::Number(value)
    }
}

impl From<f32> for LuaValue {
    fn from(value: f32) -> Self {
        LuaValue::Number(value as f64)
    }
}

impl From<&str> for LuaValue {
    fn from(value: &str) -> Self {
        LuaValue::String(value.to_string())
    }
}

impl From<String> for LuaValue {
    fn from(value: String) -> Self {
        LuaValue::String(value)
    }
}

impl From<Vec<u8>> for LuaValue {
    fn from(value: Vec<u8>) -> Self {
        LuaValue::Bytes(value)
    }
}

impl From<Vec<LuaValue>> for LuaValue {
    fn from(value: Vec<LuaValue>) -> Self {
        LuaValue::Array(value)
    }
}

impl From<HashMap<LuaKey, LuaValue>> for LuaValue {
    fn from(value: HashMap<LuaKey, LuaValue>) -> Self {
        LuaValue::Map(value)
    }
}

impl From<Callback> for LuaValue {
    fn from(value: Callback) -> Self {
        LuaValue::Callback(value)
    }
}

impl From<RegistryRef> for LuaValue {
    fn from(value: RegistryRef) -> Self {
        LuaValue::Anchored(value)
    }
}

impl From<Opaque> for LuaValue {
    fn from(value: Opaque) -> Self {
        LuaValue::Userdata(value)
    }
}

impl<T: Into<LuaValue>> From<Option<T>> for LuaValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(LuaValue::Nil, Into::into)
    }
}

impl Pushable for LuaValue {
    fn push(&self, state: LuaState) {
        state.push_value(self);
    }
}

/// A table key in a converted map
#[derive(Debug, Clone)]
pub enum LuaKey {
    /// boolean key
    Boolean(bool),
    /// integer key (integral float keys are normalized to this by the VM)
    Integer(i64),
    /// non-integral float key
    Number(f64),
    /// string key that decoded
    String(String),
    /// string key that did not decode
    Bytes(Vec<u8>),
    /// table, function, userdata or thread key, compared by identity
    Opaque(OpaqueKey),
}

impl PartialEq for LuaKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LuaKey::Boolean(a), LuaKey::Boolean(b)) => a == b,
            (LuaKey::Integer(a), LuaKey::Integer(b)) => a == b,
            (LuaKey::Number(a), LuaKey::Number(b)) => a.to_bits() == b.to_bits(),
            (LuaKey::String(a), LuaKey::String(b)) => a == b,
            (LuaKey::Bytes(a), LuaKey::Bytes(b)) => a == b,
            (LuaKey::Opaque(a), LuaKey::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for LuaKey {}

impl Hash for LuaKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            LuaKey::Boolean(b) => b.hash(state),
            LuaKey::Integer(i) => i.hash(state),
            LuaKey::Number(n) => n.to_bits().hash(state),
            LuaKey::String(s) => s.hash(state),
            LuaKey::Bytes(b) => b.hash(state),
            LuaKey::Opaque(key) => key.hash(state),
        }
    }
}

impl fmt::Display for LuaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaKey::Boolean(b) => write!(f, "{}", b),
            LuaKey::Integer(i) => write!(f, "{}", i),
            LuaKey::Number(n) => write!(f, "{}", n),
            LuaKey::String(s) => write!(f, "{}", s),
            LuaKey::Bytes(b) => write!(f, "{}", b.escape_ascii()),
            LuaKey::Opaque(key) => write!(f, "{}: {:#x}", key.value.type_name(), key.address),
        }
    }
}

impl From<&str> for LuaKey {
    fn from(value: &str) -> Self {
        LuaKey::String(value.to_string())
    }
}

impl From<String> for LuaKey {
    fn from(value: String) -> Self {
        LuaKey::String(value)
    }
}

impl From<i64> for LuaKey {
    fn from(value: i64) -> Self {
        LuaKey::Integer(value)
    }
}

impl From<bool> for LuaKey {
    fn from(value: bool) -> Self {
        LuaKey::Boolean(value)
    }
}

impl From<LuaKey> for LuaValue {
    fn from(key: LuaKey) -> Self {
        match key {
            LuaKey::Boolean(b) => LuaValue::Boolean(b),
            LuaKey::Integer(i) => LuaValue::Integer(i),
            LuaKey::Number(n) => LuaValue::Number(n),
            LuaKey::String(s) => LuaValue::String(s),
            LuaKey::Bytes(b) => LuaValue::Bytes(b),
            LuaKey::Opaque(key) => *key.value,
        }
    }
}

/// Key whose identity is the VM object it came from.
///
/// Equality and hashing use only the object's address, so two keys
/// converted from the same table compare equal even though the converted
/// contents are not compared. Keys read from a VM also pin the original
/// object, and pushing the key pushes that object back.
#[derive(Debug, Clone)]
pub struct OpaqueKey {
    value: Box<LuaValue>,
    address: usize,
    anchor: Option<RegistryRef>,
}

impl OpaqueKey {
    /// Key known only by its converted form and address. Pushing it pushes
    /// the converted form, a new object.
    pub fn new(value: LuaValue, address: usize) -> Self {
        Self {
            value: Box::new(value),
            address,
            anchor: None,
        }
    }

    pub(crate) fn anchored(value: LuaValue, anchor: RegistryRef) -> Self {
        Self {
            value: Box::new(value),
            address: anchor.address(),
            anchor: Some(anchor),
        }
    }

    /// Converted form of the key object
    pub fn value(&self) -> &LuaValue {
        &self.value
    }

    /// The original key object, when the key was read from a VM
    pub fn anchor(&self) -> Option<&RegistryRef> {
        self.anchor.as_ref()
    }

    /// Address of the key object inside the VM
    pub fn address(&self) -> usize {
        self.address
    }
}

impl PartialEq for OpaqueKey {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for OpaqueKey {}

impl Hash for OpaqueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// A coroutine.
///
/// Valid while the thread is reachable from the VM, typically while the slot
/// it was read from is live.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ThreadRef {
    thread: LuaState,
}

impl ThreadRef {
    pub(crate) fn new(thread: LuaState) -> Self {
        Self { thread }
    }

    /// The coroutine's own state, for inspecting its stack
    pub fn state(&self) -> LuaState {
        self.thread
    }

    /// `lua_status` of the coroutine (`LUA_OK`, `LUA_YIELD` or an error)
    pub fn status(&self) -> std::os::raw::c_int {
        unsafe { ffi::lua_status(self.thread.as_ptr()) }
    }
}

impl fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread: {:p}", self.thread.as_ptr())
    }
}
