//! Dispatch-table (metatable) registry
//!
//! Maps host type identity to the name of a metatable stored in the Lua
//! registry. Names derive from [`std::any::type_name`], which is not
//! guaranteed to be unique (two closures in the same function share a
//! name, for instance), so the registry keeps, per base name, the ordered
//! list of distinct [`TypeId`]s seen and gives the second and later ones a
//! positional suffix: `luabridge.type:<name>`, `luabridge.type:<name>#2`, ...
//!
//! The order is first-seen-wins and only stable for the lifetime of one
//! instance.

use std::any::{Any, TypeId};
use std::ffi::{c_void, CString};
use std::fmt;
use std::os::raw::c_int;
use std::ptr;

use mlua_sys as ffi;
use rustc_hash::FxHashMap;

use crate::callback::Callback;
use crate::stack::LuaType;
use crate::state::LuaState;
use crate::userdata;

/// Prefix of every per-type metatable name
pub const TYPE_METATABLE_PREFIX: &str = "luabridge.type:";

/// Name of the fallback metatable
pub const DEFAULT_METATABLE_NAME: &str = "luabridge.default";

static CELL_MARKER: u8 = 0;

pub(crate) fn cell_marker() -> *const c_void {
    ptr::addr_of!(CELL_MARKER).cast()
}

/// Identity of a host type: its `TypeId` plus its descriptive name
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key for `T`
    pub fn of<T: Any + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub(crate) fn from_parts(id: TypeId, name: &'static str) -> Self {
        Self { id, name }
    }

    /// The `TypeId`
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The descriptive (possibly non-unique) name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

/// Keys a metatable entry can be installed under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetaMethod {
    /// `__add`
    Add,
    /// `__sub`
    Sub,
    /// `__mul`
    Mul,
    /// `__div`
    Div,
    /// `__mod`
    Mod,
    /// `__pow`
    Pow,
    /// `__unm`
    Unm,
    /// `__idiv`
    IDiv,
    /// `__band`
    BAnd,
    /// `__bor`
    BOr,
    /// `__bxor`
    BXor,
    /// `__bnot`
    BNot,
    /// `__shl`
    Shl,
    /// `__shr`
    Shr,
    /// `__concat`
    Concat,
    /// `__len`
    Len,
    /// `__eq`
    Eq,
    /// `__lt`
    Lt,
    /// `__le`
    Le,
    /// `__index`
    Index,
    /// `__newindex`
    NewIndex,
    /// `__call`
    Call,
    /// `__tostring`
    ToString,
    /// `__close`
    Close,
    /// Any other field, typically a method reached through `__index`.
    /// `"__gc"` is reserved for the bridge and rejected.
    Custom(String),
}

impl MetaMethod {
    /// Field name in the metatable
    pub fn key(&self) -> &str {
        match self {
            MetaMethod::Add => "__add",
            MetaMethod::Sub => "__sub",
            MetaMethod::Mul => "__mul",
            MetaMethod::Div => "__div",
            MetaMethod::Mod => "__mod",
            MetaMethod::Pow => "__pow",
            MetaMethod::Unm => "__unm",
            MetaMethod::IDiv => "__idiv",
            MetaMethod::BAnd => "__band",
            MetaMethod::BOr => "__bor",
            MetaMethod::BXor => "__bxor",
            MetaMethod::BNot => "__bnot",
            MetaMethod::Shl => "__shl",
            MetaMethod::Shr => "__shr",
            MetaMethod::Concat => "__concat",
            MetaMethod::Len => "__len",
            MetaMethod::Eq => "__eq",
            MetaMethod::Lt => "__lt",
            MetaMethod::Le => "__le",
            MetaMethod::Index => "__index",
            MetaMethod::NewIndex => "__newindex",
            MetaMethod::Call => "__call",
            MetaMethod::ToString => "__tostring",
            MetaMethod::Close => "__close",
            MetaMethod::Custom(name) => name,
        }
    }
}

impl From<&str> for MetaMethod {
    fn from(name: &str) -> Self {
        MetaMethod::Custom(name.to_string())
    }
}

/// A function installed in a metatable
#[derive(Clone)]
pub enum MetaFunction {
    /// Plain C function
    Function(ffi::lua_CFunction),
    /// Host closure
    Closure(Callback),
}

impl From<Callback> for MetaFunction {
    fn from(callback: Callback) -> Self {
        MetaFunction::Closure(callback)
    }
}

/// Per-instance name bookkeeping, held in the side state
pub(crate) struct MetatableRegistry {
    names: FxHashMap<&'static str, Vec<TypeId>>,
}

impl MetatableRegistry {
    pub(crate) fn new() -> Self {
        Self {
            names: FxHashMap::default(),
        }
    }

    /// Metatable name for `key`, assigning a suffix the first time a new
    /// type shows up under an already-used base name
    pub(crate) fn name_for(&mut self, key: TypeKey) -> String {
        let seen = self.names.entry(key.name).or_default();
        let position = match seen.iter().position(|id| *id == key.id) {
            Some(position) => position,
            None => {
                seen.push(key.id);
                seen.len() - 1
            }
        };
        if position == 0 {
            format!("{}{}", TYPE_METATABLE_PREFIX, key.name)
        } else {
            format!("{}{}#{}", TYPE_METATABLE_PREFIX, key.name, position + 1)
        }
    }
}

impl LuaState {
    /// Metatable name used for `T` in this instance
    pub fn metatable_name<T: Any + ?Sized>(self) -> String {
        self.metatable_name_for(TypeKey::of::<T>())
    }

    /// Metatable name used for `key` in this instance
    pub fn metatable_name_for(self, key: TypeKey) -> String {
        self.side_state().metatables.borrow_mut().name_for(key)
    }

    /// Check whether a metatable is registered for `T`
    pub fn is_metatable_registered<T: Any + ?Sized>(self) -> bool {
        let name = self.metatable_name::<T>();
        self.is_table_registered(&name)
    }

    fn is_table_registered(self, name: &str) -> bool {
        let registered = self.push_registered_table(name) == LuaType::Table;
        self.pop(1);
        registered
    }

    /// Register the metatable used for cells holding a `T`.
    ///
    /// `__index` defaults to the metatable itself, so `Custom` entries act
    /// as methods. The reclaim hook is installed automatically.
    ///
    /// # Panics
    /// If a metatable is already registered for `T` in this instance
    /// (including one created implicitly by pushing a `T` earlier), or if
    /// `__gc` is supplied.
    pub fn register_metatable<T: Any + ?Sized>(
        self,
        functions: impl IntoIterator<Item = (MetaMethod, MetaFunction)>,
    ) {
        self.register_metatable_for(TypeKey::of::<T>(), functions);
    }

    /// [`register_metatable`](Self::register_metatable) for an explicit key
    pub fn register_metatable_for(
        self,
        key: TypeKey,
        functions: impl IntoIterator<Item = (MetaMethod, MetaFunction)>,
    ) {
        let name = self.metatable_name_for(key);
        self.create_metatable(&name, functions.into_iter().collect(), true);
        self.pop(1);
        tracing::debug!(r#type = key.name(), metatable = %name, "metatable registered");
    }

    /// Register the metatable used for cells whose type has none.
    ///
    /// # Panics
    /// Same conditions as [`register_metatable`](Self::register_metatable).
    pub fn register_default_metatable(
        self,
        functions: impl IntoIterator<Item = (MetaMethod, MetaFunction)>,
    ) {
        self.create_metatable(DEFAULT_METATABLE_NAME, functions.into_iter().collect(), true);
        self.pop(1);
        tracing::debug!(metatable = DEFAULT_METATABLE_NAME, "default metatable registered");
    }

    /// Push the metatable for cells of type `key`: the registered one, else
    /// the default one, else an empty one registered on the spot.
    pub(crate) fn push_metatable_for(self, key: TypeKey) {
        let name = self.metatable_name_for(key);
        if self.push_registered_table(&name) == LuaType::Table {
            return;
        }
        self.pop(1);
        if self.push_registered_table(DEFAULT_METATABLE_NAME) == LuaType::Table {
            return;
        }
        self.pop(1);

        tracing::debug!(
            r#type = key.name(),
            metatable = %name,
            "no metatable registered, using an empty one"
        );
        self.create_metatable(&name, Vec::new(), false);
    }

    // Leaves the new metatable on the stack
    fn create_metatable(self, name: &str, functions: Vec<(MetaMethod, MetaFunction)>, index_self: bool) {
        if functions.iter().any(|(method, _)| method.key() == "__gc") {
            panic!("metatable {} must not define __gc; the bridge installs its own", name);
        }
        if self.is_table_registered(name) {
            panic!("metatable {} is already registered", name);
        }
        let cname = match CString::new(name) {
            Ok(cname) => cname,
            Err(_) => panic!("metatable name {:?} contains a NUL byte", name),
        };

        let l = self.as_ptr();
        unsafe {
            // Also sets __name, used by tostring() and error messages
            ffi::luaL_newmetatable(l, cname.as_ptr());
        }
        let mut has_index = false;
        for (method, function) in functions {
            has_index |= method == MetaMethod::Index;
            self.push_bytes(method.key().as_bytes());
            match function {
                MetaFunction::Function(f) => self.push_cfunction(f),
                MetaFunction::Closure(callback) => self.push_callback(callback),
            }
            self.raw_set(-3);
        }
        if index_self && !has_index {
            self.push_bytes(b"__index");
            self.push_copy(-2);
            self.raw_set(-3);
        }
        self.push_bytes(b"__gc");
        self.push_cfunction(userdata::reclaim_cell);
        self.raw_set(-3);
        unsafe {
            ffi::lua_pushboolean(l, 1);
            ffi::lua_rawsetp(l, -2, cell_marker());
        }
    }

    /// True if the value at `index` is a cell created by this bridge
    pub(crate) fn is_bridge_cell(self, index: c_int) -> bool {
        if self.type_of(index) != LuaType::Userdata {
            return false;
        }
        let l = self.as_ptr();
        unsafe {
            if ffi::lua_getmetatable(l, index) == 0 {
                return false;
            }
            let marked = ffi::lua_rawgetp(l, -1, cell_marker()) == ffi::LUA_TBOOLEAN;
            ffi::lua_pop(l, 2);
            marked
        }
    }
}
