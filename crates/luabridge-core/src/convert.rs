//! Generic value conversion
//!
//! `to_any` classifies a slot into a [`LuaValue`], `push_value` and
//! `push_any` go the other way, and [`FromLua`] backs the typed reads of
//! `to_value::<T>`.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::os::raw::c_int;
use std::rc::Rc;

use mlua_sys as ffi;

use crate::callback::Callback;
use crate::registry_ref::RegistryRef;
use crate::stack::{LuaType, Pushable, StackRef};
use crate::state::LuaState;
use crate::userdata::Opaque;
use crate::value::{float_to_integer, LuaKey, LuaValue, OpaqueKey, ThreadRef};

/// Nesting limit for table conversion; deeper tables become nil
pub const MAX_CONVERSION_DEPTH: usize = 64;

// Addresses of the tables being converted, outermost first
type Path = Vec<usize>;

impl LuaState {
    /// Convert the value at `index` to a [`LuaValue`].
    ///
    /// With `guess_type`, strings become `String` when they decode under the
    /// default encoding (`Bytes` otherwise) and tables become `Array` when
    /// their keys are exactly `1..=n`, `Map` otherwise. A table with holes,
    /// such as `{[1]=1, [2]=2, [4]=4}`, is a `Map`. Without `guess_type`,
    /// strings and tables are returned as placeholders.
    ///
    /// Functions and foreign userdata inside a converted table have no
    /// slot of their own and come back as `Anchored`. So does a table that
    /// contains itself, at the point where the cycle closes.
    pub fn to_any(self, index: c_int, guess_type: bool) -> LuaValue {
        self.to_any_on_path(index, guess_type, &mut Path::new())
    }

    fn to_any_on_path(self, index: c_int, guess_type: bool, path: &mut Path) -> LuaValue {
        let index = self.abs_index(index);
        match self.type_of(index) {
            LuaType::None | LuaType::Nil => LuaValue::Nil,
            LuaType::Boolean => LuaValue::Boolean(self.to_boolean(index)),
            LuaType::Number => match self.to_integer(index) {
                Some(i) => LuaValue::Integer(i),
                None => self.to_number(index).map_or(LuaValue::Nil, LuaValue::Number),
            },
            LuaType::String if guess_type => {
                let encoding = self.default_string_encoding();
                self.with_bytes(index, |bytes| match encoding.decode(bytes) {
                    Some(text) => LuaValue::String(text),
                    None => LuaValue::Bytes(bytes.to_vec()),
                })
                .unwrap_or(LuaValue::Nil)
            }
            LuaType::String => LuaValue::StringRef(self.stack_ref(index)),
            LuaType::Table if guess_type => self.table_to_value(index, path),
            LuaType::Table => LuaValue::TableRef(self.stack_ref(index)),
            LuaType::Function => self.function_to_value(index, path),
            LuaType::Userdata => match self.to_opaque(index) {
                Some(opaque) => LuaValue::Userdata(opaque),
                None => self.unresolved(index, path),
            },
            LuaType::LightUserdata => self
                .to_light_userdata(index)
                .map_or(LuaValue::Nil, LuaValue::LightUserdata),
            LuaType::Thread => self.to_thread(index).map_or(LuaValue::Nil, LuaValue::Thread),
        }
    }

    // A slot reference at the top level, a pinned value inside a table
    fn unresolved(self, index: c_int, path: &Path) -> LuaValue {
        if path.is_empty() {
            LuaValue::Ref(self.stack_ref(index))
        } else {
            LuaValue::Anchored(self.anchor(index))
        }
    }

    fn function_to_value(self, index: c_int, path: &Path) -> LuaValue {
        if let Some(callback) = self.to_callback(index) {
            return LuaValue::Callback(callback);
        }
        let l = self.as_ptr();
        unsafe {
            if let Some(function) = ffi::lua_tocfunction(l, index) {
                if ffi::lua_getupvalue(l, index, 1).is_null() {
                    return LuaValue::CFunction(function);
                }
                ffi::lua_pop(l, 1);
            }
        }
        self.unresolved(index, path)
    }

    fn to_thread(self, index: c_int) -> Option<ThreadRef> {
        let thread = unsafe { ffi::lua_tothread(self.as_ptr(), index) };
        if thread.is_null() {
            return None;
        }
        Some(ThreadRef::new(unsafe { LuaState::from_raw(thread) }))
    }

    fn table_to_value(self, index: c_int, path: &mut Path) -> LuaValue {
        let address = self.topointer(index);
        if path.contains(&address) {
            tracing::trace!(depth = path.len(), "table cycle, keeping a reference");
            return LuaValue::Anchored(self.anchor(index));
        }
        let depth = path.len();
        if depth >= MAX_CONVERSION_DEPTH {
            tracing::warn!(depth, "table nesting too deep, converting to nil");
            return LuaValue::Nil;
        }
        if !self.check_stack(4) {
            tracing::warn!(depth, "no stack space to convert table");
            return LuaValue::Nil;
        }

        path.push(address);
        let sequence_len = self.sequence_len(index);
        let mut is_array = true;
        let mut entries: Vec<(LuaKey, LuaValue)> = Vec::with_capacity(sequence_len);

        self.push_nil();
        while unsafe { ffi::lua_next(self.as_ptr(), index) } != 0 {
            let key = self.to_key(-2, path);
            let value = self.to_any_on_path(-1, true, path);
            self.pop(1);
            if let Some(key) = key {
                is_array &= matches!(key, LuaKey::Integer(i) if i >= 1 && i as usize <= sequence_len);
                entries.push((key, value));
            }
        }
        path.pop();

        if is_array {
            let mut items = vec![LuaValue::Nil; sequence_len];
            for (key, value) in entries {
                if let LuaKey::Integer(i) = key {
                    items[i as usize - 1] = value;
                }
            }
            LuaValue::Array(items)
        } else {
            LuaValue::Map(entries.into_iter().collect())
        }
    }

    /// Count of contiguous non-nil entries starting at key 1
    fn sequence_len(self, index: c_int) -> usize {
        let mut len = 0usize;
        loop {
            let ty = self.raw_get_index(index, len as i64 + 1);
            self.pop(1);
            if ty == LuaType::Nil {
                return len;
            }
            len += 1;
        }
    }

    fn to_key(self, index: c_int, path: &mut Path) -> Option<LuaKey> {
        let index = self.abs_index(index);
        match self.type_of(index) {
            LuaType::None | LuaType::Nil => None,
            LuaType::Boolean => Some(LuaKey::Boolean(self.to_boolean(index))),
            LuaType::Number => match self.to_integer(index) {
                Some(i) => Some(LuaKey::Integer(i)),
                None => self.to_number(index).map(LuaKey::Number),
            },
            LuaType::String => {
                let encoding = self.default_string_encoding();
                self.with_bytes(index, |bytes| match encoding.decode(bytes) {
                    Some(text) => LuaKey::String(text),
                    None => LuaKey::Bytes(bytes.to_vec()),
                })
            }
            _ => {
                let anchor = self.anchor(index);
                let value = self.to_any_on_path(index, true, path);
                Some(LuaKey::Opaque(OpaqueKey::anchored(value, anchor)))
            }
        }
    }

    /// Push `value`.
    ///
    /// Whole `Number`s that fit an `i64` are pushed as integers. Arrays and
    /// maps become new tables; placeholders push a copy of their slot.
    pub fn push_value(self, value: &LuaValue) {
        self.push_value_at_depth(value, 0);
    }

    fn push_value_at_depth(self, value: &LuaValue, depth: usize) {
        match value {
            LuaValue::Nil => self.push_nil(),
            LuaValue::Boolean(b) => self.push_boolean(*b),
            LuaValue::Integer(i) => self.push_integer(*i),
            LuaValue::Number(n) => match float_to_integer(*n) {
                Some(i) => self.push_integer(i),
                None => self.push_number(*n),
            },
            LuaValue::String(text) => self.push_string(text),
            LuaValue::Bytes(bytes) => self.push_bytes(bytes),
            LuaValue::Array(items) => {
                if !self.reserve_for_table(depth) {
                    return;
                }
                self.new_table(items.len().try_into().unwrap_or(0), 0);
                for (i, item) in items.iter().enumerate() {
                    self.push_value_at_depth(item, depth + 1);
                    self.raw_set_index(-2, i as i64 + 1);
                }
            }
            LuaValue::Map(entries) => {
                if !self.reserve_for_table(depth) {
                    return;
                }
                self.new_table(0, entries.len().try_into().unwrap_or(0));
                for (key, item) in entries {
                    if !self.push_key(key, depth) {
                        continue;
                    }
                    self.push_value_at_depth(item, depth + 1);
                    self.raw_set(-3);
                }
            }
            LuaValue::LightUserdata(p) => self.push_light_userdata(*p),
            LuaValue::CFunction(function) => self.push_cfunction(*function),
            LuaValue::Callback(callback) => self.push_callback(callback.clone()),
            LuaValue::Thread(thread) => self.push_thread(*thread),
            LuaValue::Userdata(opaque) => self.push_opaque(opaque.clone()),
            LuaValue::StringRef(r) | LuaValue::TableRef(r) | LuaValue::Ref(r) => {
                self.push_copy(r.index)
            }
            LuaValue::Anchored(anchor) => self.push_registry_ref(anchor),
        }
    }

    // Pushes nil in place of the table when the limits are hit
    fn reserve_for_table(self, depth: usize) -> bool {
        if depth >= MAX_CONVERSION_DEPTH || !self.check_stack(3) {
            tracing::warn!(depth, "value nesting too deep, pushing nil");
            self.push_nil();
            return false;
        }
        true
    }

    // Returns false (and pushes nothing) for keys Lua cannot store
    fn push_key(self, key: &LuaKey, depth: usize) -> bool {
        match key {
            LuaKey::Boolean(b) => self.push_boolean(*b),
            LuaKey::Integer(i) => self.push_integer(*i),
            LuaKey::Number(n) if n.is_nan() => {
                tracing::warn!("skipping NaN table key");
                return false;
            }
            LuaKey::Number(n) => self.push_number(*n),
            LuaKey::String(text) => self.push_string(text),
            LuaKey::Bytes(bytes) => self.push_bytes(bytes),
            LuaKey::Opaque(key) => {
                match key.anchor() {
                    Some(anchor) => self.push_registry_ref(anchor),
                    None => self.push_value_at_depth(key.value(), depth + 1),
                }
                if self.is_none_or_nil(-1) {
                    self.pop(1);
                    tracing::warn!("skipping table key that converts to nil");
                    return false;
                }
            }
        }
        true
    }

    fn push_thread(self, thread: ThreadRef) {
        let from = thread.state().as_ptr();
        unsafe {
            ffi::lua_pushthread(from);
            if from != self.as_ptr() {
                ffi::lua_xmove(from, self.as_ptr(), 1);
            }
        }
    }

    /// Push any host value: common host types by their natural Lua
    /// representation, anything else as an opaque cell.
    pub fn push_any<T: Any>(self, value: T) {
        let state = self;
        let any: &dyn Any = &value;

        macro_rules! push_if {
            ($($t:ty),*) => {
                $(
                    if let Some(v) = any.downcast_ref::<$t>() {
                        v.push(state);
                        return;
                    }
                )*
            };
        }

        if any.is::<()>() {
            self.push_nil();
            return;
        }
        push_if!(
            bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64,
            String, &'static str, Vec<u8>, LuaValue, Callback, StackRef, RegistryRef
        );
        // Sequences and mappings become tables
        push_if!(
            Vec<bool>, Vec<i32>, Vec<i64>, Vec<u32>, Vec<u64>, Vec<f32>, Vec<f64>,
            Vec<String>, Vec<&'static str>, Vec<LuaValue>,
            HashMap<LuaKey, LuaValue>, HashMap<i64, LuaValue>,
            HashMap<String, LuaValue>, HashMap<String, String>, HashMap<String, i64>,
            HashMap<String, f64>, HashMap<String, bool>,
            HashMap<&'static str, LuaValue>, HashMap<&'static str, String>,
            HashMap<&'static str, i64>, HashMap<&'static str, f64>
        );
        if let Some(opaque) = any.downcast_ref::<Opaque>() {
            self.push_opaque(opaque.clone());
            return;
        }
        self.push_userdata(value);
    }

    /// Read the value at `index` as a `T`, leaving the stack unchanged.
    /// Absent when the value does not convert.
    pub fn to_value<T: FromLua>(self, index: c_int) -> Option<T> {
        T::from_lua(self, index)
    }
}

impl LuaState {
    /// Push `items` as a new table with keys `1..=len`
    pub fn push_sequence<T: Pushable>(self, items: &[T]) {
        if !self.reserve_for_table(0) {
            return;
        }
        self.new_table(items.len().try_into().unwrap_or(0), 0);
        for (i, item) in items.iter().enumerate() {
            item.push(self);
            self.raw_set_index(-2, i as i64 + 1);
        }
    }

    /// Push `entries` as a new table. Entries whose key pushes as nil or
    /// NaN are skipped.
    pub fn push_mapping<'a, K, V, I>(self, entries: I)
    where
        K: Pushable + 'a,
        V: Pushable + 'a,
        I: IntoIterator<Item = (&'a K, &'a V)>,
        I::IntoIter: ExactSizeIterator,
    {
        if !self.reserve_for_table(0) {
            return;
        }
        let entries = entries.into_iter();
        self.new_table(0, entries.len().try_into().unwrap_or(0));
        for (key, value) in entries {
            key.push(self);
            if !self.is_storable_key(-1) {
                tracing::warn!(r#type = %self.type_of(-1), "skipping table key that cannot be stored");
                self.pop(1);
                continue;
            }
            value.push(self);
            self.raw_set(-3);
        }
    }

    fn is_storable_key(self, index: c_int) -> bool {
        match self.type_of(index) {
            LuaType::None | LuaType::Nil => false,
            LuaType::Number => !self.to_number(index).is_some_and(f64::is_nan),
            _ => true,
        }
    }
}

impl Pushable for Callback {
    fn push(&self, state: LuaState) {
        state.push_callback(self.clone());
    }
}

/// Keys that cannot be stored in a table push as nil
impl Pushable for LuaKey {
    fn push(&self, state: LuaState) {
        if !state.push_key(self, 0) {
            state.push_nil();
        }
    }
}

macro_rules! impl_pushable_sequence {
    ($($t:ty),*) => {
        $(
            impl Pushable for Vec<$t> {
                fn push(&self, state: LuaState) {
                    state.push_sequence(self);
                }
            }
        )*
    };
}

impl_pushable_sequence!(
    bool, i8, i16, i32, i64, isize, u16, u32, u64, usize, f32, f64,
    String, &str, LuaValue, LuaKey, Callback, RegistryRef
);

impl<K, V, S> Pushable for HashMap<K, V, S>
where
    K: Pushable,
    V: Pushable,
{
    fn push(&self, state: LuaState) {
        state.push_mapping(self.iter());
    }
}

/// Typed read of a stack slot
pub trait FromLua: Sized {
    /// Convert the value at `index`, leaving the stack unchanged
    fn from_lua(state: LuaState, index: c_int) -> Option<Self>;

    /// Name of the expected Lua type, used in argument errors
    fn expected_type() -> &'static str {
        "value"
    }
}

impl FromLua for bool {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        (state.type_of(index) == LuaType::Boolean).then(|| state.to_boolean(index))
    }

    fn expected_type() -> &'static str {
        "boolean"
    }
}

macro_rules! impl_from_lua_integer {
    ($($t:ty),*) => {
        $(
            impl FromLua for $t {
                fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
                    state.to_integer(index).and_then(|i| <$t>::try_from(i).ok())
                }

                fn expected_type() -> &'static str {
                    "integer"
                }
            }
        )*
    };
}

impl_from_lua_integer!(i8, i16, i32, i64, isize, u8, u16, u32, usize);

impl FromLua for u64 {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        if let Some(i) = state.to_integer(index) {
            return u64::try_from(i).ok();
        }
        // Values above i64::MAX are carried as floats
        let f = state.to_number(index)?;
        (f.fract() == 0.0 && f >= 0.0 && f < u64::MAX as f64).then_some(f as u64)
    }

    fn expected_type() -> &'static str {
        "integer"
    }
}

impl FromLua for f64 {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        state.to_number(index)
    }

    fn expected_type() -> &'static str {
        "number"
    }
}

impl FromLua for f32 {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        state.to_number(index).map(|f| f as f32)
    }

    fn expected_type() -> &'static str {
        "number"
    }
}

impl FromLua for String {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        state.to_string(index)
    }

    fn expected_type() -> &'static str {
        "string"
    }
}

/// Sequences read from tables whose keys are exactly `1..=n`. `Vec<u8>`
/// also reads a string's raw bytes.
impl<T: FromLua + 'static> FromLua for Vec<T> {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        let index = state.abs_index(index);
        match state.type_of(index) {
            LuaType::String => {
                let bytes: Box<dyn Any> = Box::new(state.to_bytes(index)?);
                bytes.downcast::<Vec<T>>().ok().map(|items| *items)
            }
            LuaType::Table => {
                if !state.check_stack(3) {
                    return None;
                }
                let len = state.sequence_len(index);
                if !state.keys_within_sequence(index, len) {
                    return None;
                }
                let mut items: Vec<T> = Vec::with_capacity(len);
                for i in 1..=len {
                    state.raw_get_index(index, i as i64);
                    let item = T::from_lua(state, -1);
                    state.pop(1);
                    items.push(item?);
                }
                Some(items)
            }
            _ => None,
        }
    }

    fn expected_type() -> &'static str {
        "table"
    }
}

impl LuaState {
    fn keys_within_sequence(self, index: c_int, len: usize) -> bool {
        self.push_nil();
        while unsafe { ffi::lua_next(self.as_ptr(), index) } != 0 {
            self.pop(1);
            let in_range = matches!(self.to_integer(-1), Some(i) if i >= 1 && i as usize <= len);
            if !in_range {
                self.pop(1);
                return false;
            }
        }
        true
    }
}

impl<K, V> FromLua for HashMap<K, V>
where
    K: FromLua + Eq + Hash,
    V: FromLua,
{
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        if state.type_of(index) != LuaType::Table || !state.check_stack(3) {
            return None;
        }
        let index = state.abs_index(index);
        let mut map = HashMap::new();
        state.push_nil();
        while unsafe { ffi::lua_next(state.as_ptr(), index) } != 0 {
            let entry = K::from_lua(state, -2).zip(V::from_lua(state, -1));
            state.pop(1);
            match entry {
                Some((key, value)) => {
                    map.insert(key, value);
                }
                None => {
                    state.pop(1);
                    return None;
                }
            }
        }
        Some(map)
    }

    fn expected_type() -> &'static str {
        "table"
    }
}

/// nil (or a missing slot) reads as `Some(None)`
impl<T: FromLua> FromLua for Option<T> {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        if state.is_none_or_nil(index) {
            Some(None)
        } else {
            T::from_lua(state, index).map(Some)
        }
    }

    fn expected_type() -> &'static str {
        T::expected_type()
    }
}

impl FromLua for LuaValue {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        Some(state.to_any(index, true))
    }
}

impl FromLua for Callback {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        state.to_callback(index)
    }

    fn expected_type() -> &'static str {
        "function"
    }
}

impl FromLua for ThreadRef {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        state.to_thread(index)
    }

    fn expected_type() -> &'static str {
        "thread"
    }
}

impl FromLua for Opaque {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        state.to_opaque(index)
    }

    fn expected_type() -> &'static str {
        "userdata"
    }
}

impl<T: Any> FromLua for Rc<T> {
    fn from_lua(state: LuaState, index: c_int) -> Option<Self> {
        state.to_userdata::<T>(index)
    }

    fn expected_type() -> &'static str {
        "userdata"
    }
}
