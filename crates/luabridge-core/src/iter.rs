//! Lazy table iteration
//!
//! Both iterators borrow stack space above the height recorded when they
//! were created. Each step first resets the stack to that height (plus the
//! traversal key for [`Pairs`]), and dropping the iterator, exhausted or
//! not, restores it exactly.

use std::os::raw::c_int;

use mlua_sys as ffi;

use crate::stack::LuaType;
use crate::state::LuaState;

/// Iterator over `t[1], t[2], ...` up to the first nil, without
/// metamethods. Yields the index; the element is at the top of the stack
/// until the next step.
pub struct IPairs {
    state: LuaState,
    table: c_int,
    base_top: c_int,
    next: i64,
    done: bool,
}

impl Iterator for IPairs {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.done {
            return None;
        }
        self.state.set_top(self.base_top);
        if self.state.raw_get_index(self.table, self.next) == LuaType::Nil {
            self.state.set_top(self.base_top);
            self.done = true;
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(index)
    }
}

impl Drop for IPairs {
    fn drop(&mut self) {
        self.state.set_top(self.base_top);
    }
}

/// Iterator over every key of a table in VM order (`lua_next`). Yields the
/// absolute slots of the key and the value.
///
/// The key slot drives the traversal: it must not be modified, and a
/// numeric key must not be read as a string in place.
pub struct Pairs {
    state: LuaState,
    table: c_int,
    base_top: c_int,
    started: bool,
    done: bool,
}

impl Iterator for Pairs {
    type Item = (c_int, c_int);

    fn next(&mut self) -> Option<(c_int, c_int)> {
        if self.done {
            return None;
        }
        if self.started {
            self.state.set_top(self.base_top + 1);
        } else {
            self.state.set_top(self.base_top);
            self.state.push_nil();
            self.started = true;
        }
        if unsafe { ffi::lua_next(self.state.as_ptr(), self.table) } == 0 {
            self.done = true;
            return None;
        }
        Some((self.base_top + 1, self.base_top + 2))
    }
}

impl Drop for Pairs {
    fn drop(&mut self) {
        self.state.set_top(self.base_top);
    }
}

impl LuaState {
    /// Iterate the array part of the table at `index`. Empty for
    /// non-tables.
    pub fn ipairs(self, index: c_int) -> IPairs {
        let done = self.type_of(index) != LuaType::Table || !self.check_stack(2);
        IPairs {
            state: self,
            table: self.abs_index(index),
            base_top: self.top(),
            next: 1,
            done,
        }
    }

    /// Iterate all entries of the table at `index`. Empty for non-tables.
    pub fn pairs(self, index: c_int) -> Pairs {
        let done = self.type_of(index) != LuaType::Table || !self.check_stack(3);
        Pairs {
            state: self,
            table: self.abs_index(index),
            base_top: self.top(),
            started: false,
            done,
        }
    }
}
