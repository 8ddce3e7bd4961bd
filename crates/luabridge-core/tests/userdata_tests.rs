//! Integration tests for opaque object binding and metatable registration
//!
//! Tests cover:
//! - Cells released by the collector and by closing the instance
//! - Typed retrieval and type mismatches
//! - Registered, default and implicit metatables
//! - Name collisions between distinct types
//! - Registration misuse

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use luabridge::{
    Callback, Lua, LuaOptions, LuaType, LuaValue, MetaFunction, MetaMethod, TypeKey,
    DEFAULT_METATABLE_NAME, TYPE_METATABLE_PREFIX,
};

fn new_lua() -> Lua {
    Lua::new(LuaOptions::default()).unwrap()
}

fn key_of<T: Any>(_: &T) -> TypeKey {
    TypeKey::of::<T>()
}

#[derive(Debug)]
struct Counter {
    value: Cell<i64>,
}

impl Counter {
    fn new(value: i64) -> Self {
        Counter {
            value: Cell::new(value),
        }
    }
}

fn counter_methods() -> Vec<(MetaMethod, MetaFunction)> {
    vec![
        (
            MetaMethod::from("get"),
            MetaFunction::Closure(Callback::new(|state| {
                let counter = state.check_argument::<Rc<Counter>>(1)?;
                state.push_integer(counter.value.get());
                Ok(1)
            })),
        ),
        (
            MetaMethod::from("bump"),
            MetaFunction::Closure(Callback::new(|state| {
                let counter = state.check_argument::<Rc<Counter>>(1)?;
                let by = state.check_argument::<Option<i64>>(2)?.unwrap_or(1);
                counter.value.set(counter.value.get() + by);
                Ok(0)
            })),
        ),
        (
            MetaMethod::ToString,
            MetaFunction::Closure(Callback::new(|state| {
                let counter = state.check_argument::<Rc<Counter>>(1)?;
                state.push_string(&format!("Counter({})", counter.value.get()));
                Ok(1)
            })),
        ),
    ]
}

#[test]
fn test_collector_releases_cell() {
    let lua = new_lua();
    let shared = Rc::new(Counter::new(1));

    lua.push_userdata_shared(Rc::clone(&shared));
    assert_eq!(Rc::strong_count(&shared), 2);
    assert_eq!(lua.type_of(-1), LuaType::Userdata);

    lua.pop(1);
    lua.gc_collect();
    assert_eq!(Rc::strong_count(&shared), 1);
}

#[test]
fn test_close_releases_cells() {
    let shared = Rc::new(Counter::new(1));
    {
        let lua = new_lua();
        lua.push_userdata_shared(Rc::clone(&shared));
        lua.set_global("kept");
        lua.push_userdata_shared(Rc::clone(&shared));
        assert_eq!(Rc::strong_count(&shared), 3);
        lua.close();
    }
    assert_eq!(Rc::strong_count(&shared), 1);
}

#[test]
fn test_manual_gc_call_releases_once() {
    let lua = new_lua();
    let shared = Rc::new(Counter::new(1));
    lua.push_userdata_shared(Rc::clone(&shared));
    lua.set_global("obj");

    lua.do_string("getmetatable(obj).__gc(obj); getmetatable(obj).__gc(obj)")
        .unwrap();
    assert_eq!(Rc::strong_count(&shared), 1);

    lua.get_global("obj");
    assert!(lua.to_userdata::<Counter>(-1).is_none());
    lua.pop(1);

    drop(lua);
    assert_eq!(Rc::strong_count(&shared), 1);
}

#[test]
fn test_by_value_binding() {
    let lua = new_lua();
    lua.push_userdata(Counter::new(5));

    let first = lua.to_userdata::<Counter>(-1).unwrap();
    let second = lua.to_userdata::<Counter>(-1).unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    first.value.set(6);
    assert_eq!(second.value.get(), 6);

    assert!(lua.to_userdata::<String>(-1).is_none());
    match lua.to_any(-1, true) {
        LuaValue::Userdata(opaque) => assert!(opaque.is::<Counter>()),
        other => panic!("expected userdata, got {:?}", other),
    }
    lua.pop(1);
}

#[test]
fn test_userdata_round_trips_through_push_value() {
    let lua = new_lua();
    let shared = Rc::new(Counter::new(3));
    lua.push_userdata_shared(Rc::clone(&shared));
    let value = lua.to_any(-1, true);
    lua.push_value(&value);

    let again = lua.to_userdata::<Counter>(-1).unwrap();
    assert!(Rc::ptr_eq(&again, &shared));
    drop(again);
    drop(value);

    lua.pop(2);
    lua.gc_collect();
    assert_eq!(Rc::strong_count(&shared), 1);
}

#[test]
fn test_foreign_userdata_is_not_a_cell() {
    let lua = new_lua();
    unsafe {
        luabridge::ffi::lua_newuserdatauv(lua.as_ptr(), 16, 0);
    }
    assert!(lua.to_userdata::<Counter>(-1).is_none());
    assert!(lua.to_opaque(-1).is_none());
    assert!(matches!(lua.to_any(-1, true), LuaValue::Ref(_)));
    lua.pop(1);

    // A table with the same name as a bridge metatable does not make a cell
    lua.do_string("fake = setmetatable({}, { __name = 'luabridge.type:fake' })")
        .unwrap();
    lua.get_global("fake");
    assert!(lua.to_opaque(-1).is_none());
    lua.pop(1);
}

#[test]
fn test_foreign_userdata_with_bridge_metatable_is_not_a_cell() {
    let lua = new_lua();
    lua.register_metatable::<Counter>(counter_methods());
    lua.push_userdata(Counter::new(4));
    lua.set_global("c");

    lua.do_string(
        "debug.setmetatable(io.stdout, getmetatable(c))\n\
         getmetatable(io.stdout).__gc(io.stdout)",
    )
    .unwrap();

    lua.get_global("io");
    lua.get_field(-1, "stdout").unwrap();
    assert!(lua.to_opaque(-1).is_none());
    assert!(lua.to_userdata::<Counter>(-1).is_none());
    assert!(matches!(lua.to_any(-1, true), LuaValue::Ref(_)));
    lua.pop(2);

    let err = lua.do_string("io.stdout:get()").unwrap_err();
    assert!(err.to_string().contains("bad argument #1"), "{}", err);

    lua.load_string("return c:get()", "=check").unwrap();
    assert_eq!(lua.pcall_returning::<i64>(&[], false).unwrap(), Some(4));
}

#[test]
fn test_registered_methods() {
    let lua = new_lua();
    lua.register_metatable::<Counter>(counter_methods());
    assert!(lua.is_metatable_registered::<Counter>());

    let shared = Rc::new(Counter::new(10));
    lua.push_userdata_shared(Rc::clone(&shared));
    lua.set_global("counter");

    lua.do_string("counter:bump(); counter:bump(5); result = counter:get(); text = tostring(counter)")
        .unwrap();
    assert_eq!(shared.value.get(), 16);

    lua.get_global("result");
    assert_eq!(lua.to_value::<i64>(-1), Some(16));
    lua.get_global("text");
    assert_eq!(lua.to_value::<String>(-1), Some("Counter(16)".to_string()));
    lua.pop(2);
}

#[test]
fn test_method_argument_errors() {
    let lua = new_lua();
    lua.register_metatable::<Counter>(counter_methods());
    lua.push_userdata(Counter::new(0));
    lua.set_global("counter");

    let err = lua.do_string("counter.get(42)").unwrap_err();
    assert!(
        err.to_string().contains("bad argument #1 (userdata expected, got number)"),
        "unexpected message: {}",
        err
    );
}

#[test]
fn test_type_name_comes_from_metatable() {
    let lua = new_lua();
    lua.push_userdata(Counter::new(0));
    let name = lua.type_name(-1);
    assert!(name.starts_with(TYPE_METATABLE_PREFIX));
    assert_eq!(name, lua.metatable_name::<Counter>());
    lua.pop(1);
}

#[test]
fn test_default_metatable() {
    let lua = new_lua();
    lua.register_default_metatable(vec![(
        MetaMethod::ToString,
        MetaFunction::Closure(Callback::new(|state| {
            state.push_string("opaque value");
            Ok(1)
        })),
    )]);

    lua.push_userdata(7u8);
    assert_eq!(lua.type_name(-1), DEFAULT_METATABLE_NAME);
    assert_eq!(lua.to_string_meta(-1).unwrap(), "opaque value");
    lua.pop(1);

    // Still reclaimed through the default table
    let shared = Rc::new(Counter::new(0));
    lua.push_userdata_shared(Rc::clone(&shared));
    lua.pop(1);
    lua.gc_collect();
    assert_eq!(Rc::strong_count(&shared), 1);
}

#[test]
fn test_implicit_metatable_still_reclaims() {
    let lua = new_lua();
    struct Unregistered(Rc<Cell<bool>>);
    impl Drop for Unregistered {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    let dropped = Rc::new(Cell::new(false));
    lua.push_userdata(Unregistered(Rc::clone(&dropped)));
    assert!(lua.is_metatable_registered::<Unregistered>());
    lua.pop(1);
    lua.gc_collect();
    assert!(dropped.get());
}

#[test]
fn test_identical_type_names_get_distinct_metatables() {
    let lua = new_lua();
    let first = || 1;
    let second = || 2;
    let first_key = key_of(&first);
    let second_key = key_of(&second);
    assert_eq!(first_key.name(), second_key.name());
    assert_ne!(first_key, second_key);

    lua.register_metatable_for(
        first_key,
        vec![(
            MetaMethod::ToString,
            MetaFunction::Closure(Callback::new(|state| {
                state.push_string("first");
                Ok(1)
            })),
        )],
    );
    lua.register_metatable_for(
        second_key,
        vec![(
            MetaMethod::ToString,
            MetaFunction::Closure(Callback::new(|state| {
                state.push_string("second");
                Ok(1)
            })),
        )],
    );

    let base = format!("{}{}", TYPE_METATABLE_PREFIX, first_key.name());
    assert_eq!(lua.metatable_name_for(first_key), base);
    assert_eq!(lua.metatable_name_for(second_key), format!("{}#2", base));

    lua.push_userdata(first);
    lua.push_userdata(second);
    assert_eq!(lua.to_string_meta(-2).unwrap(), "first");
    assert_eq!(lua.to_string_meta(-1).unwrap(), "second");
    lua.pop(2);
}

#[test]
fn test_custom_c_function_entry() {
    unsafe extern "C-unwind" fn always_seven(l: *mut luabridge::ffi::lua_State) -> std::os::raw::c_int {
        luabridge::ffi::lua_pushinteger(l, 7);
        1
    }

    let lua = new_lua();
    lua.register_metatable::<Counter>(vec![(
        MetaMethod::Len,
        MetaFunction::Function(always_seven),
    )]);
    lua.push_userdata(Counter::new(0));
    lua.set_global("c");
    lua.do_string("n = #c").unwrap();
    lua.get_global("n");
    assert_eq!(lua.to_integer(-1), Some(7));
    lua.pop(1);
}

#[test]
#[should_panic(expected = "already registered")]
fn test_duplicate_registration_panics() {
    let lua = new_lua();
    lua.register_metatable::<Counter>(Vec::new());
    lua.register_metatable::<Counter>(Vec::new());
}

#[test]
#[should_panic(expected = "already registered")]
fn test_registration_after_implicit_use_panics() {
    let lua = new_lua();
    lua.push_userdata(Counter::new(0));
    lua.register_metatable::<Counter>(Vec::new());
}

#[test]
#[should_panic(expected = "__gc")]
fn test_custom_gc_is_rejected() {
    let lua = new_lua();
    lua.register_metatable::<Counter>(vec![(
        MetaMethod::from("__gc"),
        MetaFunction::Closure(Callback::new(|_| Ok(0))),
    )]);
}
