//! Integration tests for generic value conversion
//!
//! Tests cover:
//! - Classification by `to_any` with and without type guessing
//! - Arrays, maps, sparse tables, cyclic and deeply nested tables
//! - Functions, userdata and keys nested in tables keep their identity
//! - Typed reads through `to_value`
//! - Pushing host values and `LuaValue`s

use std::collections::HashMap;
use std::rc::Rc;

use luabridge::{
    Callback, CompareOp, Lua, LuaKey, LuaOptions, LuaType, LuaValue, StringEncoding,
};

fn new_lua() -> Lua {
    Lua::new(LuaOptions::default()).unwrap()
}

/// Evaluate `expr` and leave its value on top of the stack
fn eval(lua: &Lua, expr: &str) {
    lua.load_string(&format!("return {}", expr), "=test").unwrap();
    lua.pcall(0, 1, false).unwrap();
}

#[test]
fn test_scalars() {
    let lua = new_lua();

    eval(&lua, "42");
    assert_eq!(lua.to_any(-1, true), LuaValue::Integer(42));
    eval(&lua, "3.0");
    assert!(matches!(lua.to_any(-1, true), LuaValue::Integer(3)));
    eval(&lua, "2.5");
    assert!(matches!(lua.to_any(-1, true), LuaValue::Number(n) if n == 2.5));
    eval(&lua, "true");
    assert_eq!(lua.to_any(-1, true), LuaValue::Boolean(true));
    eval(&lua, "nil");
    assert_eq!(lua.to_any(-1, true), LuaValue::Nil);
    assert_eq!(lua.to_any(10, true), LuaValue::Nil);

    lua.set_top(0);
}

#[test]
fn test_string_guessing() {
    let lua = new_lua();

    eval(&lua, "'café'");
    assert_eq!(lua.to_any(-1, true), LuaValue::String("café".to_string()));

    lua.push_string_encoded("café", StringEncoding::Latin1);
    assert_eq!(
        lua.to_any(-1, true),
        LuaValue::Bytes(vec![b'c', b'a', b'f', 0xE9])
    );

    lua.set_default_string_encoding(StringEncoding::Latin1);
    assert_eq!(lua.to_any(-1, true), LuaValue::String("café".to_string()));

    let top = lua.top();
    match lua.to_any(-1, false) {
        LuaValue::StringRef(r) => assert_eq!(r.index, top),
        other => panic!("expected a string placeholder, got {:?}", other),
    }
    lua.set_top(0);
}

#[test]
fn test_sequence_becomes_array() {
    let lua = new_lua();
    eval(&lua, "{ 'a', 'b', 'c' }");
    assert_eq!(
        lua.to_any(-1, true),
        LuaValue::Array(vec!["a".into(), "b".into(), "c".into()])
    );
    assert_eq!(lua.top(), 1);

    eval(&lua, "{}");
    assert_eq!(lua.to_any(-1, true), LuaValue::Array(Vec::new()));
    lua.set_top(0);
}

#[test]
fn test_string_keys_become_map() {
    let lua = new_lua();
    eval(&lua, "{ a = 1, b = 2 }");
    let value = lua.to_any(-1, true);
    let map = value.as_map().expect("map");
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&LuaKey::from("a")), Some(&LuaValue::Integer(1)));
    assert_eq!(map.get(&LuaKey::from("b")), Some(&LuaValue::Integer(2)));
    lua.set_top(0);
}

#[test]
fn test_sparse_keys_become_map() {
    let lua = new_lua();
    eval(&lua, "{ [1] = 'x', [2] = 'y', [4] = 'z' }");
    let value = lua.to_any(-1, true);
    let map = value.as_map().expect("sparse table converts to a map");
    assert_eq!(map.len(), 3);
    assert_eq!(map.get(&LuaKey::Integer(4)), Some(&LuaValue::from("z")));

    eval(&lua, "{ 1, 2, extra = true }");
    assert!(lua.to_any(-1, true).as_map().is_some());
    lua.set_top(0);
}

#[test]
fn test_nested_tables() {
    let lua = new_lua();
    eval(&lua, "{ 1, { 2, 3 }, { name = 'inner' } }");
    let value = lua.to_any(-1, true);
    let items = value.as_array().expect("array");
    assert_eq!(items[0], LuaValue::Integer(1));
    assert_eq!(
        items[1],
        LuaValue::Array(vec![LuaValue::Integer(2), LuaValue::Integer(3)])
    );
    assert_eq!(
        items[2].as_map().and_then(|m| m.get(&LuaKey::from("name"))),
        Some(&LuaValue::from("inner"))
    );
    assert_eq!(lua.top(), 1);
    lua.set_top(0);
}

#[test]
fn test_cyclic_table_keeps_reference() {
    let lua = new_lua();
    lua.do_string("cycle = {}; cycle.self = cycle").unwrap();
    lua.get_global("cycle");

    let value = lua.to_any(-1, true);
    let inner = value
        .as_map()
        .and_then(|m| m.get(&LuaKey::from("self")))
        .cloned()
        .expect("self entry");
    assert!(matches!(&inner, LuaValue::Anchored(anchor) if anchor.type_of() == LuaType::Table));
    assert_eq!(lua.top(), 1);

    // The reference pushes the original table back
    lua.push_value(&inner);
    assert!(lua.compare(1, 2, CompareOp::Eq).unwrap());
    lua.set_top(0);
}

#[test]
fn test_table_shared_many_times_terminates() {
    let lua = new_lua();
    lua.do_string("T = {}; T.a = T; T.b = T; T.c = { T, T }").unwrap();
    lua.get_global("T");

    let value = lua.to_any(-1, true);
    let map = value.as_map().expect("map");
    assert_eq!(map.len(), 3);
    assert_eq!(map[&LuaKey::from("a")].type_name(), "table");
    let c = map[&LuaKey::from("c")].as_array().expect("array");
    assert!(c.iter().all(|v| matches!(v, LuaValue::Anchored(_))));
    assert_eq!(lua.top(), 1);
    lua.set_top(0);
}

#[test]
fn test_deep_nesting_is_capped() {
    let lua = new_lua();
    eval(
        &lua,
        "(function() local t = {} for _ = 1, 100 do t = { t } end return t end)()",
    );

    let mut value = lua.to_any(-1, true);
    let mut depth = 0;
    while let LuaValue::Array(mut items) = value {
        value = items.pop().unwrap_or_default();
        depth += 1;
    }
    assert_eq!(value, LuaValue::Nil);
    assert_eq!(depth, luabridge::MAX_CONVERSION_DEPTH);
    assert_eq!(lua.top(), 1);
    lua.set_top(0);
}

#[test]
fn test_nested_function_round_trips() {
    let lua = new_lua();
    eval(&lua, "{ 10, function() return 7 end }");
    let value = lua.to_any(-1, true);
    lua.set_top(0);

    // Unrelated values now occupy the slot the function was read from
    eval(&lua, "{}");
    eval(&lua, "'filler'");
    eval(&lua, "{}");

    lua.push_value(&value);
    assert_eq!(lua.type_of(-1), LuaType::Table);
    lua.raw_get_index(-1, 2);
    assert_eq!(lua.type_of(-1), LuaType::Function);
    assert_eq!(lua.pcall_returning::<i64>(&[], false).unwrap(), Some(7));
    lua.set_top(0);
}

#[test]
fn test_nested_foreign_userdata_is_pinned() {
    let lua = new_lua();
    eval(&lua, "{ io.stdout }");
    let value = lua.to_any(-1, true);
    lua.set_top(0);
    lua.gc_collect();

    lua.push_value(&value);
    lua.raw_get_index(-1, 1);
    lua.get_global("io");
    lua.get_field(-1, "stdout").unwrap();
    assert!(lua.compare(-3, -1, CompareOp::Eq).unwrap());
    lua.set_top(0);
}

#[test]
fn test_registry_refs_are_per_instance() {
    let lua = new_lua();
    eval(&lua, "{ print }");
    lua.raw_get_index(-1, 1);
    let pinned = lua.anchor(-1);
    assert_eq!(pinned.type_of(), LuaType::Function);
    assert_eq!(pinned, lua.anchor(-1));
    lua.set_top(0);

    lua.push_registry_ref(&pinned);
    assert_eq!(lua.type_of(-1), LuaType::Function);
    lua.pop(1);

    let other = new_lua();
    other.push_registry_ref(&pinned);
    assert_eq!(other.type_of(-1), LuaType::Nil);
    other.pop(1);

    // Dropping a reference after its instance closed is harmless
    drop(lua);
    drop(pinned);
}

#[test]
fn test_table_keys_keep_identity_when_pushed_back() {
    let lua = new_lua();
    lua.do_string("K = {}; T = { [K] = 1, x = 2 }").unwrap();
    lua.get_global("T");
    let value = lua.to_any(-1, true);
    lua.set_top(0);

    lua.push_value(&value);
    lua.set_global("U");
    lua.load_string("return U[K], U.x", "=check").unwrap();
    lua.pcall(0, 2, false).unwrap();
    assert_eq!(lua.to_integer(1), Some(1));
    assert_eq!(lua.to_integer(2), Some(2));
    lua.set_top(0);
}

#[test]
fn test_table_keys_compare_by_identity() {
    let lua = new_lua();
    eval(&lua, "(function() local k = {}; return { [k] = 1, [{}] = 2 } end)()");
    let value = lua.to_any(-1, true);
    let map = value.as_map().expect("map");
    assert_eq!(map.len(), 2);
    for key in map.keys() {
        match key {
            LuaKey::Opaque(k) => {
                assert_ne!(k.address(), 0);
                assert_eq!(k.value(), &LuaValue::Array(Vec::new()));
            }
            other => panic!("unexpected key {:?}", other),
        }
    }
    lua.set_top(0);
}

#[test]
fn test_placeholders_without_guessing() {
    let lua = new_lua();
    eval(&lua, "{ 1, 2 }");
    assert!(matches!(lua.to_any(-1, false), LuaValue::TableRef(r) if r.index == 1));

    eval(&lua, "function() end");
    assert!(matches!(lua.to_any(-1, true), LuaValue::Ref(r) if r.index == 2));

    // io.stdout is userdata owned by the io library, not by the bridge
    eval(&lua, "io.stdout");
    assert!(matches!(lua.to_any(-1, true), LuaValue::Ref(r) if r.index == 3));

    // Pushing a placeholder copies its slot
    let table = lua.to_any(1, false);
    lua.push_value(&table);
    assert_eq!(lua.type_of(-1), LuaType::Table);
    assert_eq!(lua.raw_len(-1), 2);
    lua.set_top(0);
}

#[test]
fn test_functions() {
    let lua = new_lua();

    lua.get_global("print");
    assert!(matches!(lua.to_any(-1, true), LuaValue::CFunction(_)));

    let callback = Callback::new(|_| Ok(0));
    lua.push_callback(callback.clone());
    match lua.to_any(-1, true) {
        LuaValue::Callback(found) => assert!(found.ptr_eq(&callback)),
        other => panic!("expected a callback, got {:?}", other),
    }
    let read: Option<Callback> = lua.to_value(-1);
    assert!(read.is_some_and(|c| c.ptr_eq(&callback)));

    // A C closure with upvalues that are not bridge cells stays a reference
    eval(&lua, "coroutine.wrap(function() end)");
    assert!(matches!(lua.to_any(-1, true), LuaValue::Ref(_)));
    lua.set_top(0);
}

#[test]
fn test_threads() {
    let lua = new_lua();
    lua.do_string("co = coroutine.create(function() coroutine.yield(1) end)")
        .unwrap();
    lua.get_global("co");
    let thread = match lua.to_any(-1, true) {
        LuaValue::Thread(thread) => thread,
        other => panic!("expected a thread, got {:?}", other),
    };
    assert_eq!(thread.status(), luabridge::ffi::LUA_OK);

    lua.push_value(&LuaValue::Thread(thread));
    assert_eq!(lua.type_of(-1), LuaType::Thread);
    assert_eq!(lua.to_value::<luabridge::ThreadRef>(-1), Some(thread));
    lua.set_top(0);
}

#[test]
fn test_to_value_typed_reads() {
    let lua = new_lua();

    eval(&lua, "300");
    assert_eq!(lua.to_value::<i64>(-1), Some(300));
    assert_eq!(lua.to_value::<u16>(-1), Some(300));
    assert_eq!(lua.to_value::<i8>(-1), None);
    assert_eq!(lua.to_value::<f64>(-1), Some(300.0));
    assert_eq!(lua.to_value::<String>(-1), None);
    assert_eq!(lua.to_value::<bool>(-1), None);

    eval(&lua, "-1");
    assert_eq!(lua.to_value::<u32>(-1), None);

    eval(&lua, "'text'");
    assert_eq!(lua.to_value::<String>(-1), Some("text".to_string()));
    assert_eq!(lua.to_value::<Vec<u8>>(-1), Some(b"text".to_vec()));
    assert_eq!(lua.to_value::<Vec<i64>>(-1), None);

    eval(&lua, "nil");
    assert_eq!(lua.to_value::<Option<i64>>(-1), Some(None));
    assert_eq!(lua.to_value::<i64>(-1), None);

    assert_eq!(lua.top(), 4);
    lua.set_top(0);
}

#[test]
fn test_to_value_tables() {
    let lua = new_lua();

    eval(&lua, "{ 1, 2, 3 }");
    assert_eq!(lua.to_value::<Vec<i64>>(-1), Some(vec![1, 2, 3]));
    assert_eq!(lua.to_value::<Vec<u8>>(-1), Some(vec![1, 2, 3]));
    assert_eq!(lua.to_value::<Vec<String>>(-1), None);

    eval(&lua, "{ 1, 2, nil, 4 }");
    assert_eq!(lua.to_value::<Vec<i64>>(-1), None);

    eval(&lua, "{ a = 1, b = 2 }");
    let map: HashMap<String, i64> = lua.to_value(-1).unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["a"], 1);
    assert_eq!(map["b"], 2);
    assert_eq!(lua.to_value::<HashMap<String, bool>>(-1), None);

    eval(&lua, "{ { 1 }, { 2, 3 } }");
    assert_eq!(
        lua.to_value::<Vec<Vec<i32>>>(-1),
        Some(vec![vec![1], vec![2, 3]])
    );

    assert_eq!(lua.top(), 4);
    lua.set_top(0);
}

#[test]
fn test_to_value_never_moves_the_top() {
    let lua = new_lua();
    eval(&lua, "{ 1, { 2 }, x = { y = 'z' } }");
    let before = lua.top();
    let _ = lua.to_value::<Vec<i64>>(-1);
    let _ = lua.to_value::<HashMap<String, i64>>(-1);
    let _ = lua.to_value::<LuaValue>(-1);
    let _ = lua.to_value::<Option<String>>(-1);
    let _ = lua.to_value::<Rc<String>>(-1);
    assert_eq!(lua.top(), before);
    lua.set_top(0);
}

#[test]
fn test_push_value_tables() {
    let lua = new_lua();

    let mut map = HashMap::new();
    map.insert(LuaKey::from("a"), LuaValue::Integer(1));
    map.insert(LuaKey::from("b"), LuaValue::Integer(2));
    lua.push_value(&LuaValue::Map(map));
    let read: HashMap<String, i64> = lua.to_value(-1).unwrap();
    assert_eq!(read.get("a"), Some(&1));
    assert_eq!(read.get("b"), Some(&2));

    lua.push_value(&LuaValue::Array(vec![10.into(), "x".into(), true.into()]));
    assert_eq!(lua.raw_len(-1), 3);
    assert_eq!(
        lua.to_any(-1, true),
        LuaValue::Array(vec![10.into(), "x".into(), true.into()])
    );
    lua.set_top(0);
}

#[test]
fn test_push_value_whole_numbers_become_integers() {
    let lua = new_lua();
    lua.push_value(&LuaValue::Number(3.0));
    assert!(lua.is_integer(-1));
    lua.push_value(&LuaValue::Number(3.5));
    assert!(!lua.is_integer(-1));
    lua.push_value(&LuaValue::Number(1e300));
    assert!(!lua.is_integer(-1));
    lua.set_top(0);
}

#[test]
fn test_push_any() {
    let lua = new_lua();

    lua.push_any(5i32);
    assert_eq!(lua.type_of(-1), LuaType::Number);
    lua.push_any("hi");
    assert_eq!(lua.to_string(-1), Some("hi".to_string()));
    lua.push_any(String::from("owned"));
    assert_eq!(lua.type_of(-1), LuaType::String);
    lua.push_any(vec![1u8, 2]);
    assert_eq!(lua.to_bytes(-1), Some(vec![1, 2]));
    lua.push_any(());
    assert_eq!(lua.type_of(-1), LuaType::Nil);
    lua.push_any(LuaValue::Boolean(true));
    assert_eq!(lua.type_of(-1), LuaType::Boolean);

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
    }
    lua.push_any(Point { x: 9 });
    assert_eq!(lua.type_of(-1), LuaType::Userdata);
    assert_eq!(lua.to_userdata::<Point>(-1).map(|p| p.x), Some(9));
    lua.set_top(0);
}

#[test]
fn test_push_any_sequences_and_mappings() {
    let lua = new_lua();

    lua.push_any(vec![1i64, 2, 3]);
    assert_eq!(lua.type_of(-1), LuaType::Table);
    assert_eq!(lua.to_value::<Vec<i64>>(-1), Some(vec![1, 2, 3]));

    lua.push_any(vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        lua.to_value::<Vec<String>>(-1),
        Some(vec!["a".to_string(), "b".to_string()])
    );

    let mut scores = HashMap::new();
    scores.insert("alice".to_string(), 3i64);
    scores.insert("bob".to_string(), 5i64);
    lua.push_any(scores.clone());
    assert_eq!(lua.type_of(-1), LuaType::Table);
    assert_eq!(lua.to_value::<HashMap<String, i64>>(-1), Some(scores));

    let mut nested = HashMap::new();
    nested.insert(
        LuaKey::from("list"),
        LuaValue::Array(vec![LuaValue::Integer(1), LuaValue::from("x")]),
    );
    nested.insert(LuaKey::Number(f64::NAN), LuaValue::Integer(0));
    lua.push_any(nested);
    let value = lua.to_any(-1, true);
    let map = value.as_map().expect("map");
    assert_eq!(map.len(), 1);
    assert_eq!(
        map[&LuaKey::from("list")],
        LuaValue::Array(vec![LuaValue::Integer(1), LuaValue::from("x")])
    );

    lua.push_any(Vec::<LuaValue>::new());
    assert_eq!(lua.to_any(-1, true), LuaValue::Array(Vec::new()));
    lua.set_top(0);
}

#[test]
fn test_large_unsigned_values() {
    let lua = new_lua();
    let big: u64 = 1 << 63;
    lua.push(&big);
    assert!(!lua.is_integer(-1));
    assert_eq!(lua.to_value::<u64>(-1), Some(big));
    assert_eq!(lua.to_value::<i64>(-1), None);

    lua.push(&7u64);
    assert_eq!(lua.to_value::<u64>(-1), Some(7));
    lua.set_top(0);
}
