//! Integration tests for table iteration
//!
//! Tests cover:
//! - `ipairs` order and termination at the first hole
//! - `pairs` over every key
//! - Stack restoration on exhaustion and on early exit

use std::collections::HashMap;

use luabridge::{Lua, LuaOptions};

fn new_lua() -> Lua {
    Lua::new(LuaOptions::default()).unwrap()
}

fn push_table(lua: &Lua, source: &str) {
    lua.load_string(&format!("return {}", source), "=table").unwrap();
    lua.pcall(0, 1, false).unwrap();
}

#[test]
fn test_ipairs_in_order() {
    let lua = new_lua();
    push_table(&lua, "{ 10, 20, 30 }");

    let mut seen = Vec::new();
    for i in lua.ipairs(1) {
        seen.push((i, lua.to_integer(-1).unwrap()));
    }
    assert_eq!(seen, vec![(1, 10), (2, 20), (3, 30)]);
    assert_eq!(lua.top(), 1);
    lua.pop(1);
}

#[test]
fn test_ipairs_stops_at_hole() {
    let lua = new_lua();
    push_table(&lua, "{ 1, 2, nil, 4 }");
    assert_eq!(lua.ipairs(-1).count(), 2);
    assert_eq!(lua.top(), 1);
    lua.pop(1);
}

#[test]
fn test_ipairs_does_not_use_metamethods() {
    let lua = new_lua();
    push_table(&lua, "setmetatable({}, { __index = function(_, i) return i end })");
    assert_eq!(lua.ipairs(-1).count(), 0);
    lua.pop(1);
}

#[test]
fn test_pairs_visits_every_key() {
    let lua = new_lua();
    push_table(&lua, "{ a = 1, b = 2, 'first' }");

    let mut seen = HashMap::new();
    for (key, value) in lua.pairs(1) {
        let key = match lua.to_value::<String>(key) {
            Some(name) => name,
            None => format!("#{}", lua.to_integer(key).unwrap()),
        };
        seen.insert(key, lua.to_any(value, true).to_string());
    }
    assert_eq!(seen.len(), 3);
    assert_eq!(seen["a"], "1");
    assert_eq!(seen["b"], "2");
    assert_eq!(seen["#1"], "\"first\"");
    assert_eq!(lua.top(), 1);
    lua.pop(1);
}

#[test]
fn test_early_exit_restores_top() {
    let lua = new_lua();
    push_table(&lua, "{ 1, 2, 3, x = 1, y = 2 }");

    for (_key, _value) in lua.pairs(-1) {
        lua.push_integer(99);
        break;
    }
    assert_eq!(lua.top(), 1);

    if let Some(i) = lua.ipairs(-1).next() {
        assert_eq!(i, 1);
        assert_eq!(lua.top(), 2);
    }
    assert_eq!(lua.top(), 1);

    let mut iter = lua.ipairs(1);
    iter.next();
    iter.next();
    drop(iter);
    assert_eq!(lua.top(), 1);
    lua.pop(1);
}

#[test]
fn test_non_tables_iterate_nothing() {
    let lua = new_lua();
    lua.push_integer(5);
    assert_eq!(lua.ipairs(-1).count(), 0);
    assert_eq!(lua.pairs(-1).count(), 0);
    assert_eq!(lua.top(), 1);
    lua.pop(1);
}
