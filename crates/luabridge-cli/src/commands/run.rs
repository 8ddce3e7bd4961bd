//! `luabridge run` - run a script file.

use std::fs;
use std::os::raw::c_int;

use anyhow::Context;
use luabridge::{ffi, LuaValue};

use super::SessionArgs;

pub fn execute(file: &str, args: &[String], session: &SessionArgs) -> anyhow::Result<()> {
    let source = fs::read_to_string(file).with_context(|| format!("cannot read {}", file))?;
    let lua = session.open()?;

    // arg[0] is the script, arg[1..] its arguments
    let mut arg_table = vec![LuaValue::from(file)];
    arg_table.extend(args.iter().map(|a| LuaValue::from(a.as_str())));
    lua.new_table(c_int::try_from(args.len()).unwrap_or(0), 1);
    for (i, value) in arg_table.iter().enumerate() {
        lua.push_value(value);
        lua.raw_set_index(-2, i as i64);
    }
    lua.set_global("arg");

    lua.load_string(&source, &format!("@{}", file))?;
    for value in &arg_table[1..] {
        lua.push_value(value);
    }
    tracing::debug!(file, args = args.len(), "running script");
    lua.pcall(args.len() as c_int, ffi::LUA_MULTRET, session.traceback)?;
    Ok(())
}
