//! `luabridge eval` - evaluate an inline chunk.

use luabridge::{ffi, LuaError};

use super::{print_results, SessionArgs};

pub fn execute(code: &str, session: &SessionArgs) -> anyhow::Result<()> {
    let lua = session.open()?;

    // Expressions print their value; fall back to plain statements
    match lua.load_string(&format!("return {}", code), "=eval") {
        Ok(()) => {}
        Err(LuaError::Syntax(_)) => lua.load_string(code, "=eval")?,
        Err(e) => return Err(e.into()),
    }
    lua.pcall(0, ffi::LUA_MULTRET, session.traceback)?;

    print_results(&lua, 1)
}
