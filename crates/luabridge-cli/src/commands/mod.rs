//! Subcommand implementations and the options they share

pub mod eval;
pub mod run;

use anyhow::anyhow;
use clap::Args;
use luabridge::{GcMode, Libraries, Lua, LuaOptions, LuaValue, StringEncoding};

/// Options for creating the Lua instance
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Standard libraries to open: comma separated names, `all` or `safe`
    #[arg(long, default_value = "all")]
    pub libs: String,

    /// Append a stack traceback to error messages
    #[arg(long)]
    pub traceback: bool,

    /// Default string encoding (utf-8, latin-1, ascii)
    #[arg(long, default_value = "utf-8")]
    pub encoding: String,

    /// Collector mode (incremental, generational)
    #[arg(long)]
    pub gc: Option<String>,
}

impl SessionArgs {
    pub fn options(&self) -> anyhow::Result<LuaOptions> {
        let libraries = Libraries::parse_list(&self.libs).map_err(|e| anyhow!(e))?;
        let default_encoding = StringEncoding::from_name(&self.encoding)
            .ok_or_else(|| anyhow!("unknown encoding '{}'", self.encoding))?;
        let gc_mode = match self.gc.as_deref() {
            None => None,
            Some("incremental") => Some(GcMode::incremental()),
            Some("generational") => Some(GcMode::generational()),
            Some(other) => anyhow::bail!("unknown collector mode '{}'", other),
        };
        Ok(LuaOptions {
            libraries,
            default_encoding,
            gc_mode,
        })
    }

    pub fn open(&self) -> anyhow::Result<Lua> {
        let lua = Lua::new(self.options()?)?;
        tracing::debug!(libs = %self.libs, encoding = %self.encoding, "session opened");
        Ok(lua)
    }
}

/// Print every value from slot `first` to the top, one per line
pub fn print_results(lua: &Lua, first: i32) -> anyhow::Result<()> {
    for index in first..=lua.top() {
        let text = match lua.to_any(index, true) {
            LuaValue::Ref(_) => lua.to_string_meta(index)?,
            value => value.to_string(),
        };
        println!("{}", text);
    }
    Ok(())
}
