//! Instance configuration: library selection, encodings, collector mode

use std::ffi::CStr;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use mlua_sys as ffi;

use crate::encoding::StringEncoding;

/// Set of standard library groups opened when an instance is created
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Libraries(u16);

impl Libraries {
    /// No libraries at all
    pub const NONE: Libraries = Libraries(0);
    /// Basic functions (`print`, `pairs`, `error`, ...), opened as `_G`
    pub const BASE: Libraries = Libraries(1 << 0);
    /// `package` / `require`
    pub const PACKAGE: Libraries = Libraries(1 << 1);
    /// `coroutine`
    pub const COROUTINE: Libraries = Libraries(1 << 2);
    /// `table`
    pub const TABLE: Libraries = Libraries(1 << 3);
    /// `io`
    pub const IO: Libraries = Libraries(1 << 4);
    /// `os`
    pub const OS: Libraries = Libraries(1 << 5);
    /// `string`
    pub const STRING: Libraries = Libraries(1 << 6);
    /// `math`
    pub const MATH: Libraries = Libraries(1 << 7);
    /// `utf8`
    pub const UTF8: Libraries = Libraries(1 << 8);
    /// `debug`
    pub const DEBUG: Libraries = Libraries(1 << 9);

    /// Every library
    pub const ALL: Libraries = Libraries(0x3FF);
    /// Libraries without file, process or introspection access
    pub const SAFE: Libraries = Libraries(
        Self::BASE.0 | Self::COROUTINE.0 | Self::TABLE.0 | Self::STRING.0 | Self::MATH.0 | Self::UTF8.0,
    );

    /// Check whether every group in `other` is selected
    pub const fn contains(self, other: Libraries) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether nothing is selected
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Look up a single group by its Lua global name (`"base"` is accepted
    /// for the basic library)
    pub fn from_name(name: &str) -> Option<Libraries> {
        LIBRARY_TABLE
            .iter()
            .find(|lib| lib.name == name || (lib.flag == Self::BASE && name == "base"))
            .map(|lib| lib.flag)
    }

    /// Parse a comma separated list such as `"base,string,math"`. `"all"`
    /// and `"safe"` select the predefined sets.
    pub fn parse_list(list: &str) -> Result<Libraries, String> {
        let mut libs = Libraries::NONE;
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            libs |= match name {
                "all" => Libraries::ALL,
                "safe" => Libraries::SAFE,
                other => Libraries::from_name(other)
                    .ok_or_else(|| format!("unknown library '{}'", other))?,
            };
        }
        Ok(libs)
    }

    pub(crate) fn entries(self) -> impl Iterator<Item = &'static LibraryEntry> {
        LIBRARY_TABLE.iter().filter(move |lib| self.contains(lib.flag))
    }
}

impl BitOr for Libraries {
    type Output = Libraries;

    fn bitor(self, rhs: Libraries) -> Libraries {
        Libraries(self.0 | rhs.0)
    }
}

impl BitOrAssign for Libraries {
    fn bitor_assign(&mut self, rhs: Libraries) {
        self.0 |= rhs.0;
    }
}

impl Default for Libraries {
    fn default() -> Self {
        Libraries::ALL
    }
}

impl fmt::Debug for Libraries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.entries().map(|lib| lib.name).collect();
        write!(f, "Libraries({})", names.join(", "))
    }
}

pub(crate) struct LibraryEntry {
    pub(crate) flag: Libraries,
    pub(crate) name: &'static str,
    pub(crate) module: &'static CStr,
    pub(crate) open: ffi::lua_CFunction,
}

static LIBRARY_TABLE: [LibraryEntry; 10] = [
    LibraryEntry { flag: Libraries::BASE, name: "_G", module: c"_G", open: ffi::luaopen_base },
    LibraryEntry { flag: Libraries::PACKAGE, name: "package", module: c"package", open: ffi::luaopen_package },
    LibraryEntry { flag: Libraries::COROUTINE, name: "coroutine", module: c"coroutine", open: ffi::luaopen_coroutine },
    LibraryEntry { flag: Libraries::TABLE, name: "table", module: c"table", open: ffi::luaopen_table },
    LibraryEntry { flag: Libraries::IO, name: "io", module: c"io", open: ffi::luaopen_io },
    LibraryEntry { flag: Libraries::OS, name: "os", module: c"os", open: ffi::luaopen_os },
    LibraryEntry { flag: Libraries::STRING, name: "string", module: c"string", open: ffi::luaopen_string },
    LibraryEntry { flag: Libraries::MATH, name: "math", module: c"math", open: ffi::luaopen_math },
    LibraryEntry { flag: Libraries::UTF8, name: "utf8", module: c"utf8", open: ffi::luaopen_utf8 },
    LibraryEntry { flag: Libraries::DEBUG, name: "debug", module: c"debug", open: ffi::luaopen_debug },
];

/// Collector operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    /// Incremental mode. Zero leaves a parameter unchanged.
    Incremental {
        /// Pause between cycles, in percent
        pause: i32,
        /// Speed of the collector relative to allocation, in percent
        step_multiplier: i32,
        /// Log2 of the step size in bytes
        step_size: i32,
    },
    /// Generational mode. Zero leaves a parameter unchanged.
    Generational {
        /// Frequency of minor collections, in percent
        minor_multiplier: i32,
        /// Threshold for major collections, in percent
        major_multiplier: i32,
    },
}

impl GcMode {
    /// Incremental mode with the VM's default parameters
    pub const fn incremental() -> Self {
        GcMode::Incremental {
            pause: 0,
            step_multiplier: 0,
            step_size: 0,
        }
    }

    /// Generational mode with the VM's default parameters
    pub const fn generational() -> Self {
        GcMode::Generational {
            minor_multiplier: 0,
            major_multiplier: 0,
        }
    }
}

/// Options for creating a [`Lua`](crate::Lua) instance
#[derive(Debug, Clone)]
pub struct LuaOptions {
    /// Standard library groups to open
    pub libraries: Libraries,

    /// Encoding used when reading and writing text without an explicit one
    pub default_encoding: StringEncoding,

    /// Collector mode to switch to after creation; `None` keeps the VM default
    pub gc_mode: Option<GcMode>,
}

impl Default for LuaOptions {
    fn default() -> Self {
        Self {
            libraries: Libraries::ALL,
            default_encoding: StringEncoding::Utf8,
            gc_mode: None,
        }
    }
}

impl LuaOptions {
    /// Options with only the given libraries opened
    pub fn with_libraries(libraries: Libraries) -> Self {
        Self {
            libraries,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_sets() {
        assert!(Libraries::ALL.contains(Libraries::IO));
        assert!(!Libraries::SAFE.contains(Libraries::IO));
        assert!(Libraries::SAFE.contains(Libraries::STRING | Libraries::MATH));
        assert!(Libraries::NONE.is_empty());
        assert_eq!(Libraries::ALL.entries().count(), 10);
    }

    #[test]
    fn test_parse_list() {
        let libs = Libraries::parse_list("base, string,math").unwrap();
        assert!(libs.contains(Libraries::BASE));
        assert!(libs.contains(Libraries::STRING));
        assert!(!libs.contains(Libraries::TABLE));
        assert_eq!(Libraries::parse_list("safe").unwrap(), Libraries::SAFE);
        assert!(Libraries::parse_list("base,sockets").is_err());
    }

    #[test]
    fn test_default_options() {
        let options = LuaOptions::default();
        assert_eq!(options.libraries, Libraries::ALL);
        assert_eq!(options.default_encoding, StringEncoding::Utf8);
        assert!(options.gc_mode.is_none());
    }
}
