//! Dynamic library loading
//!
//! Cross-platform loading of shared libraries via `libloading`, with
//! platform-specific naming conventions and search paths. A loaded
//! library resolves symbols to raw addresses; absence of a symbol is an
//! ordinary outcome (`None`), not an error.
//!
//! The platform's error text is latched per thread: read [`last_error`]
//! immediately after a failed operation, before issuing another loader
//! call on the same thread.

use crate::config::LoaderConfig;
use libloading::Library;
use std::cell::RefCell;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable prepended to the search path list, in the format
/// of the platform's `PATH` variable.
pub const LIB_PATH_VAR: &str = "VIADUCT_LIB_PATH";

/// Library loading errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    /// No candidate file was found and the platform loader did not know
    /// the name either
    #[error("library not found: {0}")]
    NotFound(String),
    /// A candidate existed but the platform loader rejected it
    #[error("failed to load library '{name}': {detail}")]
    LoadFailed { name: String, detail: String },
    /// Required symbol missing from a loaded library
    #[error("symbol '{symbol}' not found in library '{library}'")]
    SymbolNotFound { library: String, symbol: String },
}

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn record_error(message: String) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Best-effort text of the most recent loader failure on this thread.
///
/// Overwritten by the next loader operation on the same thread; callers
/// must read it immediately after the failing call. This is the single
/// interface absorbing the dlerror/GetLastError platform difference.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Address of an exported entry point inside a loaded library.
///
/// Carries no ownership; validity ends with the owning
/// [`NativeLibrary`]'s lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolAddress(usize);

impl SymbolAddress {
    /// Wrap a raw address. Inert until invoked through a matching call
    /// interface; the caller vouches for where it came from.
    pub fn from_raw(addr: usize) -> Self {
        SymbolAddress(addr)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.0 as *const c_void
    }
}

/// Resolves library names to files and opens them.
///
/// Search order: caller-added paths, `VIADUCT_LIB_PATH` entries, the
/// current directory, then platform default locations. Names are tried
/// with the platform's prefix/extension matrix (`lib{name}.so`,
/// `{name}.dll`, ...). When nothing matches, the bare name is handed to
/// the platform loader so its own search (ld cache, `PATH`) gets a say.
pub struct NativeLoader {
    search_paths: Vec<PathBuf>,
    system_fallback: bool,
}

impl NativeLoader {
    /// Create a loader with default search paths and the environment
    /// override applied.
    pub fn new() -> Self {
        Self::with_config(&LoaderConfig::default())
    }

    /// Create a loader from an explicit configuration. Config paths rank
    /// above the defaults; the environment override ranks above both.
    pub fn with_config(config: &LoaderConfig) -> Self {
        let mut search_paths = Vec::new();
        if let Ok(env_paths) = std::env::var(LIB_PATH_VAR) {
            search_paths.extend(std::env::split_paths(&env_paths));
        }
        search_paths.extend(config.search_paths.iter().cloned());
        search_paths.extend(Self::default_search_paths());
        Self {
            search_paths,
            system_fallback: config.system_fallback,
        }
    }

    /// Platform default library locations, current directory first.
    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(target_os = "linux")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/lib"));

            if cfg!(target_pointer_width = "64") {
                paths.push(PathBuf::from("/usr/lib64"));
                paths.push(PathBuf::from("/lib64"));
            }
            #[cfg(target_arch = "x86_64")]
            {
                paths.push(PathBuf::from("/usr/lib/x86_64-linux-gnu"));
                paths.push(PathBuf::from("/lib/x86_64-linux-gnu"));
            }
            #[cfg(target_arch = "aarch64")]
            {
                paths.push(PathBuf::from("/usr/lib/aarch64-linux-gnu"));
                paths.push(PathBuf::from("/lib/aarch64-linux-gnu"));
            }
        }

        #[cfg(target_os = "macos")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/opt/homebrew/lib"));
        }

        #[cfg(target_os = "windows")]
        {
            paths.push(PathBuf::from("C:\\Windows\\System32"));
            if let Ok(system_root) = std::env::var("SystemRoot") {
                paths.push(PathBuf::from(format!("{}\\System32", system_root)));
            }
        }

        if let Ok(cwd) = std::env::current_dir() {
            paths.insert(0, cwd);
        }

        paths
    }

    /// Resolve a library name to an existing file using the platform
    /// naming matrix, or pass an absolute/relative path through if it
    /// exists.
    fn resolve_library_path(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if (path.is_absolute() || name.contains(std::path::MAIN_SEPARATOR)) && path.exists() {
            return Some(path.to_path_buf());
        }

        let extensions: &[&str] = if cfg!(target_os = "windows") {
            &["dll"]
        } else if cfg!(target_os = "macos") {
            &["dylib", "so"]
        } else {
            &["so"]
        };

        let prefixes: &[&str] = if cfg!(target_os = "windows") {
            &["", "lib"]
        } else {
            &["lib", ""]
        };

        for search_path in &self.search_paths {
            // Exact filename (covers versioned names like libfoo.so.4)
            let exact = search_path.join(name);
            if exact.is_file() {
                return Some(exact);
            }

            for prefix in prefixes {
                for ext in extensions {
                    let filename = format!("{}{}.{}", prefix, name, ext);
                    let full_path = search_path.join(&filename);
                    if full_path.is_file() {
                        return Some(full_path);
                    }
                }
            }
        }

        None
    }

    /// Prepend a custom search path.
    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.insert(0, path);
    }

    /// Open a library by name or path.
    ///
    /// The returned handle owns the mapping; drop or [`NativeLibrary::close`]
    /// unloads it. Ownership makes double-close unrepresentable, but any
    /// [`SymbolAddress`] resolved from the handle dies with it.
    ///
    /// # Safety
    ///
    /// Loading runs the library's initializers in-process; the caller must
    /// trust the library. The call itself is safe to issue.
    pub fn open(&self, name: &str) -> Result<NativeLibrary, LoadError> {
        if let Some(path) = self.resolve_library_path(name) {
            return match unsafe { Library::new(&path) } {
                Ok(library) => Ok(NativeLibrary {
                    library,
                    name: name.to_string(),
                }),
                Err(e) => {
                    let detail = e.to_string();
                    record_error(detail.clone());
                    Err(LoadError::LoadFailed {
                        name: name.to_string(),
                        detail,
                    })
                }
            };
        }

        if self.system_fallback {
            // No candidate file of ours; let the platform loader search.
            match unsafe { Library::new(name) } {
                Ok(library) => {
                    return Ok(NativeLibrary {
                        library,
                        name: name.to_string(),
                    })
                }
                Err(e) => record_error(e.to_string()),
            }
        } else {
            record_error(format!("no candidate file found for '{}'", name));
        }

        Err(LoadError::NotFound(name.to_string()))
    }
}

impl Default for NativeLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// An opened dynamic library.
///
/// Safe to share across threads for read-only symbol resolution; opening
/// and closing are caller-serialized.
#[derive(Debug)]
pub struct NativeLibrary {
    library: Library,
    name: String,
}

impl NativeLibrary {
    /// Resolve an exported symbol to its address.
    ///
    /// Absence is `None`, not an error — callers distinguish a missing
    /// optional entry point from a load failure by the nullity alone.
    pub fn resolve(&self, symbol: &str) -> Option<SymbolAddress> {
        let result = unsafe {
            self.library
                .get::<unsafe extern "C" fn()>(symbol.as_bytes())
        };
        match result {
            Ok(sym) => Some(SymbolAddress(*sym as usize)),
            Err(e) => {
                record_error(e.to_string());
                None
            }
        }
    }

    /// Resolve a symbol that must exist.
    pub fn require(&self, symbol: &str) -> Result<SymbolAddress, LoadError> {
        self.resolve(symbol).ok_or_else(|| LoadError::SymbolNotFound {
            library: self.name.clone(),
            symbol: symbol.to_string(),
        })
    }

    /// The name or path this library was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Explicitly unload the library. Consuming `self` means a handle can
    /// be closed at most once; every `SymbolAddress` resolved from it is
    /// dead from here on.
    pub fn close(self) -> Result<(), LoadError> {
        let name = self.name;
        self.library.close().map_err(|e| {
            let detail = e.to_string();
            record_error(detail.clone());
            LoadError::LoadFailed { name, detail }
        })
    }
}
