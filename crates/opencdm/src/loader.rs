//! Dynamic loading of the vendor CDM module.
//!
//! The module is process-global: it is located, opened and initialized at
//! most once, behind a one-shot latch. Each [`crate::System`] then creates
//! its own CDM instance from the shared module.

use core::ffi::{c_char, c_int, c_void};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use libloading::Library;
use tracing::{error, info, warn};
use widevine_cdm_api::{
    CDM_INTERFACE_VERSION, CREATE_CDM_INSTANCE_SYMBOL, Cdm10, CreateCdmInstanceFn, Host10,
    INITIALIZE_CDM_MODULE_SYMBOL, InitializeCdmModuleFn,
};

use crate::instance::CdmInstance;
use crate::locate::{self, CancelToken};

pub(crate) struct CdmModule {
    create_instance: CreateCdmInstanceFn,
    // Keeps the shared library mapped for the lifetime of the process; the
    // raw entry point above is only valid while this is alive.
    _lib: Library,
}

static MODULE: OnceLock<Option<CdmModule>> = OnceLock::new();

/// The loaded module, or `None` if location/initialization failed. The first
/// caller pays for the load; the outcome is shared process-wide.
pub(crate) fn module() -> Option<&'static CdmModule> {
    MODULE
        .get_or_init(|| match load_module() {
            Ok(module) => Some(module),
            Err(e) => {
                error!(target: "opencdm::loader", "failed to load cdm module: {e:#}");
                None
            },
        })
        .as_ref()
}

#[cfg(unix)]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LAZY, RTLD_LOCAL};
    // SAFETY: loading a foreign shared library is inherently unsafe; the
    // blob is trusted by the version-10 ABI contract.
    unsafe { UnixLibrary::open(Some(path), RTLD_LAZY | RTLD_LOCAL) }.map(Into::into)
}

#[cfg(not(unix))]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    // SAFETY: see the unix variant.
    unsafe { Library::new(path) }
}

fn load_module() -> Result<CdmModule> {
    let token = CancelToken::new();
    let lib = match locate::locate_cdm(&token) {
        Some(path) => {
            info!(target: "opencdm::loader", path = %path.display(), "opening cdm module");
            open_library(&path)
                .with_context(|| format!("failed to open cdm module at {}", path.display()))?
        },
        None => {
            // Let the dynamic linker search its default paths as a last
            // resort.
            warn!(target: "opencdm::loader", "no cdm found on disk, trying `{}`", locate::CDM_BLOB);
            open_library(Path::new(locate::CDM_BLOB))
                .with_context(|| format!("failed to open `{}`", locate::CDM_BLOB))?
        },
    };

    // SAFETY: symbol types match the version-10 ABI contract.
    let initialize: InitializeCdmModuleFn = unsafe {
        *lib.get(INITIALIZE_CDM_MODULE_SYMBOL).with_context(|| {
            format!(
                "missing entry symbol `{}`",
                String::from_utf8_lossy(INITIALIZE_CDM_MODULE_SYMBOL)
            )
        })?
    };
    // SAFETY: symbol types match the version-10 ABI contract.
    let create_instance: CreateCdmInstanceFn = unsafe {
        *lib.get(CREATE_CDM_INSTANCE_SYMBOL).with_context(|| {
            format!(
                "missing entry symbol `{}`",
                String::from_utf8_lossy(CREATE_CDM_INSTANCE_SYMBOL)
            )
        })?
    };

    // Exactly once per process: we are inside the one-shot latch init.
    // SAFETY: parameterless module initializer per the ABI contract.
    unsafe { initialize() };

    Ok(CdmModule {
        create_instance,
        _lib: lib,
    })
}

/// Returns the host object iff the CDM asks for the interface version this
/// adapter speaks.
extern "C" fn get_cdm_host(interface_version: c_int, user_data: *mut c_void) -> *mut c_void {
    if interface_version == CDM_INTERFACE_VERSION {
        user_data
    } else {
        warn!(
            target: "opencdm::loader",
            "cdm requested unsupported host interface version {interface_version}"
        );
        std::ptr::null_mut()
    }
}

impl CdmModule {
    pub(crate) fn create_instance(
        &self,
        key_system: &str,
        host: *mut Host10,
    ) -> Result<CdmInstance> {
        // SAFETY: entry point is trusted by the ABI contract; the host object
        // outlives the instance (torn down only after `destroy`).
        let ptr = unsafe {
            (self.create_instance)(
                CDM_INTERFACE_VERSION,
                key_system.as_ptr() as *const c_char,
                key_system.len() as u32,
                get_cdm_host,
                host as *mut c_void,
            )
        };
        if ptr.is_null() {
            return Err(anyhow!(
                "CreateCdmInstance returned null for key system `{key_system}`"
            ));
        }
        Ok(CdmInstance::from_raw(ptr as *mut Cdm10))
    }
}
