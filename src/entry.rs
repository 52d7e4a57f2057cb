//! Locating the entry point of the debuggee at runtime
//!
//! The ELF header tells where execution starts relative to the executable's link address. For a
//! position independent executable the kernel maps the image at some base, which we read from
//! `/proc/<pid>/maps` with [`proc_maps`].

use std::path::Path;

use nix::unistd::Pid;
use object::{Object, ObjectKind, ObjectSegment};
use tracing::debug;

use crate::addr::Addr;
use crate::errors::{DebuggerError, Result};

const PAGE_MASK: u64 = !0xfff;

/// The entry point of `executable` inside the running process `pid`
pub fn entry_point(pid: Pid, executable: impl AsRef<Path>) -> Result<Addr> {
    let path = executable.as_ref();
    let data = std::fs::read(path)?;
    let obj = object::File::parse(&*data)?;
    let entry = obj.entry();

    if obj.kind() != ObjectKind::Dynamic {
        debug!("{} is not relocatable, entry at {entry:#x}", path.display());
        return Ok(entry.into());
    }

    let link_base = obj
        .segments()
        .map(|s| s.address())
        .min()
        .unwrap_or(0)
        & PAGE_MASK;
    let load_base = load_base(pid, path)?;
    let runtime = relocate(entry, link_base, load_base);
    debug!(
        "{} loaded at {load_base:#x}, entry at {runtime:#x}",
        path.display()
    );
    Ok(runtime.into())
}

fn relocate(entry: u64, link_base: u64, load_base: u64) -> u64 {
    entry - link_base + load_base
}

fn load_base(pid: Pid, path: &Path) -> Result<u64> {
    let wanted = std::fs::canonicalize(path)?;
    let maps = proc_maps::get_process_maps(pid.into())?;
    maps.iter()
        .filter(|m| m.offset == 0)
        .find(|m| {
            m.filename()
                .and_then(|f| std::fs::canonicalize(f).ok())
                .is_some_and(|f| f == wanted)
        })
        .map(|m| m.start() as u64)
        .ok_or(DebuggerError::NoEntryMapping)
}
