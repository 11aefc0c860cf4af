//! Platform tweaks for spawned tools.

use tokio::process::Command;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Keep console tools from flashing a window when launched from a GUI
/// process on Windows. No-op elsewhere.
#[cfg(windows)]
pub(crate) fn no_console_window(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
pub(crate) fn no_console_window(_cmd: &mut Command) {}
