use nix::sys::utsname::uname;

use crate::timespec::str_realtime;

/// True when the kernel's `uname` sysname equals `target`, ignoring case.
pub fn compare_sysname(target: &str) -> bool {
    match uname() {
        Ok(info) => info.sysname().to_string_lossy().eq_ignore_ascii_case(target),
        Err(e) => {
            tracing::trace!("uname failed: {}", e);
            false
        }
    }
}

/// One-line start banner with the version and the exact command line.
pub fn launch_message(args: &[String]) -> String {
    format!(
        "{} {} {} started with: {}",
        str_realtime(),
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        args.join(" ")
    )
}
