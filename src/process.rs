//! Process queries used to decide whether a recorded owner is still around.
//!
//! Two questions are asked of the OS: does a process with this PID exist, and
//! what program is it running. Neither answer is authoritative. A PID can be
//! recycled between the two calls, and two unrelated programs can share an
//! executable name. The lock only needs a cheap, usually-right signal.

use std::io;

/// Returns the identity of the process running as `pid`: the first
/// whitespace-delimited token of its command line. On Windows this is the
/// full image path, which routinely contains spaces and is used whole.
///
/// An empty string is returned when the process does not exist or cannot be
/// inspected.
pub fn identity(pid: u32) -> String {
    match probe_identity(pid) {
        Ok(identity) => identity,
        Err(_err) => {
            trace!("Unable to read command line of pid {}: {}", pid, _err);
            String::new()
        }
    }
}

/// Like [`identity`], but keeps a failed OS query apart from a missing process.
/// A missing process is `Ok` with an empty token.
pub(crate) fn probe_identity(pid: u32) -> io::Result<String> {
    #[cfg(windows)]
    return image_path(pid);

    #[cfg(unix)]
    command_line(pid).map(|line| first_token(&line).to_string())
}

#[cfg(unix)]
fn first_token(command_line: &str) -> &str {
    command_line.split_whitespace().next().unwrap_or("")
}

#[cfg(target_os = "linux")]
fn command_line(pid: u32) -> io::Result<String> {
    use std::fs;
    use std::path::PathBuf;

    let proc_dir = PathBuf::from(format!("/proc/{pid}"));
    let raw = match fs::read(proc_dir.join("cmdline")) {
        Ok(raw) => raw,
        Err(err) if is_gone(&err) => return Ok(String::new()),
        Err(err) => return Err(err),
    };

    // Kernel threads and zombies have no argv; ps shows them as "[comm]".
    // A freshly forked child also reads empty until its exec completes.
    if raw.iter().all(|b| *b == 0) {
        return match fs::read_to_string(proc_dir.join("comm")) {
            Ok(comm) => Ok(format!("[{}]", comm.trim_end())),
            Err(err) if is_gone(&err) => Ok(String::new()),
            Err(err) => Err(err),
        };
    }

    Ok(String::from_utf8_lossy(&raw).replace('\0', " "))
}

/// The process exited, or exited while its /proc entry was being read.
#[cfg(target_os = "linux")]
fn is_gone(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ESRCH)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn command_line(pid: u32) -> io::Result<String> {
    use std::process::Command;

    // ps exits non-zero with empty output when the pid is unknown
    let output = Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "args="])
        .output()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(windows)]
fn image_path(pid: u32) -> io::Result<String> {
    use windows_sys::Win32::Foundation::ERROR_INVALID_PARAMETER;
    use windows_sys::Win32::System::Threading::{
        OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
        QueryFullProcessImageNameW,
    };

    // SAFETY: the handle is checked before use and closed by HandleGuard; the
    // buffer length passed in matches the buffer handed to the API.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(code) if code == ERROR_INVALID_PARAMETER as i32 => Ok(String::new()),
                _ => Err(err),
            };
        }
        let _guard = HandleGuard(handle);

        let mut buf = [0u16; 1024];
        let mut len = buf.len() as u32;
        if QueryFullProcessImageNameW(handle, PROCESS_NAME_WIN32, buf.as_mut_ptr(), &mut len) == 0
        {
            return Err(io::Error::last_os_error());
        }
        Ok(String::from_utf16_lossy(&buf[..len as usize]))
    }
}

#[cfg(windows)]
struct HandleGuard(windows_sys::Win32::Foundation::HANDLE);

#[cfg(windows)]
impl Drop for HandleGuard {
    fn drop(&mut self) {
        // SAFETY: HandleGuard is only built from handles returned by OpenProcess
        unsafe {
            windows_sys::Win32::Foundation::CloseHandle(self.0);
        }
    }
}

/// Check whether a process exists, without affecting it.
///
/// PID 0 is reserved and always reported alive. A process we are not allowed
/// to signal still exists, so a permission error counts as alive. Only a
/// definite "no such process" answer returns `false`; anything unexpected
/// errs on the side of keeping an existing lock.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    if pid == 0 {
        return true;
    }
    // Out of range for pid_t; kill() would read it as a process group.
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };

    // SAFETY: signal 0 only performs the existence and permission checks,
    // nothing is delivered to the target.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }

    match io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => false,
        Some(libc::EPERM) => true,
        _other => {
            trace!("Unexpected kill(0) result for pid {}: {:?}", pid, _other);
            true
        }
    }
}

/// Check whether a process exists, without affecting it.
///
/// PID 0 is reserved and always reported alive. Access denied means the
/// process exists. Only an unknown PID or an exited process returns `false`.
#[cfg(windows)]
pub fn is_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::{
        ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, STILL_ACTIVE,
    };
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    if pid == 0 {
        return true;
    }

    // SAFETY: the handle is checked before use and closed by HandleGuard.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return match io::Error::last_os_error().raw_os_error() {
                Some(code) if code == ERROR_INVALID_PARAMETER as i32 => false,
                Some(code) if code == ERROR_ACCESS_DENIED as i32 => true,
                _ => true,
            };
        }
        let _guard = HandleGuard(handle);

        let mut exit_code = 0;
        if GetExitCodeProcess(handle, &mut exit_code) == 0 {
            return true;
        }
        exit_code == STILL_ACTIVE as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Identity of a just-spawned child, once its exec has been observed.
    #[cfg(unix)]
    fn settled_identity(pid: u32, expected: &str) -> String {
        let mut current = identity(pid);
        for _ in 0..200 {
            if current == expected {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            current = identity(pid);
        }
        current
    }

    #[test]
    #[cfg(unix)]
    fn test_first_token() {
        assert_eq!(first_token("/usr/bin/python3 -m server --port 80"), "/usr/bin/python3");
        assert_eq!(first_token("  sleep\t30 "), "sleep");
        assert_eq!(first_token(""), "");
        assert_eq!(first_token(" \n "), "");
    }

    #[test]
    fn test_own_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn test_pid_zero_is_alive() {
        assert!(is_alive(0));
    }

    #[test]
    #[cfg(unix)]
    fn test_out_of_range_pid_is_not_alive() {
        assert!(!is_alive(u32::MAX));
        assert!(!is_alive(i32::MAX as u32 + 1));
    }

    #[test]
    fn test_own_identity_is_not_empty() {
        let own = identity(std::process::id());
        assert!(!own.is_empty());
        #[cfg(unix)]
        assert!(!own.contains(char::is_whitespace));
        assert_eq!(probe_identity(std::process::id()).unwrap(), own);
    }

    #[test]
    fn test_missing_process_has_empty_identity() {
        assert_eq!(identity(u32::MAX), "");
    }

    #[test]
    #[cfg(unix)]
    fn test_reaped_child_is_gone() {
        let mut child = std::process::Command::new("sh")
            .args(["-c", "exit 0"])
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();

        assert!(!is_alive(pid));
        assert_eq!(identity(pid), "");
    }

    #[test]
    #[cfg(unix)]
    fn test_child_identity_differs_from_ours() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id();

        let child_identity = settled_identity(pid, "sleep");
        let alive = is_alive(pid);
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(alive);
        assert_eq!(child_identity, "sleep");
        assert_ne!(child_identity, identity(std::process::id()));
    }

    #[test]
    #[cfg(windows)]
    fn test_identity_is_whole_image_path() {
        let exe = std::env::current_exe().unwrap();
        let file_name = exe.file_name().unwrap().to_string_lossy().into_owned();

        let own = identity(std::process::id());
        assert!(own.ends_with(&file_name), "got {:?}", own);
        assert_eq!(probe_identity(std::process::id()).unwrap(), own);
    }
}
