//! Local host metadata carried in heartbeats

use tether_protocol::Heartbeat;

use crate::time::current_time_secs;

/// Snapshot of this host for the next outgoing heartbeat
pub fn local_heartbeat() -> Heartbeat {
    Heartbeat {
        hostname: gethostname::gethostname().to_string_lossy().into_owned(),
        username: whoami::username(),
        user_id: user_id(),
        os_name: std::env::consts::OS.to_string(),
        os_arch: std::env::consts::ARCH.to_string(),
        local_timestamp: i64::try_from(current_time_secs()).unwrap_or(i64::MAX),
    }
}

#[cfg(unix)]
fn user_id() -> String {
    // SAFETY: getuid has no preconditions and cannot fail
    unsafe { libc::getuid() }.to_string()
}

#[cfg(not(unix))]
fn user_id() -> String {
    whoami::username()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_heartbeat() {
        let beat = local_heartbeat();
        assert_eq!(beat.os_name, std::env::consts::OS);
        assert_eq!(beat.os_arch, std::env::consts::ARCH);
        assert!(beat.local_timestamp > 0);
        assert!(!beat.user_id.is_empty());
    }
}
