//! Target profile gathered once after connecting

use std::time::Duration;

use log::debug;

use crate::audit::{AuditLog, Stage, run_audited};
use crate::domain::TargetProfile;
use crate::error::{PrivloopError, Result};
use crate::session::{SessionHandle, Transport};

const ECHO_TIMEOUT: Duration = Duration::from_secs(10);

/// Placeholder for a lookup that failed
pub const UNKNOWN: &str = "unknown";

const OS_RELEASE: &str = "sed -n 's/^PRETTY_NAME=//p' /etc/os-release 2>/dev/null | tr -d '\"'";

/// Run one lookup; anything short of an audit failure degrades to "unknown"
async fn lookup<T: Transport>(session: &mut SessionHandle<T>, audit: &mut AuditLog, command: &str) -> Result<String> {
    match run_audited(audit, session, Stage::Profile, command, ECHO_TIMEOUT).await {
        Ok(out) if out.success() && !out.stdout.trim().is_empty() => Ok(out.stdout.trim().to_string()),
        Ok(out) => {
            debug!("profile lookup '{}' exited {}", command, out.exit_code);
            Ok(UNKNOWN.to_string())
        }
        Err(e @ PrivloopError::Audit(_)) => Err(e),
        Err(e) => {
            debug!("profile lookup '{}' failed: {}", command, e);
            Ok(UNKNOWN.to_string())
        }
    }
}

/// Gather hostname, kernel, OS, architecture and identity of the session
pub async fn collect_profile<T: Transport>(
    session: &mut SessionHandle<T>,
    audit: &mut AuditLog,
) -> Result<TargetProfile> {
    Ok(TargetProfile {
        hostname: lookup(session, audit, "hostname").await?,
        kernel: lookup(session, audit, "uname -r").await?,
        os: lookup(session, audit, OS_RELEASE).await?,
        architecture: lookup(session, audit, "uname -m").await?,
        whoami: lookup(session, audit, "whoami").await?,
        id: lookup(session, audit, "id").await?,
        cwd: lookup(session, audit, "pwd").await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fake::{connected, reply};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_collect_profile() {
        let dir = TempDir::new().unwrap();
        let mut audit = AuditLog::create(dir.path(), "r").unwrap();
        let (mut session, commands) = connected(|cmd| {
            Ok(match cmd {
                "hostname" => reply(0, "web01\n"),
                "uname -r" => reply(0, "5.4.0-42-generic\n"),
                "uname -m" => reply(0, "x86_64\n"),
                "whoami" => reply(0, "alice\n"),
                "id" => reply(0, "uid=1000(alice) gid=1000(alice)\n"),
                "pwd" => reply(0, "/home/alice\n"),
                _ => reply(0, "Ubuntu 20.04.6 LTS\n"),
            })
        })
        .await;

        let profile = collect_profile(&mut session, &mut audit).await.unwrap();
        assert_eq!(profile.hostname, "web01");
        assert_eq!(profile.kernel, "5.4.0-42-generic");
        assert_eq!(profile.os, "Ubuntu 20.04.6 LTS");
        assert_eq!(profile.architecture, "x86_64");
        assert_eq!(profile.whoami, "alice");
        assert_eq!(profile.cwd, "/home/alice");
        assert_eq!(commands.lock().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_failed_lookups_are_unknown() {
        let dir = TempDir::new().unwrap();
        let mut audit = AuditLog::create(dir.path(), "r").unwrap();
        let (mut session, _) = connected(|cmd| match cmd {
            "hostname" => Ok(reply(0, "web01")),
            "id" => Err(PrivloopError::Timeout(10)),
            _ => Ok(reply(127, "")),
        })
        .await;

        let profile = collect_profile(&mut session, &mut audit).await.unwrap();
        assert_eq!(profile.hostname, "web01");
        assert_eq!(profile.kernel, UNKNOWN);
        assert_eq!(profile.id, UNKNOWN);
    }
}
