//! Principal verification for least-privilege deployments.
//!
//! When the gateway is launched under a dedicated low-privilege account
//! (e.g. via `sudo -u taskflow-agent` or a service unit), `--principal` names
//! that account and the binary refuses to run as anyone else.

use tracing::{debug, warn};

use crate::error::SecurityError;

/// Check the effective identity against the expected principal, if any.
#[cfg(unix)]
pub fn verify_principal(expected: Option<&str>) -> Result<(), SecurityError> {
    use nix::unistd::{User, geteuid};

    let euid = geteuid();
    let Some(name) = expected else {
        warn!(
            euid = euid.as_raw(),
            "no principal configured; running with the caller's privileges"
        );
        return Ok(());
    };

    let user = User::from_name(name)
        .map_err(|err| SecurityError::Identity(format!("lookup '{name}': {err}")))?
        .ok_or_else(|| SecurityError::Identity(format!("unknown principal '{name}'")))?;
    if user.uid.is_root() {
        return Err(SecurityError::PrivilegedPrincipal(name.to_string()));
    }
    if user.uid != euid {
        return Err(SecurityError::IdentityMismatch {
            expected: name.to_string(),
            actual: euid.as_raw(),
        });
    }
    debug!(principal = name, uid = euid.as_raw(), "principal verified");
    Ok(())
}

#[cfg(not(unix))]
pub fn verify_principal(expected: Option<&str>) -> Result<(), SecurityError> {
    match expected {
        Some(name) => Err(SecurityError::Identity(format!(
            "principal '{name}' cannot be verified on this platform"
        ))),
        None => Ok(()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn no_principal_is_accepted() {
        assert!(verify_principal(None).is_ok());
    }

    #[test]
    fn unknown_principal_is_rejected() {
        let err = verify_principal(Some("taskflow-no-such-user-xyz")).unwrap_err();
        assert!(matches!(err, SecurityError::Identity(_)));
    }

    #[test]
    fn root_principal_is_privileged() {
        assert_eq!(
            verify_principal(Some("root")).unwrap_err(),
            SecurityError::PrivilegedPrincipal("root".to_string())
        );
    }
}
