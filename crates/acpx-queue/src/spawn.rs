//! Detached queue owner spawning
//!
//! The owner runs as a detached child of the initiating CLI: no
//! controlling TTY, stdio discarded, own process group, free to outlive
//! the CLI that started it.

use std::path::PathBuf;
use std::process::Stdio;

use acpx_core::error::Result;

/// What to exec to bring up a queue owner
#[derive(Debug, Clone)]
pub struct OwnerSpawnSpec {
    /// Usually the current executable
    pub program: PathBuf,
    /// The hidden owner subcommand plus its flags
    pub args: Vec<String>,
}

impl OwnerSpawnSpec {
    /// Spec for re-execing the current binary as a queue owner
    pub fn current_exe(record_id: &str, ttl_ms: Option<u64>) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| acpx_core::AcpxError::runtime(format!("cannot resolve own binary: {}", e)))?;
        let mut args = vec!["queue-owner".to_string(), "--session".to_string(), record_id.to_string()];
        if let Some(ttl_ms) = ttl_ms {
            args.push("--ttl-ms".to_string());
            args.push(ttl_ms.to_string());
        }
        Ok(Self { program, args })
    }
}

/// Spawn the owner detached; returns its PID
pub fn spawn_detached_owner(spec: &OwnerSpawnSpec) -> Result<u32> {
    let mut cmd = std::process::Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group: the owner must survive the CLI's terminal.
        cmd.process_group(0);
    }

    let child = cmd.spawn().map_err(|e| {
        acpx_core::AcpxError::queue(format!(
            "failed to spawn queue owner {}: {}",
            spec.program.display(),
            e
        ))
    })?;
    let pid = child.id();
    tracing::debug!("spawned detached queue owner (pid {})", pid);
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_spec_for_current_exe() {
        let spec = OwnerSpawnSpec::current_exe("record-9", Some(4_000)).unwrap();
        assert!(spec.program.exists());
        assert_eq!(spec.args[0], "queue-owner");
        assert!(spec.args.contains(&"record-9".to_string()));
        assert!(spec.args.contains(&"4000".to_string()));
    }

    #[test]
    fn test_spawn_detached_runs() {
        // Any harmless binary proves the detach plumbing.
        let spec = OwnerSpawnSpec {
            program: PathBuf::from("true"),
            args: vec![],
        };
        let pid = spawn_detached_owner(&spec).unwrap();
        assert!(pid > 0);
    }
}
