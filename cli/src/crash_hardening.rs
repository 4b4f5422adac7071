//! Keep API keys out of crash dumps.

use anyhow::{Context, Result};
use std::env;
#[cfg(unix)]
use std::io;

const ALLOW_COREDUMPS_ENV: &str = "GATEHOUSE_ALLOW_COREDUMPS";

pub fn apply() -> Result<()> {
    if coredumps_allowed(env::var(ALLOW_COREDUMPS_ENV).ok().as_deref()) {
        tracing::warn!(
            env_var = ALLOW_COREDUMPS_ENV,
            "Core dumps left enabled by environment override"
        );
        return Ok(());
    }

    disable_core_dumps().context("failed to disable core dumps")?;
    tracing::info!("Core dumps disabled");
    Ok(())
}

fn coredumps_allowed(raw: Option<&str>) -> bool {
    raw.is_some_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        )
    })
}

#[cfg(unix)]
fn disable_core_dumps() -> Result<()> {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid rlimit for the duration of the call.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &raw const limit) };
    if rc != 0 {
        return Err(io::Error::last_os_error()).context("setrlimit(RLIMIT_CORE=0)");
    }

    #[cfg(target_os = "linux")]
    {
        // SAFETY: PR_SET_DUMPABLE takes plain integer arguments.
        let rc = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) };
        if rc != 0 {
            return Err(io::Error::last_os_error()).context("prctl(PR_SET_DUMPABLE=0)");
        }
    }

    Ok(())
}

#[cfg(not(unix))]
fn disable_core_dumps() -> Result<()> {
    Ok(())
}
