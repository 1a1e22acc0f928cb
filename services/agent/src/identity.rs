//! Host identity.
//!
//! A host is identified by a UUID generated on first boot and persisted in
//! the configuration directory, so restarts keep the same identity.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Write};
use std::net::SocketAddrV4;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use lhorc_types::HostInfo;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Name of the identity file inside the configuration directory.
pub const HOST_UUID_FILE: &str = ".physical_host_uuid";

/// Errors resolving the identity of this host.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("identity file {0} is empty")]
    Empty(PathBuf),

    #[error("failed to read hostname: {0}")]
    Hostname(#[source] nix::Error),

    #[error("failed to list interfaces: {0}")]
    Interfaces(#[source] nix::Error),

    #[error("no non-loopback IPv4 address found")]
    NoAddress,
}

/// Load this host's identity, generating and persisting a UUID on first run.
pub fn load_or_create_host(config_dir: &Path, address: &str) -> Result<HostInfo, IdentityError> {
    let uuid = load_or_create_uuid(config_dir)?;
    let name = nix::unistd::gethostname()
        .map_err(IdentityError::Hostname)?
        .to_string_lossy()
        .into_owned();

    info!(uuid = %uuid, name = %name, address = %address, "Host identity resolved");
    Ok(HostInfo {
        uuid,
        name,
        address: address.to_string(),
    })
}

fn load_or_create_uuid(config_dir: &Path) -> Result<String, IdentityError> {
    let path = config_dir.join(HOST_UUID_FILE);
    match fs::read_to_string(&path) {
        Ok(contents) => {
            let uuid = contents.trim();
            if uuid.is_empty() {
                return Err(IdentityError::Empty(path));
            }
            debug!(path = %path.display(), "Reusing persisted host UUID");
            return Ok(uuid.to_string());
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(IdentityError::Io {
                op: "read",
                path,
                source,
            })
        }
    }

    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(config_dir)
        .map_err(|source| IdentityError::Io {
            op: "create",
            path: config_dir.to_path_buf(),
            source,
        })?;

    let uuid = Uuid::new_v4().to_string();
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&path)
        .map_err(|source| IdentityError::Io {
            op: "create",
            path: path.clone(),
            source,
        })?;
    file.write_all(uuid.as_bytes())
        .map_err(|source| IdentityError::Io {
            op: "write",
            path: path.clone(),
            source,
        })?;

    info!(path = %path.display(), uuid = %uuid, "Generated host UUID");
    Ok(uuid)
}

/// `ip:port` using the first non-loopback IPv4 interface address.
pub fn local_address(port: u16) -> Result<String, IdentityError> {
    let interfaces = nix::ifaddrs::getifaddrs().map_err(IdentityError::Interfaces)?;
    for ifaddr in interfaces {
        let Some(sin) = ifaddr.address.as_ref().and_then(|a| a.as_sockaddr_in()) else {
            continue;
        };
        let ip = *SocketAddrV4::from(*sin).ip();
        if ip.is_loopback() || ip.is_unspecified() {
            continue;
        }
        debug!(interface = %ifaddr.interface_name, ip = %ip, "Using interface address");
        return Ok(format!("{ip}:{port}"));
    }
    Err(IdentityError::NoAddress)
}
