pub mod hosts;
pub mod services;

use std::io::{self, Write};
use std::path::Path;
use shared::types::ServiceRef;
use crate::config::AvahiConfig;
use crate::conflict::ArtifactName;
use crate::error::{ArtifactError, StartupError};
use self::hosts::{HostEntry, HostsFile};
use self::services::{ServiceDefinition, ServiceDir};

/// The two locations avahi-daemon reads advertisements from
pub struct ArtifactStore {
    pub hosts: HostsFile,
    pub services: ServiceDir,
}

impl ArtifactStore {
    /// Open both locations, failing if either cannot be used
    pub fn open(config: &AvahiConfig) -> Result<Self, StartupError> {
        let hosts = HostsFile::new(&config.hosts_file);
        hosts.ensure_accessible()?;

        let services = ServiceDir::new(&config.services_dir);
        services.ensure_accessible()?;

        tracing::info!("Avahi hosts file: {}", hosts.path().display());
        tracing::info!("Avahi services directory: {}", services.dir().display());

        Ok(Self { hosts, services })
    }

    /// Ownership recorded in existing artifacts, used to seed the conflict tracker
    pub fn recover_claims(&self) -> Result<Vec<(ArtifactName, ServiceRef)>, ArtifactError> {
        let mut claims: Vec<(ArtifactName, ServiceRef)> = self
            .hosts
            .managed_entries()?
            .into_iter()
            .filter_map(|line| line.owner.map(|owner| (ArtifactName::Host(line.hostname), owner)))
            .collect();

        claims.extend(
            self.services
                .managed_files()?
                .into_iter()
                .map(|(filename, owner)| (ArtifactName::ServiceFile(filename), owner)),
        );

        Ok(claims)
    }

    pub fn write_host(&self, entry: &HostEntry) -> Result<bool, ArtifactError> {
        self.hosts.upsert(entry)
    }

    pub fn write_service(&self, definition: &ServiceDefinition) -> Result<bool, ArtifactError> {
        self.services.write(definition)
    }

    /// Remove whatever artifact backs `name`
    pub fn remove(&self, name: &ArtifactName) -> Result<bool, ArtifactError> {
        match name {
            ArtifactName::Host(hostname) => self.hosts.remove(hostname),
            ArtifactName::ServiceFile(filename) => self.services.remove(filename),
        }
    }
}

/// Replace `path` with `contents` through a temp file and rename.
///
/// Permissions of the existing file are carried over since avahi-daemon reads
/// the artifacts after dropping privileges. If the rename is refused (a single
/// bind-mounted file cannot be replaced) the file is rewritten in place.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), ArtifactError> {
    let write_err = |source: io::Error| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = match tempfile::NamedTempFile::new_in(dir) {
        Ok(tmp) => tmp,
        Err(e) => {
            tracing::debug!("Cannot stage {} next to target ({}), writing in place", path.display(), e);
            return std::fs::write(path, contents).map_err(write_err);
        }
    };

    tmp.write_all(contents.as_bytes()).map_err(write_err)?;

    if let Ok(meta) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions()).map_err(write_err)?;
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))
                .map_err(write_err)?;
        }
    }

    tmp.as_file().sync_all().map_err(write_err)?;

    if let Err(e) = tmp.persist(path) {
        tracing::debug!("Rename onto {} refused ({}), writing in place", path.display(), e.error);
        std::fs::write(path, contents).map_err(write_err)?;
    }

    Ok(())
}
