use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use shared::protocol::{MANAGED_MARKER, SERVICE_FILE_EXTENSION, SERVICE_FILE_PREFIX};
use shared::types::ServiceRef;
use crate::error::{ArtifactError, StartupError};
use super::write_atomic;

/// Lowercase and replace anything outside `[a-z0-9_-]` with `-`
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// `k8s-<sanitized>.service`
pub fn service_filename(name: &str) -> String {
    format!("{}{}.{}", SERVICE_FILE_PREFIX, sanitize(name), SERVICE_FILE_EXTENSION)
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// A DNS-SD service definition for avahi-daemon (node port services)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub port: u16,
    pub service_type: String,
    pub txt_records: BTreeMap<String, String>,
    pub owner: ServiceRef,
}

impl ServiceDefinition {
    pub fn filename(&self) -> String {
        service_filename(&self.name)
    }

    /// Render the avahi service-group document.
    ///
    /// No host-name element: the service resolves to the node running avahi.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\" standalone='no'?>\n\
             <!DOCTYPE service-group SYSTEM \"avahi-service.dtd\">\n",
        );

        // "--" is not allowed inside an XML comment
        let owner = self.owner.to_string();
        if owner.contains("--") {
            xml.push_str(&format!("<!-- {} -->\n", MANAGED_MARKER));
        } else {
            xml.push_str(&format!("<!-- {} ({}) -->\n", MANAGED_MARKER, owner));
        }

        xml.push_str("<service-group>\n");
        xml.push_str(&format!(
            "  <name replace-wildcards=\"yes\">{}</name>\n",
            escape_xml(&self.name)
        ));
        xml.push_str("  <service>\n");
        xml.push_str(&format!("    <type>{}</type>\n", escape_xml(&self.service_type)));
        xml.push_str(&format!("    <port>{}</port>\n", self.port));
        for (key, value) in &self.txt_records {
            xml.push_str(&format!(
                "    <txt-record>{}={}</txt-record>\n",
                escape_xml(key),
                escape_xml(value)
            ));
        }
        xml.push_str("  </service>\n</service-group>\n");
        xml
    }
}

/// Owner recorded in a file written by `ServiceDefinition::to_xml`
fn parse_owner(contents: &str) -> Option<ServiceRef> {
    contents.lines().find_map(|line| {
        line.trim()
            .strip_prefix("<!--")?
            .strip_suffix("-->")?
            .trim()
            .strip_prefix(MANAGED_MARKER)?
            .trim()
            .strip_prefix('(')?
            .strip_suffix(')')?
            .parse()
            .ok()
    })
}

/// Directory of avahi `.service` files, one per advertised node port service
pub struct ServiceDir {
    dir: PathBuf,
}

impl ServiceDir {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// The directory must already exist and accept new files
    pub fn ensure_accessible(&self) -> Result<(), StartupError> {
        let denied = |reason: String| StartupError::Permission {
            path: self.dir.clone(),
            reason,
        };

        if !self.dir.is_dir() {
            return Err(denied("directory does not exist".to_string()));
        }

        tempfile::tempfile_in(&self.dir).map_err(|e| denied(format!("not writable: {}", e)))?;
        Ok(())
    }

    /// Write the definition if its content differs. Returns whether the file changed.
    pub fn write(&self, definition: &ServiceDefinition) -> Result<bool, ArtifactError> {
        let path = self.path_of(&definition.filename());
        let xml = definition.to_xml();

        match std::fs::read_to_string(&path) {
            Ok(existing) if existing == xml => return Ok(false),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(ArtifactError::Read { path, source }),
        }

        write_atomic(&path, &xml)?;
        Ok(true)
    }

    /// Delete the file if present. Returns whether anything was removed.
    pub fn remove(&self, filename: &str) -> Result<bool, ArtifactError> {
        let path = self.path_of(filename);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ArtifactError::Remove { path, source }),
        }
    }

    /// Files carrying the managed marker with a recoverable owner
    pub fn managed_files(&self) -> Result<Vec<(String, ServiceRef)>, ArtifactError> {
        let read_err = |source| ArtifactError::Read {
            path: self.dir.clone(),
            source,
        };
        let suffix = format!(".{}", SERVICE_FILE_EXTENSION);

        let mut found = Vec::new();
        for dir_entry in std::fs::read_dir(&self.dir).map_err(read_err)? {
            let dir_entry = dir_entry.map_err(read_err)?;
            let Some(filename) = dir_entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if !filename.starts_with(SERVICE_FILE_PREFIX) || !filename.ends_with(&suffix) {
                continue;
            }

            let path = dir_entry.path();
            let contents = std::fs::read_to_string(&path)
                .map_err(|source| ArtifactError::Read { path, source })?;
            match parse_owner(&contents) {
                Some(owner) => found.push((filename, owner)),
                None => tracing::debug!("Ignoring {} without owner marker", filename),
            }
        }

        found.sort();
        Ok(found)
    }
}
