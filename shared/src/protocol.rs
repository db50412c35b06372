/// Annotation prefix recognised on watched services
pub const ANNOTATION_PREFIX: &str = "avahi.local/";

/// Annotation keys, relative to `ANNOTATION_PREFIX`
pub const ANNOTATION_ENABLED: &str = "enabled";
pub const ANNOTATION_NAME: &str = "name";
pub const ANNOTATION_SERVICE_TYPE: &str = "service-type";
pub const ANNOTATION_TXT_PREFIX: &str = "txt-";

/// Service type advertised when no `service-type` annotation is set
pub const DEFAULT_SERVICE_TYPE: &str = "_http._tcp";

/// Domain appended to advertised hostnames
pub const LOCAL_DOMAIN: &str = "local";

/// Marker identifying hosts lines and service files owned by the advertiser.
/// Must stay byte-identical across releases or ownership of existing artifacts is lost.
pub const MANAGED_MARKER: &str = "# Managed by k8s-avahi-advertiser";

/// Service definition file naming: `k8s-<sanitized>.service`
pub const SERVICE_FILE_PREFIX: &str = "k8s-";
pub const SERVICE_FILE_EXTENSION: &str = "service";

/// API path prefix
pub const API_PREFIX: &str = "/v1";
