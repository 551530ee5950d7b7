/// Source and destination of one replication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationTarget {
    /// Destination repository name, without registry host (e.g. "mirror/app")
    pub repository: String,
    /// Full source reference (e.g. "cgr.dev/acme/app:v1")
    pub source: String,
    /// Full destination reference (e.g. "1234.dkr.ecr.us-west-2.amazonaws.com/mirror/app:v1")
    pub destination: String,
}

impl ReplicationTarget {
    pub fn new(
        source_registry: &str,
        destination_registry: &str,
        repo_prefix: &str,
        source_repository: &str,
        tag: &str,
    ) -> Self {
        let repository = destination_repository(repo_prefix, source_repository);
        Self {
            source: image_reference(source_registry, source_repository, tag),
            destination: image_reference(destination_registry, &repository, tag),
            repository,
        }
    }
}

/// Last path segment of a repository name
///
/// # Example
/// "acme/app" → "app"
pub fn base_name(repository: &str) -> &str {
    repository
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Destination repository for a source repository: `<prefix>/<base name>`
pub fn destination_repository(prefix: &str, source_repository: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let name = base_name(source_repository);
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Host part of a registry setting such as "cgr.dev" or "registry.example.com:5000/ns"
pub fn registry_host(registry: &str) -> &str {
    registry.split('/').next().unwrap_or_default()
}

/// `<registry>/<repository>:<tag>`
pub fn image_reference(registry: &str, repository: &str, tag: &str) -> String {
    format!(
        "{}/{}:{}",
        registry.trim_end_matches('/'),
        repository.trim_matches('/'),
        tag
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("acme/app"), "app");
        assert_eq!(base_name("app"), "app");
        assert_eq!(base_name("acme/team/app/"), "app");
    }

    #[test]
    fn test_destination_repository() {
        assert_eq!(destination_repository("mirror", "acme/app"), "mirror/app");
        assert_eq!(destination_repository("mirror/", "acme/app"), "mirror/app");
        assert_eq!(destination_repository("a/b", "x/y/z"), "a/b/z");
        assert_eq!(destination_repository("", "acme/app"), "app");
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(registry_host("cgr.dev"), "cgr.dev");
        assert_eq!(registry_host("localhost:5000/mirror"), "localhost:5000");
    }

    #[test]
    fn test_replication_target() {
        let target = ReplicationTarget::new(
            "cgr.dev",
            "123456789012.dkr.ecr.us-west-2.amazonaws.com",
            "mirror",
            "acme/app",
            "v1",
        );
        assert_eq!(target.repository, "mirror/app");
        assert_eq!(target.source, "cgr.dev/acme/app:v1");
        assert_eq!(
            target.destination,
            "123456789012.dkr.ecr.us-west-2.amazonaws.com/mirror/app:v1"
        );
    }
}
