//! Backend selection.

use std::sync::Arc;

use tracing::info;

use crate::config::{SandboxBackend, SandboxConfig};
use crate::error::SandboxResult;
use crate::local::LocalSandboxService;
use crate::remote::RemoteSandboxService;
use crate::service::SandboxService;
use crate::templates::TemplateCatalog;
use crate::workspace::WorkspaceSandboxService;

/// Build the sandbox backend selected by `config`.
///
/// `session_id` only scopes the local mock's log output.
pub fn create_sandbox_service(
    config: &SandboxConfig,
    session_id: &str,
) -> SandboxResult<Arc<dyn SandboxService>> {
    info!("Creating {} sandbox service", config.backend);
    let service: Arc<dyn SandboxService> = match config.backend {
        SandboxBackend::Local => {
            let mut catalog = TemplateCatalog::builtin();
            if let Some(dir) = &config.templates_dir {
                catalog.load_dir(dir)?;
            }
            Arc::new(LocalSandboxService::new(session_id).with_catalog(catalog))
        }
        SandboxBackend::Workspace => Arc::new(WorkspaceSandboxService::from_config(config)?),
        SandboxBackend::Remote => Arc::new(RemoteSandboxService::from_config(config)?),
    };
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_factory_selects_backend() {
        let local = create_sandbox_service(&SandboxConfig::local(), "s1").unwrap();
        assert_eq!(local.backend_name(), "local");

        let temp = tempdir().unwrap();
        let workspace =
            create_sandbox_service(&SandboxConfig::workspace(temp.path()), "s1").unwrap();
        assert_eq!(workspace.backend_name(), "workspace");

        let remote =
            create_sandbox_service(&SandboxConfig::remote("http://localhost:3000"), "s1").unwrap();
        assert_eq!(remote.backend_name(), "remote");
    }

    #[test]
    fn test_remote_without_url_fails() {
        let mut config = SandboxConfig::local();
        config.backend = SandboxBackend::Remote;
        assert!(create_sandbox_service(&config, "s1").is_err());
    }
}
