//! Project template catalog.
//!
//! Backends seed new instances from templates. The catalog ships with a
//! built-in `minimal-js` template and can load additional templates from a
//! directory where each subdirectory is one template.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::SandboxResult;
use crate::path::normalize_path;
use crate::types::{FileTreeNode, SandboxFile, TemplateDescription, TemplateDetails};

/// Name of the built-in template.
pub const MINIMAL_JS: &str = "minimal-js";

const MINIMAL_JS_INDEX_HTML: &str = "<!doctype html>\n<html lang=\"en\">\n  <head>\n    <meta charset=\"utf-8\" />\n    <title>Minimal JS Template</title>\n    <link rel=\"stylesheet\" href=\"/styles.css\" />\n  </head>\n  <body>\n    <main class=\"container\">\n      <h1>Minimal JS Template</h1>\n      <p>This is a barebones single-page app served by Cloudflare Workers.</p>\n      <button id=\"btn-health\">Ping /api/health</button>\n      <pre id=\"result\"></pre>\n    </main>\n    <script src=\"/app.js\" defer></script>\n  </body>\n</html>";

const MINIMAL_JS_STYLES_CSS: &str = ":root { --bg: #0b0b0f; --text: #eaeaf2; }\nbody { background: var(--bg); color: var(--text); font-family: sans-serif; }\n.container { max-width: 800px; margin: 0 auto; padding: 2rem; }";

const MINIMAL_JS_APP_JS: &str = "document.addEventListener('DOMContentLoaded', () => {\n  const btn = document.getElementById('btn-health');\n  const out = document.getElementById('result');\n  btn?.addEventListener('click', async () => {\n    out.textContent = 'Loading...';\n    const res = await fetch('/api/health');\n    out.textContent = await res.text();\n  });\n});";

const MINIMAL_JS_WORKER_TS: &str = "import { Hono } from 'hono';\nconst app = new Hono();\napp.get('/api/health', (c) => c.json({ success: true }));\nexport default { fetch: app.fetch };";

const MINIMAL_JS_PACKAGE_JSON: &str = "{\n  \"name\": \"minimal-js\",\n  \"type\": \"module\",\n  \"scripts\": { \"dev\": \"wrangler dev\", \"build\": \"wrangler build\" }\n}";

/// Files seeded by the built-in `minimal-js` template, in seed order.
pub fn minimal_js_files() -> Vec<SandboxFile> {
    vec![
        SandboxFile::new("public/index.html", MINIMAL_JS_INDEX_HTML),
        SandboxFile::new("public/styles.css", MINIMAL_JS_STYLES_CSS),
        SandboxFile::new("public/app.js", MINIMAL_JS_APP_JS),
        SandboxFile::new("worker/index.ts", MINIMAL_JS_WORKER_TS),
        SandboxFile::new("package.json", MINIMAL_JS_PACKAGE_JSON),
    ]
}

/// Registry of known templates.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: HashMap<String, TemplateDetails>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateCatalog {
    /// Create an empty catalog.
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Create a catalog holding the built-in templates.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register(build_details(
            MINIMAL_JS,
            TemplateDescription {
                selection: "Mock template".to_string(),
                usage: "Mock usage".to_string(),
            },
            minimal_js_files(),
            BTreeMap::new(),
        ));
        catalog
    }

    /// Register or replace a template.
    pub fn register(&mut self, details: TemplateDetails) {
        debug!("Registering template: {}", details.name);
        self.templates.insert(details.name.clone(), details);
    }

    /// Look up a template by name.
    pub fn get(&self, name: &str) -> Option<&TemplateDetails> {
        self.templates.get(name)
    }

    /// Look up a template, falling back to a generic empty project.
    pub fn resolve(&self, name: &str) -> TemplateDetails {
        match self.templates.get(name) {
            Some(details) => details.clone(),
            None => {
                debug!("Template '{}' not found, using generic fallback", name);
                fallback_template(name)
            }
        }
    }

    /// Sorted template names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Load every subdirectory of `root` as a template and add it to the
    /// catalog. Returns the number of templates loaded.
    ///
    /// Dependencies are read from the template's `package.json` when
    /// present. A missing root is not an error.
    pub fn load_dir(&mut self, root: &Path) -> SandboxResult<usize> {
        if !root.exists() {
            warn!("Templates directory does not exist: {:?}", root);
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let details = load_template_dir(&name, entry.path())?;
            info!("Loaded template: {} ({} files)", name, details.files.len());
            self.register(details);
            loaded += 1;
        }

        Ok(loaded)
    }
}

fn load_template_dir(name: &str, dir: &Path) -> SandboxResult<TemplateDetails> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let relative = match entry.path().strip_prefix(dir) {
            Ok(relative) => relative.to_string_lossy().to_string(),
            Err(_) => continue,
        };
        let path = normalize_path(&relative)?;
        if path.starts_with("node_modules/") || path.starts_with(".git/") {
            continue;
        }
        match fs::read_to_string(entry.path()) {
            Ok(content) => files.push(SandboxFile::new(path, content)),
            Err(e) => warn!("Skipping unreadable template file {:?}: {}", entry.path(), e),
        }
    }

    let deps = files
        .iter()
        .find(|f| f.path == "package.json")
        .map(|f| package_dependencies(&f.content))
        .unwrap_or_default();

    Ok(build_details(
        name,
        TemplateDescription {
            selection: format!("Template loaded from {}", dir.display()),
            usage: String::new(),
        },
        files,
        deps,
    ))
}

/// Extract `dependencies` and `devDependencies` from a package manifest.
fn package_dependencies(manifest: &str) -> BTreeMap<String, String> {
    let mut deps = BTreeMap::new();
    let Ok(value) = serde_json::from_str::<serde_json::Value>(manifest) else {
        return deps;
    };
    for key in ["dependencies", "devDependencies"] {
        if let Some(map) = value.get(key).and_then(|v| v.as_object()) {
            for (name, version) in map {
                if let Some(version) = version.as_str() {
                    deps.insert(name.clone(), version.to_string());
                }
            }
        }
    }
    deps
}

fn build_details(
    name: &str,
    description: TemplateDescription,
    files: Vec<SandboxFile>,
    deps: BTreeMap<String, String>,
) -> TemplateDetails {
    let file_tree = FileTreeNode::from_paths(files.iter().map(|f| f.path.as_str()));
    TemplateDetails {
        name: name.to_string(),
        description,
        file_tree,
        files,
        deps,
        dont_touch_files: Vec::new(),
        redacted_files: Vec::new(),
    }
}

/// Generic empty project used for unknown template names.
pub fn fallback_template(name: &str) -> TemplateDetails {
    build_details(
        name,
        TemplateDescription {
            selection: "Generic Mock template".to_string(),
            usage: "Mock usage".to_string(),
        },
        vec![SandboxFile::new("package.json", "{}")],
        BTreeMap::new(),
    )
}
