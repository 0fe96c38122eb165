// Path aliases tried against each backend kind

use serde::Serialize;

/// Which upstream a request is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format: (logical endpoint, concrete paths in try order)
static REMOTE_PATH_CANDIDATES: &[(&str, &[&str])] = &[
    ("/api/chat", &["/api/chat", "/chat", "/v1/api/chat", "/v1/chat"]),
    (
        "/api/generate",
        &["/api/generate", "/generate", "/v1/api/generate", "/v1/generate"],
    ),
];

static LOCAL_PATH_CANDIDATES: &[(&str, &[&str])] = &[
    ("/api/chat", &["/api/chat", "/chat"]),
    ("/api/generate", &["/api/generate", "/generate"]),
];

/// Catalog endpoints on the remote backend, in try order
pub const CATALOG_PATHS: &[&str] = &["/v1/models", "/api/tags"];

/// Expand a logical endpoint into the concrete paths to try, requested path always included
pub fn candidate_paths(requested_path: &str, backend: BackendKind) -> Vec<String> {
    let table = match backend {
        BackendKind::Local => LOCAL_PATH_CANDIDATES,
        BackendKind::Remote => REMOTE_PATH_CANDIDATES,
    };

    let mut paths: Vec<String> = table
        .iter()
        .find(|(endpoint, _)| *endpoint == requested_path)
        .map(|(_, aliases)| aliases.iter().map(|p| p.to_string()).collect())
        .unwrap_or_default();

    if !paths.iter().any(|p| p == requested_path) {
        paths.insert(0, requested_path.to_string());
    }
    paths
}

/// Join a base URL and a path; absolute URLs pass through untouched
pub fn build_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
