//! `OpenAPI` `$ref` resolver.
//!
//! Supports:
//! - Local refs (`#/...`)
//! - File refs (`./common.yaml#/...`, `/abs/path/spec.yaml#/...`, `file:///...#/...`)
//! - URL refs (`https://example.com/common.yaml#/...`)
//!
//! `$ref` resolution is **relative to the document that contains the `$ref`**, so callers pass
//! the current document id (`DocId`) along.
//!
//! Remote documents are fetched up front by [`OpenApiResolver::prefetch`]; afterwards every
//! lookup is synchronous. This keeps the (recursive) schema converter free of async.

use crate::error::{OpenApiToolsError, Result};
use openapiv3::ReferenceOr;
use parking_lot::RwLock;
use percent_encoding::percent_decode_str;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocId {
    Url(Url),
    File(PathBuf),
}

impl DocId {
    /// Parse a root spec location into a document identifier (URL or file path).
    ///
    /// # Errors
    ///
    /// Returns an error if the location is an invalid URL or invalid file URL.
    pub fn parse(spec_location: &str) -> Result<Self> {
        if spec_location.starts_with("http://") || spec_location.starts_with("https://") {
            let url = Url::parse(spec_location).map_err(|e| {
                OpenApiToolsError::OpenApi(format!(
                    "Invalid OpenAPI spec URL '{spec_location}': {e}",
                ))
            })?;
            Ok(DocId::Url(strip_fragment(url)))
        } else if spec_location.starts_with("file://") {
            let url = Url::parse(spec_location).map_err(|e| {
                OpenApiToolsError::OpenApi(format!(
                    "Invalid OpenAPI spec file URL '{spec_location}': {e}",
                ))
            })?;
            let path = url.to_file_path().map_err(|()| {
                OpenApiToolsError::OpenApi(format!(
                    "Invalid file URL (cannot convert to path): {spec_location}",
                ))
            })?;
            Ok(DocId::File(canonicalize_best_effort(path)))
        } else {
            Ok(DocId::File(canonicalize_best_effort(PathBuf::from(
                spec_location,
            ))))
        }
    }

    #[must_use]
    pub fn display(&self) -> String {
        match self {
            DocId::Url(u) => u.to_string(),
            DocId::File(p) => p.display().to_string(),
        }
    }
}

fn strip_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

fn canonicalize_best_effort(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

/// Parse a document body: JSON first, YAML as fallback.
///
/// # Errors
///
/// Returns an error if the content is neither.
pub fn parse_document(content: &str, location: &str) -> Result<Value> {
    serde_json::from_str(content)
        .or_else(|_| serde_yaml::from_str(content))
        .map_err(|e| {
            OpenApiToolsError::Resolution(format!(
                "Failed to parse referenced document {location}: {e}",
            ))
        })
}

#[derive(Debug)]
pub struct OpenApiResolver {
    root_doc: DocId,
    client: Client,
    docs: RwLock<HashMap<DocId, Arc<Value>>>,
    failures: RwLock<HashMap<DocId, String>>,
}

impl OpenApiResolver {
    /// Create a resolver over an already parsed root document.
    #[must_use]
    pub fn new(root_doc: DocId, root: Value, client: Client) -> Self {
        let mut docs = HashMap::new();
        docs.insert(root_doc.clone(), Arc::new(root));
        Self {
            root_doc,
            client,
            docs: RwLock::new(docs),
            failures: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn root_doc(&self) -> &DocId {
        &self.root_doc
    }

    /// The parsed root document.
    #[must_use]
    pub fn root(&self) -> Arc<Value> {
        self.docs
            .read()
            .get(&self.root_doc)
            .cloned()
            .unwrap_or_else(|| Arc::new(Value::Null))
    }

    /// Load every document reachable through `$ref`s, breadth-first, once per absolute location.
    ///
    /// Failures are remembered and reported when (and only when) a ref into that document is
    /// actually followed, so one broken external file only affects the operations using it.
    pub async fn prefetch(&self) {
        let mut queue: VecDeque<DocId> = VecDeque::from([self.root_doc.clone()]);
        let mut scanned: HashSet<DocId> = HashSet::new();

        while let Some(doc) = queue.pop_front() {
            if !scanned.insert(doc.clone()) {
                continue;
            }
            let value = match self.load_doc(&doc).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(doc = %doc.display(), error = %e, "failed to load referenced document");
                    self.failures.write().insert(doc, e.to_string());
                    continue;
                }
            };

            let mut refs = Vec::new();
            collect_ref_strings(&value, &mut refs);
            for r in refs {
                if r.starts_with('#') {
                    continue;
                }
                match Self::parse_ref(&doc, r) {
                    Ok((target, _)) if !scanned.contains(&target) => queue.push_back(target),
                    Ok(_) => {}
                    Err(e) => debug!(reference = %r, error = %e, "skipping unparsable $ref"),
                }
            }
        }
    }

    /// Follow a reference to its target value.
    ///
    /// # Errors
    ///
    /// Returns a [`OpenApiToolsError::Resolution`] for bad refs, missing pointer segments, and
    /// documents that could not be loaded.
    pub fn resolve_ref_value(&self, current_doc: &DocId, reference: &str) -> Result<(DocId, Value)> {
        let (target_doc, pointer) = Self::parse_ref(current_doc, reference)?;
        let doc_value = self.doc(&target_doc)?;

        let selected = if let Some(ptr) = pointer {
            doc_value.pointer(&ptr).cloned().ok_or_else(|| {
                OpenApiToolsError::Resolution(format!(
                    "Unresolved $ref '{}' (doc {}, missing pointer '{}')",
                    reference,
                    target_doc.display(),
                    ptr
                ))
            })?
        } else {
            (*doc_value).clone()
        };

        Ok((target_doc, selected))
    }

    /// Resolve a typed `ReferenceOr<T>` (3.0 documents), following ref chains.
    ///
    /// # Errors
    ///
    /// Returns an error on cycles, unresolvable refs and targets of the wrong shape.
    pub fn resolve_reference_or<T>(
        &self,
        current_doc: &DocId,
        r: &ReferenceOr<T>,
    ) -> Result<(DocId, T)>
    where
        T: Clone + DeserializeOwned,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut doc = current_doc.clone();
        let mut cur: ReferenceOr<T> = r.clone();

        loop {
            match cur {
                ReferenceOr::Item(item) => return Ok((doc, item)),
                ReferenceOr::Reference { reference } => {
                    let key = Self::canonical_ref_key(&doc, &reference)?;
                    if !seen.insert(key) {
                        return Err(OpenApiToolsError::Resolution(format!(
                            "Cyclic $ref detected while resolving: {reference}",
                        )));
                    }

                    let (target_doc, value) = self.resolve_ref_value(&doc, &reference)?;
                    let next: ReferenceOr<T> = serde_json::from_value(value).map_err(|e| {
                        OpenApiToolsError::Resolution(format!(
                            "Failed to deserialize referenced value '{}' (doc {}) as expected type: {}",
                            reference,
                            target_doc.display(),
                            e
                        ))
                    })?;

                    doc = target_doc;
                    cur = next;
                }
            }
        }
    }

    /// Follow `{"$ref": ...}` chains on raw values (3.1 parameters, bodies, responses).
    ///
    /// # Errors
    ///
    /// Returns an error on cycles, unresolvable refs and non-object targets.
    pub fn follow(&self, current_doc: &DocId, value: &Value) -> Result<(DocId, Value)> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut doc = current_doc.clone();
        let mut cur = value.clone();

        while let Some(reference) = cur.get("$ref").and_then(Value::as_str).map(str::to_string) {
            let key = Self::canonical_ref_key(&doc, &reference)?;
            if !seen.insert(key) {
                return Err(OpenApiToolsError::Resolution(format!(
                    "Cyclic $ref detected while resolving: {reference}",
                )));
            }
            let (target_doc, next) = self.resolve_ref_value(&doc, &reference)?;
            if !next.is_object() {
                return Err(OpenApiToolsError::Resolution(format!(
                    "$ref '{reference}' does not point to an object",
                )));
            }
            doc = target_doc;
            cur = next;
        }
        Ok((doc, cur))
    }

    pub(crate) fn parse_ref(current_doc: &DocId, reference: &str) -> Result<(DocId, Option<String>)> {
        if let Some(frag) = reference.strip_prefix('#') {
            let ptr = if frag.is_empty() {
                None
            } else if frag.starts_with('/') {
                Some(frag.to_string())
            } else {
                return Err(OpenApiToolsError::Resolution(format!(
                    "Unsupported $ref fragment (expected JSON pointer starting with '/'): {reference}",
                )));
            };
            return Ok((current_doc.clone(), ptr));
        }

        let (doc_part, frag_part) = match reference.split_once('#') {
            Some((d, f)) => (d, Some(f)),
            None => (reference, None),
        };

        let target_doc = Self::resolve_doc(current_doc, doc_part)?;

        let ptr = match frag_part {
            Some("") | None => None,
            Some(frag) if frag.starts_with('/') => Some(frag.to_string()),
            Some(_) => {
                return Err(OpenApiToolsError::Resolution(format!(
                    "Unsupported $ref fragment (expected JSON pointer starting with '/'): {reference}",
                )));
            }
        };

        Ok((target_doc, ptr))
    }

    fn resolve_doc(current_doc: &DocId, doc_part: &str) -> Result<DocId> {
        if doc_part.is_empty() {
            return Ok(current_doc.clone());
        }

        if doc_part.starts_with("http://") || doc_part.starts_with("https://") {
            let url = Url::parse(doc_part).map_err(|e| {
                OpenApiToolsError::Resolution(format!("Bad $ref URL '{doc_part}': {e}"))
            })?;
            return Ok(DocId::Url(strip_fragment(url)));
        }

        if doc_part.starts_with("file://") {
            let url = Url::parse(doc_part).map_err(|e| {
                OpenApiToolsError::Resolution(format!("Bad $ref file URL '{doc_part}': {e}"))
            })?;
            let path = url.to_file_path().map_err(|()| {
                OpenApiToolsError::Resolution(format!("Bad $ref file URL (not a path): {doc_part}"))
            })?;
            return Ok(DocId::File(canonicalize_best_effort(path)));
        }

        match current_doc {
            DocId::Url(base) => {
                let joined = base.join(doc_part).map_err(|e| {
                    OpenApiToolsError::Resolution(format!(
                        "Failed to resolve relative $ref '{doc_part}' against base {base}: {e}",
                    ))
                })?;
                Ok(DocId::Url(strip_fragment(joined)))
            }
            DocId::File(base) => {
                let resolved = if Path::new(doc_part).is_absolute() {
                    PathBuf::from(doc_part)
                } else {
                    base.parent()
                        .unwrap_or_else(|| Path::new("."))
                        .join(doc_part)
                };
                Ok(DocId::File(canonicalize_best_effort(resolved)))
            }
        }
    }

    /// `url:<abs>#<pointer>` / `file:<abs>#<pointer>`; equal for refs naming the same target.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be parsed.
    pub fn canonical_ref_key(current_doc: &DocId, reference: &str) -> Result<String> {
        let (target_doc, pointer) = Self::parse_ref(current_doc, reference)?;
        let mut key = match &target_doc {
            DocId::Url(u) => format!("url:{u}"),
            DocId::File(p) => format!("file:{}", p.display()),
        };
        if let Some(ptr) = pointer {
            key.push('#');
            key.push_str(&ptr);
        }
        Ok(key)
    }

    /// Cached document; files that were not prefetched are read on demand.
    fn doc(&self, doc: &DocId) -> Result<Arc<Value>> {
        if let Some(v) = self.docs.read().get(doc).cloned() {
            return Ok(v);
        }
        if let Some(msg) = self.failures.read().get(doc) {
            return Err(OpenApiToolsError::Resolution(msg.clone()));
        }
        match doc {
            DocId::File(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    OpenApiToolsError::Resolution(format!(
                        "Failed to read referenced file {}: {e}",
                        path.display(),
                    ))
                })?;
                let parsed = Arc::new(parse_document(&content, &doc.display())?);
                self.docs.write().insert(doc.clone(), Arc::clone(&parsed));
                Ok(parsed)
            }
            DocId::Url(url) => Err(OpenApiToolsError::Resolution(format!(
                "Referenced URL {url} was not fetched",
            ))),
        }
    }

    async fn load_doc(&self, doc: &DocId) -> Result<Arc<Value>> {
        if let Some(v) = self.docs.read().get(doc).cloned() {
            return Ok(v);
        }

        let content = match doc {
            DocId::File(path) => std::fs::read_to_string(path).map_err(|e| {
                OpenApiToolsError::Resolution(format!(
                    "Failed to read referenced file {}: {e}",
                    path.display(),
                ))
            })?,
            DocId::Url(url) => self
                .client
                .get(url.clone())
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| {
                    OpenApiToolsError::Resolution(format!(
                        "Failed to fetch referenced URL {url}: {}",
                        apibridge_http_tools::error::sanitize_reqwest_error(&e)
                    ))
                })?
                .text()
                .await
                .map_err(|e| {
                    OpenApiToolsError::Resolution(format!("Failed to read referenced URL body: {e}"))
                })?,
        };

        let parsed = Arc::new(parse_document(&content, &doc.display())?);
        self.docs.write().insert(doc.clone(), Arc::clone(&parsed));
        Ok(parsed)
    }
}

fn collect_ref_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if k == "$ref"
                    && let Value::String(s) = v
                {
                    out.push(s);
                } else {
                    collect_ref_strings(v, out);
                }
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_ref_strings(v, out);
            }
        }
        _ => {}
    }
}

/// Definition base name for a reference: the last pointer segment, or the file stem for a
/// whole-document ref, reduced to identifier characters.
#[must_use]
pub fn ref_base_name(reference: &str) -> String {
    let (doc_part, frag) = match reference.split_once('#') {
        Some((d, f)) => (d, f),
        None => (reference, ""),
    };

    let raw = if let Some(seg) = frag.rsplit('/').find(|s| !s.is_empty()) {
        decode_pointer_segment(seg)
    } else {
        let trimmed = doc_part.trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        Path::new(last)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    sanitize_identifier(&raw)
}

fn decode_pointer_segment(seg: &str) -> String {
    let unescaped = seg.replace("~1", "/").replace("~0", "~");
    percent_decode_str(&unescaped)
        .decode_utf8_lossy()
        .into_owned()
}

/// Non-identifier characters become `_`; a leading digit gets a `_` prefix.
#[must_use]
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() {
        return "Schema".to_string();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn resolver_for(doc: DocId, root: Value) -> OpenApiResolver {
        OpenApiResolver::new(doc, root, Client::new())
    }

    #[test]
    fn base_names_come_from_the_last_segment() {
        assert_eq!(ref_base_name("#/components/schemas/Pet"), "Pet");
        assert_eq!(ref_base_name("common.yaml#/Error"), "Error");
        assert_eq!(ref_base_name("./models/user-profile.yaml"), "user_profile");
        assert_eq!(ref_base_name("#/components/schemas/a~1b"), "a_b");
        assert_eq!(ref_base_name("#/components/schemas/2fa"), "_2fa");
        assert_eq!(ref_base_name("#/components/schemas/Caf%C3%A9"), "Caf_");
    }

    #[test]
    fn local_pointer_resolution() {
        let root = json!({"components": {"schemas": {"Pet": {"type": "object"}}}});
        let doc = DocId::File(PathBuf::from("/nonexistent/spec.yaml"));
        let r = resolver_for(doc.clone(), root);
        let (d, v) = r.resolve_ref_value(&doc, "#/components/schemas/Pet").unwrap();
        assert_eq!(d, doc);
        assert_eq!(v, json!({"type": "object"}));

        let err = r
            .resolve_ref_value(&doc, "#/components/schemas/Missing")
            .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::Resolution(_)));

        let err = r.resolve_ref_value(&doc, "#components").unwrap_err();
        assert!(matches!(err, OpenApiToolsError::Resolution(_)));
    }

    #[test]
    fn file_refs_resolve_relative_to_the_containing_document() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("models")).unwrap();
        fs::write(
            dir.path().join("models/pet.yaml"),
            "Pet:\n  type: object\n  properties:\n    owner:\n      $ref: 'owner.json#/Owner'\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("models/owner.json"),
            r#"{"Owner": {"type": "string"}}"#,
        )
        .unwrap();

        let root_path = dir.path().join("openapi.yaml");
        fs::write(&root_path, "openapi: 3.1.0\n").unwrap();
        let root_doc = DocId::parse(&root_path.display().to_string()).unwrap();
        let r = resolver_for(root_doc.clone(), json!({}));

        let (pet_doc, pet) = r.resolve_ref_value(&root_doc, "models/pet.yaml#/Pet").unwrap();
        assert_eq!(pet["type"], json!("object"));

        let owner_ref = pet["properties"]["owner"]["$ref"].as_str().unwrap();
        let (_, owner) = r.resolve_ref_value(&pet_doc, owner_ref).unwrap();
        assert_eq!(owner, json!({"type": "string"}));
    }

    #[test]
    fn canonical_keys_match_for_equivalent_refs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "X: {}\n").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        let root = DocId::parse(&dir.path().join("root.yaml").display().to_string()).unwrap();
        let nested = DocId::File(dir.path().join("sub").join("x.yaml"));
        let k1 = OpenApiResolver::canonical_ref_key(&root, "a.yaml#/X").unwrap();
        let k2 = OpenApiResolver::canonical_ref_key(&nested, "../a.yaml#/X").unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn follow_detects_cycles() {
        let root = json!({
            "components": {"parameters": {
                "A": {"$ref": "#/components/parameters/B"},
                "B": {"$ref": "#/components/parameters/A"}
            }}
        });
        let doc = DocId::File(PathBuf::from("/nonexistent/spec.yaml"));
        let r = resolver_for(doc.clone(), root);
        let err = r
            .follow(&doc, &json!({"$ref": "#/components/parameters/A"}))
            .unwrap_err();
        assert!(err.to_string().contains("Cyclic"));
    }

    #[tokio::test]
    async fn prefetch_loads_remote_documents_once() -> anyhow::Result<()> {
        use axum::Router;
        use axum::routing::get;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let routes = Router::new().route(
            "/schemas/common.yaml",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "Error:\n  type: object\n  properties:\n    code: {type: integer}\n"
                }
            }),
        );
        let upstream = apibridge_test_support::MockUpstream::start(routes).await?;

        let root_doc = DocId::parse(&upstream.url("/openapi.json"))?;
        let root = json!({
            "a": {"$ref": "schemas/common.yaml#/Error"},
            "b": {"$ref": "schemas/common.yaml#/Error"},
            "c": {"$ref": "missing.yaml#/X"}
        });
        let r = resolver_for(root_doc.clone(), root);
        r.prefetch().await;

        let (_, v) = r.resolve_ref_value(&root_doc, "schemas/common.yaml#/Error")?;
        assert_eq!(v["type"], json!("object"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(r.resolve_ref_value(&root_doc, "missing.yaml#/X").is_err());
        Ok(())
    }
}
